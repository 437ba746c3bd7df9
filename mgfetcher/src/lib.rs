//! HTTP client crate for the upstream open-data API. Implements the
//! [`mgstorage::fetch::RecordSource`] seam so the storage layer never
//! depends on HTTP details.

pub mod client;
pub mod error;

pub use client::{ApiEnvelope, OpenDataClient};
pub use error::{FetchError, Result};
