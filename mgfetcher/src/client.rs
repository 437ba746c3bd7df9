//! Client for the data.gov.in open-data API resource that publishes
//! district-wise MGNREGA performance records.

use crate::error::{FetchError, Result};
use async_trait::async_trait;
use mgstorage::errors::StorageError;
use mgstorage::fetch::{PageQuery, RecordPage, RecordSource};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response envelope around one page of records. Other envelope fields
/// (total, count, field descriptors) are ignored; pagination is driven
/// purely by the length of `records`.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub records: Vec<Map<String, Value>>,
}

/// Client for the upstream open-data API.
#[derive(Clone, Debug)]
pub struct OpenDataClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenDataClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(FetchError::InvalidParam("base URL must not be empty".into()));
        }
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http_client,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// Fetches one page. Geographic and year filters use the API's
    /// `filters[...]` query convention and are omitted when unset.
    pub async fn fetch_records(&self, query: &PageQuery) -> Result<ApiEnvelope> {
        let mut params: Vec<(&str, String)> = vec![
            ("api-key", self.api_key.clone()),
            ("format", "json".to_string()),
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
        ];
        if let Some(state) = &query.state_name {
            params.push(("filters[state_name]", state.clone()));
        }
        if let Some(year) = &query.fin_year {
            params.push(("filters[fin_year]", year.clone()));
        }

        let response = self
            .http_client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Api(format!(
                "HTTP {}: {}",
                status,
                response.text().await.unwrap_or_default()
            )));
        }

        let envelope: ApiEnvelope = response.json().await?;
        log::debug!(
            "Fetched {} records at offset {}",
            envelope.records.len(),
            query.offset
        );
        Ok(envelope)
    }
}

#[async_trait]
impl RecordSource for OpenDataClient {
    fn name(&self) -> &'static str {
        "data.gov.in"
    }

    async fn fetch_page(&self, query: &PageQuery) -> mgstorage::errors::Result<RecordPage> {
        let envelope = self
            .fetch_records(query)
            .await
            .map_err(|err| StorageError::Fetch(err.to_string()))?;
        Ok(RecordPage {
            records: envelope.records,
        })
    }
}
