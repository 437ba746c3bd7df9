use crate::errors::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One page request against the upstream open-data API.
#[derive(Debug, Clone, Default)]
pub struct PageQuery {
    pub state_name: Option<String>,
    pub fin_year: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// One page of loosely-typed upstream records. A page shorter than the
/// requested limit (or empty) signals exhaustion.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<Map<String, Value>>,
}

/// The seam between the orchestrator and the upstream API. Concrete
/// clients live in their own crate; tests script pages in memory.
#[async_trait]
pub trait RecordSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_page(&self, query: &PageQuery) -> Result<RecordPage>;
}
