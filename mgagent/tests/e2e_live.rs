//! Live end-to-end test against the real open-data API. Needs network
//! access and credentials, so it is ignored by default:
//!
//!   MGNREGA_BASE_URL=... MGNREGA_API_KEY=... \
//!     cargo test -p mgagent --test e2e_live -- --ignored

use std::sync::Arc;

use mgfetcher::OpenDataClient;
use mgstorage::{
    config::{StorageConfig, SyncSettings},
    models::{SyncScope, SyncType},
    MgStorage,
};
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
#[ignore]
async fn live_sync_populates_the_database() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let base_url = std::env::var("MGNREGA_BASE_URL")?;
    let api_key = std::env::var("MGNREGA_API_KEY")?;

    let dir = tempdir()?;
    let config = StorageConfig::new(dir.path()).with_sync_settings(SyncSettings {
        page_size: 100,
        max_pages: 2,
        page_delay: Duration::from_millis(500),
    });
    let source = Arc::new(OpenDataClient::new(base_url, api_key)?);
    let storage = Arc::new(MgStorage::new(config, source).await?);

    let report = storage
        .synchronizer
        .sync(SyncScope::default(), SyncType::Manual)
        .await?;
    assert!(report.records_synced() > 0, "live API returned no records");

    let states = storage.queries.list_states().await?;
    assert!(!states.is_empty());

    let logs = storage.queries.recent_sync_logs(1)?;
    assert_eq!(logs[0].status, "success");
    Ok(())
}
