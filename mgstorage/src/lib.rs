pub mod cache;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod models;
pub mod normalize;
pub mod query;
pub mod store;
pub mod sync;

use crate::cache::Cache;
use crate::config::StorageConfig;
use crate::errors::Result;
use crate::fetch::RecordSource;
use crate::query::QueryService;
use crate::store::Database;
use crate::sync::Synchronizer;
use std::sync::Arc;

/// The main entry point for the `mgstorage` library.
///
/// `MgStorage` bundles the components of the rural-employment data
/// service:
/// - A SQLite database (`Database`) holding the canonical program data,
///   derived lookup tables and the sync audit log.
/// - A best-effort Redis cache (`Cache`) in front of the read queries;
///   the service stays fully functional when it is absent.
/// - A `Synchronizer` that pulls paginated records from a
///   [`RecordSource`] and reconciles them into the database.
/// - A `QueryService` serving the cache-backed read path.
///
/// # Example
///
/// ```rust,no_run
/// use mgstorage::{config::StorageConfig, fetch::RecordSource, MgStorage};
/// use std::sync::Arc;
///
/// # async fn example(source: Arc<dyn RecordSource>) {
/// let config = StorageConfig::new("./data");
/// let storage = MgStorage::new(config, source).await.unwrap();
/// let states = storage.queries.list_states().await.unwrap();
/// # }
/// ```
pub struct MgStorage {
    pub config: StorageConfig,
    pub db: Arc<Database>,
    pub cache: Arc<Cache>,
    pub synchronizer: Arc<Synchronizer>,
    pub queries: Arc<QueryService>,
}

impl MgStorage {
    /// Opens the database (creating its parent directory and schema if
    /// needed), connects the cache when a URL is configured, and wires
    /// up the synchronizer and query service.
    pub async fn new(config: StorageConfig, source: Arc<dyn RecordSource>) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = Arc::new(Database::open(&config)?);
        db.initialize_schema()?;

        let cache = Arc::new(match &config.cache_url {
            Some(url) => Cache::connect(url).await,
            None => Cache::disabled(),
        });

        let synchronizer = Arc::new(Synchronizer::new(
            Arc::clone(&db),
            Arc::clone(&cache),
            source,
            config.sync.clone(),
        ));
        let queries = Arc::new(QueryService::new(Arc::clone(&db), Arc::clone(&cache)));

        Ok(Self {
            config,
            db,
            cache,
            synchronizer,
            queries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{PageQuery, RecordPage};
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct EmptySource;

    #[async_trait]
    impl RecordSource for EmptySource {
        fn name(&self) -> &'static str {
            "empty"
        }

        async fn fetch_page(&self, _query: &PageQuery) -> Result<RecordPage> {
            Ok(RecordPage::default())
        }
    }

    #[tokio::test]
    async fn initialization_creates_database_and_disables_cache() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("nested"));

        let storage = MgStorage::new(config.clone(), Arc::new(EmptySource))
            .await
            .unwrap();

        assert!(config.database_path.exists());
        assert!(!storage.cache.is_enabled());
        assert!(storage.queries.list_states().await.unwrap().is_empty());
    }
}
