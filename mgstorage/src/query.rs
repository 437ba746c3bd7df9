//! Cache-backed read path for the lookup and aggregate queries served
//! over the API.

use crate::cache::{Cache, KEY_PREFIX};
use crate::errors::Result;
use crate::models::{
    DatabaseStats, DistrictPerformance, DistrictSummary, StateSummary, SyncLogEntry,
};
use crate::store::Database;
use std::sync::Arc;
use std::time::Duration;

/// Lookup lists change only on sync, so they can live longer than the
/// recomputed aggregates.
const LOOKUP_TTL: Duration = Duration::from_secs(3600);
const AGGREGATE_TTL: Duration = Duration::from_secs(1800);

pub struct QueryService {
    db: Arc<Database>,
    cache: Arc<Cache>,
}

impl QueryService {
    pub fn new(db: Arc<Database>, cache: Arc<Cache>) -> Self {
        Self { db, cache }
    }

    pub async fn list_states(&self) -> Result<Vec<StateSummary>> {
        let key = format!("{KEY_PREFIX}states");
        if let Some(cached) = self.cache.get_json(&key).await {
            return Ok(cached);
        }
        let states = self.db.list_states()?;
        self.cache.put_json(&key, &states, LOOKUP_TTL).await;
        Ok(states)
    }

    pub async fn list_districts(&self, state_name: &str) -> Result<Vec<DistrictSummary>> {
        let key = format!("{KEY_PREFIX}districts:{state_name}");
        if let Some(cached) = self.cache.get_json(&key).await {
            return Ok(cached);
        }
        let districts = self.db.list_districts(state_name)?;
        self.cache.put_json(&key, &districts, LOOKUP_TTL).await;
        Ok(districts)
    }

    pub async fn district_performance(
        &self,
        district_name: &str,
        fin_year: Option<&str>,
    ) -> Result<Vec<DistrictPerformance>> {
        let key = format!(
            "{KEY_PREFIX}performance:{district_name}:{}",
            fin_year.unwrap_or("all")
        );
        if let Some(cached) = self.cache.get_json(&key).await {
            return Ok(cached);
        }
        let rows = self.db.district_performance(district_name, fin_year)?;
        self.cache.put_json(&key, &rows, AGGREGATE_TTL).await;
        Ok(rows)
    }

    /// Sync history is audit data and is never cached.
    pub fn recent_sync_logs(&self, limit: i64) -> Result<Vec<SyncLogEntry>> {
        self.db.recent_sync_logs(limit)
    }

    pub fn database_stats(&self) -> Result<DatabaseStats> {
        self.db.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::{FailingBackend, MemoryBackend};
    use crate::config::StorageConfig;
    use serde_json::{json, Map, Value};
    use tempfile::tempdir;

    fn record(state: &str, district: &str, expenditure: f64) -> Map<String, Value> {
        json!({
            "state_name": state,
            "district_name": district,
            "fin_year": "2023-2024",
            "Total_Exp": expenditure,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn seeded_db(dir: &tempfile::TempDir) -> Arc<Database> {
        let config = StorageConfig::new(dir.path());
        let db = Database::open(&config).unwrap();
        db.initialize_schema().unwrap();
        db.upsert_batch(&[
            record("Kerala", "Idukki", 100.0),
            record("Kerala", "Wayanad", 200.0),
        ])
        .unwrap();
        db.rebuild_lookups().unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn reads_survive_a_cache_outage() {
        let dir = tempdir().unwrap();
        let db = seeded_db(&dir);
        let service = QueryService::new(db, Arc::new(Cache::new(Arc::new(FailingBackend))));

        let states = service.list_states().await.unwrap();
        assert_eq!(states.len(), 1);

        let districts = service.list_districts("Kerala").await.unwrap();
        assert_eq!(districts.len(), 2);

        let performance = service.district_performance("Idukki", None).await.unwrap();
        assert_eq!(performance[0].total_expenditure, 100.0);
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let dir = tempdir().unwrap();
        let db = seeded_db(&dir);
        let cache = Arc::new(Cache::new(Arc::new(MemoryBackend::default())));
        let service = QueryService::new(Arc::clone(&db), Arc::clone(&cache));

        let first = service.list_districts("Kerala").await.unwrap();
        assert_eq!(first.len(), 2);

        // Wipe the lookup table underneath the cache. The cached list
        // must still answer until it is invalidated.
        {
            let extra = record("Kerala", "Palakkad", 5.0);
            db.upsert_batch(&[extra]).unwrap();
            db.rebuild_lookups().unwrap();
        }
        let cached = service.list_districts("Kerala").await.unwrap();
        assert_eq!(cached.len(), 2);

        cache.invalidate_prefix(KEY_PREFIX).await;
        let fresh = service.list_districts("Kerala").await.unwrap();
        assert_eq!(fresh.len(), 3);
    }

    #[tokio::test]
    async fn year_filter_and_unfiltered_queries_cache_separately() {
        let dir = tempdir().unwrap();
        let db = seeded_db(&dir);
        let service = QueryService::new(db, Arc::new(Cache::new(Arc::new(MemoryBackend::default()))));

        let all = service.district_performance("Idukki", None).await.unwrap();
        assert_eq!(all.len(), 1);

        let missing_year = service
            .district_performance("Idukki", Some("1999-2000"))
            .await
            .unwrap();
        assert!(missing_year.is_empty());

        // The empty filtered result must not shadow the unfiltered one.
        let all_again = service.district_performance("Idukki", None).await.unwrap();
        assert_eq!(all_again.len(), 1);
    }

    #[tokio::test]
    async fn empty_results_are_not_errors() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let db = Database::open(&config).unwrap();
        db.initialize_schema().unwrap();
        let service = QueryService::new(
            Arc::new(db),
            Arc::new(Cache::new(Arc::new(MemoryBackend::default()))),
        );

        assert!(service.list_states().await.unwrap().is_empty());
        assert!(service.list_districts("Nowhere").await.unwrap().is_empty());
        assert!(service
            .district_performance("Nowhere", None)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(service.database_stats().unwrap().total_records, 0);
    }
}
