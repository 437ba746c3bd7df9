//! Sync Orchestrator: drives the paginated fetch loop against the
//! upstream API, hands each page to the batch upserter, then rebuilds
//! lookup tables, invalidates the cache namespace and records one
//! audit row per attempt.

use crate::cache::{Cache, KEY_PREFIX};
use crate::config::SyncSettings;
use crate::errors::Result;
use crate::fetch::{PageQuery, RecordSource};
use crate::models::{
    SyncLogWrite, SyncReport, SyncScope, SyncStatus, SyncType, UpsertCounts,
};
use crate::store::Database;
use std::sync::Arc;
use std::time::Instant;

pub struct Synchronizer {
    db: Arc<Database>,
    cache: Arc<Cache>,
    source: Arc<dyn RecordSource>,
    settings: SyncSettings,
}

impl Synchronizer {
    pub fn new(
        db: Arc<Database>,
        cache: Arc<Cache>,
        source: Arc<dyn RecordSource>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            db,
            cache,
            source,
            settings,
        }
    }

    /// Runs one sync attempt end to end. Exactly one sync-log row is
    /// appended whether the attempt succeeds or fails; failures are
    /// re-raised to the caller after being recorded. Pages already
    /// committed before a failure stay committed (transactions are
    /// per page, not per sync).
    pub async fn sync(&self, scope: SyncScope, sync_type: SyncType) -> Result<SyncReport> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let started = Instant::now();

        log::info!(
            "Starting {} sync from '{}' (state: {:?}, year: {:?})",
            sync_type.as_str(),
            self.source.name(),
            scope.state_name,
            scope.fin_year
        );

        let outcome = self.run(&scope).await;
        let completed_at = chrono::Utc::now().to_rfc3339();

        match outcome {
            Ok((counts, pages)) => {
                let report = SyncReport {
                    inserted: counts.inserted,
                    updated: counts.updated,
                    pages,
                    elapsed: started.elapsed(),
                };
                self.write_log(SyncLogWrite {
                    sync_type,
                    state_name: scope.state_name.clone(),
                    fin_year: scope.fin_year.clone(),
                    status: SyncStatus::Success,
                    records_synced: report.records_synced() as i64,
                    error_message: None,
                    started_at,
                    completed_at: Some(completed_at),
                });
                log::info!(
                    "Sync completed: {} pages, {} new, {} updated in {:.1}s",
                    report.pages,
                    report.inserted,
                    report.updated,
                    report.elapsed.as_secs_f64()
                );
                Ok(report)
            }
            Err(err) => {
                log::error!("Sync failed: {err}");
                self.write_log(SyncLogWrite {
                    sync_type,
                    state_name: scope.state_name.clone(),
                    fin_year: scope.fin_year.clone(),
                    status: SyncStatus::Failed,
                    records_synced: 0,
                    error_message: Some(err.to_string()),
                    started_at,
                    completed_at: Some(completed_at),
                });
                Err(err)
            }
        }
    }

    async fn run(&self, scope: &SyncScope) -> Result<(UpsertCounts, u32)> {
        let page_size = self.settings.page_size;
        let mut totals = UpsertCounts::default();
        let mut offset = 0usize;
        let mut pages = 0u32;

        while pages < self.settings.max_pages {
            pages += 1;
            log::info!("Fetching page {pages} (offset {offset})");

            let page = self
                .source
                .fetch_page(&PageQuery {
                    state_name: scope.state_name.clone(),
                    fin_year: scope.fin_year.clone(),
                    limit: page_size,
                    offset,
                })
                .await?;

            if page.records.is_empty() {
                break;
            }

            // One transaction per page; a failure aborts the attempt
            // without rolling back earlier pages.
            let counts = self.db.upsert_batch(&page.records)?;
            totals.inserted += counts.inserted;
            totals.updated += counts.updated;

            if page.records.len() < page_size {
                break;
            }
            offset += page_size;

            tokio::time::sleep(self.settings.page_delay).await;
        }

        // Lookup tables may transiently lag the canonical data; they
        // self-heal on the next sync.
        if let Err(err) = self.db.rebuild_lookups() {
            log::error!("Lookup table rebuild failed: {err}");
        }

        self.cache.invalidate_prefix(KEY_PREFIX).await;

        Ok((totals, pages))
    }

    fn write_log(&self, entry: SyncLogWrite) {
        if let Err(err) = self.db.append_sync_log(&entry) {
            log::error!("Failed to record sync attempt: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::MemoryBackend;
    use crate::config::StorageConfig;
    use crate::errors::StorageError;
    use crate::fetch::RecordPage;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    struct ScriptedSource {
        pages: Mutex<VecDeque<std::result::Result<Vec<Map<String, Value>>, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(pages: Vec<std::result::Result<Vec<Map<String, Value>>, String>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RecordSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_page(&self, _query: &PageQuery) -> Result<RecordPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.pages.lock().unwrap().pop_front() {
                Some(Ok(records)) => Ok(RecordPage { records }),
                Some(Err(message)) => Err(StorageError::Fetch(message)),
                None => Ok(RecordPage::default()),
            }
        }
    }

    fn record(district: &str, expenditure: f64) -> Map<String, Value> {
        json!({
            "state_name": "Kerala",
            "district_name": district,
            "fin_year": "2023-2024",
            "Total_Exp": expenditure,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn settings(page_size: usize, max_pages: u32) -> SyncSettings {
        SyncSettings {
            page_size,
            max_pages,
            page_delay: Duration::from_millis(0),
        }
    }

    fn harness(
        source: Arc<ScriptedSource>,
        settings: SyncSettings,
    ) -> (Synchronizer, Arc<Database>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let db = Arc::new(Database::open(&config).unwrap());
        db.initialize_schema().unwrap();
        let cache = Arc::new(Cache::new(Arc::new(MemoryBackend::default())));
        let synchronizer = Synchronizer::new(Arc::clone(&db), cache, source, settings);
        (synchronizer, db, dir)
    }

    #[tokio::test]
    async fn invalid_records_are_skipped_and_not_counted() {
        let missing_district = json!({ "state_name": "Kerala" })
            .as_object()
            .cloned()
            .unwrap();
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![
            record("Idukki", 1.0),
            record("Wayanad", 2.0),
            record("Palakkad", 3.0),
            missing_district,
        ])]));
        let (synchronizer, db, _dir) = harness(Arc::clone(&source), settings(1000, 10));

        let report = synchronizer
            .sync(SyncScope::default(), SyncType::Manual)
            .await
            .unwrap();

        assert_eq!(report.records_synced(), 3);
        assert_eq!(db.stats().unwrap().total_records, 3);

        let logs = db.recent_sync_logs(1).unwrap();
        assert_eq!(logs[0].status, "success");
        assert_eq!(logs[0].records_synced, 3);
        assert_eq!(logs[0].sync_type, "manual");
    }

    #[tokio::test]
    async fn resubmitting_a_changed_record_updates_in_place() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![record("Idukki", 100.0)]),
            Ok(vec![record("Idukki", 999.0)]),
        ]));
        let (synchronizer, db, _dir) = harness(Arc::clone(&source), settings(1000, 10));

        synchronizer
            .sync(SyncScope::default(), SyncType::Scheduled)
            .await
            .unwrap();
        let after_first = db.stats().unwrap().total_records;

        let report = synchronizer
            .sync(SyncScope::default(), SyncType::Scheduled)
            .await
            .unwrap();

        assert_eq!(db.stats().unwrap().total_records, after_first);
        assert_eq!(report.inserted, 0);
        assert_eq!(report.updated, 1);
        let rows = db.district_performance("Idukki", None).unwrap();
        assert_eq!(rows[0].total_expenditure, 999.0);
    }

    #[tokio::test]
    async fn short_page_terminates_pagination() {
        // Full, full, short: exactly three fetch calls, then stop.
        let page_size = 3;
        let full_a: Vec<_> = (0..3).map(|i| record(&format!("A{i}"), 1.0)).collect();
        let full_b: Vec<_> = (0..3).map(|i| record(&format!("B{i}"), 1.0)).collect();
        let short: Vec<_> = vec![record("C0", 1.0)];
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(full_a),
            Ok(full_b),
            Ok(short),
        ]));
        let (synchronizer, db, _dir) = harness(Arc::clone(&source), settings(page_size, 10));

        let report = synchronizer
            .sync(SyncScope::default(), SyncType::Scheduled)
            .await
            .unwrap();

        assert_eq!(source.calls(), 3);
        assert_eq!(report.pages, 3);
        assert_eq!(report.records_synced(), 7);
        assert_eq!(db.stats().unwrap().total_records, 7);
    }

    #[tokio::test]
    async fn page_ceiling_bounds_a_misbehaving_upstream() {
        let pages: Vec<_> = (0..20)
            .map(|p| Ok((0..2).map(|i| record(&format!("P{p}D{i}"), 1.0)).collect()))
            .collect();
        let source = Arc::new(ScriptedSource::new(pages));
        let (synchronizer, _db, _dir) = harness(Arc::clone(&source), settings(2, 4));

        let report = synchronizer
            .sync(SyncScope::default(), SyncType::Scheduled)
            .await
            .unwrap();

        assert_eq!(source.calls(), 4);
        assert_eq!(report.pages, 4);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_but_keeps_earlier_pages() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok((0..3).map(|i| record(&format!("D{i}"), 1.0)).collect()),
            Err("HTTP 502 from upstream".to_string()),
        ]));
        let (synchronizer, db, _dir) = harness(Arc::clone(&source), settings(3, 10));

        let err = synchronizer
            .sync(SyncScope::default(), SyncType::Manual)
            .await;
        assert!(err.is_err());

        // The first page's transaction survives the later failure.
        assert_eq!(db.stats().unwrap().total_records, 3);

        let logs = db.recent_sync_logs(1).unwrap();
        assert_eq!(logs[0].status, "failed");
        assert!(logs[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("HTTP 502"));
    }

    #[tokio::test]
    async fn scope_filters_are_forwarded_and_logged() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![record("Idukki", 1.0)])]));
        let (synchronizer, db, _dir) = harness(Arc::clone(&source), settings(1000, 10));

        synchronizer
            .sync(
                SyncScope {
                    state_name: Some("Kerala".to_string()),
                    fin_year: Some("2023-2024".to_string()),
                },
                SyncType::Manual,
            )
            .await
            .unwrap();

        let logs = db.recent_sync_logs(1).unwrap();
        assert_eq!(logs[0].state_name.as_deref(), Some("Kerala"));
        assert_eq!(logs[0].fin_year.as_deref(), Some("2023-2024"));
    }
}
