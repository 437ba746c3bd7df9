use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Tuning knobs for the paginated sync loop.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Records requested per upstream page.
    pub page_size: usize,
    /// Hard ceiling on pages per sync attempt.
    pub max_pages: u32,
    /// Courtesy delay between page fetches.
    pub page_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            max_pages: 10,
            page_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    /// Redis connection URL; `None` disables caching entirely.
    pub cache_url: Option<String>,
    #[serde(skip, default)]
    pub sync: SyncSettings,
}

impl StorageConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            database_path: base_path.join("mgnrega.sqlite"),
            cache_url: None,
            sync: SyncSettings::default(),
        }
    }

    pub fn with_cache_url(mut self, url: Option<String>) -> Self {
        self.cache_url = url;
        self
    }

    pub fn with_sync_settings(mut self, sync: SyncSettings) -> Self {
        self.sync = sync;
        self
    }
}
