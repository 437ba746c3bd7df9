//! Read-through cache over Redis.
//!
//! The backend is deliberately fallible while the [`Cache`] wrapper is
//! not: every backend error degrades to a miss (reads) or a no-op
//! (writes/invalidation) with a warning, so a cache outage can never
//! fail a request. Reconnection is handled inside the Redis connection
//! manager rather than at call sites.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Namespace prefix for every key this system writes; bulk
/// invalidation after a sync deletes everything underneath it.
pub const KEY_PREFIX: &str = "mgnrega:";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Key-value store with TTL, tolerant of total unavailability.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Deletes every key under `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

pub struct RedisBackend {
    connection: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                removed += keys.len() as u64;
                let _: () = conn.del(&keys).await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }
}

/// Best-effort cache handle shared by the read and write paths.
pub struct Cache {
    backend: Option<Arc<dyn CacheBackend>>,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A cache that answers every read with a miss. Used when no cache
    /// URL is configured or the initial connection fails.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    /// Connects to Redis, falling back to a disabled cache if the
    /// server is unreachable at startup.
    pub async fn connect(url: &str) -> Self {
        match RedisBackend::connect(url).await {
            Ok(backend) => {
                log::info!("Cache connected at {url}");
                Self::new(Arc::new(backend))
            }
            Err(err) => {
                log::warn!("Cache unavailable, continuing without caching: {err}");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend.as_ref()?;
        match backend.get(key).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(value) => Some(value),
                Err(err) => {
                    log::warn!("Cache entry for '{key}' is not decodable: {err}");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                log::warn!("Cache GET '{key}' failed: {err}");
                None
            }
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("Cache encode for '{key}' failed: {err}");
                return;
            }
        };
        if let Err(err) = backend.set(key, &payload, ttl).await {
            log::warn!("Cache SET '{key}' failed: {err}");
        }
    }

    pub async fn delete(&self, key: &str) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        if let Err(err) = backend.delete(key).await {
            log::warn!("Cache DEL '{key}' failed: {err}");
        }
    }

    /// Bulk invalidation after a successful sync.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        match backend.delete_prefix(prefix).await {
            Ok(removed) => log::info!("Cache invalidated {removed} keys under '{prefix}'"),
            Err(err) => log::warn!("Cache invalidation under '{prefix}' failed: {err}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Instant;

    /// In-memory backend with TTL for tests.
    #[derive(Default)]
    pub struct MemoryBackend {
        entries: Mutex<HashMap<String, (String, Instant)>>,
    }

    #[async_trait]
    impl CacheBackend for MemoryBackend {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(key) {
                Some((value, expires_at)) if *expires_at > Instant::now() => {
                    Ok(Some(value.clone()))
                }
                Some(_) => {
                    entries.remove(key);
                    Ok(None)
                }
                None => Ok(None),
            }
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }

        async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|key, _| !key.starts_with(prefix));
            Ok((before - entries.len()) as u64)
        }
    }

    /// Backend that fails every operation, simulating a cache outage.
    pub struct FailingBackend;

    fn outage() -> CacheError {
        CacheError::Redis(redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "simulated cache outage",
        )))
    }

    #[async_trait]
    impl CacheBackend for FailingBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(outage())
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
            Err(outage())
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(outage())
        }

        async fn delete_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
            Err(outage())
        }
    }
}
