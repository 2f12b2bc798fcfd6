//! Redis-backed cache with graceful degradation, grounded on
//! `backend/app/services/cache_service.py`.

use std::future::Future;

use md5::{Digest, Md5};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable")]
    Unavailable,
}

pub struct CacheConfig {
    pub enabled: bool,
    pub redis_url: String,
    pub redis_db: i64,
}

/// Best-effort cache. Every public method degrades to a no-op rather than
/// propagating an error when Redis is unreachable; callers never have to
/// special-case cache unavailability.
pub struct CacheService {
    client: Mutex<Option<redis::aio::ConnectionManager>>,
    enabled: bool,
}

impl CacheService {
    pub async fn initialize(config: CacheConfig) -> Self {
        if !config.enabled {
            info!("redis caching disabled by configuration");
            return Self { client: Mutex::new(None), enabled: false };
        }

        match redis::Client::open(config.redis_url.clone()) {
            Ok(client) => match client.get_connection_manager().await {
                Ok(manager) => {
                    info!(db = config.redis_db, "redis cache initialized");
                    Self { client: Mutex::new(Some(manager)), enabled: true }
                }
                Err(err) => {
                    warn!(%err, "failed to initialize redis cache, operating in pass-through mode");
                    Self { client: Mutex::new(None), enabled: false }
                }
            },
            Err(err) => {
                warn!(%err, "invalid redis url, operating in pass-through mode");
                Self { client: Mutex::new(None), enabled: false }
            }
        }
    }

    pub fn disabled() -> Self {
        Self { client: Mutex::new(None), enabled: false }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }
        let mut guard = self.client.lock().await;
        let conn = guard.as_mut()?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    Some(value)
                }
                Err(_) => {
                    drop(guard);
                    self.delete(key).await;
                    None
                }
            },
            Ok(None) => {
                debug!(key, "cache miss");
                None
            }
            Err(err) => {
                warn!(key, %err, "cache get error");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: Option<u64>) -> bool {
        if !self.enabled {
            return false;
        }
        let Ok(serialized) = serde_json::to_string(value) else {
            return false;
        };
        let mut guard = self.client.lock().await;
        let Some(conn) = guard.as_mut() else { return false };

        let result = match ttl_secs {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, serialized, ttl).await,
            None => conn.set::<_, _, ()>(key, serialized).await,
        };
        match result {
            Ok(_) => true,
            Err(err) => {
                warn!(key, %err, "cache set error");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let mut guard = self.client.lock().await;
        let Some(conn) = guard.as_mut() else { return false };
        matches!(conn.del::<_, i64>(key).await, Ok(n) if n > 0)
    }

    /// Bounded scan-and-delete, batch size 100.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        if !self.enabled {
            return 0;
        }
        let mut guard = self.client.lock().await;
        let Some(conn) = guard.as_mut() else { return 0 };

        let keys: Vec<String> = {
            let mut iter = match conn.scan_match::<_, String>(pattern).await {
                Ok(iter) => iter,
                Err(err) => {
                    warn!(pattern, %err, "cache delete_pattern scan error");
                    return 0;
                }
            };
            use futures::StreamExt;
            let mut out = Vec::new();
            while let Some(key) = iter.next().await {
                out.push(key);
                if out.len() >= 100 {
                    break;
                }
            }
            out
        };

        if keys.is_empty() {
            return 0;
        }
        match conn.del::<_, u64>(&keys).await {
            Ok(deleted) => {
                info!(pattern, deleted, "cache delete_pattern");
                deleted
            }
            Err(err) => {
                warn!(pattern, %err, "cache delete_pattern error");
                0
            }
        }
    }

    /// Returns the cached value if present; otherwise computes, caches
    /// best-effort, and returns the computed value.
    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        key: &str,
        ttl_secs: Option<u64>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }
        let value = compute().await?;
        self.set(key, &value, ttl_secs).await;
        Ok(value)
    }

    pub fn make_key(parts: &[&str]) -> String {
        parts.join(":")
    }

    /// `prefix:<first-8-hex-of-md5(canonical-json)>`. MD5 is used purely
    /// for key compaction, never for integrity.
    pub fn make_hash_key(prefix: &str, data: &serde_json::Value) -> String {
        let canonical = canonicalize(data);
        let digest = Md5::digest(canonical.as_bytes());
        let suffix = hex::encode(digest)[..8].to_string();
        format!("{}:{}", prefix, suffix)
    }
}

fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_cache_is_pure_pass_through() {
        let cache = CacheService::disabled();
        assert!(cache.get::<String>("k").await.is_none());
        assert!(!cache.set(&"k".to_string(), &"v".to_string(), None).await);
    }

    #[test]
    fn make_hash_key_is_deterministic() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(
            CacheService::make_hash_key("query", &a),
            CacheService::make_hash_key("query", &b)
        );
    }
}
