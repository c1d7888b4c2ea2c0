//! TTL cache for expensive analysis artifacts
//!
//! Entries are keyed by logical subject id (a stock id, or a named
//! recommendation bucket) and carry their write timestamp. The TTL is chosen
//! by the caller at read time, so one store serves both the per-subject class
//! (hours-scale) and the aggregate-recommendation class.
//!
//! Reads are fail-open: a store error or a stale entry both look like a miss,
//! and the caller recomputes. Administrative invalidation is fail-loud so the
//! operator sees whether the purge happened.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::expiring::Expiring;

/// Backing store for cache entries
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read an entry with its timestamp, if present
    async fn read(&self, key: &str) -> Result<Option<Expiring<Value>>>;

    /// Upsert an entry, replacing any previous timestamp
    async fn write(&self, key: &str, entry: Expiring<Value>) -> Result<()>;

    /// Remove a single entry
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;
}

/// In-memory cache store
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, Expiring<Value>>>,
}

impl MemoryCacheStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, fresh or not
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn read(&self, key: &str) -> Result<Option<Expiring<Value>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, entry: Expiring<Value>) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// Read-through cache over a [`CacheStore`]
pub struct ArtifactCache {
    store: Arc<dyn CacheStore>,
}

impl ArtifactCache {
    /// Create a cache over the given store
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Create a cache backed by process memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()))
    }

    /// Get a value if present and younger than `ttl`.
    ///
    /// Store failures and stale entries are both reported as a miss.
    pub async fn get(&self, key: &str, ttl: Duration) -> Option<Value> {
        let entry = match self.store.read(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!("Cache read failed for key '{}', treating as miss: {}", key, e);
                return None;
            }
        };

        if entry.is_fresh(ttl) {
            debug!("Cache hit for key: {}", key);
            Some(entry.value)
        } else {
            debug!("Cache entry for key '{}' is stale (age {})", key, entry.age());
            None
        }
    }

    /// Upsert a value, resetting its timestamp to now.
    ///
    /// A store failure is logged and swallowed; the value is recomputable.
    pub async fn put(&self, key: &str, value: Value) {
        if let Err(e) = self.store.write(key, Expiring::new(value)).await {
            warn!("Cache write failed for key '{}': {}", key, e);
        }
    }

    /// Remove a single entry
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.store.remove(key).await
    }

    /// Remove every entry
    pub async fn invalidate_all(&self) -> Result<()> {
        self.store.clear().await
    }

    /// Get a fresh value, or fetch and cache it.
    ///
    /// The fetcher runs on a miss or a stale entry; its result is written
    /// back before being returned.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetcher: F,
    ) -> std::result::Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<Value, E>>,
    {
        if let Some(value) = self.get(key, ttl).await {
            return Ok(value);
        }

        debug!("Cache miss for key: {}", key);
        let value = fetcher().await?;
        self.put(key, value.clone()).await;

        Ok(value)
    }
}

impl Clone for ArtifactCache {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = ArtifactCache::in_memory();
        let value = json!({"subject": "2330", "close": 580.0});

        cache.put("2330", value.clone()).await;

        assert_eq!(cache.get("2330", 6 * HOUR).await, Some(value));
        assert_eq!(cache.get("0050", 6 * HOUR).await, None);
    }

    #[tokio::test]
    async fn test_stale_entry_is_a_miss() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = ArtifactCache::new(store.clone());

        let written = Utc::now() - chrono::Duration::hours(5);
        store
            .write("2330", Expiring::with_timestamp(json!({"close": 580.0}), written))
            .await
            .unwrap();

        // Valid under the 6h subject class, stale under the 4h aggregate class
        assert!(cache.get("2330", 6 * HOUR).await.is_some());
        assert!(cache.get("2330", 4 * HOUR).await.is_none());
    }

    #[tokio::test]
    async fn test_put_resets_timestamp() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = ArtifactCache::new(store.clone());

        let written = Utc::now() - chrono::Duration::hours(10);
        store
            .write("2330", Expiring::with_timestamp(json!(1), written))
            .await
            .unwrap();
        assert!(cache.get("2330", 6 * HOUR).await.is_none());

        cache.put("2330", json!(2)).await;
        assert_eq!(cache.get("2330", 6 * HOUR).await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_get_or_fetch_uses_cache() {
        let cache = ArtifactCache::in_memory();
        let value = json!({"brief": "steady"});

        let mut call_count = 0;
        let result = cache
            .get_or_fetch("recommend:value", 4 * HOUR, || {
                call_count += 1;
                async { Ok::<_, crate::error::Error>(value.clone()) }
            })
            .await
            .unwrap();
        assert_eq!(result, value);
        assert_eq!(call_count, 1);

        let result = cache
            .get_or_fetch("recommend:value", 4 * HOUR, || {
                call_count += 1;
                async { Ok::<_, crate::error::Error>(json!("never")) }
            })
            .await
            .unwrap();
        assert_eq!(result, value);
        assert_eq!(call_count, 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_propagates_fetch_error() {
        let cache = ArtifactCache::in_memory();

        let result = cache
            .get_or_fetch("9999", HOUR, || async {
                Err::<Value, _>(crate::error::Error::NotFound("9999".to_string()))
            })
            .await;

        assert!(result.is_err());
        // Nothing cached on failure
        assert!(cache.get("9999", HOUR).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_one_and_all() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = ArtifactCache::new(store.clone());

        for id in ["2330", "2317", "0050"] {
            cache.put(id, json!({"id": id})).await;
        }
        assert_eq!(store.len().await, 3);

        cache.invalidate("2330").await.unwrap();
        assert!(cache.get("2330", HOUR).await.is_none());
        assert_eq!(store.len().await, 2);

        cache.invalidate_all().await.unwrap();
        assert!(store.is_empty().await);
    }
}
