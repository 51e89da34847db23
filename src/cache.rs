// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 tvlink contributors

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::store::KeyValueStore;

/// Namespace prefix for persisted cache keys.
pub const CACHE_KEY_PREFIX: &str = "streamUrl_";

/// A resolved stream URL with its absolute expiry instant (epoch ms).
///
/// `expires` is always `created_at + TTL`; the entry is valid strictly
/// before that instant, so an entry read at exactly `expires` is stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    pub expires: u64,
}

impl CacheEntry {
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        now_ms < self.expires
    }

    pub fn time_until_expiry(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires.saturating_sub(now_ms))
    }
}

/// In-memory TTL cache of resolved stream URLs, mirrored to a persistent
/// store for warm starts.
///
/// The in-memory map is authoritative for the process lifetime; the store is
/// only read back in [`UrlCache::load_from_persistent`] at startup. Expiry is
/// lazy: `get` reports a miss on a stale entry but leaves it in place; only
/// the startup load actively prunes.
pub struct UrlCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl UrlCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            store,
            ttl,
        }
    }

    fn now_ms() -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }

    fn storage_key(channel_id: &str) -> String {
        format!("{CACHE_KEY_PREFIX}{channel_id}")
    }

    fn channel_of(storage_key: &str) -> Option<&str> {
        storage_key.strip_prefix(CACHE_KEY_PREFIX)
    }

    /// The cached URL for a channel, if present and not yet expired.
    pub fn get(&self, channel_id: &str) -> Option<String> {
        let entries = self.entries.lock();
        let entry = entries.get(channel_id)?;
        if entry.is_valid_at(Self::now_ms()) {
            Some(entry.url.clone())
        } else {
            None
        }
    }

    /// Insert a freshly resolved URL and mirror it to the persistent store.
    ///
    /// The mirror write is best-effort: a store failure is logged and
    /// swallowed, the in-memory entry stands either way.
    pub async fn put(&self, channel_id: &str, url: &str) {
        let entry = CacheEntry {
            url: url.to_string(),
            expires: Self::now_ms() + self.ttl.as_millis() as u64,
        };

        let serialized = serde_json::to_string(&entry);
        self.entries.lock().insert(channel_id.to_string(), entry);

        match serialized {
            Ok(json) => {
                if let Err(e) = self.store.set(&Self::storage_key(channel_id), &json).await {
                    warn!("failed to persist cache entry for {}: {}", channel_id, e);
                }
            }
            Err(e) => warn!("failed to serialize cache entry for {}: {}", channel_id, e),
        }
    }

    /// Drop every cached URL, in memory and in the persistent store.
    pub async fn invalidate_all(&self) -> Result<()> {
        self.entries.lock().clear();

        let keys: Vec<String> = self
            .store
            .keys()
            .await
            .with_context(|| "Failed to list persisted cache keys")?
            .into_iter()
            .filter(|k| k.starts_with(CACHE_KEY_PREFIX))
            .collect();

        if !keys.is_empty() {
            self.store
                .remove_many(&keys)
                .await
                .with_context(|| "Failed to remove persisted cache entries")?;
        }

        debug!("invalidated {} persisted cache entries", keys.len());
        Ok(())
    }

    /// Warm the in-memory map from the persistent store.
    ///
    /// Called once at process start. Entries that have expired or no longer
    /// parse are removed from the store and skipped; they never surface as
    /// errors. Returns the number of entries loaded.
    pub async fn load_from_persistent(&self) -> Result<usize> {
        let keys: Vec<String> = self
            .store
            .keys()
            .await
            .with_context(|| "Failed to list persisted cache keys")?
            .into_iter()
            .filter(|k| k.starts_with(CACHE_KEY_PREFIX))
            .collect();

        let values = self
            .store
            .get_many(&keys)
            .await
            .with_context(|| "Failed to read persisted cache entries")?;

        let now = Self::now_ms();
        let mut stale = Vec::new();
        let mut loaded = 0usize;

        for (key, value) in values {
            let Some(channel_id) = Self::channel_of(&key) else {
                continue;
            };
            let Some(raw) = value else {
                continue;
            };

            match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) if entry.is_valid_at(now) => {
                    self.entries
                        .lock()
                        .insert(channel_id.to_string(), entry);
                    loaded += 1;
                }
                Ok(_) => stale.push(key),
                Err(e) => {
                    warn!("dropping corrupt cache entry {}: {}", key, e);
                    stale.push(key);
                }
            }
        }

        if !stale.is_empty() {
            self.store
                .remove_many(&stale)
                .await
                .with_context(|| "Failed to prune stale cache entries")?;
        }

        debug!(
            "loaded {} cached stream URLs ({} pruned)",
            loaded,
            stale.len()
        );
        Ok(loaded)
    }

    /// Snapshot of the currently valid entries, for display.
    pub fn snapshot(&self) -> Vec<(String, CacheEntry)> {
        let now = Self::now_ms();
        let entries = self.entries.lock();
        let mut valid: Vec<(String, CacheEntry)> = entries
            .iter()
            .filter(|(_, e)| e.is_valid_at(now))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        valid.sort_by(|a, b| a.0.cmp(&b.0));
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn cache_with_ttl(ttl: Duration) -> UrlCache {
        UrlCache::new(Arc::new(MemoryStore::new()), ttl)
    }

    #[test]
    fn expiry_comparison_is_strict() {
        let entry = CacheEntry {
            url: "http://example.com/s".to_string(),
            expires: 1_000,
        };
        assert!(entry.is_valid_at(999));
        assert!(!entry.is_valid_at(1_000));
        assert!(!entry.is_valid_at(1_001));
    }

    #[tokio::test]
    async fn get_returns_fresh_entry_and_misses_expired() {
        let cache = cache_with_ttl(Duration::from_secs(600));
        cache.put("espn", "http://cdn.example.com/espn.m3u8").await;
        assert_eq!(
            cache.get("espn").as_deref(),
            Some("http://cdn.example.com/espn.m3u8")
        );

        // Zero TTL expires at the creation instant.
        let cache = cache_with_ttl(Duration::ZERO);
        cache.put("espn", "http://cdn.example.com/espn.m3u8").await;
        assert_eq!(cache.get("espn"), None);
    }

    #[tokio::test]
    async fn put_mirrors_to_store_under_namespaced_key() {
        let store = Arc::new(MemoryStore::new());
        let cache = UrlCache::new(store.clone(), Duration::from_secs(600));
        cache.put("sky-sports", "http://cdn.example.com/sky").await;

        let raw = store.get("streamUrl_sky-sports").await.unwrap().unwrap();
        let entry: CacheEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.url, "http://cdn.example.com/sky");
    }

    #[tokio::test]
    async fn invalidate_all_clears_memory_and_store() {
        let store = Arc::new(MemoryStore::new());
        let cache = UrlCache::new(store.clone(), Duration::from_secs(600));
        cache.put("a", "http://u/a").await;
        cache.put("b", "http://u/b").await;
        // A foreign key in the store must survive invalidation.
        store.set("other_key", "untouched").await.unwrap();

        cache.invalidate_all().await.unwrap();

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(store.get("streamUrl_a").await.unwrap(), None);
        assert_eq!(store.get("streamUrl_b").await.unwrap(), None);
        assert!(store.get("other_key").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn load_prunes_expired_and_corrupt_entries() {
        let store = Arc::new(MemoryStore::new());
        let fresh = CacheEntry {
            url: "http://u/fresh".to_string(),
            expires: UrlCache::now_ms() + 60_000,
        };
        store
            .set("streamUrl_fresh", &serde_json::to_string(&fresh).unwrap())
            .await
            .unwrap();
        store
            .set(
                "streamUrl_stale",
                r#"{"url":"http://u/stale","expires":1}"#,
            )
            .await
            .unwrap();
        store.set("streamUrl_bad", "not json at all").await.unwrap();

        let cache = UrlCache::new(store.clone(), Duration::from_secs(600));
        let loaded = cache.load_from_persistent().await.unwrap();

        assert_eq!(loaded, 1);
        assert_eq!(cache.get("fresh").as_deref(), Some("http://u/fresh"));
        assert_eq!(cache.get("stale"), None);
        assert_eq!(cache.get("bad"), None);
        assert_eq!(store.get("streamUrl_stale").await.unwrap(), None);
        assert_eq!(store.get("streamUrl_bad").await.unwrap(), None);
    }
}
