//! Time-boxed memoization for expensive verification calls.
//!
//! Entries are immutable once written and replaced wholesale by `set`.
//! Expired entries are evicted lazily on read.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_VERIFICATION_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    key: String,
    value: V,
    stored_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.stored_at) < ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cloning shares the underlying map, so one instance can be constructed per
/// service and handed to every caller.
#[derive(Debug, Clone)]
pub struct VerificationCache<V> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    stats: Arc<RwLock<CacheStats>>,
    ttl: Duration,
}

impl<V: Clone> Default for VerificationCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> VerificationCache<V> {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_VERIFICATION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(CacheStats::default())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        match entries.get(key).map(|entry| entry.is_fresh(now, self.ttl)) {
            None => {
                drop(entries);
                self.stats.write().await.misses += 1;
                debug!(key, "verification cache miss");
                None
            }
            Some(false) => {
                if let Some(expired) = entries.remove(key) {
                    debug!(key = %expired.key, "verification cache entry expired");
                }
                drop(entries);
                let mut stats = self.stats.write().await;
                stats.misses += 1;
                stats.evictions += 1;
                None
            }
            Some(true) => {
                let value = entries.get(key).map(|entry| entry.value.clone());
                drop(entries);
                self.stats.write().await.hits += 1;
                debug!(key, "verification cache hit");
                value
            }
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let entry = CacheEntry {
            key: key.clone(),
            value,
            stored_at: Instant::now(),
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Returns the cached value for `key`, or runs `load` and caches its
    /// successful result. Errors are not cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = load().await?;
        self.set(key, value.clone()).await;
        Ok(value)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drops every entry and resets the statistics.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        *self.stats.write().await = CacheStats::default();
    }

    pub async fn stats(&self) -> CacheStats {
        *self.stats.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn value_is_returned_until_ttl_elapses() {
        let cache = VerificationCache::with_ttl(Duration::from_secs(300));
        cache.set("W18x106", 0.92_f64).await;

        assert_eq!(cache.get("W18x106").await, Some(0.92));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("W18x106").await, Some(0.92));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("W18x106").await, None);
        assert!(cache.is_empty().await);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_replaces_entry_and_restarts_window() {
        let cache = VerificationCache::new();
        cache.set("S2.1", "first".to_string()).await;
        tokio::time::advance(Duration::from_secs(200)).await;
        cache.set("S2.1", "second".to_string()).await;
        tokio::time::advance(Duration::from_secs(200)).await;

        assert_eq!(cache.get("S2.1").await.as_deref(), Some("second"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loader_runs_once_per_window() {
        let cache = VerificationCache::with_ttl(Duration::from_secs(60));
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let load = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(7u32)
        };

        assert_eq!(cache.get_or_try_insert_with("k", load).await, Ok(7));
        assert_eq!(cache.get_or_try_insert_with("k", load).await, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get_or_try_insert_with("k", load).await, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_loads_are_not_cached() {
        let cache: VerificationCache<u32> = VerificationCache::new();
        let failed = cache
            .get_or_try_insert_with("k", || async { Err::<u32, _>("vision timeout") })
            .await;
        assert_eq!(failed, Err("vision timeout"));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn clear_resets_entries_and_stats() {
        let cache = VerificationCache::new();
        cache.set("a", 1u8).await;
        let _ = cache.get("a").await;
        cache.clear().await;

        assert!(cache.is_empty().await);
        assert_eq!(cache.stats().await, CacheStats::default());
        assert_eq!(cache.stats().await.hit_rate(), 0.0);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let cache = VerificationCache::new();
        let handle = cache.clone();
        handle.set("HSS6x6x1/4", true).await;
        assert_eq!(cache.get("HSS6x6x1/4").await, Some(true));
    }
}
