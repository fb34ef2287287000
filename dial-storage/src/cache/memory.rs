//! In-process TTL cache backend.

use async_trait::async_trait;
use dashmap::DashMap;
use dial_core::DialResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::backend::{CacheBackend, CacheStats};
use super::key::KeyPattern;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Writes between two full expiry sweeps.
const PURGE_EVERY_WRITES: u64 = 256;

/// `CacheBackend` over a concurrent map. Expired entries are dropped on
/// access, during pattern scans, on `stats` and every
/// [`PURGE_EVERY_WRITES`] writes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheBackend {
    entries: Arc<DashMap<String, Entry>>,
    writes: Arc<AtomicU64>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> u64 {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.evictions.fetch_add(removed, Ordering::Relaxed);
        removed
    }

    /// Drop expired entries that match `pattern`, then return the live keys.
    fn sweep(&self, pattern: &KeyPattern) -> Vec<String> {
        let now = Instant::now();
        let mut live = Vec::new();
        let mut expired = Vec::new();
        for entry in self.entries.iter() {
            if !pattern.matches(entry.key()) {
                continue;
            }
            if entry.value().is_expired(now) {
                expired.push(entry.key().clone());
            } else {
                live.push(entry.key().clone());
            }
        }
        for key in expired {
            if self.entries.remove_if(&key, |_, e| e.is_expired(now)).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        live
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> DialResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let found = self.entries.get(key).map(|e| e.value().clone());
        match found {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.value))
            }
            Some(_) => {
                if self.entries.remove_if(key, |_, e| e.is_expired(now)).is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> DialResult<()> {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % PURGE_EVERY_WRITES == 0 {
            self.purge_expired();
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> DialResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn keys(&self, pattern: &KeyPattern) -> DialResult<Vec<String>> {
        Ok(self.sweep(pattern))
    }

    async fn delete_pattern(&self, pattern: &KeyPattern) -> DialResult<u64> {
        let mut removed = 0;
        for key in self.sweep(pattern) {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn stats(&self) -> DialResult<CacheStats> {
        self.purge_expired();
        let memory_bytes = self
            .entries
            .iter()
            .map(|e| (e.key().len() + e.value().value.len()) as u64)
            .sum();
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: 0,
            entry_count: self.entries.len() as u64,
            memory_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = InMemoryCacheBackend::new();
        cache.set("k", b"v".to_vec(), Duration::ZERO).await.expect("set");
        assert_eq!(cache.get("k").await.expect("get"), Some(b"v".to_vec()));
        assert!(cache.delete("k").await.expect("delete"));
        assert!(!cache.delete("k").await.expect("delete"));
        assert_eq!(cache.get("k").await.expect("get"), None);

        let stats = cache.stats().await.expect("stats");
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = InMemoryCacheBackend::new();
        cache
            .set("short", b"v".to_vec(), Duration::from_millis(20))
            .await
            .expect("set");
        cache.set("long", b"v".to_vec(), Duration::from_secs(60)).await.expect("set");

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(cache.get("short").await.expect("get"), None);
        assert!(cache.get("long").await.expect("get").is_some());
        assert_eq!(cache.stats().await.expect("stats").evictions, 1);
    }

    #[tokio::test]
    async fn test_unread_expired_entries_are_purged() {
        let cache = InMemoryCacheBackend::new();
        for key in ["a", "b", "c"] {
            cache
                .set(key, b"v".to_vec(), Duration::from_millis(10))
                .await
                .expect("set");
        }
        cache.set("kept", b"v".to_vec(), Duration::ZERO).await.expect("set");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.len(), 4);

        let stats = cache.stats().await.expect("stats");
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.evictions, 3);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_writes_trigger_periodic_purge() {
        let cache = InMemoryCacheBackend::new();
        cache
            .set("stale", b"v".to_vec(), Duration::from_millis(5))
            .await
            .expect("set");
        tokio::time::sleep(Duration::from_millis(20)).await;

        for i in 1..PURGE_EVERY_WRITES {
            cache
                .set(&format!("k{i}"), vec![0], Duration::ZERO)
                .await
                .expect("set");
        }
        assert_eq!(cache.len() as u64, PURGE_EVERY_WRITES - 1);
    }

    #[tokio::test]
    async fn test_pattern_scan_and_delete() {
        let cache = InMemoryCacheBackend::new();
        for key in ["p:config:a:svc:billing", "p:config:b:svc:billing", "p:config:c:svc:auth"] {
            cache.set(key, vec![1], Duration::ZERO).await.expect("set");
        }

        let pattern = KeyPattern::new("p:*:svc:billing");
        let mut keys = cache.keys(&pattern).await.expect("keys");
        keys.sort();
        assert_eq!(keys, vec!["p:config:a:svc:billing", "p:config:b:svc:billing"]);

        assert_eq!(cache.delete_pattern(&pattern).await.expect("delete"), 2);
        assert_eq!(cache.delete_pattern(&pattern).await.expect("delete"), 0);
        assert_eq!(cache.len(), 1);
    }
}
