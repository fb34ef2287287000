//! Cache backend trait.
//!
//! Backends store opaque bytes under string keys. Typing, key construction
//! and failure downgrading live in [`SettingsCache`](super::SettingsCache).

use async_trait::async_trait;
use dial_core::DialResult;
use std::time::Duration;

use super::key::KeyPattern;

/// Pluggable key/value cache with TTL and pattern scans.
///
/// Implementations must be safe for concurrent use. Any method may fail with
/// an infrastructure error; callers above the facade never see those.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> DialResult<Option<Vec<u8>>>;

    /// Store `value` under `key`. A zero `ttl` means no expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> DialResult<()>;

    /// Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> DialResult<bool>;

    async fn keys(&self, pattern: &KeyPattern) -> DialResult<Vec<String>>;

    /// Returns the number of entries removed.
    async fn delete_pattern(&self, pattern: &KeyPattern) -> DialResult<u64>;

    async fn stats(&self) -> DialResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Lookups that failed or timed out and were served as misses.
    pub errors: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Entries dropped because their TTL elapsed.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
