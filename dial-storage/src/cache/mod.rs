//! Settings cache.
//!
//! Cache-aside reads with write-invalidate: writers go through the store
//! first, then evict (or optionally write through). Entries carry a TTL and
//! any miss falls back to the store.
//!
//! # Key grammar
//!
//! See [`key`] for the canonical key layout and the wildcard patterns used
//! for bulk eviction by service, organization, user or triple.

mod backend;
pub mod key;
mod memory;
mod settings_cache;

pub use backend::{CacheBackend, CacheStats};
pub use key::{CacheKeys, KeyPattern};
pub use memory::InMemoryCacheBackend;
pub use settings_cache::{CacheConfig, CacheLookup, CachedAggregate, SettingsCache};
