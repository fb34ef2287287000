//! DIAL Storage - Store Contract and Settings Cache
//!
//! The store is the system of record for setting aggregates. The cache
//! module sits in front of it and never fails a request on its own.

pub mod cache;
pub mod memory;
pub mod store;

pub use cache::{
    CacheBackend, CacheConfig, CacheKeys, CacheLookup, CacheStats, CachedAggregate,
    InMemoryCacheBackend, KeyPattern, SettingsCache,
};
pub use memory::InMemoryStore;
pub use store::SettingStore;
