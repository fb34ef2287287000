//! Typed cache facade with degrade-on-failure semantics.
//!
//! A cache failure never fails a request: lookup errors and timeouts are
//! served as misses, write and eviction errors are logged and swallowed.

use dial_core::{
    Aggregate, Configuration, Environment, FeatureFlag, OrganizationId, OrganizationSetting,
    ServiceName, UserId, UserPreference,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::backend::{CacheBackend, CacheStats};
use super::key::{
    CacheKeys, KeyPattern, CONFIGURATION_ENTITY, FEATURE_FLAG_ENTITY,
    ORGANIZATION_SETTING_ENTITY, USER_PREFERENCE_ENTITY,
};

/// Aggregates the settings cache knows how to key.
pub trait CachedAggregate: Aggregate {
    /// Entity segment of the cache key.
    const ENTITY: &'static str;

    fn cache_key(keys: &CacheKeys, scope: &Self::Scope) -> String;
}

impl CachedAggregate for Configuration {
    const ENTITY: &'static str = CONFIGURATION_ENTITY;

    fn cache_key(keys: &CacheKeys, scope: &Self::Scope) -> String {
        keys.scope(Self::ENTITY, scope)
    }
}

impl CachedAggregate for FeatureFlag {
    const ENTITY: &'static str = FEATURE_FLAG_ENTITY;

    fn cache_key(keys: &CacheKeys, scope: &Self::Scope) -> String {
        keys.scope(Self::ENTITY, scope)
    }
}

impl CachedAggregate for UserPreference {
    const ENTITY: &'static str = USER_PREFERENCE_ENTITY;

    fn cache_key(keys: &CacheKeys, scope: &Self::Scope) -> String {
        keys.preference(scope)
    }
}

impl CachedAggregate for OrganizationSetting {
    const ENTITY: &'static str = ORGANIZATION_SETTING_ENTITY;

    fn cache_key(keys: &CacheKeys, scope: &Self::Scope) -> String {
        keys.organization_setting(scope)
    }
}

/// Configuration for the settings cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix of every key.
    pub prefix: String,
    /// TTL for cached entries.
    pub entry_ttl: Duration,
    /// Deadline for a single backend call.
    pub op_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "settings".to_string(),
            entry_ttl: Duration::from_secs(3600),
            op_timeout: Duration::from_millis(250),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }
}

/// Outcome of a cache lookup. `Degraded` means the backend failed or timed
/// out and the caller should treat it as a miss.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<A> {
    Hit(A),
    Miss,
    Degraded,
}

impl<A> CacheLookup<A> {
    pub fn into_option(self) -> Option<A> {
        match self {
            CacheLookup::Hit(value) => Some(value),
            CacheLookup::Miss | CacheLookup::Degraded => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CacheLookup::Hit(_) => "hit",
            CacheLookup::Miss => "miss",
            CacheLookup::Degraded => "error",
        }
    }
}

/// Cache-aside facade over a [`CacheBackend`].
#[derive(Clone)]
pub struct SettingsCache {
    backend: Arc<dyn CacheBackend>,
    keys: CacheKeys,
    config: CacheConfig,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
}

impl SettingsCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            keys: CacheKeys::new(config.prefix.clone()),
            config,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            errors: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Run one backend call under the op deadline. `None` means it failed.
    async fn guarded<T, F>(&self, operation: &'static str, key: &str, call: F) -> Option<T>
    where
        F: Future<Output = dial_core::DialResult<T>>,
    {
        match tokio::time::timeout(self.config.op_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(operation, key, error = %e, "Cache operation failed");
                None
            }
            Err(_) => {
                warn!(
                    operation,
                    key,
                    timeout_ms = self.config.op_timeout.as_millis() as u64,
                    "Cache operation timed out"
                );
                None
            }
        }
    }

    pub async fn get<A: CachedAggregate>(&self, scope: &A::Scope) -> CacheLookup<A> {
        let key = A::cache_key(&self.keys, scope);
        self.lookup(&key, Some(scope)).await
    }

    /// Decode the entry under `key`. With `expected` set, an entry holding a
    /// different scope is evicted and reported as a miss.
    async fn lookup<A: CachedAggregate>(
        &self,
        key: &str,
        expected: Option<&A::Scope>,
    ) -> CacheLookup<A> {
        let Some(found) = self.guarded("get", key, self.backend.get(key)).await else {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Degraded;
        };
        let Some(bytes) = found else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Miss;
        };

        match serde_json::from_slice::<A>(&bytes) {
            Ok(value) if expected.is_some_and(|scope| *scope != value.scope()) => {
                debug!(key, scope = %value.scope(), "Cache entry holds another scope");
                self.misses.fetch_add(1, Ordering::Relaxed);
                let _ = self.guarded("delete", key, self.backend.delete(key)).await;
                CacheLookup::Miss
            }
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Hit(value)
            }
            Err(e) => {
                // an undecodable entry is dropped so the next read repopulates it
                warn!(key, error = %e, "Discarding undecodable cache entry");
                self.errors.fetch_add(1, Ordering::Relaxed);
                let _ = self.guarded("delete", key, self.backend.delete(key)).await;
                CacheLookup::Degraded
            }
        }
    }

    pub async fn set<A: CachedAggregate>(&self, aggregate: &A) {
        self.set_with_ttl(aggregate, self.config.entry_ttl).await;
    }

    pub async fn set_with_ttl<A: CachedAggregate>(&self, aggregate: &A, ttl: Duration) {
        let key = A::cache_key(&self.keys, &aggregate.scope());
        let bytes = match serde_json::to_vec(aggregate) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        if self
            .guarded("set", &key, self.backend.set(&key, bytes, ttl))
            .await
            .is_some()
        {
            debug!(key = %key, "Cached aggregate");
        }
    }

    pub async fn delete<A: CachedAggregate>(&self, scope: &A::Scope) {
        let key = A::cache_key(&self.keys, scope);
        self.delete_key(&key).await;
    }

    pub async fn delete_key(&self, key: &str) {
        let _ = self.guarded("delete", key, self.backend.delete(key)).await;
    }

    /// Remove every key matching `pattern`. Returns the number removed, zero on failure.
    pub async fn clear_by_pattern(&self, pattern: &KeyPattern) -> u64 {
        self.guarded(
            "delete_pattern",
            pattern.as_str(),
            self.backend.delete_pattern(pattern),
        )
        .await
        .unwrap_or(0)
    }

    pub async fn clear_all(&self) -> u64 {
        self.clear_by_pattern(&self.keys.all()).await
    }

    async fn get_matching<A: CachedAggregate>(&self, pattern: &KeyPattern) -> Vec<A> {
        let Some(keys) = self
            .guarded("keys", pattern.as_str(), self.backend.keys(pattern))
            .await
        else {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        };

        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let CacheLookup::Hit(value) = self.lookup::<A>(&key, None).await {
                found.push(value);
            }
        }
        found
    }

    /// Cached aggregates of one type within a single `(environment, organization, service)` triple.
    pub async fn get_by_service<A: CachedAggregate>(
        &self,
        environment: Environment,
        organization_id: Option<OrganizationId>,
        service: &ServiceName,
    ) -> Vec<A> {
        let pattern =
            self.keys
                .scope_dimension(A::ENTITY, environment, organization_id, Some(service));
        self.get_matching(&pattern).await
    }

    /// Evict every key of one entity within one triple.
    pub async fn delete_scope_dimension(
        &self,
        entity: &str,
        environment: Environment,
        organization_id: Option<OrganizationId>,
        service: Option<&ServiceName>,
    ) -> u64 {
        let pattern = self
            .keys
            .scope_dimension(entity, environment, organization_id, service);
        self.clear_by_pattern(&pattern).await
    }

    pub async fn delete_by_service(&self, service: &ServiceName) -> u64 {
        self.clear_by_pattern(&self.keys.service(service)).await
    }

    pub async fn delete_by_organization(&self, organization_id: OrganizationId) -> u64 {
        let mut removed = 0;
        for pattern in self.keys.organization(organization_id) {
            removed += self.clear_by_pattern(&pattern).await;
        }
        removed
    }

    pub async fn get_by_user(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> Vec<UserPreference> {
        self.get_matching(&self.keys.user(user_id, organization_id))
            .await
    }

    pub async fn delete_by_user(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> u64 {
        self.clear_by_pattern(&self.keys.user(user_id, organization_id))
            .await
    }

    pub async fn get_by_organization_settings(
        &self,
        organization_id: OrganizationId,
    ) -> Vec<OrganizationSetting> {
        self.get_matching(&self.keys.organization_settings(organization_id))
            .await
    }

    pub async fn delete_organization_settings(&self, organization_id: OrganizationId) -> u64 {
        self.clear_by_pattern(&self.keys.organization_settings(organization_id))
            .await
    }

    /// Facade counters plus whatever the backend reports about its size.
    pub async fn stats(&self) -> CacheStats {
        let backend = self
            .guarded("stats", "-", self.backend.stats())
            .await
            .unwrap_or_default();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            ..backend
        }
    }
}
