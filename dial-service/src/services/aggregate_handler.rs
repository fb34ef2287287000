//! Generic command and query handler
//!
//! One `AggregateHandler<A>` per aggregate type. The per-aggregate services
//! wrap it and pass the named mutation as a closure.

use dial_core::{
    Aggregate, DialError, DialResult, DomainEvent, ListFilters, ListOptions, ValidationError,
};
use dial_events::EventBus;
use dial_storage::{CacheLookup, CachedAggregate, SettingStore, SettingsCache};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

use crate::config::ServiceConfig;
use crate::deadline::within;
use crate::metrics::ServiceMetrics;

/// Collaborators shared by every handler of one service instance.
#[derive(Clone)]
pub struct ServiceContext {
    pub cache: SettingsCache,
    pub bus: Arc<dyn EventBus>,
    pub metrics: Arc<ServiceMetrics>,
    pub config: ServiceConfig,
}

impl ServiceContext {
    pub fn new(
        cache: SettingsCache,
        bus: Arc<dyn EventBus>,
        metrics: Arc<ServiceMetrics>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            cache,
            bus,
            metrics,
            config,
        }
    }

    /// Publish one event under the bus deadline.
    pub async fn publish(&self, event: &DomainEvent) -> DialResult<()> {
        let result = within(self.config.bus_timeout, "bus.publish", self.bus.publish(event)).await;
        self.metrics.record_publish(result.is_ok());
        result
    }

    /// Publish every event in order. Failures are logged and counted, never
    /// returned; returns how many failed.
    pub async fn publish_best_effort(&self, events: &[DomainEvent]) -> usize {
        let mut failed = 0;
        for event in events {
            if let Err(e) = self.publish(event).await {
                failed += 1;
                error!(
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    aggregate_id = %event.aggregate_id,
                    version = event.version,
                    error = %e,
                    "Event publish failed after commit"
                );
            }
        }
        failed
    }
}

/// Write path and cache-aside read path for one aggregate type.
pub struct AggregateHandler<A: CachedAggregate> {
    store: Arc<dyn SettingStore<A>>,
    context: ServiceContext,
}

impl<A: CachedAggregate> Clone for AggregateHandler<A> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            context: self.context.clone(),
        }
    }
}

impl<A: CachedAggregate> AggregateHandler<A> {
    pub fn new(store: Arc<dyn SettingStore<A>>, context: ServiceContext) -> Self {
        Self { store, context }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    pub fn store(&self) -> &Arc<dyn SettingStore<A>> {
        &self.store
    }

    /// Run a store call under the store deadline and time it.
    async fn stored<T, F>(&self, operation: &'static str, future: F) -> DialResult<T>
    where
        F: Future<Output = DialResult<T>>,
    {
        let started = Instant::now();
        let result = within(self.context.config.store_timeout, operation, future).await;
        self.context
            .metrics
            .observe_store(operation, started.elapsed().as_secs_f64());
        result
    }

    fn finish<T>(&self, operation: &str, result: DialResult<T>) -> DialResult<T> {
        let aggregate = A::AGGREGATE_TYPE.as_str();
        self.context
            .metrics
            .record_command(aggregate, operation, result.is_ok());
        if let Err(e) = &result {
            debug!(aggregate, operation, error = %e, "Command rejected");
        }
        result
    }

    /// Count a command rejected before it reached the handler, such as a
    /// failed construction.
    pub fn rejected<T>(&self, operation: &str, err: ValidationError) -> DialResult<T> {
        self.finish(operation, Err(err.into()))
    }

    /// Evict the writer's own entry, or refresh it when write-through is on.
    async fn refresh_cache(&self, aggregate: &A) {
        if self.context.config.cache_write_through {
            self.context.cache.set(aggregate).await;
        } else {
            self.context.cache.delete::<A>(&aggregate.scope()).await;
        }
    }

    async fn publish_outbox(&self, aggregate: &mut A) {
        let events = aggregate.take_events();
        self.context.publish_best_effort(&events).await;
    }

    /// Persist a freshly created aggregate and publish its `*Created` event.
    pub async fn create(&self, aggregate: A) -> DialResult<A> {
        let result = self.commit_new(aggregate).await;
        self.finish("create", result)
    }

    async fn commit_new(&self, mut aggregate: A) -> DialResult<A> {
        self.stored("store.save", self.store.save(&aggregate)).await?;
        self.refresh_cache(&aggregate).await;
        self.publish_outbox(&mut aggregate).await;
        Ok(aggregate)
    }

    /// Cache-aside read by scope.
    pub async fn get(&self, scope: &A::Scope) -> DialResult<Option<A>> {
        let lookup = self.context.cache.get::<A>(scope).await;
        self.context.metrics.record_cache_lookup(lookup.label());
        if let CacheLookup::Hit(aggregate) = lookup {
            return Ok(Some(aggregate));
        }

        let found = self
            .stored("store.find_by_scope", self.store.find_by_scope(scope))
            .await?;
        if let Some(aggregate) = &found {
            self.populate(aggregate).await;
        }
        Ok(found)
    }

    /// Cache a store read, then drop the entry again if the store has moved
    /// past the cached version. A writer that commits between our read and
    /// our `set` evicts before the `set` lands; the recheck catches it.
    async fn populate(&self, aggregate: &A) {
        let scope = aggregate.scope();
        self.context.cache.set(aggregate).await;

        let current = self
            .stored("store.find_by_scope", self.store.find_by_scope(&scope))
            .await;
        let unchanged = matches!(
            &current,
            Ok(Some(latest)) if latest.id() == aggregate.id() && latest.version() == aggregate.version()
        );
        if !unchanged {
            debug!(scope = %scope, version = aggregate.version(), "Dropping stale cache populate");
            self.context.cache.delete::<A>(&scope).await;
        }
    }

    /// Store read by id. Absence is `NotFound`.
    pub async fn get_by_id(&self, id: A::Id) -> DialResult<A> {
        self.stored("store.find_by_id", self.store.find_by_id(id))
            .await?
            .ok_or_else(|| DialError::not_found(A::AGGREGATE_TYPE, id.into()))
    }

    pub async fn exists(&self, scope: &A::Scope) -> DialResult<bool> {
        self.stored("store.exists_by_scope", self.store.exists_by_scope(scope))
            .await
    }

    /// Load, apply `apply`, then compare-and-set at the loaded version.
    ///
    /// A rejected mutation never reaches the store. A concurrent writer or
    /// delete surfaces as `NotFound`; the caller reloads and retries.
    pub async fn mutate<F>(&self, id: A::Id, operation: &'static str, apply: F) -> DialResult<A>
    where
        F: FnOnce(&mut A) -> Result<(), ValidationError> + Send,
    {
        let result = self.apply_and_commit(id, apply).await;
        self.finish(operation, result)
    }

    async fn apply_and_commit<F>(&self, id: A::Id, apply: F) -> DialResult<A>
    where
        F: FnOnce(&mut A) -> Result<(), ValidationError> + Send,
    {
        let mut aggregate = self.get_by_id(id).await?;
        let expected_version = aggregate.version();
        apply(&mut aggregate)?;

        self.stored(
            "store.update",
            self.store.update(&aggregate, expected_version),
        )
        .await?;
        self.refresh_cache(&aggregate).await;
        self.publish_outbox(&mut aggregate).await;
        Ok(aggregate)
    }

    /// Apply the terminal transition, remove the row, evict, then publish
    /// the `*Deleted` event.
    pub async fn remove<F>(&self, id: A::Id, apply: F) -> DialResult<()>
    where
        F: FnOnce(&mut A) -> Result<(), ValidationError> + Send,
    {
        let result = self.delete_and_publish(id, apply).await;
        self.finish("delete", result)
    }

    async fn delete_and_publish<F>(&self, id: A::Id, apply: F) -> DialResult<()>
    where
        F: FnOnce(&mut A) -> Result<(), ValidationError> + Send,
    {
        let mut aggregate = self.get_by_id(id).await?;
        apply(&mut aggregate)?;

        self.stored("store.delete", self.store.delete(id)).await?;
        self.context.cache.delete::<A>(&aggregate.scope()).await;
        self.publish_outbox(&mut aggregate).await;
        Ok(())
    }

    /// Bulk delete by id.
    ///
    /// Every id is loaded and transitioned before the store is touched, so a
    /// missing id or a rejected transition deletes nothing. The store call
    /// itself is not transactional: on failure, aggregates already removed
    /// still get their cache eviction and `*Deleted` event, and the store
    /// error is returned.
    pub async fn bulk_remove<F>(&self, ids: &[A::Id], apply: F) -> DialResult<()>
    where
        F: Fn(&mut A) -> Result<(), ValidationError> + Send + Sync,
    {
        let result = self.bulk_delete_and_publish(ids, apply).await;
        self.finish("bulk_delete", result)
    }

    async fn bulk_delete_and_publish<F>(&self, ids: &[A::Id], apply: F) -> DialResult<()>
    where
        F: Fn(&mut A) -> Result<(), ValidationError> + Send + Sync,
    {
        let mut loaded = Vec::with_capacity(ids.len());
        for id in ids {
            let mut aggregate = self.get_by_id(*id).await?;
            apply(&mut aggregate)?;
            loaded.push(aggregate);
        }

        let result = self
            .stored("store.bulk_delete", self.store.bulk_delete(ids))
            .await;

        let mut events = Vec::new();
        for aggregate in &mut loaded {
            self.context.cache.delete::<A>(&aggregate.scope()).await;
            let removed = match &result {
                Ok(()) => true,
                Err(_) => !self
                    .stored("store.exists_by_id", self.store.exists_by_id(aggregate.id()))
                    .await
                    .unwrap_or(true),
            };
            if removed {
                events.extend(aggregate.take_events());
            }
        }
        self.context.publish_best_effort(&events).await;
        result
    }

    pub async fn list(&self, options: &ListOptions) -> DialResult<Vec<A>> {
        self.stored("store.list", self.store.list(options)).await
    }

    pub async fn count(&self, filters: &ListFilters) -> DialResult<u64> {
        self.stored("store.count", self.store.count(filters)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, ServiceError};
    use async_trait::async_trait;
    use dial_core::{Configuration, ConfigurationId, ErrorKind, EventType, ScopeKey};
    use dial_storage::{CacheBackend, InMemoryCacheBackend, InMemoryStore};
    use dial_test_utils::{fixtures, FailingCacheBackend, FailingEventBus, RecordingEventBus};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        handler: AggregateHandler<Configuration>,
        store: InMemoryStore<Configuration>,
        bus: Arc<RecordingEventBus>,
    }

    fn context_with(
        bus: Arc<dyn EventBus>,
        backend: Arc<dyn CacheBackend>,
        config: ServiceConfig,
    ) -> ServiceContext {
        ServiceContext::new(
            SettingsCache::new(backend, config.cache.clone()),
            bus,
            Arc::new(ServiceMetrics::new().expect("metrics")),
            config,
        )
    }

    fn harness(config: ServiceConfig) -> Harness {
        let store = InMemoryStore::new();
        let bus = Arc::new(RecordingEventBus::new());
        let context = context_with(bus.clone(), Arc::new(InMemoryCacheBackend::new()), config);
        Harness {
            handler: AggregateHandler::new(Arc::new(store.clone()), context),
            store,
            bus,
        }
    }

    fn counter(metrics: &ServiceMetrics, labels: &[&str]) -> f64 {
        metrics.commands_total.with_label_values(labels).get()
    }

    #[tokio::test]
    async fn test_create_persists_and_publishes() {
        let h = harness(ServiceConfig::default());
        let created = h
            .handler
            .create(fixtures::db_host().expect("fixture"))
            .await
            .expect("create");

        assert!(created.pending_events().is_empty());
        assert!(h.store.exists_by_id(created.id()).await.expect("exists"));
        assert_eq!(h.bus.published_types(), vec![EventType::ConfigurationCreated]);
        let metrics = &h.handler.context().metrics;
        assert_eq!(counter(metrics, &["Configuration", "create", "success"]), 1.0);
    }

    #[tokio::test]
    async fn test_duplicate_scope_is_conflict() {
        let h = harness(ServiceConfig::default());
        h.handler
            .create(fixtures::db_host().expect("fixture"))
            .await
            .expect("create");
        let err = h
            .handler
            .create(fixtures::db_host().expect("fixture"))
            .await
            .expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(h.bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_read_is_cache_aside() {
        let h = harness(ServiceConfig::default());
        let created = h
            .handler
            .create(fixtures::db_host().expect("fixture"))
            .await
            .expect("create");
        let scope = created.scope();

        let first = h.handler.get(&scope).await.expect("get").expect("found");
        let second = h.handler.get(&scope).await.expect("get").expect("found");
        assert_eq!(first, second);

        let metrics = &h.handler.context().metrics;
        assert_eq!(metrics.cache_requests_total.with_label_values(&["miss"]).get(), 1.0);
        assert_eq!(metrics.cache_requests_total.with_label_values(&["hit"]).get(), 1.0);

        let absent = ScopeKey::new("db.port", scope.environment()).expect("scope");
        assert!(h.handler.get(&absent).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_evicts() {
        let h = harness(ServiceConfig::default());
        let created = h
            .handler
            .create(fixtures::db_host().expect("fixture"))
            .await
            .expect("create");
        h.handler.get(&created.scope()).await.expect("warm cache");

        let actor = fixtures::actor();
        let updated = h
            .handler
            .mutate(created.id(), "update_value", |c| {
                c.update_value(json!("10.0.0.2"), actor)
            })
            .await
            .expect("update");
        assert_eq!(updated.version(), 2);

        assert_eq!(
            h.handler.context().cache.get::<Configuration>(&created.scope()).await,
            CacheLookup::Miss
        );
        let read = h.handler.get(&created.scope()).await.expect("get").expect("found");
        assert_eq!(read.value(), &json!("10.0.0.2"));
        assert_eq!(
            h.bus.published_types(),
            vec![EventType::ConfigurationCreated, EventType::ConfigurationUpdated]
        );
    }

    #[tokio::test]
    async fn test_write_through_refreshes_own_entry() {
        let h = harness(ServiceConfig::default().with_write_through(true));
        let created = h
            .handler
            .create(fixtures::db_host().expect("fixture"))
            .await
            .expect("create");
        let actor = fixtures::actor();
        h.handler
            .mutate(created.id(), "update_value", |c| {
                c.update_value(json!("10.0.0.3"), actor)
            })
            .await
            .expect("update");

        match h.handler.context().cache.get::<Configuration>(&created.scope()).await {
            CacheLookup::Hit(cached) => {
                assert_eq!(cached.version(), 2);
                assert_eq!(cached.value(), &json!("10.0.0.3"));
            }
            other => panic!("expected a hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_mutation_touches_nothing() {
        let h = harness(ServiceConfig::default());
        let created = h
            .handler
            .create(fixtures::db_host().expect("fixture"))
            .await
            .expect("create");

        let actor = fixtures::actor();
        let err = h
            .handler
            .mutate(created.id(), "update_value", |c| c.update_value(json!(42), actor))
            .await
            .expect_err("type change");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let stored = h.handler.get_by_id(created.id()).await.expect("stored");
        assert_eq!(stored.version(), 1);
        assert_eq!(h.bus.published().len(), 1);
        let metrics = &h.handler.context().metrics;
        assert_eq!(counter(metrics, &["Configuration", "update_value", "error"]), 1.0);
    }

    #[tokio::test]
    async fn test_update_after_delete_is_not_found() {
        let h = harness(ServiceConfig::default());
        let created = h
            .handler
            .create(fixtures::db_host().expect("fixture"))
            .await
            .expect("create");

        let stale = h.handler.get_by_id(created.id()).await.expect("load");
        let actor = fixtures::actor();
        h.handler
            .remove(created.id(), |c| c.delete(actor))
            .await
            .expect("delete");

        let err = h
            .handler
            .mutate(created.id(), "update_value", |c| {
                c.update_value(json!("10.0.0.9"), actor)
            })
            .await
            .expect_err("gone");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = h.store.update(&stale, stale.version()).await.expect_err("stale");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(h.handler.get(&created.scope()).await.expect("get").is_none());
        assert_eq!(
            h.bus.published_types().last(),
            Some(&EventType::ConfigurationDeleted)
        );
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_command() {
        let store = InMemoryStore::<Configuration>::new();
        let bus = Arc::new(FailingEventBus::new());
        let context = context_with(
            bus.clone(),
            Arc::new(InMemoryCacheBackend::new()),
            ServiceConfig::default(),
        );
        let handler: AggregateHandler<Configuration> =
            AggregateHandler::new(Arc::new(store.clone()), context);

        let created = handler
            .create(fixtures::db_host().expect("fixture"))
            .await
            .expect("create succeeds");
        assert!(store.exists_by_id(created.id()).await.expect("exists"));
        assert_eq!(bus.attempts(), 1);
        assert_eq!(
            handler
                .context()
                .metrics
                .events_published_total
                .with_label_values(&["failure"])
                .get(),
            1.0
        );
    }

    #[tokio::test]
    async fn test_degraded_cache_falls_back_to_store() {
        let store = InMemoryStore::<Configuration>::new();
        let context = context_with(
            Arc::new(RecordingEventBus::new()),
            Arc::new(FailingCacheBackend::new()),
            ServiceConfig::default(),
        );
        let handler: AggregateHandler<Configuration> =
            AggregateHandler::new(Arc::new(store), context);

        let created = handler
            .create(fixtures::db_host().expect("fixture"))
            .await
            .expect("create despite cache");
        let read = handler.get(&created.scope()).await.expect("get").expect("found");
        assert_eq!(read.id(), created.id());
        assert_eq!(
            handler
                .context()
                .metrics
                .cache_requests_total
                .with_label_values(&["error"])
                .get(),
            1.0
        );
    }

    struct StalledStore;

    #[async_trait]
    impl SettingStore<Configuration> for StalledStore {
        async fn save(&self, _aggregate: &Configuration) -> DialResult<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }

        async fn update(&self, _aggregate: &Configuration, _expected_version: i64) -> DialResult<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }

        async fn delete(&self, _id: ConfigurationId) -> DialResult<()> {
            Ok(())
        }

        async fn find_by_id(&self, _id: ConfigurationId) -> DialResult<Option<Configuration>> {
            Ok(None)
        }

        async fn find_by_scope(&self, _scope: &ScopeKey) -> DialResult<Option<Configuration>> {
            Ok(None)
        }

        async fn list(&self, _options: &ListOptions) -> DialResult<Vec<Configuration>> {
            Ok(Vec::new())
        }

        async fn count(&self, _filters: &ListFilters) -> DialResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_store_deadline_surfaces_as_unavailable() {
        let bus = Arc::new(RecordingEventBus::new());
        let context = context_with(
            bus.clone(),
            Arc::new(InMemoryCacheBackend::new()),
            ServiceConfig::default().with_store_timeout(Duration::from_millis(20)),
        );
        let handler: AggregateHandler<Configuration> =
            AggregateHandler::new(Arc::new(StalledStore), context);

        let err = handler
            .create(fixtures::db_host().expect("fixture"))
            .await
            .expect_err("timeout");
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(bus.published().is_empty());

        let client = ServiceError::from(err);
        assert_eq!(client.code, ErrorCode::ServiceUnavailable);
    }

    /// Holds the first `find_by_scope` result until released.
    #[derive(Clone)]
    struct GatedStore {
        inner: InMemoryStore<Configuration>,
        armed: Arc<std::sync::atomic::AtomicBool>,
        loaded: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    impl GatedStore {
        fn new(inner: InMemoryStore<Configuration>) -> Self {
            Self {
                inner,
                armed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
                loaded: Arc::new(tokio::sync::Notify::new()),
                release: Arc::new(tokio::sync::Notify::new()),
            }
        }

        fn arm(&self) {
            self.armed.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SettingStore<Configuration> for GatedStore {
        async fn save(&self, aggregate: &Configuration) -> DialResult<()> {
            self.inner.save(aggregate).await
        }

        async fn update(&self, aggregate: &Configuration, expected_version: i64) -> DialResult<()> {
            self.inner.update(aggregate, expected_version).await
        }

        async fn delete(&self, id: ConfigurationId) -> DialResult<()> {
            self.inner.delete(id).await
        }

        async fn find_by_id(&self, id: ConfigurationId) -> DialResult<Option<Configuration>> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_scope(&self, scope: &ScopeKey) -> DialResult<Option<Configuration>> {
            let found = self.inner.find_by_scope(scope).await;
            if self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
                self.loaded.notify_one();
                self.release.notified().await;
            }
            found
        }

        async fn list(&self, options: &ListOptions) -> DialResult<Vec<Configuration>> {
            self.inner.list(options).await
        }

        async fn count(&self, filters: &ListFilters) -> DialResult<u64> {
            self.inner.count(filters).await
        }
    }

    #[tokio::test]
    async fn test_slow_reader_never_caches_a_superseded_version() {
        let store = GatedStore::new(InMemoryStore::new());
        let context = context_with(
            Arc::new(RecordingEventBus::new()),
            Arc::new(InMemoryCacheBackend::new()),
            ServiceConfig::default(),
        );
        let handler: AggregateHandler<Configuration> =
            AggregateHandler::new(Arc::new(store.clone()), context);
        let created = handler
            .create(fixtures::db_host().expect("fixture"))
            .await
            .expect("create");
        let scope = created.scope();

        store.arm();
        let reader = {
            let handler = handler.clone();
            let scope = scope.clone();
            tokio::spawn(async move { handler.get(&scope).await })
        };
        store.loaded.notified().await;

        let actor = fixtures::actor();
        handler
            .mutate(created.id(), "update_value", |c| {
                c.update_value(json!("10.0.0.2"), actor)
            })
            .await
            .expect("update");
        store.release.notify_one();

        let stale = reader.await.expect("join").expect("get").expect("found");
        assert_eq!(stale.version(), 1);
        assert_eq!(
            handler.context().cache.get::<Configuration>(&scope).await,
            CacheLookup::Miss
        );
        let fresh = handler.get(&scope).await.expect("get").expect("found");
        assert_eq!(fresh.version(), 2);
    }

    #[tokio::test]
    async fn test_bulk_remove() {
        let h = harness(ServiceConfig::default());
        let mut ids = Vec::new();
        for key in ["db.host", "db.port", "db.user"] {
            let config = fixtures::string_configuration(
                fixtures::scope(key, dial_core::Environment::Staging).expect("scope"),
                "x",
            )
            .expect("fixture");
            ids.push(h.handler.create(config).await.expect("create").id());
        }
        h.bus.clear();

        let actor = fixtures::actor();
        let missing = ConfigurationId::now_v7();
        let err = h
            .handler
            .bulk_remove(&[ids[0], missing], |c| c.delete(actor))
            .await
            .expect_err("missing id");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(h.store.count(&ListFilters::new()).await.expect("count"), 3);
        assert!(h.bus.published().is_empty());

        h.handler
            .bulk_remove(&ids, |c| c.delete(actor))
            .await
            .expect("bulk delete");
        assert_eq!(h.store.count(&ListFilters::new()).await.expect("count"), 0);
        assert_eq!(
            h.bus.published_types(),
            vec![EventType::ConfigurationDeleted; 3]
        );
    }
}
