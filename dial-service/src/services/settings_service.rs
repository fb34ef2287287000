use dial_core::{
    Configuration, DialResult, DomainEvent, EventType, FeatureFlag, InvalidationTarget,
    OrganizationId, OrganizationSetting, ServiceName, UserPreference,
};
use dial_events::{BrokerEventBus, EventBus, InMemoryBroker};
use dial_storage::{CacheBackend, InMemoryStore, SettingStore, SettingsCache};
use std::sync::Arc;
use tracing::info;

use super::aggregate_handler::ServiceContext;
use super::configuration_service::ConfigurationService;
use super::feature_flag_service::FeatureFlagService;
use super::organization_setting_service::OrganizationSettingService;
use super::user_preference_service::UserPreferenceService;
use crate::config::ServiceConfig;
use crate::deadline::within;
use crate::invalidation::CacheInvalidationHandler;
use crate::metrics::ServiceMetrics;

/// One store per aggregate type.
#[derive(Clone)]
pub struct SettingStores {
    pub configurations: Arc<dyn SettingStore<Configuration>>,
    pub feature_flags: Arc<dyn SettingStore<FeatureFlag>>,
    pub user_preferences: Arc<dyn SettingStore<UserPreference>>,
    pub organization_settings: Arc<dyn SettingStore<OrganizationSetting>>,
}

impl SettingStores {
    /// Fresh in-memory stores. Clones share the same tables.
    pub fn in_memory() -> Self {
        Self {
            configurations: Arc::new(InMemoryStore::<Configuration>::new()),
            feature_flags: Arc::new(InMemoryStore::<FeatureFlag>::new()),
            user_preferences: Arc::new(InMemoryStore::<UserPreference>::new()),
            organization_settings: Arc::new(InMemoryStore::<OrganizationSetting>::new()),
        }
    }
}

/// One settings service instance: the four aggregate services over a
/// shared context, plus the cross-instance invalidation subscriber.
pub struct SettingsService {
    configurations: ConfigurationService,
    feature_flags: FeatureFlagService,
    user_preferences: UserPreferenceService,
    organization_settings: OrganizationSettingService,
    invalidation: Arc<CacheInvalidationHandler>,
    context: ServiceContext,
}

impl SettingsService {
    pub fn new(
        stores: SettingStores,
        bus: Arc<dyn EventBus>,
        cache_backend: Arc<dyn CacheBackend>,
        config: ServiceConfig,
    ) -> DialResult<Self> {
        let cache = SettingsCache::new(cache_backend, config.cache.clone());
        let metrics = Arc::new(ServiceMetrics::new()?);
        let context = ServiceContext::new(cache.clone(), bus, metrics, config);

        Ok(Self {
            configurations: ConfigurationService::new(stores.configurations, context.clone()),
            feature_flags: FeatureFlagService::new(stores.feature_flags, context.clone()),
            user_preferences: UserPreferenceService::new(stores.user_preferences, context.clone()),
            organization_settings: OrganizationSettingService::new(
                stores.organization_settings,
                context.clone(),
            ),
            invalidation: Arc::new(CacheInvalidationHandler::new(cache)),
            context,
        })
    }

    /// Build an instance whose bus is a fresh connection to `broker`, using
    /// the consumer settings from `config`.
    pub fn connect(
        stores: SettingStores,
        broker: InMemoryBroker,
        cache_backend: Arc<dyn CacheBackend>,
        config: ServiceConfig,
    ) -> DialResult<Self> {
        let bus = BrokerEventBus::connect(broker, config.consumer.clone())?;
        Self::new(stores, Arc::new(bus), cache_backend, config)
    }

    pub fn configurations(&self) -> &ConfigurationService {
        &self.configurations
    }

    pub fn feature_flags(&self) -> &FeatureFlagService {
        &self.feature_flags
    }

    pub fn user_preferences(&self) -> &UserPreferenceService {
        &self.user_preferences
    }

    pub fn organization_settings(&self) -> &OrganizationSettingService {
        &self.organization_settings
    }

    pub fn cache(&self) -> &SettingsCache {
        &self.context.cache
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.context.metrics
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.context.config
    }

    /// Subscribe the invalidation handler to every cache-invalidating event type.
    pub async fn start(&self) -> DialResult<Vec<EventType>> {
        let subscribed = self
            .invalidation
            .subscribe_all(self.context.bus.as_ref())
            .await?;
        info!(
            event_types = subscribed.len(),
            consumer_prefix = %self.context.config.consumer.consumer_prefix,
            "Cache invalidation subscribed"
        );
        Ok(subscribed)
    }

    /// Evict every local entry naming the organization, then tell the other
    /// instances to do the same. Returns the local eviction count.
    pub async fn invalidate_organization(&self, organization_id: OrganizationId) -> DialResult<u64> {
        let removed = self.context.cache.delete_by_organization(organization_id).await;
        self.broadcast(&InvalidationTarget::Organization { organization_id })
            .await?;
        Ok(removed)
    }

    /// Evict every local entry scoped to the service, then tell the other
    /// instances to do the same. Returns the local eviction count.
    pub async fn invalidate_service(&self, service: &ServiceName) -> DialResult<u64> {
        let removed = self.context.cache.delete_by_service(service).await;
        self.broadcast(&InvalidationTarget::Service {
            service: service.clone(),
        })
        .await?;
        Ok(removed)
    }

    async fn broadcast(&self, target: &InvalidationTarget) -> DialResult<()> {
        let event = DomainEvent::cache_invalidated(target);
        let result = self.context.publish(&event).await;
        self.context
            .metrics
            .record_command("Cache", "invalidate", result.is_ok());
        result
    }

    pub async fn health_check(&self) -> DialResult<()> {
        within(
            self.context.config.bus_timeout,
            "bus.health_check",
            self.context.bus.health_check(),
        )
        .await
    }

    /// Stop every consumer of this instance.
    pub async fn shutdown(&self) -> DialResult<()> {
        self.context.bus.close().await?;
        info!("Settings service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dial_core::{Aggregate, Environment, ErrorKind, ScopeKey};
    use dial_events::ConsumerConfig;
    use dial_storage::{CacheLookup, InMemoryCacheBackend};
    use dial_test_utils::{fixtures, FailingEventBus};
    use serde_json::json;
    use std::time::Duration;

    fn instance(stores: &SettingStores, broker: &InMemoryBroker, prefix: &str) -> SettingsService {
        let config = ServiceConfig::default().with_consumer(
            ConsumerConfig::default()
                .with_max_wait(Duration::from_millis(20))
                .with_consumer_prefix(prefix),
        );
        SettingsService::connect(
            stores.clone(),
            broker.clone(),
            Arc::new(InMemoryCacheBackend::new()),
            config,
        )
        .expect("connect")
    }

    async fn evicted(cache: &SettingsCache, scope: &ScopeKey) -> bool {
        for _ in 0..400 {
            if cache.get::<Configuration>(scope).await == CacheLookup::Miss {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_update_converges_across_instances() {
        let stores = SettingStores::in_memory();
        let broker = InMemoryBroker::new();
        let writer = instance(&stores, &broker, "instance-a");
        let reader = instance(&stores, &broker, "instance-b");
        writer.start().await.expect("start writer");
        reader.start().await.expect("start reader");

        let actor = fixtures::actor();
        let created = writer
            .configurations()
            .create(fixtures::db_host_params().expect("fixture"))
            .await
            .expect("create");
        let scope = created.scope();

        let cached = reader
            .configurations()
            .get(&scope)
            .await
            .expect("get")
            .expect("found");
        assert_eq!(cached.version(), 1);

        writer
            .configurations()
            .update_value(created.id(), json!("10.0.0.2"), actor)
            .await
            .expect("update");

        assert!(evicted(reader.cache(), &scope).await);
        let fresh = reader
            .configurations()
            .get(&scope)
            .await
            .expect("get")
            .expect("found");
        assert_eq!(fresh.version(), 2);
        assert_eq!(fresh.value(), &json!("10.0.0.2"));

        writer.shutdown().await.expect("shutdown");
        reader.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn test_default_config_instances_each_see_invalidations() {
        let stores = SettingStores::in_memory();
        let broker = InMemoryBroker::new();
        let default_instance = || {
            let mut config = ServiceConfig::default();
            config.consumer.max_wait = Duration::from_millis(20);
            SettingsService::connect(
                stores.clone(),
                broker.clone(),
                Arc::new(InMemoryCacheBackend::new()),
                config,
            )
            .expect("connect")
        };
        let writer = default_instance();
        let readers = [default_instance(), default_instance()];
        writer.start().await.expect("start writer");
        for reader in &readers {
            reader.start().await.expect("start reader");
        }

        let created = writer
            .configurations()
            .create(fixtures::db_host_params().expect("fixture"))
            .await
            .expect("create");
        let scope = created.scope();
        for reader in &readers {
            reader.configurations().get(&scope).await.expect("get");
        }

        writer
            .configurations()
            .update_value(created.id(), json!("10.0.0.2"), fixtures::actor())
            .await
            .expect("update");
        for reader in &readers {
            assert!(evicted(reader.cache(), &scope).await);
        }

        writer.shutdown().await.expect("shutdown");
        for reader in &readers {
            reader.shutdown().await.expect("shutdown");
        }
    }

    #[tokio::test]
    async fn test_organization_invalidation_reaches_other_instances() {
        let stores = SettingStores::in_memory();
        let broker = InMemoryBroker::new();
        let admin = instance(&stores, &broker, "instance-a");
        let reader = instance(&stores, &broker, "instance-b");
        admin.start().await.expect("start admin");
        reader.start().await.expect("start reader");

        let org = OrganizationId::now_v7();
        let scope = fixtures::scope("billing.currency", Environment::Production)
            .expect("scope")
            .with_organization(org);
        admin
            .configurations()
            .create(fixtures::string_configuration_params(scope.clone(), "EUR"))
            .await
            .expect("create");
        reader
            .configurations()
            .get(&scope)
            .await
            .expect("get")
            .expect("found");

        admin
            .invalidate_organization(org)
            .await
            .expect("invalidate");
        assert!(evicted(reader.cache(), &scope).await);

        admin.shutdown().await.expect("shutdown");
        reader.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn test_start_subscribes_invalidating_types() {
        let service = instance(&SettingStores::in_memory(), &InMemoryBroker::new(), "solo");
        let subscribed = service.start().await.expect("start");
        assert_eq!(subscribed.len(), 11);
        service.health_check().await.expect("healthy");

        service.shutdown().await.expect("shutdown");
        let err = service.health_check().await.expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }

    #[tokio::test]
    async fn test_broadcast_failure_is_returned_after_local_eviction() {
        let service = SettingsService::new(
            SettingStores::in_memory(),
            Arc::new(FailingEventBus::new()),
            Arc::new(InMemoryCacheBackend::new()),
            ServiceConfig::default(),
        )
        .expect("service");

        let billing = ServiceName::parse("billing").expect("service");
        let scope = fixtures::scope("billing.currency", Environment::Production)
            .expect("scope")
            .with_service(billing.clone());
        let configuration = service
            .configurations()
            .create(fixtures::string_configuration_params(scope.clone(), "EUR"))
            .await
            .expect("create despite failing bus");
        service.cache().set(&configuration).await;

        let err = service
            .invalidate_service(&billing)
            .await
            .expect_err("broadcast fails");
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert_eq!(
            service.cache().get::<Configuration>(&scope).await,
            CacheLookup::Miss
        );
    }
}
