//! DIAL Test Utilities
//!
//! Shared test infrastructure for the dial workspace:
//! - Proptest generators for scopes, keys and flag weights
//! - Fixtures for the four setting aggregates
//! - Fault-injecting doubles for the cache backend and the event bus

pub use dial_core::{
    Configuration, DialError, DialResult, DomainEvent, Environment, EventType, FeatureFlag,
    NewConfiguration, NewFeatureFlag, NewOrganizationSetting, NewUserPreference, OrganizationId,
    OrganizationSetting, RolloutStrategy, ScopeKey, ServiceName, UserId, UserPreference,
    ValidationError, ValueType, Variant,
};
pub use dial_events::{EventBus, EventHandler, InMemoryBroker};
pub use dial_storage::{CacheBackend, CacheStats, InMemoryCacheBackend, InMemoryStore, KeyPattern};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for dial scopes and aggregates.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_organization_id() -> impl Strategy<Value = OrganizationId> {
        arb_uuid().prop_map(OrganizationId::from_uuid)
    }

    /// Never nil, so it always passes the acting-user check.
    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        (1u128..=u128::MAX).prop_map(|n| UserId::from_uuid(Uuid::from_u128(n)))
    }

    pub fn arb_environment() -> impl Strategy<Value = Environment> {
        prop_oneof![
            Just(Environment::Development),
            Just(Environment::Staging),
            Just(Environment::Production),
            Just(Environment::Testing),
        ]
    }

    /// Lowercase service names, already in normalized form.
    pub fn arb_service_name() -> impl Strategy<Value = ServiceName> {
        "[a-z0-9][a-z0-9_-]{0,15}".prop_filter_map("valid service name", |name| {
            ServiceName::parse(&name).ok()
        })
    }

    /// Dotted configuration key without a service prefix.
    pub fn arb_setting_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}(\\.[a-z0-9_]{1,8}){0,2}"
    }

    /// Keys accepted by the feature flag key check.
    pub fn arb_flag_key() -> impl Strategy<Value = String> {
        "[a-z0-9]([a-z0-9_-]{0,20}[a-z0-9])?"
    }

    /// A full scope. When a service is present the key carries its prefix,
    /// so the scope is valid for a Configuration.
    pub fn arb_scope_key() -> impl Strategy<Value = ScopeKey> {
        (
            arb_setting_key(),
            arb_environment(),
            proptest::option::of(arb_organization_id()),
            proptest::option::of(arb_service_name()),
        )
            .prop_filter_map("valid scope", |(key, environment, org, service)| {
                let key = match &service {
                    Some(service) => format!("{service}.{key}"),
                    None => key,
                };
                ScopeKey::new(key, environment)
                    .ok()
                    .map(|scope| scope.scoped(org, service))
            })
    }

    /// `variants` weights (at least one) that sum to exactly 100.
    pub fn arb_percentage_weights(variants: usize) -> impl Strategy<Value = Vec<u32>> {
        prop::collection::vec(0u32..=100, variants.saturating_sub(1)).prop_map(|mut cuts| {
            cuts.sort_unstable();
            let mut weights = Vec::with_capacity(cuts.len() + 1);
            let mut previous = 0;
            for cut in cuts {
                weights.push(cut - previous);
                previous = cut;
            }
            weights.push(100 - previous);
            weights
        })
    }

    /// An enabled PERCENTAGE flag with one to five variants `v0..vN`.
    pub fn arb_percentage_flag() -> impl Strategy<Value = FeatureFlag> {
        (arb_flag_key(), arb_environment(), 1usize..=5)
            .prop_flat_map(|(key, environment, variants)| {
                (Just(key), Just(environment), arb_percentage_weights(variants))
            })
            .prop_filter_map("valid flag", |(key, environment, weights)| {
                let scope = ScopeKey::new(key, environment).ok()?;
                let variants = weights
                    .iter()
                    .enumerate()
                    .map(|(i, weight)| {
                        Variant::new(format!("v{i}"), format!("Variant {i}"), serde_json::json!(i), *weight)
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .ok()?;
                FeatureFlag::create(NewFeatureFlag::new(
                    scope,
                    "Generated flag",
                    "Generated by proptest",
                    RolloutStrategy::Percentage,
                    variants,
                    UserId::now_v7(),
                ))
                .ok()
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built aggregates for common scenarios.

    use super::*;
    use serde_json::json;

    pub fn actor() -> UserId {
        UserId::now_v7()
    }

    pub fn scope(key: &str, environment: Environment) -> Result<ScopeKey, ValidationError> {
        ScopeKey::new(key, environment)
    }

    /// `db.host = "10.0.0.1"` in PRODUCTION, global.
    pub fn db_host() -> Result<Configuration, ValidationError> {
        string_configuration(scope("db.host", Environment::Production)?, "10.0.0.1")
    }

    /// Creation parameters behind [`db_host`], for service-level `create`.
    pub fn db_host_params() -> Result<NewConfiguration, ValidationError> {
        Ok(string_configuration_params(
            scope("db.host", Environment::Production)?,
            "10.0.0.1",
        ))
    }

    pub fn string_configuration_params(scope: ScopeKey, value: &str) -> NewConfiguration {
        NewConfiguration::new(
            scope,
            json!(value),
            ValueType::String,
            "infrastructure",
            "Fixture configuration",
            actor(),
        )
    }

    pub fn string_configuration(
        scope: ScopeKey,
        value: &str,
    ) -> Result<Configuration, ValidationError> {
        Configuration::create(string_configuration_params(scope, value))
    }

    /// Enabled PERCENTAGE flag with variants `A` and `B`.
    pub fn percentage_flag(
        key: &str,
        weight_a: u32,
        weight_b: u32,
    ) -> Result<FeatureFlag, ValidationError> {
        FeatureFlag::create(NewFeatureFlag::new(
            scope(key, Environment::Production)?,
            "Fixture flag",
            "Percentage rollout fixture",
            RolloutStrategy::Percentage,
            vec![
                Variant::new("A", "Control", json!(false), weight_a)?,
                Variant::new("B", "Treatment", json!(true), weight_b)?,
            ],
            actor(),
        ))
    }

    /// Enabled ALL flag with a single `on` variant.
    pub fn rollout_all_flag(key: &str) -> Result<FeatureFlag, ValidationError> {
        FeatureFlag::create(NewFeatureFlag::new(
            scope(key, Environment::Production)?,
            "Fixture flag",
            "Rollout-all fixture",
            RolloutStrategy::All,
            vec![Variant::new("on", "On", json!(true), 100)?],
            actor(),
        ))
    }

    pub fn theme_preference(
        user_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> Result<UserPreference, ValidationError> {
        let params =
            NewUserPreference::new(user_id, "ui", "theme", json!("dark"), ValueType::String);
        let params = match organization_id {
            Some(org) => params.in_organization(org),
            None => params,
        };
        UserPreference::create(params)
    }

    pub fn seat_limit(organization_id: OrganizationId) -> Result<OrganizationSetting, ValidationError> {
        OrganizationSetting::create(NewOrganizationSetting::new(
            organization_id,
            "billing",
            "seat_limit",
            json!(25),
            ValueType::Number,
            actor(),
        ))
    }
}

// ============================================================================
// FAULT-INJECTING DOUBLES
// ============================================================================

/// Cache backend whose every call fails, optionally after a delay.
#[derive(Debug, Default)]
pub struct FailingCacheBackend {
    delay: Option<Duration>,
    calls: AtomicU64,
}

impl FailingCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before failing, to exercise the cache's own deadline.
    pub fn stalling(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn fail<T>(&self) -> DialResult<T> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Err(DialError::unavailable("cache", "injected failure"))
    }
}

#[async_trait]
impl CacheBackend for FailingCacheBackend {
    async fn get(&self, _key: &str) -> DialResult<Option<Vec<u8>>> {
        self.fail().await
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> DialResult<()> {
        self.fail().await
    }

    async fn delete(&self, _key: &str) -> DialResult<bool> {
        self.fail().await
    }

    async fn keys(&self, _pattern: &KeyPattern) -> DialResult<Vec<String>> {
        self.fail().await
    }

    async fn delete_pattern(&self, _pattern: &KeyPattern) -> DialResult<u64> {
        self.fail().await
    }

    async fn stats(&self) -> DialResult<CacheStats> {
        self.fail().await
    }
}

/// Event bus that records every publish and delivers on demand.
#[derive(Default)]
pub struct RecordingEventBus {
    published: Mutex<Vec<DomainEvent>>,
    handlers: Mutex<HashMap<EventType, Arc<dyn EventHandler>>>,
    closed: AtomicBool,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<DomainEvent> {
        lock(&self.published).clone()
    }

    pub fn published_types(&self) -> Vec<EventType> {
        lock(&self.published)
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.published).clear();
    }

    pub fn subscribed(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = lock(&self.handlers).keys().cloned().collect();
        types.sort();
        types
    }

    /// Hand `event` to the handler subscribed for its type, if any.
    pub async fn deliver(&self, event: &DomainEvent) -> DialResult<bool> {
        let handler = lock(&self.handlers).get(&event.event_type).cloned();
        match handler {
            Some(handler) => handler.handle(event).await.map(|_| true),
            None => Ok(false),
        }
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, event: &DomainEvent) -> DialResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DialError::unavailable("event bus", "closed"));
        }
        lock(&self.published).push(event.clone());
        Ok(())
    }

    async fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> DialResult<()> {
        let mut handlers = lock(&self.handlers);
        if handlers.contains_key(&event_type) {
            return Err(ValidationError::constraint(
                "subscription",
                format!("already subscribed to {event_type}"),
            )
            .into());
        }
        handlers.insert(event_type, handler);
        Ok(())
    }

    async fn unsubscribe(&self, event_type: &EventType) -> DialResult<()> {
        lock(&self.handlers).remove(event_type);
        Ok(())
    }

    async fn health_check(&self) -> DialResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(DialError::unavailable("event bus", "closed"))
        } else {
            Ok(())
        }
    }

    async fn close(&self) -> DialResult<()> {
        self.closed.store(true, Ordering::Release);
        lock(&self.handlers).clear();
        Ok(())
    }
}

/// Event bus whose publishes always fail. Subscriptions are accepted and
/// never fed.
#[derive(Debug, Default)]
pub struct FailingEventBus {
    attempts: AtomicU64,
}

impl FailingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventBus for FailingEventBus {
    async fn publish(&self, _event: &DomainEvent) -> DialResult<()> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Err(DialError::unavailable("broker", "injected failure"))
    }

    async fn subscribe(&self, _event_type: EventType, _handler: Arc<dyn EventHandler>) -> DialResult<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _event_type: &EventType) -> DialResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> DialResult<()> {
        Err(DialError::unavailable("broker", "injected failure"))
    }

    async fn close(&self) -> DialResult<()> {
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
