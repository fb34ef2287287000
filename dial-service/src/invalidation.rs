//! Cross-instance cache invalidation.
//!
//! Every instance subscribes this handler to each event type that
//! invalidates the cache. Aggregate events carry their scope fields, so the
//! handler evicts the exact key without a store read. A
//! `SettingsCacheInvalidated` event carries a dimension instead and evicts
//! by pattern.
//!
//! Eviction is idempotent and commutative: the same event twice, or two
//! events out of order, leave the cache in the same state.

use async_trait::async_trait;
use dial_core::{
    Configuration, DialResult, DomainEvent, EventFamily, EventType, FeatureFlag,
    InvalidationTarget, OrganizationSetting, UserPreference, ValidationError,
};
use dial_events::{EventBus, EventHandler};
use dial_storage::SettingsCache;
use std::sync::Arc;
use tracing::{debug, warn};

/// Evicts local cache entries named by incoming events.
#[derive(Clone)]
pub struct CacheInvalidationHandler {
    cache: SettingsCache,
}

impl CacheInvalidationHandler {
    pub fn new(cache: SettingsCache) -> Self {
        Self { cache }
    }

    /// Subscribe to every event type that invalidates the cache. Returns the
    /// types subscribed, in routing order.
    pub async fn subscribe_all(self: &Arc<Self>, bus: &dyn EventBus) -> DialResult<Vec<EventType>> {
        let mut subscribed = Vec::new();
        for event_type in EventType::KNOWN.iter().filter(|t| t.invalidates_cache()) {
            bus.subscribe(event_type.clone(), self.clone()).await?;
            subscribed.push(event_type.clone());
        }
        Ok(subscribed)
    }

    async fn evict_target(&self, target: &InvalidationTarget) -> u64 {
        match target {
            InvalidationTarget::Organization { organization_id } => {
                self.cache.delete_by_organization(*organization_id).await
            }
            InvalidationTarget::Service { service } => self.cache.delete_by_service(service).await,
            InvalidationTarget::Pattern { pattern } => {
                match self.cache.keys().scoped_pattern(pattern) {
                    Some(pattern) => self.cache.clear_by_pattern(&pattern).await,
                    None => {
                        warn!(
                            pattern = %pattern,
                            prefix = self.cache.keys().prefix(),
                            "Ignoring invalidation pattern outside the cache prefix"
                        );
                        0
                    }
                }
            }
            InvalidationTarget::All => self.cache.clear_all().await,
        }
    }
}

fn missing_scope(event: &DomainEvent) -> ValidationError {
    ValidationError::invalid(
        "data",
        format!(
            "{} event {} carries no usable scope",
            event.event_type, event.event_id
        ),
    )
}

#[async_trait]
impl EventHandler for CacheInvalidationHandler {
    async fn handle(&self, event: &DomainEvent) -> DialResult<()> {
        if !event.event_type.invalidates_cache() {
            return Ok(());
        }

        match event.event_type.family() {
            EventFamily::Configuration => {
                let scope = event.scope_key().ok_or_else(|| missing_scope(event))?;
                self.cache.delete::<Configuration>(&scope).await;
                debug!(event_type = %event.event_type, scope = %scope, "Evicted configuration");
            }
            EventFamily::FeatureFlag => {
                let scope = event.scope_key().ok_or_else(|| missing_scope(event))?;
                self.cache.delete::<FeatureFlag>(&scope).await;
                debug!(event_type = %event.event_type, scope = %scope, "Evicted feature flag");
            }
            EventFamily::UserPreference => {
                let scope = event
                    .preference_scope()
                    .ok_or_else(|| missing_scope(event))?;
                self.cache.delete::<UserPreference>(&scope).await;
                debug!(event_type = %event.event_type, scope = %scope, "Evicted user preference");
            }
            EventFamily::OrganizationSetting => {
                let scope = event
                    .organization_setting_scope()
                    .ok_or_else(|| missing_scope(event))?;
                self.cache.delete::<OrganizationSetting>(&scope).await;
                debug!(event_type = %event.event_type, scope = %scope, "Evicted organization setting");
            }
            EventFamily::Cache => {
                let target = event
                    .invalidation_target()
                    .ok_or_else(|| missing_scope(event))?;
                let removed = self.evict_target(&target).await;
                debug!(target = %target, removed, "Applied bulk invalidation");
            }
            EventFamily::Compliance | EventFamily::Unknown => {}
        }
        Ok(())
    }
}
