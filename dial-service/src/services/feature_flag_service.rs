use dial_core::{
    evaluate, Aggregate, DialResult, Decision, EvaluationContext, FeatureFlag, FeatureFlagId,
    ListFilters, ListOptions, NewFeatureFlag, RolloutStrategy, ScopeKey, TargetAudience,
    TargetingRule, UserId, Variant,
};
use dial_storage::SettingStore;
use std::sync::Arc;
use tracing::debug;

use super::aggregate_handler::{AggregateHandler, ServiceContext};

/// Commands, queries and evaluation for feature flags.
#[derive(Clone)]
pub struct FeatureFlagService {
    handler: AggregateHandler<FeatureFlag>,
}

impl FeatureFlagService {
    pub fn new(store: Arc<dyn SettingStore<FeatureFlag>>, context: ServiceContext) -> Self {
        Self {
            handler: AggregateHandler::new(store, context),
        }
    }

    pub async fn create(&self, params: NewFeatureFlag) -> DialResult<FeatureFlag> {
        match FeatureFlag::create(params) {
            Ok(flag) => self.handler.create(flag).await,
            Err(e) => self.handler.rejected("create", e),
        }
    }

    pub async fn get(&self, scope: &ScopeKey) -> DialResult<Option<FeatureFlag>> {
        self.handler.get(scope).await
    }

    pub async fn get_by_id(&self, id: FeatureFlagId) -> DialResult<FeatureFlag> {
        self.handler.get_by_id(id).await
    }

    pub async fn exists(&self, scope: &ScopeKey) -> DialResult<bool> {
        self.handler.exists(scope).await
    }

    pub async fn enable(&self, id: FeatureFlagId, acting_user: UserId) -> DialResult<FeatureFlag> {
        self.handler
            .mutate(id, "enable", |f| f.enable(acting_user))
            .await
    }

    pub async fn disable(&self, id: FeatureFlagId, acting_user: UserId) -> DialResult<FeatureFlag> {
        self.handler
            .mutate(id, "disable", |f| f.disable(acting_user))
            .await
    }

    pub async fn update_rollout_strategy(
        &self,
        id: FeatureFlagId,
        strategy: RolloutStrategy,
        acting_user: UserId,
    ) -> DialResult<FeatureFlag> {
        self.handler
            .mutate(id, "update_rollout_strategy", |f| {
                f.update_rollout_strategy(strategy, acting_user)
            })
            .await
    }

    pub async fn update_target_audience(
        &self,
        id: FeatureFlagId,
        audience: TargetAudience,
        acting_user: UserId,
    ) -> DialResult<FeatureFlag> {
        self.handler
            .mutate(id, "update_target_audience", |f| {
                f.update_target_audience(audience, acting_user)
            })
            .await
    }

    pub async fn add_variant(
        &self,
        id: FeatureFlagId,
        variant: Variant,
        acting_user: UserId,
    ) -> DialResult<FeatureFlag> {
        self.handler
            .mutate(id, "add_variant", |f| f.add_variant(variant, acting_user))
            .await
    }

    pub async fn remove_variant(
        &self,
        id: FeatureFlagId,
        key: &str,
        acting_user: UserId,
    ) -> DialResult<FeatureFlag> {
        self.handler
            .mutate(id, "remove_variant", |f| f.remove_variant(key, acting_user))
            .await
    }

    /// Reweigh several variants in one version bump.
    pub async fn update_variant_weights(
        &self,
        id: FeatureFlagId,
        weights: &[(String, u32)],
        acting_user: UserId,
    ) -> DialResult<FeatureFlag> {
        self.handler
            .mutate(id, "update_variant_weights", |f| {
                f.update_variant_weights(weights, acting_user)
            })
            .await
    }

    pub async fn add_targeting_rule(
        &self,
        id: FeatureFlagId,
        rule: TargetingRule,
        acting_user: UserId,
    ) -> DialResult<FeatureFlag> {
        self.handler
            .mutate(id, "add_targeting_rule", |f| {
                f.add_targeting_rule(rule, acting_user)
            })
            .await
    }

    pub async fn remove_targeting_rule(
        &self,
        id: FeatureFlagId,
        rule_id: &str,
        acting_user: UserId,
    ) -> DialResult<FeatureFlag> {
        self.handler
            .mutate(id, "remove_targeting_rule", |f| {
                f.remove_targeting_rule(rule_id, acting_user)
            })
            .await
    }

    pub async fn delete(&self, id: FeatureFlagId, acting_user: UserId) -> DialResult<()> {
        self.handler.remove(id, |f| f.delete(acting_user)).await
    }

    pub async fn bulk_delete(&self, ids: &[FeatureFlagId], acting_user: UserId) -> DialResult<()> {
        self.handler
            .bulk_remove(ids, |f| f.delete(acting_user))
            .await
    }

    pub async fn list(&self, options: &ListOptions) -> DialResult<Vec<FeatureFlag>> {
        self.handler.list(options).await
    }

    pub async fn count(&self, filters: &ListFilters) -> DialResult<u64> {
        self.handler.count(filters).await
    }

    /// Evaluate an already loaded flag. Counts the decision and, when
    /// configured, publishes a `FeatureFlagEvaluated` event best-effort.
    pub async fn evaluate(&self, flag: &FeatureFlag, context: &EvaluationContext) -> Decision {
        let decision = evaluate(flag, context);
        let ctx = self.handler.context();
        ctx.metrics.record_evaluation(&decision.reason);
        debug!(flag = %flag.scope(), reason = %decision.reason, "Evaluated feature flag");

        if ctx.config.publish_evaluations {
            ctx.publish_best_effort(&[decision.to_event(flag)]).await;
        }
        decision
    }

    /// Cache-aside load followed by evaluation. `None` when no flag holds the scope.
    pub async fn evaluate_by_scope(
        &self,
        scope: &ScopeKey,
        context: &EvaluationContext,
    ) -> DialResult<Option<Decision>> {
        let Some(flag) = self.handler.get(scope).await? else {
            return Ok(None);
        };
        Ok(Some(self.evaluate(&flag, context).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::metrics::ServiceMetrics;
    use dial_core::{
        Aggregate, ConditionOperator, Environment, ErrorKind, EventType, Reason,
        TargetingCondition,
    };
    use dial_events::EventBus;
    use dial_storage::{InMemoryCacheBackend, InMemoryStore, SettingsCache};
    use dial_test_utils::{fixtures, RecordingEventBus};
    use serde_json::json;

    fn service(config: ServiceConfig) -> (FeatureFlagService, Arc<RecordingEventBus>) {
        let bus = Arc::new(RecordingEventBus::new());
        let context = ServiceContext::new(
            SettingsCache::new(Arc::new(InMemoryCacheBackend::new()), config.cache.clone()),
            bus.clone() as Arc<dyn EventBus>,
            Arc::new(ServiceMetrics::new().expect("metrics")),
            config,
        );
        (
            FeatureFlagService::new(Arc::new(InMemoryStore::new()), context),
            bus,
        )
    }

    fn checkout_params() -> NewFeatureFlag {
        NewFeatureFlag::new(
            ScopeKey::new("new-checkout", Environment::Production).expect("scope"),
            "New checkout",
            "Checkout redesign",
            RolloutStrategy::Percentage,
            vec![
                Variant::new("A", "Control", json!(false), 30).expect("variant"),
                Variant::new("B", "Treatment", json!(true), 70).expect("variant"),
            ],
            fixtures::actor(),
        )
    }

    #[tokio::test]
    async fn test_variant_lifecycle_keeps_weights_at_100() {
        let (service, _bus) = service(ServiceConfig::default());
        let actor = fixtures::actor();
        let flag = service.create(checkout_params()).await.expect("create");

        let err = service
            .add_variant(
                flag.id(),
                Variant::new("C", "Third", json!("c"), 10).expect("variant"),
                actor,
            )
            .await
            .expect_err("weights would exceed 100");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let weights = vec![("A".to_string(), 50), ("B".to_string(), 50)];
        let reweighed = service
            .update_variant_weights(flag.id(), &weights, actor)
            .await
            .expect("reweigh");
        assert_eq!(reweighed.version(), 2);
        assert!(reweighed.variants().iter().all(|v| v.weight == 50));

        let stored = service.get_by_id(flag.id()).await.expect("stored");
        assert_eq!(stored.version(), 2);
    }

    #[tokio::test]
    async fn test_removing_last_variant_is_rejected() {
        let (service, _bus) = service(ServiceConfig::default());
        let actor = fixtures::actor();
        let flag = service
            .create(NewFeatureFlag::new(
                ScopeKey::new("solo", Environment::Production).expect("scope"),
                "Solo",
                "One variant",
                RolloutStrategy::All,
                vec![Variant::new("on", "On", json!(true), 100).expect("variant")],
                actor,
            ))
            .await
            .expect("create");

        let err = service
            .remove_variant(flag.id(), "on", actor)
            .await
            .expect_err("last variant");
        assert_eq!(err.kind(), ErrorKind::Validation);
        let stored = service.get_by_id(flag.id()).await.expect("stored");
        assert_eq!(stored.variants().len(), 1);
        assert_eq!(stored.version(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_by_scope() {
        let (service, bus) = service(ServiceConfig::default());
        let actor = fixtures::actor();
        let flag = service.create(checkout_params()).await.expect("create");
        let rule = TargetingRule::new(
            "beta",
            "Beta testers",
            vec![TargetingCondition::new("plan", ConditionOperator::Equals, json!("beta"))
                .expect("condition")],
            "B",
        )
        .expect("rule");
        service
            .add_targeting_rule(flag.id(), rule, actor)
            .await
            .expect("rule added");

        let scope = flag.scope();
        let context = EvaluationContext::new()
            .with_user_id("user-42")
            .with_attribute("plan", json!("beta"));
        let decision = service
            .evaluate_by_scope(&scope, &context)
            .await
            .expect("evaluate")
            .expect("flag exists");
        assert_eq!(decision.variant.as_deref(), Some("B"));
        assert_eq!(decision.reason, Reason::TargetingRule("beta".to_string()));

        let bucketed = EvaluationContext::new().with_user_id("user-42");
        let first = service.evaluate_by_scope(&scope, &bucketed).await.expect("evaluate");
        let second = service.evaluate_by_scope(&scope, &bucketed).await.expect("evaluate");
        assert_eq!(first, second);

        service.disable(flag.id(), actor).await.expect("disable");
        let off = service
            .evaluate_by_scope(&scope, &context)
            .await
            .expect("evaluate")
            .expect("flag exists");
        assert!(!off.is_enabled);
        assert_eq!(off.reason, Reason::FlagDisabled);

        let missing = ScopeKey::new("unknown", Environment::Production).expect("scope");
        assert!(service
            .evaluate_by_scope(&missing, &context)
            .await
            .expect("evaluate")
            .is_none());

        let metrics = &service.handler.context().metrics;
        assert_eq!(
            metrics
                .flag_evaluations_total
                .with_label_values(&["targeting_rule"])
                .get(),
            1.0
        );
        assert!(!bus
            .published_types()
            .contains(&EventType::FeatureFlagEvaluated));
    }

    #[tokio::test]
    async fn test_evaluations_are_published_when_configured() {
        let (service, bus) = service(ServiceConfig::default().with_published_evaluations(true));
        let flag = service.create(checkout_params()).await.expect("create");

        let decision = service
            .evaluate(&flag, &EvaluationContext::new().with_user_id("user-7"))
            .await;
        assert!(decision.is_enabled);

        let published = bus.published();
        let evaluated = published.last().expect("event");
        assert_eq!(evaluated.event_type, EventType::FeatureFlagEvaluated);
        assert_eq!(evaluated.data_str("reason"), Some("percentage_rollout"));
        assert!(evaluated.data.get("userId").is_none());
    }
}
