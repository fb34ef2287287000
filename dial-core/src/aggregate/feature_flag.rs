use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::{change, require_text, Aggregate, Outbox, Revision};
use crate::error::ValidationError;
use crate::event::{scope_data, DomainEvent, EventType};
use crate::identity::{AggregateType, FeatureFlagId, UserId};
use crate::query::ListFilters;
use crate::scope::ScopeKey;

static FLAG_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9](?:[a-z0-9_-]{0,98}[a-z0-9])?$").expect("Invalid flag key regex")
});

/// How a flag picks a variant once no targeting rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutStrategy {
    All,
    Percentage,
    UserList,
    Rules,
}

impl RolloutStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutStrategy::All => "ALL",
            RolloutStrategy::Percentage => "PERCENTAGE",
            RolloutStrategy::UserList => "USER_LIST",
            RolloutStrategy::Rules => "RULES",
        }
    }
}

impl fmt::Display for RolloutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RolloutStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALL" => Ok(RolloutStrategy::All),
            "PERCENTAGE" => Ok(RolloutStrategy::Percentage),
            "USER_LIST" => Ok(RolloutStrategy::UserList),
            "RULES" => Ok(RolloutStrategy::Rules),
            other => Err(ValidationError::invalid(
                "rollout_strategy",
                format!("unknown rollout strategy {other:?}"),
            )),
        }
    }
}

/// Who a flag is aimed at. `user_ids` drives the USER_LIST strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetAudience {
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub user_groups: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub custom: Map<String, Value>,
}

impl TargetAudience {
    pub fn users<I, S>(user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_ids: user_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.user_ids.iter().any(|id| id == user_id)
    }
}

/// One possible outcome of a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub key: String,
    pub name: String,
    pub value: Value,
    pub weight: u32,
    #[serde(default)]
    pub description: String,
}

impl Variant {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        value: Value,
        weight: u32,
    ) -> Result<Self, ValidationError> {
        let key = key.into();
        let name = name.into();
        require_text("variant.key", &key)?;
        require_text("variant.name", &name)?;
        if weight > 100 {
            return Err(ValidationError::invalid(
                "variant.weight",
                "must be between 0 and 100",
            ));
        }
        Ok(Self {
            key,
            name,
            value,
            weight,
            description: String::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Comparison applied by a targeting condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    In,
    NotIn,
}

impl FromStr for ConditionOperator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equals" => Ok(ConditionOperator::Equals),
            "not_equals" => Ok(ConditionOperator::NotEquals),
            "contains" => Ok(ConditionOperator::Contains),
            "not_contains" => Ok(ConditionOperator::NotContains),
            "greater_than" => Ok(ConditionOperator::GreaterThan),
            "less_than" => Ok(ConditionOperator::LessThan),
            "in" => Ok(ConditionOperator::In),
            "not_in" => Ok(ConditionOperator::NotIn),
            other => Err(ValidationError::invalid(
                "condition.operator",
                format!("invalid targeting condition operator {other:?}"),
            )),
        }
    }
}

/// `context[attribute] <operator> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingCondition {
    pub attribute: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

impl TargetingCondition {
    pub fn new(
        attribute: impl Into<String>,
        operator: ConditionOperator,
        value: Value,
    ) -> Result<Self, ValidationError> {
        let attribute = attribute.into();
        require_text("condition.attribute", &attribute)?;
        Ok(Self {
            attribute,
            operator,
            value,
        })
    }
}

/// Ordered condition set that forces a variant when every condition holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingRule {
    pub id: String,
    pub name: String,
    pub conditions: Vec<TargetingCondition>,
    pub variant: String,
    pub enabled: bool,
}

impl TargetingRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        conditions: Vec<TargetingCondition>,
        variant: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let id = id.into();
        let name = name.into();
        let variant = variant.into();
        require_text("rule.id", &id)?;
        require_text("rule.name", &name)?;
        require_text("rule.variant", &variant)?;
        if conditions.is_empty() {
            return Err(ValidationError::invalid(
                "rule.conditions",
                "targeting rule must have at least one condition",
            ));
        }
        Ok(Self {
            id,
            name,
            conditions,
            variant,
            enabled: true,
        })
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Parameters for [`FeatureFlag::create`].
#[derive(Debug, Clone)]
pub struct NewFeatureFlag {
    pub scope: ScopeKey,
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub is_enabled: bool,
    pub rollout_strategy: RolloutStrategy,
    pub target_audience: TargetAudience,
    pub variants: Vec<Variant>,
    pub rules: Vec<TargetingRule>,
    pub created_by: UserId,
}

impl NewFeatureFlag {
    pub fn new(
        scope: ScopeKey,
        name: impl Into<String>,
        description: impl Into<String>,
        rollout_strategy: RolloutStrategy,
        variants: Vec<Variant>,
        created_by: UserId,
    ) -> Self {
        Self {
            scope,
            name: name.into(),
            description: description.into(),
            category: None,
            is_enabled: true,
            rollout_strategy,
            target_audience: TargetAudience::default(),
            variants,
            rules: Vec::new(),
            created_by,
        }
    }
}

/// A feature flag addressed by a [`ScopeKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FeatureFlagRecord")]
pub struct FeatureFlag {
    id: FeatureFlagId,
    scope: ScopeKey,
    name: String,
    description: String,
    category: Option<String>,
    is_enabled: bool,
    rollout_strategy: RolloutStrategy,
    target_audience: TargetAudience,
    variants: Vec<Variant>,
    rules: Vec<TargetingRule>,
    #[serde(flatten)]
    revision: Revision,
    #[serde(skip)]
    outbox: Outbox,
}

/// Wire form of [`FeatureFlag`]. Cached and remote payloads pass the same
/// invariant checks as a fresh flag.
#[derive(Deserialize)]
struct FeatureFlagRecord {
    id: FeatureFlagId,
    scope: ScopeKey,
    name: String,
    description: String,
    category: Option<String>,
    is_enabled: bool,
    rollout_strategy: RolloutStrategy,
    target_audience: TargetAudience,
    variants: Vec<Variant>,
    rules: Vec<TargetingRule>,
    #[serde(flatten)]
    revision: Revision,
}

impl TryFrom<FeatureFlagRecord> for FeatureFlag {
    type Error = ValidationError;

    fn try_from(record: FeatureFlagRecord) -> Result<Self, Self::Error> {
        check_flag_key(&record.scope)?;
        check_invariants(record.rollout_strategy, &record.variants, &record.rules)?;
        Ok(Self {
            id: record.id,
            scope: record.scope,
            name: record.name,
            description: record.description,
            category: record.category,
            is_enabled: record.is_enabled,
            rollout_strategy: record.rollout_strategy,
            target_audience: record.target_audience,
            variants: record.variants,
            rules: record.rules,
            revision: record.revision,
            outbox: Outbox::default(),
        })
    }
}

fn check_flag_key(scope: &ScopeKey) -> Result<(), ValidationError> {
    if FLAG_KEY_PATTERN.is_match(scope.key()) {
        Ok(())
    } else {
        Err(ValidationError::invalid(
            "key",
            "feature flag keys are 1-100 chars of [a-z0-9_-] and cannot start or end with '-' or '_'",
        ))
    }
}

/// Check every structural invariant of a flag's variant and rule sets.
fn check_invariants(
    strategy: RolloutStrategy,
    variants: &[Variant],
    rules: &[TargetingRule],
) -> Result<(), ValidationError> {
    if variants.is_empty() {
        return Err(ValidationError::constraint(
            "variants",
            "feature flag must have at least one variant",
        ));
    }

    let mut keys = HashSet::with_capacity(variants.len());
    for variant in variants {
        if variant.weight > 100 {
            return Err(ValidationError::invalid(
                "variant.weight",
                "must be between 0 and 100",
            ));
        }
        if !keys.insert(variant.key.as_str()) {
            return Err(ValidationError::constraint(
                "variants",
                format!("duplicate variant key {:?}", variant.key),
            ));
        }
    }

    if strategy == RolloutStrategy::Percentage {
        let total: u32 = variants.iter().map(|v| v.weight).sum();
        if total != 100 {
            return Err(ValidationError::constraint(
                "variants",
                format!("variant weights must sum to 100 for percentage rollout, got {total}"),
            ));
        }
    }

    let mut rule_ids = HashSet::with_capacity(rules.len());
    for rule in rules {
        if !rule_ids.insert(rule.id.as_str()) {
            return Err(ValidationError::constraint(
                "rules",
                format!("duplicate targeting rule id {:?}", rule.id),
            ));
        }
        if !keys.contains(rule.variant.as_str()) {
            return Err(ValidationError::constraint(
                "rules",
                format!(
                    "targeting rule {:?} references unknown variant {:?}",
                    rule.id, rule.variant
                ),
            ));
        }
    }

    Ok(())
}

impl FeatureFlag {
    pub fn create(params: NewFeatureFlag) -> Result<Self, ValidationError> {
        require_text("name", &params.name)?;
        require_text("description", &params.description)?;
        let revision = Revision::first(params.created_by)?;

        check_flag_key(&params.scope)?;
        check_invariants(params.rollout_strategy, &params.variants, &params.rules)?;

        let mut flag = Self {
            id: FeatureFlagId::now_v7(),
            scope: params.scope,
            name: params.name,
            description: params.description,
            category: params.category,
            is_enabled: params.is_enabled,
            rollout_strategy: params.rollout_strategy,
            target_audience: params.target_audience,
            variants: params.variants,
            rules: params.rules,
            revision,
            outbox: Outbox::default(),
        };

        let mut data = flag.event_data();
        data.insert("name".into(), Value::from(flag.name.as_str()));
        flag.emit(EventType::FeatureFlagCreated, data);
        Ok(flag)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    pub fn rollout_strategy(&self) -> RolloutStrategy {
        self.rollout_strategy
    }

    pub fn target_audience(&self) -> &TargetAudience {
        &self.target_audience
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variant(&self, key: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.key == key)
    }

    pub fn rules(&self) -> &[TargetingRule] {
        &self.rules
    }

    pub fn enable(&mut self, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        if self.is_enabled {
            return Err(ValidationError::constraint(
                "is_enabled",
                "feature flag is already enabled",
            ));
        }
        self.is_enabled = true;
        self.revision.bump(acting_user);
        let data = self.event_data();
        self.emit(EventType::FeatureFlagEnabled, data);
        Ok(())
    }

    pub fn disable(&mut self, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        if !self.is_enabled {
            return Err(ValidationError::constraint(
                "is_enabled",
                "feature flag is already disabled",
            ));
        }
        self.is_enabled = false;
        self.revision.bump(acting_user);
        let data = self.event_data();
        self.emit(EventType::FeatureFlagDisabled, data);
        Ok(())
    }

    pub fn update_rollout_strategy(
        &mut self,
        strategy: RolloutStrategy,
        acting_user: UserId,
    ) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        check_invariants(strategy, &self.variants, &self.rules)?;

        let previous = std::mem::replace(&mut self.rollout_strategy, strategy);
        self.revision.bump(acting_user);
        self.emit_update(
            "rollout_strategy",
            change(Value::from(previous.as_str()), Value::from(strategy.as_str())),
        );
        Ok(())
    }

    pub fn update_target_audience(
        &mut self,
        audience: TargetAudience,
        acting_user: UserId,
    ) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        let previous = std::mem::replace(&mut self.target_audience, audience);
        self.revision.bump(acting_user);
        self.emit_update(
            "target_audience",
            change(
                serde_json::to_value(&previous).unwrap_or(Value::Null),
                serde_json::to_value(&self.target_audience).unwrap_or(Value::Null),
            ),
        );
        Ok(())
    }

    /// Append a variant. Under PERCENTAGE the weights must still sum to 100,
    /// so only a zero-weight variant can be added without a re-weight.
    pub fn add_variant(&mut self, variant: Variant, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        let mut candidate = self.variants.clone();
        candidate.push(variant);
        self.commit_variants(candidate, acting_user)
    }

    pub fn remove_variant(&mut self, key: &str, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        if self.variants.len() <= 1 {
            return Err(ValidationError::constraint(
                "variants",
                "cannot remove the last variant",
            ));
        }
        if !self.variants.iter().any(|v| v.key == key) {
            return Err(ValidationError::invalid(
                "variant.key",
                format!("variant {key:?} not found"),
            ));
        }
        let candidate = self
            .variants
            .iter()
            .filter(|v| v.key != key)
            .cloned()
            .collect();
        self.commit_variants(candidate, acting_user)
    }

    /// Re-weight several variants atomically. Keys not listed keep their weight.
    pub fn update_variant_weights(
        &mut self,
        weights: &[(String, u32)],
        acting_user: UserId,
    ) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        let mut candidate = self.variants.clone();
        for (key, weight) in weights {
            let variant = candidate
                .iter_mut()
                .find(|v| &v.key == key)
                .ok_or_else(|| {
                    ValidationError::invalid("variant.key", format!("variant {key:?} not found"))
                })?;
            variant.weight = *weight;
        }
        self.commit_variants(candidate, acting_user)
    }

    pub fn add_targeting_rule(
        &mut self,
        rule: TargetingRule,
        acting_user: UserId,
    ) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        let mut candidate = self.rules.clone();
        candidate.push(rule);
        self.commit_rules(candidate, acting_user)
    }

    pub fn remove_targeting_rule(
        &mut self,
        rule_id: &str,
        acting_user: UserId,
    ) -> Result<(), ValidationError> {
        acting_user.require("updated_by")?;
        if !self.rules.iter().any(|r| r.id == rule_id) {
            return Err(ValidationError::invalid(
                "rule.id",
                format!("targeting rule {rule_id:?} not found"),
            ));
        }
        let candidate = self
            .rules
            .iter()
            .filter(|r| r.id != rule_id)
            .cloned()
            .collect();
        self.commit_rules(candidate, acting_user)
    }

    /// Record deletion. The caller removes the stored row and drops this instance.
    pub fn delete(&mut self, acting_user: UserId) -> Result<(), ValidationError> {
        acting_user.require("deleted_by")?;
        self.revision.bump(acting_user);
        let data = self.event_data();
        self.emit(EventType::FeatureFlagDeleted, data);
        Ok(())
    }

    fn commit_variants(
        &mut self,
        candidate: Vec<Variant>,
        acting_user: UserId,
    ) -> Result<(), ValidationError> {
        check_invariants(self.rollout_strategy, &candidate, &self.rules)?;
        let previous = std::mem::replace(&mut self.variants, candidate);
        self.revision.bump(acting_user);
        self.emit_update(
            "variants",
            change(variant_summary(&previous), variant_summary(&self.variants)),
        );
        Ok(())
    }

    fn commit_rules(
        &mut self,
        candidate: Vec<TargetingRule>,
        acting_user: UserId,
    ) -> Result<(), ValidationError> {
        check_invariants(self.rollout_strategy, &self.variants, &candidate)?;
        let previous = std::mem::replace(&mut self.rules, candidate);
        self.revision.bump(acting_user);
        let ids = |rules: &[TargetingRule]| Value::from_iter(rules.iter().map(|r| r.id.clone()));
        self.emit_update("rules", change(ids(&previous), ids(&self.rules)));
        Ok(())
    }

    fn event_data(&self) -> Map<String, Value> {
        let mut data = scope_data(&self.scope);
        data.insert("feature_flag_id".into(), Value::from(self.id.to_string()));
        data.insert("is_enabled".into(), Value::from(self.is_enabled));
        data.insert(
            "rollout_strategy".into(),
            Value::from(self.rollout_strategy.as_str()),
        );
        data.insert(
            "variant_keys".into(),
            Value::from_iter(self.variants.iter().map(|v| v.key.clone())),
        );
        data
    }

    fn emit_update(&mut self, field: &str, changes: Value) {
        let mut data = self.event_data();
        let mut changed = Map::new();
        changed.insert(field.to_string(), changes);
        data.insert("changes".into(), Value::Object(changed));
        self.emit(EventType::FeatureFlagUpdated, data);
    }

    fn emit(&mut self, event_type: EventType, data: Map<String, Value>) {
        self.outbox.record(
            event_type,
            AggregateType::FeatureFlag,
            self.id,
            &self.revision,
            data,
        );
    }
}

fn variant_summary(variants: &[Variant]) -> Value {
    let mut summary = Map::new();
    for variant in variants {
        summary.insert(variant.key.clone(), Value::from(variant.weight));
    }
    Value::Object(summary)
}

impl Aggregate for FeatureFlag {
    type Id = FeatureFlagId;
    type Scope = ScopeKey;

    const AGGREGATE_TYPE: AggregateType = AggregateType::FeatureFlag;

    fn id(&self) -> FeatureFlagId {
        self.id
    }

    fn scope(&self) -> ScopeKey {
        self.scope.clone()
    }

    fn revision(&self) -> &Revision {
        &self.revision
    }

    fn key(&self) -> &str {
        self.scope.key()
    }

    fn matches(&self, filters: &ListFilters) -> bool {
        filters
            .environment
            .is_none_or(|env| env == self.scope.environment())
            && filters
                .organization_id
                .is_none_or(|org| Some(org) == self.scope.organization_id())
            && filters
                .service
                .as_ref()
                .is_none_or(|svc| Some(svc) == self.scope.service())
            && filters
                .category
                .as_ref()
                .is_none_or(|cat| Some(cat.as_str()) == self.category.as_deref())
            && filters.is_enabled.is_none_or(|on| on == self.is_enabled)
            && filters.tags.is_empty()
            && filters.user_id.is_none()
    }

    fn pending_events(&self) -> &[DomainEvent] {
        self.outbox.as_slice()
    }

    fn take_events(&mut self) -> Vec<DomainEvent> {
        self.outbox.take()
    }
}
