//! Feature flag evaluation.
//!
//! [`evaluate`] is a pure function of the flag and the request context: no
//! I/O, no clock, no randomness. The same flag and the same bucketing
//! identifier always produce the same [`Decision`], across processes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::aggregate::{
    Aggregate, ConditionOperator, FeatureFlag, RolloutStrategy, TargetingCondition,
    TargetingRule, Variant,
};
use crate::event::{scope_data, DomainEvent, EventType};
use crate::identity::AggregateType;
use crate::value::render;

/// Context attribute used for USER_LIST matching and percentage bucketing.
pub const USER_ID_ATTRIBUTE: &str = "userId";
/// Fallback bucketing attribute when no user is known.
pub const BUCKETING_KEY_ATTRIBUTE: &str = "bucketingKey";

/// Request-scoped attributes a flag is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationContext(Map<String, Value>);

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(self, user_id: impl Into<String>) -> Self {
        self.with_attribute(USER_ID_ATTRIBUTE, Value::from(user_id.into()))
    }

    pub fn with_bucketing_key(self, key: impl Into<String>) -> Self {
        self.with_attribute(BUCKETING_KEY_ATTRIBUTE, Value::from(key.into()))
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn user_id(&self) -> Option<String> {
        self.identifier(USER_ID_ATTRIBUTE)
    }

    /// `userId`, falling back to `bucketingKey`.
    pub fn bucketing_id(&self) -> Option<String> {
        self.user_id()
            .or_else(|| self.identifier(BUCKETING_KEY_ATTRIBUTE))
    }

    fn identifier(&self, name: &str) -> Option<String> {
        match self.0.get(name)? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            other => Some(render(other)),
        }
    }
}

impl From<Map<String, Value>> for EvaluationContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Why a decision came out the way it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    FlagDisabled,
    TargetingRule(String),
    RolloutAll,
    UserList,
    NotTargeted,
    PercentageRollout,
    NoRuleMatched,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::FlagDisabled => f.write_str("flag_disabled"),
            Reason::TargetingRule(id) => write!(f, "targeting_rule:{id}"),
            Reason::RolloutAll => f.write_str("rollout_all"),
            Reason::UserList => f.write_str("user_list"),
            Reason::NotTargeted => f.write_str("not_targeted"),
            Reason::PercentageRollout => f.write_str("percentage_rollout"),
            Reason::NoRuleMatched => f.write_str("no_rule_matched"),
        }
    }
}

impl Reason {
    /// Low-cardinality label: the rule id is dropped from `targeting_rule`.
    pub fn label(&self) -> &'static str {
        match self {
            Reason::FlagDisabled => "flag_disabled",
            Reason::TargetingRule(_) => "targeting_rule",
            Reason::RolloutAll => "rollout_all",
            Reason::UserList => "user_list",
            Reason::NotTargeted => "not_targeted",
            Reason::PercentageRollout => "percentage_rollout",
            Reason::NoRuleMatched => "no_rule_matched",
        }
    }
}

impl Serialize for Reason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of evaluating one flag for one context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub is_enabled: bool,
    pub variant: Option<String>,
    pub value: Option<Value>,
    pub reason: Reason,
}

impl Decision {
    fn off(reason: Reason) -> Self {
        Self {
            is_enabled: false,
            variant: None,
            value: None,
            reason,
        }
    }

    fn on(variant: &Variant, reason: Reason) -> Self {
        Self {
            is_enabled: true,
            variant: Some(variant.key.clone()),
            value: Some(variant.value.clone()),
            reason,
        }
    }

    /// `FeatureFlagEvaluated` record of this decision. The context itself is
    /// not carried.
    pub fn to_event(&self, flag: &FeatureFlag) -> DomainEvent {
        let mut data = scope_data(&flag.scope());
        data.insert("feature_flag_id".into(), Value::from(flag.id().to_string()));
        data.insert("is_enabled".into(), Value::from(self.is_enabled));
        data.insert(
            "variant".into(),
            self.variant.clone().map_or(Value::Null, Value::from),
        );
        data.insert("reason".into(), Value::from(self.reason.to_string()));
        DomainEvent::new(
            EventType::FeatureFlagEvaluated,
            AggregateType::FeatureFlag,
            flag.id(),
            flag.version(),
            data,
        )
    }
}

/// Resolve `flag` for `context`.
///
/// A disabled flag short-circuits. Otherwise the first enabled rule whose
/// conditions all hold wins; only when none match does the rollout strategy
/// apply.
pub fn evaluate(flag: &FeatureFlag, context: &EvaluationContext) -> Decision {
    if !flag.is_enabled() {
        return Decision::off(Reason::FlagDisabled);
    }

    for rule in flag.rules() {
        if !rule_matches(rule, context) {
            continue;
        }
        if let Some(variant) = flag.variant(&rule.variant) {
            return Decision::on(variant, Reason::TargetingRule(rule.id.clone()));
        }
    }

    let Some(first) = flag.variants().first() else {
        return Decision::off(Reason::NotTargeted);
    };

    match flag.rollout_strategy() {
        RolloutStrategy::All => Decision::on(first, Reason::RolloutAll),
        RolloutStrategy::UserList => match context.user_id() {
            Some(user) if flag.target_audience().contains_user(&user) => {
                Decision::on(first, Reason::UserList)
            }
            _ => Decision::off(Reason::NotTargeted),
        },
        RolloutStrategy::Percentage => {
            let Some(id) = context.bucketing_id() else {
                return Decision::off(Reason::NotTargeted);
            };
            match select_variant(flag.variants(), bucket(flag.key(), &id)) {
                Some(variant) => Decision::on(variant, Reason::PercentageRollout),
                None => Decision::off(Reason::NotTargeted),
            }
        }
        RolloutStrategy::Rules => Decision::off(Reason::NoRuleMatched),
    }
}

/// Stable bucket in `0..100` for `(flag_key, id)`.
///
/// First eight bytes of SHA-256(`"{flag_key}:{id}"`) read big-endian, mod 100.
pub fn bucket(flag_key: &str, id: &str) -> u32 {
    let digest = Sha256::digest(format!("{flag_key}:{id}").as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % 100) as u32
}

/// Walk variants in declared order, accumulating weights.
fn select_variant(variants: &[Variant], bucket: u32) -> Option<&Variant> {
    let mut upper = 0;
    variants.iter().find(|variant| {
        upper += variant.weight;
        bucket < upper
    })
}

fn rule_matches(rule: &TargetingRule, context: &EvaluationContext) -> bool {
    rule.enabled
        && !rule.conditions.is_empty()
        && rule
            .conditions
            .iter()
            .all(|condition| condition_matches(condition, context))
}

/// A condition over a missing attribute never holds, negated operators included.
fn condition_matches(condition: &TargetingCondition, context: &EvaluationContext) -> bool {
    let Some(actual) = context.get(&condition.attribute) else {
        return false;
    };
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Equals => values_equal(actual, expected),
        ConditionOperator::NotEquals => !values_equal(actual, expected),
        ConditionOperator::Contains => contains(actual, expected),
        ConditionOperator::NotContains => !contains(actual, expected),
        ConditionOperator::GreaterThan => {
            matches!((as_number(actual), as_number(expected)), (Some(a), Some(e)) if a > e)
        }
        ConditionOperator::LessThan => {
            matches!((as_number(actual), as_number(expected)), (Some(a), Some(e)) if a < e)
        }
        ConditionOperator::In => member_of(actual, expected),
        ConditionOperator::NotIn => !member_of(actual, expected),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Substring for strings, element membership for arrays.
fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => s.contains(render(needle).as_str()),
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        _ => false,
    }
}

/// `actual` is one of `expected`; a scalar `expected` is a one-element set.
fn member_of(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(items) => items.iter().any(|item| values_equal(actual, item)),
        single => values_equal(actual, single),
    }
}
