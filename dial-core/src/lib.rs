//! DIAL Core - Setting Aggregates and Flag Evaluation
//!
//! Scope keys, the four versioned setting aggregates, domain events and the
//! feature flag evaluation engine. No I/O lives here; storage, cache and
//! event transport build on these types.

pub mod aggregate;
pub mod error;
pub mod evaluation;
pub mod event;
pub mod identity;
pub mod query;
pub mod scope;
pub mod value;

pub use aggregate::{
    Aggregate, ConditionOperator, Configuration, FeatureFlag, NewConfiguration, NewFeatureFlag,
    NewOrganizationSetting, NewUserPreference, OrganizationSetting, Revision, RolloutStrategy,
    TargetAudience, TargetingCondition, TargetingRule, UserPreference, Variant,
};
pub use error::{
    DialError, DialResult, ErrorKind, InfrastructureError, StorageError, ValidationError,
};
pub use evaluation::{evaluate, Decision, EvaluationContext, Reason};
pub use event::{DomainEvent, EventFamily, EventType, InvalidationTarget};
pub use identity::{
    AggregateType, ConfigurationId, FeatureFlagId, OrganizationId, OrganizationSettingId,
    Timestamp, UserId, UserPreferenceId,
};
pub use query::{ListFilters, ListOptions, SortField, SortOrder, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use scope::{Environment, OrganizationSettingScope, PreferenceScope, ScopeKey, ServiceName};
pub use value::{ValidationRules, ValueType};
