//! Versioned setting aggregates.
//!
//! Every aggregate follows the same mutation contract:
//!
//! 1. reject a nil acting user
//! 2. re-check the invariants touched by the mutation against a candidate state
//! 3. commit the candidate in place
//! 4. bump `version` by exactly one and stamp `updated_at`
//! 5. append exactly one domain event to the pending outbox
//!
//! A rejected mutation leaves the aggregate untouched. Mutation methods are
//! not synchronized; callers serialize access to one instance and rely on the
//! store's conditional update to catch cross-process races.

mod configuration;
mod feature_flag;
mod organization_setting;
mod user_preference;

pub use configuration::{Configuration, NewConfiguration};
pub use feature_flag::{
    ConditionOperator, FeatureFlag, NewFeatureFlag, RolloutStrategy, TargetAudience,
    TargetingCondition, TargetingRule, Variant,
};
pub use organization_setting::{NewOrganizationSetting, OrganizationSetting};
pub use user_preference::{NewUserPreference, UserPreference};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::event::{DomainEvent, EventType};
use crate::identity::{AggregateType, Timestamp, UserId};
use crate::query::ListFilters;

/// Behavior the store, cache and handlers need from every aggregate.
pub trait Aggregate:
    Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Id: Copy + Eq + Hash + Debug + Display + Into<Uuid> + Send + Sync + 'static;
    type Scope: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static;

    const AGGREGATE_TYPE: AggregateType;

    fn id(&self) -> Self::Id;

    fn scope(&self) -> Self::Scope;

    fn revision(&self) -> &Revision;

    /// Setting key used when sorting by key.
    fn key(&self) -> &str;

    fn matches(&self, filters: &ListFilters) -> bool;

    fn pending_events(&self) -> &[DomainEvent];

    /// Drain the pending outbox. The caller becomes responsible for publishing.
    fn take_events(&mut self) -> Vec<DomainEvent>;

    fn version(&self) -> i64 {
        self.revision().version
    }
}

/// Version and audit stamps shared by all aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub version: i64,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Revision {
    pub(crate) fn first(created_by: UserId) -> Result<Self, ValidationError> {
        created_by.require("created_by")?;
        let now = chrono::Utc::now();
        Ok(Self {
            version: 1,
            created_by,
            updated_by: created_by,
            created_at: now,
            updated_at: now,
        })
    }

    pub(crate) fn bump(&mut self, acting_user: UserId) {
        self.version += 1;
        self.updated_by = acting_user;
        self.updated_at = chrono::Utc::now();
    }
}

/// Pending events plus the revision they are stamped with.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Outbox(Vec<DomainEvent>);

impl Outbox {
    pub(crate) fn record(
        &mut self,
        event_type: EventType,
        aggregate_type: AggregateType,
        aggregate_id: impl Display,
        revision: &Revision,
        mut data: Map<String, Value>,
    ) {
        data.insert("version".into(), Value::from(revision.version));
        data.insert("acting_user".into(), Value::from(revision.updated_by.to_string()));
        self.0.push(DomainEvent::new(
            event_type,
            aggregate_type,
            aggregate_id,
            revision.version,
            data,
        ));
    }

    pub(crate) fn as_slice(&self) -> &[DomainEvent] {
        &self.0
    }

    pub(crate) fn take(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.0)
    }
}

/// `{"from": old, "to": new}` entry for an event's `changes` map.
pub(crate) fn change(from: Value, to: Value) -> Value {
    let mut entry = Map::new();
    entry.insert("from".into(), from);
    entry.insert("to".into(), to);
    Value::Object(entry)
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::required(field))
    } else {
        Ok(())
    }
}
