//! Domain events emitted by setting aggregates.
//!
//! Events travel as a self-describing JSON envelope. Unknown event types and
//! unknown data fields survive a round trip so a consumer that lags behind a
//! schema change can still read the fields it knows.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::{DialResult, InfrastructureError};
use crate::identity::{AggregateType, OrganizationId, Timestamp, UserId};
use crate::scope::{Environment, OrganizationSettingScope, PreferenceScope, ScopeKey, ServiceName};

/// Every event type the settings domain knows how to route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    ConfigurationCreated,
    ConfigurationUpdated,
    ConfigurationDeleted,
    FeatureFlagCreated,
    FeatureFlagUpdated,
    FeatureFlagEnabled,
    FeatureFlagDisabled,
    FeatureFlagDeleted,
    FeatureFlagEvaluated,
    UserPreferenceCreated,
    UserPreferenceUpdated,
    UserPreferenceDeleted,
    OrganizationSettingCreated,
    OrganizationSettingUpdated,
    OrganizationSettingDeleted,
    SettingsCacheInvalidated,
    ComplianceAuditRecorded,
    /// A type this build does not know. Routed to the unknown family.
    Other(String),
}

impl EventType {
    pub const KNOWN: [EventType; 17] = [
        EventType::ConfigurationCreated,
        EventType::ConfigurationUpdated,
        EventType::ConfigurationDeleted,
        EventType::FeatureFlagCreated,
        EventType::FeatureFlagUpdated,
        EventType::FeatureFlagEnabled,
        EventType::FeatureFlagDisabled,
        EventType::FeatureFlagDeleted,
        EventType::FeatureFlagEvaluated,
        EventType::UserPreferenceCreated,
        EventType::UserPreferenceUpdated,
        EventType::UserPreferenceDeleted,
        EventType::OrganizationSettingCreated,
        EventType::OrganizationSettingUpdated,
        EventType::OrganizationSettingDeleted,
        EventType::SettingsCacheInvalidated,
        EventType::ComplianceAuditRecorded,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            EventType::ConfigurationCreated => "ConfigurationCreated",
            EventType::ConfigurationUpdated => "ConfigurationUpdated",
            EventType::ConfigurationDeleted => "ConfigurationDeleted",
            EventType::FeatureFlagCreated => "FeatureFlagCreated",
            EventType::FeatureFlagUpdated => "FeatureFlagUpdated",
            EventType::FeatureFlagEnabled => "FeatureFlagEnabled",
            EventType::FeatureFlagDisabled => "FeatureFlagDisabled",
            EventType::FeatureFlagDeleted => "FeatureFlagDeleted",
            EventType::FeatureFlagEvaluated => "FeatureFlagEvaluated",
            EventType::UserPreferenceCreated => "UserPreferenceCreated",
            EventType::UserPreferenceUpdated => "UserPreferenceUpdated",
            EventType::UserPreferenceDeleted => "UserPreferenceDeleted",
            EventType::OrganizationSettingCreated => "OrganizationSettingCreated",
            EventType::OrganizationSettingUpdated => "OrganizationSettingUpdated",
            EventType::OrganizationSettingDeleted => "OrganizationSettingDeleted",
            EventType::SettingsCacheInvalidated => "SettingsCacheInvalidated",
            EventType::ComplianceAuditRecorded => "ComplianceAuditRecorded",
            EventType::Other(name) => name,
        }
    }

    pub fn family(&self) -> EventFamily {
        match self {
            EventType::ConfigurationCreated
            | EventType::ConfigurationUpdated
            | EventType::ConfigurationDeleted => EventFamily::Configuration,
            EventType::FeatureFlagCreated
            | EventType::FeatureFlagUpdated
            | EventType::FeatureFlagEnabled
            | EventType::FeatureFlagDisabled
            | EventType::FeatureFlagDeleted
            | EventType::FeatureFlagEvaluated => EventFamily::FeatureFlag,
            EventType::UserPreferenceCreated
            | EventType::UserPreferenceUpdated
            | EventType::UserPreferenceDeleted => EventFamily::UserPreference,
            EventType::OrganizationSettingCreated
            | EventType::OrganizationSettingUpdated
            | EventType::OrganizationSettingDeleted => EventFamily::OrganizationSetting,
            EventType::SettingsCacheInvalidated => EventFamily::Cache,
            EventType::ComplianceAuditRecorded => EventFamily::Compliance,
            EventType::Other(_) => EventFamily::Unknown,
        }
    }

    /// Whether a subscriber must evict the affected scope on receipt.
    pub fn invalidates_cache(&self) -> bool {
        matches!(
            self,
            EventType::ConfigurationUpdated
                | EventType::ConfigurationDeleted
                | EventType::FeatureFlagUpdated
                | EventType::FeatureFlagEnabled
                | EventType::FeatureFlagDisabled
                | EventType::FeatureFlagDeleted
                | EventType::UserPreferenceUpdated
                | EventType::UserPreferenceDeleted
                | EventType::OrganizationSettingUpdated
                | EventType::OrganizationSettingDeleted
                | EventType::SettingsCacheInvalidated
        )
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        EventType::KNOWN
            .iter()
            .find(|known| known.as_str() == name)
            .cloned()
            .unwrap_or(EventType::Other(name))
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity family an event belongs to. One durable stream per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFamily {
    Configuration,
    FeatureFlag,
    UserPreference,
    OrganizationSetting,
    Cache,
    Compliance,
    Unknown,
}

impl EventFamily {
    pub const ROUTED: [EventFamily; 6] = [
        EventFamily::Configuration,
        EventFamily::FeatureFlag,
        EventFamily::UserPreference,
        EventFamily::OrganizationSetting,
        EventFamily::Cache,
        EventFamily::Compliance,
    ];

    /// Subject segment for this family.
    pub fn segment(&self) -> &'static str {
        match self {
            EventFamily::Configuration => "configuration",
            EventFamily::FeatureFlag => "feature-flag",
            EventFamily::UserPreference => "user-preference",
            EventFamily::OrganizationSetting => "organization-setting",
            EventFamily::Cache => "cache",
            EventFamily::Compliance => "compliance",
            EventFamily::Unknown => "unknown",
        }
    }
}

/// Wire envelope for every domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub occurred_at: Timestamp,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl DomainEvent {
    pub fn new(
        event_type: EventType,
        aggregate_type: AggregateType,
        aggregate_id: impl fmt::Display,
        version: i64,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type,
            aggregate_id: aggregate_id.to_string(),
            aggregate_type: aggregate_type.as_str().to_string(),
            occurred_at: chrono::Utc::now(),
            version,
            data,
        }
    }

    /// A bulk eviction notice not tied to a single aggregate.
    pub fn cache_invalidated(target: &InvalidationTarget) -> Self {
        let data = match serde_json::to_value(target) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            event_id: Uuid::now_v7(),
            event_type: EventType::SettingsCacheInvalidated,
            aggregate_id: target.to_string(),
            aggregate_type: "SettingsCache".to_string(),
            occurred_at: chrono::Utc::now(),
            version: 0,
            data,
        }
    }

    pub fn to_json(&self) -> DialResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            InfrastructureError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn from_json(bytes: &[u8]) -> DialResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            InfrastructureError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    fn data_parsed<T: std::str::FromStr>(&self, field: &str) -> Option<T> {
        self.data_str(field).and_then(|s| s.parse().ok())
    }

    /// Rebuild the ScopeKey carried by a Configuration or FeatureFlag event.
    pub fn scope_key(&self) -> Option<ScopeKey> {
        let environment: Environment = self.data_parsed("environment")?;
        let scope = ScopeKey::new(self.data_str("key")?, environment).ok()?;
        let organization_id = self.data_parsed::<OrganizationId>("organization_id");
        let service = self.data_parsed::<ServiceName>("service");
        Some(scope.scoped(organization_id, service))
    }

    /// Rebuild the scope carried by a UserPreference event.
    pub fn preference_scope(&self) -> Option<PreferenceScope> {
        Some(PreferenceScope {
            user_id: self.data_parsed::<UserId>("user_id")?,
            organization_id: self.data_parsed("organization_id"),
            category: self.data_str("category")?.to_string(),
            key: self.data_str("key")?.to_string(),
        })
    }

    /// Rebuild the scope carried by an OrganizationSetting event.
    pub fn organization_setting_scope(&self) -> Option<OrganizationSettingScope> {
        Some(OrganizationSettingScope {
            organization_id: self.data_parsed("organization_id")?,
            category: self.data_str("category")?.to_string(),
            key: self.data_str("key")?.to_string(),
        })
    }

    /// Decode the target of a SettingsCacheInvalidated event.
    pub fn invalidation_target(&self) -> Option<InvalidationTarget> {
        serde_json::from_value(Value::Object(self.data.clone())).ok()
    }
}

/// What a bulk cache eviction applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "dimension", rename_all = "snake_case")]
pub enum InvalidationTarget {
    Organization { organization_id: OrganizationId },
    Service { service: ServiceName },
    Pattern { pattern: String },
    All,
}

impl fmt::Display for InvalidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationTarget::Organization { organization_id } => {
                write!(f, "organization:{organization_id}")
            }
            InvalidationTarget::Service { service } => write!(f, "service:{service}"),
            InvalidationTarget::Pattern { pattern } => write!(f, "pattern:{pattern}"),
            InvalidationTarget::All => f.write_str("all"),
        }
    }
}

/// Scope fields every Configuration and FeatureFlag event carries.
pub(crate) fn scope_data(scope: &ScopeKey) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("key".into(), Value::from(scope.key()));
    data.insert("environment".into(), Value::from(scope.environment().as_str()));
    data.insert(
        "organization_id".into(),
        scope
            .organization_id()
            .map(|org| Value::from(org.to_string()))
            .unwrap_or(Value::Null),
    );
    data.insert(
        "service".into(),
        scope
            .service()
            .map(|svc| Value::from(svc.as_str()))
            .unwrap_or(Value::Null),
    );
    data
}

pub(crate) fn preference_data(scope: &PreferenceScope) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("user_id".into(), Value::from(scope.user_id.to_string()));
    data.insert(
        "organization_id".into(),
        scope
            .organization_id
            .map(|org| Value::from(org.to_string()))
            .unwrap_or(Value::Null),
    );
    data.insert("category".into(), Value::from(scope.category.as_str()));
    data.insert("key".into(), Value::from(scope.key.as_str()));
    data
}

pub(crate) fn organization_setting_data(scope: &OrganizationSettingScope) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert(
        "organization_id".into(),
        Value::from(scope.organization_id.to_string()),
    );
    data.insert("category".into(), Value::from(scope.category.as_str()));
    data.insert("key".into(), Value::from(scope.key.as_str()));
    data
}
