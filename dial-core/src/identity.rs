//! Identity types for dial aggregates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new UUIDv7 identifier (timestamp-sortable).
            pub fn now_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() {
                    return Err(ValidationError::required($label));
                }
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ValidationError::invalid($label, e.to_string()))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

typed_id!(
    /// Identity of a Configuration aggregate.
    ConfigurationId,
    "configuration_id"
);
typed_id!(
    /// Identity of a FeatureFlag aggregate.
    FeatureFlagId,
    "feature_flag_id"
);
typed_id!(
    /// Identity of a UserPreference aggregate.
    UserPreferenceId,
    "user_preference_id"
);
typed_id!(
    /// Identity of an OrganizationSetting aggregate.
    OrganizationSettingId,
    "organization_setting_id"
);
typed_id!(OrganizationId, "organization_id");
typed_id!(
    /// Acting principal or preference owner.
    UserId,
    "user_id"
);

impl UserId {
    /// Reject the nil user, which stands in for "nobody".
    pub fn require(&self, field: &str) -> Result<(), ValidationError> {
        if self.is_nil() {
            Err(ValidationError::required(field))
        } else {
            Ok(())
        }
    }
}

/// Aggregate family discriminator, used in events, routing and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateType {
    Configuration,
    FeatureFlag,
    UserPreference,
    OrganizationSetting,
}

impl AggregateType {
    pub const ALL: [AggregateType; 4] = [
        AggregateType::Configuration,
        AggregateType::FeatureFlag,
        AggregateType::UserPreference,
        AggregateType::OrganizationSetting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Configuration => "Configuration",
            AggregateType::FeatureFlag => "FeatureFlag",
            AggregateType::UserPreference => "UserPreference",
            AggregateType::OrganizationSetting => "OrganizationSetting",
        }
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_id_roundtrips_through_string() {
        let id = ConfigurationId::now_v7();
        let parsed: ConfigurationId = id.to_string().parse().expect("parse should succeed");
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_typed_id_rejects_garbage() {
        assert_eq!(
            "".parse::<OrganizationId>(),
            Err(ValidationError::required("organization_id"))
        );
        assert!(matches!(
            "not-a-uuid".parse::<UserId>(),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_nil_user_is_rejected() {
        let nobody = UserId::from_uuid(Uuid::nil());
        assert!(nobody.require("updated_by").is_err());
        assert!(UserId::now_v7().require("updated_by").is_ok());
    }

    #[test]
    fn test_typed_id_serializes_transparently() {
        let id = FeatureFlagId::from_uuid(Uuid::nil());
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }
}
