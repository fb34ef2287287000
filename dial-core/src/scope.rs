//! Scope dimensions that address a setting.
//!
//! A [`ScopeKey`] is the canonical identity shared by the store's unique
//! index, the cache key grammar and flag evaluation. An absent organization
//! or service is its own "global" value and never acts as a wildcard.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::identity::{OrganizationId, UserId};

static SERVICE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,100}$").expect("Invalid service name regex"));

/// Deployment environment a setting applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Environment {
    Development,
    Staging,
    Production,
    Testing,
}

impl Environment {
    pub const ALL: [Environment; 4] = [
        Environment::Development,
        Environment::Staging,
        Environment::Production,
        Environment::Testing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "DEVELOPMENT",
            Environment::Staging => "STAGING",
            Environment::Production => "PRODUCTION",
            Environment::Testing => "TESTING",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEVELOPMENT" => Ok(Environment::Development),
            "STAGING" => Ok(Environment::Staging),
            "PRODUCTION" => Ok(Environment::Production),
            "TESTING" => Ok(Environment::Testing),
            other => Err(ValidationError::invalid(
                "environment",
                format!("unknown environment {other:?}"),
            )),
        }
    }
}

/// Name of the service that owns a setting. Normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    pub fn parse(name: &str) -> Result<Self, ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::required("service"));
        }
        if !SERVICE_NAME_PATTERN.is_match(name) {
            return Err(ValidationError::invalid(
                "service",
                "must match [A-Za-z0-9_-]{1,100}",
            ));
        }
        Ok(Self(name.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServiceName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ServiceName> for String {
    fn from(name: ServiceName) -> Self {
        name.0
    }
}

/// Composite identity of a Configuration or FeatureFlag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ScopeKeyRecord")]
pub struct ScopeKey {
    key: String,
    environment: Environment,
    organization_id: Option<OrganizationId>,
    service: Option<ServiceName>,
}

/// Wire form of [`ScopeKey`], validated on the way in.
#[derive(Deserialize)]
struct ScopeKeyRecord {
    key: String,
    environment: Environment,
    organization_id: Option<OrganizationId>,
    service: Option<ServiceName>,
}

impl TryFrom<ScopeKeyRecord> for ScopeKey {
    type Error = ValidationError;

    fn try_from(record: ScopeKeyRecord) -> Result<Self, Self::Error> {
        Ok(ScopeKey::new(record.key, record.environment)?
            .scoped(record.organization_id, record.service))
    }
}

impl ScopeKey {
    pub fn new(key: impl Into<String>, environment: Environment) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::required("key"));
        }
        Ok(Self {
            key,
            environment,
            organization_id: None,
            service: None,
        })
    }

    pub fn with_organization(mut self, organization_id: OrganizationId) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn with_service(mut self, service: ServiceName) -> Self {
        self.service = Some(service);
        self
    }

    /// Set both optional dimensions at once, keeping `None` as the global value.
    pub fn scoped(
        mut self,
        organization_id: Option<OrganizationId>,
        service: Option<ServiceName>,
    ) -> Self {
        self.organization_id = organization_id;
        self.service = service;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn service(&self) -> Option<&ServiceName> {
        self.service.as_ref()
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.environment)?;
        match self.organization_id {
            Some(org) => write!(f, "/org:{org}")?,
            None => f.write_str("/org:nil")?,
        }
        match &self.service {
            Some(svc) => write!(f, "/svc:{svc}"),
            None => f.write_str("/svc:nil"),
        }
    }
}

/// Identity of a UserPreference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreferenceScope {
    pub user_id: UserId,
    pub organization_id: Option<OrganizationId>,
    pub category: String,
    pub key: String,
}

impl fmt::Display for PreferenceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.category, self.key)?;
        match self.organization_id {
            Some(org) => write!(f, "/org:{org}"),
            None => f.write_str("/org:nil"),
        }
    }
}

/// Identity of an OrganizationSetting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganizationSettingScope {
    pub organization_id: OrganizationId,
    pub category: String,
    pub key: String,
}

impl fmt::Display for OrganizationSettingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.organization_id, self.category, self.key)
    }
}
