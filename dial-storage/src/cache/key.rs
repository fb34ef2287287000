//! Canonical cache key grammar and wildcard patterns.
//!
//! Keys are colon-separated and every absent dimension is the literal `nil`,
//! so a global row and an organization override never share a key:
//!
//! ```text
//! {prefix}:{entity}:{key}:env:{ENV}:org:{org|nil}:svc:{svc|nil}
//! {prefix}:user-preference:{user}:cat:{category}:key:{key}:org:{org|nil}
//! {prefix}:organization-setting:{org}:cat:{category}:key:{key}
//! ```

use dial_core::{
    Environment, OrganizationId, OrganizationSettingScope, PreferenceScope, ScopeKey,
    ServiceName, UserId,
};
use std::fmt;

pub const CONFIGURATION_ENTITY: &str = "config";
pub const FEATURE_FLAG_ENTITY: &str = "feature-flag";
pub const USER_PREFERENCE_ENTITY: &str = "user-preference";
pub const ORGANIZATION_SETTING_ENTITY: &str = "organization-setting";

const NIL: &str = "nil";

fn or_nil<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| NIL.to_string(), |v| v.to_string())
}

/// Builds keys and patterns under one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key for a Configuration or FeatureFlag.
    pub fn scope(&self, entity: &str, scope: &ScopeKey) -> String {
        format!(
            "{}:{}:{}:env:{}:org:{}:svc:{}",
            self.prefix,
            entity,
            scope.key(),
            scope.environment(),
            or_nil(scope.organization_id()),
            or_nil(scope.service()),
        )
    }

    pub fn preference(&self, scope: &PreferenceScope) -> String {
        format!(
            "{}:{}:{}:cat:{}:key:{}:org:{}",
            self.prefix,
            USER_PREFERENCE_ENTITY,
            scope.user_id,
            scope.category,
            scope.key,
            or_nil(scope.organization_id),
        )
    }

    pub fn organization_setting(&self, scope: &OrganizationSettingScope) -> String {
        format!(
            "{}:{}:{}:cat:{}:key:{}",
            self.prefix, ORGANIZATION_SETTING_ENTITY, scope.organization_id, scope.category, scope.key,
        )
    }

    /// Every key of `entity` within one `(environment, organization, service)` triple.
    pub fn scope_dimension(
        &self,
        entity: &str,
        environment: Environment,
        organization_id: Option<OrganizationId>,
        service: Option<&ServiceName>,
    ) -> KeyPattern {
        KeyPattern::new(format!(
            "{}:{}:*:env:{}:org:{}:svc:{}",
            self.prefix,
            entity,
            environment,
            or_nil(organization_id),
            or_nil(service),
        ))
    }

    /// Every scoped key bound to `service`.
    pub fn service(&self, service: &ServiceName) -> KeyPattern {
        KeyPattern::new(format!("{}:*:svc:{}", self.prefix, service))
    }

    /// Every key shape that names `organization_id`.
    pub fn organization(&self, organization_id: OrganizationId) -> [KeyPattern; 3] {
        [
            KeyPattern::new(format!("{}:*:org:{}:*", self.prefix, organization_id)),
            KeyPattern::new(format!("{}:*:org:{}", self.prefix, organization_id)),
            self.organization_settings(organization_id),
        ]
    }

    pub fn user(&self, user_id: UserId, organization_id: Option<OrganizationId>) -> KeyPattern {
        KeyPattern::new(format!(
            "{}:{}:{}:*:org:{}",
            self.prefix,
            USER_PREFERENCE_ENTITY,
            user_id,
            or_nil(organization_id),
        ))
    }

    pub fn organization_settings(&self, organization_id: OrganizationId) -> KeyPattern {
        KeyPattern::new(format!(
            "{}:{}:{}:*",
            self.prefix, ORGANIZATION_SETTING_ENTITY, organization_id
        ))
    }

    pub fn all(&self) -> KeyPattern {
        KeyPattern::new(format!("{}:*", self.prefix))
    }

    /// Parse an externally supplied pattern. Only patterns rooted in this
    /// prefix are accepted.
    pub fn scoped_pattern(&self, pattern: &str) -> Option<KeyPattern> {
        pattern
            .strip_prefix(self.prefix.as_str())
            .filter(|rest| rest.starts_with(':'))
            .map(|_| KeyPattern::new(pattern))
    }
}

/// Glob over cache keys where `*` matches any run of characters, colons included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPattern(String);

impl KeyPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, key: &str) -> bool {
        let pattern = self.0.as_bytes();
        let key = key.as_bytes();
        let (mut p, mut k) = (0, 0);
        // position of the last `*` and the key index it was tried at
        let mut backtrack: Option<(usize, usize)> = None;

        while k < key.len() {
            if p < pattern.len() && pattern[p] == b'*' {
                backtrack = Some((p, k));
                p += 1;
            } else if p < pattern.len() && pattern[p] == key[k] {
                p += 1;
                k += 1;
            } else if let Some((star, tried)) = backtrack {
                p = star + 1;
                k = tried + 1;
                backtrack = Some((star, tried + 1));
            } else {
                return false;
            }
        }

        pattern[p..].iter().all(|&b| b == b'*')
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}
