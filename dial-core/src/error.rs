//! Error types for dial operations

use crate::AggregateType;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Validation errors. Never retried, surfaced to the caller as a client error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        Self::RequiredFieldMissing {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn constraint(constraint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            constraint: constraint.into(),
            reason: reason.into(),
        }
    }
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Aggregate not found: {aggregate_type} with id {id}")]
    NotFound {
        aggregate_type: AggregateType,
        id: Uuid,
    },

    #[error("{aggregate_type} already exists for scope {scope}")]
    AlreadyExists {
        aggregate_type: AggregateType,
        scope: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Serialization failed for {aggregate_type}: {reason}")]
    Serialization {
        aggregate_type: AggregateType,
        reason: String,
    },
}

/// Transport-level failures of the store, cache or broker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InfrastructureError {
    #[error("Operation {operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("{component} unavailable: {reason}")]
    Unavailable { component: String, reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Master error type for all dial errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DialError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] InfrastructureError),
}

/// Coarse classification used for retry decisions and client-facing codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Infrastructure,
}

impl DialError {
    pub fn not_found(aggregate_type: AggregateType, id: Uuid) -> Self {
        StorageError::NotFound { aggregate_type, id }.into()
    }

    pub fn unavailable(component: impl Into<String>, reason: impl Into<String>) -> Self {
        InfrastructureError::Unavailable {
            component: component.into(),
            reason: reason.into(),
        }
        .into()
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DialError::Validation(_) => ErrorKind::Validation,
            DialError::Storage(StorageError::NotFound { .. }) => ErrorKind::NotFound,
            DialError::Storage(StorageError::AlreadyExists { .. }) => ErrorKind::Conflict,
            DialError::Storage(_) | DialError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }

    /// Whether a caller may retry with backoff (reload-and-retry for NotFound).
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Infrastructure | ErrorKind::NotFound)
    }
}

/// Result type alias for dial operations.
pub type DialResult<T> = Result<T, DialError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            aggregate_type: AggregateType::Configuration,
            id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Aggregate not found"));
        assert!(msg.contains("Configuration"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::required("updated_by");
        assert_eq!(format!("{}", err), "Required field missing: updated_by");

        let err = ValidationError::TypeMismatch {
            expected: "NUMBER".to_string(),
            actual: "string".to_string(),
        };
        assert!(format!("{}", err).contains("expected NUMBER"));
    }

    #[test]
    fn test_timeout_display() {
        let err = InfrastructureError::Timeout {
            operation: "store.save".to_string(),
            after: Duration::from_millis(250),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("store.save"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_error_kind_classification() {
        let validation: DialError = ValidationError::required("key").into();
        assert_eq!(validation.kind(), ErrorKind::Validation);
        assert!(!validation.is_retryable());

        let missing = DialError::not_found(AggregateType::FeatureFlag, Uuid::nil());
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert!(missing.is_retryable());

        let conflict: DialError = StorageError::AlreadyExists {
            aggregate_type: AggregateType::Configuration,
            scope: "db.host".to_string(),
        }
        .into();
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert!(!conflict.is_retryable());

        let poisoned: DialError = StorageError::LockPoisoned.into();
        assert_eq!(poisoned.kind(), ErrorKind::Infrastructure);

        let down = DialError::unavailable("broker", "connection refused");
        assert_eq!(down.kind(), ErrorKind::Infrastructure);
        assert!(down.is_retryable());
    }
}
