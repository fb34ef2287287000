//! Client-facing error codes.
//!
//! Validation, not-found and conflict errors keep their message. Every
//! infrastructure error collapses to `SERVICE_UNAVAILABLE` with a fixed
//! message; the cause is logged here and never returned.

use dial_core::{DialError, ErrorKind, StorageError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const UNAVAILABLE_MESSAGE: &str = "service unavailable, retry later";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Required field is missing
    MissingField,

    /// Value does not match the declared type
    TypeMismatch,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Aggregate or scope does not exist, or a concurrent writer won
    EntityNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Another aggregate already holds the scope
    EntityAlreadyExists,

    // ========================================================================
    // Server Errors (503)
    // ========================================================================
    /// Store, cache or broker failure
    ServiceUnavailable,
}

impl ErrorCode {
    /// HTTP-equivalent status for this code.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::MissingField | ErrorCode::TypeMismatch => 400,
            ErrorCode::EntityNotFound => 404,
            ErrorCode::EntityAlreadyExists => 409,
            ErrorCode::ServiceUnavailable => 503,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::TypeMismatch => "Value type mismatch",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::EntityAlreadyExists => "Entity already exists",
            ErrorCode::ServiceUnavailable => UNAVAILABLE_MESSAGE,
        }
    }

    /// Whether the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::EntityNotFound | ErrorCode::ServiceUnavailable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error returned across the service boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }
}

impl From<DialError> for ServiceError {
    fn from(err: DialError) -> Self {
        match err.kind() {
            ErrorKind::Validation => {
                let code = match &err {
                    DialError::Validation(ValidationError::RequiredFieldMissing { .. }) => {
                        ErrorCode::MissingField
                    }
                    DialError::Validation(ValidationError::TypeMismatch { .. }) => {
                        ErrorCode::TypeMismatch
                    }
                    _ => ErrorCode::ValidationFailed,
                };
                let message = match err {
                    DialError::Validation(inner) => inner.to_string(),
                    other => other.to_string(),
                };
                ServiceError::new(code, message)
            }
            ErrorKind::NotFound | ErrorKind::Conflict => {
                let code = match &err {
                    DialError::Storage(StorageError::AlreadyExists { .. }) => {
                        ErrorCode::EntityAlreadyExists
                    }
                    _ => ErrorCode::EntityNotFound,
                };
                let message = match err {
                    DialError::Storage(inner) => inner.to_string(),
                    other => other.to_string(),
                };
                ServiceError::new(code, message)
            }
            ErrorKind::Infrastructure => {
                tracing::error!(error = %err, "Infrastructure failure");
                ServiceError::from_code(ErrorCode::ServiceUnavailable)
            }
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use dial_core::{AggregateType, InfrastructureError};
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::ServiceUnavailable).expect("serialize");
        assert_eq!(json, "\"SERVICE_UNAVAILABLE\"");
        let json = serde_json::to_string(&ErrorCode::EntityAlreadyExists).expect("serialize");
        assert_eq!(json, "\"ENTITY_ALREADY_EXISTS\"");
    }

    #[test]
    fn test_client_errors_keep_their_message() {
        let err: ServiceError = DialError::from(ValidationError::required("updated_by")).into();
        assert_eq!(err.code, ErrorCode::MissingField);
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.message, "Required field missing: updated_by");

        let err: ServiceError = DialError::not_found(AggregateType::FeatureFlag, Uuid::nil()).into();
        assert_eq!(err.code, ErrorCode::EntityNotFound);
        assert_eq!(err.status_code(), 404);
        assert!(err.message.contains("FeatureFlag"));

        let err: ServiceError = DialError::from(StorageError::AlreadyExists {
            aggregate_type: AggregateType::Configuration,
            scope: "db.host".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::EntityAlreadyExists);
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn test_infrastructure_cause_is_hidden() {
        let causes: Vec<DialError> = vec![
            InfrastructureError::Timeout {
                operation: "store.update".to_string(),
                after: Duration::from_millis(2000),
            }
            .into(),
            DialError::unavailable("broker", "connection refused at 10.0.0.7:4222"),
            StorageError::LockPoisoned.into(),
        ];
        for cause in causes {
            let err = ServiceError::from(cause);
            assert_eq!(err.code, ErrorCode::ServiceUnavailable);
            assert_eq!(err.status_code(), 503);
            assert_eq!(err.message, UNAVAILABLE_MESSAGE);
            assert!(err.code.is_retryable());
        }
    }
}
