//! Per-call deadlines for store and bus operations.

use dial_core::{DialResult, InfrastructureError};
use std::future::Future;
use std::time::Duration;

/// Run `future` under `timeout`. An elapsed deadline becomes
/// `InfrastructureError::Timeout` naming `operation`.
pub async fn within<T, F>(timeout: Duration, operation: &str, future: F) -> DialResult<T>
where
    F: Future<Output = DialResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "Operation deadline elapsed"
            );
            Err(InfrastructureError::Timeout {
                operation: operation.to_string(),
                after: timeout,
            }
            .into())
        }
    }
}
