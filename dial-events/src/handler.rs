use async_trait::async_trait;
use dial_core::{DialResult, DomainEvent};

/// Receives events delivered to one durable consumer.
///
/// The same event may arrive more than once and out of order relative to
/// other subjects. An `Err` is logged by the consumer and the message is
/// acknowledged anyway, so handlers must be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> DialResult<()>;
}
