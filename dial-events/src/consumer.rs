//! Pull-consumer background task.
//!
//! One task per subscribed event type. Each iteration pulls a bounded batch
//! from the durable consumer, hands every message to the handler and
//! acknowledges it regardless of the outcome. Undecodable payloads are
//! acknowledged too.

use dial_core::{DomainEvent, EventType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::broker::{InMemoryBroker, Message};
use crate::handler::EventHandler;
use crate::subject::SERVICE_NAME;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_WAIT_MS: u64 = 1000;
pub const DEFAULT_ACK_WAIT_SECS: u64 = 30;

/// Configuration for durable pull consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Maximum messages pulled per fetch.
    pub batch_size: usize,

    /// Long-poll window of one fetch; also the backoff after a failed fetch.
    pub max_wait: Duration,

    /// Delivered but unacknowledged messages are redelivered after this.
    pub ack_wait: Duration,

    /// Durable name prefix. Instances that must each see every event need
    /// distinct prefixes; instances sharing one load-balance.
    pub consumer_prefix: String,
}

/// `settings-service-{uuid}`, unique per call.
pub fn instance_consumer_prefix() -> String {
    format!("{SERVICE_NAME}-{}", Uuid::now_v7())
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_wait: Duration::from_millis(DEFAULT_MAX_WAIT_MS),
            ack_wait: Duration::from_secs(DEFAULT_ACK_WAIT_SECS),
            consumer_prefix: instance_consumer_prefix(),
        }
    }
}

impl ConsumerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `DIAL_CONSUMER_BATCH_SIZE`: Messages per fetch (default: 10)
    /// - `DIAL_CONSUMER_MAX_WAIT_MS`: Fetch long-poll window (default: 1000)
    /// - `DIAL_CONSUMER_ACK_WAIT_SECS`: Redelivery delay for unacked messages (default: 30)
    /// - `DIAL_CONSUMER_PREFIX`: Durable name prefix, shared by instances that
    ///   should load-balance (default: `settings-service-{uuid}` per instance)
    pub fn from_env() -> Self {
        let batch_size = std::env::var("DIAL_CONSUMER_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BATCH_SIZE);

        let max_wait = Duration::from_millis(
            std::env::var("DIAL_CONSUMER_MAX_WAIT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_WAIT_MS),
        );

        let ack_wait = Duration::from_secs(
            std::env::var("DIAL_CONSUMER_ACK_WAIT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ACK_WAIT_SECS),
        );

        let consumer_prefix = std::env::var("DIAL_CONSUMER_PREFIX")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(instance_consumer_prefix);

        Self {
            batch_size,
            max_wait,
            ack_wait,
            consumer_prefix,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_consumer_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.consumer_prefix = prefix.into();
        self
    }
}

/// Counters for one consumer task.
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Fetches that returned at least one message
    pub batches_fetched: AtomicU64,

    /// Messages handed to the handler or dropped as undecodable
    pub messages_received: AtomicU64,

    /// Handler calls that returned an error
    pub handler_failures: AtomicU64,

    /// Payloads that were not a valid event envelope
    pub decode_failures: AtomicU64,

    pub messages_acked: AtomicU64,

    /// Fetch or ack calls the broker rejected
    pub broker_errors: AtomicU64,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            batches_fetched: self.batches_fetched.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            messages_acked: self.messages_acked.load(Ordering::Relaxed),
            broker_errors: self.broker_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of consumer metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerSnapshot {
    pub batches_fetched: u64,
    pub messages_received: u64,
    pub handler_failures: u64,
    pub decode_failures: u64,
    pub messages_acked: u64,
    pub broker_errors: u64,
}

/// Everything one consumer task needs.
pub(crate) struct ConsumerTask {
    pub broker: InMemoryBroker,
    pub stream: String,
    pub durable: String,
    pub event_type: EventType,
    pub handler: Arc<dyn EventHandler>,
    pub config: ConsumerConfig,
    pub metrics: Arc<ConsumerMetrics>,
}

/// Pull, handle and ack until the shutdown signal fires. A batch already
/// pulled is always drained before the signal is observed.
pub(crate) async fn run_consumer(task: ConsumerTask, mut shutdown_rx: watch::Receiver<bool>) {
    let period = task.config.max_wait.max(Duration::from_millis(1));
    let mut backoff = interval_at(Instant::now() + period, period);
    backoff.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        event_type = %task.event_type,
        stream = %task.stream,
        consumer = %task.durable,
        batch_size = task.config.batch_size,
        "Event consumer started"
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!(consumer = %task.durable, "Event consumer shutting down");
                    break;
                }
            }

            fetched = task.broker.fetch(
                &task.stream,
                &task.durable,
                task.config.batch_size,
                task.config.max_wait,
            ) => {
                match fetched {
                    Ok(messages) if messages.is_empty() => {}
                    Ok(messages) => {
                        task.metrics.batches_fetched.fetch_add(1, Ordering::Relaxed);
                        for message in messages {
                            process(&task, message).await;
                        }
                    }
                    Err(e) => {
                        task.metrics.broker_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            consumer = %task.durable,
                            error = %e,
                            "Event fetch failed"
                        );
                        tokio::select! {
                            _ = shutdown_rx.changed() => {}
                            _ = backoff.tick() => {}
                        }
                    }
                }
            }
        }
    }

    let snapshot = task.metrics.snapshot();
    tracing::info!(
        event_type = %task.event_type,
        consumer = %task.durable,
        messages_received = snapshot.messages_received,
        handler_failures = snapshot.handler_failures,
        messages_acked = snapshot.messages_acked,
        "Event consumer stopped"
    );
}

async fn process(task: &ConsumerTask, message: Message) {
    task.metrics.messages_received.fetch_add(1, Ordering::Relaxed);

    match DomainEvent::from_json(&message.payload) {
        Ok(event) => {
            if let Err(e) = task.handler.handle(&event).await {
                task.metrics.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    delivery = message.delivery_count,
                    error = %e,
                    "Event handler failed"
                );
            }
        }
        Err(e) => {
            task.metrics.decode_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                subject = %message.subject,
                sequence = message.sequence,
                error = %e,
                "Dropping undecodable event"
            );
        }
    }

    match task.broker.ack(&message) {
        Ok(()) => {
            task.metrics.messages_acked.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            task.metrics.broker_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                consumer = %task.durable,
                sequence = message.sequence,
                error = %e,
                "Ack failed; message will be redelivered"
            );
        }
    }
}
