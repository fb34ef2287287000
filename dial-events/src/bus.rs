//! Event bus contract and the broker-backed implementation.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dial_core::{DialError, DialResult, DomainEvent, EventType, ValidationError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::InMemoryBroker;
use crate::consumer::{run_consumer, ConsumerConfig, ConsumerMetrics, ConsumerSnapshot, ConsumerTask};
use crate::handler::EventHandler;
use crate::subject::{durable_name, stream_name, subject_for, StreamConfig};

/// Durable, at-least-once pub/sub for domain events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one event to its fixed subject. Returns once the broker has
    /// stored it.
    async fn publish(&self, event: &DomainEvent) -> DialResult<()>;

    /// Publish in order, stopping at the first failure. Events before the
    /// failure stay published.
    async fn publish_batch(&self, events: &[DomainEvent]) -> DialResult<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }

    /// Start a named durable consumer for `event_type` that feeds `handler`.
    async fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> DialResult<()>;

    /// Stop the consumer task for `event_type`. The durable cursor is kept.
    async fn unsubscribe(&self, event_type: &EventType) -> DialResult<()>;

    async fn health_check(&self) -> DialResult<()>;

    /// Drain and stop every consumer, then refuse further calls.
    async fn close(&self) -> DialResult<()>;
}

struct Subscription {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    metrics: Arc<ConsumerMetrics>,
}

impl Subscription {
    async fn stop(self, event_type: &EventType) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(event_type = %event_type, error = %e, "Event consumer task ended abnormally");
        }
    }
}

/// One service instance's connection to an [`InMemoryBroker`].
///
/// Instances that share a broker see each other's events. Closing a bus
/// stops its own consumers and leaves the broker running.
pub struct BrokerEventBus {
    broker: InMemoryBroker,
    config: ConsumerConfig,
    subscriptions: DashMap<EventType, Subscription>,
    closed: AtomicBool,
}

impl BrokerEventBus {
    /// Connect and create any routed stream that does not exist yet.
    pub fn connect(broker: InMemoryBroker, config: ConsumerConfig) -> DialResult<Self> {
        for stream in StreamConfig::routed() {
            let name = stream.name.clone();
            if broker.add_stream(stream)? {
                tracing::info!(stream = %name, "Created event stream");
            }
        }
        Ok(Self {
            broker,
            config,
            subscriptions: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    pub fn subscribed(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.subscriptions.iter().map(|s| s.key().clone()).collect();
        types.sort();
        types
    }

    pub fn consumer_metrics(&self, event_type: &EventType) -> Option<ConsumerSnapshot> {
        self.subscriptions
            .get(event_type)
            .map(|s| s.metrics.snapshot())
    }

    fn ensure_open(&self) -> DialResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(DialError::unavailable("event bus", "closed"))
        } else {
            Ok(())
        }
    }

    fn start_consumer(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> DialResult<()> {
        let slot = match self.subscriptions.entry(event_type.clone()) {
            Entry::Occupied(_) => {
                return Err(ValidationError::constraint(
                    "subscription",
                    format!("already subscribed to {event_type}"),
                )
                .into());
            }
            Entry::Vacant(slot) => slot,
        };

        let stream = stream_name(event_type.family());
        let durable = durable_name(&self.config.consumer_prefix, &event_type);
        let subject = subject_for(&event_type);
        self.broker
            .ensure_consumer(&stream, &durable, &subject, self.config.ack_wait)?;

        let metrics = Arc::new(ConsumerMetrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_consumer(
            ConsumerTask {
                broker: self.broker.clone(),
                stream,
                durable,
                event_type,
                handler,
                config: self.config.clone(),
                metrics: metrics.clone(),
            },
            shutdown_rx,
        ));

        slot.insert(Subscription {
            shutdown_tx,
            task,
            metrics,
        });
        Ok(())
    }
}

#[async_trait]
impl EventBus for BrokerEventBus {
    async fn publish(&self, event: &DomainEvent) -> DialResult<()> {
        self.ensure_open()?;
        let subject = subject_for(&event.event_type);
        let sequence = self.broker.publish(&subject, event.to_json()?)?;
        tracing::debug!(
            event_type = %event.event_type,
            event_id = %event.event_id,
            subject = %subject,
            sequence,
            "Published event"
        );
        Ok(())
    }

    async fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> DialResult<()> {
        self.ensure_open()?;
        self.start_consumer(event_type, handler)
    }

    async fn unsubscribe(&self, event_type: &EventType) -> DialResult<()> {
        if let Some((event_type, subscription)) = self.subscriptions.remove(event_type) {
            subscription.stop(&event_type).await;
        }
        Ok(())
    }

    async fn health_check(&self) -> DialResult<()> {
        self.ensure_open()?;
        self.broker.health_check()
    }

    async fn close(&self) -> DialResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let types: Vec<EventType> = self.subscriptions.iter().map(|s| s.key().clone()).collect();
        let stopped = types.len();
        for event_type in types {
            if let Some((event_type, subscription)) = self.subscriptions.remove(&event_type) {
                subscription.stop(&event_type).await;
            }
        }
        tracing::info!(consumers = stopped, "Event bus closed");
        Ok(())
    }
}
