//! DIAL Events - Durable Invalidation Propagation
//!
//! Domain events leave a service instance through an [`EventBus`] and reach
//! every other instance through named durable consumers. Delivery is
//! at-least-once: a consumer acknowledges a message whether or not its
//! handler succeeded, so handlers must be idempotent.
//!
//! ```text
//! publish ─► settings.{family}.{EventType} ─► SETTINGS_{FAMILY}_EVENTS
//!                                                  │
//!                         settings-service-{EventType}-consumer (pull, ack)
//!                                                  ▼
//!                                           EventHandler
//! ```

mod broker;
mod bus;
mod consumer;
mod handler;
pub mod subject;

pub use broker::{ConsumerInfo, InMemoryBroker, Message, StreamInfo};
pub use bus::{BrokerEventBus, EventBus};
pub use consumer::{instance_consumer_prefix, ConsumerConfig, ConsumerMetrics, ConsumerSnapshot};
pub use handler::EventHandler;
pub use subject::{consumer_name, durable_name, stream_name, subject_for, StorageType, StreamConfig};
