//! In-process durable stream broker.
//!
//! Streams capture published messages by subject filter and keep them for
//! their `max_age`. A durable consumer owns a cursor plus the set of
//! delivered but unacknowledged sequences; an unacknowledged message is
//! redelivered once its `ack_wait` elapses. Consumers live as long as the
//! broker, so resubscribing under the same durable name resumes from the
//! stored cursor.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dial_core::{DialError, DialResult, ValidationError};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::subject::{subject_matches, StreamConfig};

const COMPONENT: &str = "broker";

/// A delivered message. Acknowledge it with [`InMemoryBroker::ack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub stream: String,
    pub consumer: String,
    pub subject: String,
    pub sequence: u64,
    pub payload: Vec<u8>,
    /// 1 on first delivery.
    pub delivery_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub name: String,
    pub messages: usize,
    pub last_sequence: u64,
    pub consumers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub name: String,
    pub filter_subject: String,
    /// Highest stream sequence the cursor has passed.
    pub delivered_sequence: u64,
    pub ack_pending: usize,
}

#[derive(Debug)]
struct StoredMessage {
    sequence: u64,
    subject: String,
    payload: Vec<u8>,
    published_at: Instant,
}

#[derive(Debug)]
struct Delivery {
    delivered_at: Instant,
    count: u32,
}

#[derive(Debug)]
struct DurableConsumer {
    filter_subject: String,
    ack_wait: Duration,
    cursor: u64,
    pending: BTreeMap<u64, Delivery>,
}

#[derive(Debug)]
struct Stream {
    config: StreamConfig,
    messages: VecDeque<StoredMessage>,
    last_sequence: u64,
    consumers: HashMap<String, DurableConsumer>,
}

impl Stream {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            messages: VecDeque::new(),
            last_sequence: 0,
            consumers: HashMap::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.messages.front() {
            if now.duration_since(front.published_at) < self.config.max_age {
                break;
            }
            self.messages.pop_front();
        }
    }

    fn pull(&mut self, durable: &str, batch: usize, now: Instant) -> DialResult<Vec<Message>> {
        self.prune(now);
        let Stream {
            config,
            messages,
            consumers,
            ..
        } = self;
        let consumer = consumers.get_mut(durable).ok_or_else(|| {
            DialError::unavailable(
                COMPONENT,
                format!("consumer {durable} not found on stream {}", config.name),
            )
        })?;
        let messages = &*messages;
        let config = &*config;

        let find = move |sequence: u64| {
            messages
                .binary_search_by_key(&sequence, |m| m.sequence)
                .ok()
                .and_then(|index| messages.get(index))
        };
        let deliver = move |stored: &StoredMessage, count: u32| Message {
            stream: config.name.clone(),
            consumer: durable.to_string(),
            subject: stored.subject.clone(),
            sequence: stored.sequence,
            payload: stored.payload.clone(),
            delivery_count: count,
        };

        let mut out = Vec::new();

        // expired deliveries first, oldest sequence first
        let mut dropped = Vec::new();
        for (sequence, delivery) in consumer.pending.iter_mut() {
            if out.len() == batch {
                break;
            }
            if now.duration_since(delivery.delivered_at) < consumer.ack_wait {
                continue;
            }
            match find(*sequence) {
                Some(stored) => {
                    delivery.delivered_at = now;
                    delivery.count += 1;
                    out.push(deliver(stored, delivery.count));
                }
                None => dropped.push(*sequence),
            }
        }
        for sequence in dropped {
            consumer.pending.remove(&sequence);
        }

        let start = consumer.cursor;
        for stored in messages.iter().filter(|m| m.sequence > start) {
            if out.len() == batch {
                break;
            }
            consumer.cursor = stored.sequence;
            if subject_matches(&consumer.filter_subject, &stored.subject) {
                consumer.pending.insert(
                    stored.sequence,
                    Delivery {
                        delivered_at: now,
                        count: 1,
                    },
                );
                out.push(deliver(stored, 1));
            }
        }

        Ok(out)
    }
}

#[derive(Debug, Default)]
struct Inner {
    streams: DashMap<String, Stream>,
    closed: AtomicBool,
    published: Notify,
}

/// Cloneable handle to one broker. Clones share streams and consumers, the
/// way several service instances share one broker cluster.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> DialResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(DialError::unavailable(COMPONENT, "connection closed"))
        } else {
            Ok(())
        }
    }

    /// Create `config` unless a stream with that name exists. Returns whether
    /// a stream was created.
    pub fn add_stream(&self, config: StreamConfig) -> DialResult<bool> {
        self.ensure_open()?;
        if config.name.trim().is_empty() {
            return Err(ValidationError::required("stream name").into());
        }
        if config.subjects.is_empty() {
            return Err(ValidationError::required("stream subjects").into());
        }
        match self.inner.streams.entry(config.name.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Stream::new(config));
                Ok(true)
            }
        }
    }

    /// Create the durable consumer if it does not exist. An existing consumer
    /// keeps its cursor and pending set.
    pub fn ensure_consumer(
        &self,
        stream: &str,
        durable: &str,
        filter_subject: &str,
        ack_wait: Duration,
    ) -> DialResult<()> {
        self.ensure_open()?;
        let mut entry = self.inner.streams.get_mut(stream).ok_or_else(|| {
            DialError::unavailable(COMPONENT, format!("stream {stream} not found"))
        })?;
        entry
            .consumers
            .entry(durable.to_string())
            .or_insert_with(|| DurableConsumer {
                filter_subject: filter_subject.to_string(),
                ack_wait,
                cursor: 0,
                pending: BTreeMap::new(),
            });
        Ok(())
    }

    /// Append to the stream whose subjects capture `subject`. Returns the
    /// assigned stream sequence.
    pub fn publish(&self, subject: &str, payload: Vec<u8>) -> DialResult<u64> {
        self.ensure_open()?;
        let now = Instant::now();
        let sequence = {
            let mut stream = self
                .inner
                .streams
                .iter_mut()
                .find(|s| s.config.captures(subject))
                .ok_or_else(|| {
                    DialError::unavailable(
                        COMPONENT,
                        format!("no stream captures subject {subject}"),
                    )
                })?;
            stream.prune(now);
            stream.last_sequence += 1;
            let sequence = stream.last_sequence;
            stream.messages.push_back(StoredMessage {
                sequence,
                subject: subject.to_string(),
                payload,
                published_at: now,
            });
            sequence
        };
        self.inner.published.notify_waiters();
        Ok(sequence)
    }

    fn pull(&self, stream: &str, durable: &str, batch: usize) -> DialResult<Vec<Message>> {
        self.ensure_open()?;
        let mut entry = self.inner.streams.get_mut(stream).ok_or_else(|| {
            DialError::unavailable(COMPONENT, format!("stream {stream} not found"))
        })?;
        entry.pull(durable, batch, Instant::now())
    }

    /// Pull up to `batch` messages, waiting at most `max_wait` for the first
    /// one. An empty batch means the wait elapsed.
    pub async fn fetch(
        &self,
        stream: &str,
        durable: &str,
        batch: usize,
        max_wait: Duration,
    ) -> DialResult<Vec<Message>> {
        let deadline = Instant::now() + max_wait;
        loop {
            let published = self.inner.published.notified();
            let messages = self.pull(stream, durable, batch.max(1))?;
            if !messages.is_empty() {
                return Ok(messages);
            }
            if tokio::time::timeout_at(deadline, published).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    /// Acknowledge a delivery. Acknowledging twice is a no-op.
    pub fn ack(&self, message: &Message) -> DialResult<()> {
        self.ensure_open()?;
        if let Some(mut stream) = self.inner.streams.get_mut(&message.stream) {
            if let Some(consumer) = stream.consumers.get_mut(&message.consumer) {
                consumer.pending.remove(&message.sequence);
            }
        }
        Ok(())
    }

    pub fn stream_info(&self, stream: &str) -> Option<StreamInfo> {
        self.inner.streams.get(stream).map(|s| StreamInfo {
            name: s.config.name.clone(),
            messages: s.messages.len(),
            last_sequence: s.last_sequence,
            consumers: s.consumers.len(),
        })
    }

    pub fn consumer_info(&self, stream: &str, durable: &str) -> Option<ConsumerInfo> {
        let stream = self.inner.streams.get(stream)?;
        stream.consumers.get(durable).map(|c| ConsumerInfo {
            name: durable.to_string(),
            filter_subject: c.filter_subject.clone(),
            delivered_sequence: c.cursor,
            ack_pending: c.pending.len(),
        })
    }

    pub fn health_check(&self) -> DialResult<()> {
        self.ensure_open()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Fail every later call and wake pending fetches.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.published.notify_waiters();
    }
}
