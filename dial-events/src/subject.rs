//! Subject and stream routing.
//!
//! Subjects are fixed per event type and never carry scope. Fan-out to the
//! affected cache keys happens inside the handler.

use dial_core::{EventFamily, EventType};
use std::time::Duration;

pub const SUBJECT_ROOT: &str = "settings";

/// Prefix of every durable consumer name.
pub const SERVICE_NAME: &str = "settings-service";

/// Retention window of every routed stream.
pub const STREAM_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// `settings.{family}.{EventType}`. Unknown types land under `settings.unknown`.
pub fn subject_for(event_type: &EventType) -> String {
    format!(
        "{}.{}.{}",
        SUBJECT_ROOT,
        event_type.family().segment(),
        event_type
    )
}

/// `SETTINGS_{FAMILY}_EVENTS`, e.g. `SETTINGS_FEATURE_FLAG_EVENTS`.
pub fn stream_name(family: EventFamily) -> String {
    format!(
        "SETTINGS_{}_EVENTS",
        family.segment().to_uppercase().replace('-', "_")
    )
}

/// `settings-service-{EventType}-consumer`.
pub fn consumer_name(event_type: &EventType) -> String {
    durable_name(SERVICE_NAME, event_type)
}

/// `{prefix}-{EventType}-consumer`. Consumers sharing a name share one
/// cursor and split the stream between them.
pub fn durable_name(prefix: &str, event_type: &EventType) -> String {
    format!("{prefix}-{event_type}-consumer")
}

/// Token-wise subject match. `*` matches exactly one token, a trailing `>`
/// matches one or more.
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return filter_tokens.next().is_none(),
            (Some("*"), Some(token)) => {
                if token.is_empty() {
                    return false;
                }
            }
            (Some(expected), Some(token)) => {
                if expected != token {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    File,
    Memory,
}

/// Durable stream definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub name: String,
    pub subjects: Vec<String>,
    pub max_age: Duration,
    pub storage: StorageType,
    pub replicas: u8,
}

impl StreamConfig {
    pub fn for_family(family: EventFamily) -> Self {
        Self {
            name: stream_name(family),
            subjects: vec![format!("{}.{}.>", SUBJECT_ROOT, family.segment())],
            max_age: STREAM_MAX_AGE,
            storage: StorageType::File,
            replicas: 1,
        }
    }

    /// One stream per routed family. The unknown family has none.
    pub fn routed() -> Vec<Self> {
        EventFamily::ROUTED
            .iter()
            .map(|family| Self::for_family(*family))
            .collect()
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn captures(&self, subject: &str) -> bool {
        self.subjects
            .iter()
            .any(|filter| subject_matches(filter, subject))
    }
}
