//! Service Layer
//!
//! Command and query handlers for the four setting aggregates.
//!
//! Write path: mutate the aggregate, commit to the store under a deadline,
//! evict (or write through) the local cache entry, then publish the drained
//! events. A publish failure after a successful commit is logged and does
//! not fail the command; other instances stay stale until the entry's TTL
//! runs out.
//!
//! Read path: cache-aside. A hit returns immediately; a miss or a degraded
//! cache reads the store and repopulates the entry.

mod aggregate_handler;
mod configuration_service;
mod feature_flag_service;
mod organization_setting_service;
mod settings_service;
mod user_preference_service;

pub use aggregate_handler::*;
pub use configuration_service::*;
pub use feature_flag_service::*;
pub use organization_setting_service::*;
pub use settings_service::*;
pub use user_preference_service::*;
