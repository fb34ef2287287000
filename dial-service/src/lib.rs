//! DIAL Service - Command and Query Handlers
//!
//! Wires the aggregates, the store, the cache and the event bus into one
//! settings service instance. Each instance keeps its own cache and converges
//! with the others through cache-invalidating domain events.

pub mod config;
pub mod deadline;
pub mod error;
pub mod invalidation;
pub mod metrics;
pub mod services;
pub mod telemetry;

pub use config::ServiceConfig;
pub use deadline::within;
pub use error::{ErrorCode, ServiceError, ServiceResult, UNAVAILABLE_MESSAGE};
pub use invalidation::CacheInvalidationHandler;
pub use metrics::ServiceMetrics;
pub use services::{
    AggregateHandler, ConfigurationService, FeatureFlagService, OrganizationSettingService,
    ServiceContext, SettingStores, SettingsService, UserPreferenceService,
};
pub use telemetry::{init_tracing, TelemetryConfig};
