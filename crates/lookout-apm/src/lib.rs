//! lookout-apm: application performance monitoring core
//!
//! This crate tracks what a service is doing and alerts when it goes wrong:
//! - Transactions wrapping each unit of work in a root span
//! - Sliding-window performance metrics (throughput, percentiles, error rate)
//! - Deduplicated, redacted error tracking with severity classification
//! - Alert rules with cooldowns and email/webhook actions
//! - An axum middleware that tracks every request

pub mod alerts;
pub mod config;
pub mod context;
pub mod error;
pub mod errors;
pub mod metrics;
pub mod middleware;
pub mod monitor;
pub mod sampling;
pub mod store;
pub mod transaction;

// Testing utilities - available in test builds
#[cfg(test)]
pub mod testing;

pub use alerts::{
    Alert, AlertAction, AlertConditions, AlertContext, AlertEngine, AlertRule, AlertStatus,
    CountCondition, EmailMessage, EmailTransport, LogEmailTransport, RateCondition,
    ReqwestWebhookClient, SharedEmailTransport, SharedWebhookClient, WebhookClient,
};
pub use config::{
    ApmConfig, ConfigValidationError, ErrorsConfig, MetricsConfig, PersistenceConfig,
    RetentionConfig, ServiceConfig, SeverityRule, TracingConfig,
};
pub use context::{RequestInfo, ResponseInfo, UserInfo};
pub use error::{ApmError, Result};
pub use errors::{
    ErrorContext, ErrorFilters, ErrorReport, ErrorStats, ErrorStatus, ErrorTracker, Severity,
    TrackedError,
};
pub use metrics::{
    LogSink, MetricsSink, NoopSampler, PerformanceAggregator, PerformanceMetrics,
    ResourceSampler, ResourceUsage, SystemSampler,
};
pub use middleware::{TRACE_ID_HEADER, track_requests};
pub use monitor::{BackgroundTasks, Monitor, MonitorDeps, RetentionReport};
pub use store::{InMemoryStore, KvStore, SharedStore};
pub use transaction::{
    Transaction, TransactionContext, TransactionError, TransactionTracker, TransactionType,
};
