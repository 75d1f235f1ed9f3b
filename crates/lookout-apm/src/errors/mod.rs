//! Error tracking.
//!
//! Occurrences are deduplicated by fingerprint. The first occurrence creates a
//! [`TrackedError`]; repeats only bump `count` and `last_seen`, so triage
//! state set by an operator is never overwritten. Context is redacted before
//! a record is stored, persisted or handed to the alert engine.

pub mod fingerprint;
pub mod sanitize;
pub mod severity;
pub mod types;

pub use fingerprint::fingerprint;
pub use sanitize::Redactor;
pub use severity::SeverityClassifier;
pub use types::{
    ErrorContext, ErrorFilters, ErrorReport, ErrorStats, ErrorStatus, Severity, TrackedError,
};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};

use crate::alerts::AlertEngine;
use crate::config::{ApmConfig, ErrorsConfig, PersistenceConfig};
use crate::metrics::PerformanceAggregator;
use crate::sampling::should_sample;
use crate::store::{self, SharedStore, keys};

#[derive(Debug, Default)]
struct ErrorIndex {
    by_fingerprint: HashMap<String, TrackedError>,
    /// Error id → fingerprint.
    ids: HashMap<String, String>,
}

/// Deduplicating error sink.
pub struct ErrorTracker {
    config: ErrorsConfig,
    environment: String,
    retention: Duration,
    classifier: SeverityClassifier,
    redactor: Redactor,
    index: RwLock<ErrorIndex>,
    aggregator: Arc<PerformanceAggregator>,
    alerts: Arc<AlertEngine>,
    store: SharedStore,
    persistence: PersistenceConfig,
}

impl std::fmt::Debug for ErrorTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorTracker")
            .field("environment", &self.environment)
            .field("enabled", &self.config.enabled)
            .finish_non_exhaustive()
    }
}

impl ErrorTracker {
    pub fn new(
        config: &ApmConfig,
        aggregator: Arc<PerformanceAggregator>,
        alerts: Arc<AlertEngine>,
        store: SharedStore,
    ) -> Self {
        let errors = config.errors.clone();
        Self {
            classifier: SeverityClassifier::new(errors.severity_rules.clone()),
            redactor: Redactor::new(&errors.sensitive_keys, errors.redaction_marker.clone()),
            config: errors,
            environment: config.service.environment.clone(),
            retention: Duration::seconds(
                i64::try_from(config.retention.error_retention_secs).unwrap_or(i64::MAX / 1000),
            ),
            index: RwLock::new(ErrorIndex::default()),
            aggregator,
            alerts,
            store,
            persistence: config.persistence.clone(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ErrorIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ErrorIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Track one error occurrence.
    ///
    /// Returns the tracked error's id, or `None` when tracking is disabled,
    /// the type is ignored, or the sampling draw rejects the occurrence.
    pub async fn track_error(
        &self,
        report: ErrorReport,
        context: Option<ErrorContext>,
        tags: Option<HashMap<String, String>>,
    ) -> Option<String> {
        self.track_error_at(report, context, tags, Utc::now()).await
    }

    pub async fn track_error_at(
        &self,
        report: ErrorReport,
        context: Option<ErrorContext>,
        tags: Option<HashMap<String, String>>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        if self.config.ignored_types.contains(&report.error_type) {
            tracing::debug!(error_type = %report.error_type, "Ignored error type");
            return None;
        }
        if !should_sample(self.config.sample_rate) {
            tracing::debug!(error_type = %report.error_type, "Error dropped by sampling");
            return None;
        }

        let fingerprint = fingerprint(&report.error_type, &report.message);
        let snapshot = {
            let mut index = self.write();
            match index.by_fingerprint.get_mut(&fingerprint) {
                Some(existing) => {
                    existing.count += 1;
                    existing.last_seen = existing.last_seen.max(now);
                    existing.clone()
                }
                None => {
                    let tracked = self.new_record(report, context, tags, fingerprint.clone(), now);
                    index.ids.insert(tracked.id.clone(), fingerprint.clone());
                    index.by_fingerprint.insert(fingerprint, tracked.clone());
                    tracked
                }
            }
        };

        tracing::debug!(
            error_id = %snapshot.id,
            fingerprint = %snapshot.fingerprint,
            count = snapshot.count,
            "Tracked error"
        );

        self.aggregator.record_error_at(&snapshot.error_type, now);
        self.persist(&snapshot).await;
        self.alerts.check_alert_rules_at(&snapshot, now).await;

        Some(snapshot.id)
    }

    fn new_record(
        &self,
        report: ErrorReport,
        context: Option<ErrorContext>,
        tags: Option<HashMap<String, String>>,
        fingerprint: String,
        now: DateTime<Utc>,
    ) -> TrackedError {
        let mut context = context.unwrap_or_default();
        if context.environment.is_empty() {
            context.environment.clone_from(&self.environment);
        }
        if let Some(current) = lookout_tracing::current_span_context() {
            context.trace_id.get_or_insert(current.trace_id);
            if let Some(transaction_id) = current.transaction_id {
                context.transaction_id.get_or_insert(transaction_id);
            }
        }
        self.redactor.redact_context(&mut context);

        TrackedError {
            id: uuid::Uuid::new_v4().to_string(),
            fingerprint,
            severity: self
                .classifier
                .classify(&report.error_type, report.category.as_deref()),
            message: report.message,
            error_type: report.error_type,
            stack: report.stack,
            category: report.category,
            first_seen: now,
            last_seen: now,
            count: 1,
            status: ErrorStatus::New,
            context,
            tags: tags.unwrap_or_default(),
        }
    }

    async fn persist(&self, error: &TrackedError) {
        store::persist(
            self.store.as_ref(),
            &keys::error(&error.id),
            error,
            Some(self.persistence.error_ttl()),
            self.persistence.write_timeout(),
        )
        .await;
    }

    pub fn get_error(&self, id: &str) -> Option<TrackedError> {
        let index = self.read();
        let fingerprint = index.ids.get(id)?;
        index.by_fingerprint.get(fingerprint).cloned()
    }

    /// Change the triage status of a tracked error.
    pub async fn update_error_status(&self, id: &str, status: ErrorStatus) -> Option<TrackedError> {
        let updated = {
            let mut index = self.write();
            let fingerprint = index.ids.get(id)?.clone();
            let error = index.by_fingerprint.get_mut(&fingerprint)?;
            error.status = status;
            error.clone()
        };
        self.persist(&updated).await;
        Some(updated)
    }

    /// Most recently seen errors first.
    pub fn get_recent_errors(&self, limit: usize) -> Vec<TrackedError> {
        self.get_errors(&ErrorFilters::default().with_limit(limit))
    }

    /// Errors matching `filters`, most recently seen first.
    pub fn get_errors(&self, filters: &ErrorFilters) -> Vec<TrackedError> {
        let mut errors: Vec<TrackedError> = self
            .read()
            .by_fingerprint
            .values()
            .filter(|e| filters.matches(e))
            .cloned()
            .collect();
        errors.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        if let Some(limit) = filters.limit {
            errors.truncate(limit);
        }
        errors
    }

    pub fn get_error_stats(&self) -> ErrorStats {
        self.get_error_stats_at(Utc::now())
    }

    pub fn get_error_stats_at(&self, now: DateTime<Utc>) -> ErrorStats {
        let hour_ago = now - Duration::hours(1);
        let index = self.read();
        let mut stats = ErrorStats {
            unique_errors: index.by_fingerprint.len(),
            ..Default::default()
        };
        for error in index.by_fingerprint.values() {
            stats.total_occurrences += error.count;
            *stats
                .by_severity
                .entry(error.severity.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_status
                .entry(error.status.as_str().to_string())
                .or_default() += 1;
            *stats.by_type.entry(error.error_type.clone()).or_default() += error.count;
            if error.last_seen >= hour_ago {
                stats.seen_last_hour += 1;
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.read().by_fingerprint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop errors not seen within the retention window from memory.
    ///
    /// Persisted copies are unaffected. Returns how many were dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut index = self.write();
        let expired: Vec<(String, String)> = index
            .by_fingerprint
            .iter()
            .filter(|(_, e)| e.last_seen < cutoff)
            .map(|(fp, e)| (fp.clone(), e.id.clone()))
            .collect();
        for (fingerprint, id) in &expired {
            index.by_fingerprint.remove(fingerprint);
            index.ids.remove(id);
        }
        expired.len()
    }
}
