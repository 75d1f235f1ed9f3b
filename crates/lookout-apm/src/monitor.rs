//! The monitor facade.
//!
//! A [`Monitor`] owns every registry (live spans, traces, live transactions,
//! tracked errors, alert rules and alerts) and wires the components together.
//! Callers share it through an `Arc` and hand it to the request middleware.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lookout_tracing::{LogLevel, Span, SpanStatus, Tags, Trace, TraceWriter, Tracer};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::alerts::{
    Alert, AlertEngine, AlertRule, LogEmailTransport, ReqwestWebhookClient, SharedEmailTransport,
    SharedWebhookClient,
};
use crate::config::ApmConfig;
use crate::error::Result;
use crate::errors::{
    ErrorContext, ErrorFilters, ErrorReport, ErrorStats, ErrorStatus, ErrorTracker, TrackedError,
};
use crate::metrics::{
    LogSink, MetricsSink, PerformanceAggregator, PerformanceMetrics, ResourceSampler,
    SystemSampler, gauges,
};
use crate::store::{InMemoryStore, SharedStore};
use crate::transaction::{Transaction, TransactionContext, TransactionTracker, TransactionType};

/// Collaborators plugged into a monitor.
#[derive(Clone)]
pub struct MonitorDeps {
    pub store: SharedStore,
    pub email: SharedEmailTransport,
    pub webhook: SharedWebhookClient,
    pub sink: Arc<dyn MetricsSink>,
    pub sampler: Arc<dyn ResourceSampler>,
    pub email_sender: Option<String>,
}

impl Default for MonitorDeps {
    fn default() -> Self {
        Self {
            store: InMemoryStore::shared(),
            email: Arc::new(LogEmailTransport),
            webhook: Arc::new(ReqwestWebhookClient::default()),
            sink: Arc::new(LogSink),
            sampler: Arc::new(SystemSampler::new()),
            email_sender: None,
        }
    }
}

impl MonitorDeps {
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_email(mut self, email: SharedEmailTransport) -> Self {
        self.email = email;
        self
    }

    pub fn with_webhook(mut self, webhook: SharedWebhookClient) -> Self {
        self.webhook = webhook;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_email_sender(mut self, sender: impl Into<String>) -> Self {
        self.email_sender = Some(sender.into());
        self
    }
}

/// What one retention sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub force_closed_transactions: usize,
    pub force_closed_spans: usize,
    pub evicted_traces: usize,
    pub expired_errors: usize,
    pub trimmed_alerts: usize,
    pub purged_store_keys: usize,
}

/// Owns and wires the APM components.
pub struct Monitor {
    config: ApmConfig,
    tracer: Arc<Tracer>,
    aggregator: Arc<PerformanceAggregator>,
    alerts: Arc<AlertEngine>,
    errors: Arc<ErrorTracker>,
    transactions: TransactionTracker,
    store: SharedStore,
    sink: Arc<dyn MetricsSink>,
    sampler: Arc<dyn ResourceSampler>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("service", &self.config.service.name)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    pub fn new(config: ApmConfig, deps: MonitorDeps) -> Self {
        Self::build(config, deps, None)
    }

    /// Monitor whose finalized traces are exported through `writer`.
    pub fn with_trace_writer(config: ApmConfig, deps: MonitorDeps, writer: TraceWriter) -> Self {
        Self::build(config, deps, Some(writer))
    }

    fn build(config: ApmConfig, deps: MonitorDeps, writer: Option<TraceWriter>) -> Self {
        let mut tracer = Tracer::new(config.tracing.tracer_config(&config.service.name));
        if let Some(writer) = writer {
            tracer = tracer.with_writer(writer);
        }
        let tracer = Arc::new(tracer);

        let aggregator = Arc::new(PerformanceAggregator::new(config.metrics.clone()));

        let mut alerts = AlertEngine::new(aggregator.clone(), deps.store.clone())
            .with_email(deps.email)
            .with_webhook(deps.webhook)
            .with_persistence(config.persistence.clone())
            .with_max_alerts(config.retention.max_alerts);
        if let Some(sender) = deps.email_sender {
            alerts = alerts.with_default_sender(sender);
        }
        let alerts = Arc::new(alerts);

        let errors = Arc::new(ErrorTracker::new(
            &config,
            aggregator.clone(),
            alerts.clone(),
            deps.store.clone(),
        ));

        let transactions = TransactionTracker::new(
            config.tracing.clone(),
            config.persistence.clone(),
            tracer.clone(),
            errors.clone(),
            aggregator.clone(),
            deps.store.clone(),
        );

        Self {
            config,
            tracer,
            aggregator,
            alerts,
            errors,
            transactions,
            store: deps.store,
            sink: deps.sink,
            sampler: deps.sampler,
        }
    }

    pub fn config(&self) -> &ApmConfig {
        &self.config
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    pub fn transactions(&self) -> &TransactionTracker {
        &self.transactions
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn aggregator(&self) -> &PerformanceAggregator {
        &self.aggregator
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    // ------------------------------------------------------------------
    // Spans and traces
    // ------------------------------------------------------------------

    pub fn start_span(
        &self,
        operation: &str,
        parent_span_id: Option<&str>,
        trace_id: Option<&str>,
        tags: Option<Tags>,
    ) -> Option<String> {
        self.tracer
            .start_span(operation, parent_span_id, trace_id, tags)
    }

    pub fn end_span(&self, span_id: &str, status: SpanStatus, tags: Option<Tags>) -> Option<Span> {
        self.tracer.end_span(span_id, status, tags)
    }

    pub fn add_span_log(
        &self,
        span_id: &str,
        level: LogLevel,
        message: &str,
        fields: Option<HashMap<String, serde_json::Value>>,
    ) {
        self.tracer.add_span_log(span_id, level, message, fields);
    }

    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.tracer.get_trace(trace_id)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn start_transaction(
        &self,
        name: &str,
        transaction_type: TransactionType,
        context: Option<TransactionContext>,
    ) -> Option<String> {
        self.transactions
            .start_transaction(name, transaction_type, context)
    }

    pub async fn end_transaction(&self, id: &str, status: SpanStatus) -> Option<Transaction> {
        self.transactions.end_transaction(id, status).await
    }

    pub fn get_active_transactions(&self) -> Vec<Transaction> {
        self.transactions.get_active_transactions()
    }

    pub async fn record_error(&self, transaction_id: &str, report: ErrorReport) -> Option<String> {
        self.transactions.record_error(transaction_id, report).await
    }

    pub async fn trace_database_operation<F, T, E>(
        &self,
        operation: &str,
        table: &str,
        work: F,
    ) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error,
    {
        self.transactions
            .trace_database_operation(operation, table, work)
            .await
    }

    pub async fn trace_external_call<F, T, E>(
        &self,
        service_name: &str,
        endpoint: &str,
        work: F,
    ) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error,
    {
        self.transactions
            .trace_external_call(service_name, endpoint, work)
            .await
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    pub async fn track_error(
        &self,
        report: ErrorReport,
        context: Option<ErrorContext>,
        tags: Option<HashMap<String, String>>,
    ) -> Option<String> {
        self.errors.track_error(report, context, tags).await
    }

    pub fn get_recent_errors(&self, limit: usize) -> Vec<TrackedError> {
        self.errors.get_recent_errors(limit)
    }

    pub fn get_errors(&self, filters: &ErrorFilters) -> Vec<TrackedError> {
        self.errors.get_errors(filters)
    }

    pub fn get_error_stats(&self) -> ErrorStats {
        self.errors.get_error_stats()
    }

    pub async fn update_error_status(&self, id: &str, status: ErrorStatus) -> Option<TrackedError> {
        self.errors.update_error_status(id, status).await
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    pub async fn add_alert_rule(&self, rule: AlertRule) -> Result<()> {
        self.alerts.add_alert_rule(rule).await
    }

    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.alerts.get_active_alerts()
    }

    pub async fn resolve_alert(&self, alert_id: &str) -> Option<Alert> {
        self.alerts.resolve_alert(alert_id).await
    }

    // ------------------------------------------------------------------
    // Metrics and sweeps
    // ------------------------------------------------------------------

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        self.aggregator
            .get_performance_metrics(self.sampler.sample())
    }

    /// Snapshot the metrics and forward the gauges to the sink.
    pub async fn aggregate_metrics(&self) -> PerformanceMetrics {
        let metrics = self.get_performance_metrics();
        for (name, value) in gauges(&metrics) {
            self.sink.gauge(name, value).await;
        }
        metrics
    }

    /// Force-close stale work, evict old traces and errors, cap buffers.
    pub async fn run_retention_sweep(&self, now: DateTime<Utc>) -> RetentionReport {
        let force_closed_transactions = self.transactions.sweep(now).await;
        let traces = self.tracer.sweep(now);
        let expired_errors = self.errors.sweep(now);
        let trimmed_alerts = self.alerts.trim_alerts();
        self.aggregator.trim();
        let purged_store_keys = self.store.purge_expired().await.unwrap_or_else(|e| {
            tracing::warn!("Store purge failed: {}", e);
            0
        });

        let report = RetentionReport {
            force_closed_transactions,
            force_closed_spans: traces.force_closed_spans,
            evicted_traces: traces.evicted_traces,
            expired_errors,
            trimmed_alerts,
            purged_store_keys,
        };
        tracing::debug!(?report, "Retention sweep");
        report
    }

    /// Start the retention and metrics loops.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> BackgroundTasks {
        let retention = {
            let monitor = Arc::clone(self);
            let period = Duration::from_secs(self.config.retention.sweep_interval_secs.max(1));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    monitor.run_retention_sweep(Utc::now()).await;
                }
            })
        };

        let metrics = {
            let monitor = Arc::clone(self);
            let period = Duration::from_secs(self.config.metrics.interval_secs.max(1));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    monitor.aggregate_metrics().await;
                }
            })
        };

        BackgroundTasks {
            handles: vec![retention, metrics],
        }
    }
}

/// Handles of the background loops; dropping them stops the loops.
#[derive(Debug)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn shutdown(self) {}
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
