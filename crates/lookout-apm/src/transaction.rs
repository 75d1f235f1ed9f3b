//! Transaction tracking.
//!
//! A transaction is the top-level unit of work (usually one inbound request).
//! Starting one opens a root span; every span opened through the tracker or
//! the `trace_*` helpers while its [`SpanContext`] is in scope nests under it.
//! Ending a transaction closes the root span, records the duration with the
//! aggregator, persists the record and removes it from the live registry.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use lookout_tracing::{
    Span, SpanContext, SpanStatus, Tags, Tracer, current_span_context, with_span_context,
};
use serde::{Deserialize, Serialize};

use crate::config::{PersistenceConfig, TracingConfig};
use crate::context::{RequestInfo, ResponseInfo, UserInfo};
use crate::errors::{ErrorContext, ErrorReport, ErrorTracker};
use crate::metrics::PerformanceAggregator;
use crate::sampling::should_sample;
use crate::store::{self, SharedStore, keys};

/// Kind of work a transaction represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    #[default]
    Request,
    Background,
    Database,
    External,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Request => "request",
            TransactionType::Background => "background",
            TransactionType::Database => "database",
            TransactionType::External => "external",
        }
    }
}

/// Facts attached to a transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

impl TransactionContext {
    pub fn with_request(mut self, request: RequestInfo) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_user(mut self, user: UserInfo) -> Self {
        self.user = Some(user);
        self
    }
}

/// An error raised while a transaction was live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionError {
    /// Tracked error id; `None` when the error tracker dropped it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
    pub error_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A named, top-level operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_span_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub status: SpanStatus,
    pub context: TransactionContext,
    /// Filled from the trace when the transaction ends.
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default)]
    pub errors: Vec<TransactionError>,
}

impl Transaction {
    /// Span context for work nested under this transaction.
    pub fn span_context(&self) -> Option<SpanContext> {
        let trace_id = self.trace_id.as_ref()?;
        let span_id = self.root_span_id.as_ref()?;
        Some(SpanContext::new(trace_id.clone(), span_id.clone()).with_transaction(self.id.clone()))
    }
}

/// Tracks live transactions.
pub struct TransactionTracker {
    config: TracingConfig,
    tracer: Arc<Tracer>,
    errors: Arc<ErrorTracker>,
    aggregator: Arc<PerformanceAggregator>,
    store: SharedStore,
    persistence: PersistenceConfig,
    live: Mutex<HashMap<String, Transaction>>,
}

impl std::fmt::Debug for TransactionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTracker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TransactionTracker {
    pub fn new(
        config: TracingConfig,
        persistence: PersistenceConfig,
        tracer: Arc<Tracer>,
        errors: Arc<ErrorTracker>,
        aggregator: Arc<PerformanceAggregator>,
        store: SharedStore,
    ) -> Self {
        Self {
            config,
            tracer,
            errors,
            aggregator,
            store,
            persistence,
            live: Mutex::new(HashMap::new()),
        }
    }

    fn live(&self) -> MutexGuard<'_, HashMap<String, Transaction>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    /// Start a transaction.
    ///
    /// Returns `None` when tracing is disabled or the sampling draw rejects
    /// it; later calls with no id are no-ops by construction. Inside an
    /// existing span context the root span joins that trace.
    pub fn start_transaction(
        &self,
        name: &str,
        transaction_type: TransactionType,
        context: Option<TransactionContext>,
    ) -> Option<String> {
        self.start_transaction_at(name, transaction_type, context, Utc::now())
    }

    pub fn start_transaction_at(
        &self,
        name: &str,
        transaction_type: TransactionType,
        context: Option<TransactionContext>,
        started_at: DateTime<Utc>,
    ) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        if !should_sample(self.config.sample_rate) {
            tracing::debug!(transaction = name, "Transaction dropped by sampling");
            return None;
        }

        let mut context = context.unwrap_or_default();
        if let Some(request) = context.request.as_mut() {
            self.errors.redactor().redact_request(request);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let parent = current_span_context();
        let mut tags = Tags::new();
        tags.insert("transaction.id".to_string(), id.clone().into());
        tags.insert(
            "transaction.type".to_string(),
            transaction_type.as_str().into(),
        );
        let root_span_id = self.tracer.start_span_at(
            name,
            parent.as_ref().map(|p| p.span_id.as_str()),
            parent.as_ref().map(|p| p.trace_id.as_str()),
            Some(tags),
            started_at,
        );
        let trace_id = root_span_id.as_ref().and_then(|span_id| {
            parent
                .as_ref()
                .map(|p| p.trace_id.clone())
                .or_else(|| self.tracer.trace_id_of(span_id))
        });

        let transaction = Transaction {
            id: id.clone(),
            name: name.to_string(),
            transaction_type,
            trace_id,
            root_span_id,
            started_at,
            ended_at: None,
            duration_ms: None,
            status: SpanStatus::Pending,
            context,
            spans: Vec::new(),
            errors: Vec::new(),
        };
        self.live().insert(id.clone(), transaction);
        tracing::trace!(transaction_id = %id, name, "Transaction started");
        Some(id)
    }

    /// End a live transaction; `None` when the id was never live.
    pub async fn end_transaction(&self, id: &str, status: SpanStatus) -> Option<Transaction> {
        self.end_transaction_at(id, status, Utc::now()).await
    }

    pub async fn end_transaction_at(
        &self,
        id: &str,
        status: SpanStatus,
        ended_at: DateTime<Utc>,
    ) -> Option<Transaction> {
        let Some(mut transaction) = self.live().remove(id) else {
            tracing::debug!(transaction_id = id, "end_transaction on unknown transaction");
            return None;
        };

        let ended_at = ended_at.max(transaction.started_at);
        if let Some(root) = &transaction.root_span_id {
            self.tracer.end_span_at(root, status, None, ended_at);
        }
        transaction.ended_at = Some(ended_at);
        let duration_ms = (ended_at - transaction.started_at).num_milliseconds().max(0) as u64;
        transaction.duration_ms = Some(duration_ms);
        transaction.status = status;
        transaction.spans = self.collect_spans(&transaction);

        self.aggregator
            .record_transaction_at(transaction.transaction_type, duration_ms, ended_at);
        store::persist(
            self.store.as_ref(),
            &keys::transaction(&transaction.id),
            &transaction,
            Some(self.persistence.transaction_ttl()),
            self.persistence.write_timeout(),
        )
        .await;

        tracing::debug!(
            transaction_id = %transaction.id,
            name = %transaction.name,
            duration_ms,
            status = status.as_str(),
            "Transaction ended"
        );
        Some(transaction)
    }

    /// Spans of the trace that descend from the transaction's root span.
    fn collect_spans(&self, transaction: &Transaction) -> Vec<Span> {
        let (Some(trace_id), Some(root)) = (&transaction.trace_id, &transaction.root_span_id)
        else {
            return Vec::new();
        };
        let Some(trace) = self.tracer.get_trace(trace_id) else {
            return Vec::new();
        };

        let mut members: HashSet<&str> = HashSet::from([root.as_str()]);
        loop {
            let before = members.len();
            for span in &trace.spans {
                if span
                    .parent_span_id
                    .as_deref()
                    .is_some_and(|p| members.contains(p))
                {
                    members.insert(span.span_id.as_str());
                }
            }
            if members.len() == before {
                break;
            }
        }

        trace
            .spans
            .iter()
            .filter(|s| members.contains(s.span_id.as_str()))
            .cloned()
            .collect()
    }

    fn update<F: FnOnce(&mut Transaction)>(&self, id: &str, f: F) -> bool {
        match self.live().get_mut(id) {
            Some(transaction) => {
                f(transaction);
                true
            }
            None => false,
        }
    }

    pub fn set_transaction_user(&self, id: &str, user: UserInfo) -> bool {
        self.update(id, |t| t.context.user = Some(user))
    }

    pub fn set_transaction_response(&self, id: &str, response: ResponseInfo) -> bool {
        self.update(id, |t| t.context.response = Some(response))
    }

    pub fn set_transaction_custom(&self, id: &str, key: &str, value: serde_json::Value) -> bool {
        self.update(id, |t| {
            t.context.custom.insert(key.to_string(), value);
        })
    }

    pub fn get_transaction(&self, id: &str) -> Option<Transaction> {
        self.live().get(id).cloned()
    }

    pub fn get_active_transactions(&self) -> Vec<Transaction> {
        let mut live: Vec<Transaction> = self.live().values().cloned().collect();
        live.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        live
    }

    /// Span context of a live transaction's root span.
    pub fn span_context(&self, id: &str) -> Option<SpanContext> {
        self.live().get(id)?.span_context()
    }

    /// Open a span directly under a live transaction's root span.
    pub fn start_span_in_transaction(
        &self,
        id: &str,
        operation: &str,
        tags: Option<Tags>,
    ) -> Option<String> {
        let context = self.span_context(id)?;
        self.tracer
            .start_span(operation, Some(&context.span_id), Some(&context.trace_id), tags)
    }

    /// Attach an error to a live transaction and forward it to the error tracker.
    ///
    /// Unknown transaction ids still forward the error.
    pub async fn record_error(&self, id: &str, report: ErrorReport) -> Option<String> {
        let context = self.live().get(id).map(|t| ErrorContext {
            user: t.context.user.clone(),
            request: t.context.request.clone(),
            transaction_id: Some(t.id.clone()),
            trace_id: t.trace_id.clone(),
            ..Default::default()
        });

        let error_type = report.error_type.clone();
        let message = report.message.clone();
        let error_id = self.errors.track_error(report, context, None).await;

        self.update(id, |t| {
            t.errors.push(TransactionError {
                error_id: error_id.clone(),
                error_type,
                message,
                timestamp: Utc::now(),
            });
        });
        error_id
    }

    /// Run a database operation inside a span.
    ///
    /// The span closes with `success` or `error` even if the future is
    /// dropped; errors are tracked with category `database` and returned
    /// unchanged.
    pub async fn trace_database_operation<F, T, E>(
        &self,
        operation: &str,
        table: &str,
        work: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        let mut tags = Tags::new();
        tags.insert("component".to_string(), "database".into());
        tags.insert("db.operation".to_string(), operation.into());
        tags.insert("db.table".to_string(), table.into());
        self.trace_operation(&format!("db.{} {}", operation, table), tags, "database", work)
            .await
    }

    /// Run an outbound call inside a span; errors are tracked with category
    /// `external`.
    pub async fn trace_external_call<F, T, E>(
        &self,
        service_name: &str,
        endpoint: &str,
        work: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        let mut tags = Tags::new();
        tags.insert("component".to_string(), "external".into());
        tags.insert("external.service".to_string(), service_name.into());
        tags.insert("external.endpoint".to_string(), endpoint.into());
        self.trace_operation(
            &format!("{} {}", service_name, endpoint),
            tags,
            "external",
            work,
        )
        .await
    }

    async fn trace_operation<F, T, E>(
        &self,
        operation: &str,
        tags: Tags,
        category: &str,
        work: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        let parent = current_span_context();
        let guard = self.tracer.enter(operation, parent.as_ref(), Some(tags));

        let result = match &guard {
            Some(guard) => with_span_context(guard.context().clone(), work).await,
            None => work.await,
        };

        let report = match &result {
            Ok(_) => {
                if let Some(guard) = guard {
                    guard.finish(SpanStatus::Success, None);
                }
                None
            }
            Err(e) => {
                if let Some(guard) = guard {
                    let mut tags = Tags::new();
                    tags.insert("error".to_string(), true.into());
                    tags.insert("error.message".to_string(), e.to_string().into());
                    guard.finish(SpanStatus::Error, Some(tags));
                }
                Some(ErrorReport::from_error(e).with_category(category))
            }
        };

        if let Some(report) = report {
            match parent.and_then(|p| p.transaction_id) {
                Some(transaction_id) => {
                    self.record_error(&transaction_id, report).await;
                }
                None => {
                    self.errors.track_error(report, None, None).await;
                }
            }
        }
        result
    }

    /// End live transactions older than `max_span_age_secs` with `error`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let Some(max_age) = self.config.max_span_age_secs else {
            return 0;
        };
        let cutoff = now - Duration::seconds(i64::try_from(max_age).unwrap_or(i64::MAX / 1000));
        let stale: Vec<String> = self
            .live()
            .values()
            .filter(|t| t.started_at < cutoff)
            .map(|t| t.id.clone())
            .collect();

        let mut closed = 0;
        for id in stale {
            self.set_transaction_custom(&id, "force_closed", true.into());
            if self.end_transaction_at(&id, SpanStatus::Error, now).await.is_some() {
                tracing::warn!(transaction_id = %id, "Force-closed stale transaction");
                closed += 1;
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertEngine;
    use crate::config::{ApmConfig, MetricsConfig};
    use crate::errors::Severity;
    use crate::store::InMemoryStore;
    use lookout_tracing::TraceStatus;

    struct Harness {
        tracker: TransactionTracker,
        aggregator: Arc<PerformanceAggregator>,
        store: Arc<InMemoryStore>,
    }

    fn harness(tracing: TracingConfig) -> Harness {
        let config = ApmConfig {
            tracing,
            ..Default::default()
        };
        let store = Arc::new(InMemoryStore::new());
        let shared: SharedStore = store.clone();
        let aggregator = Arc::new(PerformanceAggregator::new(MetricsConfig::default()));
        let alerts = Arc::new(AlertEngine::new(aggregator.clone(), shared.clone()));
        let errors = Arc::new(ErrorTracker::new(
            &config,
            aggregator.clone(),
            alerts,
            shared.clone(),
        ));
        let tracer = Arc::new(Tracer::new(config.tracing.tracer_config("test")));
        Harness {
            tracker: TransactionTracker::new(
                config.tracing.clone(),
                config.persistence.clone(),
                tracer,
                errors,
                aggregator.clone(),
                shared,
            ),
            aggregator,
            store,
        }
    }

    #[test]
    fn test_sampling_zero_drops_transaction() {
        let h = harness(TracingConfig {
            sample_rate: 0.0,
            ..Default::default()
        });
        assert!(h
            .tracker
            .start_transaction("GET /", TransactionType::Request, None)
            .is_none());
        assert!(h.tracker.get_active_transactions().is_empty());
        assert_eq!(h.tracker.tracer().trace_count(), 0);
    }

    #[test]
    fn test_disabled_tracing_drops_transaction() {
        let h = harness(TracingConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(h
            .tracker
            .start_transaction("job", TransactionType::Background, None)
            .is_none());
    }

    #[tokio::test]
    async fn test_start_and_end_transaction() {
        let h = harness(TracingConfig::default());
        let start = Utc::now();
        let id = h
            .tracker
            .start_transaction_at("GET /users", TransactionType::Request, None, start)
            .unwrap();
        assert_eq!(h.tracker.get_active_transactions().len(), 1);

        let ended = h
            .tracker
            .end_transaction_at(&id, SpanStatus::Success, start + Duration::milliseconds(250))
            .await
            .unwrap();

        assert_eq!(ended.duration_ms, Some(250));
        assert_eq!(ended.status, SpanStatus::Success);
        assert_eq!(ended.spans.len(), 1);
        assert!(h.tracker.get_active_transactions().is_empty());
        assert_eq!(h.aggregator.buffered_counts().0, 1);

        let trace = h
            .tracker
            .tracer()
            .get_trace(ended.trace_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(trace.status, TraceStatus::Success);

        let persisted: Option<Transaction> =
            store::get_json(h.store.as_ref(), &keys::transaction(&id))
                .await
                .unwrap();
        assert_eq!(persisted.unwrap(), ended);
    }

    #[tokio::test]
    async fn test_end_unknown_transaction() {
        let h = harness(TracingConfig::default());
        assert!(h
            .tracker
            .end_transaction("missing", SpanStatus::Success)
            .await
            .is_none());
        assert_eq!(h.aggregator.buffered_counts().0, 0);
    }

    #[test]
    fn test_request_context_is_redacted() {
        let h = harness(TracingConfig::default());
        let request = RequestInfo::new("POST", "/login")
            .with_header("Authorization", "Bearer abc")
            .with_header("Accept", "application/json")
            .with_query("token", "xyz");
        let id = h
            .tracker
            .start_transaction(
                "POST /login",
                TransactionType::Request,
                Some(TransactionContext::default().with_request(request)),
            )
            .unwrap();

        let transaction = h.tracker.get_transaction(&id).unwrap();
        let request = transaction.context.request.unwrap();
        assert_eq!(request.headers["Authorization"], "[REDACTED]");
        assert_eq!(request.headers["Accept"], "application/json");
        assert_eq!(request.query["token"], "[REDACTED]");
    }

    #[tokio::test]
    async fn test_child_spans_are_collected() {
        let h = harness(TracingConfig::default());
        let id = h
            .tracker
            .start_transaction("checkout", TransactionType::Request, None)
            .unwrap();
        let child = h
            .tracker
            .start_span_in_transaction(&id, "render", None)
            .unwrap();
        h.tracker
            .tracer()
            .end_span(&child, SpanStatus::Success, None);

        let ended = h
            .tracker
            .end_transaction(&id, SpanStatus::Success)
            .await
            .unwrap();
        assert_eq!(ended.spans.len(), 2);
        assert_eq!(
            ended.spans[1].parent_span_id.as_deref(),
            ended.root_span_id.as_deref()
        );
    }

    #[tokio::test]
    async fn test_nested_transaction_joins_trace() {
        let h = harness(TracingConfig::default());
        let outer = h
            .tracker
            .start_transaction("outer", TransactionType::Request, None)
            .unwrap();
        let context = h.tracker.span_context(&outer).unwrap();

        let inner = with_span_context(context.clone(), async {
            h.tracker
                .start_transaction("inner", TransactionType::Background, None)
        })
        .await
        .unwrap();

        let inner = h.tracker.get_transaction(&inner).unwrap();
        assert_eq!(inner.trace_id.as_deref(), Some(context.trace_id.as_str()));
    }

    #[tokio::test]
    async fn test_database_error_is_tracked_and_span_fails() {
        let h = harness(TracingConfig::default());
        let id = h
            .tracker
            .start_transaction("GET /orders", TransactionType::Request, None)
            .unwrap();
        let context = h.tracker.span_context(&id).unwrap();

        let result: Result<(), std::io::Error> = with_span_context(
            context,
            h.tracker.trace_database_operation("select", "orders", async {
                Err(std::io::Error::other("connection reset"))
            }),
        )
        .await;
        assert!(result.is_err());

        let live = h.tracker.get_transaction(&id).unwrap();
        assert_eq!(live.errors.len(), 1);
        let error_id = live.errors[0].error_id.clone().unwrap();
        let tracked = h.tracker.errors.get_error(&error_id).unwrap();
        assert_eq!(tracked.category.as_deref(), Some("database"));
        assert_eq!(tracked.severity, Severity::High);
        assert_eq!(tracked.context.transaction_id.as_deref(), Some(id.as_str()));

        let ended = h
            .tracker
            .end_transaction(&id, SpanStatus::Error)
            .await
            .unwrap();
        let db_span = ended
            .spans
            .iter()
            .find(|s| s.operation == "db.select orders")
            .unwrap();
        assert_eq!(db_span.status, SpanStatus::Error);
        assert_eq!(db_span.tags["db.table"], "orders");
    }

    #[tokio::test]
    async fn test_mutators_feed_recorded_errors() {
        let h = harness(TracingConfig::default());
        let id = h
            .tracker
            .start_transaction("POST /cart", TransactionType::Request, None)
            .unwrap();

        assert!(h.tracker.set_transaction_user(&id, UserInfo::new("u-1")));
        assert!(h.tracker.set_transaction_response(&id, ResponseInfo::new(502)));
        assert!(h.tracker.set_transaction_custom(&id, "cart_size", 3.into()));
        assert!(!h.tracker.set_transaction_user("missing", UserInfo::new("u-2")));

        let error_id = h
            .tracker
            .record_error(&id, ErrorReport::new("UpstreamError", "bad gateway"))
            .await
            .unwrap();
        let tracked = h.tracker.errors.get_error(&error_id).unwrap();
        assert_eq!(tracked.context.user.unwrap().id, "u-1");

        let ended = h
            .tracker
            .end_transaction(&id, SpanStatus::Error)
            .await
            .unwrap();
        assert_eq!(ended.context.response.unwrap().status_code, 502);
        assert_eq!(ended.context.custom["cart_size"], 3);
        assert_eq!(ended.errors[0].error_id.as_deref(), Some(error_id.as_str()));
    }

    #[tokio::test]
    async fn test_wrapped_error_is_tracked_with_tracing_disabled() {
        let h = harness(TracingConfig {
            enabled: false,
            ..Default::default()
        });

        let result: Result<(), std::io::Error> = h
            .tracker
            .trace_database_operation("insert", "orders", async {
                Err(std::io::Error::other("duplicate key"))
            })
            .await;
        assert!(result.is_err());

        let tracked = h.tracker.errors.get_recent_errors(10);
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].category.as_deref(), Some("database"));
        assert_eq!(tracked[0].message, "duplicate key");
        assert_eq!(h.tracker.tracer().trace_count(), 0);
    }

    #[tokio::test]
    async fn test_external_call_success_passes_value_through() {
        let h = harness(TracingConfig::default());
        let value: Result<u32, std::io::Error> = h
            .tracker
            .trace_external_call("payments", "/charge", async { Ok(7) })
            .await;
        assert_eq!(value.unwrap(), 7);
        assert!(h.tracker.errors.is_empty());
        assert_eq!(h.tracker.tracer().active_span_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_force_closes_stale_transactions() {
        let h = harness(TracingConfig {
            max_span_age_secs: Some(30),
            ..Default::default()
        });
        let now = Utc::now();
        h.tracker
            .start_transaction_at(
                "stale",
                TransactionType::Background,
                None,
                now - Duration::seconds(60),
            )
            .unwrap();
        let fresh = h
            .tracker
            .start_transaction_at("fresh", TransactionType::Background, None, now)
            .unwrap();

        assert_eq!(h.tracker.sweep(now).await, 1);
        let active = h.tracker.get_active_transactions();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, fresh);
    }

    #[tokio::test]
    async fn test_sweep_without_span_age_is_noop() {
        let h = harness(TracingConfig::default());
        h.tracker
            .start_transaction_at(
                "old",
                TransactionType::Background,
                None,
                Utc::now() - Duration::days(1),
            )
            .unwrap();
        assert_eq!(h.tracker.sweep(Utc::now()).await, 0);
        assert_eq!(h.tracker.get_active_transactions().len(), 1);
    }
}
