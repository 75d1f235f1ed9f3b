//! Span and trace builder.
//!
//! The [`Tracer`] owns two registries behind one mutex: the live-span index
//! (open span id → trace id) and the trace map. A trace finalizes only when
//! every span registered under it has closed; traces that never fully close
//! stay `pending` until the retention sweep evicts them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::context::SpanContext;
use crate::types::{LogLevel, Span, SpanStatus, Tags, Trace};
use crate::writer::TraceWriter;

/// Configuration for the tracer.
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// When false, `start_span` is a no-op returning `None`.
    pub enabled: bool,
    /// Service recorded on every trace.
    pub service_name: String,
    /// Traces older than this are evicted by [`Tracer::sweep`].
    pub max_trace_age: Duration,
    /// Open spans older than this are force-closed by [`Tracer::sweep`].
    pub max_span_age: Option<Duration>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "lookout".to_string(),
            max_trace_age: Duration::hours(1),
            max_span_age: None,
        }
    }
}

impl TracerConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_trace_age(mut self, age: Duration) -> Self {
        self.max_trace_age = age;
        self
    }

    pub fn with_max_span_age(mut self, age: Duration) -> Self {
        self.max_span_age = Some(age);
        self
    }
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub force_closed_spans: usize,
    pub evicted_traces: usize,
}

#[derive(Debug, Default)]
struct Registry {
    /// Open span id → owning trace id.
    live: HashMap<String, String>,
    traces: HashMap<String, Trace>,
}

/// Creates and closes spans and assembles them into traces.
#[derive(Debug)]
pub struct Tracer {
    config: TracerConfig,
    registry: Mutex<Registry>,
    writer: Option<TraceWriter>,
}

impl Tracer {
    pub fn new(config: TracerConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(Registry::default()),
            writer: None,
        }
    }

    /// Export every finalized trace through `writer`.
    pub fn with_writer(mut self, writer: TraceWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a span. Mints a new trace when `trace_id` is `None`.
    ///
    /// Returns `None` when tracing is disabled.
    pub fn start_span(
        &self,
        operation: &str,
        parent_span_id: Option<&str>,
        trace_id: Option<&str>,
        tags: Option<Tags>,
    ) -> Option<String> {
        self.start_span_at(operation, parent_span_id, trace_id, tags, Utc::now())
    }

    /// [`Tracer::start_span`] with an explicit start time.
    pub fn start_span_at(
        &self,
        operation: &str,
        parent_span_id: Option<&str>,
        trace_id: Option<&str>,
        tags: Option<Tags>,
        started_at: DateTime<Utc>,
    ) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        let trace_id = trace_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let span = Span::new(
            trace_id.clone(),
            parent_span_id.map(str::to_string),
            operation,
            started_at,
        )
        .with_tags(tags.unwrap_or_default());
        let span_id = span.span_id.clone();

        let mut registry = self.registry();
        registry.live.insert(span_id.clone(), trace_id.clone());
        match registry.traces.get_mut(&trace_id) {
            Some(trace) => trace.add_span(span),
            None => {
                let trace = Trace::new(self.config.service_name.clone(), span);
                registry.traces.insert(trace_id.clone(), trace);
            }
        }
        drop(registry);

        tracing::trace!(trace_id = %trace_id, span_id = %span_id, operation, "Span started");
        Some(span_id)
    }

    /// Close a live span and finalize its trace if it was the last open one.
    ///
    /// Returns `None` for unknown or already-closed span ids.
    pub fn end_span(&self, span_id: &str, status: SpanStatus, tags: Option<Tags>) -> Option<Span> {
        self.end_span_at(span_id, status, tags, Utc::now())
    }

    /// [`Tracer::end_span`] with an explicit end time.
    pub fn end_span_at(
        &self,
        span_id: &str,
        status: SpanStatus,
        tags: Option<Tags>,
        ended_at: DateTime<Utc>,
    ) -> Option<Span> {
        let mut registry = self.registry();
        let Some(trace_id) = registry.live.remove(span_id) else {
            tracing::debug!(span_id, "end_span on unknown or closed span");
            return None;
        };
        let trace = registry.traces.get_mut(&trace_id)?;
        let span = trace.span_mut(span_id)?;

        if let Some(tags) = tags {
            span.tags.extend(tags);
        }
        span.close(status, ended_at);
        let closed = span.clone();

        let finalized = trace.try_finalize().then(|| trace.clone());
        drop(registry);

        if let Some(trace) = finalized {
            self.on_finalized(&trace);
        }
        Some(closed)
    }

    /// Append a log entry to an open span; ignored for unknown or closed spans.
    pub fn add_span_log(
        &self,
        span_id: &str,
        level: LogLevel,
        message: &str,
        fields: Option<HashMap<String, serde_json::Value>>,
    ) {
        let mut registry = self.registry();
        let Some(trace_id) = registry.live.get(span_id).cloned() else {
            return;
        };
        if let Some(span) = registry
            .traces
            .get_mut(&trace_id)
            .and_then(|t| t.span_mut(span_id))
        {
            span.log(level, message, fields.unwrap_or_default(), Utc::now());
        }
    }

    /// Set a tag on an open span.
    pub fn set_span_tag(&self, span_id: &str, key: &str, value: serde_json::Value) {
        let mut registry = self.registry();
        let Some(trace_id) = registry.live.get(span_id).cloned() else {
            return;
        };
        if let Some(span) = registry
            .traces
            .get_mut(&trace_id)
            .and_then(|t| t.span_mut(span_id))
        {
            span.tags.insert(key.to_string(), value);
        }
    }

    /// Snapshot of a trace.
    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.registry().traces.get(trace_id).cloned()
    }

    /// Trace of an open span.
    pub fn trace_id_of(&self, span_id: &str) -> Option<String> {
        self.registry().live.get(span_id).cloned()
    }

    pub fn active_span_count(&self) -> usize {
        self.registry().live.len()
    }

    pub fn trace_count(&self) -> usize {
        self.registry().traces.len()
    }

    /// Open a span that closes itself with `error` if dropped unfinished.
    ///
    /// The span joins `parent`'s trace when given, otherwise starts a new one.
    pub fn enter(
        self: &Arc<Self>,
        operation: &str,
        parent: Option<&SpanContext>,
        tags: Option<Tags>,
    ) -> Option<SpanGuard> {
        let span_id = self.start_span(
            operation,
            parent.map(|p| p.span_id.as_str()),
            parent.map(|p| p.trace_id.as_str()),
            tags,
        )?;

        let context = match parent {
            Some(parent) => parent.child(span_id.clone()),
            None => {
                let trace_id = self.trace_id_of(&span_id).unwrap_or_default();
                SpanContext::new(trace_id, span_id.clone())
            }
        };

        Some(SpanGuard {
            tracer: Arc::clone(self),
            context,
            finished: false,
        })
    }

    /// Force-close spans past `max_span_age` and evict traces past `max_trace_age`.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let mut finalized = Vec::new();
        let mut registry = self.registry();

        if let Some(max_span_age) = self.config.max_span_age {
            let cutoff = now - max_span_age;
            let stale: Vec<(String, String)> = registry
                .live
                .iter()
                .filter(|(span_id, trace_id)| {
                    registry
                        .traces
                        .get(*trace_id)
                        .and_then(|t| t.span(span_id))
                        .is_some_and(|s| s.started_at < cutoff)
                })
                .map(|(s, t)| (s.clone(), t.clone()))
                .collect();

            for (span_id, trace_id) in stale {
                registry.live.remove(&span_id);
                let Some(trace) = registry.traces.get_mut(&trace_id) else {
                    continue;
                };
                if let Some(span) = trace.span_mut(&span_id) {
                    tracing::warn!(
                        trace_id = %trace_id,
                        span_id = %span_id,
                        operation = %span.operation,
                        "Force-closing orphaned span"
                    );
                    span.tags
                        .insert("force_closed".to_string(), serde_json::Value::Bool(true));
                    span.close(SpanStatus::Error, now);
                    report.force_closed_spans += 1;
                }
                if trace.try_finalize() {
                    finalized.push(trace.clone());
                }
            }
        }

        let cutoff = now - self.config.max_trace_age;
        let expired: HashSet<String> = registry
            .traces
            .iter()
            .filter(|(_, t)| t.started_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        if !expired.is_empty() {
            registry.traces.retain(|id, _| !expired.contains(id));
            registry.live.retain(|_, trace_id| !expired.contains(trace_id));
            report.evicted_traces = expired.len();
        }
        drop(registry);

        for trace in &finalized {
            self.on_finalized(trace);
        }

        if report != SweepReport::default() {
            tracing::debug!(
                force_closed = report.force_closed_spans,
                evicted = report.evicted_traces,
                "Trace retention sweep"
            );
        }
        report
    }

    fn on_finalized(&self, trace: &Trace) {
        tracing::debug!(
            trace_id = %trace.trace_id,
            status = ?trace.status,
            duration_ms = trace.duration_ms.unwrap_or(0),
            spans = trace.spans.len(),
            "Trace finalized"
        );
        if let Some(writer) = &self.writer {
            if let Err(e) = writer.write(trace) {
                tracing::warn!(trace_id = %trace.trace_id, "Failed to export trace: {}", e);
            }
        }
    }
}

/// An open span that closes itself on drop.
#[derive(Debug)]
pub struct SpanGuard {
    tracer: Arc<Tracer>,
    context: SpanContext,
    finished: bool,
}

impl SpanGuard {
    pub fn span_id(&self) -> &str {
        &self.context.span_id
    }

    pub fn trace_id(&self) -> &str {
        &self.context.trace_id
    }

    /// Context for work nested under this span.
    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.tracer
            .add_span_log(&self.context.span_id, level, message, None);
    }

    /// Close the span with `status`.
    pub fn finish(mut self, status: SpanStatus, tags: Option<Tags>) -> Option<Span> {
        self.finished = true;
        self.tracer.end_span(&self.context.span_id, status, tags)
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut tags = Tags::new();
        tags.insert("abandoned".to_string(), serde_json::Value::Bool(true));
        self.tracer
            .end_span(&self.context.span_id, SpanStatus::Error, Some(tags));
    }
}
