//! Span and trace data types.
//!
//! A [`Trace`] is the set of [`Span`]s sharing a trace identifier. Spans form a
//! tree through `parent_span_id`; the first span registered for a trace is its
//! root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Free-form key/value tags attached to spans.
pub type Tags = HashMap<String, serde_json::Value>;

/// Status of a single span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// Span is still open.
    #[default]
    Pending,
    /// Span completed successfully.
    Success,
    /// Span completed with an error.
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Pending => "pending",
            SpanStatus::Success => "success",
            SpanStatus::Error => "error",
        }
    }
}

/// Status of a whole trace.
///
/// Only becomes terminal once every span of the trace has closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    #[default]
    Pending,
    Success,
    Error,
}

impl TraceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TraceStatus::Pending)
    }
}

/// Severity of a span log entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// A timestamped log line recorded while a span was open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLog {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, serde_json::Value>,
}

/// One timed unit of work inside a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Trace this span belongs to.
    pub trace_id: String,

    /// Unique identifier for this span.
    pub span_id: String,

    /// Parent span, `None` for the trace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    /// Operation name (e.g., "GET /projects", "db.select users").
    pub operation: String,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Duration in milliseconds, set when the span closes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    pub status: SpanStatus,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: Tags,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<SpanLog>,
}

impl Span {
    /// Create an open span with a fresh identifier.
    pub fn new(
        trace_id: impl Into<String>,
        parent_span_id: Option<String>,
        operation: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: uuid::Uuid::new_v4().to_string(),
            parent_span_id,
            operation: operation.into(),
            started_at,
            ended_at: None,
            duration_ms: None,
            status: SpanStatus::Pending,
            tags: HashMap::new(),
            logs: Vec::new(),
        }
    }

    /// Attach tags to the span.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Close the span. The end time never precedes the start time.
    pub fn close(&mut self, status: SpanStatus, ended_at: DateTime<Utc>) {
        let ended_at = ended_at.max(self.started_at);
        self.ended_at = Some(ended_at);
        self.duration_ms = Some(millis_between(self.started_at, ended_at));
        self.status = status;
    }

    /// Append a log entry.
    pub fn log(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        fields: HashMap<String, serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) {
        self.logs.push(SpanLog {
            timestamp,
            level,
            message: message.into(),
            fields,
        });
    }
}

/// The set of spans sharing a trace identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,

    /// First span registered for this trace.
    pub root_span_id: String,

    /// Service that owns the trace.
    pub service: String,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    pub status: TraceStatus,

    /// Spans in registration order.
    pub spans: Vec<Span>,
}

impl Trace {
    /// Create a trace rooted at `root`.
    pub fn new(service: impl Into<String>, root: Span) -> Self {
        Self {
            trace_id: root.trace_id.clone(),
            root_span_id: root.span_id.clone(),
            service: service.into(),
            started_at: root.started_at,
            ended_at: None,
            duration_ms: None,
            status: TraceStatus::Pending,
            spans: vec![root],
        }
    }

    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|s| s.span_id == span_id)
    }

    pub fn span_mut(&mut self, span_id: &str) -> Option<&mut Span> {
        self.spans.iter_mut().find(|s| s.span_id == span_id)
    }

    /// Register another span; a finalized trace reopens.
    pub fn add_span(&mut self, span: Span) {
        self.spans.push(span);
        self.ended_at = None;
        self.duration_ms = None;
        self.status = TraceStatus::Pending;
    }

    pub fn open_span_count(&self) -> usize {
        self.spans.iter().filter(|s| !s.is_closed()).count()
    }

    /// Finalize the trace if every span has closed.
    ///
    /// Returns `true` if the trace transitioned to a terminal status.
    pub fn try_finalize(&mut self) -> bool {
        if self.status.is_terminal() || self.open_span_count() > 0 {
            return false;
        }

        let Some(end) = self.spans.iter().filter_map(|s| s.ended_at).max() else {
            return false;
        };

        self.ended_at = Some(end);
        self.duration_ms = Some(millis_between(self.started_at, end));
        self.status = if self.spans.iter().any(|s| s.status == SpanStatus::Error) {
            TraceStatus::Error
        } else {
            TraceStatus::Success
        };
        true
    }
}

pub(crate) fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}
