//! Span and trace building for lookout.
//!
//! - **Types**: `Span`, `Trace`, and their statuses
//! - **Tracer**: live-span registry, trace finalization, retention sweeps
//! - **Context**: task-local propagation of the current span
//! - **Writer**: JSONL export of finalized traces
//!
//! # Usage
//!
//! ```rust,no_run
//! use lookout_tracing::{SpanStatus, Tracer, TracerConfig};
//!
//! let tracer = Tracer::new(TracerConfig::new("checkout"));
//!
//! let root = tracer.start_span("POST /orders", None, None, None).unwrap();
//! let trace_id = tracer.end_span(&root, SpanStatus::Success, None).unwrap().trace_id;
//!
//! let trace = tracer.get_trace(&trace_id).unwrap();
//! assert!(trace.status.is_terminal());
//! ```

pub mod context;
pub mod tracer;
pub mod types;
pub mod writer;

pub use context::{SpanContext, current_span_context, current_trace_id, with_span_context};
pub use tracer::{SpanGuard, SweepReport, Tracer, TracerConfig};
pub use types::{LogLevel, Span, SpanLog, SpanStatus, Tags, Trace, TraceStatus};
pub use writer::{ExportTarget, TraceWriter, WriteError};
