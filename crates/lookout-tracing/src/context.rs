//! Task-local span context.
//!
//! Carries the "current" trace and span across `.await` points so nested
//! operations can parent their spans without threading identifiers by hand.

use std::future::Future;

tokio::task_local! {
    static CURRENT_CONTEXT: SpanContext;
}

/// Identifies the span that new child spans should attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
    /// Owning transaction, when the span was opened under one.
    pub transaction_id: Option<String>,
}

impl SpanContext {
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            transaction_id: None,
        }
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    /// Context for a child span of this one, keeping trace and transaction.
    pub fn child(&self, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: span_id.into(),
            transaction_id: self.transaction_id.clone(),
        }
    }
}

/// Run `f` with `context` as the current span context.
pub async fn with_span_context<F, T>(context: SpanContext, f: F) -> T
where
    F: Future<Output = T>,
{
    CURRENT_CONTEXT.scope(context, f).await
}

/// The current span context, if any.
pub fn current_span_context() -> Option<SpanContext> {
    CURRENT_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// Current trace ID (returns None outside a scoped context).
pub fn current_trace_id() -> Option<String> {
    CURRENT_CONTEXT.try_with(|ctx| ctx.trace_id.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nested_scopes() {
        let outer = SpanContext::new("trace-1", "span-a").with_transaction("tx-1");

        let seen = with_span_context(outer.clone(), async {
            let inner = current_span_context().unwrap().child("span-b");
            let nested = with_span_context(inner, async { current_span_context() }).await;
            (current_span_context(), nested)
        })
        .await;

        assert_eq!(seen.0, Some(outer));
        let nested = seen.1.unwrap();
        assert_eq!(nested.span_id, "span-b");
        assert_eq!(nested.trace_id, "trace-1");
        assert_eq!(nested.transaction_id.as_deref(), Some("tx-1"));
    }

    #[tokio::test]
    async fn test_no_context_outside_scope() {
        assert!(current_span_context().is_none());
        assert!(current_trace_id().is_none());
    }
}
