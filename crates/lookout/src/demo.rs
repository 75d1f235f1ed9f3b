//! Synthetic traffic for `lookout demo`.

use anyhow::Result;
use chrono::{Duration, Utc};
use lookout_apm::{
    AlertAction, AlertRule, ErrorReport, Monitor, RequestInfo, Severity, TransactionContext,
    TransactionType,
};
use lookout_tracing::{SpanStatus, with_span_context};
use rand::Rng;
use serde_json::json;

const ROUTES: &[&str] = &[
    "GET /orders",
    "POST /orders",
    "GET /users/:id",
    "GET /health",
];

#[derive(Debug, thiserror::Error)]
#[error("query failed: {0}")]
struct QueryError(&'static str);

/// Rule installed so the demo shows alerts firing.
pub fn demo_rule() -> AlertRule {
    AlertRule::new("Database failures")
        .with_id("demo-database")
        .with_severities(vec![Severity::High, Severity::Critical])
        .with_error_count(3, 5)
        .with_cooldown(10)
        .with_action(AlertAction::Email {
            to: vec!["oncall@example.com".to_string()],
            from: None,
        })
}

/// Drive `requests` synthetic requests through the monitor and return the
/// resulting metrics, error stats and active alerts.
pub async fn run(
    monitor: &Monitor,
    requests: usize,
    failure_rate: f64,
) -> Result<serde_json::Value> {
    monitor.add_alert_rule(demo_rule()).await?;

    for i in 0..requests {
        let route = ROUTES[i % ROUTES.len()];
        let (duration_ms, fail) = {
            let mut rng = rand::rng();
            (
                rng.random_range(5..400i64),
                rng.random_bool(failure_rate.clamp(0.0, 1.0)),
            )
        };

        let (method, path) = route.split_once(' ').unwrap_or(("GET", route));
        let request = RequestInfo::new(method, path).with_header("authorization", "Bearer demo");
        let started = Utc::now() - Duration::milliseconds(duration_ms);
        let Some(id) = monitor.transactions().start_transaction_at(
            route,
            TransactionType::Request,
            Some(TransactionContext::default().with_request(request)),
            started,
        ) else {
            continue;
        };

        let work = handle(monitor, fail, i % 10 == 9);
        let status = match monitor.transactions().span_context(&id) {
            Some(context) => with_span_context(context, work).await,
            None => work.await,
        };
        monitor.end_transaction(&id, status).await;
    }

    tracing::info!(requests, "Demo traffic complete");
    Ok(json!({
        "metrics": monitor.aggregate_metrics().await,
        "errors": monitor.get_error_stats(),
        "alerts": monitor.get_active_alerts(),
    }))
}

async fn handle(monitor: &Monitor, fail: bool, type_error: bool) -> SpanStatus {
    let query = monitor
        .trace_database_operation("select", "orders", async move {
            if fail {
                Err(QueryError("deadlock detected"))
            } else {
                Ok(())
            }
        })
        .await;

    if type_error {
        monitor
            .track_error(
                ErrorReport::new("TypeError", "Cannot read properties of undefined")
                    .with_stack("at renderOrder (orders.js:42)"),
                None,
                None,
            )
            .await;
    }

    match query {
        Ok(()) => SpanStatus::Success,
        Err(_) => SpanStatus::Error,
    }
}
