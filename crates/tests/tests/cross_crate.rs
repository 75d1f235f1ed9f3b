//! Cross-crate integration and E2E tests
//!
//! These tests verify that the crates work together correctly
//! and test full flows from a request down to exported traces and
//! delivered alerts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::{get, post};
use chrono::Utc;
use lookout_apm::{
    AlertAction, AlertRule, ApmConfig, EmailMessage, EmailTransport, ErrorContext, ErrorReport,
    ErrorStatus, Monitor, MonitorDeps, NoopSampler, ReqwestWebhookClient, RequestInfo, Severity,
    TRACE_ID_HEADER, TransactionType, track_requests,
};
use lookout_tracing::{
    ExportTarget, SpanStatus, TraceStatus, TraceWriter, Tracer, TracerConfig, current_span_context,
    with_span_context,
};
use tower::ServiceExt;

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct RecordingEmail {
    sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl EmailTransport for RecordingEmail {
    async fn send(&self, message: EmailMessage) -> lookout_apm::Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Received {
    bodies: Arc<Mutex<Vec<(HeaderMap, serde_json::Value)>>>,
}

async fn receive(
    State(received): State<Received>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> StatusCode {
    received.bodies.lock().unwrap().push((headers, body));
    StatusCode::NO_CONTENT
}

/// Start a webhook receiver; `/hook` accepts, `/fail` answers 500.
async fn spawn_receiver() -> (String, Received) {
    let received = Received::default();
    let app = Router::new()
        .route("/hook", post(receive))
        .route(
            "/fail",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "down") }),
        )
        .with_state(received.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), received)
}

fn quiet_deps() -> MonitorDeps {
    MonitorDeps::default().with_sampler(Arc::new(NoopSampler))
}

// ============================================================================
// Full flow
// ============================================================================

/// E2E: a failing database call inside a transaction is tracked, fires an
/// alert delivered over HTTP and by email, and its trace is exported.
#[tokio::test]
async fn test_e2e_failing_request_alerts_and_exports() {
    let (base_url, received) = spawn_receiver().await;
    let dir = tempfile::tempdir().unwrap();
    let export_path = dir.path().join("traces.jsonl");

    let email = Arc::new(RecordingEmail::default());
    let deps = quiet_deps()
        .with_email(email.clone())
        .with_webhook(Arc::new(ReqwestWebhookClient::new(Duration::from_secs(5))))
        .with_email_sender("lookout@ops.test");
    let writer = TraceWriter::new(ExportTarget::SingleFile(export_path.clone())).unwrap();
    let monitor = Monitor::with_trace_writer(ApmConfig::default(), deps, writer);

    let rule = AlertRule::new("Database errors")
        .with_id("db")
        .with_severities(vec![Severity::High])
        .with_action(AlertAction::Webhook {
            url: format!("{}/fail", base_url),
            headers: HashMap::new(),
        })
        .with_action(AlertAction::Webhook {
            url: format!("{}/hook", base_url),
            headers: HashMap::from([("x-lookout-token".to_string(), "abc".to_string())]),
        })
        .with_action(AlertAction::Email {
            to: vec!["dba@ops.test".to_string()],
            from: None,
        });
    monitor.add_alert_rule(rule).await.unwrap();

    let request = RequestInfo::new("GET", "/orders").with_header("Cookie", "session=1");
    let id = monitor
        .transactions()
        .start_transaction(
            "GET /orders",
            TransactionType::Request,
            Some(lookout_apm::TransactionContext::default().with_request(request)),
        )
        .unwrap();
    let context = monitor.transactions().span_context(&id).unwrap();

    let result: Result<(), std::io::Error> = with_span_context(
        context.clone(),
        monitor.trace_database_operation("select", "orders", async {
            Err(std::io::Error::other("deadlock detected"))
        }),
    )
    .await;
    assert!(result.is_err());

    let transaction = monitor.end_transaction(&id, SpanStatus::Error).await.unwrap();
    assert_eq!(transaction.errors.len(), 1);
    assert_eq!(transaction.spans.len(), 2);

    // The failing /fail webhook did not stop the later actions.
    let bodies = received.bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    let (headers, body) = &bodies[0];
    assert_eq!(headers["x-lookout-token"], "abc");
    assert_eq!(body["alert"]["rule_id"], "db");
    assert_eq!(body["error"]["category"], "database");
    assert_eq!(body["error"]["context"]["transaction_id"], id.as_str());
    assert_eq!(
        body["error"]["context"]["request"]["headers"]["Cookie"],
        "[REDACTED]"
    );

    let sent = email.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].from, "lookout@ops.test");
    assert!(sent[0].subject.starts_with("[HIGH]"));

    assert_eq!(monitor.get_active_alerts().len(), 1);

    let traces = TraceWriter::read_traces(&export_path).unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].trace_id, context.trace_id);
    assert_eq!(traces[0].status, TraceStatus::Error);
    assert_eq!(traces[0].spans.len(), 2);
}

/// E2E: requests through the axum middleware nest handler spans under the
/// request transaction.
#[tokio::test]
async fn test_e2e_middleware_nests_handler_spans() {
    let monitor = Arc::new(Monitor::new(ApmConfig::default(), quiet_deps()));

    let handler_monitor = monitor.clone();
    let app = Router::new()
        .route(
            "/pay",
            get(move || {
                let monitor = handler_monitor.clone();
                async move {
                    let inside = current_span_context().is_some();
                    let charged: Result<&str, std::io::Error> = monitor
                        .trace_external_call("payments", "/charge", async { Ok("charged") })
                        .await;
                    format!("{} {}", charged.unwrap_or("failed"), inside)
                }
            }),
        )
        .layer(axum::middleware::from_fn_with_state(
            monitor.clone(),
            track_requests,
        ));

    let response = app
        .oneshot(Request::builder().uri("/pay").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let trace_id = response.headers()[TRACE_ID_HEADER]
        .to_str()
        .unwrap()
        .to_string();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"charged true");

    let trace = monitor.get_trace(&trace_id).unwrap();
    assert_eq!(trace.status, TraceStatus::Success);
    assert_eq!(trace.spans.len(), 2);
    let root = &trace.spans[0];
    let call = &trace.spans[1];
    assert_eq!(call.operation, "payments /charge");
    assert_eq!(call.parent_span_id.as_deref(), Some(root.span_id.as_str()));
    assert!(monitor.get_active_transactions().is_empty());
}

/// E2E: error triage and filters over errors tracked through the monitor.
#[tokio::test]
async fn test_e2e_error_triage() {
    let monitor = Monitor::new(ApmConfig::default(), quiet_deps());

    let id = monitor
        .track_error(ErrorReport::new("TypeError", "x is undefined"), None, None)
        .await
        .unwrap();
    monitor
        .track_error(
            ErrorReport::new("QueryError", "timeout").with_category("database"),
            None,
            None,
        )
        .await
        .unwrap();

    let resolved = monitor
        .update_error_status(&id, ErrorStatus::Resolved)
        .await
        .unwrap();
    assert_eq!(resolved.status, ErrorStatus::Resolved);

    let open = monitor
        .get_errors(&lookout_apm::ErrorFilters::default().with_status(ErrorStatus::New));
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].error_type, "QueryError");

    let stats = monitor.get_error_stats();
    assert_eq!(stats.unique_errors, 2);
    assert_eq!(stats.by_severity["critical"], 1);
    assert_eq!(stats.by_severity["high"], 1);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_fingerprint_stable_across_contexts() {
    let monitor = Monitor::new(ApmConfig::default(), quiet_deps());

    let first = monitor
        .track_error(
            ErrorReport::new("QueryError", "timeout").with_stack("at a"),
            Some(ErrorContext::default().with_custom("shard", 1.into())),
            None,
        )
        .await
        .unwrap();
    let second = monitor
        .track_error(
            ErrorReport::new("QueryError", "timeout").with_stack("at b"),
            Some(ErrorContext::default().with_request(RequestInfo::new("GET", "/x"))),
            None,
        )
        .await
        .unwrap();

    assert_eq!(first, second);
    let errors = monitor.get_recent_errors(10);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].count, 2);
    assert_eq!(errors[0].stack.as_deref(), Some("at a"));
}

#[test]
fn test_trace_duration_independent_of_end_order() {
    let start = Utc::now();
    let ms = chrono::Duration::milliseconds;
    let orders: [[usize; 3]; 3] = [[0, 1, 2], [2, 1, 0], [1, 2, 0]];
    let mut durations = Vec::new();

    for order in orders {
        let tracer = Tracer::new(TracerConfig::new("svc"));
        let root = tracer
            .start_span_at("root", None, None, None, start)
            .unwrap();
        let trace_id = tracer.trace_id_of(&root).unwrap();
        let a = tracer
            .start_span_at("a", Some(&root), Some(&trace_id), None, start + ms(5))
            .unwrap();
        let b = tracer
            .start_span_at("b", Some(&root), Some(&trace_id), None, start + ms(10))
            .unwrap();

        let ends = [(root, ms(100)), (a, ms(40)), (b, ms(250))];
        for (n, &i) in order.iter().enumerate() {
            let (span_id, end) = &ends[i];
            let before = tracer.get_trace(&trace_id).unwrap();
            assert_eq!(before.status, TraceStatus::Pending);
            tracer.end_span_at(span_id, SpanStatus::Success, None, start + *end);
            let after = tracer.get_trace(&trace_id).unwrap();
            assert_eq!(after.status.is_terminal(), n == 2);
        }
        durations.push(tracer.get_trace(&trace_id).unwrap().duration_ms);
    }

    assert_eq!(durations, vec![Some(250); 3]);
}

#[test]
fn test_percentiles_nearest_rank() {
    let sorted = [10, 20, 30, 40, 50];
    assert_eq!(lookout_apm::metrics::percentile(&sorted, 50.0), 30);
    assert_eq!(lookout_apm::metrics::percentile(&sorted, 95.0), 50);
    assert_eq!(lookout_apm::metrics::percentile(&sorted, 99.0), 50);
}

#[tokio::test]
async fn test_cooldown_window() {
    let monitor = Monitor::new(ApmConfig::default(), quiet_deps());
    monitor
        .add_alert_rule(AlertRule::new("any").with_cooldown(10))
        .await
        .unwrap();

    let t0 = Utc::now();
    let minutes = chrono::Duration::minutes;
    for (offset, expected_alerts) in [(0, 1), (5, 1), (9, 1), (10, 2), (15, 2)] {
        monitor
            .errors()
            .track_error_at(
                ErrorReport::new("QueryError", "timeout"),
                None,
                None,
                t0 + minutes(offset),
            )
            .await
            .unwrap();
        assert_eq!(
            monitor.get_active_alerts().len(),
            expected_alerts,
            "at t+{}m",
            offset
        );
    }
}

#[test]
fn test_redaction_idempotent() {
    let config = lookout_apm::ErrorsConfig::default();
    let redactor =
        lookout_apm::errors::Redactor::new(&config.sensitive_keys, config.redaction_marker);
    let mut context = ErrorContext::default()
        .with_request(
            RequestInfo::new("POST", "/login")
                .with_header("Authorization", "Bearer x")
                .with_query("api_key", "k"),
        )
        .with_custom(
            "payload",
            serde_json::json!({"password": "hunter2", "nested": [{"token": "t"}], "ok": 1}),
        );

    redactor.redact_context(&mut context);
    let once = context.clone();
    redactor.redact_context(&mut context);

    assert_eq!(context, once);
    assert_eq!(once.custom["payload"]["password"], "[REDACTED]");
    assert_eq!(once.custom["payload"]["nested"][0]["token"], "[REDACTED]");
    assert_eq!(once.custom["payload"]["ok"], 1);
}

#[tokio::test]
async fn test_scenario_dedup() {
    let monitor = Monitor::new(ApmConfig::default(), quiet_deps());
    for _ in 0..3 {
        monitor
            .track_error(ErrorReport::new("TypeError", "x is undefined"), None, None)
            .await
            .unwrap();
    }

    let errors = monitor.get_recent_errors(10);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].count, 3);
    assert_eq!(errors[0].severity, Severity::Critical);
    assert_eq!(errors[0].status, ErrorStatus::New);
}

#[tokio::test]
async fn test_scenario_severity_suppression() {
    let monitor = Monitor::new(ApmConfig::default(), quiet_deps());
    monitor
        .add_alert_rule(
            AlertRule::new("critical only")
                .with_severities(vec![Severity::Critical])
                .with_error_count(1, 5),
        )
        .await
        .unwrap();

    for _ in 0..20 {
        monitor
            .track_error(ErrorReport::new("TimeoutError", "slow"), None, None)
            .await
            .unwrap();
    }

    assert_eq!(monitor.get_recent_errors(1)[0].severity, Severity::Medium);
    assert!(monitor.get_active_alerts().is_empty());
}

#[tokio::test]
async fn test_scenario_disabled_sampling() {
    let mut config = ApmConfig::default();
    config.errors.sample_rate = 0.0;
    let monitor = Monitor::new(config, quiet_deps());

    for _ in 0..10 {
        assert!(
            monitor
                .track_error(ErrorReport::new("TypeError", "x"), None, None)
                .await
                .is_none()
        );
    }
    assert!(monitor.get_recent_errors(10).is_empty());
    assert_eq!(monitor.get_error_stats().unique_errors, 0);
}
