//! Request tracking for axum routers.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/orders", get(list_orders))
//!     .layer(axum::middleware::from_fn_with_state(monitor.clone(), track_requests));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{MatchedPath, Request, State};
use axum::http::header::{HeaderMap, HeaderValue, USER_AGENT};
use axum::middleware::Next;
use axum::response::Response;
use lookout_tracing::{SpanStatus, with_span_context};

use crate::context::{RequestInfo, ResponseInfo};
use crate::monitor::Monitor;
use crate::transaction::{TransactionContext, TransactionType};

/// Response header carrying the request's trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Wrap each request in a `request` transaction.
///
/// The handler runs inside the transaction's span context. Responses with a
/// 5xx status end the transaction with `error`.
pub async fn track_requests(
    State(monitor): State<Arc<Monitor>>,
    request: Request,
    next: Next,
) -> Response {
    let transactions = monitor.transactions();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let name = format!("{} {}", request.method(), path);

    let context = TransactionContext::default().with_request(request_info(&request));
    let Some(id) = transactions.start_transaction(&name, TransactionType::Request, Some(context))
    else {
        return next.run(request).await;
    };

    let span_context = transactions.span_context(&id);
    let mut response = match span_context.clone() {
        Some(context) => with_span_context(context, next.run(request)).await,
        None => next.run(request).await,
    };

    let mut info = ResponseInfo::new(response.status().as_u16());
    info.headers = header_map(response.headers());
    monitor.errors().redactor().redact_map(&mut info.headers);
    let status = if info.is_server_error() {
        SpanStatus::Error
    } else {
        SpanStatus::Success
    };
    transactions.set_transaction_response(&id, info);
    transactions.end_transaction(&id, status).await;

    if let Some(value) = span_context.and_then(|c| HeaderValue::from_str(&c.trace_id).ok()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

fn request_info(request: &Request) -> RequestInfo {
    let uri = request.uri();
    let headers = request.headers();
    let mut info = RequestInfo::new(request.method().as_str(), uri.to_string());
    info.headers = header_map(headers);
    info.query = uri.query().map(parse_query).unwrap_or_default();
    info.user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    info.client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string());
    info
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
