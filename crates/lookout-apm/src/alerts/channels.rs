//! Notification channels used by the alert engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::alerts::types::Alert;
use crate::error::{ApmError, Result};
use crate::errors::TrackedError;

/// An outbound email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Email delivery channel.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<()>;
}

pub type SharedEmailTransport = Arc<dyn EmailTransport>;

/// Transport that logs instead of delivering.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailTransport;

#[async_trait]
impl EmailTransport for LogEmailTransport {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        tracing::info!(
            from = %message.from,
            to = ?message.to,
            subject = %message.subject,
            "Email alert (log transport)"
        );
        Ok(())
    }
}

/// HTTP webhook channel.
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<()>;
}

pub type SharedWebhookClient = Arc<dyn WebhookClient>;

/// Webhook client over `reqwest`. Non-2xx responses are failures.
#[derive(Debug, Clone)]
pub struct ReqwestWebhookClient {
    client: reqwest::Client,
}

impl Default for ReqwestWebhookClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ReqwestWebhookClient {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl WebhookClient for ReqwestWebhookClient {
    async fn post(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<()> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApmError::Notification(format!("HTTP {} - {}", status, text)));
        }
        Ok(())
    }
}

/// Render the fixed alert summary email.
pub fn render_email(alert: &Alert, error: &TrackedError) -> (String, String) {
    let subject = format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.title);
    let html = format!(
        "<h2>{title}</h2>\
         <p>{message}</p>\
         <table>\
         <tr><td>Severity</td><td>{severity}</td></tr>\
         <tr><td>Error type</td><td>{error_type}</td></tr>\
         <tr><td>Occurrences</td><td>{count}</td></tr>\
         <tr><td>First seen</td><td>{first_seen}</td></tr>\
         <tr><td>Last seen</td><td>{last_seen}</td></tr>\
         <tr><td>Environment</td><td>{environment}</td></tr>\
         <tr><td>Condition</td><td>{condition}</td></tr>\
         </table>\
         <p>Alert {alert_id} / error {error_id}</p>",
        title = escape_html(&alert.title),
        message = escape_html(&error.message),
        severity = alert.severity,
        error_type = escape_html(&error.error_type),
        count = error.count,
        first_seen = error.first_seen.to_rfc3339(),
        last_seen = error.last_seen.to_rfc3339(),
        environment = escape_html(&error.context.environment),
        condition = escape_html(&alert.context.condition),
        alert_id = alert.id,
        error_id = error.id,
    );
    (subject, html)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
