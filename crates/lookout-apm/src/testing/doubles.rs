//! Test doubles for the collaborator seams.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::alerts::{EmailMessage, EmailTransport, WebhookClient};
use crate::error::{ApmError, Result};
use crate::metrics::MetricsSink;
use crate::store::KvStore;

/// Email transport that captures every message.
#[derive(Debug, Default)]
pub struct RecordingEmail {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingEmail {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingEmail {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Webhook client that captures calls and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingWebhook {
    calls: Mutex<Vec<(String, serde_json::Value)>>,
    failures: AtomicUsize,
}

impl RecordingWebhook {
    /// Fail the next `n` calls (they are still recorded).
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookClient for RecordingWebhook {
    async fn post(
        &self,
        url: &str,
        _headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), body.clone()));
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ApmError::Notification("HTTP 503 - unavailable".to_string()));
        }
        Ok(())
    }
}

/// Metrics sink that captures gauges.
#[derive(Debug, Default)]
pub struct RecordingSink {
    gauges: Mutex<Vec<(String, f64)>>,
}

impl RecordingSink {
    pub fn gauges(&self) -> Vec<(String, f64)> {
        self.gauges.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn gauge(&self, name: &str, value: f64) {
        self.gauges.lock().unwrap().push((name.to_string(), value));
    }
}

/// Store whose every operation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(ApmError::Store("store unavailable".to_string()))
    }

    async fn put(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
        Err(ApmError::Store("store unavailable".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(ApmError::Store("store unavailable".to_string()))
    }
}

/// Store that sleeps before every write.
#[derive(Debug)]
pub struct SlowStore {
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl KvStore for SlowStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }
}
