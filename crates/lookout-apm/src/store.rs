//! Persistent store abstraction.
//!
//! Finalized transactions, tracked errors, fired alerts and the alert rule set
//! are handed to a key-value store with per-key expiry. The in-memory store is
//! the default; production deployments plug in their own [`KvStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::{ApmError, Result};

/// Key layout used by the monitor.
pub mod keys {
    pub const ALERT_RULES: &str = "apm:alert_rules";

    pub fn transaction(id: &str) -> String {
        format!("apm:transaction:{}", id)
    }

    pub fn error(id: &str) -> String {
        format!("apm:error:{}", id)
    }

    pub fn alert(id: &str) -> String {
        format!("apm:alert:{}", id)
    }
}

/// Key-value store with optional per-key expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value`; `ttl = None` never expires.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Drop expired entries, returning how many were removed.
    ///
    /// Stores that expire keys natively keep the default.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Thread-safe wrapper for stores.
pub type SharedStore = Arc<dyn KvStore>;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| now < exp)
    }
}

/// In-process store; expired keys are dropped on read and by [`KvStore::purge_expired`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared instance.
    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }

    /// Number of unexpired keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.data
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => Ok(Some(entry.value.clone())),
            Some(_) => {
                drop(data);
                self.data.write().await.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.data
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut data = self.data.write().await;
        let before = data.len();
        data.retain(|_, entry| entry.is_live(now));
        Ok(before - data.len())
    }
}

/// Serialize `value` as JSON under `key`.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let json = serde_json::to_string(value)?;
    store.put(key, json, ttl).await
}

/// Read and deserialize the JSON stored under `key`.
pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Best-effort write bounded by `timeout`.
///
/// Failures are logged and reported as `false`; in-memory state is never
/// rolled back.
pub async fn persist<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
    timeout: Duration,
) -> bool {
    let result = match tokio::time::timeout(timeout, put_json(store, key, value, ttl)).await {
        Ok(result) => result,
        Err(_) => Err(ApmError::Timeout(timeout.as_millis() as u64)),
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(key, "Persistence write failed: {}", e);
            false
        }
    }
}
