//! Alert engine.
//!
//! Rules are evaluated against every tracked error occurrence in this order:
//! enabled, cooldown, severity allow-list, error-count condition, error-rate
//! condition. A rule that passes fires an [`Alert`], records its trigger time
//! and runs its actions one after another. A failing action is logged and the
//! remaining actions still run.

pub mod channels;
pub mod types;

pub use channels::{
    EmailMessage, EmailTransport, LogEmailTransport, ReqwestWebhookClient, SharedEmailTransport,
    SharedWebhookClient, WebhookClient, render_email,
};
pub use types::{
    Alert, AlertAction, AlertConditions, AlertContext, AlertRule, AlertStatus, CountCondition,
    RateCondition,
};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::PersistenceConfig;
use crate::error::{ApmError, Result};
use crate::errors::TrackedError;
use crate::metrics::PerformanceAggregator;
use crate::store::{self, SharedStore, keys};

#[derive(Serialize)]
struct WebhookPayload<'a> {
    alert: &'a Alert,
    error: &'a TrackedError,
}

/// Evaluates alert rules and dispatches notifications.
pub struct AlertEngine {
    rules: Mutex<Vec<AlertRule>>,
    alerts: Mutex<VecDeque<Alert>>,
    aggregator: Arc<PerformanceAggregator>,
    store: SharedStore,
    email: SharedEmailTransport,
    webhook: SharedWebhookClient,
    default_sender: String,
    persistence: PersistenceConfig,
    max_alerts: usize,
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("default_sender", &self.default_sender)
            .field("max_alerts", &self.max_alerts)
            .finish_non_exhaustive()
    }
}

impl AlertEngine {
    pub fn new(aggregator: Arc<PerformanceAggregator>, store: SharedStore) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            alerts: Mutex::new(VecDeque::new()),
            aggregator,
            store,
            email: Arc::new(LogEmailTransport),
            webhook: Arc::new(ReqwestWebhookClient::default()),
            default_sender: "alerts@lookout.local".to_string(),
            persistence: PersistenceConfig::default(),
            max_alerts: 1000,
        }
    }

    pub fn with_email(mut self, email: SharedEmailTransport) -> Self {
        self.email = email;
        self
    }

    pub fn with_webhook(mut self, webhook: SharedWebhookClient) -> Self {
        self.webhook = webhook;
        self
    }

    /// Sender used by email actions that do not set `from`.
    pub fn with_default_sender(mut self, sender: impl Into<String>) -> Self {
        self.default_sender = sender.into();
        self
    }

    pub fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_max_alerts(mut self, max_alerts: usize) -> Self {
        self.max_alerts = max_alerts;
        self
    }

    fn rules(&self) -> MutexGuard<'_, Vec<AlertRule>> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn alerts(&self) -> MutexGuard<'_, VecDeque<Alert>> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Rule management
    // ------------------------------------------------------------------

    /// Largest error-count threshold a rule can reach; occurrences beyond the
    /// aggregator's error sample buffer are not counted.
    pub fn max_count_threshold(&self) -> u64 {
        self.aggregator.config().max_error_samples.max(1) as u64
    }

    /// Add or replace (by id) a rule and persist the rule set.
    ///
    /// Rules whose error-count threshold exceeds [`Self::max_count_threshold`]
    /// are rejected. The in-memory rule set is updated even when persisting
    /// fails.
    pub async fn add_alert_rule(&self, rule: AlertRule) -> Result<()> {
        if let Some(count) = &rule.conditions.error_count {
            let max = self.max_count_threshold();
            if count.threshold > max {
                return Err(ApmError::Config(format!(
                    "rule '{}' error_count threshold {} exceeds metrics.max_error_samples {}",
                    rule.id, count.threshold, max
                )));
            }
        }
        let snapshot = {
            let mut rules = self.rules();
            match rules.iter_mut().find(|r| r.id == rule.id) {
                Some(existing) => *existing = rule,
                None => rules.push(rule),
            }
            rules.clone()
        };
        self.save_rules(&snapshot).await
    }

    /// Remove a rule; returns whether it existed.
    pub async fn remove_alert_rule(&self, rule_id: &str) -> Result<bool> {
        let (removed, snapshot) = {
            let mut rules = self.rules();
            let before = rules.len();
            rules.retain(|r| r.id != rule_id);
            (rules.len() != before, rules.clone())
        };
        if removed {
            self.save_rules(&snapshot).await?;
        }
        Ok(removed)
    }

    pub async fn set_alert_rule_enabled(&self, rule_id: &str, enabled: bool) -> Result<bool> {
        let snapshot = {
            let mut rules = self.rules();
            let Some(rule) = rules.iter_mut().find(|r| r.id == rule_id) else {
                return Ok(false);
            };
            rule.enabled = enabled;
            rules.clone()
        };
        self.save_rules(&snapshot).await?;
        Ok(true)
    }

    pub fn list_alert_rules(&self) -> Vec<AlertRule> {
        self.rules().clone()
    }

    /// Replace the in-memory rule set with the persisted one.
    ///
    /// Returns the number of rules loaded; a missing key loads nothing.
    pub async fn load_alert_rules(&self) -> Result<usize> {
        let Some(rules) =
            store::get_json::<Vec<AlertRule>>(self.store.as_ref(), keys::ALERT_RULES).await?
        else {
            return Ok(0);
        };
        let count = rules.len();
        *self.rules() = rules;
        tracing::debug!(count, "Loaded alert rules");
        Ok(count)
    }

    async fn save_rules(&self, rules: &[AlertRule]) -> Result<()> {
        store::put_json(self.store.as_ref(), keys::ALERT_RULES, rules, None).await
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate every rule against `error`; returns the alerts fired.
    pub async fn check_alert_rules(&self, error: &TrackedError) -> Vec<Alert> {
        self.check_alert_rules_at(error, Utc::now()).await
    }

    pub async fn check_alert_rules_at(&self, error: &TrackedError, now: DateTime<Utc>) -> Vec<Alert> {
        let (fired, snapshot) = {
            let mut rules = self.rules();
            let mut fired = Vec::new();
            for rule in rules.iter_mut() {
                if let Some(condition) = self.evaluate(rule, error, now) {
                    rule.last_triggered = Some(now);
                    fired.push((rule.clone(), self.build_alert(rule, error, condition, now)));
                }
            }
            (fired, rules.clone())
        };

        if fired.is_empty() {
            return Vec::new();
        }

        store::persist(
            self.store.as_ref(),
            keys::ALERT_RULES,
            &snapshot,
            None,
            self.persistence.write_timeout(),
        )
        .await;

        let mut alerts = Vec::with_capacity(fired.len());
        for (rule, alert) in fired {
            tracing::info!(
                rule = %rule.name,
                alert_id = %alert.id,
                severity = %alert.severity,
                condition = %alert.context.condition,
                "Alert fired"
            );
            self.alerts().push_back(alert.clone());
            store::persist(
                self.store.as_ref(),
                &keys::alert(&alert.id),
                &alert,
                Some(self.persistence.error_ttl()),
                self.persistence.write_timeout(),
            )
            .await;
            self.execute_actions(&rule, &alert, error).await;
            alerts.push(alert);
        }
        alerts
    }

    /// Returns a description of the satisfied conditions, or `None`.
    fn evaluate(&self, rule: &AlertRule, error: &TrackedError, now: DateTime<Utc>) -> Option<String> {
        if !rule.enabled {
            return None;
        }
        if rule.in_cooldown(now) {
            tracing::debug!(rule = %rule.name, "Rule in cooldown");
            return None;
        }

        let conditions = &rule.conditions;
        if !conditions.severities.is_empty() && !conditions.severities.contains(&error.severity) {
            return None;
        }

        let mut satisfied = Vec::new();

        if let Some(count) = &conditions.error_count {
            let seen = self
                .aggregator
                .errors_within(window(count.window_minutes), now) as u64;
            if seen < count.threshold {
                return None;
            }
            satisfied.push(format!(
                "error_count {} >= {} in {}m",
                seen, count.threshold, count.window_minutes
            ));
        }

        if let Some(rate) = &conditions.error_rate {
            let observed = self
                .aggregator
                .error_rate_within(window(rate.window_minutes), now);
            if observed < rate.threshold {
                return None;
            }
            satisfied.push(format!(
                "error_rate {:.1}% >= {}% in {}m",
                observed, rate.threshold, rate.window_minutes
            ));
        }

        if satisfied.is_empty() {
            satisfied.push(if conditions.severities.is_empty() {
                "any error".to_string()
            } else {
                format!("severity {}", error.severity)
            });
        }
        Some(satisfied.join(", "))
    }

    fn build_alert(
        &self,
        rule: &AlertRule,
        error: &TrackedError,
        condition: String,
        now: DateTime<Utc>,
    ) -> Alert {
        Alert {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            title: format!("{}: {}", rule.name, error.error_type),
            message: error.message.clone(),
            severity: error.severity,
            timestamp: now,
            status: AlertStatus::Active,
            resolved_at: None,
            context: AlertContext {
                error_ids: vec![error.id.clone()],
                condition,
            },
        }
    }

    async fn execute_actions(&self, rule: &AlertRule, alert: &Alert, error: &TrackedError) {
        for action in &rule.actions {
            let result = match action {
                AlertAction::Email { to, from } => {
                    let (subject, html) = render_email(alert, error);
                    let message = EmailMessage {
                        from: from.clone().unwrap_or_else(|| self.default_sender.clone()),
                        to: to.clone(),
                        subject,
                        html,
                    };
                    self.email.send(message).await
                }
                AlertAction::Webhook { url, headers } => {
                    match serde_json::to_value(WebhookPayload { alert, error }) {
                        Ok(body) => self.webhook.post(url, headers, &body).await,
                        Err(e) => Err(e.into()),
                    }
                }
            };

            if let Err(e) = result {
                tracing::warn!(
                    rule = %rule.name,
                    alert_id = %alert.id,
                    action = action.kind(),
                    "Alert action failed: {}",
                    e
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.alerts()
            .iter()
            .filter(|a| a.status == AlertStatus::Active)
            .cloned()
            .collect()
    }

    /// Most recent alerts first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts().iter().rev().take(limit).cloned().collect()
    }

    /// Mark an alert resolved; `None` for unknown ids.
    pub async fn resolve_alert(&self, alert_id: &str) -> Option<Alert> {
        let resolved = {
            let mut alerts = self.alerts();
            let alert = alerts.iter_mut().find(|a| a.id == alert_id)?;
            alert.status = AlertStatus::Resolved;
            alert.resolved_at.get_or_insert_with(Utc::now);
            alert.clone()
        };
        store::persist(
            self.store.as_ref(),
            &keys::alert(&resolved.id),
            &resolved,
            Some(self.persistence.error_ttl()),
            self.persistence.write_timeout(),
        )
        .await;
        Some(resolved)
    }

    /// Keep only the newest `max_alerts` alerts; returns how many were dropped.
    pub fn trim_alerts(&self) -> usize {
        let mut alerts = self.alerts();
        let excess = alerts.len().saturating_sub(self.max_alerts);
        alerts.drain(..excess);
        excess
    }
}

fn window(minutes: u64) -> Duration {
    Duration::minutes(i64::try_from(minutes).unwrap_or(i64::MAX).min(i64::MAX / 60_000))
}
