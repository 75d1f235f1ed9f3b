//! Alert rules and fired alerts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Severity;

/// Error-rate condition: fires when the rate over `window_minutes` reaches
/// `threshold` percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCondition {
    pub threshold: f64,
    pub window_minutes: u64,
}

/// Error-count condition: fires when occurrences over `window_minutes`
/// reach `threshold`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountCondition {
    pub threshold: u64,
    pub window_minutes: u64,
}

/// Conditions of a rule. Unset conditions are satisfied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConditions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<RateCondition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<CountCondition>,
    /// Allowed severities; empty allows all.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub severities: Vec<Severity>,
}

/// A notification step run when a rule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertAction {
    Email {
        to: Vec<String>,
        /// Overrides the engine's default sender.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    Webhook {
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
}

impl AlertAction {
    pub fn kind(&self) -> &'static str {
        match self {
            AlertAction::Email { .. } => "email",
            AlertAction::Webhook { .. } => "webhook",
        }
    }
}

/// A named alerting policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: AlertConditions,
    #[serde(default)]
    pub actions: Vec<AlertAction>,
    #[serde(default)]
    pub cooldown_minutes: u64,
    /// Set by the engine when the rule fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl AlertRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            enabled: true,
            conditions: AlertConditions::default(),
            actions: Vec::new(),
            cooldown_minutes: 0,
            last_triggered: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_severities(mut self, severities: Vec<Severity>) -> Self {
        self.conditions.severities = severities;
        self
    }

    pub fn with_error_count(mut self, threshold: u64, window_minutes: u64) -> Self {
        self.conditions.error_count = Some(CountCondition {
            threshold,
            window_minutes,
        });
        self
    }

    pub fn with_error_rate(mut self, threshold: f64, window_minutes: u64) -> Self {
        self.conditions.error_rate = Some(RateCondition {
            threshold,
            window_minutes,
        });
        self
    }

    pub fn with_action(mut self, action: AlertAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_cooldown(mut self, minutes: u64) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    /// Whether the rule fired less than `cooldown_minutes` before `now`.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_triggered else {
            return false;
        };
        let minutes = i64::try_from(self.cooldown_minutes)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 60_000);
        last.checked_add_signed(chrono::Duration::minutes(minutes))
            .is_none_or(|until| now < until)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Active,
    Resolved,
}

/// What made an alert fire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertContext {
    pub error_ids: Vec<String>,
    pub condition: String,
}

/// One firing of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub status: AlertStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub context: AlertContext,
}
