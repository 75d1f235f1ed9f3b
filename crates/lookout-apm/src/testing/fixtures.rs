//! Test fixtures.

use chrono::Utc;

use crate::alerts::{Alert, AlertContext, AlertStatus};
use crate::config::ErrorsConfig;
use crate::errors::{ErrorContext, ErrorStatus, SeverityClassifier, TrackedError, fingerprint};

/// A first-occurrence tracked error classified by the default table.
pub fn tracked_error(error_type: &str, message: &str) -> TrackedError {
    let now = Utc::now();
    TrackedError {
        id: uuid::Uuid::new_v4().to_string(),
        fingerprint: fingerprint(error_type, message),
        message: message.to_string(),
        error_type: error_type.to_string(),
        stack: None,
        category: None,
        first_seen: now,
        last_seen: now,
        count: 1,
        status: ErrorStatus::New,
        severity: SeverityClassifier::new(ErrorsConfig::default().severity_rules)
            .classify(error_type, None),
        context: ErrorContext {
            environment: "test".to_string(),
            ..Default::default()
        },
        tags: Default::default(),
    }
}

/// An active alert for `error`.
pub fn alert_for(error: &TrackedError, rule_id: &str) -> Alert {
    Alert {
        id: uuid::Uuid::new_v4().to_string(),
        rule_id: rule_id.to_string(),
        title: format!("test rule: {}", error.error_type),
        message: error.message.clone(),
        severity: error.severity,
        timestamp: Utc::now(),
        status: AlertStatus::Active,
        resolved_at: None,
        context: AlertContext {
            error_ids: vec![error.id.clone()],
            condition: "any error".to_string(),
        },
    }
}
