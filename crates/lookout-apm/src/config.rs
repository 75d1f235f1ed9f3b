//! Configuration for the APM core.
//!
//! Every field has a default, so an empty TOML table yields a working monitor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Severity;

/// Top-level APM configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ApmConfig {
    pub service: ServiceConfig,
    pub tracing: TracingConfig,
    pub errors: ErrorsConfig,
    pub metrics: MetricsConfig,
    pub retention: RetentionConfig,
    pub persistence: PersistenceConfig,
}

/// Identity of the monitored service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// Recorded in every tracked error's context.
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "lookout".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Span and transaction settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    /// Probability that a transaction is tracked (0.0-1.0).
    pub sample_rate: f64,
    /// Traces older than this are evicted by the retention sweep.
    pub max_trace_age_secs: u64,
    /// Open spans and live transactions older than this are force-closed.
    /// Unset leaves them open until their trace is evicted.
    pub max_span_age_secs: Option<u64>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 1.0,
            max_trace_age_secs: 3600,
            max_span_age_secs: None,
        }
    }
}

impl TracingConfig {
    pub fn tracer_config(&self, service_name: &str) -> lookout_tracing::TracerConfig {
        let mut config = lookout_tracing::TracerConfig::new(service_name)
            .with_enabled(self.enabled)
            .with_max_trace_age(chrono::Duration::seconds(secs_i64(self.max_trace_age_secs)));
        if let Some(secs) = self.max_span_age_secs {
            config = config.with_max_span_age(chrono::Duration::seconds(secs_i64(secs)));
        }
        config
    }
}

/// One entry of the severity classification table.
///
/// Matches when `error_type` is a case-insensitive substring of the error's
/// type, or `category` equals the error's declared category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SeverityRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub severity: Severity,
}

impl SeverityRule {
    pub fn for_type(pattern: &str, severity: Severity) -> Self {
        Self {
            error_type: Some(pattern.to_string()),
            category: None,
            severity,
        }
    }

    pub fn for_category(category: &str, severity: Severity) -> Self {
        Self {
            error_type: None,
            category: Some(category.to_string()),
            severity,
        }
    }
}

/// Error tracking settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ErrorsConfig {
    pub enabled: bool,
    /// Probability that an error occurrence is tracked (0.0-1.0).
    pub sample_rate: f64,
    /// Error types that are never tracked.
    pub ignored_types: Vec<String>,
    /// Keys whose values are redacted (case-insensitive substring).
    pub sensitive_keys: Vec<String>,
    pub redaction_marker: String,
    /// Ordered; first match wins, unmatched errors are `medium`.
    pub severity_rules: Vec<SeverityRule>,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 1.0,
            ignored_types: vec!["ValidationError".to_string()],
            sensitive_keys: ["password", "token", "secret", "authorization", "api_key", "cookie"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            redaction_marker: "[REDACTED]".to_string(),
            severity_rules: vec![
                SeverityRule::for_type("TypeError", Severity::Critical),
                SeverityRule::for_type("ReferenceError", Severity::Critical),
                SeverityRule::for_category("database", Severity::High),
            ],
        }
    }
}

/// Performance aggregation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Number of recent durations and completions kept.
    pub buffer_size: usize,
    pub throughput_window_secs: u64,
    /// Number of recent error samples kept for rate calculation.
    pub max_error_samples: usize,
    /// Interval between metric snapshots sent to the sink.
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            throughput_window_secs: 60,
            max_error_samples: 1000,
            interval_secs: 60,
        }
    }
}

/// Retention sweep settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub sweep_interval_secs: u64,
    /// Tracked errors not seen for this long leave the in-memory map.
    pub error_retention_secs: u64,
    /// Most recent alerts kept in memory.
    pub max_alerts: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            error_retention_secs: 86_400,
            max_alerts: 1000,
        }
    }
}

/// Persistent store hand-off settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub transaction_ttl_secs: u64,
    pub error_ttl_secs: u64,
    /// Upper bound on a single store write.
    pub write_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            transaction_ttl_secs: 3600,
            error_ttl_secs: 86_400,
            write_timeout_ms: 2000,
        }
    }
}

impl PersistenceConfig {
    pub fn transaction_ttl(&self) -> Duration {
        Duration::from_secs(self.transaction_ttl_secs)
    }

    pub fn error_ttl(&self) -> Duration {
        Duration::from_secs(self.error_ttl_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

fn secs_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX / 1000)
}

/// A field-level configuration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

impl ConfigValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl ApmConfig {
    /// Validate the configuration.
    ///
    /// Returns a list of validation errors if any are found.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.service.name.trim().is_empty() {
            errors.push(ConfigValidationError::new(
                "service.name",
                "Service name cannot be empty.",
            ));
        }

        for (field, rate) in [
            ("tracing.sample_rate", self.tracing.sample_rate),
            ("errors.sample_rate", self.errors.sample_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                errors.push(ConfigValidationError::new(
                    field,
                    format!("Sample rate {} must be between 0.0 and 1.0.", rate),
                ));
            }
        }

        if self.tracing.max_trace_age_secs == 0 {
            errors.push(ConfigValidationError::new(
                "tracing.max_trace_age_secs",
                "Max trace age must be greater than 0.",
            ));
        }

        if self.tracing.max_span_age_secs == Some(0) {
            errors.push(ConfigValidationError::new(
                "tracing.max_span_age_secs",
                "Max span age must be greater than 0 when set.",
            ));
        }

        if self.errors.redaction_marker.is_empty() {
            errors.push(ConfigValidationError::new(
                "errors.redaction_marker",
                "Redaction marker cannot be empty.",
            ));
        }

        for (i, rule) in self.errors.severity_rules.iter().enumerate() {
            if rule.error_type.is_none() && rule.category.is_none() {
                errors.push(ConfigValidationError::new(
                    format!("errors.severity_rules[{}]", i),
                    "Rule must set error_type or category.",
                ));
            }
        }

        for (field, value) in [
            ("metrics.buffer_size", self.metrics.buffer_size as u64),
            ("metrics.max_error_samples", self.metrics.max_error_samples as u64),
            ("metrics.throughput_window_secs", self.metrics.throughput_window_secs),
            ("metrics.interval_secs", self.metrics.interval_secs),
            ("retention.sweep_interval_secs", self.retention.sweep_interval_secs),
            ("retention.max_alerts", self.retention.max_alerts as u64),
            ("persistence.write_timeout_ms", self.persistence.write_timeout_ms),
        ] {
            if value == 0 {
                errors.push(ConfigValidationError::new(
                    field,
                    "Value must be greater than 0.",
                ));
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ApmConfig::default();
        assert!(config.validate().is_empty());
        assert_eq!(config.persistence.transaction_ttl(), Duration::from_secs(3600));
        assert_eq!(config.persistence.error_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[service]
name = "checkout"

[errors]
sample_rate = 0.5
ignored_types = ["NotFound"]

[[errors.severity_rules]]
category = "payment"
severity = "critical"

[tracing]
max_span_age_secs = 120
"#;
        let config: ApmConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.service.name, "checkout");
        assert_eq!(config.service.environment, "development");
        assert_eq!(config.errors.sample_rate, 0.5);
        assert_eq!(config.errors.ignored_types, vec!["NotFound"]);
        assert_eq!(
            config.errors.severity_rules,
            vec![SeverityRule::for_category("payment", Severity::Critical)]
        );
        assert_eq!(config.errors.redaction_marker, "[REDACTED]");
        assert_eq!(config.tracing.max_span_age_secs, Some(120));
        assert_eq!(config.metrics.buffer_size, 1000);
    }

    #[test]
    fn test_validate_reports_each_field() {
        let mut config = ApmConfig::default();
        config.tracing.sample_rate = 1.5;
        config.errors.sample_rate = -0.1;
        config.metrics.buffer_size = 0;
        config.errors.severity_rules.push(SeverityRule {
            error_type: None,
            category: None,
            severity: Severity::Low,
        });

        let fields: Vec<String> = config.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "tracing.sample_rate",
                "errors.sample_rate",
                "errors.severity_rules[3]",
                "metrics.buffer_size",
            ]
        );
    }

    #[test]
    fn test_tracer_config_mapping() {
        let tracing = TracingConfig {
            max_span_age_secs: Some(30),
            ..Default::default()
        };
        let tracer = tracing.tracer_config("api");
        assert_eq!(tracer.service_name, "api");
        assert_eq!(tracer.max_span_age, Some(chrono::Duration::seconds(30)));
        assert_eq!(tracer.max_trace_age, chrono::Duration::hours(1));
    }
}
