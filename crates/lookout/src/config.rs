//! Configuration file support for lookout.
//!
//! All lookout data is stored in a `.lookout/` directory:
//! - `.lookout/config.toml` - Configuration file
//! - `.lookout/logs/` - Daily-rotated log files written by `lookout run`
//! - `.lookout/traces/` - Exported traces, when export is enabled
//!
//! Config discovery searches for `.lookout/config.toml` starting from the current
//! directory and walking up to parent directories.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lookout_apm::{AlertAction, AlertRule, ApmConfig, ConfigValidationError};
use lookout_tracing::ExportTarget;
use serde::{Deserialize, Serialize};

/// The lookout data directory name.
pub const LOOKOUT_DIR: &str = ".lookout";
/// The config file name within the lookout directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Monitor settings (`[service]`, `[tracing]`, `[errors]`, ...).
    #[serde(flatten)]
    pub apm: ApmConfig,
    pub logging: LoggingConfig,
    pub export: ExportConfig,
    pub email: EmailConfig,
    /// Rules installed into the alert engine on `run`.
    pub alert_rules: Vec<AlertRule>,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Log directory, relative to `.lookout/`.
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: PathBuf::from("logs"),
        }
    }
}

/// Trace export settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfig {
    pub enabled: bool,
    /// Relative paths are resolved against `.lookout/`.
    pub target: Option<ExportTarget>,
}

/// Email settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Sender for email actions that do not set their own.
    pub sender: Option<String>,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from current or parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find and load configuration starting from a specific directory.
    ///
    /// Returns the config and the `.lookout` directory it was found in.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let lookout_dir = dir.join(LOOKOUT_DIR);
            let config_path = lookout_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, lookout_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Resolve the log directory relative to the .lookout directory.
    pub fn resolve_log_dir(&self, lookout_dir: &Path) -> PathBuf {
        resolve(lookout_dir, &self.logging.dir)
    }

    /// The export target with relative paths resolved, or `None` when
    /// export is disabled.
    pub fn resolve_export_target(&self, lookout_dir: &Path) -> Option<ExportTarget> {
        if !self.export.enabled {
            return None;
        }
        let target = self
            .export
            .target
            .clone()
            .unwrap_or_else(|| ExportTarget::Daily(PathBuf::from("traces")));
        Some(match target {
            ExportTarget::SingleFile(path) => ExportTarget::SingleFile(resolve(lookout_dir, &path)),
            ExportTarget::Daily(dir) => ExportTarget::Daily(resolve(lookout_dir, &dir)),
        })
    }

    /// Validate the configuration.
    ///
    /// Returns a list of validation errors if any are found.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = self.apm.validate();

        if self.logging.level.trim().is_empty() {
            errors.push(ConfigValidationError::new(
                "logging.level",
                "Log level cannot be empty.",
            ));
        }

        for (i, rule) in self.alert_rules.iter().enumerate() {
            let field = format!("alert_rules[{}]", i);
            if rule.id.trim().is_empty() {
                errors.push(ConfigValidationError::new(
                    format!("{}.id", field),
                    "Rule id cannot be empty.",
                ));
            }
            if self.alert_rules[..i].iter().any(|r| r.id == rule.id) {
                errors.push(ConfigValidationError::new(
                    format!("{}.id", field),
                    format!("Duplicate rule id '{}'.", rule.id),
                ));
            }
            if let Some(count) = &rule.conditions.error_count {
                if count.threshold > self.apm.metrics.max_error_samples as u64 {
                    errors.push(ConfigValidationError::new(
                        format!("{}.conditions.error_count.threshold", field),
                        format!(
                            "Threshold {} can never be reached; metrics.max_error_samples is {}.",
                            count.threshold, self.apm.metrics.max_error_samples
                        ),
                    ));
                }
            }
            if let Some(rate) = &rule.conditions.error_rate {
                if !(0.0..=100.0).contains(&rate.threshold) {
                    errors.push(ConfigValidationError::new(
                        format!("{}.conditions.error_rate.threshold", field),
                        "Error rate threshold must be a percentage between 0 and 100.",
                    ));
                }
            }
            for (j, action) in rule.actions.iter().enumerate() {
                match action {
                    AlertAction::Email { to, .. } if to.is_empty() => {
                        errors.push(ConfigValidationError::new(
                            format!("{}.actions[{}].to", field, j),
                            "Email action needs at least one recipient.",
                        ));
                    }
                    AlertAction::Webhook { url, .. }
                        if !(url.starts_with("http://") || url.starts_with("https://")) =>
                    {
                        errors.push(ConfigValidationError::new(
                            format!("{}.actions[{}].url", field, j),
                            format!("Webhook url '{}' must be http(s).", url),
                        ));
                    }
                    _ => {}
                }
            }
        }

        errors
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Written by `lookout init`.
pub const DEFAULT_CONFIG: &str = r#"# Lookout configuration
# Paths are relative to this .lookout/ directory unless absolute

[service]
name = "my-service"
environment = "development"

[tracing]
enabled = true
sample_rate = 1.0
max_trace_age_secs = 3600
# max_span_age_secs = 300  # Force-close spans left open longer than this

[errors]
enabled = true
sample_rate = 1.0
ignored_types = ["ValidationError"]
sensitive_keys = ["password", "token", "secret", "authorization", "api_key", "cookie"]

[[errors.severity_rules]]
error_type = "TypeError"
severity = "critical"

[[errors.severity_rules]]
error_type = "ReferenceError"
severity = "critical"

[[errors.severity_rules]]
category = "database"
severity = "high"

[metrics]
buffer_size = 1000
throughput_window_secs = 60
interval_secs = 60

[retention]
sweep_interval_secs = 300
error_retention_secs = 86400
max_alerts = 1000

[persistence]
transaction_ttl_secs = 3600
error_ttl_secs = 86400
write_timeout_ms = 2000

[logging]
level = "info"
dir = "logs"

[export]
enabled = false
target = { mode = "daily", path = "traces" }

# [email]
# sender = "alerts@example.com"

# [[alert_rules]]
# id = "critical-errors"
# name = "Critical errors"
# cooldown_minutes = 15
# conditions = { severities = ["critical"] }
# actions = [
#   { type = "webhook", url = "https://hooks.example.com/lookout" },
#   { type = "email", to = ["oncall@example.com"] },
# ]
"#;
