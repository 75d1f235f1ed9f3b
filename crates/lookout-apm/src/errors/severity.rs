//! Severity classification table.

use crate::config::SeverityRule;
use crate::errors::types::Severity;

/// Classifies errors by walking an ordered rule table.
#[derive(Debug, Clone)]
pub struct SeverityClassifier {
    rules: Vec<SeverityRule>,
}

impl SeverityClassifier {
    pub fn new(rules: Vec<SeverityRule>) -> Self {
        Self { rules }
    }

    /// First matching rule wins; unmatched errors are `medium`.
    pub fn classify(&self, error_type: &str, category: Option<&str>) -> Severity {
        let error_type = error_type.to_lowercase();
        self.rules
            .iter()
            .find(|rule| {
                let type_match = rule
                    .error_type
                    .as_deref()
                    .is_some_and(|p| error_type.contains(&p.to_lowercase()));
                let category_match = match (rule.category.as_deref(), category) {
                    (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
                    _ => false,
                };
                type_match || category_match
            })
            .map(|rule| rule.severity)
            .unwrap_or_default()
    }
}
