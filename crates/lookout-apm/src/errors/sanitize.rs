//! Redaction of sensitive values before errors are stored or emailed.
//!
//! A key is sensitive when any configured keyword is a case-insensitive
//! substring of it. The whole value under a sensitive key is replaced by the
//! marker, so nested objects under e.g. `credentials` disappear entirely.
//! Redacting an already-redacted value is a no-op.

use std::collections::HashMap;

use serde_json::Value;

use crate::context::RequestInfo;
use crate::errors::types::ErrorContext;

/// Replaces values of sensitive keys with a marker.
#[derive(Debug, Clone)]
pub struct Redactor {
    keywords: Vec<String>,
    marker: String,
}

impl Redactor {
    pub fn new(keywords: &[String], marker: impl Into<String>) -> Self {
        Self {
            keywords: keywords
                .iter()
                .filter(|k| !k.is_empty())
                .map(|k| k.to_lowercase())
                .collect(),
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.keywords.iter().any(|k| key.contains(k.as_str()))
    }

    /// Recursively redact a JSON value in place.
    pub fn redact_value(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if self.is_sensitive(key) {
                        *child = Value::String(self.marker.clone());
                    } else {
                        self.redact_value(child);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.redact_value(item);
                }
            }
            _ => {}
        }
    }

    /// Redact a flat string map such as headers or query parameters.
    pub fn redact_map(&self, map: &mut HashMap<String, String>) {
        for (key, value) in map.iter_mut() {
            if self.is_sensitive(key) {
                value.clone_from(&self.marker);
            }
        }
    }

    /// Redact sensitive parameters in the query string of a URL.
    pub fn redact_url(&self, url: &str) -> String {
        let Some((path, query)) = url.split_once('?') else {
            return url.to_string();
        };
        let (query, fragment) = match query.split_once('#') {
            Some((query, fragment)) => (query, Some(fragment)),
            None => (query, None),
        };
        let query = query
            .split('&')
            .map(|pair| match pair.split_once('=') {
                Some((key, _)) if self.is_sensitive(key) => format!("{}={}", key, self.marker),
                _ => pair.to_string(),
            })
            .collect::<Vec<_>>()
            .join("&");
        match fragment {
            Some(fragment) => format!("{}?{}#{}", path, query, fragment),
            None => format!("{}?{}", path, query),
        }
    }

    pub fn redact_request(&self, request: &mut RequestInfo) {
        request.url = self.redact_url(&request.url);
        self.redact_map(&mut request.headers);
        self.redact_map(&mut request.query);
        if let Some(body) = request.body.as_mut() {
            self.redact_value(body);
        }
    }

    pub fn redact_context(&self, context: &mut ErrorContext) {
        if let Some(request) = context.request.as_mut() {
            self.redact_request(request);
        }
        for (key, value) in context.custom.iter_mut() {
            if self.is_sensitive(key) {
                *value = Value::String(self.marker.clone());
            } else {
                self.redact_value(value);
            }
        }
    }
}
