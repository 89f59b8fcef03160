// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Core error definitions for the BigQuery File Extractor.
//!
//! This module provides a centralized `ExtractError` enum and a `Result` type
//! used throughout the application. Every error can describe itself as an
//! [`ErrorContext`]: the extra key/value properties (offending field, full row,
//! HTTP status, file path...) that get logged before a persistent-error cooldown.

use crate::domain::entities::Row;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Ordered key/value diagnostics attached to an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    entries: Vec<(String, String)>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a property.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Error types encountered during an extraction cycle.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transport, protocol or API failure reported by the remote source.
    #[error("Source error: {message}")]
    SourceError {
        message: String,
        properties: ErrorContext,
    },

    #[error("Failed to transform field '{field}' (value {value}): {reason}")]
    TransformError {
        field: String,
        value: String,
        row: Row,
        reason: String,
    },

    #[error("Serialization failed: {0}")]
    SerializationError(String),

    #[error("Failed to write {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Authentication failed: {0}")]
    AuthError(String),
}

impl ExtractError {
    /// Shorthand for a source error without extra properties.
    pub fn source_error(message: impl Into<String>) -> Self {
        ExtractError::SourceError {
            message: message.into(),
            properties: ErrorContext::new(),
        }
    }

    /// Attaches a diagnostic property. Only source errors carry free-form
    /// properties; every other variant is returned unchanged.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let ExtractError::SourceError { properties, .. } = &mut self {
            properties.insert(key, value);
        }
        self
    }

    /// The properties that travel with this error into the logs.
    pub fn context(&self) -> ErrorContext {
        match self {
            ExtractError::SourceError { properties, .. } => properties.clone(),
            ExtractError::TransformError {
                field, value, row, ..
            } => ErrorContext::new()
                .with("field", field.as_str())
                .with("value", value.as_str())
                .with("row", row.to_json().to_string()),
            ExtractError::WriteError { path, source } => ErrorContext::new()
                .with("path", path.display().to_string())
                .with("kind", format!("{:?}", source.kind())),
            ExtractError::IoError(e) => ErrorContext::new().with("kind", format!("{:?}", e.kind())),
            _ => ErrorContext::new(),
        }
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(e: reqwest::Error) -> Self {
        let mut err = ExtractError::source_error(e.to_string());
        if let Some(status) = e.status() {
            err = err.with_property("status", status.as_u16().to_string());
        }
        if let Some(url) = e.url() {
            err = err.with_property("url", url.as_str());
        }
        if e.is_timeout() {
            err = err.with_property("timeout", "true");
        }
        err
    }
}

impl From<csv::Error> for ExtractError {
    fn from(e: csv::Error) -> Self {
        ExtractError::SerializationError(e.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for ExtractError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        ExtractError::SerializationError(e.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for ExtractError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        ExtractError::AuthError(e.to_string())
    }
}

/// A specialized Result type for the BigQuery File Extractor.
pub type Result<T> = std::result::Result<T, ExtractError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Value;

    #[test]
    fn test_source_error_carries_properties() {
        let err = ExtractError::source_error("Not found: Table p:d.t")
            .with_property("status", "404")
            .with_property("reason", "notFound");

        assert_eq!(err.to_string(), "Source error: Not found: Table p:d.t");
        let ctx = err.context();
        assert_eq!(ctx.get("status"), Some("404"));
        assert_eq!(ctx.get("reason"), Some("notFound"));
        assert_eq!(ctx.to_string(), "status=404, reason=notFound");
    }

    #[test]
    fn test_transform_error_context_includes_row() {
        let mut row = Row::new();
        row.insert("ts", Value::String("garbage".into()));
        row.insert("id", Value::Int(7));

        let err = ExtractError::TransformError {
            field: "ts".into(),
            value: "garbage".into(),
            row,
            reason: "unparseable timestamp".into(),
        };

        let ctx = err.context();
        assert_eq!(ctx.get("field"), Some("ts"));
        assert_eq!(ctx.get("value"), Some("garbage"));
        assert_eq!(ctx.get("row"), Some(r#"{"ts":"garbage","id":7}"#));
    }

    #[test]
    fn test_with_property_ignores_other_variants() {
        let err = ExtractError::ConfigError("bad".into()).with_property("k", "v");
        assert!(err.context().is_empty());
    }

    #[test]
    fn test_context_insert_replaces_existing_key() {
        let mut ctx = ErrorContext::new().with("a", "1");
        ctx.insert("a", "2");
        assert_eq!(ctx.get("a"), Some("2"));
        assert_eq!(ctx.iter().count(), 1);
    }
}
