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

//! # Domain Entities
//!
//! Entities are the "Nouns" of our application: Rows, Values, Schemas,
//! and the small configuration records that drive an extraction cycle.
//!
//! `Schema` and `FieldSchema` use `serde` so they can be read straight from
//! the BigQuery `TableSchema` JSON.

use crate::domain::errors::ExtractError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `OutputFormat` defines how we save the data on disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Delimited text with a UTF-8 byte-order marker.
    Csv,
    /// A single-sheet Excel workbook.
    Xlsx,
}

impl OutputFormat {
    /// Extensions we know how to produce, in the order shown to users.
    pub const ALLOWED_EXTENSIONS: [&'static str; 2] = ["csv", "xlsx"];

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "csv" => Some(OutputFormat::Csv),
            "xlsx" => Some(OutputFormat::Xlsx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Csv => write!(f, "CSV"),
            OutputFormat::Xlsx => write!(f, "XLSX"),
        }
    }
}

/// What to read: a whole table, or the result of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Table(String),
    Query(String),
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Table(t) => write!(f, "table {}", t),
            SourceSpec::Query(_) => write!(f, "custom query"),
        }
    }
}

/// A DATE as delivered by the source, e.g. `2024-03-09`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDate(pub String);

/// A TIMESTAMP as delivered by the source: epoch microseconds, epoch seconds
/// (possibly in exponent notation) or RFC 3339 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTimestamp(pub String);

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(SourceDate),
    Timestamp(SourceTimestamp),
    /// Values kept in their textual wire form (NUMERIC, DATETIME, TIME, BYTES...).
    Raw { type_name: String, text: String },
    /// RECORD and REPEATED values.
    Nested(serde_json::Value),
}

impl Value {
    /// Plain-text rendering used for delimited output and error context.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(v) => v.to_string(),
            Value::String(s) => s.clone(),
            Value::Date(d) => d.0.clone(),
            Value::Timestamp(t) => t.0.clone(),
            Value::Raw { text, .. } => text.clone(),
            Value::Nested(json) => json.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Nested(json) => json.clone(),
            other => serde_json::Value::String(other.render()),
        }
    }
}

/// An ordered mapping from field name to value.
///
/// Keys keep their insertion order, which is the output order used when the
/// source could not supply a schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Sets a field, replacing any existing value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// `FieldSchema` describes one column, in BigQuery `TableFieldSchema` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    /// Logical type as the source names it (`STRING`, `TIMESTAMP`, `RECORD`...).
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Sub-fields of a RECORD.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: None,
            fields: Vec::new(),
        }
    }

    pub fn is_repeated(&self) -> bool {
        self.mode
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case("REPEATED"))
            .unwrap_or(false)
    }
}

/// The "Blueprint" of a result set: its columns, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl Schema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// Retry settings shared by the read and write stages. Never mutated after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Additional attempts after the first failure. Zero disables retrying.
    pub max_attempts: u32,
    pub delay: Duration,
    pub reset_on_success: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(10_000),
            reset_on_success: true,
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Success,
    Failure(ExtractError),
}

/// `RunResult` is the "Report Card" of one extraction cycle.
#[derive(Debug)]
pub struct RunResult {
    pub rows_written: u64,
    /// The file that was written, if any rows were extracted.
    pub output: Option<PathBuf>,
    pub outcome: RunOutcome,
}

impl RunResult {
    pub fn success(rows_written: u64, output: Option<PathBuf>) -> Self {
        Self {
            rows_written,
            output,
            outcome: RunOutcome::Success,
        }
    }

    pub fn failure(error: ExtractError) -> Self {
        Self {
            rows_written: 0,
            output: None,
            outcome: RunOutcome::Failure(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_path() {
        assert_eq!(
            OutputFormat::from_path(Path::new("out/data.csv")),
            Some(OutputFormat::Csv)
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("Report.XLSX")),
            Some(OutputFormat::Xlsx)
        );
        assert_eq!(OutputFormat::from_path(Path::new("data.json")), None);
        assert_eq!(OutputFormat::from_path(Path::new("data")), None);
    }

    #[test]
    fn test_row_keeps_insertion_order_and_replaces() {
        let mut row = Row::new();
        row.insert("b", Value::Int(1));
        row.insert("a", Value::Int(2));
        row.insert("b", Value::Int(3));

        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(row.get("b"), Some(&Value::Int(3)));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_row_json_keeps_field_order() {
        let mut row = Row::new();
        row.insert("zone", Value::String("EU".into()));
        row.insert("amount", Value::Float(1.5));
        row.insert("id", Value::Int(7));

        assert_eq!(row.to_json().to_string(), r#"{"zone":"EU","amount":1.5,"id":7}"#);
    }

    #[test]
    fn test_value_render() {
        assert_eq!(Value::Null.render(), "");
        assert_eq!(Value::Bool(true).render(), "true");
        assert_eq!(Value::Float(1.5).render(), "1.5");
        assert_eq!(
            Value::Raw {
                type_name: "NUMERIC".into(),
                text: "12.3400".into()
            }
            .render(),
            "12.3400"
        );
        assert_eq!(
            Value::Nested(serde_json::json!({"a": [1, 2]})).render(),
            r#"{"a":[1,2]}"#
        );
    }

    #[test]
    fn test_schema_deserializes_bigquery_shape() {
        let json = r#"{"fields":[
            {"name":"id","type":"INTEGER","mode":"REQUIRED"},
            {"name":"tags","type":"STRING","mode":"REPEATED"},
            {"name":"addr","type":"RECORD","fields":[{"name":"city","type":"STRING"}]}
        ]}"#;
        let schema: Schema = serde_json::from_str(json).unwrap();

        assert_eq!(schema.field_names(), vec!["id", "tags", "addr"]);
        assert!(schema.fields[1].is_repeated());
        assert!(!schema.fields[0].is_repeated());
        assert_eq!(schema.fields[2].fields[0].name, "city");
    }

    #[test]
    fn test_retry_config_defaults() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.delay, Duration::from_secs(10));
        assert!(cfg.reset_on_success);
    }
}
