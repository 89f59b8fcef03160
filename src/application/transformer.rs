//! # Row Transformer
//!
//! Normalizes date and time values before serialization:
//! - `DATE` values become `DD/MM/YYYY`.
//! - `TIMESTAMP` values become `DD/MM/YYYY HH:mm:ss` in the display zone.
//!
//! Every other value passes through untouched. A value that cannot be parsed
//! aborts the whole row with a `TransformError` that carries the field, the
//! offending value, and the original row.

use crate::domain::entities::{Row, SourceDate, SourceTimestamp, Value};
use crate::domain::errors::{ExtractError, Result};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, Utc};

pub const DATE_FORMAT: &str = "%d/%m/%Y";
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// The zone timestamps are rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayZone {
    /// The host's local zone, including its DST rules.
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl DisplayZone {
    pub fn utc() -> Self {
        DisplayZone::Fixed(Utc.fix())
    }

    fn render(&self, instant: DateTime<Utc>) -> String {
        match self {
            DisplayZone::Local => instant
                .with_timezone(&Local)
                .format(TIMESTAMP_FORMAT)
                .to_string(),
            DisplayZone::Fixed(offset) => instant
                .with_timezone(offset)
                .format(TIMESTAMP_FORMAT)
                .to_string(),
        }
    }
}

/// Stateless per-row mapping. Cheap to copy into each extraction attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowTransformer {
    zone: DisplayZone,
}

impl RowTransformer {
    pub fn new(zone: DisplayZone) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> DisplayZone {
        self.zone
    }

    pub fn transform(&self, row: Row) -> Result<Row> {
        let mut out = Row::with_capacity(row.len());
        let mut failure = None;

        for (field, value) in row.iter() {
            let converted = match value {
                Value::Date(date) => format_date(date).map(Value::String),
                Value::Timestamp(ts) => {
                    parse_timestamp(ts).map(|t| Value::String(self.zone.render(t)))
                }
                other => Ok(other.clone()),
            };

            match converted {
                Ok(v) => out.insert(field, v),
                Err(reason) => {
                    failure = Some((field.to_string(), value.render(), reason));
                    break;
                }
            }
        }

        match failure {
            Some((field, value, reason)) => Err(ExtractError::TransformError {
                field,
                value,
                row,
                reason,
            }),
            None => Ok(out),
        }
    }
}

fn format_date(date: &SourceDate) -> std::result::Result<String, String> {
    NaiveDate::parse_from_str(date.0.trim(), "%Y-%m-%d")
        .map(|d| d.format(DATE_FORMAT).to_string())
        .map_err(|e| format!("invalid date: {}", e))
}

/// Accepts epoch microseconds, epoch seconds (`1.7E9` style included),
/// RFC 3339, or a bare `YYYY-MM-DD HH:MM:SS[.f]` taken as UTC.
fn parse_timestamp(ts: &SourceTimestamp) -> std::result::Result<DateTime<Utc>, String> {
    let text = ts.0.trim();

    if let Ok(micros) = text.parse::<i64>() {
        return DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| format!("timestamp out of range: {}", micros));
    }

    if let Ok(seconds) = text.parse::<f64>() {
        if seconds.is_finite() {
            let micros = (seconds * 1_000_000.0).round();
            if micros.abs() < i64::MAX as f64 {
                if let Some(dt) = DateTime::from_timestamp_micros(micros as i64) {
                    return Ok(dt);
                }
            }
        }
        return Err(format!("timestamp out of range: {}", text));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }

    let bare = text.trim_end_matches(" UTC").trim_end_matches('Z');
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(bare, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("unrecognized timestamp '{}'", text))
}
