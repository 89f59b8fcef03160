//! Decodes BigQuery wire rows (`{"f":[{"v":...}]}`) into domain [`Row`]s.
//!
//! BigQuery sends almost every scalar as a JSON string; the schema says how
//! to read it. RECORD and REPEATED values arrive as nested `f` / `v`
//! structures and are flattened to plain JSON.

use crate::domain::entities::{FieldSchema, Row, Schema, SourceDate, SourceTimestamp, Value};
use crate::domain::errors::{ExtractError, Result};
use crate::infrastructure::bigquery::client::TableRow;
use serde_json::Value as Json;

pub fn decode_row(schema: &Schema, row: &TableRow) -> Result<Row> {
    decode_fields(&schema.fields, row)
}

fn decode_fields(fields: &[FieldSchema], row: &TableRow) -> Result<Row> {
    let mut out = Row::with_capacity(fields.len());
    for (field, cell) in fields.iter().zip(row.f.iter()) {
        out.insert(field.name.as_str(), decode_cell(field, &cell.v)?);
    }
    Ok(out)
}

fn decode_cell(field: &FieldSchema, v: &Json) -> Result<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }

    if field.is_repeated() {
        let items = v.as_array().ok_or_else(|| decode_error(field, v, "expected an array"))?;
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            let inner = item.get("v").unwrap_or(&Json::Null);
            values.push(decode_single(field, inner)?.to_json());
        }
        return Ok(Value::Nested(Json::Array(values)));
    }

    decode_single(field, v)
}

fn decode_single(field: &FieldSchema, v: &Json) -> Result<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }

    let type_name = field.field_type.to_uppercase();
    if type_name == "RECORD" || type_name == "STRUCT" {
        let nested: TableRow = serde_json::from_value(v.clone())
            .map_err(|e| decode_error(field, v, &e.to_string()))?;
        return Ok(Value::Nested(decode_fields(&field.fields, &nested)?.to_json()));
    }

    let text = match v.as_str() {
        Some(s) => s.to_string(),
        None => v.to_string(),
    };

    let value = match type_name.as_str() {
        "STRING" => Value::String(text),
        "INTEGER" | "INT64" => Value::Int(
            text.parse()
                .map_err(|_| decode_error(field, v, "not an integer"))?,
        ),
        "FLOAT" | "FLOAT64" => Value::Float(
            text.parse()
                .map_err(|_| decode_error(field, v, "not a float"))?,
        ),
        "BOOLEAN" | "BOOL" => match text.to_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(decode_error(field, v, "not a boolean")),
        },
        "DATE" => Value::Date(SourceDate(text)),
        "TIMESTAMP" => Value::Timestamp(SourceTimestamp(text)),
        _ => Value::Raw {
            type_name,
            text,
        },
    };
    Ok(value)
}

fn decode_error(field: &FieldSchema, v: &Json, reason: &str) -> ExtractError {
    ExtractError::source_error(format!(
        "Cannot decode {} value for field '{}': {}",
        field.field_type, field.name, reason
    ))
    .with_property("field", field.name.as_str())
    .with_property("value", v.to_string())
}
