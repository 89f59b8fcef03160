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

//! # Batch Accumulator & Serializer
//!
//! Collects every transformed row of one extraction attempt in memory and
//! turns them into the bytes of a single output file.
//!
//! ## Field order
//! Decided once, on the first row:
//! 1. The schema's field order when the source supplied one.
//! 2. Otherwise the key order of the first row.
//! 3. `sort_columns` replaces either with alphabetical order.
//!
//! ## Formats
//! - **CSV**: every row is encoded on arrival. The first chunk carries the
//!   UTF-8 BOM and the header line; lines end with `\n`.
//! - **XLSX**: rows are kept as records and written into one worksheet with a
//!   bold header when the batch is finished.

use crate::domain::entities::{OutputFormat, Row, Schema, Value};
use crate::domain::errors::{ExtractError, Result};
use chrono::{DateTime, TimeZone};
use rust_xlsxwriter::{Format, Workbook};
use std::fmt::{Display, Write as _};
use std::path::{Path, PathBuf};

/// Prefix for the first CSV chunk so spreadsheet tools detect UTF-8.
pub const UTF8_BOM: &str = "\u{feff}";

/// Largest integer an XLSX number cell holds exactly (2^53).
const MAX_EXACT_CELL_INT: i64 = 9_007_199_254_740_992;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializerOptions {
    pub format: OutputFormat,
    pub sort_columns: bool,
    /// Field delimiter for CSV output.
    pub delimiter: u8,
}

impl SerializerOptions {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            sort_columns: false,
            delimiter: b',',
        }
    }
}

/// The finished bytes of one run, ready for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedBatch {
    pub rows: u64,
    pub bytes: Vec<u8>,
}

enum Buffer {
    Csv(Vec<u8>),
    Xlsx(Vec<Row>),
}

/// In-memory buffer for one extraction attempt. Dropped on failure, so a
/// failed attempt never produces partial output.
pub struct BatchAccumulator {
    options: SerializerOptions,
    columns: Option<Vec<String>>,
    buffer: Buffer,
    rows: u64,
}

impl BatchAccumulator {
    pub fn new(options: SerializerOptions) -> Self {
        let buffer = match options.format {
            OutputFormat::Csv => Buffer::Csv(Vec::new()),
            OutputFormat::Xlsx => Buffer::Xlsx(Vec::new()),
        };
        Self {
            options,
            columns: None,
            buffer,
            rows: 0,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// The resolved output columns, once the first row has arrived.
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn push(&mut self, row: Row, schema: Option<&Schema>) -> Result<()> {
        let first = self.columns.is_none();
        let columns = self
            .columns
            .get_or_insert_with(|| resolve_field_order(&row, schema, self.options.sort_columns));

        match &mut self.buffer {
            Buffer::Csv(bytes) => {
                if first {
                    bytes.extend_from_slice(UTF8_BOM.as_bytes());
                }
                let chunk = encode_csv_chunk(&row, columns, first, self.options.delimiter)?;
                bytes.extend_from_slice(&chunk);
            }
            Buffer::Xlsx(records) => records.push(row),
        }

        self.rows += 1;
        Ok(())
    }

    /// Produces the file contents, or `None` when no row was pushed.
    pub fn finish(self) -> Result<Option<SerializedBatch>> {
        let columns = match self.columns {
            Some(columns) if self.rows > 0 => columns,
            _ => return Ok(None),
        };

        let bytes = match self.buffer {
            Buffer::Csv(bytes) => bytes,
            Buffer::Xlsx(records) => build_workbook(&columns, &records)?,
        };

        Ok(Some(SerializedBatch {
            rows: self.rows,
            bytes,
        }))
    }
}

pub fn resolve_field_order(first: &Row, schema: Option<&Schema>, sort: bool) -> Vec<String> {
    let mut columns = match schema {
        Some(s) if !s.fields.is_empty() => s.field_names(),
        _ => first.keys().map(str::to_string).collect(),
    };
    if sort {
        columns.sort();
    }
    columns
}

/// Encodes one row as a `\n`-terminated CSV line, preceded by the header
/// line when `header` is set. Missing fields render empty.
pub fn encode_csv_chunk(row: &Row, columns: &[String], header: bool, delimiter: u8) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    if header {
        writer.write_record(columns)?;
    }
    writer.write_record(
        columns
            .iter()
            .map(|c| row.get(c).map(Value::render).unwrap_or_default()),
    )?;

    writer
        .into_inner()
        .map_err(|e| ExtractError::SerializationError(e.to_string()))
}

/// Builds a single-sheet workbook: bold header row, then one row per record.
pub fn build_workbook(columns: &[String], records: &[Row]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let sheet = workbook.add_worksheet();

    for (col, name) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, column_index(col)?, name, &header_format)?;
    }

    for (i, record) in records.iter().enumerate() {
        let row_num = u32::try_from(i + 1)
            .map_err(|_| ExtractError::SerializationError("too many rows for a worksheet".into()))?;

        for (col, name) in columns.iter().enumerate() {
            let col_num = column_index(col)?;
            match record.get(name) {
                None | Some(Value::Null) => {}
                Some(Value::Bool(b)) => {
                    sheet.write_boolean(row_num, col_num, *b)?;
                }
                Some(Value::Int(n)) if n.unsigned_abs() <= MAX_EXACT_CELL_INT as u64 => {
                    sheet.write_number(row_num, col_num, *n as f64)?;
                }
                Some(Value::Float(f)) if f.is_finite() => {
                    sheet.write_number(row_num, col_num, *f)?;
                }
                Some(other) => {
                    sheet.write_string(row_num, col_num, other.render())?;
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

fn column_index(col: usize) -> Result<u16> {
    u16::try_from(col)
        .map_err(|_| ExtractError::SerializationError("too many columns for a worksheet".into()))
}

/// Inserts `now` rendered with `format` before the file extension:
/// `out/data.csv` becomes `out/data20240309.csv`.
pub fn templated_output_path<Tz>(path: &Path, format: Option<&str>, now: &DateTime<Tz>) -> Result<PathBuf>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let format = match format {
        Some(f) if !f.is_empty() => f,
        _ => return Ok(path.to_path_buf()),
    };

    let mut stamp = String::new();
    write!(stamp, "{}", now.format(format)).map_err(|_| {
        ExtractError::ConfigError(format!("Invalid timestamp format '{}'", format))
    })?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, stamp, ext.to_string_lossy()),
        None => format!("{}{}", stem, stamp),
    };

    Ok(path.with_file_name(file_name))
}
