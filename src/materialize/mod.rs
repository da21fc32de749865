//! Result materialization into downloadable file payloads.
//!
//! Resolved record sets become CSV, XLSX, or raw JSON bytes sized for a
//! browser download. CSV output quotes every field and always emits a header
//! row; nested values flatten by dot-joined path and arrays by semicolon
//! join. JSON output is the unflattened record set verbatim, pretty-printed.

pub mod sheet;

use csv::{QuoteStyle, WriterBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::AppError;

pub use sheet::{sheets_payload, SheetData};

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Requested download file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    Csv,
    Xlsx,
    Json,
}

/// Materialized file bytes plus the metadata a download needs.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub suggested_file_name: String,
}

pub const MIME_CSV: &str = "text/csv";
pub const MIME_XLSX: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_JSON: &str = "application/json";

// ─────────────────────────────────────────────────────────────────────────────
// Materialize
// ─────────────────────────────────────────────────────────────────────────────

/// Converts a record set into a downloadable payload in the given format.
pub fn materialize(
    records: &[Value],
    fields: &[String],
    format: DownloadFormat,
    base_name: &str,
) -> Result<FilePayload, AppError> {
    let mut accumulator = DownloadAccumulator::new(format, fields);
    accumulator.push_page(records);
    accumulator.finish(base_name)
}

// ─────────────────────────────────────────────────────────────────────────────
// Download Accumulators
// ─────────────────────────────────────────────────────────────────────────────

/// Per-page accumulation shapes for paged downloads.
///
/// The shape is selected by the requested file format up front so each page
/// is reduced as it arrives instead of buffering raw records for formats
/// that do not need them.
#[derive(Debug)]
pub enum DownloadAccumulator {
    /// Row-major cell values, for spreadsheet output.
    Table {
        fields: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// Pre-flattened text rows, for CSV output.
    CsvRows {
        fields: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    /// Verbatim records, for JSON output.
    Json { records: Vec<Value> },
}

impl DownloadAccumulator {
    /// Creates the accumulator shape for the given format.
    pub fn new(format: DownloadFormat, fields: &[String]) -> Self {
        match format {
            DownloadFormat::Xlsx => DownloadAccumulator::Table {
                fields: fields.to_vec(),
                rows: Vec::new(),
            },
            DownloadFormat::Csv => DownloadAccumulator::CsvRows {
                fields: fields.to_vec(),
                rows: Vec::new(),
            },
            DownloadFormat::Json => DownloadAccumulator::Json {
                records: Vec::new(),
            },
        }
    }

    /// Folds one page of records into the accumulator.
    pub fn push_page(&mut self, records: &[Value]) {
        match self {
            DownloadAccumulator::Table { fields, rows } => {
                for record in records {
                    rows.push(
                        fields
                            .iter()
                            .map(|f| field_value(record, f).cloned().unwrap_or(Value::Null))
                            .collect(),
                    );
                }
            }
            DownloadAccumulator::CsvRows { fields, rows } => {
                for record in records {
                    rows.push(
                        fields
                            .iter()
                            .map(|f| {
                                field_value(record, f).map(flatten_cell).unwrap_or_default()
                            })
                            .collect(),
                    );
                }
            }
            DownloadAccumulator::Json { records: all } => {
                all.extend(records.iter().cloned());
            }
        }
    }

    /// Number of records accumulated so far.
    pub fn record_count(&self) -> usize {
        match self {
            DownloadAccumulator::Table { rows, .. } => rows.len(),
            DownloadAccumulator::CsvRows { rows, .. } => rows.len(),
            DownloadAccumulator::Json { records } => records.len(),
        }
    }

    /// Produces the final file payload.
    pub fn finish(self, base_name: &str) -> Result<FilePayload, AppError> {
        let count = self.record_count();
        let payload = match self {
            DownloadAccumulator::Table { fields, rows } => sheet::table_payload(
                &fields,
                &rows,
                &format!("{}.xlsx", base_name),
            )?,
            DownloadAccumulator::CsvRows { fields, rows } => FilePayload {
                bytes: csv_bytes(&fields, &rows)?,
                mime_type: MIME_CSV,
                suggested_file_name: format!("{}.csv", base_name),
            },
            DownloadAccumulator::Json { records } => FilePayload {
                bytes: serde_json::to_vec_pretty(&records).map_err(|e| {
                    AppError::Internal(format!("Failed to serialize JSON output: {}", e))
                })?,
                mime_type: MIME_JSON,
                suggested_file_name: format!("{}.json", base_name),
            },
        };

        info!(
            "[EXPORT] {} records -> {} ({} bytes)",
            count,
            payload.suggested_file_name,
            payload.bytes.len()
        );
        Ok(payload)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CSV
// ─────────────────────────────────────────────────────────────────────────────

/// Writes header plus rows with every field quoted.
fn csv_bytes(fields: &[String], rows: &[Vec<String>]) -> Result<Vec<u8>, AppError> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());

    writer
        .write_record(fields)
        .map_err(|e| AppError::Internal(format!("Failed to write CSV header: {}", e)))?;

    for row in rows {
        writer
            .write_record(row)
            .map_err(|e| AppError::Internal(format!("Failed to write CSV row: {}", e)))?;
    }

    writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("Failed to finish CSV output: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Flattening
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves a dot-joined path against a record.
pub(crate) fn field_value<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Flattens one cell value to text: arrays join with semicolons, nested
/// objects join their entries, scalars print plainly, null prints empty.
pub(crate) fn flatten_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(flatten_cell)
            .collect::<Vec<_>>()
            .join(";"),
        Value::Object(map) => map
            .iter()
            .filter(|(k, _)| *k != "attributes")
            .map(|(k, v)| format!("{}: {}", k, flatten_cell(v)))
            .collect::<Vec<_>>()
            .join("; "),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
