//! XLSX workbook output.
//!
//! One row per record, one sheet by default; pre-grouped sheet data yields a
//! multi-sheet workbook. Column order follows the caller's field list.

use rust_xlsxwriter::Workbook;
use serde_json::Value;

use crate::error::AppError;
use crate::materialize::{flatten_cell, FilePayload, MIME_XLSX};

/// Pre-grouped data for one worksheet.
#[derive(Debug, Clone)]
pub struct SheetData {
    pub name: String,
    pub fields: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Builds a single-sheet workbook payload from row-major cell values.
pub(crate) fn table_payload(
    fields: &[String],
    rows: &[Vec<Value>],
    file_name: &str,
) -> Result<FilePayload, AppError> {
    let sheet = SheetData {
        name: "Records".to_string(),
        fields: fields.to_vec(),
        rows: rows.to_vec(),
    };
    sheets_payload(&[sheet], file_name)
}

/// Builds a workbook payload with one worksheet per sheet entry.
pub fn sheets_payload(sheets: &[SheetData], file_name: &str) -> Result<FilePayload, AppError> {
    let mut workbook = Workbook::new();

    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(sheet.name.as_str())
            .map_err(|e| AppError::Internal(format!("Invalid sheet name: {}", e)))?;

        for (col, field) in sheet.fields.iter().enumerate() {
            worksheet
                .write_string(0, col as u16, field.as_str())
                .map_err(|e| AppError::Internal(format!("Failed to write header: {}", e)))?;
        }

        for (row_idx, row) in sheet.rows.iter().enumerate() {
            let row_num = (row_idx + 1) as u32;
            for (col, value) in row.iter().enumerate() {
                let col = col as u16;
                match value {
                    Value::Number(n) => {
                        worksheet
                            .write_number(row_num, col, n.as_f64().unwrap_or_default())
                            .map_err(|e| {
                                AppError::Internal(format!("Failed to write cell: {}", e))
                            })?;
                    }
                    Value::Bool(b) => {
                        worksheet.write_boolean(row_num, col, *b).map_err(|e| {
                            AppError::Internal(format!("Failed to write cell: {}", e))
                        })?;
                    }
                    other => {
                        worksheet
                            .write_string(row_num, col, flatten_cell(other).as_str())
                            .map_err(|e| {
                                AppError::Internal(format!("Failed to write cell: {}", e))
                            })?;
                    }
                }
            }
        }
    }

    let bytes = workbook
        .save_to_buffer()
        .map_err(|e| AppError::Internal(format!("Failed to build workbook: {}", e)))?;

    Ok(FilePayload {
        bytes,
        mime_type: MIME_XLSX,
        suggested_file_name: file_name.to_string(),
    })
}
