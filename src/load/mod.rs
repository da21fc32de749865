//! Data-load pipeline: row transformation and related-record resolution.
//!
//! A load session starts from user-supplied tabular rows and a per-column
//! mapping built against the target object's schema. [`transform`] coerces
//! rows into the wire shape the write API expects; [`resolve`] then rewrites
//! lookup columns that are not keyed by an external identifier, using batched
//! queries against the referenced objects.

pub mod mapping;
pub mod resolve;
pub mod transform;

pub use mapping::{ApiMode, ColumnMapping, FieldDescriptor, LoadMapping, LookupMatchMode};
pub use resolve::{resolve_related_records, ResolveOptions, ResolveOutcome};
pub use transform::{transform_records, DateOrder, TransformOptions, BULK_NULL_SENTINEL};

/// One row of load data: an order-preserving map from column name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Errors recorded against one row during resolution.
///
/// Accumulated data, never thrown: rows with errors are excluded from the
/// resolved output entirely and reported here with their original position.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RowError {
    /// Index of the row in the input row set.
    pub row_index: usize,
    /// Human-readable reasons the row was excluded.
    pub errors: Vec<String>,
}
