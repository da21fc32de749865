//! Related-record resolution for lookup columns without an external id.
//!
//! For each lookup mapping, the distinct non-empty source values are matched
//! against the referenced object with batched queries, each kept under a
//! character budget. Rows are then rewritten with the resolved ids, or
//! excluded wholly when resolution fails for them.
//!
//! Chunk query failures accumulate in `query_errors` and do not abort the
//! remaining chunks; row failures accumulate in `row_errors` and never abort
//! the batch.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{info, warn};

use crate::config::BulkLimits;
use crate::load::mapping::{ApiMode, ColumnMapping, LoadMapping, LookupMatchMode};
use crate::load::transform::{is_empty_value, null_value, BULK_NULL_SENTINEL};
use crate::load::{Row, RowError};
use crate::salesforce::QueryApi;

// ─────────────────────────────────────────────────────────────────────────────
// Scoped Lookups
// ─────────────────────────────────────────────────────────────────────────────

/// Referenced objects whose lookup queries need an extra equality filter
/// scoping them to the base object, keyed by object name.
///
/// `RecordType` rows exist per object, so matching by name alone would find
/// record types of unrelated objects.
const SCOPED_LOOKUP_FILTERS: &[(&str, &str)] = &[("RecordType", "SobjectType")];

fn scope_filter(reference_to: &str) -> Option<&'static str> {
    SCOPED_LOOKUP_FILTERS
        .iter()
        .find(|(object, _)| *object == reference_to)
        .map(|(_, column)| *column)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Options for one resolution pass.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    /// Which write path the rows are destined for; decides the null
    /// representation written for `null_if_no_match`.
    pub api_mode: ApiMode,
}

/// Result of resolving all lookup mappings over a row set.
#[derive(Debug)]
pub struct ResolveOutcome {
    /// Rows with all lookups resolved. Rows that failed are excluded.
    pub rows: Vec<Row>,
    /// Failed rows, indexed by original position.
    pub row_errors: Vec<RowError>,
    /// Per-chunk query failures; resolution of other chunks continued.
    pub query_errors: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Query Composition
// ─────────────────────────────────────────────────────────────────────────────

/// Escapes a value for inclusion in a quoted SOQL literal.
fn soql_quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Composes the lookup queries for one mapping, greedily packing values so no
/// query exceeds `budget` characters.
///
/// Accumulates values until the next one would push the composed text over
/// the budget, then starts a new chunk. A single oversized value still gets
/// its own query; the remote API is left to reject it.
pub(crate) fn compose_lookup_queries(
    reference_to: &str,
    lookup_field: &str,
    scope: Option<(&str, &str)>,
    values: &[String],
    budget: usize,
) -> Vec<(String, Vec<String>)> {
    let scope_clause = match scope {
        Some((column, value)) => format!("{} = '{}' AND ", column, soql_quote(value)),
        None => String::new(),
    };
    let prefix = format!(
        "SELECT Id, {} FROM {} WHERE {}{} IN (",
        lookup_field, reference_to, scope_clause, lookup_field
    );
    const SUFFIX: &str = ")";
    const SEPARATOR: &str = ", ";

    let mut chunks: Vec<(String, Vec<String>)> = Vec::new();
    let mut current_values: Vec<String> = Vec::new();
    let mut current_len = prefix.len() + SUFFIX.len();

    for value in values {
        let literal_len = soql_quote(value).len() + 2; // quotes
        let added = if current_values.is_empty() {
            literal_len
        } else {
            literal_len + SEPARATOR.len()
        };

        if !current_values.is_empty() && current_len + added > budget {
            chunks.push((
                compose_query(&prefix, &current_values),
                std::mem::take(&mut current_values),
            ));
            current_len = prefix.len() + SUFFIX.len();
        }

        current_len += if current_values.is_empty() {
            literal_len
        } else {
            literal_len + SEPARATOR.len()
        };
        current_values.push(value.clone());
    }

    if !current_values.is_empty() {
        chunks.push((compose_query(&prefix, &current_values), current_values));
    }

    chunks
}

fn compose_query(prefix: &str, values: &[String]) -> String {
    let literals: Vec<String> = values
        .iter()
        .map(|v| format!("'{}'", soql_quote(v)))
        .collect();
    format!("{}{})", prefix, literals.join(", "))
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves all non-external-id lookup mappings over the given rows.
///
/// `on_progress` receives a monotonically increasing 0–100 value divided
/// proportionally across the mappings needing resolution, so a caller can
/// render one combined indicator over many queries.
pub async fn resolve_related_records(
    api: &dyn QueryApi,
    rows: Vec<Row>,
    mapping: &LoadMapping,
    target_object: &str,
    limits: &BulkLimits,
    options: &ResolveOptions,
    mut on_progress: impl FnMut(u8),
) -> ResolveOutcome {
    let lookups = mapping.lookup_mappings();

    let mut last_pct: u8 = 0;
    let mut report = |pct: u8, cb: &mut dyn FnMut(u8)| {
        let pct = pct.min(100);
        if pct > last_pct {
            last_pct = pct;
            cb(pct);
        }
    };

    if lookups.is_empty() {
        on_progress(100);
        return ResolveOutcome {
            rows,
            row_errors: Vec::new(),
            query_errors: Vec::new(),
        };
    }

    info!(
        "[RESOLVE] {} lookup mappings over {} rows for {}",
        lookups.len(),
        rows.len(),
        target_object
    );

    let mut query_errors: Vec<String> = Vec::new();
    let mut indexes: Vec<HashMap<String, Vec<String>>> = Vec::with_capacity(lookups.len());
    let lookup_count = lookups.len();

    // Build one value -> ids index per mapping, chunked under the budget.
    // Mappings run in input order; chunks run sequentially per mapping.
    for (mapping_idx, lookup) in lookups.iter().copied().enumerate() {
        let index = build_lookup_index(
            api,
            lookup,
            &rows,
            target_object,
            limits,
            &mut query_errors,
            |chunk_fraction| {
                let pct = ((mapping_idx as f64 + chunk_fraction) / lookup_count as f64) * 100.0;
                report(pct as u8, &mut on_progress);
            },
        )
        .await;
        indexes.push(index);
    }

    // Apply the per-row match policy. A row with any error is excluded from
    // the output entirely, never partially rewritten.
    let mut resolved_rows: Vec<Row> = Vec::with_capacity(rows.len());
    let mut row_errors: Vec<RowError> = Vec::new();

    for (row_index, row) in rows.into_iter().enumerate() {
        let mut patched = row.clone();
        let mut errors: Vec<String> = Vec::new();

        for (mapping_idx, lookup) in lookups.iter().copied().enumerate() {
            resolve_row_column(
                &row,
                &mut patched,
                lookup,
                &indexes[mapping_idx],
                options,
                &mut errors,
            );
        }

        if errors.is_empty() {
            resolved_rows.push(patched);
        } else {
            row_errors.push(RowError { row_index, errors });
        }
    }

    report(100, &mut on_progress);

    if !row_errors.is_empty() {
        warn!(
            "[RESOLVE] {} of {} rows excluded with errors",
            row_errors.len(),
            resolved_rows.len() + row_errors.len()
        );
    }

    ResolveOutcome {
        rows: resolved_rows,
        row_errors,
        query_errors,
    }
}

/// Collects distinct values for one mapping and queries the referenced
/// object chunk by chunk, building the value -> ids index.
async fn build_lookup_index(
    api: &dyn QueryApi,
    lookup: &ColumnMapping,
    rows: &[Row],
    target_object: &str,
    limits: &BulkLimits,
    query_errors: &mut Vec<String>,
    mut on_chunk: impl FnMut(f64),
) -> HashMap<String, Vec<String>> {
    let target_field = lookup.target_field.as_deref().unwrap_or_default();
    let lookup_field = lookup.target_lookup_field.as_deref().unwrap_or_default();
    let reference_to = lookup.selected_reference_to.as_deref().unwrap_or_default();

    let mut seen: HashSet<String> = HashSet::new();
    let mut values: Vec<String> = Vec::new();
    for row in rows {
        let Some(value) = row.get(target_field) else {
            continue;
        };
        if is_empty_value(value) {
            continue;
        }
        let key = value_key(value);
        if key == BULK_NULL_SENTINEL {
            continue;
        }
        if seen.insert(key.clone()) {
            values.push(key);
        }
    }

    let mut index: HashMap<String, Vec<String>> = HashMap::new();
    if values.is_empty() {
        on_chunk(1.0);
        return index;
    }

    let scope = scope_filter(reference_to).map(|column| (column, target_object));
    let chunks = compose_lookup_queries(
        reference_to,
        lookup_field,
        scope,
        &values,
        limits.soql_char_budget,
    );
    let chunk_count = chunks.len();

    info!(
        "[RESOLVE] {} distinct values for {} -> {} chunks",
        values.len(),
        reference_to,
        chunk_count
    );

    for (chunk_idx, (soql, _chunk_values)) in chunks.into_iter().enumerate() {
        match fetch_all_pages(api, &soql).await {
            Ok(records) => {
                for record in &records {
                    let Some(id) = record.get("Id").and_then(Value::as_str) else {
                        continue;
                    };
                    let Some(value) = record.get(lookup_field) else {
                        continue;
                    };
                    index
                        .entry(value_key(value))
                        .or_default()
                        .push(id.to_string());
                }
            }
            Err(e) => {
                query_errors.push(format!("Lookup query failed for {}: {}", reference_to, e));
            }
        }
        on_chunk((chunk_idx + 1) as f64 / chunk_count as f64);
    }

    index
}

/// Fetches every page of one lookup query.
async fn fetch_all_pages(
    api: &dyn QueryApi,
    soql: &str,
) -> Result<Vec<Value>, crate::error::AppError> {
    let mut page = api.query(soql).await?;
    let mut records = std::mem::take(&mut page.records);
    while !page.done {
        let Some(cursor) = page.cursor.take() else {
            break;
        };
        page = api.query_more(&cursor).await?;
        records.append(&mut page.records);
    }
    Ok(records)
}

/// Applies the match policy for one lookup column of one row.
fn resolve_row_column(
    original: &Row,
    patched: &mut Row,
    lookup: &ColumnMapping,
    index: &HashMap<String, Vec<String>>,
    options: &ResolveOptions,
    errors: &mut Vec<String>,
) {
    let target_field = lookup.target_field.as_deref().unwrap_or_default();
    let lookup_field = lookup.target_lookup_field.as_deref().unwrap_or_default();
    let reference_to = lookup.selected_reference_to.as_deref().unwrap_or_default();

    let Some(value) = original.get(target_field) else {
        return;
    };
    if is_empty_value(value) {
        return;
    }
    let key = value_key(value);
    if key == BULK_NULL_SENTINEL {
        return;
    }

    match index.get(&key).map(Vec::as_slice) {
        None | Some([]) => {
            if lookup.lookup_option_null_if_no_match {
                patched.insert(target_field.to_string(), null_value(options.api_mode));
            } else {
                errors.push(format!(
                    "Related record not found: no {} where {} = \"{}\"",
                    reference_to, lookup_field, key
                ));
            }
        }
        Some([id]) => {
            patched.insert(target_field.to_string(), Value::String(id.clone()));
        }
        Some(ids) => match lookup.lookup_option_use_first_match {
            LookupMatchMode::FirstMatch => {
                patched.insert(target_field.to_string(), Value::String(ids[0].clone()));
            }
            LookupMatchMode::ErrorIfMultiple => {
                errors.push(format!(
                    "Found {} related records where {} = \"{}\"; expected exactly one",
                    ids.len(),
                    lookup_field,
                    key
                ));
            }
        },
    }
}

/// String key used to index lookup values.
fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
