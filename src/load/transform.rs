//! Pure row transformation for load jobs.
//!
//! Coerces a row of user-supplied field values into the wire shape required
//! by the target write API. No network calls; malformed individual values are
//! coerced best-effort and left for the remote API to reject at submission
//! time.
//!
//! Null handling is mode-dependent and is a hard correctness requirement:
//! the bulk-file API clears a field only when the documented null sentinel is
//! submitted, while the collections API clears on explicit JSON null. In both
//! modes, an omitted field leaves the server-side value untouched.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat};
use serde_json::Value;
use tracing::debug;

use crate::load::mapping::{ApiMode, ColumnMapping, FieldDescriptor, LoadMapping};
use crate::load::Row;

/// Null sentinel recognized by the bulk-file API.
pub const BULK_NULL_SENTINEL: &str = "#N/A";

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Day/month ordering of user-supplied dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOrder {
    /// ISO 8601 input only.
    Iso,
    /// Month before day (e.g. "12/31/2024").
    MonthFirst,
    /// Day before month (e.g. "31/12/2024").
    DayFirst,
}

/// Options for one transform pass.
#[derive(Debug, Clone, Copy)]
pub struct TransformOptions {
    /// Emit explicit nulls for empty values instead of omitting the field.
    pub insert_nulls: bool,
    /// How ambiguous date strings are interpreted.
    pub date_order: DateOrder,
    /// Which write path the rows are destined for.
    pub api_mode: ApiMode,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            insert_nulls: false,
            date_order: DateOrder::Iso,
            api_mode: ApiMode::Collections,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transform
// ─────────────────────────────────────────────────────────────────────────────

/// Transforms rows into API-ready records.
///
/// For each row, only columns with a non-empty `target_field` are emitted;
/// unmapped columns are dropped. Values with field metadata pass through type
/// coercion; values without metadata pass through unchanged. External-id
/// lookups are rewritten into reference form without a query; lookups that
/// need a query keep their raw match value for the resolver to rewrite.
pub fn transform_records(
    rows: &[Row],
    mapping: &LoadMapping,
    target_object: &str,
    options: &TransformOptions,
) -> Vec<Row> {
    debug!(
        "[TRANSFORM] {} rows for {} ({} mapped columns)",
        rows.len(),
        target_object,
        mapping
            .columns
            .iter()
            .filter(|m| m.target_field.as_deref().is_some_and(|f| !f.is_empty()))
            .count()
    );

    rows.iter()
        .map(|row| transform_row(row, mapping, options))
        .collect()
}

fn transform_row(row: &Row, mapping: &LoadMapping, options: &TransformOptions) -> Row {
    let mut out = Row::new();

    for column in &mapping.columns {
        let Some(target_field) = column.target_field.as_deref().filter(|f| !f.is_empty()) else {
            continue;
        };

        let raw = row.get(&column.source_column).cloned().unwrap_or(Value::Null);

        if is_empty_value(&raw) {
            write_empty(&mut out, target_field, options);
            continue;
        }

        if column.is_external_id_lookup() {
            let coerced = coerce_value(&raw, column.related_field_metadata.as_ref(), options);
            write_reference(&mut out, column, coerced, options.api_mode);
            continue;
        }

        let coerced = coerce_value(&raw, column.field_metadata.as_ref(), options);
        out.insert(target_field.to_string(), coerced);
    }

    out
}

/// Applies the mode-dependent policy for an empty source value.
fn write_empty(out: &mut Row, target_field: &str, options: &TransformOptions) {
    if options.insert_nulls {
        out.insert(target_field.to_string(), null_value(options.api_mode));
    }
    // Without insert_nulls the field is omitted entirely so the server-side
    // value is left untouched.
}

/// The value that clears a field in the given mode.
pub(crate) fn null_value(mode: ApiMode) -> Value {
    match mode {
        ApiMode::BulkFile => Value::String(BULK_NULL_SENTINEL.to_string()),
        ApiMode::Collections => Value::Null,
    }
}

/// True for values the load pipeline treats as empty.
pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Rewrites an external-id lookup into reference form.
///
/// Collections mode nests an object under the relationship name, with an
/// `attributes.type` discriminator when the field references more than one
/// target type. Bulk-file mode emits the flat dotted column equivalent.
fn write_reference(out: &mut Row, column: &ColumnMapping, value: Value, mode: ApiMode) {
    let (Some(relationship), Some(lookup_field)) = (
        column.relationship_name.as_deref(),
        column.target_lookup_field.as_deref(),
    ) else {
        return;
    };

    let polymorphic = column
        .field_metadata
        .as_ref()
        .is_some_and(|f| f.reference_to.len() > 1);
    let type_name = column.selected_reference_to.as_deref();

    match mode {
        ApiMode::Collections => {
            let mut nested = Row::new();
            if polymorphic {
                if let Some(type_name) = type_name {
                    nested.insert(
                        "attributes".to_string(),
                        serde_json::json!({ "type": type_name }),
                    );
                }
            }
            nested.insert(lookup_field.to_string(), value);
            out.insert(relationship.to_string(), Value::Object(nested));
        }
        ApiMode::BulkFile => {
            let key = match (polymorphic, type_name) {
                (true, Some(type_name)) => {
                    format!("{}.{}.{}", relationship, type_name, lookup_field)
                }
                _ => format!("{}.{}", relationship, lookup_field),
            };
            out.insert(key, value);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Type Coercion
// ─────────────────────────────────────────────────────────────────────────────

/// Coerces a value according to the target field's metadata.
///
/// Unknown types and values that fail to parse pass through unchanged; the
/// transformer never raises for a malformed value.
fn coerce_value(raw: &Value, field: Option<&FieldDescriptor>, options: &TransformOptions) -> Value {
    let Some(field) = field else {
        return raw.clone();
    };

    match field.field_type.as_str() {
        "date" => coerce_date(raw, options.date_order),
        "datetime" => coerce_datetime(raw, options.date_order),
        "boolean" => coerce_boolean(raw),
        "int" => coerce_int(raw),
        "double" | "currency" | "percent" => coerce_double(raw),
        _ => raw.clone(),
    }
}

/// Date patterns tried for the given input order. ISO always parses so that
/// already-coerced output is stable under re-transformation.
fn date_patterns(order: DateOrder) -> &'static [&'static str] {
    match order {
        DateOrder::Iso => &["%Y-%m-%d"],
        DateOrder::MonthFirst => &["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y"],
        DateOrder::DayFirst => &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"],
    }
}

fn coerce_date(raw: &Value, order: DateOrder) -> Value {
    let Value::String(s) = raw else {
        return raw.clone();
    };
    let s = s.trim();

    for pattern in date_patterns(order) {
        if let Ok(date) = NaiveDate::parse_from_str(s, pattern) {
            return Value::String(date.format("%Y-%m-%d").to_string());
        }
    }

    raw.clone()
}

fn datetime_patterns(order: DateOrder) -> &'static [&'static str] {
    match order {
        DateOrder::Iso => &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"],
        DateOrder::MonthFirst => &[
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M:%S",
            "%m/%d/%Y %H:%M:%S",
            "%m/%d/%Y %H:%M",
        ],
        DateOrder::DayFirst => &[
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M:%S",
            "%d/%m/%Y %H:%M:%S",
            "%d/%m/%Y %H:%M",
        ],
    }
}

fn coerce_datetime(raw: &Value, order: DateOrder) -> Value {
    let Value::String(s) = raw else {
        return raw.clone();
    };
    let s = s.trim();

    // Offset-carrying input re-normalizes to itself.
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true));
    }

    for pattern in datetime_patterns(order) {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, pattern) {
            return Value::String(format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S")));
        }
    }

    // A bare date becomes midnight UTC.
    for pattern in date_patterns(order) {
        if let Ok(date) = NaiveDate::parse_from_str(s, pattern) {
            return Value::String(format!("{}T00:00:00Z", date.format("%Y-%m-%d")));
        }
    }

    raw.clone()
}

fn coerce_boolean(raw: &Value) -> Value {
    match raw {
        Value::Bool(_) => raw.clone(),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Value::Bool(false),
            Some(1) => Value::Bool(true),
            _ => raw.clone(),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "checked" => Value::Bool(true),
            "false" | "0" | "no" | "n" => Value::Bool(false),
            _ => raw.clone(),
        },
        _ => raw.clone(),
    }
}

fn coerce_int(raw: &Value) -> Value {
    match raw {
        Value::Number(_) => raw.clone(),
        Value::String(s) => {
            let cleaned = strip_group_separators(s);
            if let Ok(n) = cleaned.parse::<i64>() {
                return Value::Number(n.into());
            }
            if let Ok(f) = cleaned.parse::<f64>() {
                if let Some(n) = serde_json::Number::from_f64(f) {
                    return Value::Number(n);
                }
            }
            raw.clone()
        }
        _ => raw.clone(),
    }
}

fn coerce_double(raw: &Value) -> Value {
    match raw {
        Value::Number(_) => raw.clone(),
        Value::String(s) => {
            let cleaned = strip_group_separators(s);
            if let Ok(f) = cleaned.parse::<f64>() {
                if let Some(n) = serde_json::Number::from_f64(f) {
                    return Value::Number(n);
                }
            }
            raw.clone()
        }
        _ => raw.clone(),
    }
}

/// Normalizes numeric strings: drops spaces, treats commas as group
/// separators when a decimal point is present, otherwise as a decimal comma.
fn strip_group_separators(s: &str) -> String {
    let s = s.trim().replace(' ', "");
    if s.contains('.') {
        s.replace(',', "")
    } else if s.matches(',').count() == 1 {
        s.replace(',', ".")
    } else {
        s.replace(',', "")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::mapping::LookupMatchMode;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn options(mode: ApiMode, insert_nulls: bool) -> TransformOptions {
        TransformOptions {
            insert_nulls,
            date_order: DateOrder::MonthFirst,
            api_mode: mode,
        }
    }

    #[test]
    fn unmapped_columns_are_dropped() {
        let mapping = LoadMapping::new(vec![
            ColumnMapping::new("Name", "Name"),
            ColumnMapping::unmapped("Notes"),
        ]);
        let rows = vec![row(&[
            ("Name", json!("Acme")),
            ("Notes", json!("internal only")),
        ])];

        let out = transform_records(
            &rows,
            &mapping,
            "Account",
            &options(ApiMode::Collections, false),
        );

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("Name"), Some(&json!("Acme")));
        assert!(!out[0].contains_key("Notes"));
    }

    #[test]
    fn bulk_mode_empty_without_insert_nulls_omits_field() {
        let mapping = LoadMapping::new(vec![ColumnMapping::new("Phone", "Phone")]);
        let rows = vec![row(&[("Phone", json!(""))])];

        let out = transform_records(&rows, &mapping, "Account", &options(ApiMode::BulkFile, false));

        assert!(
            !out[0].contains_key("Phone"),
            "empty value must be omitted, never an explicit null"
        );
    }

    #[test]
    fn bulk_mode_empty_with_insert_nulls_writes_sentinel() {
        let mapping = LoadMapping::new(vec![ColumnMapping::new("Phone", "Phone")]);
        let rows = vec![row(&[("Phone", json!(""))])];

        let out = transform_records(&rows, &mapping, "Account", &options(ApiMode::BulkFile, true));

        assert_eq!(out[0].get("Phone"), Some(&json!(BULK_NULL_SENTINEL)));
    }

    #[test]
    fn collections_mode_empty_with_insert_nulls_writes_null() {
        let mapping = LoadMapping::new(vec![ColumnMapping::new("Phone", "Phone")]);
        let rows = vec![row(&[("Phone", Value::Null)])];

        let out = transform_records(
            &rows,
            &mapping,
            "Account",
            &options(ApiMode::Collections, true),
        );

        assert_eq!(out[0].get("Phone"), Some(&Value::Null));
    }

    #[test]
    fn collections_mode_empty_without_insert_nulls_omits_key() {
        let mapping = LoadMapping::new(vec![ColumnMapping::new("Phone", "Phone")]);
        let rows = vec![row(&[("Phone", Value::Null)])];

        let out = transform_records(
            &rows,
            &mapping,
            "Account",
            &options(ApiMode::Collections, false),
        );

        assert!(!out[0].contains_key("Phone"));
    }

    #[test]
    fn missing_source_column_is_treated_as_empty() {
        let mapping = LoadMapping::new(vec![ColumnMapping::new("Phone", "Phone")]);
        let rows = vec![row(&[("Name", json!("Acme"))])];

        let out = transform_records(&rows, &mapping, "Account", &options(ApiMode::BulkFile, true));

        assert_eq!(out[0].get("Phone"), Some(&json!(BULK_NULL_SENTINEL)));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Coercion
    // ─────────────────────────────────────────────────────────────────────────

    fn typed_mapping(field_type: &str) -> LoadMapping {
        LoadMapping::new(vec![ColumnMapping {
            field_metadata: Some(FieldDescriptor {
                field_type: field_type.into(),
                ..FieldDescriptor::default()
            }),
            ..ColumnMapping::new("V", "V")
        }])
    }

    #[test]
    fn date_coercion_honors_month_first_order() {
        let mapping = typed_mapping("date");
        let rows = vec![row(&[("V", json!("1/15/2024"))])];

        let out = transform_records(
            &rows,
            &mapping,
            "Account",
            &options(ApiMode::Collections, false),
        );

        assert_eq!(out[0].get("V"), Some(&json!("2024-01-15")));
    }

    #[test]
    fn date_coercion_honors_day_first_order() {
        let mapping = typed_mapping("date");
        let rows = vec![row(&[("V", json!("15/01/2024"))])];

        let mut opts = options(ApiMode::Collections, false);
        opts.date_order = DateOrder::DayFirst;
        let out = transform_records(&rows, &mapping, "Account", &opts);

        assert_eq!(out[0].get("V"), Some(&json!("2024-01-15")));
    }

    #[test]
    fn datetime_coercion_normalizes_to_utc() {
        let mapping = typed_mapping("datetime");
        let rows = vec![row(&[("V", json!("1/15/2024 13:30"))])];

        let out = transform_records(
            &rows,
            &mapping,
            "Account",
            &options(ApiMode::Collections, false),
        );

        assert_eq!(out[0].get("V"), Some(&json!("2024-01-15T13:30:00Z")));
    }

    #[test]
    fn boolean_coercion_accepts_common_spellings() {
        let mapping = typed_mapping("boolean");
        for (input, expected) in [
            (json!("Yes"), json!(true)),
            (json!("0"), json!(false)),
            (json!(true), json!(true)),
            (json!("checked"), json!(true)),
        ] {
            let rows = vec![row(&[("V", input)])];
            let out = transform_records(
                &rows,
                &mapping,
                "Account",
                &options(ApiMode::Collections, false),
            );
            assert_eq!(out[0].get("V"), Some(&expected));
        }
    }

    #[test]
    fn numeric_coercion_strips_group_separators() {
        let mapping = typed_mapping("double");
        let rows = vec![row(&[("V", json!("1,234.5"))])];

        let out = transform_records(
            &rows,
            &mapping,
            "Account",
            &options(ApiMode::Collections, false),
        );

        assert_eq!(out[0].get("V"), Some(&json!(1234.5)));
    }

    #[test]
    fn decimal_comma_is_normalized() {
        let mapping = typed_mapping("double");
        let rows = vec![row(&[("V", json!("1234,5"))])];

        let out = transform_records(
            &rows,
            &mapping,
            "Account",
            &options(ApiMode::Collections, false),
        );

        assert_eq!(out[0].get("V"), Some(&json!(1234.5)));
    }

    #[test]
    fn malformed_values_pass_through_unchanged() {
        let mapping = typed_mapping("date");
        let rows = vec![row(&[("V", json!("not a date"))])];

        let out = transform_records(
            &rows,
            &mapping,
            "Account",
            &options(ApiMode::Collections, false),
        );

        assert_eq!(out[0].get("V"), Some(&json!("not a date")));
    }

    #[test]
    fn values_without_metadata_pass_through() {
        let mapping = LoadMapping::new(vec![ColumnMapping::new("V", "V")]);
        let rows = vec![row(&[("V", json!("07/04/2024"))])];

        let out = transform_records(
            &rows,
            &mapping,
            "Account",
            &options(ApiMode::Collections, false),
        );

        assert_eq!(out[0].get("V"), Some(&json!("07/04/2024")));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // External-id References
    // ─────────────────────────────────────────────────────────────────────────

    fn external_lookup(reference_to: Vec<&str>, selected: Option<&str>) -> ColumnMapping {
        ColumnMapping {
            mapped_to_lookup: true,
            selected_reference_to: selected.map(String::from),
            relationship_name: Some("Owner".into()),
            target_lookup_field: Some("Ext_Id__c".into()),
            lookup_option_use_first_match: LookupMatchMode::FirstMatch,
            field_metadata: Some(FieldDescriptor {
                field_type: "reference".into(),
                is_external_id: false,
                reference_to: reference_to.into_iter().map(String::from).collect(),
            }),
            related_field_metadata: Some(FieldDescriptor {
                field_type: "string".into(),
                is_external_id: true,
                reference_to: vec![],
            }),
            ..ColumnMapping::new("OwnerKey", "OwnerId")
        }
    }

    #[test]
    fn external_id_lookup_nests_reference_in_collections_mode() {
        let mapping = LoadMapping::new(vec![external_lookup(vec!["User"], Some("User"))]);
        let rows = vec![row(&[("OwnerKey", json!("EMP-42"))])];

        let out = transform_records(
            &rows,
            &mapping,
            "Account",
            &options(ApiMode::Collections, false),
        );

        assert_eq!(out[0].get("Owner"), Some(&json!({ "Ext_Id__c": "EMP-42" })));
        assert!(!out[0].contains_key("OwnerId"));
    }

    #[test]
    fn polymorphic_reference_carries_type_discriminator() {
        let mapping = LoadMapping::new(vec![external_lookup(
            vec!["User", "Group"],
            Some("Group"),
        )]);
        let rows = vec![row(&[("OwnerKey", json!("EMP-42"))])];

        let out = transform_records(
            &rows,
            &mapping,
            "Account",
            &options(ApiMode::Collections, false),
        );

        assert_eq!(
            out[0].get("Owner"),
            Some(&json!({
                "attributes": { "type": "Group" },
                "Ext_Id__c": "EMP-42"
            }))
        );
    }

    #[test]
    fn bulk_mode_reference_uses_dotted_column() {
        let mapping = LoadMapping::new(vec![external_lookup(vec!["User"], Some("User"))]);
        let rows = vec![row(&[("OwnerKey", json!("EMP-42"))])];

        let out = transform_records(&rows, &mapping, "Account", &options(ApiMode::BulkFile, false));

        assert_eq!(out[0].get("Owner.Ext_Id__c"), Some(&json!("EMP-42")));
    }

    #[test]
    fn bulk_mode_polymorphic_reference_includes_type_segment() {
        let mapping = LoadMapping::new(vec![external_lookup(
            vec!["User", "Group"],
            Some("Group"),
        )]);
        let rows = vec![row(&[("OwnerKey", json!("EMP-42"))])];

        let out = transform_records(&rows, &mapping, "Account", &options(ApiMode::BulkFile, false));

        assert_eq!(out[0].get("Owner.Group.Ext_Id__c"), Some(&json!("EMP-42")));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Idempotence
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn transform_is_stable_for_rows_without_lookups() {
        // Mapping whose source columns equal its target fields, so output can
        // be fed back through.
        let mapping = LoadMapping::new(vec![
            ColumnMapping {
                field_metadata: Some(FieldDescriptor {
                    field_type: "date".into(),
                    ..FieldDescriptor::default()
                }),
                ..ColumnMapping::new("CloseDate", "CloseDate")
            },
            ColumnMapping {
                field_metadata: Some(FieldDescriptor {
                    field_type: "double".into(),
                    ..FieldDescriptor::default()
                }),
                ..ColumnMapping::new("Amount", "Amount")
            },
            ColumnMapping::new("Name", "Name"),
        ]);
        let rows = vec![row(&[
            ("CloseDate", json!("1/15/2024")),
            ("Amount", json!("1,000.5")),
            ("Name", json!("Acme")),
        ])];

        let opts = options(ApiMode::Collections, false);
        let once = transform_records(&rows, &mapping, "Opportunity", &opts);
        let twice = transform_records(&once, &mapping, "Opportunity", &opts);

        assert_eq!(once, twice);
    }
}
