//! Column mappings built once per load session.
//!
//! A [`LoadMapping`] is constructed from the target object's schema plus the
//! user's column choices, and is read-only during transform and resolve.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Submission Modes
// ─────────────────────────────────────────────────────────────────────────────

/// Which write path the transformed rows are destined for.
///
/// The two paths give absent and null values different server-side meaning,
/// so null handling is mode-dependent throughout the load pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiMode {
    /// Flat delimited file submitted to the bulk API. A field is cleared only
    /// when a documented null sentinel is submitted; an absent value leaves it
    /// untouched.
    BulkFile,
    /// Structured record collections. A field is cleared by an explicit JSON
    /// null; an omitted key leaves it untouched.
    Collections,
}

/// Policy when a lookup value matches more than one target record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LookupMatchMode {
    /// Take the first matching record.
    FirstMatch,
    /// Treat multiple matches as a row error.
    ErrorIfMultiple,
}

impl Default for LookupMatchMode {
    fn default() -> Self {
        LookupMatchMode::ErrorIfMultiple
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Field Metadata
// ─────────────────────────────────────────────────────────────────────────────

/// Schema metadata for one field, as described by the target object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Field type name as reported by the platform ("date", "datetime",
    /// "boolean", "int", "double", "currency", "percent", "string", ...).
    #[serde(default)]
    pub field_type: String,
    /// Whether the platform guarantees this field unique and safe to match on.
    #[serde(default)]
    pub is_external_id: bool,
    /// Target object types this field can reference. More than one entry
    /// makes the field polymorphic.
    #[serde(default)]
    pub reference_to: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Column Mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Mapping for one source column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    /// Column name in the source data.
    pub source_column: String,
    /// Target field on the base object. A column with no target is dropped.
    #[serde(default)]
    pub target_field: Option<String>,
    /// Whether this column is matched against a field on a referenced object
    /// instead of carrying the target value directly.
    #[serde(default)]
    pub mapped_to_lookup: bool,
    /// Which referenced object to match against (relevant when the lookup
    /// field is polymorphic).
    #[serde(default)]
    pub selected_reference_to: Option<String>,
    /// Relationship name used for nested reference writes.
    #[serde(default)]
    pub relationship_name: Option<String>,
    /// Field on the referenced object that the source values match.
    #[serde(default)]
    pub target_lookup_field: Option<String>,
    /// Policy for multiple lookup matches.
    #[serde(default)]
    pub lookup_option_use_first_match: LookupMatchMode,
    /// Write a null instead of failing the row when no lookup match exists.
    #[serde(default)]
    pub lookup_option_null_if_no_match: bool,
    /// Metadata for the target field on the base object.
    #[serde(default)]
    pub field_metadata: Option<FieldDescriptor>,
    /// Metadata for the lookup field on the referenced object.
    #[serde(default)]
    pub related_field_metadata: Option<FieldDescriptor>,
}

impl ColumnMapping {
    /// A plain mapping from a source column to a target field.
    pub fn new(source_column: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_field: Some(target_field.into()),
            mapped_to_lookup: false,
            selected_reference_to: None,
            relationship_name: None,
            target_lookup_field: None,
            lookup_option_use_first_match: LookupMatchMode::default(),
            lookup_option_null_if_no_match: false,
            field_metadata: None,
            related_field_metadata: None,
        }
    }

    /// A column with no target field; dropped by the transformer.
    pub fn unmapped(source_column: impl Into<String>) -> Self {
        Self {
            target_field: None,
            ..Self::new(source_column, "")
        }
    }

    /// Whether this mapping requires a lookup query: it is mapped to a lookup
    /// and the related field is not an external identifier.
    ///
    /// External-id lookups are rewritten inline by the transformer and never
    /// queried.
    pub fn needs_lookup_query(&self) -> bool {
        self.mapped_to_lookup
            && self.target_field.as_deref().is_some_and(|f| !f.is_empty())
            && self.target_lookup_field.is_some()
            && self.selected_reference_to.is_some()
            && !self
                .related_field_metadata
                .as_ref()
                .is_some_and(|f| f.is_external_id)
    }

    /// Whether this mapping is an external-id lookup resolved inline.
    pub fn is_external_id_lookup(&self) -> bool {
        self.mapped_to_lookup
            && self
                .related_field_metadata
                .as_ref()
                .is_some_and(|f| f.is_external_id)
            && self.relationship_name.is_some()
            && self.target_lookup_field.is_some()
    }
}

/// Complete mapping for one load session, in source-column order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadMapping {
    pub columns: Vec<ColumnMapping>,
}

impl LoadMapping {
    pub fn new(columns: Vec<ColumnMapping>) -> Self {
        Self { columns }
    }

    /// Mappings that need a resolution query, in input order.
    pub fn lookup_mappings(&self) -> Vec<&ColumnMapping> {
        self.columns
            .iter()
            .filter(|m| m.needs_lookup_query())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_mapping(external_id: bool) -> ColumnMapping {
        ColumnMapping {
            mapped_to_lookup: true,
            selected_reference_to: Some("Contact".into()),
            relationship_name: Some("Contact".into()),
            target_lookup_field: Some("Email".into()),
            related_field_metadata: Some(FieldDescriptor {
                field_type: "string".into(),
                is_external_id: external_id,
                reference_to: vec![],
            }),
            ..ColumnMapping::new("Email", "ContactId")
        }
    }

    #[test]
    fn non_external_lookup_needs_query() {
        let m = lookup_mapping(false);
        assert!(m.needs_lookup_query());
        assert!(!m.is_external_id_lookup());
    }

    #[test]
    fn external_id_lookup_is_resolved_inline() {
        let m = lookup_mapping(true);
        assert!(!m.needs_lookup_query());
        assert!(m.is_external_id_lookup());
    }

    #[test]
    fn plain_mapping_is_neither() {
        let m = ColumnMapping::new("Name", "Name");
        assert!(!m.needs_lookup_query());
        assert!(!m.is_external_id_lookup());
    }

    #[test]
    fn unmapped_column_has_no_target() {
        let m = ColumnMapping::unmapped("Notes");
        assert!(m.target_field.is_none());
    }

    #[test]
    fn lookup_mappings_preserve_input_order() {
        let mapping = LoadMapping::new(vec![
            lookup_mapping(false),
            ColumnMapping::new("Name", "Name"),
            ColumnMapping {
                source_column: "Owner".into(),
                ..lookup_mapping(false)
            },
        ]);

        let lookups = mapping.lookup_mappings();
        assert_eq!(lookups.len(), 2);
        assert_eq!(lookups[0].source_column, "Email");
        assert_eq!(lookups[1].source_column, "Owner");
    }

    #[test]
    fn match_mode_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&LookupMatchMode::FirstMatch).unwrap(),
            r#""FIRST_MATCH""#
        );
        assert_eq!(
            serde_json::to_string(&LookupMatchMode::ErrorIfMultiple).unwrap(),
            r#""ERROR_IF_MULTIPLE""#
        );
    }
}
