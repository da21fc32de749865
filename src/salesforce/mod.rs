//! Salesforce API boundary: shared wire types and the HTTP client.
//!
//! Everything the pipeline knows about the remote platform lives here:
//! response shapes for queries, record writes, and metadata retrieves, plus
//! the provider traits the rest of the crate is written against. The remote
//! APIs are treated as black boxes with documented response shapes; nothing
//! in this module models their execution semantics.

pub mod api;
pub mod rest;

use serde::{Deserialize, Serialize};

pub use api::{MetadataApi, PlatformApi, QueryApi, RecordApi};
pub use rest::RestApiClient;

/// Salesforce REST API version used for all endpoint paths.
pub const API_VERSION: &str = "v60.0";

// ─────────────────────────────────────────────────────────────────────────────
// Org Context
// ─────────────────────────────────────────────────────────────────────────────

/// Connection context for one Salesforce org, carried with every job message.
///
/// The access token is already issued by the time it reaches this crate; the
/// OAuth flow lives in the surrounding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgContext {
    /// The 18-character org id.
    pub org_id: String,
    /// Base instance URL (e.g., "https://na1.salesforce.com").
    pub instance_url: String,
    /// OAuth access token for the org.
    pub access_token: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Query Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// One page of query results plus the continuation cursor, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPage {
    /// Records in this page.
    pub records: Vec<serde_json::Value>,
    /// Cursor to fetch the next page. Absent when `done` is true.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Whether this is the last page.
    pub done: bool,
}

impl QueryPage {
    /// A final page holding the given records.
    pub fn complete(records: Vec<serde_json::Value>) -> Self {
        Self {
            records,
            cursor: None,
            done: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record Write Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Per-record outcome of a write (delete) call.
///
/// Matches the Salesforce collections response shape exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResult {
    /// Whether the operation succeeded for this record.
    pub success: bool,
    /// The record id, when the platform reports one.
    #[serde(default)]
    pub id: Option<String>,
    /// Errors for this record, empty on success.
    #[serde(default)]
    pub errors: Vec<RecordResultError>,
}

/// One error attached to a failed record result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResultError {
    pub message: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata Retrieve Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// What to retrieve: exactly one of the three request shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum RetrieveRequest {
    /// Explicit list of metadata types and members.
    Items { types: Vec<PackageItem> },
    /// A package manifest document (package.xml contents).
    Manifest { xml: String },
    /// Named packages installed in the org.
    Packages { names: Vec<String> },
}

/// One metadata type with its requested members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageItem {
    /// Metadata type name (e.g., "ApexClass").
    pub name: String,
    /// Member names, or "*" for all.
    pub members: Vec<String>,
}

/// Status of an in-flight metadata retrieve operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveStatus {
    /// Whether the retrieve reached a terminal state.
    pub done: bool,
    /// Terminal status string ("Succeeded", "Failed"), when reported.
    #[serde(default)]
    pub status: Option<String>,
    /// Base64-encoded archive, present once the retrieve succeeds.
    #[serde(default)]
    pub zip_file: Option<String>,
    /// Error message when the retrieve failed remotely.
    #[serde(default)]
    pub error_message: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Redacts an id for logging (shows first 8 chars).
pub(crate) fn redact_id(id: &str) -> String {
    if id.len() > 8 {
        format!("{}...", &id[..8])
    } else {
        id.to_string()
    }
}
