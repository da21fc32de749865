//! Salesforce REST client for the pipeline's three API surfaces.
//!
//! This module provides the concrete HTTP implementation of the provider
//! traits in [`crate::salesforce::api`]:
//!
//! - **SOQL query + cursor continuation** for paged downloads and lookups
//! - **Collection delete** for bulk record removal
//! - **Metadata retrieve** submit and status checks
//!
//! # Security
//!
//! - Raw SOQL queries and record contents are never logged
//! - Auth headers and tokens are never logged
//! - Only HTTP method, path, counts, and status codes are logged

use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::error::AppError;
use crate::salesforce::api::{BoxFuture, MetadataApi, QueryApi, RecordApi};
use crate::salesforce::{
    redact_id, OrgContext, QueryPage, RecordResult, RetrieveRequest, RetrieveStatus, API_VERSION,
};

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types (match Salesforce JSON exactly)
// ─────────────────────────────────────────────────────────────────────────────

/// Mirrors the Salesforce query response JSON exactly.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQueryResponse {
    /// Whether this is the last page of results.
    done: bool,
    /// URL to fetch the next page (relative to the instance URL).
    /// Only present if `done` is false.
    next_records_url: Option<String>,
    /// The records returned in this page.
    records: Vec<serde_json::Value>,
}

/// Response from submitting a metadata retrieve.
#[derive(Debug, Deserialize)]
struct WireRetrieveSubmitted {
    id: String,
}

/// Salesforce API error response format.
/// Salesforce returns errors as an array of error objects.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSalesforceError {
    message: String,
    error_code: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// RestApiClient
// ─────────────────────────────────────────────────────────────────────────────

/// Concrete `reqwest`-backed client implementing the platform provider traits.
///
/// One instance per org; the HTTP client is shared.
#[derive(Clone)]
pub struct RestApiClient {
    /// Shared HTTP client.
    client: Arc<Client>,
    /// Base instance URL (e.g., "https://na1.salesforce.com").
    base_url: Url,
    /// Access token for authentication.
    access_token: String,
}

impl RestApiClient {
    /// Creates a new client for the given instance and token.
    pub fn new(client: Arc<Client>, base_url: Url, access_token: String) -> Self {
        Self {
            client,
            base_url,
            access_token,
        }
    }

    /// Creates a client from an org context, sharing the given HTTP client.
    ///
    /// # Errors
    ///
    /// `AppError::Internal` if the org's instance URL does not parse.
    pub fn for_org(client: Arc<Client>, org: &OrgContext) -> Result<Self, AppError> {
        let base_url = Url::parse(&org.instance_url)
            .map_err(|e| AppError::Internal(format!("Invalid instance URL: {}", e)))?;
        Ok(Self::new(client, base_url, org.access_token.clone()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Query
    // ─────────────────────────────────────────────────────────────────────────

    /// Executes a SOQL query, returning the first page and continuation cursor.
    async fn run_query(&self, soql: &str) -> Result<QueryPage, AppError> {
        let mut url = self.build_url(&format!("/services/data/{}/query", API_VERSION))?;
        url.query_pairs_mut().append_pair("q", soql);

        // The SOQL text is never logged.
        info!("[REST] GET /query");
        self.fetch_query_page(url).await
    }

    /// Fetches the page behind a previously returned cursor.
    async fn run_query_more(&self, cursor: &str) -> Result<QueryPage, AppError> {
        let url = self.build_url(cursor)?;

        info!("[REST] GET /query (continuation)");
        self.fetch_query_page(url).await
    }

    async fn fetch_query_page(&self, url: Url) -> Result<QueryPage, AppError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Query request failed: {}", e)))?;

        let status = response.status();
        info!("[REST] GET /query -> {}", status.as_u16());

        if !status.is_success() {
            return Err(self.parse_error_response(response, status).await);
        }

        let wire: WireQueryResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse query response: {}", e)))?;

        Ok(QueryPage {
            records: wire.records,
            cursor: if wire.done { None } else { wire.next_records_url },
            done: wire.done,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Record Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Deletes a batch of records through the collections endpoint.
    ///
    /// `allOrNone=false` so individual record failures are reported per
    /// record instead of rolling back the batch.
    async fn run_delete(&self, object: &str, ids: &[String]) -> Result<Vec<RecordResult>, AppError> {
        let mut url =
            self.build_url(&format!("/services/data/{}/composite/sobjects", API_VERSION))?;
        url.query_pairs_mut()
            .append_pair("ids", &ids.join(","))
            .append_pair("allOrNone", "false");

        info!(
            "[REST] DELETE /composite/sobjects ({} {} records)",
            ids.len(),
            object
        );

        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Delete request failed: {}", e)))?;

        let status = response.status();
        info!("[REST] DELETE /composite/sobjects -> {}", status.as_u16());

        if !status.is_success() {
            return Err(self.parse_error_response(response, status).await);
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse delete response: {}", e)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metadata Retrieve
    // ─────────────────────────────────────────────────────────────────────────

    /// Submits a retrieve request and returns the async operation id.
    async fn run_start_retrieve(&self, request: &RetrieveRequest) -> Result<String, AppError> {
        let url = self.build_url(&format!("/services/data/{}/metadata/retrieve", API_VERSION))?;

        let body = retrieve_wire_body(request);

        info!("[REST] POST /metadata/retrieve");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Retrieve submit failed: {}", e)))?;

        let status = response.status();
        info!("[REST] POST /metadata/retrieve -> {}", status.as_u16());

        if !status.is_success() {
            return Err(self.parse_error_response(response, status).await);
        }

        let submitted: WireRetrieveSubmitted = response.json().await.map_err(|e| {
            AppError::Internal(format!("Failed to parse retrieve response: {}", e))
        })?;

        Ok(submitted.id)
    }

    /// Checks the status of an in-flight retrieve.
    async fn run_retrieve_status(&self, operation_id: &str) -> Result<RetrieveStatus, AppError> {
        let url = self.build_url(&format!(
            "/services/data/{}/metadata/retrieve/{}",
            API_VERSION, operation_id
        ))?;

        info!(
            "[REST] GET /metadata/retrieve/{} (status)",
            redact_id(operation_id)
        );

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Retrieve status failed: {}", e)))?;

        let status = response.status();
        info!(
            "[REST] GET /metadata/retrieve/{} -> {}",
            redact_id(operation_id),
            status.as_u16()
        );

        if !status.is_success() {
            return Err(self.parse_error_response(response, status).await);
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse retrieve status: {}", e)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Private Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Joins a path (absolute or cursor-relative) with the instance URL.
    fn build_url(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::Internal(format!("Failed to build URL: {}", e)))
    }

    /// Parses an error response and maps to the appropriate AppError.
    async fn parse_error_response(
        &self,
        response: reqwest::Response,
        status: reqwest::StatusCode,
    ) -> AppError {
        // Check for rate limiting
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return AppError::RateLimited {
                retry_after_secs: retry_after,
            };
        }

        // Check for not found
        if status == reqwest::StatusCode::NOT_FOUND {
            return AppError::NotFound("Resource not found".to_string());
        }

        // Try to parse Salesforce error response
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("Unable to read error body"));

        if let Ok(errors) = serde_json::from_str::<Vec<WireSalesforceError>>(&body) {
            if let Some(first_error) = errors.first() {
                if first_error.error_code == "REQUEST_LIMIT_EXCEEDED" {
                    return AppError::RateLimited {
                        retry_after_secs: None,
                    };
                }

                return AppError::SalesforceError(format!(
                    "[{}] {}",
                    first_error.error_code, first_error.message
                ));
            }
        }

        // Fallback to generic error
        AppError::SalesforceError(format!(
            "HTTP {} - {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown error")
        ))
    }
}

/// Maps a retrieve request onto the wire body shape.
fn retrieve_wire_body(request: &RetrieveRequest) -> serde_json::Value {
    match request {
        RetrieveRequest::Items { types } => serde_json::json!({
            "unpackaged": { "types": types }
        }),
        RetrieveRequest::Manifest { xml } => serde_json::json!({
            "manifest": xml
        }),
        RetrieveRequest::Packages { names } => serde_json::json!({
            "packageNames": names
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl QueryApi for RestApiClient {
    fn query<'a>(&'a self, soql: &'a str) -> BoxFuture<'a, Result<QueryPage, AppError>> {
        Box::pin(self.run_query(soql))
    }

    fn query_more<'a>(&'a self, cursor: &'a str) -> BoxFuture<'a, Result<QueryPage, AppError>> {
        Box::pin(self.run_query_more(cursor))
    }
}

impl RecordApi for RestApiClient {
    fn delete_records<'a>(
        &'a self,
        object: &'a str,
        ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<RecordResult>, AppError>> {
        Box::pin(self.run_delete(object, ids))
    }
}

impl MetadataApi for RestApiClient {
    fn start_retrieve<'a>(
        &'a self,
        request: &'a RetrieveRequest,
    ) -> BoxFuture<'a, Result<String, AppError>> {
        Box::pin(self.run_start_retrieve(request))
    }

    fn retrieve_status<'a>(
        &'a self,
        operation_id: &'a str,
    ) -> BoxFuture<'a, Result<RetrieveStatus, AppError>> {
        Box::pin(self.run_retrieve_status(operation_id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
