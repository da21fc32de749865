//! Provider traits decoupling the pipeline from the HTTP client.
//!
//! The resolver and the job executor are written against these traits so the
//! orchestration layer can hand them the real REST client while tests provide
//! in-memory fakes. Object-safe via boxed futures.

use std::future::Future;
use std::pin::Pin;

use crate::error::AppError;
use crate::salesforce::{QueryPage, RecordResult, RetrieveRequest, RetrieveStatus};

/// Boxed future type used by all provider traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ─────────────────────────────────────────────────────────────────────────────
// Query Capability
// ─────────────────────────────────────────────────────────────────────────────

/// Record query capability: one SOQL execution plus cursor continuation.
pub trait QueryApi: Send + Sync {
    /// Executes a SOQL query and returns the first page of results.
    fn query<'a>(&'a self, soql: &'a str) -> BoxFuture<'a, Result<QueryPage, AppError>>;

    /// Fetches the next page for a previously returned cursor.
    fn query_more<'a>(&'a self, cursor: &'a str) -> BoxFuture<'a, Result<QueryPage, AppError>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Record Write Capability
// ─────────────────────────────────────────────────────────────────────────────

/// Record write capability used by the delete handler.
pub trait RecordApi: Send + Sync {
    /// Deletes the given record ids, returning one result per id in order.
    fn delete_records<'a>(
        &'a self,
        object: &'a str,
        ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<RecordResult>, AppError>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata Capability
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata retrieve capability used by the package handler.
pub trait MetadataApi: Send + Sync {
    /// Starts a retrieve and returns the async operation id.
    fn start_retrieve<'a>(
        &'a self,
        request: &'a RetrieveRequest,
    ) -> BoxFuture<'a, Result<String, AppError>>;

    /// Checks the status of an in-flight retrieve.
    fn retrieve_status<'a>(
        &'a self,
        operation_id: &'a str,
    ) -> BoxFuture<'a, Result<RetrieveStatus, AppError>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Combined Platform Surface
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the job executor needs from the platform, as one object.
pub trait PlatformApi: QueryApi + RecordApi + MetadataApi {}

impl<T: QueryApi + RecordApi + MetadataApi> PlatformApi for T {}
