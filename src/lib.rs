//! corral: asynchronous bulk-operation pipeline for Salesforce admin tools.
//!
//! The pipeline dispatches long-running record and metadata operations to
//! isolated executor tasks, polls slow platform jobs to completion with
//! bounded linear backoff, transforms tabular input into API-ready records
//! (resolving lookups that are not keyed by an external id), and
//! materializes result sets into downloadable CSV, XLSX, or JSON payloads.
//!
//! A typical load flows: [`load::transform_records`] ->
//! [`load::resolve_related_records`] -> submit through [`jobs::JobDispatcher`]
//! -> executor -> reply reconciled into the dispatcher's registry.

pub mod config;
pub mod error;
pub mod jobs;
pub mod load;
pub mod materialize;
pub mod salesforce;

pub use config::BulkLimits;
pub use error::{AppError, ErrorPresentation};
pub use jobs::{
    CancelFlag, JobDescriptor, JobDispatcher, JobKind, JobOutcome, JobPayload, JobResult,
};
pub use load::{
    resolve_related_records, transform_records, ApiMode, LoadMapping, ResolveOutcome, Row,
    RowError,
};
pub use materialize::{materialize, DownloadFormat, FilePayload};
pub use salesforce::{OrgContext, RestApiClient};
