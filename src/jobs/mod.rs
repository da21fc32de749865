//! Job pipeline: descriptors, the isolated executor, polling, and dispatch.
//!
//! A job travels as a [`JobDescriptor`] from the dispatcher to the executor
//! task for its kind category, and comes back as exactly one [`JobReply`].
//! Retry is always the caller's decision, expressed as a brand-new
//! descriptor with a fresh id.

pub mod dispatcher;
pub mod executor;
pub mod poller;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::materialize::{DownloadFormat, FilePayload};
use crate::salesforce::{OrgContext, QueryPage, RecordResult, RetrieveRequest};

pub use dispatcher::{JobDispatcher, JobState};
pub use executor::JobExecutor;
pub use poller::{poll_until_done, PollOptions};

// ─────────────────────────────────────────────────────────────────────────────
// Job Kinds and Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// The fixed set of job handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    BulkDelete,
    BulkDownload,
    RetrievePackage,
}

/// Payload for a bulk delete: record references sharing one target object.
///
/// Each reference is either a plain id string or a record object carrying an
/// `Id` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeletePayload {
    pub object: String,
    pub records: Vec<serde_json::Value>,
}

/// Payload for a paged download materialized into a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDownloadPayload {
    /// First page of records plus the continuation cursor.
    pub initial: QueryPage,
    /// Output file format.
    pub format: DownloadFormat,
    /// Column order for tabular output.
    pub fields: Vec<String>,
    /// Base name for the suggested file name (extension added per format).
    pub file_base_name: String,
}

/// Job payload, one variant per kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobPayload {
    BulkDelete(BulkDeletePayload),
    BulkDownload(BulkDownloadPayload),
    RetrievePackage(RetrieveRequest),
}

impl JobPayload {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::BulkDelete(_) => JobKind::BulkDelete,
            JobPayload::BulkDownload(_) => JobKind::BulkDownload,
            JobPayload::RetrievePackage(_) => JobKind::RetrievePackage,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Job Descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// One submitted job. Immutable once dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    /// Caller-generated id, unique for the session.
    pub id: String,
    pub kind: JobKind,
    pub payload: JobPayload,
    pub created_at: DateTime<Utc>,
}

impl JobDescriptor {
    /// Builds a descriptor whose kind is derived from the payload, so the
    /// two cannot disagree at construction time.
    pub fn new(id: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            id: id.into(),
            kind: payload.kind(),
            payload,
            created_at: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation
// ─────────────────────────────────────────────────────────────────────────────

/// Shared cancellation flag, checked at the poller boundary.
///
/// The transformer and resolver are not cancellable mid-operation; they
/// complete within one batch of synchronous work per chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Takes effect at the next poller check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// In-bound executor message: the job plus its org context and cancel flag.
#[derive(Debug, Clone)]
pub struct JobMessage {
    pub job: JobDescriptor,
    pub org: OrgContext,
    pub cancel: CancelFlag,
}

/// Successful job output, one variant per kind.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobResults {
    /// Per-record delete results, in submission order. Present even on a
    /// failed job, carrying the chunks that completed before the failure.
    Deleted { results: Vec<RecordResult> },
    /// Count of records accumulated into the materialized file.
    Downloaded { record_count: usize },
    /// Decoded archive summary; the bytes ride the reply attachment.
    Retrieved { file_name: String, byte_len: usize },
}

/// Out-bound executor message: exactly one per received job.
///
/// `results` and `error` can both be present (partial results plus the
/// causing error). Large file payloads ride `attachment` as one transferable
/// binary buffer.
#[derive(Debug)]
pub struct JobReply {
    pub name: JobKind,
    pub job: JobDescriptor,
    pub results: Option<JobResults>,
    pub error: Option<String>,
    pub attachment: Option<FilePayload>,
    pub completed_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciled Result
// ─────────────────────────────────────────────────────────────────────────────

/// Terminal outcome of a job as recorded by the dispatcher.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum JobOutcome {
    Ok { results: JobResults },
    Err { message: String },
}

/// The single result produced per descriptor; at-most-once per job id.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: String,
    #[serde(flatten)]
    pub outcome: JobOutcome,
    pub completed_at: DateTime<Utc>,
}
