//! Isolated job execution.
//!
//! Each executor owns one spawned task reachable only through its message
//! channel; no state is shared with the caller. Jobs run one at a time per
//! executor, each moving `Received -> Running -> {Succeeded, Failed}`, and
//! every received message produces exactly one reply. There is no retry at
//! this layer; retry is the caller's decision, expressed as a brand-new
//! descriptor.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::BulkLimits;
use crate::error::AppError;
use crate::jobs::poller::{poll_until_done, PollOptions};
use crate::jobs::{
    BulkDeletePayload, BulkDownloadPayload, CancelFlag, JobMessage, JobPayload, JobReply,
    JobResults,
};
use crate::materialize::{DownloadAccumulator, FilePayload};
use crate::salesforce::{OrgContext, PlatformApi, RetrieveRequest, RetrieveStatus};

/// Builds a platform API for the org a job arrived with.
pub type ApiFactoryFn =
    dyn Fn(&OrgContext) -> Result<Arc<dyn PlatformApi>, AppError> + Send + Sync;

/// Shared handle to an [`ApiFactoryFn`].
pub type ApiFactory = Arc<ApiFactoryFn>;

// ─────────────────────────────────────────────────────────────────────────────
// JobExecutor
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to one executor task.
#[derive(Clone)]
pub struct JobExecutor {
    tx: mpsc::Sender<JobMessage>,
}

impl JobExecutor {
    /// Spawns the executor task. Replies for every submitted job arrive on
    /// `reply_tx` at an arbitrary future point; the caller is never blocked
    /// on job completion.
    pub fn spawn(factory: ApiFactory, limits: BulkLimits, reply_tx: mpsc::Sender<JobReply>) -> Self {
        let (tx, mut rx) = mpsc::channel::<JobMessage>(32);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let reply = handle_message(factory.as_ref(), &limits, message).await;
                if reply_tx.send(reply).await.is_err() {
                    warn!("[EXECUTOR] reply channel closed, stopping");
                    break;
                }
            }
        });

        Self { tx }
    }

    /// Submits a job message to the executor's inbox.
    pub async fn submit(&self, message: JobMessage) -> Result<(), AppError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| AppError::Internal("Executor task has stopped".to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message Handling
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one handler run. A failure can still carry the partial results
/// that completed before the causing error.
enum HandlerOutcome {
    Success {
        results: JobResults,
        attachment: Option<FilePayload>,
    },
    Failure {
        partial: Option<JobResults>,
        error: AppError,
    },
}

/// Runs one job and converts the outcome into a reply. Every raised error
/// becomes a `Failed` reply carrying the error's message; nothing escapes
/// the message boundary unconverted.
async fn handle_message(
    factory: &ApiFactoryFn,
    limits: &BulkLimits,
    message: JobMessage,
) -> JobReply {
    let JobMessage { job, org, cancel } = message;

    info!("[EXECUTOR] {:?} job {} running", job.kind, job.id);

    let outcome = match factory(&org) {
        Ok(api) => run_handler(api.as_ref(), limits, &job.payload, job.kind, &cancel).await,
        Err(error) => HandlerOutcome::Failure {
            partial: None,
            error,
        },
    };

    let (results, error, attachment) = match outcome {
        HandlerOutcome::Success {
            results,
            attachment,
        } => {
            info!("[EXECUTOR] {:?} job {} succeeded", job.kind, job.id);
            (Some(results), None, attachment)
        }
        HandlerOutcome::Failure { partial, error } => {
            warn!("[EXECUTOR] {:?} job {} failed: {}", job.kind, job.id, error);
            (partial, Some(error.to_string()), None)
        }
    };

    JobReply {
        name: job.kind,
        job,
        results,
        error,
        attachment,
        completed_at: Utc::now(),
    }
}

async fn run_handler(
    api: &dyn PlatformApi,
    limits: &BulkLimits,
    payload: &JobPayload,
    kind: crate::jobs::JobKind,
    cancel: &CancelFlag,
) -> HandlerOutcome {
    use crate::jobs::JobKind::*;

    match (kind, payload) {
        (BulkDelete, JobPayload::BulkDelete(p)) => bulk_delete(api, p, limits).await,
        (BulkDownload, JobPayload::BulkDownload(p)) => bulk_download(api, p).await,
        (RetrievePackage, JobPayload::RetrievePackage(r)) => {
            retrieve_package(api, r, cancel, limits).await
        }
        (kind, _) => HandlerOutcome::Failure {
            partial: None,
            error: AppError::InvalidPayload(format!(
                "payload does not match job kind {:?}",
                kind
            )),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BulkDelete
// ─────────────────────────────────────────────────────────────────────────────

/// Deletes records in fixed-size chunks, strictly one chunk at a time.
///
/// Serialization is deliberate: the remote API enforces concurrent-
/// modification limits, so chunk N+1 is not submitted until chunk N's result
/// is recorded. A chunk failure aborts the remaining chunks and surfaces the
/// partial results plus the causing error.
async fn bulk_delete(
    api: &dyn PlatformApi,
    payload: &BulkDeletePayload,
    limits: &BulkLimits,
) -> HandlerOutcome {
    let ids = match extract_ids(&payload.records) {
        Ok(ids) => ids,
        Err(error) => {
            return HandlerOutcome::Failure {
                partial: None,
                error,
            }
        }
    };

    let chunk_count = ids.len().div_ceil(limits.delete_chunk_size);
    info!(
        "[EXECUTOR] deleting {} {} records in {} chunks",
        ids.len(),
        payload.object,
        chunk_count
    );

    let mut all_results = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(limits.delete_chunk_size) {
        match api.delete_records(&payload.object, chunk).await {
            Ok(mut results) => all_results.append(&mut results),
            Err(error) => {
                return HandlerOutcome::Failure {
                    partial: Some(JobResults::Deleted {
                        results: all_results,
                    }),
                    error,
                };
            }
        }
    }

    HandlerOutcome::Success {
        results: JobResults::Deleted {
            results: all_results,
        },
        attachment: None,
    }
}

/// Computes the record ids from a mixed list of id strings and records.
fn extract_ids(records: &[Value]) -> Result<Vec<String>, AppError> {
    records
        .iter()
        .map(|reference| match reference {
            Value::String(id) if !id.is_empty() => Ok(id.clone()),
            Value::Object(map) => map
                .get("Id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .ok_or_else(|| {
                    AppError::InvalidPayload("record reference has no Id".to_string())
                }),
            _ => Err(AppError::InvalidPayload(
                "record reference must be an id or a record carrying an Id".to_string(),
            )),
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// BulkDownload
// ─────────────────────────────────────────────────────────────────────────────

/// Follows the continuation cursor until exhausted, folding each page into
/// the format-selected accumulator, then materializes the file payload.
/// Pagination is inherently sequential: each page depends on the previous
/// page's cursor.
async fn bulk_download(api: &dyn PlatformApi, payload: &BulkDownloadPayload) -> HandlerOutcome {
    let mut accumulator = DownloadAccumulator::new(payload.format, &payload.fields);
    accumulator.push_page(&payload.initial.records);

    let mut cursor = if payload.initial.done {
        None
    } else {
        payload.initial.cursor.clone()
    };

    while let Some(current) = cursor {
        match api.query_more(&current).await {
            Ok(page) => {
                accumulator.push_page(&page.records);
                cursor = if page.done { None } else { page.cursor };
            }
            Err(error) => {
                return HandlerOutcome::Failure {
                    partial: None,
                    error,
                }
            }
        }
    }

    let record_count = accumulator.record_count();
    match accumulator.finish(&payload.file_base_name) {
        Ok(file) => HandlerOutcome::Success {
            results: JobResults::Downloaded { record_count },
            attachment: Some(file),
        },
        Err(error) => HandlerOutcome::Failure {
            partial: None,
            error,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RetrievePackage
// ─────────────────────────────────────────────────────────────────────────────

/// Starts a metadata retrieve, polls it to completion, and decodes the
/// archive into a binary attachment.
async fn retrieve_package(
    api: &dyn PlatformApi,
    request: &RetrieveRequest,
    cancel: &CancelFlag,
    limits: &BulkLimits,
) -> HandlerOutcome {
    let operation_id = match api.start_retrieve(request).await {
        Ok(id) => id,
        Err(error) => {
            return HandlerOutcome::Failure {
                partial: None,
                error,
            }
        }
    };

    info!("[EXECUTOR] retrieve started, polling to completion");

    let status = poll_until_done(
        || api.retrieve_status(&operation_id),
        |status: &RetrieveStatus| status.done,
        PollOptions::from(limits),
        |_| {},
        || cancel.is_cancelled(),
    )
    .await;

    let status = match status {
        Ok(status) => status,
        Err(error) => {
            return HandlerOutcome::Failure {
                partial: None,
                error,
            }
        }
    };

    if status.status.as_deref() == Some("Failed") || status.error_message.is_some() {
        return HandlerOutcome::Failure {
            partial: None,
            error: AppError::JobFailed {
                job_id: operation_id,
                message: status
                    .error_message
                    .unwrap_or_else(|| "Retrieve failed".to_string()),
            },
        };
    }

    let Some(zip_file) = status.zip_file else {
        return HandlerOutcome::Failure {
            partial: None,
            error: AppError::JobFailed {
                job_id: operation_id,
                message: "Retrieve completed without an archive".to_string(),
            },
        };
    };

    let bytes = match BASE64.decode(zip_file.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            return HandlerOutcome::Failure {
                partial: None,
                error: AppError::Internal(format!("Failed to decode retrieve archive: {}", e)),
            }
        }
    };

    let file_name = "package.zip".to_string();
    let byte_len = bytes.len();

    HandlerOutcome::Success {
        results: JobResults::Retrieved {
            file_name: file_name.clone(),
            byte_len,
        },
        attachment: Some(FilePayload {
            bytes,
            mime_type: "application/zip",
            suggested_file_name: file_name,
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
