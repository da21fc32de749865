//! Job dispatch and result reconciliation.
//!
//! The dispatcher is the UI-facing boundary of the pipeline: it assigns ids
//! to submitted jobs, forwards them to the executor for their kind category,
//! and reconciles replies into the per-session registry. The registry is the
//! only shared mutable resource in the pipeline and is owned exclusively
//! here; executors never touch it, they only emit reply messages.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BulkLimits;
use crate::error::AppError;
use crate::jobs::executor::{ApiFactory, JobExecutor};
use crate::jobs::{
    CancelFlag, JobDescriptor, JobKind, JobMessage, JobOutcome, JobPayload, JobReply, JobResult,
    JobResults,
};
use crate::materialize::FilePayload;
use crate::salesforce::OrgContext;

// ─────────────────────────────────────────────────────────────────────────────
// Registry Types
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Registered, not yet accepted by an executor.
    Pending,
    /// Accepted by an executor; a reply will arrive.
    Running,
    /// Reply reconciled; the result can be taken.
    Completed,
}

/// Registry entry for one job.
struct TrackedJob {
    kind: JobKind,
    state: JobState,
    cancel: CancelFlag,
    result: Option<JobResult>,
    /// Partial results accompanying a failed job (e.g. the delete chunks
    /// that completed before the failure).
    partial_results: Option<JobResults>,
    attachment: Option<FilePayload>,
}

/// A completed job's reconciled output.
pub struct CompletedJob {
    pub result: JobResult,
    /// Present only for failed jobs that produced partial output.
    pub partial_results: Option<JobResults>,
    pub attachment: Option<FilePayload>,
}

/// Executor category: record jobs and metadata jobs run in separate
/// execution contexts so neither can starve the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobCategory {
    Records,
    Metadata,
}

fn category_of(kind: JobKind) -> JobCategory {
    match kind {
        JobKind::BulkDelete | JobKind::BulkDownload => JobCategory::Records,
        JobKind::RetrievePackage => JobCategory::Metadata,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JobDispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Per-session dispatcher owning the job registry and the executor tasks.
pub struct JobDispatcher {
    registry: Arc<RwLock<HashMap<String, TrackedJob>>>,
    records_executor: JobExecutor,
    metadata_executor: JobExecutor,
}

impl JobDispatcher {
    /// Creates the dispatcher, spawning one executor per job category and
    /// the reply reconciliation task.
    pub fn new(factory: ApiFactory, limits: BulkLimits) -> Self {
        let (reply_tx, mut reply_rx) = mpsc::channel::<JobReply>(32);

        let records_executor =
            JobExecutor::spawn(factory.clone(), limits.clone(), reply_tx.clone());
        let metadata_executor = JobExecutor::spawn(factory, limits, reply_tx);

        let registry: Arc<RwLock<HashMap<String, TrackedJob>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let reconciler_registry = registry.clone();
        tokio::spawn(async move {
            while let Some(reply) = reply_rx.recv().await {
                reconcile(&reconciler_registry, reply).await;
            }
        });

        Self {
            registry,
            records_executor,
            metadata_executor,
        }
    }

    /// Assigns an id, registers the job, and forwards it to its executor.
    ///
    /// Returns the assigned job id; the result arrives asynchronously and is
    /// claimed with [`take_result`](Self::take_result).
    pub async fn submit(&self, payload: JobPayload, org: OrgContext) -> Result<String, AppError> {
        let id = Uuid::new_v4().to_string();
        let job = JobDescriptor::new(id.clone(), payload);
        let cancel = CancelFlag::new();

        // Register before forwarding so the reply always finds an entry.
        self.registry.write().await.insert(
            id.clone(),
            TrackedJob {
                kind: job.kind,
                state: JobState::Pending,
                cancel: cancel.clone(),
                result: None,
                partial_results: None,
                attachment: None,
            },
        );

        let executor = match category_of(job.kind) {
            JobCategory::Records => &self.records_executor,
            JobCategory::Metadata => &self.metadata_executor,
        };

        info!("[DISPATCH] {:?} job {} submitted", job.kind, id);

        let message = JobMessage {
            job,
            org,
            cancel,
        };

        match executor.submit(message).await {
            Ok(()) => {
                if let Some(entry) = self.registry.write().await.get_mut(&id) {
                    entry.state = JobState::Running;
                }
                Ok(id)
            }
            Err(e) => {
                self.registry.write().await.remove(&id);
                Err(e)
            }
        }
    }

    /// Requests cancellation of a job. Takes effect at the job's next poller
    /// check; returns false for unknown ids.
    pub async fn cancel(&self, job_id: &str) -> bool {
        match self.registry.read().await.get(job_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Current lifecycle state of a job.
    pub async fn state(&self, job_id: &str) -> Option<JobState> {
        self.registry.read().await.get(job_id).map(|e| e.state)
    }

    /// Kind of a tracked job.
    pub async fn kind(&self, job_id: &str) -> Option<JobKind> {
        self.registry.read().await.get(job_id).map(|e| e.kind)
    }

    /// Removes and returns a completed job's output. Returns `None` while
    /// the job is still in flight (the entry is left in place).
    pub async fn take_result(&self, job_id: &str) -> Option<CompletedJob> {
        let mut registry = self.registry.write().await;
        let completed = matches!(
            registry.get(job_id),
            Some(TrackedJob {
                state: JobState::Completed,
                ..
            })
        );
        if !completed {
            return None;
        }

        let entry = registry.remove(job_id)?;
        Some(CompletedJob {
            result: entry.result?,
            partial_results: entry.partial_results,
            attachment: entry.attachment,
        })
    }
}

/// Folds one reply into the registry; at most one result per job id.
async fn reconcile(registry: &Arc<RwLock<HashMap<String, TrackedJob>>>, reply: JobReply) {
    let mut registry = registry.write().await;

    let Some(entry) = registry.get_mut(&reply.job.id) else {
        warn!("[DISPATCH] reply for unknown job {}", reply.job.id);
        return;
    };

    if entry.result.is_some() {
        warn!("[DISPATCH] duplicate reply for job {} ignored", reply.job.id);
        return;
    }

    let (outcome, partial_results) = match (reply.results, reply.error) {
        (results, Some(message)) => (JobOutcome::Err { message }, results),
        (Some(results), None) => (JobOutcome::Ok { results }, None),
        (None, None) => (
            JobOutcome::Err {
                message: "Job produced no results".to_string(),
            },
            None,
        ),
    };

    entry.state = JobState::Completed;
    entry.result = Some(JobResult {
        job_id: reply.job.id.clone(),
        outcome,
        completed_at: reply.completed_at,
    });
    entry.partial_results = partial_results;
    entry.attachment = reply.attachment;

    info!("[DISPATCH] job {} completed", reply.job.id);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::BulkDeletePayload;
    use crate::salesforce::api::BoxFuture;
    use crate::salesforce::{
        PlatformApi, QueryApi, QueryPage, RecordApi, RecordResult, RetrieveRequest,
        RetrieveStatus,
    };
    use serde_json::json;
    use std::time::Duration;

    /// Minimal platform fake: deletes succeed, queries are empty, retrieves
    /// never finish (so cancellation can be observed).
    struct StubPlatform;

    impl QueryApi for StubPlatform {
        fn query<'a>(&'a self, _soql: &'a str) -> BoxFuture<'a, Result<QueryPage, AppError>> {
            Box::pin(async move { Ok(QueryPage::complete(vec![])) })
        }

        fn query_more<'a>(&'a self, _cursor: &'a str) -> BoxFuture<'a, Result<QueryPage, AppError>> {
            Box::pin(async move { Ok(QueryPage::complete(vec![])) })
        }
    }

    impl RecordApi for StubPlatform {
        fn delete_records<'a>(
            &'a self,
            _object: &'a str,
            ids: &'a [String],
        ) -> BoxFuture<'a, Result<Vec<RecordResult>, AppError>> {
            Box::pin(async move {
                Ok(ids
                    .iter()
                    .map(|id| RecordResult {
                        success: true,
                        id: Some(id.clone()),
                        errors: vec![],
                    })
                    .collect())
            })
        }
    }

    impl crate::salesforce::MetadataApi for StubPlatform {
        fn start_retrieve<'a>(
            &'a self,
            _request: &'a RetrieveRequest,
        ) -> BoxFuture<'a, Result<String, AppError>> {
            Box::pin(async move { Ok("09Sxx0000001".to_string()) })
        }

        fn retrieve_status<'a>(
            &'a self,
            _operation_id: &'a str,
        ) -> BoxFuture<'a, Result<RetrieveStatus, AppError>> {
            Box::pin(async move {
                Ok(RetrieveStatus {
                    done: false,
                    status: Some("InProgress".into()),
                    zip_file: None,
                    error_message: None,
                })
            })
        }
    }

    fn dispatcher_with(poll_max_attempts: u32) -> JobDispatcher {
        let api: Arc<dyn PlatformApi> = Arc::new(StubPlatform);
        let factory: ApiFactory = Arc::new(move |_org: &OrgContext| Ok(api.clone()));
        let limits = BulkLimits::default()
            .poll_interval(Duration::from_millis(1))
            .poll_max_attempts(poll_max_attempts);
        JobDispatcher::new(factory, limits)
    }

    fn dispatcher() -> JobDispatcher {
        dispatcher_with(5)
    }

    fn org() -> OrgContext {
        OrgContext {
            org_id: "00Dxx0000001234".into(),
            instance_url: "https://example.my.salesforce.com".into(),
            access_token: "token".into(),
        }
    }

    fn delete_payload() -> JobPayload {
        JobPayload::BulkDelete(BulkDeletePayload {
            object: "Account".into(),
            records: vec![json!("001xx000000001AAA")],
        })
    }

    async fn wait_completed(dispatcher: &JobDispatcher, job_id: &str) {
        for _ in 0..500 {
            if dispatcher.state(job_id).await == Some(JobState::Completed) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("job {} never completed", job_id);
    }

    #[tokio::test]
    async fn submit_assigns_unique_ids() {
        let dispatcher = dispatcher();
        let id1 = dispatcher.submit(delete_payload(), org()).await.unwrap();
        let id2 = dispatcher.submit(delete_payload(), org()).await.unwrap();
        assert_ne!(id1, id2);
        assert_eq!(dispatcher.kind(&id1).await, Some(JobKind::BulkDelete));
    }

    #[tokio::test]
    async fn reply_reconciles_into_a_takeable_result() {
        let dispatcher = dispatcher();
        let id = dispatcher.submit(delete_payload(), org()).await.unwrap();

        wait_completed(&dispatcher, &id).await;

        let completed = dispatcher.take_result(&id).await.unwrap();
        assert_eq!(completed.result.job_id, id);
        match completed.result.outcome {
            JobOutcome::Ok {
                results: JobResults::Deleted { results },
            } => assert_eq!(results.len(), 1),
            other => panic!("Expected Ok Deleted outcome, got: {:?}", other),
        }

        // At-most-once: the result is gone after being taken.
        assert!(dispatcher.take_result(&id).await.is_none());
        assert_eq!(dispatcher.state(&id).await, None);
    }

    #[tokio::test]
    async fn take_result_leaves_in_flight_jobs_alone() {
        let dispatcher = dispatcher();

        // Retrieves never finish against the stub until the poller times out,
        // so immediately after submit the job is still in flight.
        let id = dispatcher
            .submit(
                JobPayload::RetrievePackage(RetrieveRequest::Packages {
                    names: vec!["MyPackage".into()],
                }),
                org(),
            )
            .await
            .unwrap();

        assert!(dispatcher.take_result(&id).await.is_none());
        assert!(dispatcher.state(&id).await.is_some());

        // Eventually the poller gives up and the timeout lands as the result.
        wait_completed(&dispatcher, &id).await;
        let completed = dispatcher.take_result(&id).await.unwrap();
        match completed.result.outcome {
            JobOutcome::Err { message } => {
                assert!(message.contains("status checks"), "got: {}", message)
            }
            other => panic!("Expected Err outcome, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancel_flips_the_jobs_flag() {
        // A generous attempt budget so cancellation always lands before the
        // poller could time out.
        let dispatcher = dispatcher_with(500);
        let id = dispatcher
            .submit(
                JobPayload::RetrievePackage(RetrieveRequest::Packages {
                    names: vec!["MyPackage".into()],
                }),
                org(),
            )
            .await
            .unwrap();

        assert!(dispatcher.cancel(&id).await);

        wait_completed(&dispatcher, &id).await;
        let completed = dispatcher.take_result(&id).await.unwrap();
        match completed.result.outcome {
            JobOutcome::Err { message } => {
                assert!(message.contains("cancelled"), "got: {}", message)
            }
            other => panic!("Expected Err outcome, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancel_unknown_job_returns_false() {
        let dispatcher = dispatcher();
        assert!(!dispatcher.cancel("no-such-job").await);
    }
}
