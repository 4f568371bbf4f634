use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use uuid::Uuid;

use super::board::JobBoard;
use super::bulk;
use super::job::{GradingJob, JobFailure, JobState};
use super::policy::RetryPolicy;
use super::worker::{run_job, DispatchSpec, JobContext};
use crate::schemas::grading::GradedResult;
use crate::schemas::rubric::RubricSpec;
use crate::schemas::submission::{ExportRow, Submission};
use crate::services::platform::{AuthContext, Platform, PlatformBinding, PlatformError};
use crate::services::result_cache::ResultCache;

/// Reasons a batch is refused before anything is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("no submissions selected")]
    EmptySelection,
    #[error("a non-empty rubric is required")]
    MissingRubric,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("submission {0} is not in the roster")]
    UnknownSubmission(String),
    #[error("submission {0} already has an active grading job")]
    AlreadyActive(String),
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub course_id: String,
    pub assignment_id: String,
    pub submission_ids: Vec<String>,
    pub rubric: RubricSpec,
    pub auth: AuthContext,
}

/// Re-grades one submission. The reason and context travel to the backend
/// as `regrade_context`.
#[derive(Debug, Clone)]
pub struct RegradeRequest {
    pub course_id: String,
    pub assignment_id: String,
    pub submission_id: String,
    pub rubric: RubricSpec,
    pub reason: Option<String>,
    pub context: Option<String>,
    pub auth: AuthContext,
}

/// Counters of a batch. Only grows; `finished` flips once every job of the
/// batch has been joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub batch_id: Uuid,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub finished: bool,
}

impl BatchProgress {
    fn new(batch_id: Uuid, total: usize) -> Self {
        Self { batch_id, total, completed: 0, failed: 0, cancelled: 0, finished: false }
    }

    fn record(&mut self, state: &JobState) {
        match state {
            JobState::Completed => self.completed += 1,
            JobState::Failed { failure: JobFailure::Cancelled } => self.cancelled += 1,
            JobState::Failed { .. } => self.failed += 1,
            _ => {}
        }
    }

    /// Jobs that reached a terminal state, cancelled ones included.
    pub fn terminal(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

impl fmt::Display for BatchProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub progress: BatchProgress,
    /// Terminal jobs in selection order.
    pub jobs: Vec<GradingJob>,
}

/// Caller-side handle of a running batch.
#[derive(Debug)]
pub struct BatchHandle {
    batch_id: Uuid,
    progress: watch::Receiver<BatchProgress>,
    task: JoinHandle<BatchReport>,
}

impl BatchHandle {
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn progress(&self) -> BatchProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchProgress> {
        self.progress.clone()
    }

    /// Resolves once every job of the batch is terminal.
    pub async fn wait(self) -> Result<BatchReport, JoinError> {
        self.task.await
    }
}

/// Finished batches kept for progress lookups; older ones are forgotten.
const FINISHED_BATCH_HISTORY: usize = 16;

#[derive(Debug)]
struct BatchRecord {
    launched_at: Instant,
    progress: watch::Receiver<BatchProgress>,
    cancel: watch::Sender<bool>,
}

impl BatchRecord {
    fn finished(&self) -> bool {
        self.progress.borrow().finished
    }
}

/// Drives grading jobs for one course assignment against one LMS binding.
///
/// Owns the roster, the live jobs and the result cache. Dropping the
/// orchestrator cancels every job it still runs.
#[derive(Debug)]
pub struct GradingOrchestrator {
    binding: Arc<dyn PlatformBinding>,
    policy: RetryPolicy,
    board: Arc<JobBoard>,
    cache: ResultCache,
    batches: Mutex<HashMap<Uuid, BatchRecord>>,
}

impl GradingOrchestrator {
    pub fn new(binding: Arc<dyn PlatformBinding>, policy: RetryPolicy) -> Self {
        Self {
            binding,
            policy,
            board: Arc::new(JobBoard::default()),
            cache: ResultCache::new(),
            batches: Mutex::new(HashMap::new()),
        }
    }

    pub fn platform(&self) -> Platform {
        self.binding.platform()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Read handle on the results; writes stay with the orchestrator.
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn results(&self) -> Vec<GradedResult> {
        self.cache.snapshot().await
    }

    /// Replaces the roster with a fresh fetch from the LMS.
    pub async fn refresh_roster(
        &self,
        course_id: &str,
        assignment_id: &str,
        auth: &AuthContext,
    ) -> Result<usize, PlatformError> {
        let rows = self.binding.list_submissions(course_id, assignment_id, auth).await?;
        let count = self.board.replace_roster(rows).await;
        tracing::info!(platform = %self.platform(), course_id, assignment_id, count, "Roster refreshed");
        Ok(count)
    }

    pub async fn replace_roster(&self, rows: Vec<Submission>) -> usize {
        self.board.replace_roster(rows).await
    }

    pub async fn submissions(&self) -> Vec<Submission> {
        self.board.roster().await
    }

    pub async fn active_jobs(&self) -> Vec<GradingJob> {
        self.board.active_jobs().await
    }

    pub async fn is_active(&self, submission_id: &str) -> bool {
        self.board.is_active(submission_id).await
    }

    /// Starts one job per selected submission. Nothing is dispatched when
    /// the request is refused.
    pub async fn grade_batch(&self, request: BatchRequest) -> Result<BatchHandle, PreconditionError> {
        require("course_id", &request.course_id)?;
        require("assignment_id", &request.assignment_id)?;
        let submission_ids = dedupe(request.submission_ids);
        if submission_ids.is_empty() {
            return Err(PreconditionError::EmptySelection);
        }
        if request.rubric.is_blank() {
            return Err(PreconditionError::MissingRubric);
        }

        let spec = DispatchSpec {
            course_id: request.course_id,
            assignment_id: request.assignment_id,
            rubric: request.rubric.to_wire(),
            regrade_context: None,
            auth: request.auth,
        };
        self.launch(submission_ids, spec).await
    }

    /// Re-dispatches one submission. On success the new result replaces the
    /// cached one; until then the previous result stays readable.
    pub async fn regrade(&self, request: RegradeRequest) -> Result<BatchHandle, PreconditionError> {
        require("course_id", &request.course_id)?;
        require("assignment_id", &request.assignment_id)?;
        let submission_id = request.submission_id.trim().to_string();
        if submission_id.is_empty() {
            return Err(PreconditionError::EmptySelection);
        }
        if request.rubric.is_blank() {
            return Err(PreconditionError::MissingRubric);
        }

        let spec = DispatchSpec {
            course_id: request.course_id,
            assignment_id: request.assignment_id,
            rubric: request.rubric.to_wire(),
            regrade_context: regrade_context(request.reason.as_deref(), request.context.as_deref()),
            auth: request.auth,
        };
        self.launch(vec![submission_id], spec).await
    }

    pub async fn batch_progress(&self, batch_id: Uuid) -> Option<BatchProgress> {
        self.batches.lock().await.get(&batch_id).map(|record| record.progress.borrow().clone())
    }

    /// Stops every outstanding job of the batch. Jobs already completed
    /// keep their results. Returns `false` for an unknown batch.
    pub async fn cancel_batch(&self, batch_id: Uuid) -> bool {
        match self.batches.lock().await.get(&batch_id) {
            Some(record) => {
                record.cancel.send_replace(true);
                tracing::info!(%batch_id, "Grading batch cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancels every batch that has not finished yet. Returns how many were
    /// signalled.
    pub async fn shutdown(&self) -> usize {
        let batches = self.batches.lock().await;
        let mut signalled = 0;
        for record in batches.values() {
            if !record.finished() {
                record.cancel.send_replace(true);
                signalled += 1;
            }
        }
        if signalled > 0 {
            tracing::info!(batches = signalled, "Cancelling outstanding grading batches");
        }
        signalled
    }

    /// Cancels outstanding batches and forgets every cached result.
    pub async fn close(&self) -> usize {
        let signalled = self.shutdown().await;
        self.cache.clear().await;
        signalled
    }

    /// `(student, received/possible)` for every graded row, in roster order.
    pub async fn export_rows(&self) -> Vec<ExportRow> {
        let roster = self.board.roster().await;
        let mut rows = Vec::new();
        for submission in roster {
            if let Some(result) = self.cache.get(&submission.id).await {
                let student = result
                    .student_name
                    .clone()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or(submission.student_name);
                rows.push(ExportRow { student, score: result.score_label() });
            }
        }
        rows
    }

    async fn launch(
        &self,
        submission_ids: Vec<String>,
        spec: DispatchSpec,
    ) -> Result<BatchHandle, PreconditionError> {
        let batch_id = Uuid::new_v4();
        self.board.claim(&submission_ids, batch_id).await?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (progress_tx, progress_rx) =
            watch::channel(BatchProgress::new(batch_id, submission_ids.len()));
        let (feed_stop_tx, feed_stop_rx) = watch::channel(false);

        let status_feed = if self.binding.prefers_bulk_status() {
            let (publisher, feed) = bulk::channel();
            tokio::spawn(publisher.run(
                self.binding.clone(),
                spec.auth.clone(),
                self.policy.clone(),
                feed_stop_rx,
            ));
            Some(feed)
        } else {
            None
        };

        let ctx = JobContext {
            binding: self.binding.clone(),
            board: self.board.clone(),
            cache: self.cache.clone(),
            policy: self.policy.clone(),
            dispatch: Arc::new(spec),
            status_feed,
        };
        let jobs: Vec<GradingJob> =
            submission_ids.iter().map(|id| GradingJob::new(id.clone(), batch_id)).collect();

        tracing::info!(
            %batch_id,
            platform = %self.platform(),
            total = jobs.len(),
            regrade = ctx.dispatch.regrade_context.is_some(),
            "Grading batch started"
        );

        let task = tokio::spawn(supervise(ctx, jobs, cancel_rx, progress_tx, feed_stop_tx));
        let mut batches = self.batches.lock().await;
        prune_finished(&mut batches);
        batches.insert(
            batch_id,
            BatchRecord { launched_at: Instant::now(), progress: progress_rx.clone(), cancel: cancel_tx },
        );
        drop(batches);

        Ok(BatchHandle { batch_id, progress: progress_rx, task })
    }
}

/// Joins every job of a batch and derives completion from the join.
async fn supervise(
    ctx: JobContext,
    jobs: Vec<GradingJob>,
    cancel: watch::Receiver<bool>,
    progress: watch::Sender<BatchProgress>,
    feed_stop: watch::Sender<bool>,
) -> BatchReport {
    let batch_id = progress.borrow().batch_id;
    let order: HashMap<String, usize> =
        jobs.iter().enumerate().map(|(index, job)| (job.submission_id.clone(), index)).collect();

    let mut set = JoinSet::new();
    for job in jobs {
        set.spawn(run_job(ctx.clone(), job, cancel.clone()));
    }

    let mut finished = Vec::with_capacity(order.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(job) => {
                progress.send_modify(|progress| progress.record(&job.state));
                finished.push(job);
            }
            Err(err) => tracing::error!(%batch_id, error = %err, "Grading job task failed"),
        }
    }

    for job in ctx.board.abandon_batch(batch_id).await {
        progress.send_modify(|progress| progress.record(&job.state));
        finished.push(job);
    }

    feed_stop.send_replace(true);
    progress.send_modify(|progress| progress.finished = true);
    finished.sort_by_key(|job| order.get(&job.submission_id).copied().unwrap_or(usize::MAX));

    let summary = progress.borrow().clone();
    tracing::info!(
        %batch_id,
        completed = summary.completed,
        failed = summary.failed,
        cancelled = summary.cancelled,
        total = summary.total,
        "Grading batch finished"
    );

    BatchReport { batch_id, progress: summary, jobs: finished }
}

fn prune_finished(batches: &mut HashMap<Uuid, BatchRecord>) {
    let mut finished: Vec<(Instant, Uuid)> = batches
        .iter()
        .filter(|(_, record)| record.finished())
        .map(|(id, record)| (record.launched_at, *id))
        .collect();
    if finished.len() <= FINISHED_BATCH_HISTORY {
        return;
    }
    finished.sort();
    let excess = finished.len() - FINISHED_BATCH_HISTORY;
    for (_, batch_id) in finished.into_iter().take(excess) {
        batches.remove(&batch_id);
    }
}

fn require(field: &'static str, value: &str) -> Result<(), PreconditionError> {
    if value.trim().is_empty() {
        return Err(PreconditionError::MissingField(field));
    }
    Ok(())
}

/// Trims ids and drops blanks and repeats, keeping first occurrence order.
fn dedupe(submission_ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    submission_ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

fn regrade_context(reason: Option<&str>, context: Option<&str>) -> Option<String> {
    let lines: Vec<String> = [("Reason", reason), ("Context", context)]
        .into_iter()
        .filter_map(|(label, value)| {
            value.map(str::trim).filter(|value| !value.is_empty()).map(|value| format!("{label}: {value}"))
        })
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}
