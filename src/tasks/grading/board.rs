use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use uuid::Uuid;

use super::job::{GradingJob, JobFailure, JobState};
use super::orchestrator::PreconditionError;
use crate::schemas::grading::GradedResult;
use crate::schemas::submission::{GradingStatus, Submission};
use crate::services::result_cache::ResultCache;

/// Roster rows plus the set of live jobs, guarded together so that claiming
/// a submission and finishing its job are each one critical section.
#[derive(Debug, Default)]
pub(super) struct JobBoard {
    inner: Mutex<BoardState>,
}

#[derive(Debug, Default)]
struct BoardState {
    roster: Vec<Submission>,
    active: HashMap<String, ActiveJob>,
}

#[derive(Debug)]
struct ActiveJob {
    batch_id: Uuid,
    state: JobState,
    previous_status: GradingStatus,
}

impl BoardState {
    fn row_mut(&mut self, submission_id: &str) -> Option<&mut Submission> {
        self.roster.iter_mut().find(|row| row.id == submission_id)
    }
}

impl JobBoard {
    /// Swaps in a freshly fetched roster. Rows with a live job keep their
    /// in-progress tag.
    pub(super) async fn replace_roster(&self, rows: Vec<Submission>) -> usize {
        let mut state = self.inner.lock().await;
        state.roster = rows;
        let BoardState { roster, active } = &mut *state;
        for row in roster.iter_mut() {
            if let Some(job) = active.get(&row.id) {
                row.status = GradingStatus::InProgress;
                row.task_id = job.state.task_id().map(ToString::to_string);
            }
        }
        roster.len()
    }

    pub(super) async fn roster(&self) -> Vec<Submission> {
        self.inner.lock().await.roster.clone()
    }

    /// Reserves every id for `batch_id`, or none of them.
    pub(super) async fn claim(
        &self,
        submission_ids: &[String],
        batch_id: Uuid,
    ) -> Result<(), PreconditionError> {
        let mut state = self.inner.lock().await;

        let known: HashSet<&str> = state.roster.iter().map(|row| row.id.as_str()).collect();
        for id in submission_ids {
            if !known.contains(id.as_str()) {
                return Err(PreconditionError::UnknownSubmission(id.clone()));
            }
            if state.active.contains_key(id) {
                return Err(PreconditionError::AlreadyActive(id.clone()));
            }
        }

        for id in submission_ids {
            let previous_status = match state.row_mut(id) {
                Some(row) => {
                    let previous = row.status;
                    row.status = GradingStatus::InProgress;
                    row.task_id = None;
                    row.failure = None;
                    previous
                }
                None => GradingStatus::NotStarted,
            };
            state.active.insert(
                id.clone(),
                ActiveJob { batch_id, state: JobState::Selected { attempt: 0 }, previous_status },
            );
        }
        Ok(())
    }

    pub(super) async fn record(&self, job: &GradingJob) {
        let mut state = self.inner.lock().await;
        if let Some(active) = state.active.get_mut(&job.submission_id) {
            active.state = job.state.clone();
        }
        if let Some(task_id) = job.state.task_id() {
            if let Some(row) = state.row_mut(&job.submission_id) {
                row.task_id = Some(task_id.to_string());
            }
        }
    }

    /// Publishes a finished job: the cache write, the row update and the
    /// release of the active slot happen under one board lock.
    pub(super) async fn finish(
        &self,
        job: &GradingJob,
        result: Option<GradedResult>,
        cache: &ResultCache,
    ) {
        let mut state = self.inner.lock().await;
        let Some(active) = state.active.remove(&job.submission_id) else {
            return;
        };

        let score = result.as_ref().map(|result| result.points_received);
        if let Some(result) = result {
            cache.upsert(result).await;
        }

        let Some(row) = state.row_mut(&job.submission_id) else {
            return;
        };
        match &job.state {
            JobState::Completed => {
                row.status = GradingStatus::Completed;
                row.score = score.or(row.score);
                row.failure = None;
            }
            JobState::Failed { failure: JobFailure::Cancelled } => {
                row.status = active.previous_status;
            }
            JobState::Failed { failure } => {
                row.status = GradingStatus::Failed;
                row.failure = Some(failure.to_string());
            }
            _ => row.status = active.previous_status,
        }
    }

    /// Releases slots still held by `batch_id` after all its workers were
    /// joined. Only happens when a worker task panicked.
    pub(super) async fn abandon_batch(&self, batch_id: Uuid) -> Vec<GradingJob> {
        let mut state = self.inner.lock().await;
        let orphaned: Vec<String> = state
            .active
            .iter()
            .filter(|(_, job)| job.batch_id == batch_id)
            .map(|(id, _)| id.clone())
            .collect();

        let failure = JobFailure::Rejected { detail: "grading worker aborted".to_string() };
        let mut abandoned = Vec::with_capacity(orphaned.len());
        for id in orphaned {
            state.active.remove(&id);
            if let Some(row) = state.row_mut(&id) {
                row.status = GradingStatus::Failed;
                row.failure = Some(failure.to_string());
            }
            abandoned.push(GradingJob {
                submission_id: id,
                batch_id,
                state: JobState::Failed { failure: failure.clone() },
            });
        }
        abandoned
    }

    pub(super) async fn active_jobs(&self) -> Vec<GradingJob> {
        let state = self.inner.lock().await;
        let mut jobs: Vec<GradingJob> = state
            .active
            .iter()
            .map(|(id, job)| GradingJob {
                submission_id: id.clone(),
                batch_id: job.batch_id,
                state: job.state.clone(),
            })
            .collect();
        jobs.sort_by(|left, right| left.submission_id.cmp(&right.submission_id));
        jobs
    }

    pub(super) async fn is_active(&self, submission_id: &str) -> bool {
        self.inner.lock().await.active.contains_key(submission_id)
    }
}
