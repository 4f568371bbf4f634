use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::policy::RetryPolicy;
use crate::schemas::grading::GradedResult;
use crate::services::platform::{PlatformError, RemoteStatus};

/// Why a job ended in `Failed`. Reported per submission, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum JobFailure {
    #[error("dispatch failed after {attempts} attempts: {last_error}")]
    DispatchExhausted { attempts: u32, last_error: String },
    #[error("backend reported failure{}", detail_suffix(.detail))]
    BackendFailed { detail: Option<String> },
    #[error("no terminal status after {attempts} polls")]
    PollTimeout { attempts: u32 },
    #[error("result not available after {attempts} attempts: {last_error}")]
    FetchExhausted { attempts: u32, last_error: String },
    #[error("backend rejected the request: {detail}")]
    Rejected { detail: String },
    #[error("cancelled")]
    Cancelled,
}

/// Per-submission lifecycle. `attempt` counts failed calls of the current
/// phase (polls issued, for `Polling`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Selected { attempt: u32 },
    Polling { task_id: String, attempt: u32 },
    Reconciling { task_id: String, attempt: u32 },
    Completed,
    Failed { failure: JobFailure },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Selected { .. } => "selected",
            Self::Polling { .. } => "polling",
            Self::Reconciling { .. } => "reconciling",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Polling { task_id, .. } | Self::Reconciling { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

/// One grading pass for one submission. Transitions are pure; the worker
/// performs the calls and feeds their outcomes back in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GradingJob {
    pub submission_id: String,
    pub batch_id: Uuid,
    pub state: JobState,
}

impl GradingJob {
    pub fn new(submission_id: impl Into<String>, batch_id: Uuid) -> Self {
        Self {
            submission_id: submission_id.into(),
            batch_id,
            state: JobState::Selected { attempt: 0 },
        }
    }

    pub fn on_dispatch(&mut self, outcome: Result<String, PlatformError>, policy: &RetryPolicy) {
        let JobState::Selected { attempt } = self.state else {
            return;
        };

        self.state = match outcome {
            Ok(task_id) => JobState::Polling { task_id, attempt: 0 },
            Err(err) if !err.is_retryable() => rejected(&err),
            Err(err) => {
                let attempt = attempt + 1;
                if attempt >= policy.max_dispatch_attempts {
                    JobState::Failed {
                        failure: JobFailure::DispatchExhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        },
                    }
                } else {
                    JobState::Selected { attempt }
                }
            }
        };
    }

    /// Unknown statuses and transient errors spend the same poll budget as
    /// `queued`/`in_progress`.
    pub fn on_poll(&mut self, outcome: Result<RemoteStatus, PlatformError>, policy: &RetryPolicy) {
        let JobState::Polling { task_id, attempt } = &self.state else {
            return;
        };
        let task_id = task_id.clone();
        let attempt = attempt + 1;

        self.state = match outcome {
            Ok(RemoteStatus::Completed) => JobState::Reconciling { task_id, attempt: 0 },
            Ok(RemoteStatus::Failed { detail }) => {
                JobState::Failed { failure: JobFailure::BackendFailed { detail } }
            }
            Err(err) if !err.is_retryable() => rejected(&err),
            Ok(_) | Err(_) if attempt >= policy.max_poll_attempts => {
                JobState::Failed { failure: JobFailure::PollTimeout { attempts: attempt } }
            }
            Ok(_) | Err(_) => JobState::Polling { task_id, attempt },
        };
    }

    /// Returns the result to publish when the job completes.
    pub fn on_fetch(
        &mut self,
        outcome: Result<GradedResult, PlatformError>,
        policy: &RetryPolicy,
    ) -> Option<GradedResult> {
        let JobState::Reconciling { task_id, attempt } = &self.state else {
            return None;
        };

        match outcome {
            Ok(result) => {
                self.state = JobState::Completed;
                Some(result)
            }
            Err(err) if !err.is_retryable() => {
                self.state = rejected(&err);
                None
            }
            Err(err) => {
                let attempt = attempt + 1;
                self.state = if attempt >= policy.max_fetch_attempts {
                    JobState::Failed {
                        failure: JobFailure::FetchExhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        },
                    }
                } else {
                    JobState::Reconciling { task_id: task_id.clone(), attempt }
                };
                None
            }
        }
    }

    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = JobState::Failed { failure: JobFailure::Cancelled };
        }
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.state {
            JobState::Failed { failure } => Some(failure),
            _ => None,
        }
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|detail| format!(": {detail}")).unwrap_or_default()
}

fn rejected(err: &PlatformError) -> JobState {
    JobState::Failed { failure: JobFailure::Rejected { detail: err.to_string() } }
}
