use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::core::state::GradingSession;
use crate::core::time::format_offset;
use crate::schemas::rubric::RubricSpec;
use crate::schemas::submission::Submission;
use crate::tasks::grading::{BatchProgress, GradingJob};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SessionCreate {
    #[validate(length(min = 1, message = "platform must not be empty"))]
    pub(crate) platform: String,
    #[serde(alias = "courseId")]
    #[validate(length(min = 1, message = "course_id must not be empty"))]
    pub(crate) course_id: String,
    #[serde(alias = "assignmentId")]
    #[validate(length(min = 1, message = "assignment_id must not be empty"))]
    pub(crate) assignment_id: String,
    #[serde(default)]
    #[validate(email(message = "email must be a valid address"))]
    pub(crate) email: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionResponse {
    pub(crate) id: Uuid,
    pub(crate) platform: String,
    pub(crate) course_id: String,
    pub(crate) assignment_id: String,
    pub(crate) created_at: String,
    pub(crate) submissions: Vec<Submission>,
    pub(crate) active_jobs: Vec<GradingJob>,
    pub(crate) graded: usize,
}

impl SessionResponse {
    pub(crate) async fn from_session(session: &GradingSession) -> Self {
        Self {
            id: session.id,
            platform: session.platform.to_string(),
            course_id: session.course_id.clone(),
            assignment_id: session.assignment_id.clone(),
            created_at: format_offset(session.created_at),
            submissions: session.orchestrator.submissions().await,
            active_jobs: session.orchestrator.active_jobs().await,
            graded: session.orchestrator.cache().len().await,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct BatchCreate {
    #[serde(alias = "submissionIds", default)]
    #[validate(length(max = 1000, message = "at most 1000 submissions per batch"))]
    pub(crate) submission_ids: Vec<String>,
    pub(crate) rubric: RubricSpec,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct RegradeCreate {
    pub(crate) rubric: RubricSpec,
    #[serde(default)]
    #[validate(length(max = 2000, message = "reason must be at most 2000 characters"))]
    pub(crate) reason: Option<String>,
    #[serde(default)]
    #[validate(length(max = 8000, message = "context must be at most 8000 characters"))]
    pub(crate) context: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchAccepted {
    pub(crate) batch_id: Uuid,
    pub(crate) total: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchProgressResponse {
    pub(crate) batch_id: Uuid,
    pub(crate) completed: usize,
    pub(crate) failed: usize,
    pub(crate) cancelled: usize,
    pub(crate) total: usize,
    pub(crate) finished: bool,
    pub(crate) label: String,
}

impl From<BatchProgress> for BatchProgressResponse {
    fn from(progress: BatchProgress) -> Self {
        Self {
            label: progress.to_string(),
            batch_id: progress.batch_id,
            completed: progress.completed,
            failed: progress.failed,
            cancelled: progress.cancelled,
            total: progress.total,
            finished: progress.finished,
        }
    }
}
