use anyhow::Result;
use async_trait::async_trait;

use super::classroom::{task_status_path, GRADED_SUBMISSIONS_PATH};
use super::http::{scoped_query, HttpBackend, HttpConfig};
use super::{AuthContext, DispatchRequest, Platform, PlatformBinding, PlatformError, RemoteStatus};
use crate::schemas::grading::GradedResult;
use crate::schemas::submission::Submission;

/// Canvas-style LMS. Dispatch and roster have their own routes; status and
/// results are served by the shared classroom endpoints.
#[derive(Debug, Clone)]
pub struct CanvasBinding {
    http: HttpBackend,
}

impl CanvasBinding {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self { http: HttpBackend::new(config, "canvas")? })
    }
}

#[async_trait]
impl PlatformBinding for CanvasBinding {
    fn platform(&self) -> Platform {
        Platform::Canvas
    }

    async fn list_submissions(
        &self,
        course_id: &str,
        assignment_id: &str,
        auth: &AuthContext,
    ) -> Result<Vec<Submission>, PlatformError> {
        let path = format!("/canvas/submissions/{course_id}/{assignment_id}");
        self.http.roster(&path, &[], auth).await
    }

    async fn submit_grading(
        &self,
        request: DispatchRequest<'_>,
        auth: &AuthContext,
    ) -> Result<String, PlatformError> {
        let query = scoped_query(
            "email",
            auth,
            &[("assignment_id", request.assignment_id), ("course_id", request.course_id)],
        );
        self.http.submit_grading("/canvas/grade_submission", &query, request, auth).await
    }

    async fn poll_status(
        &self,
        task_id: &str,
        auth: &AuthContext,
    ) -> Result<RemoteStatus, PlatformError> {
        self.http.task_status(&task_status_path(task_id), auth).await
    }

    async fn fetch_result(
        &self,
        submission_id: &str,
        auth: &AuthContext,
    ) -> Result<GradedResult, PlatformError> {
        self.http
            .graded_submission(
                GRADED_SUBMISSIONS_PATH,
                &[("submission_id", submission_id)],
                submission_id,
                auth,
            )
            .await
    }
}
