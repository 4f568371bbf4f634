use anyhow::Result;
use async_trait::async_trait;

use super::classroom::{task_status_path, GRADED_SUBMISSIONS_PATH};
use super::http::{scoped_query, HttpBackend, HttpConfig};
use super::{AuthContext, DispatchRequest, Platform, PlatformBinding, PlatformError, RemoteStatus};
use crate::schemas::grading::GradedResult;
use crate::schemas::submission::Submission;

/// Manually uploaded submissions. Polls through the bulk status endpoint,
/// which needs numeric submission ids.
#[derive(Debug, Clone)]
pub struct ManualBinding {
    http: HttpBackend,
}

impl ManualBinding {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self { http: HttpBackend::new(config, "manual upload")? })
    }
}

#[async_trait]
impl PlatformBinding for ManualBinding {
    fn platform(&self) -> Platform {
        Platform::Manual
    }

    fn prefers_bulk_status(&self) -> bool {
        true
    }

    fn bulk_status_accepts(&self, submission_id: &str) -> bool {
        submission_id.trim().parse::<i64>().is_ok()
    }

    async fn list_submissions(
        &self,
        course_id: &str,
        assignment_id: &str,
        auth: &AuthContext,
    ) -> Result<Vec<Submission>, PlatformError> {
        let path = format!("/manual/submissions/{course_id}/{assignment_id}");
        let query = scoped_query("teacher_email", auth, &[]);
        self.http.roster(&path, &query, auth).await
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
        self.http.submit_grading("/manual/grade_submission", &query, request, auth).await
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

    async fn bulk_status(
        &self,
        submission_ids: &[String],
        auth: &AuthContext,
    ) -> Result<Vec<(String, RemoteStatus)>, PlatformError> {
        self.http.bulk_status("/submissions/status", submission_ids, auth).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::extract::{Path, Query};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::test_support::serve;

    fn auth() -> AuthContext {
        AuthContext::new(Some("t".to_string()), Some("prof@example.com".to_string()))
    }

    #[tokio::test]
    async fn bulk_status_sends_numeric_ids() {
        let router = Router::new().route(
            "/submissions/status",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body, json!({"submission_ids": [11, 12]}));
                Json(json!({"submissions": [
                    {"submission_id": 11, "status": "completed"},
                    {"submission_id": 12, "status": "processing"}
                ]}))
            }),
        );
        let binding = ManualBinding::new(&HttpConfig::new(serve(router).await)).unwrap();
        assert!(binding.prefers_bulk_status());

        let statuses = binding
            .bulk_status(&["11".to_string(), "12".to_string()], &auth())
            .await
            .unwrap();
        assert_eq!(
            statuses,
            vec![
                ("11".to_string(), RemoteStatus::Completed),
                ("12".to_string(), RemoteStatus::InProgress),
            ]
        );
    }

    #[tokio::test]
    async fn bulk_status_rejects_non_numeric_ids_before_calling() {
        let binding = ManualBinding::new(&HttpConfig::new("http://127.0.0.1:9")).unwrap();
        assert!(binding.bulk_status_accepts("42"));
        assert!(!binding.bulk_status_accepts("abc"));
        let err = binding.bulk_status(&["abc".to_string()], &auth()).await.unwrap_err();
        assert!(matches!(err, PlatformError::InvalidRequest(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn roster_uses_teacher_email() {
        let router = Router::new().route(
            "/manual/submissions/:course/:assignment",
            get(|Path((course, assignment)): Path<(String, String)>,
                 Query(query): Query<HashMap<String, String>>| async move {
                assert_eq!((course.as_str(), assignment.as_str()), ("c-9", "a-9"));
                assert_eq!(query.get("teacher_email").map(String::as_str), Some("prof@example.com"));
                Json(json!({"submissions": [{"submission_id": "31", "student_name": "Edsger"}]}))
            }),
        );
        let binding = ManualBinding::new(&HttpConfig::new(serve(router).await)).unwrap();

        let roster = binding.list_submissions("c-9", "a-9", &auth()).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].student_name, "Edsger");
    }
}
