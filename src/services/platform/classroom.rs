use anyhow::Result;
use async_trait::async_trait;

use super::http::{scoped_query, HttpBackend, HttpConfig};
use super::{AuthContext, DispatchRequest, Platform, PlatformBinding, PlatformError, RemoteStatus};
use crate::schemas::grading::GradedResult;
use crate::schemas::submission::Submission;

/// Classroom-style LMS. Every call is scoped by the instructor email.
#[derive(Debug, Clone)]
pub struct ClassroomBinding {
    http: HttpBackend,
}

impl ClassroomBinding {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self { http: HttpBackend::new(config, "classroom")? })
    }
}

pub(super) fn task_status_path(task_id: &str) -> String {
    format!("/classroom/task_status/{task_id}")
}

pub(super) const GRADED_SUBMISSIONS_PATH: &str = "/classroom/graded_submissions";

#[async_trait]
impl PlatformBinding for ClassroomBinding {
    fn platform(&self) -> Platform {
        Platform::Classroom
    }

    async fn list_submissions(
        &self,
        course_id: &str,
        assignment_id: &str,
        auth: &AuthContext,
    ) -> Result<Vec<Submission>, PlatformError> {
        let query =
            scoped_query("email", auth, &[("course_id", course_id), ("assignment_id", assignment_id)]);
        self.http.roster("/classroom/submissions", &query, auth).await
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
        self.http.submit_grading("/classroom/grade_submission", &query, request, auth).await
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

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::test_support::serve;

    fn auth() -> AuthContext {
        AuthContext::new(Some("token-1".to_string()), Some("teacher@example.com".to_string()))
    }

    #[tokio::test]
    async fn dispatch_sends_rubric_with_scoping_query_and_bearer() {
        let seen: Arc<Mutex<Vec<(HashMap<String, String>, Value, Option<String>)>>> =
            Arc::default();
        let recorder = seen.clone();
        let router = Router::new().route(
            "/classroom/grade_submission",
            post(
                move |Query(query): Query<HashMap<String, String>>,
                      headers: HeaderMap,
                      Json(body): Json<Value>| {
                    let recorder = recorder.clone();
                    async move {
                        let bearer = headers
                            .get("authorization")
                            .and_then(|value| value.to_str().ok())
                            .map(ToString::to_string);
                        recorder.lock().unwrap().push((query, body, bearer));
                        Json(json!({"task_id": 1234}))
                    }
                },
            ),
        );
        let binding = ClassroomBinding::new(&HttpConfig::new(serve(router).await)).unwrap();

        let ids = vec!["s-1".to_string()];
        let task_id = binding
            .submit_grading(
                DispatchRequest {
                    course_id: "c-1",
                    assignment_id: "a-1",
                    submission_ids: &ids,
                    rubric: "Grade for clarity",
                    regrade_context: None,
                },
                &auth(),
            )
            .await
            .unwrap();

        assert_eq!(task_id, "1234");
        let calls = seen.lock().unwrap();
        let (query, body, bearer) = &calls[0];
        assert_eq!(query.get("email").map(String::as_str), Some("teacher@example.com"));
        assert_eq!(query.get("course_id").map(String::as_str), Some("c-1"));
        assert_eq!(query.get("assignment_id").map(String::as_str), Some("a-1"));
        assert_eq!(body, &json!({"submission_ids": ["s-1"], "rubric": "Grade for clarity"}));
        assert_eq!(bearer.as_deref(), Some("Bearer token-1"));
    }

    #[tokio::test]
    async fn dispatch_without_task_id_is_a_dispatch_failure() {
        let router = Router::new()
            .route("/classroom/grade_submission", post(|| async { Json(json!({"ok": true})) }));
        let binding = ClassroomBinding::new(&HttpConfig::new(serve(router).await)).unwrap();

        let ids = vec!["s-1".to_string()];
        let err = binding
            .submit_grading(
                DispatchRequest {
                    course_id: "c",
                    assignment_id: "a",
                    submission_ids: &ids,
                    rubric: "r",
                    regrade_context: None,
                },
                &auth(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Dispatch { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn poll_maps_status_and_server_errors() {
        let router = Router::new().route(
            "/classroom/task_status/:task_id",
            get(|Path(task_id): Path<String>| async move {
                match task_id.as_str() {
                    "done" => (StatusCode::OK, Json(json!({"status": "completed"}))),
                    "broken" => (StatusCode::OK, Json(json!({"status": "failed: model timeout"}))),
                    "missing" => (StatusCode::OK, Json(json!({"progress": 10}))),
                    _ => (StatusCode::BAD_GATEWAY, Json(json!({"detail": "upstream down"}))),
                }
            }),
        );
        let binding = ClassroomBinding::new(&HttpConfig::new(serve(router).await)).unwrap();

        assert_eq!(binding.poll_status("done", &auth()).await.unwrap(), RemoteStatus::Completed);
        assert_eq!(
            binding.poll_status("broken", &auth()).await.unwrap(),
            RemoteStatus::Failed { detail: Some("model timeout".to_string()) }
        );
        assert!(matches!(
            binding.poll_status("missing", &auth()).await.unwrap_err(),
            PlatformError::Decode { .. }
        ));
        let err = binding.poll_status("flaky", &auth()).await.unwrap_err();
        match err {
            PlatformError::Transient { message, .. } => assert!(message.contains("upstream down")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_reports_not_ready_until_result_exists() {
        let router = Router::new().route(
            "/classroom/graded_submissions",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                match query.get("submission_id").map(String::as_str) {
                    Some("ready") => (
                        StatusCode::OK,
                        Json(json!({"latest_graded_submission": {
                            "points_received": 8,
                            "points_possible": 10,
                            "rubric_breakdown": "Thesis: 4/5",
                            "explanation": "Solid",
                            "graded_at": "2024-03-01T10:00:00Z",
                            "student_name": "Ada"
                        }})),
                    ),
                    Some("pending") => {
                        (StatusCode::OK, Json(json!({"latest_graded_submission": null})))
                    }
                    Some("partial") => (
                        StatusCode::OK,
                        Json(json!({"latest_graded_submission": {"explanation": "partial payload"}})),
                    ),
                    _ => (StatusCode::NOT_FOUND, Json(json!({"detail": "not found"}))),
                }
            }),
        );
        let binding = ClassroomBinding::new(&HttpConfig::new(serve(router).await)).unwrap();

        let result = binding.fetch_result("ready", &auth()).await.unwrap();
        assert_eq!(result.submission_id, "ready");
        assert_eq!(result.score_label(), "8/10");

        for id in ["pending", "absent"] {
            let err = binding.fetch_result(id, &auth()).await.unwrap_err();
            assert_eq!(err, PlatformError::NotReady { submission_id: id.to_string() });
        }

        let err = binding.fetch_result("partial", &auth()).await.unwrap_err();
        assert!(matches!(err, PlatformError::Decode { .. }), "unexpected error: {err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn roster_is_scoped_by_email_and_course() {
        let router = Router::new().route(
            "/classroom/submissions",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                assert_eq!(query.get("email").map(String::as_str), Some("teacher@example.com"));
                assert_eq!(query.get("course_id").map(String::as_str), Some("c-1"));
                Json(json!({"submissions": [
                    {"submission_id": "s-1", "student_name": "Ada", "submission_status": "TURNED_IN"},
                    {"submission_id": "s-2", "student_name": "Alan", "submission_score": 7.5}
                ]}))
            }),
        );
        let binding = ClassroomBinding::new(&HttpConfig::new(serve(router).await)).unwrap();

        let roster = binding.list_submissions("c-1", "a-1", &auth()).await.unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].lms_state.as_deref(), Some("TURNED_IN"));
        assert_eq!(roster[1].score, Some(7.5));
    }

    #[tokio::test]
    async fn bulk_status_is_not_offered() {
        let binding = ClassroomBinding::new(&HttpConfig::new("http://127.0.0.1:9")).unwrap();
        assert!(!binding.prefers_bulk_status());
        let err = binding.bulk_status(&["1".to_string()], &auth()).await.unwrap_err();
        assert!(matches!(err, PlatformError::Unsupported { platform: Platform::Classroom, .. }));
    }
}
