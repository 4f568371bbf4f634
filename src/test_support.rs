use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use time::macros::datetime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, state::AppState};
use crate::schemas::grading::GradedResult;
use crate::schemas::submission::Submission;
use crate::services::platform::{
    AuthContext, DispatchRequest, Platform, PlatformBinding, PlatformError, RemoteStatus,
};
use crate::services::registry::PlatformRegistry;
use crate::tasks::grading::RetryPolicy;

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) binding: Arc<ScriptedBinding>,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("GRADER_ENV", "test");
    std::env::set_var("GRADER_STRICT_CONFIG", "0");
    std::env::set_var("LMS_BACKEND_URL", "http://127.0.0.1:9");
    std::env::set_var("GRADING_POLL_INTERVAL_MS", "5");
    std::env::set_var("GRADING_MAX_POLL_INTERVAL_MS", "20");
    std::env::set_var("GRADING_BACKOFF_JITTER", "false");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::remove_var("BACKEND_CORS_ORIGINS");
}

/// Router wired to a scripted Classroom binding instead of the HTTP ones.
pub(crate) async fn setup_test_context() -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let binding = Arc::new(ScriptedBinding::new(Platform::Classroom).with_roster(&["s-1", "s-2", "s-3"]));
    let registry = PlatformRegistry::new().with_binding(binding.clone());

    let state = AppState::new(settings, Arc::new(registry));
    let app = api::router::router(state.clone());

    TestContext { state, app, binding, _guard: guard }
}

/// Millisecond-scale pacing so state machine tests finish quickly.
pub(crate) fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        base_interval: Duration::from_millis(2),
        max_interval: Duration::from_millis(10),
        jitter: false,
        max_dispatch_attempts: 3,
        max_poll_attempts: 20,
        max_fetch_attempts: 5,
    }
}

/// Serves `router` on an ephemeral port and returns its base URL.
pub(crate) async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind fake backend");
    let addr = listener.local_addr().expect("fake backend addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fake backend");
    });
    format!("http://{addr}")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}

/// Wire call observed by [`ScriptedBinding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Roster,
    Dispatch { submission_id: String, regrade_context: Option<String>, bearer: Option<String> },
    Poll { task_id: String },
    Bulk { submission_ids: Vec<String> },
    Fetch { submission_id: String },
}

/// In-memory `PlatformBinding` whose answers are scripted per submission.
/// Polls with an exhausted script report `completed`; stalled submissions
/// stay `in_progress` forever.
#[derive(Debug)]
pub(crate) struct ScriptedBinding {
    platform: Platform,
    bulk: bool,
    numeric_bulk: bool,
    state: StdMutex<ScriptState>,
}

#[derive(Debug, Default)]
struct ScriptState {
    roster: Vec<Submission>,
    dispatch_failures: HashMap<String, u32>,
    rejected: HashSet<String>,
    statuses: HashMap<String, VecDeque<RemoteStatus>>,
    stalled: HashSet<String>,
    not_ready: HashMap<String, u32>,
    scores: HashMap<String, VecDeque<f64>>,
    tasks: HashMap<String, String>,
    live: HashSet<String>,
    duplicate_dispatch: bool,
    calls: Vec<Call>,
}

impl ScriptedBinding {
    pub(crate) fn new(platform: Platform) -> Self {
        Self { platform, bulk: false, numeric_bulk: false, state: StdMutex::new(ScriptState::default()) }
    }

    pub(crate) fn bulk(mut self) -> Self {
        self.bulk = true;
        self
    }

    /// Bulk polling like the manual upload endpoint: numeric ids only.
    pub(crate) fn numeric_bulk(mut self) -> Self {
        self.bulk = true;
        self.numeric_bulk = true;
        self
    }

    pub(crate) fn with_roster(self, ids: &[&str]) -> Self {
        self.lock().roster =
            ids.iter().map(|id| Submission::new(*id, format!("Student {id}"))).collect();
        self
    }

    pub(crate) fn fail_dispatch(self, submission_id: &str, times: u32) -> Self {
        self.lock().dispatch_failures.insert(submission_id.to_string(), times);
        self
    }

    pub(crate) fn reject_dispatch(self, submission_id: &str) -> Self {
        self.lock().rejected.insert(submission_id.to_string());
        self
    }

    pub(crate) fn statuses(self, submission_id: &str, statuses: Vec<RemoteStatus>) -> Self {
        self.lock().statuses.insert(submission_id.to_string(), statuses.into());
        self
    }

    pub(crate) fn stall(self, submission_id: &str) -> Self {
        self.lock().stalled.insert(submission_id.to_string());
        self
    }

    pub(crate) fn not_ready(self, submission_id: &str, times: u32) -> Self {
        self.lock().not_ready.insert(submission_id.to_string(), times);
        self
    }

    pub(crate) fn scores(self, submission_id: &str, scores: &[f64]) -> Self {
        self.lock().scores.insert(submission_id.to_string(), scores.iter().copied().collect());
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub(crate) fn dispatch_count(&self, submission_id: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Dispatch { submission_id: id, .. } if id == submission_id))
            .count()
    }

    pub(crate) fn fetch_count(&self, submission_id: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Fetch { submission_id: id } if id == submission_id))
            .count()
    }

    /// Whether a submission was dispatched while a previous task for it
    /// was still live.
    pub(crate) fn saw_duplicate_dispatch(&self) -> bool {
        self.lock().duplicate_dispatch
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().expect("script state")
    }
}

impl ScriptState {
    fn next_status(&mut self, submission_id: &str) -> RemoteStatus {
        if self.stalled.contains(submission_id) {
            return RemoteStatus::InProgress;
        }
        self.statuses
            .get_mut(submission_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(RemoteStatus::Completed)
    }
}

#[async_trait]
impl PlatformBinding for ScriptedBinding {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn prefers_bulk_status(&self) -> bool {
        self.bulk
    }

    fn bulk_status_accepts(&self, submission_id: &str) -> bool {
        self.bulk && (!self.numeric_bulk || submission_id.parse::<i64>().is_ok())
    }

    async fn list_submissions(
        &self,
        _course_id: &str,
        _assignment_id: &str,
        _auth: &AuthContext,
    ) -> Result<Vec<Submission>, PlatformError> {
        let mut state = self.lock();
        state.calls.push(Call::Roster);
        Ok(state.roster.clone())
    }

    async fn submit_grading(
        &self,
        request: DispatchRequest<'_>,
        auth: &AuthContext,
    ) -> Result<String, PlatformError> {
        let submission_id = request.submission_ids.first().cloned().unwrap_or_default();
        let mut state = self.lock();
        state.calls.push(Call::Dispatch {
            submission_id: submission_id.clone(),
            regrade_context: request.regrade_context.map(ToString::to_string),
            bearer: auth.bearer.clone(),
        });

        if state.rejected.contains(&submission_id) {
            return Err(PlatformError::InvalidRequest(format!("{submission_id} rejected")));
        }
        if let Some(remaining) = state.dispatch_failures.get_mut(&submission_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PlatformError::Dispatch {
                    endpoint: "/scripted/grade_submission".to_string(),
                    message: "503 Service Unavailable".to_string(),
                });
            }
        }

        if !state.live.insert(submission_id.clone()) {
            state.duplicate_dispatch = true;
        }

        let task_id = format!("task-{submission_id}-{}", state.calls.len());
        state.tasks.insert(task_id.clone(), submission_id);
        Ok(task_id)
    }

    async fn poll_status(
        &self,
        task_id: &str,
        _auth: &AuthContext,
    ) -> Result<RemoteStatus, PlatformError> {
        let mut state = self.lock();
        state.calls.push(Call::Poll { task_id: task_id.to_string() });
        let Some(submission_id) = state.tasks.get(task_id).cloned() else {
            return Err(PlatformError::Transient {
                endpoint: format!("/scripted/task_status/{task_id}"),
                message: "unknown task".to_string(),
            });
        };
        Ok(state.next_status(&submission_id))
    }

    async fn fetch_result(
        &self,
        submission_id: &str,
        _auth: &AuthContext,
    ) -> Result<GradedResult, PlatformError> {
        let mut state = self.lock();
        state.calls.push(Call::Fetch { submission_id: submission_id.to_string() });

        if let Some(remaining) = state.not_ready.get_mut(submission_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PlatformError::NotReady { submission_id: submission_id.to_string() });
            }
        }

        state.live.remove(submission_id);
        let points_received = state
            .scores
            .get_mut(submission_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(7.0);
        Ok(GradedResult {
            submission_id: submission_id.to_string(),
            points_received,
            points_possible: 10.0,
            rubric_breakdown: "Clarity: 3/4".to_string(),
            explanation: format!("Scripted grade for {submission_id}"),
            graded_at: datetime!(2024-09-01 12:00 UTC),
            student_name: Some(format!("Student {submission_id}")),
        })
    }

    async fn bulk_status(
        &self,
        submission_ids: &[String],
        _auth: &AuthContext,
    ) -> Result<Vec<(String, RemoteStatus)>, PlatformError> {
        if !self.bulk {
            return Err(PlatformError::Unsupported {
                platform: self.platform,
                operation: "bulk_status",
            });
        }
        if let Some(id) = submission_ids
            .iter()
            .find(|id| self.numeric_bulk && id.parse::<i64>().is_err())
        {
            return Err(PlatformError::InvalidRequest(format!("submission id {id} is not numeric")));
        }
        let mut state = self.lock();
        state.calls.push(Call::Bulk { submission_ids: submission_ids.to_vec() });
        Ok(submission_ids.iter().map(|id| (id.clone(), state.next_status(id))).collect())
    }
}
