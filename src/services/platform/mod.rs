//! The capability contract every LMS backend implements, plus the three
//! bindings that speak to the grading backend over HTTP.
//!
//! The orchestrator only ever talks to `dyn PlatformBinding`; it never
//! inspects which variant it was handed.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schemas::grading::GradedResult;
use crate::schemas::submission::Submission;

mod canvas;
mod classroom;
mod errors;
mod http;
mod manual;
mod wire;

pub use canvas::CanvasBinding;
pub use classroom::ClassroomBinding;
pub use errors::PlatformError;
pub use http::HttpConfig;
pub use manual::ManualBinding;

/// Identifier of a supported LMS backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Classroom,
    Canvas,
    Manual,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Classroom, Platform::Canvas, Platform::Manual];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classroom => "classroom",
            Self::Canvas => "canvas",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized platform identifier: {0}")]
pub struct UnrecognizedPlatform(pub String);

impl FromStr for Platform {
    type Err = UnrecognizedPlatform;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "classroom" | "google_classroom" => Ok(Self::Classroom),
            "canvas" => Ok(Self::Canvas),
            "manual" | "manual_upload" => Ok(Self::Manual),
            _ => Err(UnrecognizedPlatform(value.to_string())),
        }
    }
}

/// Credentials issued by the external auth collaborator. The bearer token is
/// opaque here and never refreshed by this crate.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub bearer: Option<String>,
    pub email: Option<String>,
}

impl AuthContext {
    pub fn new(bearer: Option<String>, email: Option<String>) -> Self {
        Self { bearer, email }
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .field("email", &self.email)
            .finish()
    }
}

/// Everything `submit_grading` sends for one job.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub course_id: &'a str,
    pub assignment_id: &'a str,
    pub submission_ids: &'a [String],
    pub rubric: &'a str,
    pub regrade_context: Option<&'a str>,
}

/// Backend task status, normalised from the free-text string the backend
/// returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteStatus {
    Queued,
    InProgress,
    Completed,
    Failed { detail: Option<String> },
    Unknown { raw: String },
}

impl RemoteStatus {
    /// Accepts the closed set `queued | in_progress | completed | failed`
    /// plus common task-queue spellings, optionally followed by `: detail`.
    /// Anything else is `Unknown` and is retried like a non-terminal status.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (head, detail) = match trimmed.split_once(':') {
            Some((head, detail)) => (head, Some(detail.trim()).filter(|d| !d.is_empty())),
            None => (trimmed, None),
        };
        let normalized = head.trim().to_ascii_lowercase().replace(&[' ', '-'][..], "_");

        match normalized.as_str() {
            "queued" | "pending" | "waiting" | "submitted" | "received" => Self::Queued,
            "in_progress" | "processing" | "running" | "started" | "grading" | "retry" => {
                Self::InProgress
            }
            "completed" | "complete" | "done" | "success" | "succeeded" | "graded" => {
                Self::Completed
            }
            "failed" | "failure" | "error" | "errored" => {
                Self::Failed { detail: detail.map(ToString::to_string) }
            }
            _ => Self::Unknown { raw: trimmed.to_string() },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

/// Capability contract implemented once per LMS backend.
#[async_trait]
pub trait PlatformBinding: Send + Sync + fmt::Debug {
    fn platform(&self) -> Platform;

    /// Whether polling should go through [`PlatformBinding::bulk_status`]
    /// once per tick instead of one `poll_status` per job.
    fn prefers_bulk_status(&self) -> bool {
        false
    }

    /// Whether `submission_id` can be polled through the bulk endpoint.
    /// Jobs for other ids fall back to `poll_status` on their task id.
    fn bulk_status_accepts(&self, submission_id: &str) -> bool {
        let _ = submission_id;
        self.prefers_bulk_status()
    }

    async fn list_submissions(
        &self,
        course_id: &str,
        assignment_id: &str,
        auth: &AuthContext,
    ) -> Result<Vec<Submission>, PlatformError>;

    /// Starts a grading task and returns the backend task id.
    async fn submit_grading(
        &self,
        request: DispatchRequest<'_>,
        auth: &AuthContext,
    ) -> Result<String, PlatformError>;

    async fn poll_status(
        &self,
        task_id: &str,
        auth: &AuthContext,
    ) -> Result<RemoteStatus, PlatformError>;

    /// Only meaningful once the task reported completion; fails with
    /// [`PlatformError::NotReady`] until the backend has materialised the result.
    async fn fetch_result(
        &self,
        submission_id: &str,
        auth: &AuthContext,
    ) -> Result<GradedResult, PlatformError>;

    async fn bulk_status(
        &self,
        submission_ids: &[String],
        auth: &AuthContext,
    ) -> Result<Vec<(String, RemoteStatus)>, PlatformError> {
        let _ = (submission_ids, auth);
        Err(PlatformError::Unsupported { platform: self.platform(), operation: "bulk_status" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_closed_status_set() {
        assert_eq!(RemoteStatus::parse("queued"), RemoteStatus::Queued);
        assert_eq!(RemoteStatus::parse("in_progress"), RemoteStatus::InProgress);
        assert_eq!(RemoteStatus::parse("In Progress"), RemoteStatus::InProgress);
        assert_eq!(RemoteStatus::parse("COMPLETED"), RemoteStatus::Completed);
        assert_eq!(RemoteStatus::parse("failed"), RemoteStatus::Failed { detail: None });
    }

    #[test]
    fn failure_detail_after_colon_is_kept() {
        assert_eq!(
            RemoteStatus::parse("failed: rubric mismatch"),
            RemoteStatus::Failed { detail: Some("rubric mismatch".to_string()) }
        );
    }

    #[test]
    fn task_queue_spellings_are_understood() {
        assert_eq!(RemoteStatus::parse("PENDING"), RemoteStatus::Queued);
        assert_eq!(RemoteStatus::parse("STARTED"), RemoteStatus::InProgress);
        assert_eq!(RemoteStatus::parse("SUCCESS"), RemoteStatus::Completed);
        assert_eq!(RemoteStatus::parse("FAILURE"), RemoteStatus::Failed { detail: None });
    }

    #[test]
    fn unrecognised_status_is_not_substring_matched() {
        let status = RemoteStatus::parse("not completed yet");
        assert_eq!(status, RemoteStatus::Unknown { raw: "not completed yet".to_string() });
        assert!(!status.is_terminal());
    }

    #[test]
    fn platform_identifiers_round_trip() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>(), Ok(platform));
        }
        assert_eq!("manual_upload".parse::<Platform>(), Ok(Platform::Manual));
        let err = "moodle".parse::<Platform>().unwrap_err();
        assert_eq!(err.to_string(), "unrecognized platform identifier: moodle");
    }

    #[test]
    fn auth_debug_redacts_bearer() {
        let auth = AuthContext::new(Some("secret-token".to_string()), None);
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }
}
