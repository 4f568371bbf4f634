use thiserror::Error;

use super::Platform;

/// Failure of a single wire call. Whether the job retries is decided by the
/// orchestrator, see [`PlatformError::is_retryable`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("dispatch to {endpoint} failed: {message}")]
    Dispatch { endpoint: String, message: String },
    #[error("transient failure calling {endpoint}: {message}")]
    Transient { endpoint: String, message: String },
    #[error("graded result for submission {submission_id} is not ready")]
    NotReady { submission_id: String },
    #[error("unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error("request rejected: {0}")]
    InvalidRequest(String),
    #[error("{operation} is not supported by the {platform} binding")]
    Unsupported { platform: Platform, operation: &'static str },
}

impl PlatformError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_) | Self::Unsupported { .. })
    }
}
