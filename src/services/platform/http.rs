use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use super::wire::{
    extract_error_message, flexible_id, BulkStatusBody, BulkStatusResponse, GradeSubmissionBody,
    LatestGradedSubmission, RosterEntry,
};
use super::{AuthContext, DispatchRequest, PlatformError, RemoteStatus};
use crate::core::config::Settings;
use crate::schemas::grading::GradedResult;
use crate::schemas::submission::Submission;

/// Connection settings shared by the HTTP bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }

    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self {
            connect_timeout: settings.backend().connect_timeout(),
            request_timeout: settings.backend().request_timeout(),
            ..Self::new(settings.backend().base_url.clone())
        }
    }
}

/// Thin client over the grading backend. Each binding owns one and only
/// decides which paths and query parameters to use.
#[derive(Debug, Clone)]
pub(super) struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub(super) fn new(config: &HttpConfig, label: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .with_context(|| format!("Failed to build {label} HTTP client"))?;

        Ok(Self { client, base_url: config.base_url.clone() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(builder: RequestBuilder, auth: &AuthContext) -> RequestBuilder {
        match auth.bearer.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// POSTs a grading request; any failure to obtain a task id is a dispatch failure.
    pub(super) async fn submit_grading(
        &self,
        path: &str,
        query: &[(&str, &str)],
        request: DispatchRequest<'_>,
        auth: &AuthContext,
    ) -> Result<String, PlatformError> {
        let body = GradeSubmissionBody {
            submission_ids: request.submission_ids,
            rubric: request.rubric,
            regrade_context: request.regrade_context,
        };
        let dispatch_error =
            |message: String| PlatformError::Dispatch { endpoint: path.to_string(), message };

        let response = Self::authorize(self.client.post(self.url(path)).query(query), auth)
            .json(&body)
            .send()
            .await
            .map_err(|err| dispatch_error(err.to_string()))?;

        let status = response.status();
        let payload = read_json(response).await.map_err(dispatch_error)?;
        if !status.is_success() {
            if is_request_shape_error(status) {
                return Err(PlatformError::InvalidRequest(format!(
                    "{path} rejected the grading request (status {status}): {}",
                    extract_error_message(&payload)
                )));
            }
            return Err(dispatch_error(format!(
                "status {status}: {}",
                extract_error_message(&payload)
            )));
        }

        payload
            .get("task_id")
            .and_then(flexible_id)
            .ok_or_else(|| dispatch_error("response missing task_id".to_string()))
    }

    pub(super) async fn task_status(
        &self,
        path: &str,
        auth: &AuthContext,
    ) -> Result<RemoteStatus, PlatformError> {
        let transient =
            |message: String| PlatformError::Transient { endpoint: path.to_string(), message };

        let response = Self::authorize(self.client.get(self.url(path)), auth)
            .send()
            .await
            .map_err(|err| transient(err.to_string()))?;

        let status = response.status();
        let payload = read_json(response).await.map_err(transient)?;
        if !status.is_success() {
            return Err(transient(format!("status {status}: {}", extract_error_message(&payload))));
        }

        payload
            .get("status")
            .or_else(|| payload.get("state"))
            .and_then(Value::as_str)
            .map(RemoteStatus::parse)
            .ok_or_else(|| PlatformError::Decode {
                endpoint: path.to_string(),
                message: "response missing status".to_string(),
            })
    }

    pub(super) async fn graded_submission(
        &self,
        path: &str,
        query: &[(&str, &str)],
        submission_id: &str,
        auth: &AuthContext,
    ) -> Result<GradedResult, PlatformError> {
        let transient =
            |message: String| PlatformError::Transient { endpoint: path.to_string(), message };
        let not_ready = || PlatformError::NotReady { submission_id: submission_id.to_string() };

        let response = Self::authorize(self.client.get(self.url(path)).query(query), auth)
            .send()
            .await
            .map_err(|err| transient(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(not_ready());
        }
        let payload = read_json(response).await.map_err(transient)?;
        if !status.is_success() {
            return Err(transient(format!("status {status}: {}", extract_error_message(&payload))));
        }

        let latest = match payload.get("latest_graded_submission") {
            None | Some(Value::Null) => return Err(not_ready()),
            Some(value) => value.clone(),
        };
        let latest: LatestGradedSubmission =
            serde_json::from_value(latest).map_err(|err| PlatformError::Decode {
                endpoint: path.to_string(),
                message: err.to_string(),
            })?;

        Ok(latest.into_result(submission_id))
    }

    pub(super) async fn roster(
        &self,
        path: &str,
        query: &[(&str, &str)],
        auth: &AuthContext,
    ) -> Result<Vec<Submission>, PlatformError> {
        let transient =
            |message: String| PlatformError::Transient { endpoint: path.to_string(), message };

        let response = Self::authorize(self.client.get(self.url(path)).query(query), auth)
            .send()
            .await
            .map_err(|err| transient(err.to_string()))?;

        let status = response.status();
        let payload = read_json(response).await.map_err(transient)?;
        if !status.is_success() {
            if is_request_shape_error(status) {
                return Err(PlatformError::InvalidRequest(format!(
                    "{path} rejected the roster request (status {status}): {}",
                    extract_error_message(&payload)
                )));
            }
            return Err(transient(format!("status {status}: {}", extract_error_message(&payload))));
        }

        let rows = match payload {
            Value::Array(rows) => rows,
            Value::Object(mut map) => match map.remove("submissions") {
                Some(Value::Array(rows)) => rows,
                Some(Value::Null) | None => Vec::new(),
                Some(_) => {
                    return Err(PlatformError::Decode {
                        endpoint: path.to_string(),
                        message: "submissions is not a list".to_string(),
                    })
                }
            },
            _ => {
                return Err(PlatformError::Decode {
                    endpoint: path.to_string(),
                    message: "roster body is neither a list nor an object".to_string(),
                })
            }
        };

        let mut submissions = Vec::with_capacity(rows.len());
        for row in rows {
            let entry: RosterEntry = decode(path, row)?;
            match entry.into_submission() {
                Some(submission) => submissions.push(submission),
                None => tracing::warn!(endpoint = path, "Skipping roster row without submission id"),
            }
        }
        Ok(submissions)
    }

    /// The bulk endpoint keys rows by numeric submission id.
    pub(super) async fn bulk_status(
        &self,
        path: &str,
        submission_ids: &[String],
        auth: &AuthContext,
    ) -> Result<Vec<(String, RemoteStatus)>, PlatformError> {
        let numeric = submission_ids
            .iter()
            .map(|id| {
                id.trim().parse::<i64>().map_err(|_| {
                    PlatformError::InvalidRequest(format!("submission id {id} is not numeric"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let transient =
            |message: String| PlatformError::Transient { endpoint: path.to_string(), message };
        let response = Self::authorize(self.client.post(self.url(path)), auth)
            .json(&BulkStatusBody { submission_ids: numeric })
            .send()
            .await
            .map_err(|err| transient(err.to_string()))?;

        let status = response.status();
        let payload = read_json(response).await.map_err(transient)?;
        if !status.is_success() {
            return Err(transient(format!("status {status}: {}", extract_error_message(&payload))));
        }

        let body: BulkStatusResponse = decode(path, payload)?;
        Ok(body
            .submissions
            .into_iter()
            .filter_map(|entry| {
                flexible_id(&entry.submission_id).map(|id| (id, RemoteStatus::parse(&entry.status)))
            })
            .collect())
    }
}

fn is_request_shape_error(status: StatusCode) -> bool {
    matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY)
}

fn decode<T: serde::de::DeserializeOwned>(endpoint: &str, value: Value) -> Result<T, PlatformError> {
    serde_json::from_value(value)
        .map_err(|err| PlatformError::Decode { endpoint: endpoint.to_string(), message: err.to_string() })
}

/// Reads the body as JSON; a non-JSON body is kept as a JSON string so error
/// bodies from proxies still produce a message.
async fn read_json(response: Response) -> Result<Value, String> {
    let raw = response.text().await.map_err(|err| format!("failed to read body: {err}"))?;
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw)))
}

/// Query pairs sent by every binding that scopes requests to a user email.
pub(super) fn scoped_query<'a>(
    email_key: &'a str,
    auth: &'a AuthContext,
    rest: &[(&'a str, &'a str)],
) -> Vec<(&'a str, &'a str)> {
    let mut query = Vec::with_capacity(rest.len() + 1);
    if let Some(email) = auth.email.as_deref() {
        query.push((email_key, email));
    }
    query.extend_from_slice(rest);
    query
}
