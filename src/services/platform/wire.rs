//! Request and response bodies of the grading backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::time::{now_utc, parse_timestamp};
use crate::schemas::grading::GradedResult;
use crate::schemas::submission::Submission;

#[derive(Debug, Serialize)]
pub(super) struct GradeSubmissionBody<'a> {
    pub(super) submission_ids: &'a [String],
    pub(super) rubric: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) regrade_context: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(super) struct BulkStatusBody {
    pub(super) submission_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct BulkStatusResponse {
    #[serde(default)]
    pub(super) submissions: Vec<BulkStatusEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct BulkStatusEntry {
    pub(super) submission_id: Value,
    pub(super) status: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct LatestGradedSubmission {
    pub(super) points_received: f64,
    pub(super) points_possible: f64,
    #[serde(default)]
    pub(super) rubric_breakdown: Option<String>,
    #[serde(default)]
    pub(super) explanation: Option<String>,
    #[serde(default)]
    pub(super) graded_at: Option<String>,
    #[serde(default)]
    pub(super) student_name: Option<String>,
}

impl LatestGradedSubmission {
    pub(super) fn into_result(self, submission_id: &str) -> GradedResult {
        let graded_at = match self.graded_at.as_deref() {
            Some(raw) => parse_timestamp(raw).unwrap_or_else(|| {
                tracing::warn!(submission_id, graded_at = raw, "Unparseable graded_at; using receipt time");
                now_utc()
            }),
            None => now_utc(),
        };

        GradedResult {
            submission_id: submission_id.to_string(),
            points_received: self.points_received,
            points_possible: self.points_possible,
            rubric_breakdown: self.rubric_breakdown.unwrap_or_default(),
            explanation: self.explanation.unwrap_or_default(),
            graded_at,
            student_name: self.student_name,
        }
    }
}

/// One roster row as the LMS endpoints return it.
#[derive(Debug, Deserialize)]
pub(super) struct RosterEntry {
    pub(super) submission_id: Value,
    #[serde(default)]
    pub(super) student_name: Option<String>,
    #[serde(default)]
    pub(super) student_email: Option<String>,
    #[serde(default)]
    pub(super) submission_title: Option<String>,
    #[serde(default)]
    pub(super) submission_link: Option<String>,
    #[serde(default)]
    pub(super) submission_date: Option<String>,
    #[serde(default)]
    pub(super) submission_status: Option<String>,
    #[serde(default)]
    pub(super) submission_score: Option<Value>,
}

impl RosterEntry {
    pub(super) fn into_submission(self) -> Option<Submission> {
        let id = flexible_id(&self.submission_id)?;
        let mut submission = Submission::new(id, self.student_name.unwrap_or_default());
        submission.student_email = self.student_email.filter(|value| !value.is_empty());
        submission.title = self.submission_title;
        submission.link = self.submission_link;
        submission.submitted_at = self.submission_date;
        submission.lms_state = self.submission_status;
        submission.score = self.submission_score.as_ref().and_then(flexible_score);
        Some(submission)
    }
}

/// Ids arrive as strings on some endpoints and numbers on others.
pub(super) fn flexible_id(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Scores arrive as numbers, numeric strings or `received/possible` labels.
fn flexible_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let head = text.split('/').next().unwrap_or_default().trim();
            head.parse::<f64>().ok()
        }
        _ => None,
    }
}

/// Pulls a human-readable message out of an error body.
pub(super) fn extract_error_message(payload: &Value) -> String {
    if let Some(detail) = payload.get("detail") {
        if let Some(text) = detail.as_str() {
            return text.to_string();
        }
        if let Some(items) = detail.as_array() {
            let joined = items
                .iter()
                .filter_map(|item| {
                    item.get("msg")
                        .and_then(Value::as_str)
                        .or_else(|| item.get("message").and_then(Value::as_str))
                })
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return joined;
            }
        }
    }

    if let Some(text) = payload.as_str() {
        if !text.trim().is_empty() {
            return text.trim().to_string();
        }
    }

    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}
