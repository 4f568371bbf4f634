use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Outcome of one successful grading pass. Immutable once built; a regrade
/// produces a new value that replaces the old one in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedResult {
    pub submission_id: String,
    pub points_received: f64,
    pub points_possible: f64,
    pub rubric_breakdown: String,
    pub explanation: String,
    #[serde(with = "time::serde::rfc3339")]
    pub graded_at: OffsetDateTime,
    #[serde(default)]
    pub student_name: Option<String>,
}

impl GradedResult {
    /// `received/possible`, the score format the gradebook export expects.
    pub fn score_label(&self) -> String {
        format!("{}/{}", self.points_received, self.points_possible)
    }
}

/// Input of the one-shot `grade_batch` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchFile {
    pub platform: String,
    pub course_id: String,
    pub assignment_id: String,
    /// Grades the whole roster when empty.
    #[serde(default)]
    pub submission_ids: Vec<String>,
    pub rubric: crate::schemas::rubric::RubricSpec,
    #[serde(default)]
    pub email: Option<String>,
    /// Falls back to `LMS_BEARER_TOKEN`.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn result(received: f64, possible: f64) -> GradedResult {
        GradedResult {
            submission_id: "s-1".to_string(),
            points_received: received,
            points_possible: possible,
            rubric_breakdown: String::new(),
            explanation: String::new(),
            graded_at: datetime!(2024-05-01 12:00 UTC),
            student_name: None,
        }
    }

    #[test]
    fn score_label_drops_trailing_zero_fraction() {
        assert_eq!(result(8.0, 10.0).score_label(), "8/10");
        assert_eq!(result(7.5, 10.0).score_label(), "7.5/10");
    }

    #[test]
    fn batch_file_defaults_to_whole_roster() {
        let file: BatchFile = serde_json::from_value(serde_json::json!({
            "platform": "manual",
            "course_id": "c-1",
            "assignment_id": "a-1",
            "rubric": {"kind": "prompt", "text": "Grade"}
        }))
        .expect("batch file");
        assert!(file.submission_ids.is_empty());
        assert!(file.bearer_token.is_none());
    }

    #[test]
    fn graded_at_serialises_as_rfc3339() {
        let value = serde_json::to_value(result(1.0, 2.0)).expect("json");
        assert_eq!(value["graded_at"], "2024-05-01T12:00:00Z");
    }
}
