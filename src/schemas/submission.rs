use serde::{Deserialize, Serialize};

/// Grading lifecycle tag shown next to each roster row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl GradingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One student's hand-in for the assignment currently being graded.
///
/// Rows are created from the LMS roster. Only the orchestrator touches
/// `status`, `score`, `task_id` and `failure` afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    #[serde(default)]
    pub student_name: String,
    #[serde(default)]
    pub student_email: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<String>,
    /// State reported by the LMS itself, e.g. `TURNED_IN`.
    #[serde(default)]
    pub lms_state: Option<String>,
    #[serde(default)]
    pub status: GradingStatus,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub failure: Option<String>,
}

impl Submission {
    pub fn new(id: impl Into<String>, student_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            student_name: student_name.into(),
            student_email: None,
            title: None,
            link: None,
            submitted_at: None,
            lms_state: None,
            status: GradingStatus::NotStarted,
            score: None,
            task_id: None,
            failure: None,
        }
    }
}

/// A row handed to the spreadsheet export collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub student: String,
    pub score: String,
}
