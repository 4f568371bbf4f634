use serde::{Deserialize, Serialize};

/// The scoring guide attached to a grading batch. The backend consumes it
/// as an opaque string, see [`RubricSpec::to_wire`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RubricSpec {
    /// Free-text instructions typed by the instructor.
    Prompt { text: String },
    /// A rubric previously generated from a prompt.
    Structured(StructuredRubric),
    /// Text extracted from an uploaded rubric document.
    Document {
        #[serde(default)]
        name: Option<String>,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRubric {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub criteria: Vec<RubricCriterion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricCriterion {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub levels: Vec<ScoringLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringLevel {
    pub label: String,
    pub points: f64,
    #[serde(default)]
    pub description: String,
}

impl RubricSpec {
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::Prompt { text: text.into() }
    }

    /// A blank rubric cannot be dispatched.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Prompt { text } | Self::Document { text, .. } => text.trim().is_empty(),
            Self::Structured(rubric) => rubric.criteria.is_empty(),
        }
    }

    pub fn to_wire(&self) -> String {
        match self {
            Self::Prompt { text } | Self::Document { text, .. } => text.trim().to_string(),
            Self::Structured(rubric) => serde_json::to_string(rubric).unwrap_or_default(),
        }
    }
}
