//! Learnings recorded across tasks
//!
//! Review feedback and failure patterns from earlier tasks are fed back into
//! later competitor prompts. De-duplication lives in the learnings store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What produced a learning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningKind {
    ReviewFeedback,
    FailurePattern,
    VerificationFailure,
}

impl std::fmt::Display for LearningKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReviewFeedback => write!(f, "review_feedback"),
            Self::FailurePattern => write!(f, "failure_pattern"),
            Self::VerificationFailure => write!(f, "verification_failure"),
        }
    }
}

/// One recorded learning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    /// Task the learning came from
    pub task_id: String,

    pub kind: LearningKind,

    /// Short summary, de-duplicated against entries of the same kind
    pub summary: String,

    pub recorded_at: DateTime<Utc>,
}

impl Learning {
    pub fn new(task_id: impl Into<String>, kind: LearningKind, summary: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
            summary: summary.into(),
            recorded_at: Utc::now(),
        }
    }
}
