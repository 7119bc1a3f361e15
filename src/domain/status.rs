//! Runtime state of a run and its tasks
//!
//! The on-disk shape of `state.json` is the source of truth; everything here
//! serializes with serde and is owned by the state store actor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Pending,
    /// A dependency has not completed yet
    Blocked,
    InProgress,
    Completed,
    Failed,
}

impl TaskState {
    /// Terminal states never transition again (except via an explicit retry)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Blocked => write!(f, "blocked"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Phase of an in-progress task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Tournament (code tasks)
    #[serde(rename = "T")]
    Tournament,
    /// Single-shot build (explore / command tasks)
    #[serde(rename = "B")]
    Build,
    #[serde(rename = "verify")]
    Verify,
    #[serde(rename = "review")]
    Review,
    #[serde(rename = "commit")]
    Commit,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tournament => write!(f, "T"),
            Self::Build => write!(f, "B"),
            Self::Verify => write!(f, "verify"),
            Self::Review => write!(f, "review"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// Outcome metrics of one tournament attempt
///
/// Written once per attempt and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TournamentMetrics {
    /// How many competitors were launched
    pub competitor_count: usize,

    /// How many produced at least one changed file
    pub implemented_count: usize,

    /// How many passed verification with a positive score
    pub verified_count: usize,

    /// Strategy label of the winner, or the literal `synthesis`
    pub winner_strategy: String,

    /// Verification score of the winner
    pub winner_score: u32,

    /// Max score minus min score across implemented competitors
    pub score_spread: u32,

    /// Intersection-over-union of changed-file sets (0 when < 2 implemented)
    pub convergence_ratio: f64,

    /// Additions + deletions in the winner's diff, excluding header lines
    pub winner_diff_lines: usize,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthesis_attempted: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthesis_succeeded: bool,

    /// Synthesis was attempted but a candidate won anyway
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthesis_fallback: bool,

    /// Judge or synthesis rationale, when one was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_rationale: Option<String>,

    /// Convergent design decisions identified by the analysis call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub convergent_patterns: Vec<String>,
}

/// Per-task runtime status
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskStatus {
    pub status: TaskState,

    /// Only meaningful while `status` is `in_progress`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tournament_metrics: Option<TournamentMetrics>,
}

/// Aggregate run state, persisted as `state.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Map of task id to status
    pub tasks_status: BTreeMap<String, TaskStatus>,

    /// Aggregate cost, mirrored from the budget ledger
    #[serde(default)]
    pub total_cost: f64,

    /// Consecutive hard failures; zeroed on any completion
    #[serde(default)]
    pub consecutive_failures: u32,

    pub started_at: DateTime<Utc>,

    pub last_updated: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

impl RunState {
    /// Fresh state with every task pending
    pub fn new(task_ids: &[String]) -> Self {
        let now = Utc::now();
        Self {
            tasks_status: task_ids.iter().map(|id| (id.clone(), TaskStatus::default())).collect(),
            total_cost: 0.0,
            consecutive_failures: 0,
            started_at: now,
            last_updated: now,
            pr_url: None,
        }
    }

    /// Count tasks in each state
    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for status in self.tasks_status.values() {
            match status.status {
                TaskState::Pending => counts.pending += 1,
                TaskState::Blocked => counts.blocked += 1,
                TaskState::InProgress => counts.in_progress += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// True when no task can make further progress without a retry
    pub fn all_terminal(&self) -> bool {
        self.tasks_status.values().all(|s| s.status.is_terminal())
    }
}

/// Task counts by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: usize,
    pub blocked: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.pending + self.blocked + self.in_progress + self.completed + self.failed
    }
}

impl std::fmt::Display for StateCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "completed: {}, failed: {}, pending: {}, blocked: {}, in_progress: {}",
            self.completed, self.failed, self.pending, self.blocked, self.in_progress
        )
    }
}

/// Why the scheduler stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    AllComplete,
    NoProgress,
    BudgetExhausted,
    CircuitBreaker,
    Interrupted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllComplete => write!(f, "all_complete"),
            Self::NoProgress => write!(f, "no_progress"),
            Self::BudgetExhausted => write!(f, "budget_exhausted"),
            Self::CircuitBreaker => write!(f, "circuit_breaker"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}
