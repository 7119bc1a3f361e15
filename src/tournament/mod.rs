//! Tournament engine
//!
//! Runs N independent competitors against the same code task in isolated
//! worktrees, scores them with the project's verification commands, and
//! selects a single winner by synthesis, AI judge, or score-then-cost
//! fallback. A failed tournament leaves the main tree untouched.

pub mod convergence;
pub mod engine;
pub mod selection;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::TournamentMetrics;
use crate::llm::LlmError;
use crate::scm::GitError;

pub use convergence::{ConvergenceAnalysis, analyze_convergence};
pub use engine::TournamentEngine;
pub use selection::{ConvergenceVerdict, candidate_pool, parse_judge_verdict, sort_score_then_cost};

/// Winner strategy label recorded when the synthesis implementation wins
pub const SYNTHESIS_STRATEGY: &str = "synthesis";

/// Errors that fail a tournament
#[derive(Debug, thiserror::Error)]
pub enum TournamentError {
    /// No competitor produced any changed files
    #[error("No implemented candidates")]
    NoCandidates,

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Verification failed to run: {0}")]
    Verification(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one competitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorResult {
    /// `competitor-<i>`
    pub id: String,

    /// Strategy label
    pub strategy: String,

    /// True when the competitor changed at least one file
    pub implemented: bool,

    /// Changed files relative to the worktree root
    pub changed_files: Vec<String>,

    /// Verification score inside the worktree (0 when not implemented)
    pub score: u32,

    /// Observed cost of the competitor's CLI call
    pub cost: f64,

    /// Diff against the base commit
    pub diff: String,

    /// Additions + deletions, excluding file-header lines
    pub diff_lines: usize,

    /// Scratch worktree path (gone after cleanup)
    #[serde(skip)]
    pub worktree: PathBuf,

    /// Error text when the CLI call failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Synthesis bookkeeping for metrics and the report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisInfo {
    pub attempted: bool,
    pub viable: bool,
    pub succeeded: bool,

    /// Synthesis was attempted but an individual candidate won
    pub fallback: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub convergent_patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub divergent_approaches: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

/// Result of a completed tournament
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentResult {
    pub winner_id: String,

    /// Strategy label of the winner, or [`SYNTHESIS_STRATEGY`]
    pub winner_strategy: String,

    pub winner_score: u32,

    pub winner_diff_lines: usize,

    pub competitors: Vec<CompetitorResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence: Option<ConvergenceAnalysis>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_rationale: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisInfo>,

    /// Summed cost of every CLI call the tournament made
    pub total_cost: f64,
}

impl TournamentResult {
    /// Number of competitors that produced changes
    pub fn implemented_count(&self) -> usize {
        self.competitors.iter().filter(|c| c.implemented).count()
    }

    /// Number of competitors with a positive verification score
    pub fn verified_count(&self) -> usize {
        self.competitors.iter().filter(|c| c.implemented && c.score > 0).count()
    }

    /// Convergence ratio, zero when fewer than two implemented
    pub fn convergence_ratio(&self) -> f64 {
        self.convergence.as_ref().map(|c| c.ratio).unwrap_or(0.0)
    }

    /// The metrics row recorded into the state store
    pub fn metrics(&self) -> TournamentMetrics {
        let scores: Vec<u32> = self
            .competitors
            .iter()
            .filter(|c| c.implemented)
            .map(|c| c.score)
            .collect();
        let score_spread = match (scores.iter().max(), scores.iter().min()) {
            (Some(max), Some(min)) => max - min,
            _ => 0,
        };

        let synthesis = self.synthesis.clone().unwrap_or_default();

        TournamentMetrics {
            competitor_count: self.competitors.len(),
            implemented_count: self.implemented_count(),
            verified_count: self.verified_count(),
            winner_strategy: self.winner_strategy.clone(),
            winner_score: self.winner_score,
            score_spread,
            convergence_ratio: self.convergence_ratio(),
            winner_diff_lines: self.winner_diff_lines,
            synthesis_attempted: synthesis.attempted,
            synthesis_succeeded: synthesis.succeeded,
            synthesis_fallback: synthesis.fallback,
            selection_rationale: self.judge_rationale.clone().or(synthesis.rationale),
            convergent_patterns: synthesis.convergent_patterns,
        }
    }
}
