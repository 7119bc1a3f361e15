//! Verification command execution and weighted scoring
//!
//! Runs the configured check commands in a directory and scores the result:
//! a command contributes its category weight iff it exits zero.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{CheckCommand, VerificationConfig};

/// Scoring category of a verification command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Test,
    Typecheck,
    Lint,
    Format,
    Other,
}

impl CheckKind {
    /// Category weight contributed by a passing command
    pub fn weight(&self) -> u32 {
        match self {
            Self::Test => 40,
            Self::Typecheck => 30,
            Self::Lint => 15,
            Self::Format => 15,
            Self::Other => 10,
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Typecheck => write!(f, "typecheck"),
            Self::Lint => write!(f, "lint"),
            Self::Format => write!(f, "format"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Outcome of one verification command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub command: String,
    pub kind: CheckKind,
    pub exit_code: i32,
    pub passed: bool,

    /// Tail of combined output, kept short for logs and prompts
    pub output: String,

    pub duration_ms: u64,
}

/// Aggregated verification outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub results: Vec<CheckResult>,

    /// Sum of weights of passing commands
    pub score: u32,
}

impl VerificationReport {
    /// An empty report (no commands configured) scores zero but passes
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            score: 0,
        }
    }

    /// True when every configured command passed (vacuously true when none)
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Summary of failing commands for learnings and prompts
    pub fn failure_summary(&self) -> String {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| format!("{} ({}): exit {}", r.command, r.kind, r.exit_code))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Runs the configured verification commands in a target directory
#[derive(Debug, Clone)]
pub struct VerificationRunner {
    commands: Vec<CheckCommand>,
    timeout: Duration,
}

const OUTPUT_TAIL_CHARS: usize = 2000;

impl VerificationRunner {
    pub fn new(config: &VerificationConfig) -> Self {
        Self {
            commands: config.commands.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Maximum achievable score for the configured command set
    pub fn max_score(&self) -> u32 {
        self.commands.iter().map(|c| c.kind.weight()).sum()
    }

    /// Run every command in `dir` and score the results
    ///
    /// A command that times out counts as failed; it does not abort the run.
    pub async fn run(&self, dir: &Path) -> eyre::Result<VerificationReport> {
        debug!(dir = %dir.display(), commands = self.commands.len(), "verification: starting");
        let mut results = Vec::with_capacity(self.commands.len());
        let mut score = 0;

        for check in &self.commands {
            let result = self.run_one(check, dir).await?;
            if result.passed {
                score += check.kind.weight();
            }
            results.push(result);
        }

        info!(dir = %dir.display(), score, "verification: finished");
        Ok(VerificationReport { results, score })
    }

    async fn run_one(&self, check: &CheckCommand, dir: &Path) -> eyre::Result<CheckResult> {
        let start = std::time::Instant::now();

        let outcome = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&check.command)
                .current_dir(dir)
                .output(),
        )
        .await;

        let duration_ms = start.elapsed().as_millis() as u64;

        let (exit_code, output) = match outcome {
            Ok(Ok(out)) => {
                let mut text = String::from_utf8_lossy(&out.stdout).to_string();
                text.push_str(&String::from_utf8_lossy(&out.stderr));
                (out.status.code().unwrap_or(-1), tail(&text, OUTPUT_TAIL_CHARS))
            }
            Ok(Err(e)) => return Err(eyre::eyre!("Failed to spawn verification command: {}", e)),
            Err(_) => {
                debug!(command = %check.command, "verification: command timed out");
                (-1, format!("timed out after {:?}", self.timeout))
            }
        };

        let passed = exit_code == 0;
        debug!(command = %check.command, exit_code, passed, "verification: command finished");

        Ok(CheckResult {
            command: check.command.clone(),
            kind: check.kind,
            exit_code,
            passed,
            output,
            duration_ms,
        })
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let start = text.len() - max_chars;
    // Snap to a char boundary
    let start = (start..text.len()).find(|i| text.is_char_boundary(*i)).unwrap_or(start);
    text[start..].to_string()
}
