//! Configuration types and loading
//!
//! Loads `.convergent.yml` from the project root, falling back to the user
//! config directory and then to defaults.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::verify::CheckKind;

/// Main orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM CLI invocation settings
    pub llm: LlmConfig,

    /// Budget caps
    pub budget: BudgetConfig,

    /// Tournament tuning
    pub tournament: TournamentConfig,

    /// Review settings
    pub review: ReviewConfig,

    /// Verification command set
    pub verification: VerificationConfig,

    /// Scheduler limits
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".convergent.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("convergent").join("convergent.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Sanity checks that should fail fast at startup
    pub fn validate(&self) -> Result<()> {
        if self.llm.command.is_empty() {
            eyre::bail!("llm.command must not be empty");
        }
        if self.budget.total_cap <= 0.0 {
            eyre::bail!("budget.total-cap must be positive");
        }
        if self.tournament.max_competitors == 0 {
            eyre::bail!("tournament.max-competitors must be at least 1");
        }
        if self.tournament.strategies.is_empty() {
            eyre::bail!("tournament.strategies must not be empty");
        }
        if !(0.0..=1.0).contains(&self.tournament.synthesis_threshold) {
            eyre::bail!("tournament.synthesis-threshold must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.tournament.review_skip_threshold) {
            eyre::bail!("tournament.review-skip-threshold must be in [0, 1]");
        }
        Ok(())
    }
}

/// LLM CLI invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Executable that performs the reasoning (prompt on stdin, JSON on stdout)
    pub command: String,

    /// Base arguments passed on every invocation
    pub args: Vec<String>,

    /// Model for competitors and fixers
    pub model: String,

    /// Model for judge / convergence-analysis calls
    #[serde(rename = "judge-model")]
    pub judge_model: String,

    /// Flag that disables interactive permission prompts; required whenever
    /// a tool set is requested, or the child hangs awaiting confirmation
    #[serde(rename = "permission-skip-flag")]
    pub permission_skip_flag: String,

    /// Per-call cost cap in USD
    #[serde(rename = "call-budget")]
    pub call_budget: f64,

    /// Timeout for competitor / synthesis executions, in milliseconds
    #[serde(rename = "execution-timeout-ms")]
    pub execution_timeout_ms: u64,

    /// Timeout for single-shot calls (judge, review, commit message)
    #[serde(rename = "call-timeout-ms")]
    pub call_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string(), "--output-format".to_string(), "json".to_string()],
            model: "claude-sonnet-4-20250514".to_string(),
            judge_model: "claude-sonnet-4-20250514".to_string(),
            permission_skip_flag: "--dangerously-skip-permissions".to_string(),
            call_budget: 5.0,
            execution_timeout_ms: 1_800_000,
            call_timeout_ms: 300_000,
        }
    }
}

/// Budget caps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Hard cap on total run cost in USD; checked at iteration boundaries
    #[serde(rename = "total-cap")]
    pub total_cap: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { total_cap: 50.0 }
    }
}

/// Tournament tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TournamentConfig {
    /// Competitor cap for complex tasks
    #[serde(rename = "max-competitors")]
    pub max_competitors: usize,

    /// Ordered strategy labels; the first N are used
    pub strategies: Vec<String>,

    /// Minimum convergence ratio before synthesis is attempted
    #[serde(rename = "synthesis-threshold")]
    pub synthesis_threshold: f64,

    /// Convergence ratio at which review is skipped entirely
    #[serde(rename = "review-skip-threshold")]
    pub review_skip_threshold: f64,

    /// Delay between competitor launches, in milliseconds
    #[serde(rename = "stagger-ms")]
    pub stagger_ms: u64,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            max_competitors: 3,
            strategies: vec![
                "pragmatist".to_string(),
                "thorough".to_string(),
                "deconstructor".to_string(),
            ],
            synthesis_threshold: 0.5,
            review_skip_threshold: 0.8,
            stagger_ms: 2000,
        }
    }
}

/// Review settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub enabled: bool,

    /// Maximum review-fix attempts before the task fails
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Reviewer personas; more than one enables multi-reviewer mode
    pub personas: Vec<String>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            personas: vec!["correctness".to_string()],
        }
    }
}

/// One verification command with its scoring category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckCommand {
    /// Shell command, run with `sh -c`
    pub command: String,

    /// Scoring category
    pub kind: CheckKind,
}

/// Verification command set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub commands: Vec<CheckCommand>,

    /// Per-command timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            commands: vec![
                CheckCommand {
                    command: "cargo test".to_string(),
                    kind: CheckKind::Test,
                },
                CheckCommand {
                    command: "cargo check".to_string(),
                    kind: CheckKind::Typecheck,
                },
            ],
            timeout_ms: 600_000,
        }
    }
}

/// Scheduler limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Consecutive hard failures that trip the circuit breaker
    #[serde(rename = "circuit-breaker-threshold")]
    pub circuit_breaker_threshold: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: 3,
        }
    }
}
