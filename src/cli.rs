//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Convergent - tournament-based autonomous development orchestrator
#[derive(Parser)]
#[command(
    name = "convergent",
    about = "Drives a goal through a dependency-ordered task queue with tournament-selected implementations",
    version,
    after_help = "Run artifacts live under <project>/.convergent/runs/; `latest` points at the newest run."
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Start a new run for a goal
    Run {
        /// The development goal
        goal: String,

        /// Free-text instructions refining the goal
        #[arg(short, long)]
        instructions: Option<String>,

        /// Project root (defaults to the current directory)
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },

    /// Resume the latest run after a crash or interrupt
    Resume {
        /// Project root
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },

    /// Reset failed and blocked tasks in the latest run, then continue
    Retry {
        /// Project root
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },

    /// Show the latest run's state
    Status {
        /// Project root
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from(["convergent", "run", "add a cache", "-i", "keep it small"]).unwrap();
        match cli.command {
            Command::Run { goal, instructions, .. } => {
                assert_eq!(goal, "add a cache");
                assert_eq!(instructions.as_deref(), Some("keep it small"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from(["convergent", "-v", "status"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["convergent"]).is_err());
    }
}
