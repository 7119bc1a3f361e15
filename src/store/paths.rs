//! Run directory layout
//!
//! ```text
//! <project>/.convergent/runs/<timestamp>/
//!   tasks.json  state.json  budget.json  learnings.json
//!   logs/orchestrator.log
//!   logs/task-<id>/...
//!   reports/
//! ```
//!
//! `.convergent/latest` is a symlink to the most recent run.

use chrono::Utc;
use eyre::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the orchestrator's own state directory, excluded from diffs,
/// cleans, and changed-file listings
pub const STATE_DIR_NAME: &str = ".convergent";

/// Paths within a single run directory
#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
}

impl RunPaths {
    /// Create a fresh run directory under `<project>/.convergent/runs/` and
    /// repoint the `latest` symlink at it
    pub fn create(project_root: &Path) -> Result<Self> {
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
        let base = project_root.join(STATE_DIR_NAME);
        let root = base.join("runs").join(&stamp);

        fs::create_dir_all(root.join("logs")).context("Failed to create run log directory")?;
        fs::create_dir_all(root.join("reports")).context("Failed to create run reports directory")?;

        let latest = base.join("latest");
        if latest.symlink_metadata().is_ok() {
            fs::remove_file(&latest).context("Failed to replace latest symlink")?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(Path::new("runs").join(&stamp), &latest)
            .context("Failed to create latest symlink")?;

        info!(run_dir = %root.display(), "Created run directory");
        Ok(Self { root })
    }

    /// Open an existing run directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            eyre::bail!("Run directory does not exist: {}", root.display());
        }
        Ok(Self { root })
    }

    /// Resolve the most recent run under a project, via the `latest`
    /// symlink with a newest-directory fallback
    pub fn latest(project_root: &Path) -> Result<Option<Self>> {
        let base = project_root.join(STATE_DIR_NAME);
        let latest = base.join("latest");
        if latest.is_dir() {
            let resolved = fs::canonicalize(&latest).context("Failed to resolve latest symlink")?;
            return Ok(Some(Self { root: resolved }));
        }

        let runs = base.join("runs");
        if !runs.is_dir() {
            return Ok(None);
        }
        let mut dirs: Vec<PathBuf> = fs::read_dir(&runs)
            .context("Failed to read runs directory")?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        debug!(count = dirs.len(), "Scanned runs directory");
        Ok(dirs.pop().map(|root| Self { root }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.root.join("tasks.json")
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn budget_file(&self) -> PathBuf {
        self.root.join("budget.json")
    }

    pub fn learnings_file(&self) -> PathBuf {
        self.root.join("learnings.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn orchestrator_log(&self) -> PathBuf {
        self.log_dir().join("orchestrator.log")
    }

    /// Log directory for one task, created on demand
    pub fn task_log_dir(&self, task_id: &str) -> Result<PathBuf> {
        let dir = self.log_dir().join(task_id);
        fs::create_dir_all(&dir).context("Failed to create task log directory")?;
        Ok(dir)
    }

    /// Findings file written by explore tasks
    pub fn findings_file(&self, task_id: &str) -> PathBuf {
        self.log_dir().join(task_id).join("findings.md")
    }

    pub fn tournament_file(&self, task_id: &str) -> PathBuf {
        self.log_dir().join(task_id).join("tournament.json")
    }

    pub fn review_file(&self, task_id: &str) -> PathBuf {
        self.log_dir().join(task_id).join("review.json")
    }

    pub fn verify_log(&self, task_id: &str) -> PathBuf {
        self.log_dir().join(task_id).join("verify.log")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn report_file(&self, task_id: &str) -> PathBuf {
        self.reports_dir().join(format!("{}.md", task_id))
    }

    pub fn summary_file(&self) -> PathBuf {
        self.reports_dir().join("summary.md")
    }
}
