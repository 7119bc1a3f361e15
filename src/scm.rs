//! Thin verbs over source control
//!
//! Everything the core needs from git: head commit, stage-and-commit, hard
//! reset with untracked cleanup, detached worktrees, diffs, and changed-file
//! listings. The orchestrator's own state directory is excluded from diffs,
//! cleans, and listings.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::store::paths::STATE_DIR_NAME;

/// Errors from git operations
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("Failed to run git: {0}")]
    Spawn(String),

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}

/// Adapter over the project's git repository
#[derive(Debug, Clone)]
pub struct GitAdapter {
    repo_root: PathBuf,
}

impl GitAdapter {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        debug!(?args, dir = %dir.display(), "git: running");
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .map_err(|e| GitError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Current head commit of the main tree
    pub async fn head_commit(&self) -> Result<String, GitError> {
        let out = self.git(&self.repo_root, &["rev-parse", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    /// Stage everything outside the state directory and commit; returns
    /// false when there was nothing to commit
    pub async fn commit_all(&self, message: &str) -> Result<bool, GitError> {
        let exclude = format!(":(exclude){}", STATE_DIR_NAME);
        let status = self
            .git(&self.repo_root, &["status", "--porcelain", "--", ".", &exclude])
            .await?;
        if status.trim().is_empty() {
            debug!("commit_all: nothing to commit");
            return Ok(false);
        }

        self.git(&self.repo_root, &["add", "-A", "--", ".", &exclude]).await?;
        self.git(&self.repo_root, &["commit", "-m", message]).await?;
        info!("Committed: {}", message.lines().next().unwrap_or(message));
        Ok(true)
    }

    /// Hard reset the main tree to `commit` and remove untracked files,
    /// leaving the orchestrator's state directory alone
    ///
    /// This is the revert primitive: a reset, not a checkout, so any
    /// intermediate commits are undone too.
    pub async fn hard_reset(&self, commit: &str) -> Result<(), GitError> {
        warn!(%commit, "Hard reset of main tree");
        self.git(&self.repo_root, &["reset", "--hard", commit]).await?;
        self.git(&self.repo_root, &["clean", "-fd", "-e", STATE_DIR_NAME])
            .await?;
        Ok(())
    }

    /// Add a worktree detached at `commit`
    pub async fn worktree_add_detached(&self, path: &Path, commit: &str) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        self.git(
            &self.repo_root,
            &["worktree", "add", "--detach", path_str.as_ref(), commit],
        )
        .await?;
        debug!(path = %path.display(), %commit, "Created detached worktree");
        Ok(())
    }

    /// Force-remove a worktree; already-gone worktrees are not an error
    pub async fn worktree_remove(&self, path: &Path) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        match self
            .git(&self.repo_root, &["worktree", "remove", "--force", path_str.as_ref()])
            .await
        {
            Ok(_) => Ok(()),
            Err(GitError::CommandFailed { stderr, .. })
                if stderr.contains("is not a working tree") || stderr.contains("No such file") =>
            {
                debug!(path = %path.display(), "Worktree already removed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Changed files (tracked and untracked) in `dir`, excluding the
    /// orchestrator's state directory
    pub async fn changed_files(&self, dir: &Path) -> Result<Vec<String>, GitError> {
        let exclude = format!(":(exclude){}", STATE_DIR_NAME);
        let out = self
            .git(dir, &["status", "--porcelain", "--", ".", &exclude])
            .await?;

        let files = out
            .lines()
            .filter(|line| line.len() > 3)
            .map(|line| {
                let path = &line[3..];
                // Renames show as "orig -> new"; keep the new path
                match path.split_once(" -> ") {
                    Some((_, new)) => new.trim().to_string(),
                    None => path.trim().to_string(),
                }
            })
            .filter(|p| !p.is_empty())
            .collect();

        Ok(files)
    }

    /// Diff of a worktree against its HEAD, with new files staged first so
    /// their content appears; excludes the orchestrator directory
    pub async fn worktree_diff(&self, dir: &Path) -> Result<String, GitError> {
        let exclude = format!(":(exclude){}", STATE_DIR_NAME);
        self.git(dir, &["add", "-A", "--", ".", &exclude]).await?;
        self.git(dir, &["diff", "HEAD", "--", ".", &exclude]).await
    }

    /// Diff of the main tree against an arbitrary commit, excluding the
    /// orchestrator directory
    ///
    /// New files are staged first so applied-but-uncommitted winner files
    /// show up; diffing against the captured base commit (not HEAD) also
    /// catches intermediate commits.
    pub async fn diff_vs(&self, commit: &str) -> Result<String, GitError> {
        let exclude = format!(":(exclude){}", STATE_DIR_NAME);
        self.git(&self.repo_root, &["add", "-A", "--", ".", &exclude]).await?;
        self.git(&self.repo_root, &["diff", commit, "--", ".", &exclude]).await
    }
}

/// Count additions + deletions in a unified diff, excluding file-header
/// lines (`+++` / `---`)
pub fn count_diff_lines(diff: &str) -> usize {
    diff.lines()
        .filter(|line| {
            (line.starts_with('+') && !line.starts_with("+++"))
                || (line.starts_with('-') && !line.starts_with("---"))
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_git_repo(dir: &Path) {
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
            vec!["commit", "--allow-empty", "-m", "initial"],
        ] {
            Command::new("git").args(&args).current_dir(dir).output().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_head_commit() {
        let temp = tempdir().unwrap();
        setup_git_repo(temp.path()).await;

        let git = GitAdapter::new(temp.path());
        let head = git.head_commit().await.unwrap();
        assert_eq!(head.len(), 40);
    }

    #[tokio::test]
    async fn test_commit_all_and_nothing_to_commit() {
        let temp = tempdir().unwrap();
        setup_git_repo(temp.path()).await;
        let git = GitAdapter::new(temp.path());

        assert!(!git.commit_all("empty").await.unwrap());

        std::fs::write(temp.path().join("a.txt"), "hello").unwrap();
        assert!(git.commit_all("add a.txt").await.unwrap());
        assert!(git.changed_files(temp.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_all_leaves_state_dir_untracked() {
        let temp = tempdir().unwrap();
        setup_git_repo(temp.path()).await;
        let git = GitAdapter::new(temp.path());

        let state_dir = temp.path().join(STATE_DIR_NAME);
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("state.json"), "{}").unwrap();
        std::fs::write(temp.path().join("code.rs"), "fn f() {}").unwrap();

        assert!(git.commit_all("add code").await.unwrap());

        let tracked = git
            .git(temp.path(), &["ls-files"])
            .await
            .unwrap();
        assert!(tracked.contains("code.rs"));
        assert!(!tracked.contains("state.json"));
    }

    #[tokio::test]
    async fn test_hard_reset_undoes_commits_and_untracked() {
        let temp = tempdir().unwrap();
        setup_git_repo(temp.path()).await;
        let git = GitAdapter::new(temp.path());

        let base = git.head_commit().await.unwrap();

        std::fs::write(temp.path().join("a.txt"), "hello").unwrap();
        git.commit_all("add a.txt").await.unwrap();
        std::fs::write(temp.path().join("untracked.txt"), "x").unwrap();

        git.hard_reset(&base).await.unwrap();

        assert_eq!(git.head_commit().await.unwrap(), base);
        assert!(!temp.path().join("a.txt").exists());
        assert!(!temp.path().join("untracked.txt").exists());
    }

    #[tokio::test]
    async fn test_hard_reset_preserves_state_dir() {
        let temp = tempdir().unwrap();
        setup_git_repo(temp.path()).await;
        let git = GitAdapter::new(temp.path());

        let base = git.head_commit().await.unwrap();
        let state_dir = temp.path().join(STATE_DIR_NAME);
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("state.json"), "{}").unwrap();

        git.hard_reset(&base).await.unwrap();
        assert!(state_dir.join("state.json").exists());
    }

    #[tokio::test]
    async fn test_worktree_add_and_remove() {
        let repo = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        setup_git_repo(repo.path()).await;
        let git = GitAdapter::new(repo.path());

        let head = git.head_commit().await.unwrap();
        let wt = scratch.path().join("competitor-0");

        git.worktree_add_detached(&wt, &head).await.unwrap();
        assert!(wt.is_dir());

        git.worktree_remove(&wt).await.unwrap();
        assert!(!wt.exists());

        // Second removal is a no-op
        git.worktree_remove(&wt).await.unwrap();
    }

    #[tokio::test]
    async fn test_changed_files_includes_untracked() {
        let temp = tempdir().unwrap();
        setup_git_repo(temp.path()).await;
        let git = GitAdapter::new(temp.path());

        std::fs::write(temp.path().join("tracked.txt"), "x").unwrap();
        git.commit_all("add").await.unwrap();

        std::fs::write(temp.path().join("tracked.txt"), "y").unwrap();
        std::fs::write(temp.path().join("new.txt"), "z").unwrap();

        let mut files = git.changed_files(temp.path()).await.unwrap();
        files.sort();
        assert_eq!(files, vec!["new.txt".to_string(), "tracked.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_changed_files_excludes_state_dir() {
        let temp = tempdir().unwrap();
        setup_git_repo(temp.path()).await;
        let git = GitAdapter::new(temp.path());

        let state_dir = temp.path().join(STATE_DIR_NAME);
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("budget.json"), "{}").unwrap();

        assert!(git.changed_files(temp.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worktree_diff_shows_new_files() {
        let repo = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        setup_git_repo(repo.path()).await;
        let git = GitAdapter::new(repo.path());

        let head = git.head_commit().await.unwrap();
        let wt = scratch.path().join("wt");
        git.worktree_add_detached(&wt, &head).await.unwrap();

        std::fs::write(wt.join("new.rs"), "fn main() {}\n").unwrap();

        let diff = git.worktree_diff(&wt).await.unwrap();
        assert!(diff.contains("new.rs"));
        assert!(diff.contains("+fn main() {}"));

        git.worktree_remove(&wt).await.unwrap();
    }

    #[tokio::test]
    async fn test_diff_vs_shows_untracked_files() {
        let temp = tempdir().unwrap();
        setup_git_repo(temp.path()).await;
        let git = GitAdapter::new(temp.path());

        let base = git.head_commit().await.unwrap();
        std::fs::write(temp.path().join("applied.rs"), "fn applied() {}\n").unwrap();

        let diff = git.diff_vs(&base).await.unwrap();
        assert!(diff.contains("applied.rs"));
        assert!(diff.contains("+fn applied() {}"));
    }

    #[test]
    fn test_count_diff_lines_skips_headers() {
        let diff = "\
diff --git a/x.rs b/x.rs
--- a/x.rs
+++ b/x.rs
@@ -1,2 +1,2 @@
-old line
+new line
+another
";
        assert_eq!(count_diff_lines(diff), 3);
    }

    #[test]
    fn test_count_diff_lines_empty() {
        assert_eq!(count_diff_lines(""), 0);
    }
}
