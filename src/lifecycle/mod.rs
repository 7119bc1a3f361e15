//! Per-task lifecycle state machine
//!
//! Code tasks run tournament -> verify-on-main -> review (with a bounded
//! fix-retry loop) -> commit. Explore and command tasks are a single build
//! phase. Every failure path reverts the main tree by hard reset to the
//! base commit captured before the tournament, which also undoes any
//! intermediate commits a reviewer-fixer may have produced.

pub mod commit;
pub mod review;

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::domain::{LearningKind, Phase, Task, TaskKind, TaskState};
use crate::llm::{LlmInvoker, LlmRequest};
use crate::prompts;
use crate::scm::GitAdapter;
use crate::store::{LearningsStore, RunPaths, StateStore};
use crate::tournament::TournamentEngine;
use crate::verify::VerificationRunner;

use commit::generate_commit_message;
use review::{ReviewVerdict, run_review};

/// Outcome of the review-fix loop
enum ReviewLoopOutcome {
    Approved,
    Failed { soft: bool, phase: Phase },
}

/// Drives one task from pending to a terminal state
pub struct TaskLifecycle {
    llm: Arc<dyn LlmInvoker>,
    git: GitAdapter,
    verifier: VerificationRunner,
    engine: TournamentEngine,
    state: StateStore,
    learnings: LearningsStore,
    paths: RunPaths,
    config: Config,
}

impl TaskLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmInvoker>,
        git: GitAdapter,
        verifier: VerificationRunner,
        engine: TournamentEngine,
        state: StateStore,
        learnings: LearningsStore,
        paths: RunPaths,
        config: Config,
    ) -> Self {
        Self {
            llm,
            git,
            verifier,
            engine,
            state,
            learnings,
            paths,
            config,
        }
    }

    /// Run a task to a terminal state; the state store is updated along the
    /// way and failures never escape as errors
    pub async fn run_task(&self, task: &Task, findings: &str) -> TaskState {
        let initial_phase = match task.kind {
            TaskKind::Code => Phase::Tournament,
            _ => Phase::Build,
        };

        if let Err(e) = self
            .state
            .set(&task.id, TaskState::InProgress, Some(initial_phase), false)
            .await
        {
            error!(task = %task.id, "Failed to mark task in progress: {}", e);
            return TaskState::Failed;
        }

        info!(task = %task.id, kind = %task.kind, "Task starting");

        let outcome = match task.kind {
            TaskKind::Code => self.run_code(task, findings).await,
            TaskKind::Explore => self.run_explore(task).await,
            TaskKind::Command => self.run_command(task).await,
        };

        match outcome {
            Ok(state) => state,
            Err(e) => {
                error!(task = %task.id, "Task failed with unrecoverable error: {}", e);
                let _ = self.state.set(&task.id, TaskState::Failed, None, false).await;
                TaskState::Failed
            }
        }
    }

    /// Explore: one CLI call that writes findings.md
    ///
    /// A CLI error with non-empty findings on disk still counts as success:
    /// the work product exists.
    async fn run_explore(&self, task: &Task) -> eyre::Result<TaskState> {
        let log_dir = self.paths.task_log_dir(&task.id)?;
        let findings_path = self.paths.findings_file(&task.id);

        let request = LlmRequest::new(prompts::explore_prompt(task, &findings_path.display().to_string()))
            .with_system_prompt(prompts::EXPLORE_SYSTEM)
            .with_model(&self.config.llm.model)
            .with_max_budget(self.config.llm.call_budget)
            .with_tools(prompts::EXPLORE_TOOLS)
            .with_timeout(Duration::from_millis(self.config.llm.execution_timeout_ms))
            .with_working_dir(self.git.repo_root())
            .with_log_path(log_dir.join("explore.log"));

        let response = self.llm.invoke(&format!("{}/explore", task.id), request).await?;

        let findings_written = std::fs::read_to_string(&findings_path)
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);

        if response.success || findings_written {
            if !response.success {
                warn!(task = %task.id, "Explore CLI errored but findings exist, treating as success");
            }
            if let Err(e) = self.git.commit_all(&format!("explore: {}", task.title)).await {
                warn!(task = %task.id, "Optional explore commit failed: {}", e);
            }
            self.state
                .set(&task.id, TaskState::Completed, Some(Phase::Build), false)
                .await?;
            return Ok(TaskState::Completed);
        }

        let _ = self
            .learnings
            .record(
                &task.id,
                LearningKind::FailurePattern,
                &format!("explore failed: {}", response.result),
            )
            .await;
        self.state
            .set(&task.id, TaskState::Failed, Some(Phase::Build), false)
            .await?;
        Ok(TaskState::Failed)
    }

    /// Command: one CLI call with the full tool set
    async fn run_command(&self, task: &Task) -> eyre::Result<TaskState> {
        let log_dir = self.paths.task_log_dir(&task.id)?;

        let request = LlmRequest::new(prompts::command_prompt(task))
            .with_system_prompt(prompts::COMMAND_SYSTEM)
            .with_model(&self.config.llm.model)
            .with_max_budget(self.config.llm.call_budget)
            .with_tools(prompts::CODEBASE_TOOLS)
            .with_timeout(Duration::from_millis(self.config.llm.execution_timeout_ms))
            .with_working_dir(self.git.repo_root())
            .with_log_path(log_dir.join("command.log"));

        let response = self.llm.invoke(&format!("{}/command", task.id), request).await?;

        if response.success {
            if let Err(e) = self.git.commit_all(&format!("command: {}", task.title)).await {
                warn!(task = %task.id, "Optional command commit failed: {}", e);
            }
            self.state
                .set(&task.id, TaskState::Completed, Some(Phase::Build), false)
                .await?;
            return Ok(TaskState::Completed);
        }

        let _ = self
            .learnings
            .record(
                &task.id,
                LearningKind::FailurePattern,
                &format!("command failed: {}", response.result),
            )
            .await;
        self.state
            .set(&task.id, TaskState::Failed, Some(Phase::Build), false)
            .await?;
        Ok(TaskState::Failed)
    }

    /// Code: tournament -> verify -> review -> commit
    async fn run_code(&self, task: &Task, findings: &str) -> eyre::Result<TaskState> {
        let log_dir = self.paths.task_log_dir(&task.id)?;
        let base = self.git.head_commit().await?;
        let learnings_blob = self.learnings.context_blob().await.unwrap_or_default();

        // Phase T
        let result = match self.engine.run(task, &base, &learnings_blob, findings, &log_dir).await {
            Ok(result) => result,
            Err(e) => {
                warn!(task = %task.id, "Tournament failed: {}", e);
                let _ = self
                    .learnings
                    .record(
                        &task.id,
                        LearningKind::FailurePattern,
                        &format!("tournament failed for '{}': {}", task.title, e),
                    )
                    .await;
                self.git.hard_reset(&base).await?;
                self.state
                    .set(&task.id, TaskState::Failed, Some(Phase::Tournament), false)
                    .await?;
                return Ok(TaskState::Failed);
            }
        };
        self.state.record_tournament_metrics(&task.id, result.metrics()).await?;

        // Verify on the main tree. Failure here is non-fatal: skip review,
        // attempt the commit anyway, and let downstream tasks repair.
        self.state
            .set(&task.id, TaskState::InProgress, Some(Phase::Verify), false)
            .await?;
        let report = self.verifier.run(self.git.repo_root()).await?;
        if let Ok(json) = serde_json::to_string_pretty(&report) {
            let _ = std::fs::write(self.paths.verify_log(&task.id), json);
        }

        let verified = report.all_passed();
        if !verified {
            warn!(task = %task.id, score = report.score, "Verification failed on main tree after apply");
            let _ = self
                .learnings
                .record(
                    &task.id,
                    LearningKind::VerificationFailure,
                    &format!("post-apply verification failed: {}", report.failure_summary()),
                )
                .await;
        }

        // Review, unless verification already failed or agreement replaces it
        if verified && self.config.review.enabled {
            let shortcut = result.convergence_ratio() >= self.config.tournament.review_skip_threshold
                && result.implemented_count() >= 2;

            if shortcut {
                info!(
                    task = %task.id,
                    ratio = result.convergence_ratio(),
                    "High convergence, skipping review: independent agreement"
                );
            } else {
                match self.run_review_loop(task, &base, &log_dir).await? {
                    ReviewLoopOutcome::Approved => {}
                    ReviewLoopOutcome::Failed { soft, phase } => {
                        self.git.hard_reset(&base).await?;
                        self.state.set(&task.id, TaskState::Failed, Some(phase), soft).await?;
                        return Ok(TaskState::Failed);
                    }
                }
            }
        }

        // Commit
        self.state
            .set(&task.id, TaskState::InProgress, Some(Phase::Commit), false)
            .await?;
        let changed = self.git.changed_files(self.git.repo_root()).await.unwrap_or_default();
        let message = generate_commit_message(&self.llm, task, &changed, &self.config.llm).await;

        match self.git.commit_all(&message).await {
            Ok(_) => {
                self.state
                    .set(&task.id, TaskState::Completed, Some(Phase::Commit), false)
                    .await?;
                info!(task = %task.id, "Task completed");
                Ok(TaskState::Completed)
            }
            Err(e) => {
                warn!(task = %task.id, "Commit failed, reverting: {}", e);
                let _ = self
                    .learnings
                    .record(
                        &task.id,
                        LearningKind::FailurePattern,
                        &format!("commit failed for '{}': {}", task.title, e),
                    )
                    .await;
                self.git.hard_reset(&base).await?;
                self.state
                    .set(&task.id, TaskState::Failed, Some(Phase::Commit), false)
                    .await?;
                Ok(TaskState::Failed)
            }
        }
    }

    /// Review with a bounded fix-retry loop
    ///
    /// A fix attempt that changes nothing (pre-fix diff equals post-fix
    /// diff against the base commit) is a fixpoint: the fixer has nothing
    /// left to contribute, so the review is accepted rather than retried
    /// into a loop.
    async fn run_review_loop(&self, task: &Task, base: &str, log_dir: &std::path::Path) -> eyre::Result<ReviewLoopOutcome> {
        self.state
            .set(&task.id, TaskState::InProgress, Some(Phase::Review), false)
            .await?;

        let mut fix_attempts: u32 = 0;
        loop {
            let diff = self.git.diff_vs(base).await?;
            let outcome = run_review(&self.llm, task, &diff, &self.config.review, &self.config.llm, log_dir).await;

            if let Ok(json) = serde_json::to_string_pretty(&outcome.merged) {
                let _ = std::fs::write(self.paths.review_file(&task.id), json);
            }

            if outcome.structural_failure {
                // The only soft-failure site: no reviewer produced
                // structured output, which says nothing about the change
                warn!(task = %task.id, "Review produced no structured output");
                return Ok(ReviewLoopOutcome::Failed {
                    soft: true,
                    phase: Phase::Review,
                });
            }

            match outcome.merged.verdict {
                ReviewVerdict::Approved => {
                    info!(task = %task.id, "Review approved");
                    return Ok(ReviewLoopOutcome::Approved);
                }
                ReviewVerdict::Error => {
                    return Ok(ReviewLoopOutcome::Failed {
                        soft: true,
                        phase: Phase::Review,
                    });
                }
                ReviewVerdict::ChangesRequested => {
                    let feedback = outcome.merged.feedback_text();
                    let _ = self
                        .learnings
                        .record(&task.id, LearningKind::ReviewFeedback, &feedback)
                        .await;

                    if fix_attempts >= self.config.review.max_retries {
                        warn!(task = %task.id, fix_attempts, "Review retries exhausted");
                        return Ok(ReviewLoopOutcome::Failed {
                            soft: false,
                            phase: Phase::Review,
                        });
                    }
                    fix_attempts += 1;

                    let pre_fix = diff;
                    let request = LlmRequest::new(prompts::fix_prompt(task, &feedback))
                        .with_system_prompt(prompts::FIX_SYSTEM)
                        .with_model(&self.config.llm.model)
                        .with_max_budget(self.config.llm.call_budget)
                        .with_tools(prompts::CODEBASE_TOOLS)
                        .with_timeout(Duration::from_millis(self.config.llm.execution_timeout_ms))
                        .with_working_dir(self.git.repo_root())
                        .with_log_path(log_dir.join(format!("fix-{}.log", fix_attempts)));

                    if let Err(e) = self.llm.invoke(&format!("{}/fix-{}", task.id, fix_attempts), request).await {
                        warn!(task = %task.id, "Fix call failed: {}", e);
                    }

                    let post_fix = self.git.diff_vs(base).await?;
                    if pre_fix == post_fix {
                        info!(task = %task.id, "Fixer produced no change, accepting as approved");
                        return Ok(ReviewLoopOutcome::Approved);
                    }

                    let report = self.verifier.run(self.git.repo_root()).await?;
                    if !report.all_passed() {
                        warn!(task = %task.id, "Verification failed after review fix");
                        let _ = self
                            .learnings
                            .record(
                                &task.id,
                                LearningKind::VerificationFailure,
                                &format!("verification failed after review fix: {}", report.failure_summary()),
                            )
                            .await;
                        return Ok(ReviewLoopOutcome::Failed {
                            soft: false,
                            phase: Phase::Verify,
                        });
                    }
                }
            }
        }
    }
}
