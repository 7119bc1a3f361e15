//! Tournament execution
//!
//! Competitors run concurrently in detached worktrees under an OS temp
//! directory. The temp parent must live outside the project tree: some LLM
//! CLIs walk upward looking for a configuration directory and would resolve
//! paths back into the main tree, corrupting it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, TournamentConfig};
use crate::domain::{Complexity, Task};
use crate::llm::{LlmInvoker, LlmRequest};
use crate::prompts;
use crate::scm::{GitAdapter, count_diff_lines};
use crate::verify::VerificationRunner;

use super::convergence::analyze_convergence;
use super::selection::{ConvergenceVerdict, candidate_pool, parse_judge_verdict, sort_score_then_cost};
use super::{CompetitorResult, SYNTHESIS_STRATEGY, SynthesisInfo, TournamentError, TournamentResult};

/// Runs tournaments for code tasks
pub struct TournamentEngine {
    llm: Arc<dyn LlmInvoker>,
    git: GitAdapter,
    verifier: VerificationRunner,
    tournament: TournamentConfig,
    llm_config: LlmConfig,
}

/// Winner picked by one of the three selection stages
struct SelectedWinner {
    id: String,
    strategy: String,
    score: u32,
    diff_lines: usize,
    worktree: PathBuf,
    changed_files: Vec<String>,
}

impl TournamentEngine {
    pub fn new(
        llm: Arc<dyn LlmInvoker>,
        git: GitAdapter,
        verifier: VerificationRunner,
        tournament: TournamentConfig,
        llm_config: LlmConfig,
    ) -> Self {
        Self {
            llm,
            git,
            verifier,
            tournament,
            llm_config,
        }
    }

    /// Competitor count by task complexity, clamped to the strategy list
    pub fn competitor_count(&self, complexity: Complexity) -> usize {
        let by_complexity = match complexity {
            Complexity::Trivial => 1,
            Complexity::Standard => 2.min(self.tournament.max_competitors),
            Complexity::Complex => self.tournament.max_competitors,
        };
        by_complexity.min(self.tournament.strategies.len()).max(1)
    }

    /// Run a tournament for `task` from `base_commit`
    ///
    /// On success the winner is applied to the main tree; on failure the
    /// main tree is untouched. Worktrees and the temp parent are removed on
    /// every exit path.
    pub async fn run(
        &self,
        task: &Task,
        base_commit: &str,
        learnings: &str,
        findings: &str,
        log_dir: &Path,
    ) -> Result<TournamentResult, TournamentError> {
        let temp = tempfile::Builder::new().prefix("convergent-").tempdir()?;
        info!(task = %task.id, parent = %temp.path().display(), "Tournament starting");

        let result = self
            .run_inner(task, base_commit, learnings, findings, log_dir, temp.path())
            .await;

        self.cleanup_worktrees(temp.path()).await;
        result
    }

    async fn run_inner(
        &self,
        task: &Task,
        base_commit: &str,
        learnings: &str,
        findings: &str,
        log_dir: &Path,
        parent: &Path,
    ) -> Result<TournamentResult, TournamentError> {
        let count = self.competitor_count(task.complexity);
        let strategies: Vec<String> = self.tournament.strategies.iter().take(count).cloned().collect();
        debug!(task = %task.id, count, ?strategies, "Launching competitors");

        let mut worktrees = Vec::with_capacity(count);
        for i in 0..count {
            let path = parent.join(format!("competitor-{}", i));
            self.git.worktree_add_detached(&path, base_commit).await?;
            worktrees.push(path);
        }

        let futures = strategies.iter().enumerate().map(|(i, strategy)| {
            self.run_competitor(task, i, strategy, worktrees[i].clone(), learnings, findings, log_dir)
        });
        let competitors: Vec<CompetitorResult> = futures::future::join_all(futures).await;

        for competitor in &competitors {
            if let Ok(json) = serde_json::to_string_pretty(competitor) {
                let path = log_dir.join(format!("{}.json", competitor.id));
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(path = %path.display(), "Failed to write competitor log: {}", e);
                }
            }
        }

        let mut total_cost: f64 = competitors.iter().map(|c| c.cost).sum();
        let convergence = analyze_convergence(&competitors);
        let ratio = convergence.as_ref().map(|c| c.ratio).unwrap_or(0.0);

        let candidates = candidate_pool(&competitors);
        if candidates.is_empty() {
            warn!(task = %task.id, "Tournament produced no candidates");
            return Err(TournamentError::NoCandidates);
        }
        info!(task = %task.id, candidates = candidates.len(), ratio, "Selecting winner");

        let mut synthesis_info: Option<SynthesisInfo> = None;
        let mut judge_rationale: Option<String> = None;
        let mut winner: Option<SelectedWinner> = None;

        // Stage 1: synthesis, only when convergence justifies it
        if candidates.len() >= 2 && ratio >= self.tournament.synthesis_threshold {
            let (info, cost, selected) = self
                .try_synthesis(task, base_commit, &candidates, log_dir, parent)
                .await?;
            total_cost += cost;
            synthesis_info = Some(info);
            winner = selected;
        }

        // Stage 2: judge over candidates with non-empty diffs
        if winner.is_none() {
            let judged: Vec<&&CompetitorResult> = candidates.iter().filter(|c| !c.diff.is_empty()).collect();
            if judged.len() >= 2 {
                let diffs: Vec<(String, String)> =
                    judged.iter().map(|c| (c.id.clone(), c.diff.clone())).collect();
                let ids: Vec<&str> = judged.iter().map(|c| c.id.as_str()).collect();

                let request = LlmRequest::new(prompts::judge_prompt(task, &diffs))
                    .with_system_prompt(prompts::JUDGE_SYSTEM)
                    .with_model(&self.llm_config.judge_model)
                    .with_max_budget(self.llm_config.call_budget)
                    .with_schema(judge_schema())
                    .with_timeout(Duration::from_millis(self.llm_config.call_timeout_ms))
                    .with_working_dir(self.git.repo_root())
                    .with_log_path(log_dir.join("judge.log"));

                match self.llm.invoke(&format!("{}/judge", task.id), request).await {
                    Ok(response) => {
                        total_cost += response.cost;
                        if response.success
                            && let Some((id, rationale)) = parse_judge_verdict(response.structured.as_ref(), &ids)
                        {
                            let picked = judged.iter().find(|c| c.id == id).unwrap();
                            info!(task = %task.id, winner = %id, "Judge selected a winner");
                            judge_rationale = Some(rationale);
                            winner = Some(SelectedWinner {
                                id: picked.id.clone(),
                                strategy: picked.strategy.clone(),
                                score: picked.score,
                                diff_lines: picked.diff_lines,
                                worktree: picked.worktree.clone(),
                                changed_files: picked.changed_files.clone(),
                            });
                        }
                    }
                    Err(e) => warn!(task = %task.id, "Judge call failed, falling through: {}", e),
                }
            }
        }

        // Stage 3: deterministic fallback
        let winner = match winner {
            Some(w) => w,
            None => {
                let sorted = sort_score_then_cost(&candidates);
                let picked = sorted[0];
                debug!(task = %task.id, winner = %picked.id, "Score-then-cost fallback");
                SelectedWinner {
                    id: picked.id.clone(),
                    strategy: picked.strategy.clone(),
                    score: picked.score,
                    diff_lines: picked.diff_lines,
                    worktree: picked.worktree.clone(),
                    changed_files: picked.changed_files.clone(),
                }
            }
        };

        self.apply_winner(&winner.worktree, &winner.changed_files).await?;
        info!(
            task = %task.id,
            winner = %winner.id,
            strategy = %winner.strategy,
            score = winner.score,
            "Applied winning implementation"
        );

        let result = TournamentResult {
            winner_id: winner.id,
            winner_strategy: winner.strategy,
            winner_score: winner.score,
            winner_diff_lines: winner.diff_lines,
            competitors,
            convergence,
            judge_rationale,
            synthesis: synthesis_info,
            total_cost,
        };

        if let Ok(json) = serde_json::to_string_pretty(&result) {
            let path = log_dir.join("tournament.json");
            if let Err(e) = std::fs::write(&path, json) {
                warn!(path = %path.display(), "Failed to write tournament log: {}", e);
            }
        }

        Ok(result)
    }

    async fn run_competitor(
        &self,
        task: &Task,
        index: usize,
        strategy: &str,
        worktree: PathBuf,
        learnings: &str,
        findings: &str,
        log_dir: &Path,
    ) -> CompetitorResult {
        // Stagger launches to avoid process-spawn contention
        if index > 0 && self.tournament.stagger_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.tournament.stagger_ms * index as u64)).await;
        }

        let id = format!("competitor-{}", index);
        let mut result = CompetitorResult {
            id: id.clone(),
            strategy: strategy.to_string(),
            implemented: false,
            changed_files: Vec::new(),
            score: 0,
            cost: 0.0,
            diff: String::new(),
            diff_lines: 0,
            worktree: worktree.clone(),
            error: None,
        };

        let request = LlmRequest::new(prompts::competitor_prompt(task, learnings, findings))
            .with_system_prompt(prompts::strategy_system_prompt(strategy))
            .with_model(&self.llm_config.model)
            .with_max_budget(self.llm_config.call_budget)
            .with_tools(prompts::CODEBASE_TOOLS)
            .with_timeout(Duration::from_millis(self.llm_config.execution_timeout_ms))
            .with_working_dir(&worktree)
            .with_log_path(log_dir.join(format!("{}.log", id)));

        let label = format!("{}/{}", task.id, id);
        match self.llm.invoke(&label, request).await {
            Ok(response) => {
                result.cost = response.cost;
                if !response.success {
                    result.error = Some(response.result.clone());
                }
            }
            Err(e) => {
                warn!(%label, "Competitor CLI call failed: {}", e);
                result.error = Some(e.to_string());
                return result;
            }
        }

        // Score whatever landed in the worktree, even after a CLI error
        match self.git.changed_files(&worktree).await {
            Ok(files) if files.is_empty() => {
                debug!(%label, "Competitor changed nothing");
            }
            Ok(files) => {
                result.implemented = true;
                result.changed_files = files;

                match self.verifier.run(&worktree).await {
                    Ok(report) => result.score = report.score,
                    Err(e) => warn!(%label, "Verification failed to run: {}", e),
                }

                match self.git.worktree_diff(&worktree).await {
                    Ok(diff) => {
                        result.diff_lines = count_diff_lines(&diff);
                        result.diff = diff;
                    }
                    Err(e) => warn!(%label, "Failed to read competitor diff: {}", e),
                }
            }
            Err(e) => {
                warn!(%label, "Failed to list changed files: {}", e);
                result.error = Some(e.to_string());
            }
        }

        info!(
            %label,
            implemented = result.implemented,
            score = result.score,
            files = result.changed_files.len(),
            "Competitor finished"
        );
        result
    }

    /// Stage 1: semantic convergence analysis, then a synthesis attempt
    /// whose output is adopted only when it matches or beats the best
    /// individual candidate
    async fn try_synthesis(
        &self,
        task: &Task,
        base_commit: &str,
        candidates: &[&CompetitorResult],
        log_dir: &Path,
        parent: &Path,
    ) -> Result<(SynthesisInfo, f64, Option<SelectedWinner>), TournamentError> {
        let mut info = SynthesisInfo {
            attempted: true,
            ..Default::default()
        };
        let mut cost = 0.0;

        let diffs: Vec<(String, String)> = candidates.iter().map(|c| (c.id.clone(), c.diff.clone())).collect();

        let request = LlmRequest::new(prompts::convergence_prompt(task, &diffs))
            .with_system_prompt(prompts::CONVERGENCE_SYSTEM)
            .with_model(&self.llm_config.judge_model)
            .with_max_budget(self.llm_config.call_budget)
            .with_schema(convergence_schema())
            .with_timeout(Duration::from_millis(self.llm_config.call_timeout_ms))
            .with_working_dir(self.git.repo_root())
            .with_log_path(log_dir.join("convergence-analysis.log"));

        let verdict = match self.llm.invoke(&format!("{}/convergence-analysis", task.id), request).await {
            Ok(response) => {
                cost += response.cost;
                if response.success {
                    ConvergenceVerdict::parse(response.structured.as_ref())
                } else {
                    debug!(task = %task.id, "Convergence analysis errored, not viable");
                    ConvergenceVerdict::default()
                }
            }
            Err(e) => {
                warn!(task = %task.id, "Convergence analysis call failed: {}", e);
                ConvergenceVerdict::default()
            }
        };

        info.viable = verdict.synthesis_viable;
        info.convergent_patterns = verdict.convergent_patterns.clone();
        info.divergent_approaches = verdict.divergent_approaches.clone();

        if !verdict.synthesis_viable {
            debug!(task = %task.id, "Synthesis not viable, falling through");
            return Ok((info, cost, None));
        }

        let synth_worktree = parent.join("synthesis");
        self.git.worktree_add_detached(&synth_worktree, base_commit).await?;

        let request = LlmRequest::new(prompts::synthesis_prompt(
            task,
            &diffs,
            &verdict.convergent_patterns,
            &verdict.divergent_approaches,
        ))
        .with_system_prompt(prompts::SYNTHESIS_SYSTEM)
        .with_model(&self.llm_config.model)
        .with_max_budget(self.llm_config.call_budget)
        .with_tools(prompts::CODEBASE_TOOLS)
        .with_timeout(Duration::from_millis(self.llm_config.execution_timeout_ms))
        .with_working_dir(&synth_worktree)
        .with_log_path(log_dir.join("synthesis.log"));

        match self.llm.invoke(&format!("{}/synthesis", task.id), request).await {
            Ok(response) => cost += response.cost,
            Err(e) => {
                warn!(task = %task.id, "Synthesis call failed: {}", e);
                info.fallback = true;
                return Ok((info, cost, None));
            }
        }

        let changed = self.git.changed_files(&synth_worktree).await?;
        if changed.is_empty() {
            debug!(task = %task.id, "Synthesis changed nothing, falling back");
            info.fallback = true;
            return Ok((info, cost, None));
        }

        let report = self
            .verifier
            .run(&synth_worktree)
            .await
            .map_err(|e| TournamentError::Verification(e.to_string()))?;
        info.score = Some(report.score);

        let max_candidate_score = candidates.iter().map(|c| c.score).max().unwrap_or(0);
        if report.score < max_candidate_score {
            info!(
                task = %task.id,
                synthesis_score = report.score,
                max_candidate_score,
                "Synthesis scored below best candidate, falling back"
            );
            info.fallback = true;
            return Ok((info, cost, None));
        }

        let diff = self.git.worktree_diff(&synth_worktree).await?;
        info.succeeded = true;
        info.rationale = Some(format!(
            "synthesis of {} candidates at convergence; score {} vs best candidate {}",
            candidates.len(),
            report.score,
            max_candidate_score
        ));

        let winner = SelectedWinner {
            id: SYNTHESIS_STRATEGY.to_string(),
            strategy: SYNTHESIS_STRATEGY.to_string(),
            score: report.score,
            diff_lines: count_diff_lines(&diff),
            worktree: synth_worktree,
            changed_files: changed,
        };
        Ok((info, cost, Some(winner)))
    }

    /// Copy the winning subtree into the main tree, file by file; files the
    /// winner deleted are removed
    async fn apply_winner(&self, source: &Path, changed_files: &[String]) -> Result<(), TournamentError> {
        for rel in changed_files {
            let from = source.join(rel);
            let to = self.git.repo_root().join(rel);

            if from.exists() {
                if let Some(parent) = to.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&from, &to)?;
                debug!(file = %rel, "Applied winner file");
            } else if to.exists() {
                std::fs::remove_file(&to)?;
                debug!(file = %rel, "Removed file deleted by winner");
            }
        }
        Ok(())
    }

    async fn cleanup_worktrees(&self, parent: &Path) {
        let entries = match std::fs::read_dir(parent) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir()
                && let Err(e) = self.git.worktree_remove(&path).await
            {
                warn!(path = %path.display(), "Failed to remove worktree: {}", e);
            }
        }
        debug!(parent = %parent.display(), "Tournament worktrees cleaned up");
    }
}

fn convergence_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "convergent_patterns": {"type": "array", "items": {"type": "string"}},
            "divergent_approaches": {"type": "array", "items": {"type": "string"}},
            "synthesis_viable": {"type": "boolean"},
        },
        "required": ["synthesis_viable"],
    })
}

fn judge_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "winner": {"type": "string"},
            "rationale": {"type": "string"},
        },
        "required": ["winner"],
    })
}
