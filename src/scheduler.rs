//! Multi-pass scheduling loop
//!
//! Each iteration recomputes the ready set from the state store and the
//! task graph, drives ready tasks through their lifecycles sequentially,
//! and stops on completion, exhaustion, breaker trip, or interrupt. The
//! iteration cap bounds runaway loops at `min(2 * |tasks|, 100)`.

use tracing::{debug, info, warn};

use crate::domain::{Phase, StopReason, Task, TaskKind, TaskQueue, TaskState};
use crate::interrupt::InterruptFlag;
use crate::lifecycle::TaskLifecycle;
use crate::store::{BudgetStore, RunPaths, StateStore};

/// Result of a scheduler run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerOutcome {
    pub reason: StopReason,
    pub iterations: u32,
}

/// Drives the whole run
pub struct Scheduler {
    lifecycle: TaskLifecycle,
    state: StateStore,
    budget: BudgetStore,
    paths: RunPaths,
    queue: TaskQueue,
    interrupt: InterruptFlag,
    budget_cap: f64,
    breaker_threshold: u32,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lifecycle: TaskLifecycle,
        state: StateStore,
        budget: BudgetStore,
        paths: RunPaths,
        queue: TaskQueue,
        interrupt: InterruptFlag,
        budget_cap: f64,
        breaker_threshold: u32,
    ) -> Self {
        Self {
            lifecycle,
            state,
            budget,
            paths,
            queue,
            interrupt,
            budget_cap,
            breaker_threshold,
        }
    }

    /// Run until every task is terminal or a stop condition fires
    pub async fn run(&self) -> eyre::Result<SchedulerOutcome> {
        let max_iterations = (2 * self.queue.len() as u32).clamp(1, 100);
        let mut iterations = 0;

        info!(tasks = self.queue.len(), max_iterations, "Scheduler starting");

        loop {
            if iterations >= max_iterations {
                warn!(iterations, "Iteration cap reached");
                return Ok(SchedulerOutcome {
                    reason: StopReason::NoProgress,
                    iterations,
                });
            }
            iterations += 1;

            if self.interrupt.is_set() {
                return Ok(SchedulerOutcome {
                    reason: StopReason::Interrupted,
                    iterations,
                });
            }

            if !self.budget.available(self.budget_cap).await? {
                warn!(cap = self.budget_cap, "Budget exhausted");
                return Ok(SchedulerOutcome {
                    reason: StopReason::BudgetExhausted,
                    iterations,
                });
            }

            let (ready, mut progress) = self.compute_ready_set().await?;
            debug!(iteration = iterations, ready = ready.len(), "Computed ready set");

            if ready.is_empty() {
                let counts = self.state.counts().await?;
                if counts.pending + counts.blocked + counts.in_progress == 0 {
                    info!(iterations, "All tasks terminal");
                    return Ok(SchedulerOutcome {
                        reason: StopReason::AllComplete,
                        iterations,
                    });
                }
            }

            for task in &ready {
                if self.interrupt.is_set() {
                    return Ok(SchedulerOutcome {
                        reason: StopReason::Interrupted,
                        iterations,
                    });
                }

                let failures = self.state.consecutive_failures().await?;
                if failures >= self.breaker_threshold {
                    warn!(failures, "Circuit breaker tripped");
                    return Ok(SchedulerOutcome {
                        reason: StopReason::CircuitBreaker,
                        iterations,
                    });
                }

                let findings = self.collect_dependency_findings(task);
                let terminal = self.lifecycle.run_task(task, &findings).await;
                debug!(task = %task.id, state = %terminal, "Task reached terminal state");
                progress = true;
            }

            if !progress {
                let counts = self.state.counts().await?;
                if counts.pending + counts.blocked + counts.in_progress > 0 {
                    warn!("No progress with non-terminal tasks remaining");
                    return Ok(SchedulerOutcome {
                        reason: StopReason::NoProgress,
                        iterations,
                    });
                }
            }
        }
    }

    /// Single pass over the queue: promote unblocked tasks, demote blocked
    /// ones, and collect what is runnable. Promotions and demotions count
    /// as progress for the no-progress detector.
    async fn compute_ready_set(&self) -> eyre::Result<(Vec<Task>, bool)> {
        let mut ready = Vec::new();
        let mut progress = false;

        for task in &self.queue.tasks {
            let status = self
                .state
                .get(&task.id)
                .await?
                .ok_or_else(|| eyre::eyre!("Task {} missing from state store", task.id))?;

            match status.status {
                TaskState::Completed | TaskState::Failed | TaskState::InProgress => continue,

                TaskState::Blocked => {
                    if self.state.dependencies_met(&task.depends_on).await? {
                        self.state.set_status(&task.id, TaskState::Pending).await?;
                        progress = true;
                        ready.push(task.clone());
                    }
                }

                TaskState::Pending => {
                    if self.state.dependencies_met(&task.depends_on).await? {
                        ready.push(task.clone());
                    } else {
                        self.state.set_status(&task.id, TaskState::Blocked).await?;
                        progress = true;
                    }
                }
            }
        }

        Ok((ready, progress))
    }

    /// Concatenate findings.md from explore-kind dependencies
    fn collect_dependency_findings(&self, task: &Task) -> String {
        let mut findings = String::new();

        for dep in &task.depends_on {
            let Some(dep_task) = self.queue.task(dep) else { continue };
            if dep_task.kind != TaskKind::Explore {
                continue;
            }

            let path = self.paths.findings_file(dep);
            if let Ok(content) = std::fs::read_to_string(&path)
                && !content.trim().is_empty()
            {
                findings.push_str(&format!("### Findings from {}\n{}\n", dep, content));
            }
        }

        findings
    }
}

/// Resolve tasks left `in_progress` by a crash or interrupt
///
/// Explore tasks whose findings file exists non-empty effectively finished;
/// everything else cannot resume mid-flight and re-runs from pending.
pub async fn resume_in_progress(state: &StateStore, queue: &TaskQueue, paths: &RunPaths) -> eyre::Result<usize> {
    let stuck = state.by_status(&[TaskState::InProgress]).await?;
    let mut resolved = 0;

    for id in stuck {
        let is_explore = queue.task(&id).map(|t| t.kind == TaskKind::Explore).unwrap_or(false);
        let findings_written = is_explore
            && std::fs::read_to_string(paths.findings_file(&id))
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false);

        if findings_written {
            info!(task = %id, "Resume: findings exist, promoting to completed");
            state.set(&id, TaskState::Completed, Some(Phase::Build), false).await?;
        } else {
            info!(task = %id, "Resume: demoting interrupted task to pending");
            state.set_status(&id, TaskState::Pending).await?;
        }
        resolved += 1;
    }

    if resolved > 0 {
        info!(resolved, "Resolved in-progress tasks from previous run");
    }
    Ok(resolved)
}
