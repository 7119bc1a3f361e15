//! StateStore - actor that owns the run state
//!
//! Processes commands via channels so read-modify-write cycles on
//! `state.json` are serialized. Handles are cheap clones.

use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{Phase, RunState, StateCounts, TaskState, TaskStatus, TournamentMetrics};

/// Errors from state store operations
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Unknown task: {0}")]
    NotFound(String),

    #[error("State store channel closed")]
    ChannelError,

    #[error("State store I/O error: {0}")]
    Io(String),
}

type Reply<T> = oneshot::Sender<Result<T, StateError>>;

enum StateCommand {
    Get {
        id: String,
        reply: Reply<Option<TaskStatus>>,
    },
    Set {
        id: String,
        status: TaskState,
        phase: Option<Phase>,
        soft_failure: bool,
        reply: Reply<()>,
    },
    ConsecutiveFailures {
        reply: Reply<u32>,
    },
    DependenciesMet {
        deps: Vec<String>,
        reply: Reply<bool>,
    },
    ByStatus {
        subset: Vec<TaskState>,
        reply: Reply<Vec<String>>,
    },
    Counts {
        reply: Reply<StateCounts>,
    },
    ResetFailedAndBlocked {
        reply: Reply<usize>,
    },
    RecordTournamentMetrics {
        id: String,
        metrics: TournamentMetrics,
        reply: Reply<()>,
    },
    SetTotalCost {
        total: f64,
        reply: Reply<()>,
    },
    SetPrUrl {
        url: String,
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<RunState>,
    },
    Shutdown,
}

/// Handle to the state store actor
#[derive(Clone)]
pub struct StateStore {
    tx: mpsc::Sender<StateCommand>,
}

impl StateStore {
    /// Initialize a fresh run: every task starts `pending`
    pub fn init(path: PathBuf, task_ids: &[String]) -> eyre::Result<Self> {
        debug!(path = %path.display(), tasks = task_ids.len(), "StateStore::init: called");
        let state = RunState::new(task_ids);
        persist(&path, &state).map_err(|e| eyre::eyre!("Failed to write initial state: {}", e))?;
        Ok(Self::spawn(path, state))
    }

    /// Load an existing `state.json`
    pub fn load(path: PathBuf) -> eyre::Result<Self> {
        debug!(path = %path.display(), "StateStore::load: called");
        let content = std::fs::read_to_string(&path)?;
        let state: RunState = serde_json::from_str(&content)?;
        info!(tasks = state.tasks_status.len(), "Loaded run state");
        Ok(Self::spawn(path, state))
    }

    fn spawn(path: PathBuf, state: RunState) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(path, state, rx));
        Self { tx }
    }

    async fn send<T>(&self, build: impl FnOnce(Reply<T>) -> StateCommand) -> Result<T, StateError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Get one task's status
    pub async fn get(&self, id: &str) -> Result<Option<TaskStatus>, StateError> {
        self.send(|reply| StateCommand::Get {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Set a task's status and optionally its phase
    ///
    /// `completed` stamps `completed_at` and zeroes the consecutive-failure
    /// counter. `failed` increments the counter unless `soft_failure`.
    pub async fn set(
        &self,
        id: &str,
        status: TaskState,
        phase: Option<Phase>,
        soft_failure: bool,
    ) -> Result<(), StateError> {
        debug!(%id, %status, ?phase, soft_failure, "StateStore::set: called");
        self.send(|reply| StateCommand::Set {
            id: id.to_string(),
            status,
            phase,
            soft_failure,
            reply,
        })
        .await
    }

    /// Shorthand for a status-only transition
    pub async fn set_status(&self, id: &str, status: TaskState) -> Result<(), StateError> {
        self.set(id, status, None, false).await
    }

    /// Current consecutive hard-failure count
    pub async fn consecutive_failures(&self) -> Result<u32, StateError> {
        self.send(|reply| StateCommand::ConsecutiveFailures { reply }).await
    }

    /// True iff every listed dependency is `completed`
    pub async fn dependencies_met(&self, deps: &[String]) -> Result<bool, StateError> {
        self.send(|reply| StateCommand::DependenciesMet {
            deps: deps.to_vec(),
            reply,
        })
        .await
    }

    /// Ids of tasks whose status is in `subset`, in id order
    pub async fn by_status(&self, subset: &[TaskState]) -> Result<Vec<String>, StateError> {
        self.send(|reply| StateCommand::ByStatus {
            subset: subset.to_vec(),
            reply,
        })
        .await
    }

    /// Task counts by state
    pub async fn counts(&self) -> Result<StateCounts, StateError> {
        self.send(|reply| StateCommand::Counts { reply }).await
    }

    /// Promote all failed and blocked tasks back to pending, clearing their
    /// phase and zeroing the failure counter
    pub async fn reset_failed_and_blocked(&self) -> Result<usize, StateError> {
        self.send(|reply| StateCommand::ResetFailedAndBlocked { reply }).await
    }

    /// Attach tournament metrics to a task (written once per attempt)
    pub async fn record_tournament_metrics(&self, id: &str, metrics: TournamentMetrics) -> Result<(), StateError> {
        self.send(|reply| StateCommand::RecordTournamentMetrics {
            id: id.to_string(),
            metrics,
            reply,
        })
        .await
    }

    /// Mirror the budget total into the run state (called by the budget
    /// store inside its own serialized section)
    pub async fn set_total_cost(&self, total: f64) -> Result<(), StateError> {
        self.send(|reply| StateCommand::SetTotalCost { total, reply }).await
    }

    pub async fn set_pr_url(&self, url: &str) -> Result<(), StateError> {
        self.send(|reply| StateCommand::SetPrUrl {
            url: url.to_string(),
            reply,
        })
        .await
    }

    /// Full copy of the current run state
    pub async fn snapshot(&self) -> Result<RunState, StateError> {
        self.send(|reply| StateCommand::Snapshot { reply }).await
    }

    /// Shutdown the actor
    pub async fn shutdown(&self) -> Result<(), StateError> {
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

fn persist(path: &PathBuf, state: &RunState) -> Result<(), StateError> {
    let json = serde_json::to_string_pretty(state).map_err(|e| StateError::Io(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| StateError::Io(e.to_string()))
}

async fn actor_loop(path: PathBuf, mut state: RunState, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateStore actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::Get { id, reply } => {
                let _ = reply.send(Ok(state.tasks_status.get(&id).cloned()));
            }

            StateCommand::Set {
                id,
                status,
                phase,
                soft_failure,
                reply,
            } => {
                let result = apply_set(&mut state, &id, status, phase, soft_failure)
                    .and_then(|_| persist(&path, &state));
                let _ = reply.send(result);
            }

            StateCommand::ConsecutiveFailures { reply } => {
                let _ = reply.send(Ok(state.consecutive_failures));
            }

            StateCommand::DependenciesMet { deps, reply } => {
                let met = deps.iter().all(|dep| {
                    state
                        .tasks_status
                        .get(dep)
                        .map(|s| s.status == TaskState::Completed)
                        .unwrap_or(false)
                });
                let _ = reply.send(Ok(met));
            }

            StateCommand::ByStatus { subset, reply } => {
                let wanted: HashSet<TaskState> = subset.into_iter().collect();
                let ids = state
                    .tasks_status
                    .iter()
                    .filter(|(_, s)| wanted.contains(&s.status))
                    .map(|(id, _)| id.clone())
                    .collect();
                let _ = reply.send(Ok(ids));
            }

            StateCommand::Counts { reply } => {
                let _ = reply.send(Ok(state.counts()));
            }

            StateCommand::ResetFailedAndBlocked { reply } => {
                let mut promoted = 0;
                for status in state.tasks_status.values_mut() {
                    if matches!(status.status, TaskState::Failed | TaskState::Blocked) {
                        status.status = TaskState::Pending;
                        status.phase = None;
                        promoted += 1;
                    }
                }
                state.consecutive_failures = 0;
                if promoted > 0 {
                    state.last_updated = chrono::Utc::now();
                }
                info!(promoted, "Reset failed and blocked tasks to pending");
                let result = persist(&path, &state).map(|_| promoted);
                let _ = reply.send(result);
            }

            StateCommand::RecordTournamentMetrics { id, metrics, reply } => {
                let result = match state.tasks_status.get_mut(&id) {
                    Some(status) => {
                        status.tournament_metrics = Some(metrics);
                        state.last_updated = chrono::Utc::now();
                        persist(&path, &state)
                    }
                    None => Err(StateError::NotFound(id)),
                };
                let _ = reply.send(result);
            }

            StateCommand::SetTotalCost { total, reply } => {
                state.total_cost = total;
                state.last_updated = chrono::Utc::now();
                let _ = reply.send(persist(&path, &state));
            }

            StateCommand::SetPrUrl { url, reply } => {
                state.pr_url = Some(url);
                state.last_updated = chrono::Utc::now();
                let _ = reply.send(persist(&path, &state));
            }

            StateCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(state.clone()));
            }

            StateCommand::Shutdown => {
                debug!("StateStore actor shutting down");
                break;
            }
        }
    }

    debug!("StateStore actor stopped");
}

fn apply_set(
    state: &mut RunState,
    id: &str,
    status: TaskState,
    phase: Option<Phase>,
    soft_failure: bool,
) -> Result<(), StateError> {
    let entry = state
        .tasks_status
        .get_mut(id)
        .ok_or_else(|| StateError::NotFound(id.to_string()))?;

    entry.status = status;
    if phase.is_some() {
        entry.phase = phase;
    }

    match status {
        TaskState::Completed => {
            entry.completed_at = Some(chrono::Utc::now());
            state.consecutive_failures = 0;
        }
        TaskState::Failed => {
            if soft_failure {
                warn!(%id, "Task failed softly; circuit breaker unchanged");
            } else {
                state.consecutive_failures += 1;
            }
        }
        _ => {}
    }

    state.last_updated = chrono::Utc::now();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("task-{:03}", i)).collect()
    }

    #[tokio::test]
    async fn test_init_all_pending() {
        let temp = tempdir().unwrap();
        let store = StateStore::init(temp.path().join("state.json"), &ids(3)).unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.pending, 3);
        assert_eq!(counts.total(), 3);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_completed_stamps_and_resets_counter() {
        let temp = tempdir().unwrap();
        let store = StateStore::init(temp.path().join("state.json"), &ids(2)).unwrap();

        store.set("task-001", TaskState::Failed, None, false).await.unwrap();
        assert_eq!(store.consecutive_failures().await.unwrap(), 1);

        store
            .set("task-002", TaskState::Completed, Some(Phase::Commit), false)
            .await
            .unwrap();
        assert_eq!(store.consecutive_failures().await.unwrap(), 0);

        let status = store.get("task-002").await.unwrap().unwrap();
        assert!(status.completed_at.is_some());
        assert_eq!(status.phase, Some(Phase::Commit));

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_soft_failure_skips_counter() {
        let temp = tempdir().unwrap();
        let store = StateStore::init(temp.path().join("state.json"), &ids(2)).unwrap();

        store.set("task-001", TaskState::Failed, None, true).await.unwrap();
        assert_eq!(store.consecutive_failures().await.unwrap(), 0);

        store.set("task-002", TaskState::Failed, None, false).await.unwrap();
        assert_eq!(store.consecutive_failures().await.unwrap(), 1);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dependencies_met() {
        let temp = tempdir().unwrap();
        let store = StateStore::init(temp.path().join("state.json"), &ids(3)).unwrap();

        let deps = vec!["task-001".to_string(), "task-002".to_string()];
        assert!(!store.dependencies_met(&deps).await.unwrap());

        store.set_status("task-001", TaskState::Completed).await.unwrap();
        assert!(!store.dependencies_met(&deps).await.unwrap());

        store.set_status("task-002", TaskState::Completed).await.unwrap();
        assert!(store.dependencies_met(&deps).await.unwrap());

        // Empty dependency list is vacuously met
        assert!(store.dependencies_met(&[]).await.unwrap());

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_failed_and_blocked() {
        let temp = tempdir().unwrap();
        let store = StateStore::init(temp.path().join("state.json"), &ids(3)).unwrap();

        store.set_status("task-001", TaskState::Failed).await.unwrap();
        store.set_status("task-002", TaskState::Blocked).await.unwrap();
        store.set_status("task-003", TaskState::Completed).await.unwrap();

        let promoted = store.reset_failed_and_blocked().await.unwrap();
        assert_eq!(promoted, 2);
        assert_eq!(store.consecutive_failures().await.unwrap(), 0);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.completed, 1);

        // Second invocation is a no-op
        let promoted = store.reset_failed_and_blocked().await.unwrap();
        assert_eq!(promoted, 0);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");

        let store = StateStore::init(path.clone(), &ids(2)).unwrap();
        store
            .set("task-001", TaskState::Completed, Some(Phase::Commit), false)
            .await
            .unwrap();
        store.record_tournament_metrics("task-001", TournamentMetrics::default()).await.unwrap();
        store.shutdown().await.unwrap();

        let reloaded = StateStore::load(path).unwrap();
        let status = reloaded.get("task-001").await.unwrap().unwrap();
        assert_eq!(status.status, TaskState::Completed);
        assert!(status.tournament_metrics.is_some());

        reloaded.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_task_rejected() {
        let temp = tempdir().unwrap();
        let store = StateStore::init(temp.path().join("state.json"), &ids(1)).unwrap();

        let result = store.set_status("task-099", TaskState::Completed).await;
        assert!(matches!(result, Err(StateError::NotFound(_))));

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_by_status() {
        let temp = tempdir().unwrap();
        let store = StateStore::init(temp.path().join("state.json"), &ids(3)).unwrap();

        store.set_status("task-002", TaskState::Failed).await.unwrap();

        let failed = store.by_status(&[TaskState::Failed]).await.unwrap();
        assert_eq!(failed, vec!["task-002".to_string()]);

        let open = store.by_status(&[TaskState::Pending, TaskState::Failed]).await.unwrap();
        assert_eq!(open.len(), 3);

        store.shutdown().await.unwrap();
    }
}
