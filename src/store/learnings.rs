//! LearningsStore - de-duplicated record of feedback and failure patterns
//!
//! Entries feed a context blob into future competitor prompts. Two entries
//! of the same kind are considered duplicates when their case-folded token
//! sets overlap at Jaccard >= 0.8, or when one summary contains the other.

use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::{Learning, LearningKind};

use super::state::StateError;

/// Similarity at or above which two summaries are duplicates
pub const DUPLICATE_THRESHOLD: f64 = 0.8;

type Reply<T> = oneshot::Sender<Result<T, StateError>>;

enum LearningsCommand {
    Record { learning: Learning, reply: Reply<bool> },
    ContextBlob { reply: Reply<String> },
    All { reply: Reply<Vec<Learning>> },
    Shutdown,
}

/// Handle to the learnings store actor
#[derive(Clone)]
pub struct LearningsStore {
    tx: mpsc::Sender<LearningsCommand>,
}

impl LearningsStore {
    /// Start with an empty log
    pub fn init(path: PathBuf) -> eyre::Result<Self> {
        let entries: Vec<Learning> = Vec::new();
        persist(&path, &entries).map_err(|e| eyre::eyre!("Failed to write initial learnings: {}", e))?;
        Ok(Self::spawn(path, entries))
    }

    /// Load an existing `learnings.json`
    pub fn load(path: PathBuf) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let entries: Vec<Learning> = serde_json::from_str(&content)?;
        info!(entries = entries.len(), "Loaded learnings");
        Ok(Self::spawn(path, entries))
    }

    fn spawn(path: PathBuf, entries: Vec<Learning>) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(actor_loop(path, entries, rx));
        Self { tx }
    }

    /// Record a learning; returns false when it was dropped as a duplicate
    pub async fn record(&self, task_id: &str, kind: LearningKind, summary: &str) -> Result<bool, StateError> {
        debug!(%task_id, %kind, "LearningsStore::record: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LearningsCommand::Record {
                learning: Learning::new(task_id, kind, summary),
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Context blob for competitor prompts; empty string when no entries
    pub async fn context_blob(&self) -> Result<String, StateError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LearningsCommand::ContextBlob { reply: reply_tx })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// All recorded entries
    pub async fn all(&self) -> Result<Vec<Learning>, StateError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LearningsCommand::All { reply: reply_tx })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    pub async fn shutdown(&self) -> Result<(), StateError> {
        self.tx
            .send(LearningsCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

/// Case-folded token-set Jaccard similarity
pub fn token_similarity(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<String> = a.to_lowercase().split_whitespace().map(str::to_string).collect();
    let tokens_b: HashSet<String> = b.to_lowercase().split_whitespace().map(str::to_string).collect();

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

/// Duplicate test: token similarity or case-folded substring containment
pub fn is_duplicate(a: &str, b: &str) -> bool {
    if token_similarity(a, b) >= DUPLICATE_THRESHOLD {
        return true;
    }
    let (fa, fb) = (a.to_lowercase(), b.to_lowercase());
    fa.contains(&fb) || fb.contains(&fa)
}

fn persist(path: &PathBuf, entries: &[Learning]) -> Result<(), StateError> {
    let json = serde_json::to_string_pretty(entries).map_err(|e| StateError::Io(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| StateError::Io(e.to_string()))
}

async fn actor_loop(path: PathBuf, mut entries: Vec<Learning>, mut rx: mpsc::Receiver<LearningsCommand>) {
    debug!("LearningsStore actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            LearningsCommand::Record { learning, reply } => {
                let duplicate = entries
                    .iter()
                    .filter(|e| e.kind == learning.kind)
                    .any(|e| is_duplicate(&e.summary, &learning.summary));

                if duplicate {
                    debug!(kind = %learning.kind, "Dropping duplicate learning");
                    let _ = reply.send(Ok(false));
                    continue;
                }

                entries.push(learning);
                let result = persist(&path, &entries).map(|_| true);
                let _ = reply.send(result);
            }

            LearningsCommand::ContextBlob { reply } => {
                let blob = entries
                    .iter()
                    .map(|e| format!("- [{}] {}", e.kind, e.summary))
                    .collect::<Vec<_>>()
                    .join("\n");
                let _ = reply.send(Ok(blob));
            }

            LearningsCommand::All { reply } => {
                let _ = reply.send(Ok(entries.clone()));
            }

            LearningsCommand::Shutdown => {
                debug!("LearningsStore actor shutting down");
                break;
            }
        }
    }

    debug!("LearningsStore actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_token_similarity_identical() {
        assert_eq!(token_similarity("tests must pass", "tests must pass"), 1.0);
    }

    #[test]
    fn test_token_similarity_case_folded() {
        assert_eq!(token_similarity("Tests Must Pass", "tests must pass"), 1.0);
    }

    #[test]
    fn test_token_similarity_disjoint() {
        assert_eq!(token_similarity("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn test_substring_containment_is_duplicate() {
        assert!(is_duplicate(
            "missing error handling in the parser",
            "Missing error handling"
        ));
    }

    #[test]
    fn test_dissimilar_not_duplicate() {
        assert!(!is_duplicate(
            "tests fail on empty input",
            "lint warnings about unused imports"
        ));
    }

    #[tokio::test]
    async fn test_record_and_blob() {
        let temp = tempdir().unwrap();
        let store = LearningsStore::init(temp.path().join("learnings.json")).unwrap();

        assert!(
            store
                .record("task-001", LearningKind::ReviewFeedback, "handle empty input")
                .await
                .unwrap()
        );

        let blob = store.context_blob().await.unwrap();
        assert!(blob.contains("review_feedback"));
        assert!(blob.contains("handle empty input"));

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicates_dropped_within_kind() {
        let temp = tempdir().unwrap();
        let store = LearningsStore::init(temp.path().join("learnings.json")).unwrap();

        assert!(
            store
                .record("task-001", LearningKind::FailurePattern, "tournament produced no candidates")
                .await
                .unwrap()
        );
        assert!(
            !store
                .record("task-002", LearningKind::FailurePattern, "Tournament produced no candidates")
                .await
                .unwrap()
        );

        assert_eq!(store.all().await.unwrap().len(), 1);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_same_summary_different_kind_kept() {
        let temp = tempdir().unwrap();
        let store = LearningsStore::init(temp.path().join("learnings.json")).unwrap();

        store
            .record("task-001", LearningKind::FailurePattern, "tests fail on empty input")
            .await
            .unwrap();
        store
            .record("task-001", LearningKind::VerificationFailure, "tests fail on empty input")
            .await
            .unwrap();

        assert_eq!(store.all().await.unwrap().len(), 2);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("learnings.json");

        let store = LearningsStore::init(path.clone()).unwrap();
        store
            .record("task-001", LearningKind::ReviewFeedback, "validate inputs")
            .await
            .unwrap();
        store.shutdown().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let reloaded = LearningsStore::load(path).unwrap();
        assert_eq!(reloaded.all().await.unwrap().len(), 1);
        reloaded.shutdown().await.unwrap();
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // No two stored entries of the same kind may be near-duplicates
            #[test]
            fn stored_entries_stay_dissimilar(summaries in proptest::collection::vec("[a-z]{1,8}( [a-z]{1,8}){0,5}", 1..12)) {
                let rt = tokio::runtime::Runtime::new().unwrap();
                rt.block_on(async {
                    let temp = tempdir().unwrap();
                    let store = LearningsStore::init(temp.path().join("learnings.json")).unwrap();

                    for s in &summaries {
                        let _ = store.record("task-001", LearningKind::FailurePattern, s).await.unwrap();
                    }

                    let entries = store.all().await.unwrap();
                    for (i, a) in entries.iter().enumerate() {
                        for b in entries.iter().skip(i + 1) {
                            prop_assert!(!is_duplicate(&a.summary, &b.summary));
                        }
                    }
                    store.shutdown().await.unwrap();
                    Ok(())
                })?;
            }
        }
    }
}
