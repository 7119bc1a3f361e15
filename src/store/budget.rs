//! BudgetStore - append-only cost ledger with a running total
//!
//! Writes are serialized through the actor's mailbox, so concurrent
//! competitors land in FIFO order. Each recorded cost also mirrors the new
//! total into the run state within the same serialized section, keeping the
//! two files within one in-flight write of each other. The ledger file is
//! authoritative for cost reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::state::{StateError, StateStore};

/// One ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetEntry {
    pub label: String,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

/// On-disk shape of `budget.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetLedger {
    pub entries: Vec<BudgetEntry>,
    pub total: f64,
}

type Reply<T> = oneshot::Sender<Result<T, StateError>>;

enum BudgetCommand {
    Record { label: String, cost: f64, reply: Reply<f64> },
    Total { reply: Reply<f64> },
    Snapshot { reply: Reply<BudgetLedger> },
    Shutdown,
}

/// Handle to the budget store actor
#[derive(Clone)]
pub struct BudgetStore {
    tx: mpsc::Sender<BudgetCommand>,
}

impl BudgetStore {
    /// Start with an empty ledger
    pub fn init(path: PathBuf, state: StateStore) -> eyre::Result<Self> {
        let ledger = BudgetLedger::default();
        persist(&path, &ledger).map_err(|e| eyre::eyre!("Failed to write initial budget: {}", e))?;
        Ok(Self::spawn(path, ledger, state))
    }

    /// Load an existing `budget.json`
    pub fn load(path: PathBuf, state: StateStore) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let ledger: BudgetLedger = serde_json::from_str(&content)?;
        info!(entries = ledger.entries.len(), total = ledger.total, "Loaded budget ledger");
        Ok(Self::spawn(path, ledger, state))
    }

    fn spawn(path: PathBuf, ledger: BudgetLedger, state: StateStore) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(path, ledger, state, rx));
        Self { tx }
    }

    /// Append a cost entry; returns the new total
    pub async fn record_cost(&self, label: &str, cost: f64) -> Result<f64, StateError> {
        debug!(%label, cost, "BudgetStore::record_cost: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BudgetCommand::Record {
                label: label.to_string(),
                cost,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Running total
    pub async fn total(&self) -> Result<f64, StateError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BudgetCommand::Total { reply: reply_tx })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// False iff the total has reached the cap
    pub async fn available(&self, cap: f64) -> Result<bool, StateError> {
        Ok(self.total().await? < cap)
    }

    /// Full copy of the ledger
    pub async fn snapshot(&self) -> Result<BudgetLedger, StateError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BudgetCommand::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    pub async fn shutdown(&self) -> Result<(), StateError> {
        self.tx
            .send(BudgetCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

fn persist(path: &PathBuf, ledger: &BudgetLedger) -> Result<(), StateError> {
    let json = serde_json::to_string_pretty(ledger).map_err(|e| StateError::Io(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| StateError::Io(e.to_string()))
}

async fn actor_loop(
    path: PathBuf,
    mut ledger: BudgetLedger,
    state: StateStore,
    mut rx: mpsc::Receiver<BudgetCommand>,
) {
    debug!("BudgetStore actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            BudgetCommand::Record { label, cost, reply } => {
                ledger.entries.push(BudgetEntry {
                    label,
                    cost,
                    timestamp: Utc::now(),
                });
                ledger.total += cost;

                let mut result = persist(&path, &ledger).map(|_| ledger.total);
                // Mirror into the run state before releasing the section
                if result.is_ok()
                    && let Err(e) = state.set_total_cost(ledger.total).await
                {
                    result = Err(e);
                }
                let _ = reply.send(result);
            }

            BudgetCommand::Total { reply } => {
                let _ = reply.send(Ok(ledger.total));
            }

            BudgetCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(ledger.clone()));
            }

            BudgetCommand::Shutdown => {
                debug!("BudgetStore actor shutting down");
                break;
            }
        }
    }

    debug!("BudgetStore actor stopped");
}
