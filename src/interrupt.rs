//! Interrupt flag derived from OS signals
//!
//! The flag is observed at iteration and per-task boundaries, never inside a
//! tournament run; the scheduler turns it into an orderly save-and-exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Cloneable interrupt flag
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    flag: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the run as interrupted
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once an interrupt was observed
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Spawn a task that sets the flag on ctrl-c
    pub fn install_signal_handler(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing current step and saving state");
                flag.set();
            }
        });
    }
}
