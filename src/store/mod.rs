//! Persistent stores
//!
//! Every store is a file on disk owned by a single actor task; handles are
//! cheap clones that send commands over a channel and await a reply. The
//! on-disk shape is the source of truth across crashes.

pub mod budget;
pub mod learnings;
pub mod paths;
pub mod state;

pub use budget::{BudgetEntry, BudgetLedger, BudgetStore};
pub use learnings::LearningsStore;
pub use paths::RunPaths;
pub use state::{StateError, StateStore};
