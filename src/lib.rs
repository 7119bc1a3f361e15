//! Convergent - tournament-based autonomous development orchestrator
//!
//! Given a codebase and a goal, Convergent decomposes the work into a
//! dependency-ordered task queue and drives each task to completion by
//! delegating reasoning to an external LLM CLI. The orchestration kernel
//! around that non-deterministic worker is what lives here:
//!
//! - **Scheduler**: multi-pass ready-set loop with a circuit breaker,
//!   budget enforcement, and crash-safe resumption
//! - **Tournament**: N parallel competitors in isolated git worktrees,
//!   convergence analysis, and synthesis/judge/fallback winner selection
//! - **Lifecycle**: per-task state machine (tournament, verify, review,
//!   commit) with hard-reset revert semantics
//! - **Stores**: file-backed actors for state, budget, and learnings; the
//!   on-disk run directory is the source of truth
//! - **LLM adapter**: subprocess contract with retry classification,
//!   timeout enforcement, and structured-output extraction
//!
//! # Modules
//!
//! - [`scheduler`] - the outer iteration loop
//! - [`tournament`] - competitor fan-out and winner selection
//! - [`lifecycle`] - per-task state machine
//! - [`store`] - persistent stores and the run-directory layout
//! - [`llm`] - the LLM CLI adapter
//! - [`scm`] - git verbs
//! - [`verify`] - verification commands and scoring

pub mod cli;
pub mod config;
pub mod domain;
pub mod generator;
pub mod interrupt;
pub mod lifecycle;
pub mod llm;
pub mod logging;
pub mod prompts;
pub mod report;
pub mod scheduler;
pub mod scm;
pub mod store;
pub mod tournament;
pub mod verify;

pub use config::{Config, LlmConfig, ReviewConfig, TournamentConfig, VerificationConfig};
pub use domain::{
    Complexity, Learning, LearningKind, Phase, QueueError, RunState, StopReason, Task, TaskKind, TaskQueue, TaskState,
    TaskStatus, TournamentMetrics,
};
pub use generator::TaskGenerator;
pub use interrupt::InterruptFlag;
pub use lifecycle::TaskLifecycle;
pub use llm::{CliAdapter, LlmError, LlmInvoker, LlmRequest, LlmResponse};
pub use scheduler::{Scheduler, SchedulerOutcome, resume_in_progress};
pub use scm::GitAdapter;
pub use store::{BudgetLedger, BudgetStore, LearningsStore, RunPaths, StateError, StateStore};
pub use tournament::{TournamentEngine, TournamentError, TournamentResult};
pub use verify::{CheckKind, VerificationReport, VerificationRunner};
