//! LLM CLI adapter
//!
//! The orchestrator never talks to a model API directly; all reasoning is
//! delegated to an external command-line agent that reads a prompt on stdin
//! and emits a single JSON object on stdout. This module owns the process
//! contract: spawning, environment filtering, timeout enforcement, retry
//! classification, and structured-output extraction.

pub mod adapter;
pub mod classify;
pub mod mock;
pub mod types;

pub use adapter::CliAdapter;
pub use classify::{is_timeout_like, is_transient};
pub use types::{LlmError, LlmInvoker, LlmRequest, LlmResponse};
