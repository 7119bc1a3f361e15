//! LLM request/response types and the invoker trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from the adapter itself (as opposed to CLI-reported failures,
/// which come back as unsuccessful [`LlmResponse`]s)
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Failed to spawn LLM CLI: {0}")]
    Spawn(String),

    #[error("I/O error talking to LLM CLI: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout must be a positive duration, got {0:?}")]
    InvalidTimeout(Duration),
}

/// One invocation of the LLM CLI
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    /// Delivered on the child's stdin as an in-memory buffer
    pub prompt: String,

    /// Optional system prompt
    pub system_prompt: Option<String>,

    /// Model override
    pub model: Option<String>,

    /// Per-call cost cap in USD
    pub max_budget: Option<f64>,

    /// JSON schema forcing a structured payload in the response
    pub schema: Option<serde_json::Value>,

    /// Tool names the child may use; non-empty implies permission-skip
    pub tools: Vec<String>,

    /// Hard wall-clock limit; the child is killed on expiry
    pub timeout: Option<Duration>,

    /// Working directory for the child
    pub working_dir: Option<PathBuf>,

    /// Raw child output is appended here when set
    pub log_path: Option<PathBuf>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_budget(mut self, budget: f64) -> Self {
        self.max_budget = Some(budget);
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }
}

/// Result of an invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// False when the CLI reported an error or the adapter synthesized one
    pub success: bool,

    /// Free-text result (or error text)
    pub result: String,

    /// Structured payload, present only when a schema was supplied and the
    /// child produced one
    pub structured: Option<serde_json::Value>,

    /// Reported cost in USD; zero for synthesized errors
    pub cost: f64,
}

impl LlmResponse {
    /// Synthesize an error response with zero cost
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            success: false,
            result: text.into(),
            structured: None,
            cost: 0.0,
        }
    }
}

/// The seam the rest of the core talks through; mockable in tests
#[async_trait]
pub trait LlmInvoker: Send + Sync {
    /// Invoke the CLI. `label` attributes the cost in the budget ledger.
    async fn invoke(&self, label: &str, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = LlmRequest::new("do the thing")
            .with_model("some-model")
            .with_tools(&["Read", "Write"])
            .with_timeout(Duration::from_secs(60));

        assert_eq!(req.prompt, "do the thing");
        assert_eq!(req.model.as_deref(), Some("some-model"));
        assert_eq!(req.tools.len(), 2);
        assert_eq!(req.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_error_response_is_zero_cost() {
        let resp = LlmResponse::error("boom");
        assert!(!resp.success);
        assert_eq!(resp.cost, 0.0);
        assert!(resp.structured.is_none());
    }
}
