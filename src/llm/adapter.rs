//! CLI adapter: spawns the LLM CLI and owns the process contract
//!
//! - prompt delivered on stdin as an in-memory buffer (no temp files, so
//!   parallel spawns cannot race)
//! - `CLAUDE_CODE_*` / `CLAUDECODE` stripped from the child environment so
//!   the CLI cannot detect a nested agent session
//! - hard timeout with guaranteed child termination
//! - transient errors retried up to twice with exponential backoff
//! - per-attempt cost recorded into the budget ledger

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::store::BudgetStore;

use super::classify::{is_timeout_like, is_transient};
use super::types::{LlmError, LlmInvoker, LlmRequest, LlmResponse};

/// Retries after the initial attempt
const MAX_RETRIES: u32 = 2;

/// Backoff before the first retry of a non-timeout transient error
const RETRY_BACKOFF: Duration = Duration::from_secs(3);

/// Backoff before the first retry after a timeout
const TIMEOUT_BACKOFF: Duration = Duration::from_secs(15);

/// Adapter around the external LLM CLI
pub struct CliAdapter {
    config: LlmConfig,
    budget: Option<BudgetStore>,
    retry_backoff: Duration,
    timeout_backoff: Duration,
}

impl CliAdapter {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            budget: None,
            retry_backoff: RETRY_BACKOFF,
            timeout_backoff: TIMEOUT_BACKOFF,
        }
    }

    /// Record per-attempt costs into this ledger
    pub fn with_budget(mut self, budget: BudgetStore) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Override backoff bases (tests)
    pub fn with_backoff(mut self, retry: Duration, timeout: Duration) -> Self {
        self.retry_backoff = retry;
        self.timeout_backoff = timeout;
        self
    }

    async fn invoke_with_retry(&self, label: &str, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        if let Some(timeout) = request.timeout
            && timeout.is_zero()
        {
            return Err(LlmError::InvalidTimeout(timeout));
        }

        let mut attempt: u32 = 0;
        loop {
            let response = self.invoke_once(request).await?;

            if response.cost > 0.0
                && let Some(budget) = &self.budget
                && let Err(e) = budget.record_cost(label, response.cost).await
            {
                warn!(%label, "Failed to record cost: {}", e);
            }

            if response.success || attempt >= MAX_RETRIES || !is_transient(&response) {
                return Ok(response);
            }

            let base = if is_timeout_like(&response) {
                self.timeout_backoff
            } else {
                self.retry_backoff
            };
            let delay = base * 2u32.pow(attempt);
            attempt += 1;
            warn!(%label, attempt, ?delay, "Transient LLM error, backing off: {}", response.result);
            tokio::time::sleep(delay).await;
        }
    }

    async fn invoke_once(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);

        if let Some(model) = &request.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(system_prompt) = &request.system_prompt {
            cmd.arg("--append-system-prompt").arg(system_prompt);
        }
        if let Some(budget) = request.max_budget {
            cmd.arg("--max-budget-usd").arg(budget.to_string());
        }
        if !request.tools.is_empty() {
            // Without permission-skip the child hangs awaiting interactive
            // confirmation of its first tool call
            cmd.arg("--allowedTools").arg(request.tools.join(","));
            cmd.arg(&self.config.permission_skip_flag);
        }
        if let Some(schema) = &request.schema {
            cmd.arg("--json-schema").arg(schema.to_string());
        }
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        for (key, _) in std::env::vars() {
            if key.starts_with("CLAUDE_CODE_") || key == "CLAUDECODE" {
                cmd.env_remove(&key);
            }
        }

        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(command = %self.config.command, timeout = ?request.timeout, "Spawning LLM CLI");
        let mut child = cmd.spawn().map_err(|e| LlmError::Spawn(e.to_string()))?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin.write_all(request.prompt.as_bytes()).await?;
        drop(stdin);

        let response = match request.timeout {
            Some(limit) => {
                tokio::select! {
                    output = child.wait_with_output() => {
                        let output = output?;
                        self.parse_output(&output.stdout, &output.stderr, output.status.success(), request)
                    }
                    _ = tokio::time::sleep(limit) => {
                        // wait_with_output consumed the child handle; its
                        // kill-on-drop guarantee terminates the process
                        warn!(?limit, "LLM CLI timed out, killing child");
                        LlmResponse::error(format!("LLM CLI execution exceeded {}s limit", limit.as_secs_f64()))
                    }
                }
            }
            None => {
                let output = child.wait_with_output().await?;
                self.parse_output(&output.stdout, &output.stderr, output.status.success(), request)
            }
        };

        if let Some(log_path) = &request.log_path {
            let line = format!(
                "--- attempt success={} cost={}\n{}\n",
                response.success, response.cost, response.result
            );
            if let Err(e) = append_log(log_path, &line) {
                warn!(path = %log_path.display(), "Failed to append LLM log: {}", e);
            }
        }

        Ok(response)
    }

    fn parse_output(&self, stdout: &[u8], stderr: &[u8], exited_zero: bool, request: &LlmRequest) -> LlmResponse {
        let text = String::from_utf8_lossy(stdout);

        let value: serde_json::Value = match serde_json::from_str(text.trim()) {
            Ok(v) => v,
            Err(_) => {
                let mut message = text.trim().to_string();
                if message.is_empty() {
                    message = String::from_utf8_lossy(stderr).trim().to_string();
                }
                debug!("LLM CLI stdout was not JSON");
                return LlmResponse::error(message);
            }
        };

        let is_error = value
            .get("is_error")
            .and_then(|b| b.as_bool())
            .unwrap_or(!exited_zero);
        let result = value
            .get("result")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string();
        let cost = value.get("total_cost_usd").and_then(|c| c.as_f64()).unwrap_or(0.0);

        let structured = if request.schema.is_some() {
            value.get("structured_output").cloned().filter(|s| !s.is_null())
        } else {
            None
        };

        LlmResponse {
            success: !is_error && exited_zero,
            result,
            structured,
            cost,
        }
    }
}

fn append_log(path: &std::path::Path, line: &str) -> std::io::Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

#[async_trait]
impl LlmInvoker for CliAdapter {
    async fn invoke(&self, label: &str, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.invoke_with_retry(label, &request).await
    }
}
