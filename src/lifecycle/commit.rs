//! Commit message generation
//!
//! The message comes from the LLM CLI; if the CLI surfaced an error as its
//! output (rate limits and friends have been seen verbatim in commit logs),
//! the message falls back to `implement: <task title>`.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::domain::Task;
use crate::llm::{LlmInvoker, LlmRequest};
use crate::prompts;

/// Substrings that mark a generated message as an LLM error, not a message
const ERROR_MARKERS: &[&str] = &[
    "prompt is too long",
    "rate limit",
    "overloaded",
    "exceeded",
    "api error",
    "econnreset",
    "timed out",
    "invalid api key",
];

/// Filter a generated message, falling back to `implement: <title>`
pub fn sanitize_commit_message(generated: &str, task_title: &str) -> String {
    let message = generated.trim();
    let folded = message.to_lowercase();

    if message.is_empty() || ERROR_MARKERS.iter().any(|m| folded.contains(m)) {
        debug!("Generated commit message rejected, using fallback");
        return format!("implement: {}", task_title);
    }

    message.to_string()
}

/// Ask the CLI for a commit message; any failure falls back
pub async fn generate_commit_message(
    llm: &Arc<dyn LlmInvoker>,
    task: &Task,
    changed_files: &[String],
    llm_config: &LlmConfig,
) -> String {
    let request = LlmRequest::new(prompts::commit_message_prompt(task, &changed_files.join("\n")))
        .with_system_prompt(prompts::COMMIT_MESSAGE_SYSTEM)
        .with_model(&llm_config.judge_model)
        .with_max_budget(llm_config.call_budget)
        .with_timeout(Duration::from_millis(llm_config.call_timeout_ms));

    match llm.invoke(&format!("{}/commit-message", task.id), request).await {
        Ok(response) if response.success => sanitize_commit_message(&response.result, &task.title),
        Ok(response) => {
            debug!(task = %task.id, "Commit message generation errored: {}", response.result);
            format!("implement: {}", task.title)
        }
        Err(e) => {
            warn!(task = %task.id, "Commit message call failed: {}", e);
            format!("implement: {}", task.title)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_message_kept() {
        assert_eq!(
            sanitize_commit_message("feat: add retry logic to fetcher", "Add retries"),
            "feat: add retry logic to fetcher"
        );
    }

    #[test]
    fn test_error_text_replaced() {
        assert_eq!(
            sanitize_commit_message("Prompt is too long: 210000 tokens", "Add retries"),
            "implement: Add retries"
        );
        assert_eq!(
            sanitize_commit_message("rate limit reached, retry later", "Add retries"),
            "implement: Add retries"
        );
    }

    #[test]
    fn test_empty_message_replaced() {
        assert_eq!(sanitize_commit_message("  \n ", "Add retries"), "implement: Add retries");
    }

    #[test]
    fn test_case_insensitive_markers() {
        assert_eq!(
            sanitize_commit_message("OVERLOADED: try again", "T"),
            "implement: T"
        );
    }
}
