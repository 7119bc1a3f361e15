//! Task queue generation
//!
//! One schema-forced call to the LLM CLI turns a goal into a validated,
//! dependency-ordered task queue. Referential or cycle problems reject the
//! queue at generation time; nothing is persisted on failure.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::LlmConfig;
use crate::domain::{Complexity, Task, TaskKind, TaskQueue};
use crate::llm::{LlmInvoker, LlmRequest};
use crate::prompts;

#[derive(Debug, Deserialize)]
struct GeneratedTask {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    kind: TaskKind,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    context_files: Vec<String>,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    complexity: Complexity,
}

#[derive(Debug, Deserialize)]
struct GeneratedQueue {
    tasks: Vec<GeneratedTask>,
}

/// Generates the task queue from a goal
pub struct TaskGenerator {
    llm: Arc<dyn LlmInvoker>,
    config: LlmConfig,
}

impl TaskGenerator {
    pub fn new(llm: Arc<dyn LlmInvoker>, config: LlmConfig) -> Self {
        Self { llm, config }
    }

    /// Produce a validated queue or fail the startup; the second element is
    /// the generation cost, recorded by the caller once the budget store
    /// exists
    pub async fn generate(&self, goal: &str, instructions: Option<String>) -> eyre::Result<(TaskQueue, f64)> {
        info!(%goal, "Generating task queue");

        let request = LlmRequest::new(prompts::planner_prompt(goal, instructions.as_deref()))
            .with_system_prompt(prompts::PLANNER_SYSTEM)
            .with_model(&self.config.judge_model)
            .with_max_budget(self.config.call_budget)
            .with_schema(queue_schema())
            .with_timeout(Duration::from_millis(self.config.call_timeout_ms));

        let response = self.llm.invoke("phase0/task-generation", request).await?;
        let cost = response.cost;

        if !response.success {
            eyre::bail!("Task generation failed: {}", response.result);
        }

        let structured = response
            .structured
            .ok_or_else(|| eyre::eyre!("Task generation produced no structured output"))?;

        let generated: GeneratedQueue = serde_json::from_value(structured)
            .map_err(|e| eyre::eyre!("Malformed task queue payload: {}", e))?;

        let tasks: Vec<Task> = generated
            .tasks
            .into_iter()
            .map(|t| Task {
                id: t.id,
                title: t.title,
                description: t.description,
                kind: t.kind,
                depends_on: t.depends_on,
                context_files: t.context_files,
                acceptance_criteria: t.acceptance_criteria,
                complexity: t.complexity,
            })
            .collect();

        let queue = TaskQueue::new(goal, instructions, tasks).map_err(|e| {
            warn!("Generated queue rejected: {}", e);
            eyre::eyre!("Generated task queue is invalid: {}", e)
        })?;

        info!(tasks = queue.len(), cost, "Task queue generated");
        Ok((queue, cost))
    }
}

fn queue_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "tasks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string", "pattern": "^task-[0-9]+$"},
                        "title": {"type": "string"},
                        "description": {"type": "string"},
                        "kind": {"type": "string", "enum": ["code", "explore", "command"]},
                        "depends_on": {"type": "array", "items": {"type": "string"}},
                        "context_files": {"type": "array", "items": {"type": "string"}},
                        "acceptance_criteria": {"type": "array", "items": {"type": "string"}},
                        "complexity": {"type": "string", "enum": ["trivial", "standard", "complex"]},
                    },
                    "required": ["id", "title", "description"],
                },
            },
        },
        "required": ["tasks"],
    })
}
