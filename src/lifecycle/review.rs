//! Structured review and the multi-reviewer merge
//!
//! Reviewer personas run in parallel; their results merge
//! deterministically. A persona only blocks when it requested changes with
//! at least one error- or warning-severity issue: info-only findings demote
//! to approved. Missing plan steps and extra changes are unioned,
//! per-criterion satisfaction is ANDed, and issues concatenate with persona
//! tags.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{LlmConfig, ReviewConfig};
use crate::domain::Task;
use crate::llm::{LlmInvoker, LlmRequest};
use crate::prompts;

/// Reviewer verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    ChangesRequested,
    Error,
}

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

/// One review issue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub description: String,

    /// Persona that raised the issue (set by the merge)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

/// Plan-compliance findings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanCompliance {
    #[serde(default)]
    pub missing_steps: Vec<String>,

    #[serde(default)]
    pub extra_changes: Vec<String>,
}

/// Per-criterion check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionCheck {
    pub criterion: String,
    pub satisfied: bool,
}

/// A structured review result (single persona or merged)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub verdict: ReviewVerdict,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub plan_compliance: PlanCompliance,

    #[serde(default)]
    pub criteria: Vec<CriterionCheck>,

    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
}

impl ReviewResult {
    /// A review that never produced structured output
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            verdict: ReviewVerdict::Error,
            summary: summary.into(),
            plan_compliance: PlanCompliance::default(),
            criteria: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// True when the persona carries at least one blocking issue
    fn has_blocking_issue(&self) -> bool {
        self.issues
            .iter()
            .any(|i| matches!(i.severity, IssueSeverity::Error | IssueSeverity::Warning))
    }

    /// Feedback text handed to the fixer and recorded as a learning
    pub fn feedback_text(&self) -> String {
        let mut text = self.summary.clone();
        for issue in &self.issues {
            let persona = issue.persona.as_deref().unwrap_or("reviewer");
            text.push_str(&format!("\n- [{:?}/{}] {}", issue.severity, persona, issue.description));
        }
        for step in &self.plan_compliance.missing_steps {
            text.push_str(&format!("\n- missing step: {}", step));
        }
        text
    }
}

/// Outcome of a review pass
pub struct ReviewOutcome {
    pub merged: ReviewResult,

    /// True when no persona produced structured output at all; the caller
    /// treats this as a soft (structural) failure
    pub structural_failure: bool,
}

/// Merge per-persona results into one review
///
/// The overall verdict is `changes_requested` iff some persona requested
/// changes and raised at least one error- or warning-severity issue.
/// Info-only change requests demote to approved.
pub fn merge_reviews(results: Vec<(String, ReviewResult)>) -> ReviewResult {
    let assessed: Vec<&(String, ReviewResult)> = results
        .iter()
        .filter(|(_, r)| r.verdict != ReviewVerdict::Error)
        .collect();

    if assessed.is_empty() {
        return ReviewResult::error("every reviewer persona failed to produce a result");
    }

    let blocking = assessed
        .iter()
        .any(|(_, r)| r.verdict == ReviewVerdict::ChangesRequested && r.has_blocking_issue());

    let mut missing_steps: Vec<String> = Vec::new();
    let mut extra_changes: Vec<String> = Vec::new();
    let mut criteria: BTreeMap<String, bool> = BTreeMap::new();
    let mut issues: Vec<ReviewIssue> = Vec::new();
    let mut summaries: Vec<String> = Vec::new();

    for (persona, result) in &results {
        if result.verdict == ReviewVerdict::Error {
            continue;
        }

        if !result.summary.is_empty() {
            summaries.push(format!("[{}] {}", persona, result.summary));
        }

        for step in &result.plan_compliance.missing_steps {
            if !missing_steps.contains(step) {
                missing_steps.push(step.clone());
            }
        }
        for change in &result.plan_compliance.extra_changes {
            if !extra_changes.contains(change) {
                extra_changes.push(change.clone());
            }
        }

        for check in &result.criteria {
            criteria
                .entry(check.criterion.clone())
                .and_modify(|s| *s = *s && check.satisfied)
                .or_insert(check.satisfied);
        }

        for issue in &result.issues {
            issues.push(ReviewIssue {
                severity: issue.severity,
                description: issue.description.clone(),
                persona: Some(persona.clone()),
            });
        }
    }

    ReviewResult {
        verdict: if blocking {
            ReviewVerdict::ChangesRequested
        } else {
            ReviewVerdict::Approved
        },
        summary: summaries.join("\n"),
        plan_compliance: PlanCompliance {
            missing_steps,
            extra_changes,
        },
        criteria: criteria
            .into_iter()
            .map(|(criterion, satisfied)| CriterionCheck { criterion, satisfied })
            .collect(),
        issues,
    }
}

/// Run every configured persona in parallel and merge
pub async fn run_review(
    llm: &Arc<dyn LlmInvoker>,
    task: &Task,
    diff: &str,
    review: &ReviewConfig,
    llm_config: &LlmConfig,
    log_dir: &Path,
) -> ReviewOutcome {
    let futures = review.personas.iter().map(|persona| {
        let request = LlmRequest::new(prompts::review_prompt(task, diff, persona))
            .with_system_prompt(prompts::REVIEW_SYSTEM)
            .with_model(&llm_config.judge_model)
            .with_max_budget(llm_config.call_budget)
            .with_schema(review_schema())
            .with_timeout(Duration::from_millis(llm_config.call_timeout_ms))
            .with_log_path(log_dir.join(format!("review-{}.log", persona)));
        let label = format!("{}/review-{}", task.id, persona);
        async move {
            let result = match llm.invoke(&label, request).await {
                Ok(response) if response.success => match response.structured {
                    Some(value) => match serde_json::from_value::<ReviewResult>(value) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            debug!(%label, "Malformed review payload: {}", e);
                            ReviewResult::error(format!("malformed review payload: {}", e))
                        }
                    },
                    None => ReviewResult::error("review produced no structured output"),
                },
                Ok(response) => ReviewResult::error(response.result),
                Err(e) => {
                    warn!(%label, "Review call failed: {}", e);
                    ReviewResult::error(e.to_string())
                }
            };
            (persona.clone(), result)
        }
    });

    let results: Vec<(String, ReviewResult)> = futures::future::join_all(futures).await;
    let structural_failure = results.iter().all(|(_, r)| r.verdict == ReviewVerdict::Error);
    let merged = merge_reviews(results);

    ReviewOutcome {
        merged,
        structural_failure,
    }
}

fn review_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "verdict": {"type": "string", "enum": ["approved", "changes_requested", "error"]},
            "summary": {"type": "string"},
            "plan_compliance": {
                "type": "object",
                "properties": {
                    "missing_steps": {"type": "array", "items": {"type": "string"}},
                    "extra_changes": {"type": "array", "items": {"type": "string"}},
                },
            },
            "criteria": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "criterion": {"type": "string"},
                        "satisfied": {"type": "boolean"},
                    },
                    "required": ["criterion", "satisfied"],
                },
            },
            "issues": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "severity": {"type": "string", "enum": ["error", "warning", "info"]},
                        "description": {"type": "string"},
                    },
                    "required": ["severity", "description"],
                },
            },
        },
        "required": ["verdict"],
    })
}
