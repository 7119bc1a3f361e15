//! Markdown reports rendered from run state
//!
//! A leaf consumer: reads the stores, writes `reports/summary.md` and one
//! report per terminal task. Nothing here feeds back into scheduling.

use eyre::Result;
use tracing::debug;

use crate::domain::{RunState, StopReason, TaskQueue, TaskState};
use crate::store::{BudgetLedger, RunPaths};

/// Render the run summary
pub fn render_summary(queue: &TaskQueue, state: &RunState, ledger: &BudgetLedger, reason: StopReason) -> String {
    let counts = state.counts();
    let mut out = String::new();

    out.push_str("# Run summary\n\n");
    out.push_str(&format!("Goal: {}\n\n", queue.goal));
    out.push_str(&format!("Stop reason: `{}`\n\n", reason));
    out.push_str(&format!(
        "Tasks: {} total, {} completed, {} failed, {} pending, {} blocked\n\n",
        counts.total(),
        counts.completed,
        counts.failed,
        counts.pending,
        counts.blocked
    ));
    out.push_str(&format!(
        "Cost: ${:.2} across {} ledger entries\n",
        ledger.total,
        ledger.entries.len()
    ));

    let failed: Vec<(&String, String)> = state
        .tasks_status
        .iter()
        .filter(|(_, s)| s.status == TaskState::Failed)
        .map(|(id, s)| {
            let phase = s.phase.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
            (id, phase)
        })
        .collect();

    if !failed.is_empty() {
        out.push_str("\n## Failed tasks\n\n");
        for (id, phase) in failed {
            let title = queue.task(id).map(|t| t.title.as_str()).unwrap_or("?");
            out.push_str(&format!("- {} ({}), last phase: {}\n", id, title, phase));
        }
    }

    if let Some(url) = &state.pr_url {
        out.push_str(&format!("\nPull request: {}\n", url));
    }

    out
}

/// Render one task's report
pub fn render_task_report(queue: &TaskQueue, state: &RunState, task_id: &str) -> Option<String> {
    let task = queue.task(task_id)?;
    let status = state.tasks_status.get(task_id)?;

    let mut out = format!("# {}: {}\n\n", task.id, task.title);
    out.push_str(&format!("Status: {}\n\n", status.status));
    if let Some(completed_at) = status.completed_at {
        out.push_str(&format!("Completed: {}\n\n", completed_at.to_rfc3339()));
    }

    if let Some(metrics) = &status.tournament_metrics {
        out.push_str("## Tournament\n\n");
        out.push_str(&format!(
            "- competitors: {} ({} implemented, {} verified)\n",
            metrics.competitor_count, metrics.implemented_count, metrics.verified_count
        ));
        out.push_str(&format!(
            "- winner: {} (score {}, spread {}, {} diff lines)\n",
            metrics.winner_strategy, metrics.winner_score, metrics.score_spread, metrics.winner_diff_lines
        ));
        out.push_str(&format!("- convergence: {:.2}\n", metrics.convergence_ratio));
        if metrics.synthesis_attempted {
            out.push_str(&format!(
                "- synthesis: attempted, {}\n",
                if metrics.synthesis_succeeded { "succeeded" } else { "fell back" }
            ));
        }
        if let Some(rationale) = &metrics.selection_rationale {
            out.push_str(&format!("- selection rationale: {}\n", rationale));
        }
        if !metrics.convergent_patterns.is_empty() {
            out.push_str("\n### Convergent patterns\n\n");
            for pattern in &metrics.convergent_patterns {
                out.push_str(&format!("- {}\n", pattern));
            }
        }
    }

    Some(out)
}

/// Write the summary and one report per terminal task
pub fn write_reports(
    paths: &RunPaths,
    queue: &TaskQueue,
    state: &RunState,
    ledger: &BudgetLedger,
    reason: StopReason,
) -> Result<()> {
    std::fs::create_dir_all(paths.reports_dir())?;
    std::fs::write(paths.summary_file(), render_summary(queue, state, ledger, reason))?;

    for (id, status) in &state.tasks_status {
        if !status.status.is_terminal() {
            continue;
        }
        if let Some(report) = render_task_report(queue, state, id) {
            std::fs::write(paths.report_file(id), report)?;
        }
    }

    debug!("Reports written");
    Ok(())
}
