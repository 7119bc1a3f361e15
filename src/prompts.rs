//! Prompt texts and prompt assembly
//!
//! The orchestration core treats these as opaque resources; nothing here
//! affects control flow. Strategy labels select a competitor system prompt.

use crate::domain::Task;

/// Tool set granted to competitors, synthesis, fixers, and command tasks
pub const CODEBASE_TOOLS: &[&str] = &["Read", "Write", "Edit", "Bash", "Glob", "Grep"];

/// Tool set granted to explore tasks (read plus the findings write)
pub const EXPLORE_TOOLS: &[&str] = &["Read", "Glob", "Grep", "Write"];

const PRAGMATIST_SYSTEM: &str = "\
You are a pragmatic senior engineer. Implement the task with the smallest \
change that fully satisfies the acceptance criteria. Prefer existing \
patterns in the codebase over new abstractions. Make the verification \
commands pass.";

const THOROUGH_SYSTEM: &str = "\
You are a meticulous engineer. Implement the task completely, covering edge \
cases and error paths, and extend the test suite where behaviour changed. \
Make the verification commands pass.";

const DECONSTRUCTOR_SYSTEM: &str = "\
You are a refactoring-minded engineer. Before implementing, identify the \
underlying structure of the problem; simplify what the change touches, then \
implement the task on the cleaner base. Make the verification commands pass.";

/// System prompt for a strategy label; unknown labels get the pragmatist
pub fn strategy_system_prompt(strategy: &str) -> &'static str {
    match strategy {
        "thorough" => THOROUGH_SYSTEM,
        "deconstructor" => DECONSTRUCTOR_SYSTEM,
        _ => PRAGMATIST_SYSTEM,
    }
}

pub const EXPLORE_SYSTEM: &str = "\
You are exploring a codebase to answer questions for later implementation \
work. Read the relevant code and write your findings, with file paths and \
line references, to the findings file named in the prompt. Do not modify \
source files.";

pub const COMMAND_SYSTEM: &str = "\
You are executing a well-defined operational task (codegen, migration, \
scripted change). Perform exactly what the task describes and nothing else.";

pub const JUDGE_SYSTEM: &str = "\
You are judging competing implementations of the same task. Pick the one \
that best satisfies the acceptance criteria with the least incidental \
complexity. Answer in the requested JSON shape only.";

pub const CONVERGENCE_SYSTEM: &str = "\
You are analysing independent implementations of the same task for semantic \
convergence. Identify design decisions the implementations agree on, where \
they diverge, and whether a merged implementation is viable. Answer in the \
requested JSON shape only.";

pub const SYNTHESIS_SYSTEM: &str = "\
You are merging the best parts of several competing implementations into a \
single one. Follow the convergent design decisions; where the candidates \
diverge, pick the stronger approach. Make the verification commands pass.";

pub const REVIEW_SYSTEM: &str = "\
You are reviewing a change against its task and acceptance criteria. Be \
specific; every issue needs a severity. Answer in the requested JSON shape \
only.";

pub const FIX_SYSTEM: &str = "\
You are addressing review feedback on a change you can see in the working \
tree. Apply the requested fixes and nothing else.";

pub const COMMIT_MESSAGE_SYSTEM: &str = "\
Write a one-line conventional commit message for the change described. \
Respond with the message only.";

pub const PLANNER_SYSTEM: &str = "\
You are decomposing a development goal into an ordered queue of tasks. Ids \
follow task-NNN. Dependencies must reference earlier ids and form no \
cycles. Answer in the requested JSON shape only.";

fn task_block(task: &Task) -> String {
    let mut block = format!("# Task {}: {}\n\n{}\n", task.id, task.title, task.description);

    if !task.context_files.is_empty() {
        block.push_str("\n## Context files\n");
        for path in &task.context_files {
            block.push_str(&format!("- {}\n", path));
        }
    }

    if !task.acceptance_criteria.is_empty() {
        block.push_str("\n## Acceptance criteria\n");
        for criterion in &task.acceptance_criteria {
            block.push_str(&format!("- {}\n", criterion));
        }
    }

    block
}

/// Prompt for one competitor working in its own worktree
pub fn competitor_prompt(task: &Task, learnings: &str, findings: &str) -> String {
    let mut prompt = task_block(task);

    if !findings.is_empty() {
        prompt.push_str("\n## Findings from dependency tasks\n");
        prompt.push_str(findings);
        prompt.push('\n');
    }

    if !learnings.is_empty() {
        prompt.push_str("\n## Learnings from earlier tasks\n");
        prompt.push_str(learnings);
        prompt.push('\n');
    }

    prompt.push_str("\nImplement this task in the current working directory.\n");
    prompt
}

/// Prompt for an explore task; findings go to `findings_path`
pub fn explore_prompt(task: &Task, findings_path: &str) -> String {
    format!(
        "{}\nWrite your findings as Markdown to: {}\n",
        task_block(task),
        findings_path
    )
}

/// Prompt for a command task
pub fn command_prompt(task: &Task) -> String {
    format!("{}\nExecute this task in the current working directory.\n", task_block(task))
}

/// Prompt for the semantic convergence analysis call
pub fn convergence_prompt(task: &Task, diffs: &[(String, String)]) -> String {
    let mut prompt = task_block(task);
    prompt.push_str("\n## Candidate implementations\n");
    for (id, diff) in diffs {
        prompt.push_str(&format!("\n### {}\n```diff\n{}\n```\n", id, diff));
    }
    prompt.push_str(
        "\nIdentify convergent design decisions, divergent approaches, and \
         whether synthesis into a single implementation is viable.\n",
    );
    prompt
}

/// Prompt for the synthesis attempt
pub fn synthesis_prompt(
    task: &Task,
    diffs: &[(String, String)],
    convergent_patterns: &[String],
    divergent_approaches: &[String],
) -> String {
    let mut prompt = task_block(task);

    prompt.push_str("\n## Convergent design decisions (follow these)\n");
    for pattern in convergent_patterns {
        prompt.push_str(&format!("- {}\n", pattern));
    }

    if !divergent_approaches.is_empty() {
        prompt.push_str("\n## Divergent approaches (pick the stronger side)\n");
        for approach in divergent_approaches {
            prompt.push_str(&format!("- {}\n", approach));
        }
    }

    prompt.push_str("\n## Candidate implementations\n");
    for (id, diff) in diffs {
        prompt.push_str(&format!("\n### {}\n```diff\n{}\n```\n", id, diff));
    }

    prompt.push_str("\nProduce the merged implementation in the current working directory.\n");
    prompt
}

/// Prompt for the judge call
pub fn judge_prompt(task: &Task, diffs: &[(String, String)]) -> String {
    let mut prompt = task_block(task);
    prompt.push_str("\n## Candidates\n");
    for (id, diff) in diffs {
        prompt.push_str(&format!("\n### {}\n```diff\n{}\n```\n", id, diff));
    }
    prompt.push_str("\nPick the winning candidate id and explain why.\n");
    prompt
}

/// Prompt for one reviewer persona
pub fn review_prompt(task: &Task, diff: &str, persona: &str) -> String {
    format!(
        "{}\n## Review focus\n{}\n\n## Change under review\n```diff\n{}\n```\n",
        task_block(task),
        persona,
        diff
    )
}

/// Prompt for a review-fix attempt
pub fn fix_prompt(task: &Task, feedback: &str) -> String {
    format!(
        "{}\n## Review feedback to address\n{}\n\nApply the fixes in the current working directory.\n",
        task_block(task),
        feedback
    )
}

/// Prompt for commit message generation
pub fn commit_message_prompt(task: &Task, diff_summary: &str) -> String {
    format!(
        "Task: {}\n\nChanged files:\n{}\n\nWrite the commit message.\n",
        task.title, diff_summary
    )
}

/// Prompt for task-queue generation
pub fn planner_prompt(goal: &str, instructions: Option<&str>) -> String {
    let mut prompt = format!("# Goal\n{}\n", goal);
    if let Some(instructions) = instructions {
        prompt.push_str(&format!("\n# Instructions\n{}\n", instructions));
    }
    prompt.push_str("\nDecompose the goal into a dependency-ordered task queue.\n");
    prompt
}
