//! Convergent - CLI entry point

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use convergent::cli::{Cli, Command};
use convergent::config::Config;
use convergent::domain::{StopReason, TaskQueue};
use convergent::generator::TaskGenerator;
use convergent::interrupt::InterruptFlag;
use convergent::lifecycle::TaskLifecycle;
use convergent::llm::{CliAdapter, LlmInvoker};
use convergent::scheduler::{Scheduler, resume_in_progress};
use convergent::scm::GitAdapter;
use convergent::store::{BudgetLedger, BudgetStore, LearningsStore, RunPaths, StateStore};
use convergent::tournament::TournamentEngine;
use convergent::verify::VerificationRunner;
use convergent::{logging, report};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            goal,
            instructions,
            project,
        } => run_new(config, cli.verbose, &project, goal, instructions).await,
        Command::Resume { project } => resume(config, cli.verbose, &project, false).await,
        Command::Retry { project } => resume(config, cli.verbose, &project, true).await,
        Command::Status { project } => status(&project),
    }
}

/// Start a fresh run: generate the queue, init the stores, schedule
async fn run_new(
    config: Config,
    verbose: bool,
    project: &Path,
    goal: String,
    instructions: Option<String>,
) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let paths = RunPaths::create(project)?;
    logging::init(Some(paths.orchestrator_log().as_path()), verbose)?;
    info!(run_dir = %paths.root().display(), %goal, "Starting new run");

    let git = GitAdapter::new(project);
    git.head_commit()
        .await
        .context("Project is not a usable git repository")?;

    // Phase 0: queue generation happens before the budget store exists, so
    // its cost is recorded right after
    let bare_adapter: Arc<dyn LlmInvoker> = Arc::new(CliAdapter::new(config.llm.clone()));
    let generator = TaskGenerator::new(bare_adapter, config.llm.clone());
    let (queue, generation_cost) = generator.generate(&goal, instructions).await?;

    std::fs::write(paths.tasks_file(), serde_json::to_string_pretty(&queue)?)
        .context("Failed to write tasks.json")?;

    let state = StateStore::init(paths.state_file(), &queue.ids())?;
    let budget = BudgetStore::init(paths.budget_file(), state.clone())?;
    let learnings = LearningsStore::init(paths.learnings_file())?;
    if generation_cost > 0.0 {
        budget.record_cost("phase0/task-generation", generation_cost).await?;
    }

    drive(config, project, paths, queue, state, budget, learnings).await
}

/// Resume (or retry) the latest run from its on-disk state
async fn resume(config: Config, verbose: bool, project: &Path, retry: bool) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let paths = RunPaths::latest(project)?.ok_or_else(|| eyre::eyre!("No previous run under {}", project.display()))?;
    logging::init(Some(paths.orchestrator_log().as_path()), verbose)?;
    info!(run_dir = %paths.root().display(), retry, "Resuming run");

    let queue: TaskQueue = serde_json::from_str(
        &std::fs::read_to_string(paths.tasks_file()).context("Failed to read tasks.json")?,
    )
    .context("Failed to parse tasks.json")?;
    queue.validate().context("Persisted task queue is invalid")?;

    let state = StateStore::load(paths.state_file())?;
    let budget = BudgetStore::load(paths.budget_file(), state.clone())?;
    let learnings = LearningsStore::load(paths.learnings_file())?;

    if retry {
        let promoted = state.reset_failed_and_blocked().await?;
        info!(promoted, "Reset failed and blocked tasks");
    }
    resume_in_progress(&state, &queue, &paths).await?;

    drive(config, project, paths, queue, state, budget, learnings).await
}

/// Wire the components and run the scheduler to a stop reason
async fn drive(
    config: Config,
    project: &Path,
    paths: RunPaths,
    queue: TaskQueue,
    state: StateStore,
    budget: BudgetStore,
    learnings: LearningsStore,
) -> Result<()> {
    let git = GitAdapter::new(project);
    let adapter: Arc<dyn LlmInvoker> = Arc::new(CliAdapter::new(config.llm.clone()).with_budget(budget.clone()));
    let verifier = VerificationRunner::new(&config.verification);
    let engine = TournamentEngine::new(
        adapter.clone(),
        git.clone(),
        verifier.clone(),
        config.tournament.clone(),
        config.llm.clone(),
    );
    let lifecycle = TaskLifecycle::new(
        adapter,
        git,
        verifier,
        engine,
        state.clone(),
        learnings,
        paths.clone(),
        config.clone(),
    );

    let interrupt = InterruptFlag::new();
    interrupt.install_signal_handler();

    let scheduler = Scheduler::new(
        lifecycle,
        state.clone(),
        budget.clone(),
        paths.clone(),
        queue.clone(),
        interrupt,
        config.budget.total_cap,
        config.scheduler.circuit_breaker_threshold,
    );

    let outcome = scheduler.run().await?;

    let snapshot = state.snapshot().await?;
    let ledger = budget.snapshot().await?;
    report::write_reports(&paths, &queue, &snapshot, &ledger, outcome.reason)?;
    print_summary(&queue, &snapshot, &ledger, outcome.reason, outcome.iterations);

    if outcome.reason == StopReason::Interrupted {
        // Orderly save already happened through the stores
        std::process::exit(130);
    }
    Ok(())
}

/// Read-only view of the latest run
fn status(project: &Path) -> Result<()> {
    let paths = RunPaths::latest(project)?.ok_or_else(|| eyre::eyre!("No previous run under {}", project.display()))?;

    let queue: TaskQueue = serde_json::from_str(&std::fs::read_to_string(paths.tasks_file())?)?;
    let state: convergent::domain::RunState = serde_json::from_str(&std::fs::read_to_string(paths.state_file())?)?;
    let ledger: BudgetLedger = serde_json::from_str(&std::fs::read_to_string(paths.budget_file())?)?;

    let counts = state.counts();
    println!("{}", format!("Run: {}", paths.root().display()).bold());
    println!("Goal: {}", queue.goal);
    println!(
        "Tasks: {} completed, {} failed, {} pending, {} blocked, {} in progress",
        counts.completed.to_string().green(),
        counts.failed.to_string().red(),
        counts.pending,
        counts.blocked,
        counts.in_progress
    );
    println!("Cost: ${:.2}", ledger.total);

    for (id, task_status) in &state.tasks_status {
        let phase = task_status.phase.map(|p| p.to_string()).unwrap_or_default();
        let title = queue.task(id).map(|t| t.title.as_str()).unwrap_or("?");
        println!("  {} {} {} {}", id, task_status.status, phase, title.dimmed());
    }
    Ok(())
}

fn print_summary(
    queue: &TaskQueue,
    state: &convergent::domain::RunState,
    ledger: &BudgetLedger,
    reason: StopReason,
    iterations: u32,
) {
    let counts = state.counts();
    println!();
    println!("{}", "Run finished".bold());
    println!("  Stop reason: {}", reason.to_string().cyan());
    println!("  Iterations:  {}", iterations);
    println!(
        "  Tasks:       {} completed, {} failed of {}",
        counts.completed.to_string().green(),
        counts.failed.to_string().red(),
        counts.total()
    );
    println!("  Cost:        ${:.2}", ledger.total);

    let failed: Vec<&String> = state
        .tasks_status
        .iter()
        .filter(|(_, s)| s.status == convergent::domain::TaskState::Failed)
        .map(|(id, _)| id)
        .collect();
    if !failed.is_empty() {
        println!("  {}:", "Failed tasks".red());
        for id in failed {
            let title = queue.task(id).map(|t| t.title.as_str()).unwrap_or("?");
            println!("    {} - {}", id, title);
        }
        println!("  Retry with: convergent retry");
    }
}
