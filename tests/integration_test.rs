//! Integration tests for Convergent
//!
//! These run the real component wiring end to end: a real git repository, a
//! stub LLM CLI implemented as a shell script, the file-backed stores, the
//! tournament engine, and the scheduler.

use std::path::Path;
use std::sync::Arc;

use convergent::config::{CheckCommand, Config};
use convergent::domain::{Complexity, StopReason, Task, TaskQueue, TaskState};
use convergent::interrupt::InterruptFlag;
use convergent::lifecycle::TaskLifecycle;
use convergent::llm::{CliAdapter, LlmInvoker};
use convergent::scheduler::{Scheduler, resume_in_progress};
use convergent::scm::GitAdapter;
use convergent::store::{BudgetStore, LearningsStore, RunPaths, StateStore};
use convergent::tournament::TournamentEngine;
use convergent::verify::{CheckKind, VerificationRunner};

/// Stub CLI: inside a worktree (`.git` is a file) it implements the task by
/// writing `impl.txt`; everywhere else it answers as an approving reviewer
/// slash commit-message writer
const STUB_CLI: &str = r#"
cat > /dev/null
if [ -e .git ] && [ ! -d .git ]; then
  echo work > impl.txt
  printf '{"is_error":false,"result":"implemented","total_cost_usd":0.1}'
else
  printf '{"is_error":false,"result":"feat: scripted change","structured_output":{"verdict":"approved"},"total_cost_usd":0.05}'
fi
"#;

async fn setup_git_repo(dir: &Path) {
    for args in [
        vec!["init", "-b", "main"],
        vec!["config", "user.email", "test@test.com"],
        vec!["config", "user.name", "Test"],
        vec!["commit", "--allow-empty", "-m", "initial"],
    ] {
        tokio::process::Command::new("git")
            .args(&args)
            .current_dir(dir)
            .output()
            .await
            .unwrap();
    }
}

fn test_config(check: &str, stub: &str) -> Config {
    let mut config = Config::default();
    config.llm.command = "sh".to_string();
    config.llm.args = vec!["-c".to_string(), stub.to_string()];
    config.tournament.stagger_ms = 0;
    config.verification.commands = vec![CheckCommand {
        command: check.to_string(),
        kind: CheckKind::Test,
    }];
    config
}

struct Rig {
    scheduler: Scheduler,
    state: StateStore,
    budget: BudgetStore,
    git: GitAdapter,
}

async fn rig(project: &Path, config: Config, queue: TaskQueue, budget_cap: f64) -> Rig {
    let paths = RunPaths::create(project).unwrap();
    let state = StateStore::init(paths.state_file(), &queue.ids()).unwrap();
    let budget = BudgetStore::init(paths.budget_file(), state.clone()).unwrap();
    let learnings = LearningsStore::init(paths.learnings_file()).unwrap();

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
        git.clone(),
        verifier,
        engine,
        state.clone(),
        learnings,
        paths.clone(),
        config.clone(),
    );

    let scheduler = Scheduler::new(
        lifecycle,
        state.clone(),
        budget.clone(),
        paths,
        queue,
        InterruptFlag::new(),
        budget_cap,
        config.scheduler.circuit_breaker_threshold,
    );

    Rig {
        scheduler,
        state,
        budget,
        git,
    }
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[tokio::test]
async fn test_trivial_code_task_end_to_end() {
    let project = tempfile::tempdir().unwrap();
    setup_git_repo(project.path()).await;

    let queue = TaskQueue::new(
        "one trivial change",
        None,
        vec![Task::new("task-001", "write impl").with_complexity(Complexity::Trivial)],
    )
    .unwrap();
    let config = test_config("test -f impl.txt", STUB_CLI);
    let rig = rig(project.path(), config, queue, 100.0).await;

    let base = rig.git.head_commit().await.unwrap();
    let outcome = rig.scheduler.run().await.unwrap();

    assert_eq!(outcome.reason, StopReason::AllComplete);

    // State: exactly one completed task, breaker untouched
    let snapshot = rig.state.snapshot().await.unwrap();
    let counts = snapshot.counts();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.total(), 1);
    assert_eq!(snapshot.consecutive_failures, 0);

    // Single competitor, pragmatist strategy, no synthesis
    let metrics = snapshot.tasks_status["task-001"].tournament_metrics.as_ref().unwrap();
    assert_eq!(metrics.competitor_count, 1);
    assert_eq!(metrics.winner_strategy, "pragmatist");
    assert!(!metrics.synthesis_attempted);

    // The change landed as a commit on the main tree
    assert_ne!(rig.git.head_commit().await.unwrap(), base);
    assert_eq!(
        std::fs::read_to_string(project.path().join("impl.txt")).unwrap().trim(),
        "work"
    );

    // Budget invariant: total equals the sum of ledger entries
    let ledger = rig.budget.snapshot().await.unwrap();
    let sum: f64 = ledger.entries.iter().map(|e| e.cost).sum();
    assert!((ledger.total - sum).abs() < 1e-9);
    assert!(ledger.total > 0.0);
}

#[tokio::test]
async fn test_budget_exhausted_between_iterations() {
    let project = tempfile::tempdir().unwrap();
    setup_git_repo(project.path()).await;

    let queue = TaskQueue::new(
        "two changes",
        None,
        vec![
            Task::new("task-001", "first").with_complexity(Complexity::Trivial),
            Task::new("task-002", "second")
                .with_complexity(Complexity::Trivial)
                .with_deps(&["task-001"]),
        ],
    )
    .unwrap();
    let config = test_config("test -f impl.txt", STUB_CLI);
    // Cap below what the first task costs in total
    let rig = rig(project.path(), config, queue, 0.05).await;

    let outcome = rig.scheduler.run().await.unwrap();

    assert_eq!(outcome.reason, StopReason::BudgetExhausted);
    let snapshot = rig.state.snapshot().await.unwrap();
    assert_eq!(snapshot.tasks_status["task-001"].status, TaskState::Completed);
    // The second task never started
    assert_ne!(snapshot.tasks_status["task-002"].status, TaskState::Completed);
}

#[tokio::test]
async fn test_failing_cli_trips_nothing_but_fails_task() {
    let project = tempfile::tempdir().unwrap();
    setup_git_repo(project.path()).await;

    // CLI that implements nothing and reports an error
    let stub = r#"cat > /dev/null; printf '{"is_error":true,"result":"invalid api key","total_cost_usd":0}'"#;
    let queue = TaskQueue::new(
        "doomed",
        None,
        vec![Task::new("task-001", "will fail").with_complexity(Complexity::Trivial)],
    )
    .unwrap();
    let config = test_config("true", stub);
    let rig = rig(project.path(), config, queue, 100.0).await;

    let base = rig.git.head_commit().await.unwrap();
    let outcome = rig.scheduler.run().await.unwrap();

    // Every task is terminal (failed counts), so the run is "complete"
    assert_eq!(outcome.reason, StopReason::AllComplete);
    let snapshot = rig.state.snapshot().await.unwrap();
    assert_eq!(snapshot.tasks_status["task-001"].status, TaskState::Failed);
    assert_eq!(snapshot.consecutive_failures, 1);

    // Tournament isolation: the main tree is untouched
    assert_eq!(rig.git.head_commit().await.unwrap(), base);
    assert!(rig.git.changed_files(project.path()).await.unwrap().is_empty());
}

// =============================================================================
// Crash-recovery contract
// =============================================================================

#[tokio::test]
async fn test_resume_round_trip_is_idempotent() {
    let project = tempfile::tempdir().unwrap();
    setup_git_repo(project.path()).await;
    let paths = RunPaths::create(project.path()).unwrap();

    let queue = TaskQueue::new("goal", None, vec![Task::new("task-001", "t")]).unwrap();
    std::fs::write(paths.tasks_file(), serde_json::to_string_pretty(&queue).unwrap()).unwrap();

    let state = StateStore::init(paths.state_file(), &queue.ids()).unwrap();
    state.shutdown().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let before = std::fs::read(paths.state_file()).unwrap();

    // Load from disk and immediately halt: nothing was in progress, so no
    // writes happen and the file stays byte-identical
    let reloaded = StateStore::load(paths.state_file()).unwrap();
    let resolved = resume_in_progress(&reloaded, &queue, &paths).await.unwrap();
    assert_eq!(resolved, 0);
    reloaded.shutdown().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let after = std::fs::read(paths.state_file()).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_interrupted_run_resumes_from_pending() {
    let project = tempfile::tempdir().unwrap();
    setup_git_repo(project.path()).await;
    let paths = RunPaths::create(project.path()).unwrap();

    let queue = TaskQueue::new(
        "goal",
        None,
        vec![Task::new("task-001", "t").with_complexity(Complexity::Trivial)],
    )
    .unwrap();

    // Simulate a crash mid-tournament: the task is in_progress on disk
    let state = StateStore::init(paths.state_file(), &queue.ids()).unwrap();
    state
        .set(
            "task-001",
            TaskState::InProgress,
            Some(convergent::domain::Phase::Tournament),
            false,
        )
        .await
        .unwrap();

    resume_in_progress(&state, &queue, &paths).await.unwrap();

    let status = state.get("task-001").await.unwrap().unwrap();
    assert_eq!(status.status, TaskState::Pending);

    // P1 still holds after resume
    let counts = state.counts().await.unwrap();
    assert_eq!(counts.total(), 1);

    state.shutdown().await.unwrap();
}

// =============================================================================
// Store cross-checks
// =============================================================================

#[tokio::test]
async fn test_budget_and_state_totals_agree() {
    let project = tempfile::tempdir().unwrap();
    setup_git_repo(project.path()).await;
    let paths = RunPaths::create(project.path()).unwrap();

    let state = StateStore::init(paths.state_file(), &["task-001".to_string()]).unwrap();
    let budget = BudgetStore::init(paths.budget_file(), state.clone()).unwrap();

    budget.record_cost("task-001/competitor-0", 0.4).await.unwrap();
    budget.record_cost("task-001/judge", 0.1).await.unwrap();

    let snapshot = state.snapshot().await.unwrap();
    let ledger = budget.snapshot().await.unwrap();
    assert!((snapshot.total_cost - ledger.total).abs() < 1e-9);
    assert!((ledger.total - 0.5).abs() < 1e-9);

    budget.shutdown().await.unwrap();
    state.shutdown().await.unwrap();
}
