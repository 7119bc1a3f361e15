//! Task and TaskQueue domain types
//!
//! A queue is immutable once generated. Validation enforces the queue
//! invariants: unique ids, dependency references that resolve within the
//! queue, and an acyclic dependency graph (Kahn scan).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// What kind of work a task represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Implementation work, runs a tournament
    #[default]
    Code,
    /// Codebase exploration, writes findings.md
    Explore,
    /// One-shot command execution (migrations, codegen, etc.)
    Command,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code => write!(f, "code"),
            Self::Explore => write!(f, "explore"),
            Self::Command => write!(f, "command"),
        }
    }
}

/// Estimated complexity, drives the tournament competitor count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    #[default]
    Standard,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trivial => write!(f, "trivial"),
            Self::Standard => write!(f, "standard"),
            Self::Complex => write!(f, "complex"),
        }
    }
}

/// A single unit of work in the queue
///
/// Immutable once the queue is generated; all runtime state lives in the
/// state store keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Identifier matching `task-NNN`
    pub id: String,

    /// Short human-readable title
    pub title: String,

    /// Full description handed to competitors
    pub description: String,

    /// Task kind
    #[serde(default)]
    pub kind: TaskKind,

    /// Ids of tasks that must complete before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Paths worth reading before implementing
    #[serde(default)]
    pub context_files: Vec<String>,

    /// Acceptance criteria checked by the reviewer
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    /// Complexity estimate
    #[serde(default)]
    pub complexity: Complexity,
}

impl Task {
    /// Create a code task with the given id and title (mainly for tests)
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            kind: TaskKind::Code,
            depends_on: Vec::new(),
            context_files: Vec::new(),
            acceptance_criteria: Vec::new(),
            complexity: Complexity::Standard,
        }
    }

    /// Builder: set the kind
    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    /// Builder: set the complexity
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    /// Builder: set dependencies
    pub fn with_deps(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Check the `task-NNN` id pattern
    pub fn valid_id(id: &str) -> bool {
        match id.strip_prefix("task-") {
            Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()),
            None => false,
        }
    }
}

/// Errors detected while validating a generated queue
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Invalid task id: {0}")]
    InvalidId(String),

    #[error("Duplicate task id: {0}")]
    DuplicateId(String),

    #[error("Task {task} depends on unknown task {dep}")]
    UnknownDependency { task: String, dep: String },

    #[error("Task {0} depends on itself")]
    SelfDependency(String),

    #[error("Dependency cycle involving: {0:?}")]
    Cycle(Vec<String>),

    #[error("Queue contains no tasks")]
    Empty,
}

/// An ordered, validated sequence of tasks for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueue {
    /// The goal the queue was generated for
    pub goal: String,

    /// Optional free-text instructions from the user
    #[serde(default)]
    pub instructions: Option<String>,

    /// When the queue was generated
    pub created_at: DateTime<Utc>,

    /// The tasks, in generation order
    pub tasks: Vec<Task>,
}

impl TaskQueue {
    /// Create a queue and validate its invariants
    pub fn new(goal: impl Into<String>, instructions: Option<String>, tasks: Vec<Task>) -> Result<Self, QueueError> {
        let queue = Self {
            goal: goal.into(),
            instructions,
            created_at: Utc::now(),
            tasks,
        };
        queue.validate()?;
        Ok(queue)
    }

    /// Validate ids, dependency references, and acyclicity
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.tasks.is_empty() {
            return Err(QueueError::Empty);
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !Task::valid_id(&task.id) {
                return Err(QueueError::InvalidId(task.id.clone()));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(QueueError::DuplicateId(task.id.clone()));
            }
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(QueueError::SelfDependency(task.id.clone()));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(QueueError::UnknownDependency {
                        task: task.id.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }

        self.check_acyclic()
    }

    /// Kahn-style topological scan; leftover nodes form a cycle
    fn check_acyclic(&self) -> Result<(), QueueError> {
        let mut in_degree: HashMap<&str, usize> = self.tasks.iter().map(|t| (t.id.as_str(), 0)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for task in &self.tasks {
            for dep in &task.depends_on {
                *in_degree.get_mut(task.id.as_str()).unwrap() += 1;
                dependents.entry(dep.as_str()).or_default().push(task.id.as_str());
            }
        }

        let mut ready: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut visited = 0;
        while let Some(id) = ready.pop_front() {
            visited += 1;
            if let Some(children) = dependents.get(id) {
                for child in children {
                    let d = in_degree.get_mut(child).unwrap();
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(child);
                    }
                }
            }
        }

        if visited != self.tasks.len() {
            let mut cycle: Vec<String> = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            cycle.sort();
            return Err(QueueError::Cycle(cycle));
        }

        Ok(())
    }

    /// Look up a task by id
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Ids of all tasks in queue order
    pub fn ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when the queue holds no tasks
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
