use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Unique identifier for tasks
pub type TaskId = Uuid;

/// Identifier for the project a task belongs to
pub type ProjectId = String;

/// Task lifecycle states
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Submitted, resolution not yet decided
    Pending,
    /// All dependencies completed, waiting in the project queue
    Ready,
    /// Dequeued and handed to a worker
    Running,
    /// Dependencies unsatisfied or implicated in a pending cycle
    Blocked,
    /// Finished successfully (terminal)
    Completed,
    /// Failed permanently or exhausted retries (terminal, except retry re-entry)
    Failed,
    /// Deliberately cancelled (terminal)
    Cancelled,
    /// Awaiting backoff before re-enqueue
    Retrying,
}

impl TaskState {
    /// Terminal states are retained for audit and never resumed,
    /// with the single exception of `Failed -> Retrying` for eligible retries.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether moving from `self` to `to` is a legal lifecycle transition
    pub fn can_transition_to(self, to: TaskState) -> bool {
        use TaskState::*;
        match (self, to) {
            (Pending, Ready)
            | (Pending, Blocked)
            | (Blocked, Ready)
            | (Ready, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Failed, Retrying)
            | (Retrying, Ready) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Failure classification used by the retry policy
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Authorization,
    RateLimit,
    Timeout,
    Network,
    Resource,
    Internal,
}

impl FailureKind {
    /// Permanent failures are never retried regardless of remaining attempts
    pub fn is_permanent(self) -> bool {
        matches!(self, FailureKind::Validation | FailureKind::Authorization)
    }
}

/// Classified error reported by the external executor on task failure
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Authorization, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Specification for submitting a new task
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TaskSpec {
    pub project_id: ProjectId,
    pub base_priority: i64,
    pub dependencies: HashSet<TaskId>,
    pub deadline: Option<DateTime<Utc>>,
    pub max_retries: Option<u32>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Explicit id for callers with stable external identifiers
    pub id: Option<TaskId>,
}

impl TaskSpec {
    pub fn new(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            base_priority: 0,
            dependencies: HashSet::new(),
            deadline: None,
            max_retries: None,
            metadata: HashMap::new(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.base_priority = priority;
        self
    }

    pub fn with_dependency(mut self, dep: TaskId) -> Self {
        self.dependencies.insert(dep);
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// A unit of orchestrated work with a validated lifecycle
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub state: TaskState,
    pub base_priority: i64,
    pub dependencies: HashSet<TaskId>,
    pub deadline: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<TaskFailure>,
    pub result: Option<serde_json::Value>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task from a specification
    pub fn new(spec: TaskSpec, default_max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: spec.id.unwrap_or_else(Uuid::new_v4),
            project_id: spec.project_id,
            state: TaskState::Pending,
            base_priority: spec.base_priority,
            dependencies: spec.dependencies,
            deadline: spec.deadline,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            last_error: None,
            result: None,
            metadata: spec.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Validated state transition; on an illegal pair the state is unchanged
    pub fn transition(&mut self, to: TaskState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(OrchestratorError::InvalidStateTransition {
                task_id: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Per-state task counts for a project snapshot
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: u32,
    pub ready: u32,
    pub running: u32,
    pub blocked: u32,
    pub completed: u32,
    pub failed: u32,
    pub cancelled: u32,
    pub retrying: u32,
}

impl TaskCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Ready => self.ready += 1,
            TaskState::Running => self.running += 1,
            TaskState::Blocked => self.blocked += 1,
            TaskState::Completed => self.completed += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Cancelled => self.cancelled += 1,
            TaskState::Retrying => self.retrying += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.pending
            + self.ready
            + self.running
            + self.blocked
            + self.completed
            + self.failed
            + self.cancelled
            + self.retrying
    }
}
