use crate::scheduler::types::{TaskId, TaskState};
use uuid::Uuid;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Orchestration errors surfaced to the embedding driver
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestratorError {
    /// Illegal lifecycle move; the task state is left unchanged
    #[error("invalid state transition for task {task_id}: {from:?} -> {to:?}")]
    InvalidStateTransition {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    /// Referenced task id is not registered
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    /// A task with this id is already scheduled
    #[error("task {0} is already scheduled")]
    DuplicateTask(TaskId),

    /// A dependency id does not exist in the project
    #[error("task {task_id} depends on unknown task {dependency}")]
    DependencyNotFound { task_id: TaskId, dependency: TaskId },

    /// Cycle detected during dependency resolution; carries the cycle path
    #[error("circular dependency: {}", format_cycle(.cycle))]
    CircularDependency { cycle: Vec<TaskId> },

    /// Cycle among currently blocked tasks; no task can ever become ready
    #[error("deadlock among blocked tasks: {}", format_cycle(.cycle))]
    DeadlockDetected { cycle: Vec<TaskId> },

    /// Retryable failure exhausted its backoff attempts
    #[error("task {task_id} exhausted {max_retries} retries")]
    MaxRetriesExceeded { task_id: TaskId, max_retries: u32 },

    /// A rule predicate itself errored during evaluation
    #[error("rule '{rule}' failed to evaluate: {message}")]
    RuleEvaluationFailure { rule: String, message: String },

    /// Custom breakpoint type reference that was never registered
    #[error("unknown breakpoint type: {0}")]
    UnknownBreakpointType(String),

    /// Breakpoint event was already resolved
    #[error("breakpoint event {0} is already resolved")]
    EventAlreadyResolved(Uuid),

    /// Breakpoint event id is not known
    #[error("breakpoint event {0} not found")]
    EventNotFound(Uuid),

    /// Persistence failure; retryable infrastructure error, not a task-domain error
    #[error("store error: {0}")]
    Store(String),

    /// Invalid configuration input
    #[error("invalid configuration: {0}")]
    Config(String),
}

fn format_cycle(cycle: &[TaskId]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(|id| id.to_string()).collect();
    if let Some(first) = parts.first().cloned() {
        parts.push(first);
    }
    parts.join(" -> ")
}
