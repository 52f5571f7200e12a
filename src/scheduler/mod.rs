//! Dependency-aware priority task scheduling.
//!
//! The [`TaskScheduler`] facade composes the task registry and state
//! machine, the per-project dependency resolver, the per-project
//! priority queues, and the retry policy into one thread-safe contract.

pub mod graph;
pub mod manager;
pub mod queue;
pub mod retry;
pub mod types;


pub use manager::{
    FailureOutcome, LoggingEventHandler, SchedulerEvent, SchedulerEventHandler, TaskScheduler,
};
pub use queue::effective_priority;
pub use retry::RetryPolicy;
pub use types::{
    FailureKind, ProjectId, Task, TaskCounts, TaskFailure, TaskId, TaskSpec, TaskState,
};
