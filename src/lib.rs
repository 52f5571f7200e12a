//! # Conductor
//!
//! An in-process task orchestration engine: a dependency-aware priority
//! scheduler plus a condition-driven breakpoint/escalation subsystem.
//! Conductor decides *what* runs next, *when* to retry, and *when* to
//! pause for intervention; executing task payloads is the embedding
//! driver's job.
//!
//! ## Architecture Overview
//!
//! - **[`scheduler`]**: validated task lifecycle, topological dependency
//!   resolution with cycle detection, per-project priority queues with
//!   dynamic re-ranking, exponential retry backoff, and a defensive
//!   deadlock scan before every dispatch.
//! - **[`breakpoint`]**: an ordered rule engine over run-time context
//!   snapshots, built-in auto-resolution strategies, immediate/batched
//!   notification fan-out, and history-backed analytics.
//! - **[`store`]**: the abstract persistence boundary, with in-memory
//!   and JSON-file adapters bundled.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conductor::{MemoryStore, SchedulerConfig, TaskScheduler, TaskSpec};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), conductor::OrchestratorError> {
//!     let store = Arc::new(MemoryStore::new());
//!     let scheduler = TaskScheduler::new(SchedulerConfig::default(), store);
//!
//!     let task_id = scheduler
//!         .schedule_task(TaskSpec::new("project-1").with_priority(5))
//!         .await?;
//!
//!     if let Some(task) = scheduler.get_next_task("project-1").await? {
//!         // ... execute the task externally ...
//!         scheduler
//!             .mark_complete(task.id, serde_json::json!({"ok": true}))
//!             .await?;
//!     }
//!
//!     println!("done: {task_id}");
//!     Ok(())
//! }
//! ```

/// Dependency-aware priority task scheduling.
///
/// Task registry and state machine, topological dependency resolution,
/// per-project priority queues, retry policy, and deadlock detection.
pub mod scheduler;

/// Condition-driven breakpoints and escalation.
///
/// Rule engine, auto-resolver, notification dispatcher, and the
/// append-only event history with per-type analytics.
pub mod breakpoint;

/// Abstract persistence boundary and bundled store adapters.
pub mod store;

/// Recognized configuration surface.
pub mod config;

/// Error taxonomy.
pub mod error;

// Re-export main scheduler types
pub use scheduler::{
    FailureKind, FailureOutcome, LoggingEventHandler, SchedulerEvent, SchedulerEventHandler,
    Task, TaskCounts, TaskFailure, TaskId, TaskScheduler, TaskSpec, TaskState,
};

// Re-export main breakpoint types
pub use breakpoint::{
    BreakpointContext, BreakpointEvent, BreakpointManager, BreakpointRule, BreakpointStats,
    BreakpointType, Condition, EvaluationMode, Resolution, ResolutionAction, ResolutionStrategy,
};

// Re-export store and configuration types
pub use config::{BreakpointConfig, FailurePolicy, OrchestratorConfig, SchedulerConfig};
pub use error::{OrchestratorError, Result};
pub use store::{JsonFileStore, MemoryStore, TaskStore};
