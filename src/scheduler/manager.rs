use crate::config::{FailurePolicy, SchedulerConfig};
use crate::error::{OrchestratorError, Result};
use crate::scheduler::graph::{
    DependencyGraph, dependencies_satisfied, has_nonterminal_dependents,
};
use crate::scheduler::queue::{ProjectQueue, effective_priority};
use crate::scheduler::retry::RetryPolicy;
use crate::scheduler::types::{
    ProjectId, Task, TaskCounts, TaskFailure, TaskId, TaskSpec, TaskState,
};
use crate::store::TaskStore;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Events emitted by the scheduler for observers
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    TaskScheduled {
        task_id: TaskId,
        project_id: ProjectId,
    },
    StateChanged {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },
    TaskCompleted {
        task_id: TaskId,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
    },
    RetryScheduled {
        task_id: TaskId,
        attempt: u32,
        delay: Duration,
    },
    DeadlockDetected {
        project_id: ProjectId,
        cycle: Vec<TaskId>,
    },
}

/// Handler for scheduler events. Handler errors are logged and swallowed;
/// a misbehaving observer never disturbs scheduling.
pub trait SchedulerEventHandler: Send + Sync {
    fn handle_event(&self, event: &SchedulerEvent) -> Result<()>;
}

/// Simple event handler that logs events
pub struct LoggingEventHandler;

impl SchedulerEventHandler for LoggingEventHandler {
    fn handle_event(&self, event: &SchedulerEvent) -> Result<()> {
        match event {
            SchedulerEvent::TaskScheduled {
                task_id,
                project_id,
            } => info!("task scheduled: {} (project {})", task_id, project_id),
            SchedulerEvent::StateChanged { task_id, from, to } => {
                debug!("task {} state: {:?} -> {:?}", task_id, from, to)
            }
            SchedulerEvent::TaskCompleted { task_id } => info!("task completed: {}", task_id),
            SchedulerEvent::TaskFailed { task_id, error } => {
                warn!("task failed: {} - {}", task_id, error)
            }
            SchedulerEvent::RetryScheduled {
                task_id,
                attempt,
                delay,
            } => info!(
                "retry {} scheduled for task {} in {:?}",
                attempt, task_id, delay
            ),
            SchedulerEvent::DeadlockDetected { project_id, cycle } => warn!(
                "deadlock in project {}: {} tasks in cycle",
                project_id,
                cycle.len()
            ),
        }
        Ok(())
    }
}

/// Disposition of a `mark_failed` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Retrying after backoff; the re-enqueue is a timed deferral
    RetryScheduled { attempt: u32, delay: Duration },
    /// Terminal failure
    Failed { retries_exhausted: bool },
}

struct SchedulerInner {
    tasks: HashMap<TaskId, Task>,
    queues: HashMap<ProjectId, ProjectQueue>,
}

/// Task scheduling facade: registry, per-project dependency graphs, and
/// per-project priority queues behind one lock.
///
/// Multiple worker tasks may call `get_next_task`, `mark_complete`, and
/// `mark_failed` concurrently against a shared instance; dequeue, state
/// transition, and dependent promotion are observed atomically. Each
/// instance owns its state, so independent schedulers can coexist.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<RwLock<SchedulerInner>>,
    store: Arc<dyn TaskStore>,
    config: SchedulerConfig,
    retry_policy: RetryPolicy,
    handlers: Arc<StdRwLock<Vec<Box<dyn SchedulerEventHandler>>>>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig, store: Arc<dyn TaskStore>) -> Self {
        let retry_policy = RetryPolicy::new(config.base_retry_delay_seconds);
        Self {
            inner: Arc::new(RwLock::new(SchedulerInner {
                tasks: HashMap::new(),
                queues: HashMap::new(),
            })),
            store,
            config,
            retry_policy,
            handlers: Arc::new(StdRwLock::new(Vec::new())),
        }
    }

    pub fn add_event_handler(&self, handler: Box<dyn SchedulerEventHandler>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.push(handler);
        }
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Ok(handlers) = self.handlers.read() {
            for handler in handlers.iter() {
                if let Err(e) = handler.handle_event(&event) {
                    error!("event handler error: {}", e);
                }
            }
        }
    }

    /// Register a new task and attempt immediate resolution. The task
    /// lands in the project queue when its dependencies are already
    /// satisfied, otherwise it is blocked until they complete.
    pub async fn schedule_task(&self, spec: TaskSpec) -> Result<TaskId> {
        let task = Task::new(spec, self.config.max_retries);
        let task_id = task.id;
        let project_id = task.project_id.clone();

        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(&task_id) {
            return Err(OrchestratorError::DuplicateTask(task_id));
        }
        self.store.save_task(&task).await?;
        inner.tasks.insert(task_id, task);
        self.emit(SchedulerEvent::TaskScheduled {
            task_id,
            project_id: project_id.clone(),
        });

        // Lenient at insertion: dependencies on tasks not yet submitted
        // leave this task blocked until they arrive. Cycle and
        // referential errors are strict at explicit resolution time.
        self.resolve_project_locked(&mut inner, &project_id, false)
            .await?;
        debug!(task = %task_id, project = %project_id, "task scheduled");
        Ok(task_id)
    }

    /// Run dependency resolution for a project and return an
    /// execution-compatible order over its non-terminal tasks.
    /// Referential integrity is validated before the sort runs.
    pub async fn resolve_dependencies(&self, project_id: &str) -> Result<Vec<TaskId>> {
        let mut inner = self.inner.write().await;
        self.resolve_project_locked(&mut inner, project_id, true).await
    }

    async fn resolve_project_locked(
        &self,
        inner: &mut SchedulerInner,
        project_id: &str,
        strict: bool,
    ) -> Result<Vec<TaskId>> {
        if strict {
            if let Err(e) = DependencyGraph::validate_references(&inner.tasks, project_id) {
                if let OrchestratorError::DependencyNotFound { task_id, .. } = &e {
                    self.block_locked(inner, *task_id).await?;
                }
                return Err(e);
            }
        }

        let graph = DependencyGraph::resolution_graph(&inner.tasks, project_id);
        match graph.topo_order() {
            Ok(order) => {
                self.promote_ready_locked(inner, project_id).await?;
                Ok(order)
            }
            Err(OrchestratorError::CircularDependency { cycle }) => {
                for &id in &cycle {
                    self.block_locked(inner, id).await?;
                }
                warn!(project = project_id, "circular dependency, tasks left blocked");
                Err(OrchestratorError::CircularDependency { cycle })
            }
            Err(e) => Err(e),
        }
    }

    async fn block_locked(&self, inner: &mut SchedulerInner, task_id: TaskId) -> Result<()> {
        let Some(task) = inner.tasks.get_mut(&task_id) else {
            return Ok(());
        };
        if task.state != TaskState::Pending {
            return Ok(());
        }
        task.transition(TaskState::Blocked)?;
        let snapshot = task.clone();
        self.store.save_task(&snapshot).await?;
        self.emit(SchedulerEvent::StateChanged {
            task_id,
            from: TaskState::Pending,
            to: TaskState::Blocked,
        });
        Ok(())
    }

    /// Promote every pending/blocked task whose dependencies have all
    /// completed, enqueueing them; pending tasks with unsatisfied
    /// dependencies become blocked.
    async fn promote_ready_locked(
        &self,
        inner: &mut SchedulerInner,
        project_id: &str,
    ) -> Result<Vec<TaskId>> {
        let candidates: Vec<TaskId> = inner
            .tasks
            .values()
            .filter(|t| {
                t.project_id == project_id
                    && matches!(t.state, TaskState::Pending | TaskState::Blocked)
            })
            .map(|t| t.id)
            .collect();

        let mut promoted = Vec::new();
        for task_id in candidates {
            let satisfied = {
                let task = &inner.tasks[&task_id];
                dependencies_satisfied(&inner.tasks, task)
            };
            let Some(task) = inner.tasks.get_mut(&task_id) else {
                continue;
            };
            let from = task.state;
            if satisfied {
                task.transition(TaskState::Ready)?;
                let snapshot = task.clone();
                inner
                    .queues
                    .entry(project_id.to_string())
                    .or_default()
                    .push(task_id);
                self.store.save_task(&snapshot).await?;
                self.emit(SchedulerEvent::StateChanged {
                    task_id,
                    from,
                    to: TaskState::Ready,
                });
                promoted.push(task_id);
            } else if from == TaskState::Pending {
                task.transition(TaskState::Blocked)?;
                let snapshot = task.clone();
                self.store.save_task(&snapshot).await?;
                self.emit(SchedulerEvent::StateChanged {
                    task_id,
                    from,
                    to: TaskState::Blocked,
                });
            }
        }
        Ok(promoted)
    }

    /// Pop the highest-effective-priority ready task for a project and
    /// hand it to the caller as `Running`. A deadlock among blocked
    /// tasks is an error; an empty queue is `None`.
    pub async fn get_next_task(&self, project_id: &str) -> Result<Option<Task>> {
        let mut inner = self.inner.write().await;

        let blocked = DependencyGraph::blocked_graph(&inner.tasks, project_id);
        if let Some(cycle) = blocked.find_cycle() {
            self.emit(SchedulerEvent::DeadlockDetected {
                project_id: project_id.to_string(),
                cycle: cycle.clone(),
            });
            return Err(OrchestratorError::DeadlockDetected { cycle });
        }

        let now = Utc::now();
        let window = ChronoDuration::seconds(self.config.deadline_boost_window_seconds as i64);

        let SchedulerInner { tasks, queues } = &mut *inner;
        let Some(queue) = queues.get_mut(project_id) else {
            return Ok(None);
        };
        let popped = queue.pop_highest(|id| {
            tasks
                .get(&id)
                .filter(|t| t.state == TaskState::Ready)
                .map(|t| {
                    let blocks = has_nonterminal_dependents(tasks, id);
                    (effective_priority(t, blocks, window, now), t.created_at)
                })
        });

        let Some(task_id) = popped else {
            return Ok(None);
        };
        let Some(task) = inner.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        task.transition(TaskState::Running)?;
        let snapshot = task.clone();
        self.store.save_task(&snapshot).await?;
        self.emit(SchedulerEvent::StateChanged {
            task_id,
            from: TaskState::Ready,
            to: TaskState::Running,
        });
        debug!(task = %task_id, project = project_id, "task dispatched");
        Ok(Some(snapshot))
    }

    /// Record successful completion and promote dependents whose
    /// dependencies are now fully completed.
    pub async fn mark_complete(&self, task_id: TaskId, result: serde_json::Value) -> Result<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound(task_id))?;
        let from = task.state;
        task.transition(TaskState::Completed)?;
        task.result = Some(result);
        let project_id = task.project_id.clone();
        let snapshot = task.clone();

        self.store.save_task(&snapshot).await?;
        self.emit(SchedulerEvent::StateChanged {
            task_id,
            from,
            to: TaskState::Completed,
        });
        self.emit(SchedulerEvent::TaskCompleted { task_id });

        let promoted = self.promote_ready_locked(&mut inner, &project_id).await?;
        info!(
            task = %task_id,
            promoted = promoted.len(),
            "task completed"
        );
        Ok(())
    }

    /// Record a failure. Retryable failures with remaining attempts go
    /// through exponential backoff and re-enqueue without holding any
    /// worker idle; permanent or exhausted failures are terminal.
    pub async fn mark_failed(
        &self,
        task_id: TaskId,
        failure: TaskFailure,
    ) -> Result<FailureOutcome> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get(&task_id)
            .ok_or(OrchestratorError::TaskNotFound(task_id))?;
        let from = task.state;

        // Work on a snapshot and persist it before committing the
        // transition, so a store failure leaves the task re-drivable.
        let mut snapshot = task.clone();
        snapshot.transition(TaskState::Failed)?;
        snapshot.last_error = Some(failure.clone());

        let retry_count = snapshot.retry_count;
        let max_retries = snapshot.max_retries;

        if self
            .retry_policy
            .should_retry(&failure, retry_count, max_retries)
        {
            let delay = self.retry_policy.backoff_delay(retry_count);
            snapshot.transition(TaskState::Retrying)?;
            snapshot.retry_count += 1;
            let attempt = snapshot.retry_count;
            self.store.save_task(&snapshot).await?;
            inner.tasks.insert(task_id, snapshot);
            self.emit(SchedulerEvent::StateChanged {
                task_id,
                from,
                to: TaskState::Failed,
            });
            self.emit(SchedulerEvent::StateChanged {
                task_id,
                from: TaskState::Failed,
                to: TaskState::Retrying,
            });
            self.emit(SchedulerEvent::RetryScheduled {
                task_id,
                attempt,
                delay,
            });

            let scheduler = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = scheduler.finish_backoff(task_id).await {
                    error!(task = %task_id, error = %e, "backoff re-enqueue failed");
                }
            });

            info!(task = %task_id, attempt, ?delay, "retry scheduled");
            return Ok(FailureOutcome::RetryScheduled { attempt, delay });
        }

        let retries_exhausted = self.retry_policy.is_retryable(&failure);
        self.store.save_task(&snapshot).await?;
        inner.tasks.insert(task_id, snapshot);
        self.emit(SchedulerEvent::StateChanged {
            task_id,
            from,
            to: TaskState::Failed,
        });

        let error_text = if retries_exhausted {
            OrchestratorError::MaxRetriesExceeded {
                task_id,
                max_retries,
            }
            .to_string()
        } else {
            failure.to_string()
        };
        self.emit(SchedulerEvent::TaskFailed {
            task_id,
            error: error_text.clone(),
        });
        warn!(task = %task_id, error = %error_text, "task failed terminally");

        if self.config.failure_policy == FailurePolicy::CascadeCancel {
            self.cascade_cancel_locked(&mut inner, task_id).await?;
        }
        Ok(FailureOutcome::Failed { retries_exhausted })
    }

    /// Timer callback: re-enqueue after backoff unless the task was
    /// cancelled in the interim.
    async fn finish_backoff(&self, task_id: TaskId) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(task) = inner.tasks.get_mut(&task_id) else {
            return Ok(());
        };
        if task.state != TaskState::Retrying {
            debug!(task = %task_id, state = ?task.state, "skipping re-enqueue, state changed during backoff");
            return Ok(());
        }
        task.transition(TaskState::Ready)?;
        let project_id = task.project_id.clone();
        let snapshot = task.clone();
        inner
            .queues
            .entry(project_id)
            .or_default()
            .push(task_id);
        self.store.save_task(&snapshot).await?;
        self.emit(SchedulerEvent::StateChanged {
            task_id,
            from: TaskState::Retrying,
            to: TaskState::Ready,
        });
        debug!(task = %task_id, "re-enqueued after backoff");
        Ok(())
    }

    /// Cancel from any non-terminal state. Never cascades to dependents;
    /// any pending retry timer observes the state change and no-ops.
    pub async fn cancel_task(&self, task_id: TaskId, reason: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        self.cancel_locked(&mut inner, task_id, reason).await
    }

    async fn cancel_locked(
        &self,
        inner: &mut SchedulerInner,
        task_id: TaskId,
        reason: &str,
    ) -> Result<()> {
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound(task_id))?;
        let from = task.state;
        task.transition(TaskState::Cancelled)?;
        task.metadata
            .insert("cancel_reason".to_string(), json!(reason));
        let project_id = task.project_id.clone();
        let snapshot = task.clone();

        if let Some(queue) = inner.queues.get_mut(&project_id) {
            queue.remove(task_id);
        }
        self.store.save_task(&snapshot).await?;
        self.emit(SchedulerEvent::StateChanged {
            task_id,
            from,
            to: TaskState::Cancelled,
        });
        info!(task = %task_id, reason, "task cancelled");
        Ok(())
    }

    async fn cascade_cancel_locked(
        &self,
        inner: &mut SchedulerInner,
        failed_id: TaskId,
    ) -> Result<()> {
        let mut frontier: HashSet<TaskId> = HashSet::from([failed_id]);
        let mut seen: HashSet<TaskId> = frontier.clone();

        while !frontier.is_empty() {
            let next: Vec<TaskId> = inner
                .tasks
                .values()
                .filter(|t| {
                    !t.is_terminal()
                        && !seen.contains(&t.id)
                        && t.dependencies.iter().any(|d| frontier.contains(d))
                })
                .map(|t| t.id)
                .collect();

            frontier.clear();
            for id in next {
                self.cancel_locked(inner, id, "upstream dependency failed")
                    .await?;
                seen.insert(id);
                frontier.insert(id);
            }
        }
        Ok(())
    }

    /// Advisory cycle search over currently blocked tasks; distinct from
    /// the resolution-time cycle check.
    pub async fn detect_deadlock(&self, project_id: &str) -> Option<Vec<TaskId>> {
        let inner = self.inner.read().await;
        DependencyGraph::blocked_graph(&inner.tasks, project_id).find_cycle()
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Task> {
        let inner = self.inner.read().await;
        inner
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(OrchestratorError::TaskNotFound(task_id))
    }

    pub async fn get_task_status(&self, task_id: TaskId) -> Result<TaskState> {
        let inner = self.inner.read().await;
        inner
            .tasks
            .get(&task_id)
            .map(|t| t.state)
            .ok_or(OrchestratorError::TaskNotFound(task_id))
    }

    pub async fn get_ready_tasks(&self, project_id: &str) -> Vec<Task> {
        self.tasks_in_state(project_id, TaskState::Ready).await
    }

    pub async fn get_blocked_tasks(&self, project_id: &str) -> Vec<Task> {
        self.tasks_in_state(project_id, TaskState::Blocked).await
    }

    async fn tasks_in_state(&self, project_id: &str, state: TaskState) -> Vec<Task> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.project_id == project_id && t.state == state)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Per-state counts for a project snapshot
    pub async fn task_counts(&self, project_id: &str) -> TaskCounts {
        let inner = self.inner.read().await;
        let mut counts = TaskCounts::default();
        for task in inner.tasks.values() {
            if task.project_id == project_id {
                counts.record(task.state);
            }
        }
        counts
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}
