//! Abstract persistence boundary and the two bundled adapters.
//!
//! The engine is the only writer: every task mutation and breakpoint
//! event is written through the store from inside the facades. Store
//! failures surface as [`OrchestratorError::Store`] and are retryable
//! infrastructure errors, never task-domain errors.

use crate::breakpoint::types::BreakpointEvent;
use crate::error::{OrchestratorError, Result};
use crate::scheduler::types::{Task, TaskId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Durable persistence contract for tasks and breakpoint history
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save_task(&self, task: &Task) -> Result<()>;
    async fn load_task(&self, id: TaskId) -> Result<Option<Task>>;
    async fn save_breakpoint_event(&self, event: &BreakpointEvent) -> Result<()>;
    async fn load_breakpoint_history(
        &self,
        project_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<BreakpointEvent>>;
}

/// In-memory store, the default for embedders without durability needs
/// and for tests.
#[derive(Default)]
pub struct MemoryStore {
    tasks: DashMap<TaskId, Task>,
    events: DashMap<String, Vec<BreakpointEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn save_task(&self, task: &Task) -> Result<()> {
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.get(&id).map(|t| t.clone()))
    }

    async fn save_breakpoint_event(&self, event: &BreakpointEvent) -> Result<()> {
        let mut history = self.events.entry(event.project_id.clone()).or_default();
        match history.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => *existing = event.clone(),
            None => history.push(event.clone()),
        }
        Ok(())
    }

    async fn load_breakpoint_history(
        &self,
        project_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<BreakpointEvent>> {
        let history = self
            .events
            .get(project_id)
            .map(|h| h.clone())
            .unwrap_or_default();
        Ok(tail(history, limit))
    }
}

/// JSON-file store: one file per task, one history file per project.
/// Writes go through a temp file and an atomic rename so a crash never
/// leaves a half-written record behind.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        async_fs::create_dir_all(root.join("tasks"))
            .await
            .map_err(store_err)?;
        async_fs::create_dir_all(root.join("breakpoints"))
            .await
            .map_err(store_err)?;
        Ok(Self { root })
    }

    fn task_path(&self, id: TaskId) -> PathBuf {
        self.root.join("tasks").join(format!("{id}.json"))
    }

    fn history_path(&self, project_id: &str) -> PathBuf {
        self.root
            .join("breakpoints")
            .join(format!("{project_id}.json"))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let mut file = async_fs::File::create(&tmp).await.map_err(store_err)?;
        file.write_all(bytes).await.map_err(store_err)?;
        file.sync_all().await.map_err(store_err)?;
        async_fs::rename(&tmp, path).await.map_err(store_err)?;
        debug!(path = %path.display(), "persisted record");
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn save_task(&self, task: &Task) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(task).map_err(store_err)?;
        self.write_atomic(&self.task_path(task.id), &bytes).await
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        let path = self.task_path(id);
        match async_fs::read(&path).await {
            Ok(bytes) => {
                let task = serde_json::from_slice(&bytes).map_err(store_err)?;
                Ok(Some(task))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn save_breakpoint_event(&self, event: &BreakpointEvent) -> Result<()> {
        let path = self.history_path(&event.project_id);
        let mut history: Vec<BreakpointEvent> = match async_fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(store_err)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(store_err(e)),
        };
        match history.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => *existing = event.clone(),
            None => history.push(event.clone()),
        }
        let bytes = serde_json::to_vec_pretty(&history).map_err(store_err)?;
        self.write_atomic(&path, &bytes).await
    }

    async fn load_breakpoint_history(
        &self,
        project_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<BreakpointEvent>> {
        let path = self.history_path(project_id);
        let history: Vec<BreakpointEvent> = match async_fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(store_err)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(store_err(e)),
        };
        Ok(tail(history, limit))
    }
}

fn tail(mut history: Vec<BreakpointEvent>, limit: Option<usize>) -> Vec<BreakpointEvent> {
    if let Some(limit) = limit {
        if history.len() > limit {
            history.drain(..history.len() - limit);
        }
    }
    history
}

fn store_err(e: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Store(e.to_string())
}
