use crate::error::{OrchestratorError, Result};
use crate::scheduler::types::{Task, TaskId, TaskState};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Directed dependency graph induced over a single project.
///
/// Derived from the task registry on demand, never stored. Edges point
/// from a task to each of its dependencies.
pub struct DependencyGraph {
    deps: HashMap<TaskId, Vec<TaskId>>,
}

impl DependencyGraph {
    /// Subgraph used for resolution at submission and promotion time:
    /// all non-terminal tasks of the project, with edges restricted to
    /// dependencies that are themselves non-terminal (completed
    /// dependencies are satisfied and drop out of the ordering).
    pub fn resolution_graph(tasks: &HashMap<TaskId, Task>, project_id: &str) -> Self {
        Self::induced(tasks, project_id, |t| !t.is_terminal())
    }

    /// Subgraph used for the defensive deadlock scan before dispatch:
    /// only currently blocked tasks and the edges between them.
    pub fn blocked_graph(tasks: &HashMap<TaskId, Task>, project_id: &str) -> Self {
        Self::induced(tasks, project_id, |t| t.state == TaskState::Blocked)
    }

    fn induced<F>(tasks: &HashMap<TaskId, Task>, project_id: &str, include: F) -> Self
    where
        F: Fn(&Task) -> bool,
    {
        let nodes: HashSet<TaskId> = tasks
            .values()
            .filter(|t| t.project_id == project_id && include(t))
            .map(|t| t.id)
            .collect();

        let mut deps: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for &id in &nodes {
            let task = &tasks[&id];
            let mut edges: Vec<TaskId> = task
                .dependencies
                .iter()
                .copied()
                .filter(|d| nodes.contains(d))
                .collect();
            edges.sort();
            deps.insert(id, edges);
        }

        Self { deps }
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Referential integrity: every dependency id referenced by a project
    /// task must exist in the registry, in any state.
    pub fn validate_references(tasks: &HashMap<TaskId, Task>, project_id: &str) -> Result<()> {
        for task in tasks.values().filter(|t| t.project_id == project_id) {
            for dep in &task.dependencies {
                if !tasks.contains_key(dep) {
                    return Err(OrchestratorError::DependencyNotFound {
                        task_id: task.id,
                        dependency: *dep,
                    });
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm. Returns an execution-compatible order, every
    /// dependency before its dependents. Residual in-degree after
    /// exhaustion means a cycle; the error carries the cycle path.
    pub fn topo_order(&self) -> Result<Vec<TaskId>> {
        let mut in_degree: HashMap<TaskId, usize> = HashMap::new();
        let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();

        for (&id, deps) in &self.deps {
            in_degree.insert(id, deps.len());
            for &dep in deps {
                dependents.entry(dep).or_default().push(id);
            }
        }

        let mut frontier: Vec<TaskId> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        frontier.sort();

        let mut order: Vec<TaskId> = Vec::with_capacity(self.deps.len());
        while let Some(id) = frontier.pop() {
            order.push(id);
            let mut unlocked = Vec::new();
            if let Some(next) = dependents.get(&id) {
                for &dependent in next {
                    if let Some(deg) = in_degree.get_mut(&dependent) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            unlocked.push(dependent);
                        }
                    }
                }
            }
            unlocked.sort();
            frontier.extend(unlocked);
        }

        if order.len() < self.deps.len() {
            let cycle = self.find_cycle().unwrap_or_default();
            debug!(cycle_len = cycle.len(), "dependency resolution found a cycle");
            return Err(OrchestratorError::CircularDependency { cycle });
        }

        Ok(order)
    }

    /// Depth-first search for the first cycle, returned as an ordered path.
    pub fn find_cycle(&self) -> Option<Vec<TaskId>> {
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut starts: Vec<TaskId> = self.deps.keys().copied().collect();
        starts.sort();

        for start in starts {
            if visited.contains(&start) {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path = HashSet::new();
            if let Some(cycle) = self.dfs(start, &mut visited, &mut path, &mut on_path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TaskId,
        visited: &mut HashSet<TaskId>,
        path: &mut Vec<TaskId>,
        on_path: &mut HashSet<TaskId>,
    ) -> Option<Vec<TaskId>> {
        if on_path.contains(&node) {
            if let Some(pos) = path.iter().position(|&n| n == node) {
                return Some(path[pos..].to_vec());
            }
            return Some(path.clone());
        }
        if visited.contains(&node) {
            return None;
        }

        visited.insert(node);
        path.push(node);
        on_path.insert(node);

        if let Some(deps) = self.deps.get(&node) {
            for &dep in deps {
                if let Some(cycle) = self.dfs(dep, visited, path, on_path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        on_path.remove(&node);
        None
    }
}

/// Whether at least one non-terminal task depends on `id` ("blocking boost")
pub fn has_nonterminal_dependents(tasks: &HashMap<TaskId, Task>, id: TaskId) -> bool {
    tasks
        .values()
        .any(|t| t.id != id && !t.is_terminal() && t.dependencies.contains(&id))
}

/// All dependencies of `task` completed, making it eligible for promotion
pub fn dependencies_satisfied(tasks: &HashMap<TaskId, Task>, task: &Task) -> bool {
    task.dependencies.iter().all(|dep| {
        tasks
            .get(dep)
            .map(|d| d.state == TaskState::Completed)
            .unwrap_or(false)
    })
}
