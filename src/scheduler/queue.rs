use crate::scheduler::types::{Task, TaskId};
use chrono::{DateTime, Duration, Utc};

/// Effective priority used for queue ordering. Recomputed lazily at every
/// ordering decision, never persisted.
///
/// `base_priority + 2` when the deadline falls inside the boost window,
/// `+1` when at least one non-terminal task depends on this one,
/// `-1` once the task has been retried.
pub fn effective_priority(
    task: &Task,
    blocks_others: bool,
    boost_window: Duration,
    now: DateTime<Utc>,
) -> i64 {
    let mut priority = task.base_priority;
    if let Some(deadline) = task.deadline {
        if deadline - now <= boost_window {
            priority += 2;
        }
    }
    if blocks_others {
        priority += 1;
    }
    if task.retry_count > 0 {
        priority -= 1;
    }
    priority
}

/// Max-priority queue of ready task ids for one project.
///
/// Keeps insertion order so that equal effective priorities are served
/// in submission order; the scoring closure is applied at pop time
/// because boosts and penalties shift between decisions.
#[derive(Debug, Default, Clone)]
pub struct ProjectQueue {
    ready: Vec<TaskId>,
}

impl ProjectQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: TaskId) {
        if !self.ready.contains(&id) {
            self.ready.push(id);
        }
    }

    pub fn remove(&mut self, id: TaskId) {
        self.ready.retain(|&queued| queued != id);
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.ready.contains(&id)
    }

    /// Pop the entry with the highest score; ties broken by earliest
    /// `created_at`. Entries the scorer rejects (no longer ready, e.g.
    /// cancelled in the interim) are dropped from the queue.
    pub fn pop_highest<F>(&mut self, score: F) -> Option<TaskId>
    where
        F: Fn(TaskId) -> Option<(i64, DateTime<Utc>)>,
    {
        let mut best: Option<(TaskId, i64, DateTime<Utc>)> = None;
        let mut stale: Vec<TaskId> = Vec::new();

        for &id in &self.ready {
            match score(id) {
                Some((priority, created_at)) => {
                    let better = match best {
                        None => true,
                        Some((_, best_priority, best_created)) => {
                            priority > best_priority
                                || (priority == best_priority && created_at < best_created)
                        }
                    };
                    if better {
                        best = Some((id, priority, created_at));
                    }
                }
                None => stale.push(id),
            }
        }

        let popped = best.map(|(id, _, _)| id);
        self.ready
            .retain(|id| Some(*id) != popped && !stale.contains(id));
        popped
    }
}
