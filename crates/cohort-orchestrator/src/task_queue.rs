use chrono::{DateTime, Utc};
use cohort_core::{Task, TaskId};

/// The orchestrator's list of `Pending` tasks awaiting an agent.
///
/// Insertion order is preserved; [`TaskQueue::drain_in_schedule_order`]
/// applies a stable sort on `(priority, created_at)` so equal keys keep the
/// order they were submitted in.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Vec<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task at the back of the queue.
    pub fn push(&mut self, task: Task) -> TaskId {
        let id = task.id;
        self.tasks.push(task);
        id
    }

    /// Put tasks back, preserving their relative order.
    pub fn extend(&mut self, tasks: impl IntoIterator<Item = Task>) {
        self.tasks.extend(tasks);
    }

    /// Take every task out, highest priority first, oldest first within a priority.
    pub fn drain_in_schedule_order(&mut self) -> Vec<Task> {
        let mut tasks = std::mem::take(&mut self.tasks);
        tasks.sort_by_key(Task::schedule_key);
        tasks
    }

    /// Remove and return tasks whose deadline has passed.
    pub fn take_overdue(&mut self, now: DateTime<Utc>) -> Vec<Task> {
        let (overdue, keep): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|t| t.is_overdue(now));
        self.tasks = keep;
        overdue
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let idx = self.tasks.iter().position(|t| t.id == id)?;
        Some(self.tasks.remove(idx))
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
