//! In-memory task store for tests and local runs

use super::TaskStore;
use crate::db::models::{
    InsertOutcome, NewTask, Task, TaskAction, TaskId, TaskStatus, TransitionOutcome,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

struct MemoryState {
    tasks: BTreeMap<TaskId, Task>,
    processed: HashSet<(TaskId, String)>,
    next_id: TaskId,
}

/// A single mutex stands in for row-level locking: every operation sees
/// and mutates a consistent snapshot.
pub struct MemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                tasks: BTreeMap::new(),
                processed: HashSet::new(),
                next_id: 1,
            }),
        }
    }

    /// Number of recorded processed items for a task
    pub async fn processed_count(&self, task_id: TaskId) -> usize {
        let state = self.state.lock().await;
        state.processed.iter().filter(|(t, _)| *t == task_id).count()
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, task: NewTask) -> Result<Task> {
        task.validate()?;

        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;

        let now = Utc::now();
        let task = Task {
            id,
            owner: task.owner,
            description: task.description,
            source: task.source,
            current_prompt: task.current_prompt,
            status: TaskStatus::Active,
            created_at: now,
            updated_at: now,
        };
        state.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        Ok(self.state.lock().await.tasks.get(&task_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state.tasks.values().filter(|t| t.is_active()).cloned().collect())
    }

    async fn list_for_owner(&self, owner: &str) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.owner == owner && t.status != TaskStatus::Deleted)
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        task_id: TaskId,
        owner: &str,
        action: TaskAction,
    ) -> Result<TransitionOutcome> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if task.owner != owner {
            return Ok(TransitionOutcome::NotFound);
        }
        match task.status.apply(action) {
            Some(next) => {
                task.status = next;
                task.updated_at = Utc::now();
                Ok(TransitionOutcome::Applied(task.clone()))
            }
            None => Ok(TransitionOutcome::NotFound),
        }
    }

    async fn update_prompt(&self, task_id: TaskId, prompt: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(&task_id) {
            Some(task) if task.status != TaskStatus::Deleted => {
                task.current_prompt = prompt.to_string();
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_processed(&self, task_id: TaskId, item_id: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.processed.contains(&(task_id, item_id.to_string())))
    }

    async fn record_processed(&self, task_id: TaskId, item_id: &str) -> Result<InsertOutcome> {
        let mut state = self.state.lock().await;
        if state.processed.insert((task_id, item_id.to_string())) {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::Duplicate)
        }
    }

    async fn forget_processed(&self, task_id: TaskId, item_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.processed.remove(&(task_id, item_id.to_string())))
    }

    async fn purge_task(&self, task_id: TaskId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let removed = state.tasks.remove(&task_id).is_some();
        state.processed.retain(|(t, _)| *t != task_id);
        Ok(removed)
    }
}
