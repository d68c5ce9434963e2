//! Task store: the durable source of truth for tasks and processed items
//!
//! `PgTaskStore` is the production implementation; `MemoryTaskStore` keeps
//! the same semantics in process for tests and local runs.

pub mod memory;
pub mod postgres;

pub use memory::MemoryTaskStore;
pub use postgres::PgTaskStore;

use crate::db::models::{InsertOutcome, NewTask, Task, TaskAction, TaskId, TransitionOutcome};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: NewTask) -> Result<Task>;

    /// Fetch a task regardless of status or owner
    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>>;

    async fn list_active(&self) -> Result<Vec<Task>>;

    /// Non-deleted tasks of one owner
    async fn list_for_owner(&self, owner: &str) -> Result<Vec<Task>>;

    /// Owner-gated status change; see `TransitionOutcome::NotFound`
    async fn transition(
        &self,
        task_id: TaskId,
        owner: &str,
        action: TaskAction,
    ) -> Result<TransitionOutcome>;

    /// Replace the prompt of a non-deleted task. Returns false if nothing
    /// was updated.
    async fn update_prompt(&self, task_id: TaskId, prompt: &str) -> Result<bool>;

    async fn is_processed(&self, task_id: TaskId, item_id: &str) -> Result<bool>;

    /// Write-once record of a (task, item) pair
    async fn record_processed(&self, task_id: TaskId, item_id: &str) -> Result<InsertOutcome>;

    /// Undo `record_processed` for an item whose publish failed
    async fn forget_processed(&self, task_id: TaskId, item_id: &str) -> Result<bool>;

    /// Hard delete; processed items go with the task
    async fn purge_task(&self, task_id: TaskId) -> Result<bool>;
}

/// Look up a task by id on behalf of `owner`.
///
/// Foreign, unknown and deleted tasks all come back as `None`.
pub async fn owned_task(
    store: &dyn TaskStore,
    task_id: TaskId,
    owner: &str,
) -> Result<Option<Task>> {
    Ok(store
        .get_task(task_id)
        .await?
        .filter(|t| t.owner == owner && t.status != crate::db::models::TaskStatus::Deleted))
}
