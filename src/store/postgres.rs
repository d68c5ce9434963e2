//! PostgreSQL-backed task store

use super::TaskStore;
use crate::db::models::{InsertOutcome, NewTask, Task, TaskAction, TaskId, TransitionOutcome};
use crate::db::{processed_items, tasks, DbPool};
use crate::error::Result;
use async_trait::async_trait;

#[derive(Clone)]
pub struct PgTaskStore {
    pool: DbPool,
}

impl PgTaskStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create_task(&self, task: NewTask) -> Result<Task> {
        tasks::insert_task(&self.pool, &task).await
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        tasks::get_task(&self.pool, task_id).await
    }

    async fn list_active(&self) -> Result<Vec<Task>> {
        tasks::list_active_tasks(&self.pool).await
    }

    async fn list_for_owner(&self, owner: &str) -> Result<Vec<Task>> {
        tasks::list_tasks_for_owner(&self.pool, owner).await
    }

    async fn transition(
        &self,
        task_id: TaskId,
        owner: &str,
        action: TaskAction,
    ) -> Result<TransitionOutcome> {
        tasks::transition_task(&self.pool, task_id, owner, action).await
    }

    async fn update_prompt(&self, task_id: TaskId, prompt: &str) -> Result<bool> {
        tasks::update_prompt(&self.pool, task_id, prompt).await
    }

    async fn is_processed(&self, task_id: TaskId, item_id: &str) -> Result<bool> {
        processed_items::exists(&self.pool, task_id, item_id).await
    }

    async fn record_processed(&self, task_id: TaskId, item_id: &str) -> Result<InsertOutcome> {
        processed_items::insert(&self.pool, task_id, item_id).await
    }

    async fn forget_processed(&self, task_id: TaskId, item_id: &str) -> Result<bool> {
        processed_items::delete(&self.pool, task_id, item_id).await
    }

    async fn purge_task(&self, task_id: TaskId) -> Result<bool> {
        tasks::purge_task(&self.pool, task_id).await
    }
}
