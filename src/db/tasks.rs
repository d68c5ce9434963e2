//! Tasks database operations
//!
//! Every mutation is a single row-scoped statement, so two workers touching
//! the same task never interleave inside one update.

use crate::db::models::{NewTask, Task, TaskAction, TaskId, TaskRow, TransitionOutcome};
use crate::db::DbPool;
use crate::error::Result;

/// Insert a new task with status 'active'
pub async fn insert_task(pool: &DbPool, task: &NewTask) -> Result<Task> {
    task.validate()?;

    let row = sqlx::query_as::<_, TaskRow>(
        r#"
        INSERT INTO tasks (owner, description, source_kind, source_params, current_prompt, status)
        VALUES ($1, $2, $3, $4, $5, 'active')
        RETURNING *
        "#,
    )
    .bind(&task.owner)
    .bind(&task.description)
    .bind(&task.source.kind)
    .bind(&task.source.params)
    .bind(&task.current_prompt)
    .fetch_one(pool)
    .await?;

    row.try_into()
}

/// Get a task by ID, whatever its status
pub async fn get_task(pool: &DbPool, task_id: TaskId) -> Result<Option<Task>> {
    let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await?;

    row.map(Task::try_from).transpose()
}

/// All tasks the poller should visit
pub async fn list_active_tasks(pool: &DbPool) -> Result<Vec<Task>> {
    let rows = sqlx::query_as::<_, TaskRow>(
        "SELECT * FROM tasks WHERE status = 'active' ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Task::try_from).collect()
}

/// Non-deleted tasks belonging to an owner
pub async fn list_tasks_for_owner(pool: &DbPool, owner: &str) -> Result<Vec<Task>> {
    let rows = sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT * FROM tasks
        WHERE owner = $1
          AND status <> 'deleted'
        ORDER BY created_at ASC
        "#,
    )
    .bind(owner)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Task::try_from).collect()
}

/// Apply an owner-gated status change.
///
/// Every allowed transition starts from a non-deleted status, so the owner
/// check, the terminal-state check and the write collapse into one UPDATE.
pub async fn transition_task(
    pool: &DbPool,
    task_id: TaskId,
    owner: &str,
    action: TaskAction,
) -> Result<TransitionOutcome> {
    let row = sqlx::query_as::<_, TaskRow>(
        r#"
        UPDATE tasks
        SET status = $3,
            updated_at = NOW()
        WHERE id = $1
          AND owner = $2
          AND status <> 'deleted'
        RETURNING *
        "#,
    )
    .bind(task_id)
    .bind(owner)
    .bind(action.target().as_str())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(TransitionOutcome::Applied(row.try_into()?)),
        None => Ok(TransitionOutcome::NotFound),
    }
}

/// Replace the filtering prompt of a live task.
///
/// Returns false when the task is gone or deleted. Concurrent writers are
/// last-write-wins.
pub async fn update_prompt(pool: &DbPool, task_id: TaskId, prompt: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET current_prompt = $2,
            updated_at = NOW()
        WHERE id = $1
          AND status <> 'deleted'
        "#,
    )
    .bind(task_id)
    .bind(prompt)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Hard-delete a task; processed_items rows cascade
pub async fn purge_task(pool: &DbPool, task_id: TaskId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
        .bind(task_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
