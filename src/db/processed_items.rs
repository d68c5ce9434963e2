//! Processed items database operations

use crate::db::models::{InsertOutcome, TaskId};
use crate::db::DbPool;
use crate::error::Result;

/// Check whether an item was already recorded for a task
pub async fn exists(pool: &DbPool, task_id: TaskId, item_id: &str) -> Result<bool> {
    let found = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM processed_items WHERE task_id = $1 AND item_id = $2)",
    )
    .bind(task_id)
    .bind(item_id)
    .fetch_one(pool)
    .await?;

    Ok(found)
}

/// Record an item for a task.
///
/// A unique violation means another poller recorded the same pair first;
/// that is reported as `Duplicate` rather than an error.
pub async fn insert(pool: &DbPool, task_id: TaskId, item_id: &str) -> Result<InsertOutcome> {
    let result = sqlx::query(
        r#"
        INSERT INTO processed_items (task_id, item_id, processed_at)
        VALUES ($1, $2, NOW())
        "#,
    )
    .bind(task_id)
    .bind(item_id)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Ok(InsertOutcome::Duplicate)
        }
        Err(e) => Err(e.into()),
    }
}

/// Remove a recorded item so the next poll cycle picks it up again.
///
/// Returns false if the pair was not recorded.
pub async fn delete(pool: &DbPool, task_id: TaskId, item_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM processed_items WHERE task_id = $1 AND item_id = $2")
        .bind(task_id)
        .bind(item_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Count recorded items for a task
pub async fn count_for_task(pool: &DbPool, task_id: TaskId) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM processed_items WHERE task_id = $1",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}
