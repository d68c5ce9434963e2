//! Queue table operations backing the Postgres broker
//!
//! A claimed row stays in the table with `visible_at` pushed into the
//! future. Ack deletes it; nack or an expired lease makes it visible again.
//! `deliveries` doubles as a fencing token so a consumer whose lease expired
//! cannot ack or release a row that was re-claimed by someone else.

use crate::db::models::QueueMessage;
use crate::db::DbPool;
use crate::error::Result;
use std::time::Duration;

/// Persist a message. Returns once the row is committed.
pub async fn enqueue(pool: &DbPool, queue: &str, payload: &serde_json::Value) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO queue_messages (queue, payload)
        VALUES ($1, $2)
        RETURNING id
        "#,
    )
    .bind(queue)
    .bind(payload)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Atomically lease the oldest visible message of a queue.
///
/// Safe for concurrent consumers without an explicit transaction.
pub async fn claim_next(
    pool: &DbPool,
    queue: &str,
    visibility_timeout: Duration,
) -> Result<Option<QueueMessage>> {
    let message = sqlx::query_as::<_, QueueMessage>(
        r#"
        WITH next_message AS (
            SELECT id FROM queue_messages
            WHERE queue = $1
              AND visible_at <= NOW()
            ORDER BY id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE queue_messages
        SET deliveries = deliveries + 1,
            visible_at = NOW() + make_interval(secs => $2)
        WHERE id = (SELECT id FROM next_message)
        RETURNING *
        "#,
    )
    .bind(queue)
    .bind(visibility_timeout.as_secs_f64())
    .fetch_optional(pool)
    .await?;

    Ok(message)
}

/// Remove an acknowledged message
pub async fn delete_message(pool: &DbPool, id: i64, deliveries: i32) -> Result<bool> {
    let result = sqlx::query("DELETE FROM queue_messages WHERE id = $1 AND deliveries = $2")
        .bind(id)
        .bind(deliveries)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Make a leased message visible again immediately
pub async fn release_message(pool: &DbPool, id: i64, deliveries: i32) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE queue_messages
        SET visible_at = NOW()
        WHERE id = $1
          AND deliveries = $2
        "#,
    )
    .bind(id)
    .bind(deliveries)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Count messages in a queue, leased or not
pub async fn count_messages(pool: &DbPool, queue: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM queue_messages WHERE queue = $1")
        .bind(queue)
        .fetch_one(pool)
        .await?;

    Ok(count)
}
