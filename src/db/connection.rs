//! Database connection management

use crate::error::{PipelineError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, warn};

/// Type alias for the database pool
pub type DbPool = PgPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id              BIGSERIAL PRIMARY KEY,
    owner           VARCHAR(255) NOT NULL,
    description     TEXT NOT NULL,
    source_kind     VARCHAR(50) NOT NULL,
    source_params   JSONB NOT NULL DEFAULT '{}',
    current_prompt  TEXT NOT NULL,
    status          VARCHAR(20) NOT NULL DEFAULT 'active',
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS ix_tasks_owner ON tasks (owner);
CREATE INDEX IF NOT EXISTS ix_tasks_status ON tasks (status);

CREATE TABLE IF NOT EXISTS processed_items (
    id              BIGSERIAL PRIMARY KEY,
    task_id         BIGINT NOT NULL REFERENCES tasks (id) ON DELETE CASCADE,
    item_id         TEXT NOT NULL,
    processed_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE UNIQUE INDEX IF NOT EXISTS ix_task_item ON processed_items (task_id, item_id);
ALTER TABLE processed_items ALTER COLUMN item_id TYPE TEXT;

CREATE TABLE IF NOT EXISTS queue_messages (
    id              BIGSERIAL PRIMARY KEY,
    queue           VARCHAR(100) NOT NULL,
    payload         JSONB NOT NULL,
    deliveries      INTEGER NOT NULL DEFAULT 0,
    visible_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS ix_queue_visible ON queue_messages (queue, visible_at, id);
"#;

/// Create a new database connection pool
///
/// # Arguments
/// * `database_url` - PostgreSQL connection string
pub async fn create_pool(database_url: &str) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Create a pool from DATABASE_URL environment variable
pub async fn create_pool_from_env() -> Result<DbPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| PipelineError::ConfigError("DATABASE_URL not set".to_string()))?;

    create_pool(&database_url).await
}

/// Connect with a fixed-interval retry.
///
/// Exhausting the attempts is the one fatal condition for a worker, so the
/// error is reported as `BrokerUnavailable`.
pub async fn connect_with_retry(
    database_url: &str,
    attempts: u32,
    interval: Duration,
) -> Result<DbPool> {
    let attempts = attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match create_pool(database_url).await {
            Ok(pool) => {
                if attempt > 1 {
                    info!("Connected to database on attempt {}", attempt);
                }
                return Ok(pool);
            }
            Err(e) => {
                last_error = e.to_string();
                warn!(
                    "Database connection attempt {}/{} failed: {}",
                    attempt, attempts, last_error
                );
                if attempt < attempts {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    Err(PipelineError::BrokerUnavailable {
        attempts,
        last_error,
    })
}

/// Create tables and indexes if they do not exist yet
pub async fn init_schema(pool: &DbPool) -> Result<()> {
    info!("Initializing database schema...");
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    info!("Database schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_create_pool_and_schema() {
        dotenvy::dotenv().ok();
        let pool = create_pool_from_env().await.unwrap();
        init_schema(&pool).await.unwrap();
        // Idempotent
        init_schema(&pool).await.unwrap();
    }
}
