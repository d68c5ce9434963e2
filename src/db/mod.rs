//! Database module
//!
//! Provides PostgreSQL operations for tasks, processed items and the queue table.

pub mod connection;
pub mod models;
pub mod processed_items;
pub mod queue;
pub mod tasks;

pub use connection::{connect_with_retry, create_pool, create_pool_from_env, init_schema, DbPool};
pub use models::*;
