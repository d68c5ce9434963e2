//! Broker backed by the queue_messages table

use super::{Broker, Delivery};
use crate::db::{connect_with_retry, queue, DbPool};
use crate::error::Result;
use crate::messages::QueueName;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct PgBroker {
    pool: DbPool,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl PgBroker {
    pub fn new(pool: DbPool, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            visibility_timeout,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Connect with fixed-interval retry; exhaustion is fatal for the caller
    pub async fn connect(
        database_url: &str,
        attempts: u32,
        retry_interval: Duration,
        visibility_timeout: Duration,
    ) -> Result<Self> {
        let pool = connect_with_retry(database_url, attempts, retry_interval).await?;
        Ok(Self::new(pool, visibility_timeout))
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn publish(&self, queue: QueueName, payload: serde_json::Value) -> Result<()> {
        let id = queue::enqueue(&self.pool, queue.as_str(), &payload).await?;
        debug!("Published message {} to {}", id, queue);
        Ok(())
    }

    async fn receive(&self, queue: QueueName, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(message) =
                queue::claim_next(&self.pool, queue.as_str(), self.visibility_timeout).await?
            {
                return Ok(Some(Delivery {
                    id: message.id,
                    queue,
                    payload: message.payload,
                    deliveries: message.deliveries.max(0) as u32,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let deleted =
            queue::delete_message(&self.pool, delivery.id, delivery.deliveries as i32).await?;
        if !deleted {
            warn!(
                "Ack for message {} on {} ignored: lease expired and message was re-claimed",
                delivery.id, delivery.queue
            );
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let released =
            queue::release_message(&self.pool, delivery.id, delivery.deliveries as i32).await?;
        if !released {
            warn!(
                "Nack for message {} on {} ignored: lease no longer held",
                delivery.id, delivery.queue
            );
        }
        Ok(())
    }

    async fn depth(&self, queue: QueueName) -> Result<usize> {
        let count = queue::count_messages(&self.pool, queue.as_str()).await?;
        Ok(count.max(0) as usize)
    }
}
