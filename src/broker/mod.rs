//! Queue broker: durable named queues with at-least-once delivery
//!
//! Consumption is pull based. `receive` leases a single message (prefetch of
//! one); the consumer must `ack` it to remove it or `nack` it to make it
//! visible again. A lease that is never settled (crash, abrupt shutdown)
//! expires and the message is redelivered.

#[cfg(test)]
pub(crate) mod failing;
pub mod memory;
pub mod postgres;

pub use memory::MemoryBroker;
pub use postgres::PgBroker;

use crate::error::Result;
use crate::messages::{Envelope, QueueName};
use async_trait::async_trait;
use std::time::Duration;

/// A leased message
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: i64,
    pub queue: QueueName,
    pub payload: serde_json::Value,
    /// How many times this message has been handed out, this one included
    pub deliveries: u32,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.deliveries > 1
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Persist a message; returns only once it is durable
    async fn publish(&self, queue: QueueName, payload: serde_json::Value) -> Result<()>;

    /// Lease the next message, waiting up to `wait` for one to show up
    async fn receive(&self, queue: QueueName, wait: Duration) -> Result<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Return a leased message to the queue for redelivery
    async fn nack(&self, delivery: &Delivery) -> Result<()>;

    /// Messages in the queue, leased or not
    async fn depth(&self, queue: QueueName) -> Result<usize>;
}

/// Encode and publish an envelope on its queue
pub async fn publish<E: Envelope>(broker: &dyn Broker, message: &E) -> Result<()> {
    broker.publish(E::QUEUE, message.encode()?).await
}
