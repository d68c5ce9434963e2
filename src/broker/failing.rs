//! Broker wrapper that fails a scripted number of calls before passing
//! through to a `MemoryBroker`

use super::{Broker, Delivery, MemoryBroker};
use crate::error::{PipelineError, Result};
use crate::messages::QueueName;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct FailingBroker {
    inner: Arc<MemoryBroker>,
    publish_failures: AtomicU32,
    receive_failures: AtomicU32,
    failed: AtomicU32,
}

impl FailingBroker {
    pub fn new(inner: Arc<MemoryBroker>) -> Self {
        Self {
            inner,
            publish_failures: AtomicU32::new(0),
            receive_failures: AtomicU32::new(0),
            failed: AtomicU32::new(0),
        }
    }

    pub fn fail_publish(self, n: u32) -> Self {
        self.publish_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn fail_receive(self, n: u32) -> Self {
        self.receive_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Calls that returned an error so far
    pub fn failed(&self) -> u32 {
        self.failed.load(Ordering::SeqCst)
    }

    fn trip(&self, budget: &AtomicU32) -> Result<()> {
        match budget.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
            Ok(_) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::Timeout(Duration::from_secs(5)))
            }
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Broker for FailingBroker {
    async fn publish(&self, queue: QueueName, payload: serde_json::Value) -> Result<()> {
        self.trip(&self.publish_failures)?;
        self.inner.publish(queue, payload).await
    }

    async fn receive(&self, queue: QueueName, wait: Duration) -> Result<Option<Delivery>> {
        self.trip(&self.receive_failures)?;
        self.inner.receive(queue, wait).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.inner.ack(delivery).await
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        self.inner.nack(delivery).await
    }

    async fn depth(&self, queue: QueueName) -> Result<usize> {
        self.inner.depth(queue).await
    }
}
