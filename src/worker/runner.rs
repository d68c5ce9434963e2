//! Consumer runner - pull loop shared by every queue worker

use crate::broker::{Broker, Delivery};
use crate::error::Result;
use crate::messages::QueueName;
use crate::worker::WorkerConfig;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// What to do with a delivery once the handler is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove from the queue
    Ack,
    /// Make it visible again for another attempt
    Requeue,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn queue(&self) -> QueueName;

    /// Handle one delivery. Failures are expressed through the disposition;
    /// the runner never inspects the payload.
    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

/// Runs one handler against its queue until shutdown is signaled
pub struct ConsumerRunner {
    broker: Arc<dyn Broker>,
    handler: Arc<dyn MessageHandler>,
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl ConsumerRunner {
    pub fn new(
        broker: Arc<dyn Broker>,
        handler: Arc<dyn MessageHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            broker,
            handler,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a shutdown flag with other runners in the same process
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Get a handle to signal shutdown
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Main consume loop.
    ///
    /// Broker errors are never fatal here: the loop sleeps the reconnect
    /// interval and tries again. Messages leased at the time stay in the
    /// queue and come back once their lease expires.
    pub async fn run(&self) -> Result<()> {
        let queue = self.handler.queue();
        info!("Starting consumer on queue {}...", queue);
        info!("Handler timeout: {:?}", self.config.handler_timeout);
        info!("Max deliveries: {}", self.config.max_deliveries);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown signal received, stopping consumer on {}...", queue);
                break;
            }

            match self.process_one().await {
                Ok(true) => {}
                Ok(false) => debug!("Queue {} idle", queue),
                Err(e) => {
                    error!(
                        "Broker error on {}: {}; retrying in {:?}",
                        queue, e, self.config.reconnect_interval
                    );
                    sleep(self.config.reconnect_interval).await;
                }
            }
        }

        info!("Consumer on {} stopped", queue);
        Ok(())
    }

    /// Receive and settle a single message (used by --once and tests)
    ///
    /// Returns:
    /// - Ok(true) if a message was handled
    /// - Ok(false) if the queue stayed empty for the receive wait
    /// - Err on broker error
    pub async fn process_one(&self) -> Result<bool> {
        let queue = self.handler.queue();
        let delivery = match self.broker.receive(queue, self.config.receive_wait).await? {
            Some(d) => d,
            None => return Ok(false),
        };

        if delivery.deliveries > self.config.max_deliveries {
            error!(
                "Message {} on {} delivered {} times, dropping: {}",
                delivery.id, queue, delivery.deliveries, delivery.payload
            );
            self.broker.ack(&delivery).await?;
            return Ok(true);
        }
        if delivery.is_redelivery() {
            debug!(
                "Redelivery {} of message {} on {}",
                delivery.deliveries, delivery.id, queue
            );
        }

        let disposition =
            match tokio::time::timeout(self.config.handler_timeout, self.handler.handle(&delivery))
                .await
            {
                Ok(disposition) => disposition,
                Err(_) => {
                    warn!(
                        "Message {} on {} timed out after {:?}",
                        delivery.id, queue, self.config.handler_timeout
                    );
                    Disposition::Requeue
                }
            };

        match disposition {
            Disposition::Ack => self.broker.ack(&delivery).await?,
            Disposition::Requeue => self.broker.nack(&delivery).await?,
        }
        Ok(true)
    }

    /// Handle messages until the queue is empty; returns how many were handled
    pub async fn drain(&self) -> Result<usize> {
        let mut handled = 0;
        while self.process_one().await? {
            handled += 1;
        }
        Ok(handled)
    }
}

/// Sleep for `duration`, waking early once shutdown is signaled
pub async fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let step = Duration::from_secs(1);
    let mut remaining = duration;
    while !remaining.is_zero() && !shutdown.load(Ordering::Relaxed) {
        let slice = remaining.min(step);
        sleep(slice).await;
        remaining -= slice;
    }
}

/// Setup signal handlers for graceful shutdown
pub fn setup_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, finishing in-flight work...");
                shutdown.store(true, Ordering::Relaxed);
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    });
}
