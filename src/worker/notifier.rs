//! Notifier - hands notify messages to the delivery channel

use crate::broker::Delivery;
use crate::messages::{Envelope, Notify, QueueName};
use crate::notify::DeliveryChannel;
use crate::worker::runner::{Disposition, MessageHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct NotifierWorker {
    channel: Arc<dyn DeliveryChannel>,
}

impl NotifierWorker {
    pub fn new(channel: Arc<dyn DeliveryChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl MessageHandler for NotifierWorker {
    fn queue(&self) -> QueueName {
        QueueName::Notify
    }

    /// Always acks: delivery failures are logged, not retried
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let message = match Notify::decode(&delivery.payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("Dropping message {}: {}", delivery.id, e);
                return Disposition::Ack;
            }
        };

        match self
            .channel
            .deliver(&message.recipient, &message.content)
            .await
        {
            Ok(()) => debug!(
                "Delivered {:?} to {}",
                message.content.subject, message.recipient
            ),
            Err(e) => error!(
                "Delivering {:?} to {} failed: {}",
                message.content.subject, message.recipient, e
            ),
        }
        Disposition::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, Result};
    use crate::messages::NotifyContent;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl DeliveryChannel for Outbox {
        async fn deliver(&self, recipient: &str, _content: &NotifyContent) -> Result<()> {
            if self.fail {
                return Err(PipelineError::DeliveryError("smtp down".to_string()));
            }
            self.sent.lock().unwrap().push(recipient.to_string());
            Ok(())
        }
    }

    fn delivery() -> Delivery {
        let message = Notify {
            task_id: Some(1),
            recipient: "ana".to_string(),
            content: NotifyContent {
                subject: "hi".to_string(),
                body: "body".to_string(),
            },
        };
        Delivery {
            id: 9,
            queue: QueueName::Notify,
            payload: message.encode().unwrap(),
            deliveries: 1,
        }
    }

    #[tokio::test]
    async fn delivers_to_recipient() {
        let outbox = Arc::new(Outbox::default());
        let worker = NotifierWorker::new(outbox.clone());

        assert_eq!(worker.handle(&delivery()).await, Disposition::Ack);
        assert_eq!(*outbox.sent.lock().unwrap(), vec!["ana".to_string()]);
    }

    #[tokio::test]
    async fn failed_delivery_is_still_acked() {
        let outbox = Arc::new(Outbox {
            fail: true,
            ..Default::default()
        });
        let worker = NotifierWorker::new(outbox);
        assert_eq!(worker.handle(&delivery()).await, Disposition::Ack);
    }
}
