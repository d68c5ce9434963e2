//! Feedback worker - refines a task's stored prompt from owner feedback

use crate::broker::{self, Broker, Delivery};
use crate::db::models::{validate_prompt, TaskStatus};
use crate::llm::PromptRefiner;
use crate::messages::{Envelope, Feedback, Notify, QueueName};
use crate::notify;
use crate::store::TaskStore;
use crate::worker::retry::RetryPolicy;
use crate::worker::runner::{Disposition, MessageHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct FeedbackWorker {
    store: Arc<dyn TaskStore>,
    broker: Arc<dyn Broker>,
    refiner: Arc<dyn PromptRefiner>,
    retry: RetryPolicy,
}

impl FeedbackWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        broker: Arc<dyn Broker>,
        refiner: Arc<dyn PromptRefiner>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            broker,
            refiner,
            retry,
        }
    }
}

#[async_trait]
impl MessageHandler for FeedbackWorker {
    fn queue(&self) -> QueueName {
        QueueName::Feedback
    }

    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let message = match Feedback::decode(&delivery.payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("Dropping message {}: {}", delivery.id, e);
                return Disposition::Ack;
            }
        };

        let task = match self.store.get_task(message.task_id).await {
            Ok(Some(task)) if task.status != TaskStatus::Deleted => task,
            Ok(_) => {
                debug!("Task {} gone, ignoring feedback", message.task_id);
                return Disposition::Ack;
            }
            Err(e) => {
                error!("Loading task {} failed: {}", message.task_id, e);
                return Disposition::Requeue;
            }
        };

        // The stored prompt is refined; the snapshot may predate other feedback
        let refined = self
            .retry
            .run("refine", || {
                self.refiner
                    .refine(&task.current_prompt, &message.feedback_text)
            })
            .await;

        let new_prompt = match refined {
            Ok(Some(prompt)) => prompt,
            Ok(None) => {
                warn!("Task {}: no usable refinement, keeping prompt", task.id);
                return Disposition::Ack;
            }
            Err(e) => {
                warn!("Task {}: refinement failed, keeping prompt: {}", task.id, e);
                return Disposition::Ack;
            }
        };
        if let Err(e) = validate_prompt(&new_prompt) {
            warn!("Task {}: refined prompt rejected: {}", task.id, e);
            return Disposition::Ack;
        }

        match self.store.update_prompt(task.id, &new_prompt).await {
            Ok(true) => info!("Task {}: prompt updated from feedback", task.id),
            Ok(false) => {
                debug!("Task {} deleted before the update landed", task.id);
                return Disposition::Ack;
            }
            Err(e) => {
                error!("Task {}: storing refined prompt failed: {}", task.id, e);
                return Disposition::Requeue;
            }
        }

        let confirmation = Notify {
            task_id: Some(task.id),
            recipient: task.owner.clone(),
            content: notify::feedback_applied(&task),
        };
        if let Err(e) = broker::publish(self.broker.as_ref(), &confirmation).await {
            // Prompt already stored; redelivery would refine it a second time
            warn!("Task {}: confirmation not sent: {}", task.id, e);
        }
        Disposition::Ack
    }
}
