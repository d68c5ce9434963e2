//! Relevance filter - classifies raw content against the task's prompt and
//! forwards relevant items to notify

use crate::broker::{self, Broker, Delivery};
use crate::db::models::Task;
use crate::llm::{Classifier, Verdict};
use crate::messages::{ContentItem, Envelope, Notify, QueueName, RawContent};
use crate::notify;
use crate::store::TaskStore;
use crate::worker::retry::RetryPolicy;
use crate::worker::runner::{Disposition, MessageHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct RelevanceFilter {
    store: Arc<dyn TaskStore>,
    broker: Arc<dyn Broker>,
    classifier: Arc<dyn Classifier>,
    retry: RetryPolicy,
}

impl RelevanceFilter {
    pub fn new(
        store: Arc<dyn TaskStore>,
        broker: Arc<dyn Broker>,
        classifier: Arc<dyn Classifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            broker,
            classifier,
            retry,
        }
    }

    /// Classify with bounded retry. Never fails: anything short of a real
    /// answer is a not-relevant verdict.
    pub async fn evaluate(&self, task: &Task, item: &ContentItem) -> Verdict {
        let result = self
            .retry
            .run("classify", || {
                self.classifier.classify(&task.current_prompt, item)
            })
            .await;

        match result {
            Ok(verdict) => verdict,
            Err(e) if e.is_transient() => {
                warn!(
                    "Classifier unavailable for task {} item {} after {} attempts: {}",
                    task.id, item.id, self.retry.max_attempts, e
                );
                Verdict::fail_closed(format!("retries exhausted: {}", e))
            }
            Err(e) => {
                warn!(
                    "Classifier rejected task {} item {}: {}",
                    task.id, item.id, e
                );
                Verdict::fail_closed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl MessageHandler for RelevanceFilter {
    fn queue(&self) -> QueueName {
        QueueName::RawContent
    }

    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let message = match RawContent::decode(&delivery.payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("Dropping message {}: {}", delivery.id, e);
                return Disposition::Ack;
            }
        };

        let task = match self.store.get_task(message.task_id).await {
            Ok(Some(task)) if task.is_active() => task,
            Ok(Some(task)) => {
                debug!(
                    "Task {} is {}, discarding item {}",
                    task.id, task.status, message.item.id
                );
                return Disposition::Ack;
            }
            Ok(None) => {
                debug!(
                    "Task {} not found, discarding item {}",
                    message.task_id, message.item.id
                );
                return Disposition::Ack;
            }
            Err(e) => {
                error!("Loading task {} failed: {}", message.task_id, e);
                return Disposition::Requeue;
            }
        };

        let verdict = self.evaluate(&task, &message.item).await;
        debug!(
            "Task {} item {}: relevant={} ({})",
            task.id, message.item.id, verdict.relevant, verdict.reason
        );
        if !verdict.relevant {
            return Disposition::Ack;
        }

        let notification = Notify {
            task_id: Some(task.id),
            recipient: task.owner.clone(),
            content: notify::relevant_content(&task, &message.item),
        };
        match broker::publish(self.broker.as_ref(), &notification).await {
            Ok(()) => {
                info!("Task {}: item {} is relevant", task.id, message.item.id);
                Disposition::Ack
            }
            Err(e) => {
                error!(
                    "Task {}: publishing notification for {} failed: {}",
                    task.id, message.item.id, e
                );
                Disposition::Requeue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::db::models::{NewTask, SourceDescriptor};
    use crate::error::{PipelineError, Result};
    use crate::store::MemoryTaskStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Keyword(&'static str);

    #[async_trait]
    impl Classifier for Keyword {
        async fn classify(&self, _prompt: &str, item: &ContentItem) -> Result<Verdict> {
            Ok(if item.title.contains(self.0) {
                Verdict::relevant("keyword")
            } else {
                Verdict::not_relevant("keyword")
            })
        }
    }

    struct Forbidden(AtomicU32);

    #[async_trait]
    impl Classifier for Forbidden {
        async fn classify(&self, _prompt: &str, _item: &ContentItem) -> Result<Verdict> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::Upstream {
                url: "http://llm".to_string(),
                status: 403,
            })
        }
    }

    async fn setup(
        classifier: Arc<dyn Classifier>,
    ) -> (Arc<MemoryBroker>, RelevanceFilter, Task) {
        let store = Arc::new(MemoryTaskStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let task = store
            .create_task(NewTask {
                owner: "ana@example.com".to_string(),
                description: "rust".to_string(),
                source: SourceDescriptor::new("reddit", json!({})),
                current_prompt: "Rust? {{CONTENT}}".to_string(),
            })
            .await
            .unwrap();
        let filter = RelevanceFilter::new(
            store,
            broker.clone(),
            classifier,
            RetryPolicy::immediate(3),
        );
        (broker, filter, task)
    }

    fn delivery(payload: serde_json::Value) -> Delivery {
        Delivery {
            id: 1,
            queue: QueueName::RawContent,
            payload,
            deliveries: 1,
        }
    }

    #[tokio::test]
    async fn relevant_item_reaches_owner() {
        let (broker, filter, task) = setup(Arc::new(Keyword("Rust"))).await;
        let raw = RawContent {
            task_id: task.id,
            item: ContentItem::new("1", "Rust 1.80 released", "", ""),
        };

        let disposition = filter.handle(&delivery(raw.encode().unwrap())).await;
        assert_eq!(disposition, Disposition::Ack);

        let pending = broker.pending(QueueName::Notify).await;
        assert_eq!(pending.len(), 1);
        let notification = Notify::decode(&pending[0]).unwrap();
        assert_eq!(notification.recipient, "ana@example.com");
        assert_eq!(notification.content.subject, format!("[Task #{}] Rust 1.80 released", task.id));
    }

    #[tokio::test]
    async fn irrelevant_item_is_acked_silently() {
        let (broker, filter, task) = setup(Arc::new(Keyword("Rust"))).await;
        let raw = RawContent {
            task_id: task.id,
            item: ContentItem::new("2", "Gardening tips", "", ""),
        };

        assert_eq!(filter.handle(&delivery(raw.encode().unwrap())).await, Disposition::Ack);
        assert!(broker.pending(QueueName::Notify).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let (_, filter, _) = setup(Arc::new(Keyword("Rust"))).await;
        let disposition = filter.handle(&delivery(json!({"task": "nope"}))).await;
        assert_eq!(disposition, Disposition::Ack);
    }

    #[tokio::test]
    async fn permanent_classifier_error_fails_closed_without_retry() {
        let forbidden = Arc::new(Forbidden(AtomicU32::new(0)));
        let (broker, filter, task) = setup(forbidden.clone()).await;
        let raw = RawContent {
            task_id: task.id,
            item: ContentItem::new("3", "Rust", "", ""),
        };

        assert_eq!(filter.handle(&delivery(raw.encode().unwrap())).await, Disposition::Ack);
        assert_eq!(forbidden.0.load(Ordering::SeqCst), 1);
        assert!(broker.pending(QueueName::Notify).await.is_empty());
    }
}
