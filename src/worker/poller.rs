//! Source poller - fetches new items for every active task and publishes
//! the unseen ones to raw-content

use crate::broker::{self, Broker};
use crate::db::models::{InsertOutcome, Task, TaskId};
use crate::error::Result;
use crate::messages::RawContent;
use crate::sources::SourceRegistry;
use crate::store::TaskStore;
use crate::worker::runner::sleep_unless_shutdown;
use crate::worker::WorkerConfig;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Counters for one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub tasks: usize,
    pub fetched: usize,
    pub published: usize,
    pub skipped: usize,
    pub failed_tasks: usize,
}

/// In-process memory of pairs already known to be processed.
///
/// Only ever filled after the store has confirmed a pair, so a miss always
/// falls through to the durable check.
pub struct SeenCache {
    seen: Mutex<HashSet<(TaskId, String)>>,
    capacity: usize,
}

impl SeenCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn contains(&self, task_id: TaskId, item_id: &str) -> bool {
        self.seen
            .lock()
            .await
            .contains(&(task_id, item_id.to_string()))
    }

    pub async fn insert(&self, task_id: TaskId, item_id: &str) {
        let mut seen = self.seen.lock().await;
        if seen.len() >= self.capacity {
            seen.clear();
        }
        seen.insert((task_id, item_id.to_string()));
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seen.lock().await.is_empty()
    }
}

pub struct SourcePoller {
    store: Arc<dyn TaskStore>,
    broker: Arc<dyn Broker>,
    sources: SourceRegistry,
    config: WorkerConfig,
    seen: Option<SeenCache>,
    shutdown: Arc<AtomicBool>,
}

impl SourcePoller {
    pub fn new(
        store: Arc<dyn TaskStore>,
        broker: Arc<dyn Broker>,
        sources: SourceRegistry,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            broker,
            sources,
            config,
            seen: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_seen_cache(mut self, cache: SeenCache) -> Self {
        self.seen = Some(cache);
        self
    }

    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Poll every active task once.
    ///
    /// A failing task is counted and logged; it never stops the others.
    pub async fn run_cycle(&self) -> Result<PollReport> {
        let tasks = self.store.list_active().await?;
        let mut report = PollReport {
            tasks: tasks.len(),
            ..Default::default()
        };

        for task in &tasks {
            if let Err(e) = self.poll_task(task, &mut report).await {
                error!(
                    "Polling task {} ({}) failed: {}",
                    task.id, task.source.kind, e
                );
                report.failed_tasks += 1;
            }
        }

        Ok(report)
    }

    async fn poll_task(&self, task: &Task, report: &mut PollReport) -> Result<()> {
        let items = self
            .sources
            .fetch(&task.source, self.config.batch_size)
            .await?;
        report.fetched += items.len();
        debug!("Task {}: fetched {} items", task.id, items.len());

        for item in items {
            if item.id.trim().is_empty() {
                warn!("Task {}: skipping item without id ({:?})", task.id, item.title);
                report.skipped += 1;
                continue;
            }

            if let Some(seen) = &self.seen {
                if seen.contains(task.id, &item.id).await {
                    report.skipped += 1;
                    continue;
                }
            }

            if self.store.is_processed(task.id, &item.id).await? {
                self.remember(task.id, &item.id).await;
                report.skipped += 1;
                continue;
            }

            match self.store.record_processed(task.id, &item.id).await? {
                InsertOutcome::Duplicate => {
                    debug!("Task {}: item {} claimed by another poller", task.id, item.id);
                    self.remember(task.id, &item.id).await;
                    report.skipped += 1;
                }
                InsertOutcome::Inserted => {
                    let item_id = item.id.clone();
                    let message = RawContent {
                        task_id: task.id,
                        item,
                    };
                    // The record and the publish succeed or fail together;
                    // a released item is picked up again next cycle.
                    if let Err(e) = broker::publish(self.broker.as_ref(), &message).await {
                        warn!("Task {}: publishing item {} failed: {}", task.id, item_id, e);
                        if let Err(undo) = self.store.forget_processed(task.id, &item_id).await {
                            error!(
                                "Task {}: item {} recorded but not published and could not be released: {}",
                                task.id, item_id, undo
                            );
                        }
                        return Err(e);
                    }
                    self.remember(task.id, &item_id).await;
                    report.published += 1;
                }
            }
        }

        Ok(())
    }

    async fn remember(&self, task_id: TaskId, item_id: &str) {
        if let Some(seen) = &self.seen {
            seen.insert(task_id, item_id).await;
        }
    }

    /// Run cycles every poll interval until shutdown is signaled
    pub async fn run(&self) -> Result<()> {
        info!("Starting source poller...");
        info!("Poll interval: {:?}", self.config.poll_interval);
        info!("Batch size: {}", self.config.batch_size);
        info!("Source kinds: {}", self.sources.kinds().join(", "));

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown signal received, stopping poller...");
                break;
            }

            match self.run_cycle().await {
                Ok(report) => info!(
                    "Poll cycle: {} tasks, {} fetched, {} published, {} skipped, {} failed",
                    report.tasks,
                    report.fetched,
                    report.published,
                    report.skipped,
                    report.failed_tasks
                ),
                Err(e) => error!("Poll cycle failed: {}", e),
            }

            sleep_unless_shutdown(self.config.poll_interval, &self.shutdown).await;
        }

        info!("Poller stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::failing::FailingBroker;
    use crate::broker::MemoryBroker;
    use crate::db::models::{NewTask, SourceDescriptor, TaskAction};
    use crate::error::PipelineError;
    use crate::messages::{ContentItem, QueueName};
    use crate::sources::SourceFetcher;
    use crate::store::MemoryTaskStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct Listing(Vec<&'static str>);

    #[async_trait]
    impl SourceFetcher for Listing {
        fn kind(&self) -> &'static str {
            "listing"
        }

        async fn fetch(&self, _params: &serde_json::Value, _limit: usize) -> Result<Vec<ContentItem>> {
            Ok(self
                .0
                .iter()
                .map(|id| ContentItem::new(*id, format!("post {}", id), "", ""))
                .collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl SourceFetcher for Broken {
        fn kind(&self) -> &'static str {
            "broken"
        }

        async fn fetch(&self, _params: &serde_json::Value, _limit: usize) -> Result<Vec<ContentItem>> {
            Err(PipelineError::Upstream {
                url: "http://source".to_string(),
                status: 502,
            })
        }
    }

    fn new_task(kind: &str) -> NewTask {
        NewTask {
            owner: "ana".to_string(),
            description: "posts".to_string(),
            source: SourceDescriptor::new(kind, json!({})),
            current_prompt: "{{CONTENT}}".to_string(),
        }
    }

    fn poller(store: Arc<MemoryTaskStore>, broker: Arc<MemoryBroker>) -> SourcePoller {
        let mut sources = SourceRegistry::new();
        sources.register(Arc::new(Listing(vec!["a", "b", "", "a"])));
        sources.register(Arc::new(Broken));
        SourcePoller::new(store, broker, sources, WorkerConfig::default())
    }

    #[tokio::test]
    async fn publishes_each_new_item_once() {
        let store = Arc::new(MemoryTaskStore::new());
        let broker = Arc::new(MemoryBroker::new());
        store.create_task(new_task("listing")).await.unwrap();
        let poller = poller(store.clone(), broker.clone());

        let first = poller.run_cycle().await.unwrap();
        assert_eq!(first.published, 2);
        assert_eq!(first.skipped, 2);

        let second = poller.run_cycle().await.unwrap();
        assert_eq!(second.published, 0);
        assert_eq!(second.skipped, 4);
        assert_eq!(broker.pending(QueueName::RawContent).await.len(), 2);
    }

    #[tokio::test]
    async fn failing_source_does_not_stop_the_cycle() {
        let store = Arc::new(MemoryTaskStore::new());
        let broker = Arc::new(MemoryBroker::new());
        store.create_task(new_task("broken")).await.unwrap();
        store.create_task(new_task("nowhere")).await.unwrap();
        store.create_task(new_task("listing")).await.unwrap();

        let report = poller(store, broker).run_cycle().await.unwrap();
        assert_eq!(report.tasks, 3);
        assert_eq!(report.failed_tasks, 2);
        assert_eq!(report.published, 2);
    }

    #[tokio::test]
    async fn paused_tasks_are_not_polled() {
        let store = Arc::new(MemoryTaskStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let task = store.create_task(new_task("listing")).await.unwrap();
        store
            .transition(task.id, "ana", TaskAction::Pause)
            .await
            .unwrap();

        let report = poller(store, broker.clone()).run_cycle().await.unwrap();
        assert_eq!(report, PollReport::default());
        assert!(broker.pending(QueueName::RawContent).await.is_empty());
    }

    #[tokio::test]
    async fn failed_publish_releases_the_item_for_next_cycle() {
        let store = Arc::new(MemoryTaskStore::new());
        let memory = Arc::new(MemoryBroker::new());
        let broker = Arc::new(FailingBroker::new(memory.clone()).fail_publish(1));
        let task = store.create_task(new_task("listing")).await.unwrap();

        let mut sources = SourceRegistry::new();
        sources.register(Arc::new(Listing(vec!["42"])));
        let poller = SourcePoller::new(store.clone(), broker.clone(), sources, WorkerConfig::default())
            .with_seen_cache(SeenCache::new(100));

        let first = poller.run_cycle().await.unwrap();
        assert_eq!(first.failed_tasks, 1);
        assert_eq!(first.published, 0);
        assert!(!store.is_processed(task.id, "42").await.unwrap());
        assert!(poller.seen.as_ref().unwrap().is_empty().await);

        let second = poller.run_cycle().await.unwrap();
        assert_eq!(second.published, 1);
        assert_eq!(second.failed_tasks, 0);
        assert_eq!(broker.failed(), 1);
        assert_eq!(memory.pending(QueueName::RawContent).await.len(), 1);
        assert!(store.is_processed(task.id, "42").await.unwrap());
    }

    #[tokio::test]
    async fn seen_cache_only_holds_confirmed_pairs() {
        let store = Arc::new(MemoryTaskStore::new());
        let broker = Arc::new(MemoryBroker::new());
        store.create_task(new_task("listing")).await.unwrap();
        let poller = poller(store, broker).with_seen_cache(SeenCache::new(100));

        poller.run_cycle().await.unwrap();
        let cache = poller.seen.as_ref().unwrap();
        assert_eq!(cache.len().await, 2);

        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.published, 0);
    }
}
