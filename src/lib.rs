//! Veritas - content monitoring pipeline
//!
//! Watches external sources on behalf of owner-defined tasks, filters new
//! items through an LLM relevance check, notifies the owner and refines the
//! filtering prompt from their feedback.
//!
//! Components talk through three durable queues:
//! - `raw-content`: poller → relevance filter
//! - `notify`: filter, feedback worker, intake → notifier
//! - `feedback`: intake → feedback worker
//!
//! The task store (Postgres, or in memory for tests) is the source of truth
//! for tasks and for which items were already seen.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod intake;
pub mod llm;
pub mod messages;
pub mod notify;
pub mod sources;
pub mod store;
pub mod worker;

pub use broker::{Broker, Delivery, MemoryBroker, PgBroker};
pub use config::PipelineConfig;
pub use db::models::{
    SourceDescriptor, Task, TaskAction, TaskId, TaskStatus, TransitionOutcome, CONTENT_PLACEHOLDER,
};
pub use error::{PipelineError, Result};
pub use intake::{InboundCommand, InboundOutcome, TaskIntake};
pub use llm::{ChatClient, Classifier, LlmClassifier, LlmConfig, LlmRefiner, PromptRefiner, Verdict};
pub use messages::{ContentItem, Envelope, Feedback, Notify, NotifyContent, QueueName, RawContent};
pub use notify::{DeliveryChannel, LogChannel};
pub use sources::{SourceFetcher, SourceRegistry};
pub use store::{MemoryTaskStore, PgTaskStore, TaskStore};
pub use worker::{
    ConsumerRunner, FeedbackWorker, NotifierWorker, PollReport, RelevanceFilter, RetryPolicy,
    SourcePoller, WorkerConfig,
};
