//! Pipeline workers
//!
//! This module provides:
//! - SourcePoller: periodic fetch, dedup and publish to raw-content
//! - ConsumerRunner: pull loop driving a MessageHandler over one queue
//! - RelevanceFilter, FeedbackWorker, NotifierWorker: the queue handlers
//! - WorkerConfig / RetryPolicy: timing knobs shared by all of them

pub mod config;
pub mod feedback;
pub mod filter;
pub mod notifier;
pub mod poller;
pub mod retry;
pub mod runner;

pub use config::WorkerConfig;
pub use feedback::FeedbackWorker;
pub use filter::RelevanceFilter;
pub use notifier::NotifierWorker;
pub use poller::{PollReport, SeenCache, SourcePoller};
pub use retry::RetryPolicy;
pub use runner::{setup_signal_handler, ConsumerRunner, Disposition, MessageHandler};
