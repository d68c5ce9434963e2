//! Veritas CLI
//!
//! Runs the pipeline workers (one per subcommand, or all of them in one
//! process) and exposes the owner-facing task commands.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::try_join_all;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use veritas::db::init_schema;
use veritas::worker::{setup_signal_handler, MessageHandler, SeenCache};
use veritas::{
    Broker, ChatClient, ConsumerRunner, FeedbackWorker, InboundOutcome, LlmClassifier, LlmRefiner,
    LogChannel, NotifierWorker, PgBroker, PgTaskStore, PipelineConfig, QueueName, RelevanceFilter,
    SourceDescriptor, SourcePoller, SourceRegistry, TaskIntake, TaskStore, TransitionOutcome,
    WorkerConfig,
};

#[derive(Parser)]
#[command(name = "veritas")]
#[command(about = "Monitor content sources, filter new items with an LLM and notify task owners")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create tables and indexes (idempotent)
    InitDb,

    /// Poll sources of active tasks and publish new items
    Poller {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,

        /// Seconds between cycles (default: POLL_INTERVAL_SECS or 300)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Classify raw content and forward relevant items
    Filter {
        /// Handle at most one message and exit
        #[arg(long)]
        once: bool,
    },

    /// Refine task prompts from owner feedback
    Feedback {
        /// Handle at most one message and exit
        #[arg(long)]
        once: bool,
    },

    /// Deliver notifications
    Notifier {
        /// Handle at most one message and exit
        #[arg(long)]
        once: bool,
    },

    /// Run poller, filter, feedback worker and notifier in one process
    RunAll,

    /// Show queue depths
    Status,

    /// Manage tasks on behalf of an owner
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Create a monitoring task
    Create {
        #[arg(short, long)]
        owner: String,

        /// What to look for; the source is inferred unless given explicitly
        description: String,

        /// Source kind (reddit, rss)
        #[arg(long, requires = "source_params")]
        source_kind: Option<String>,

        /// Source parameters as JSON, e.g. '{"subreddit":"rust"}'
        #[arg(long, requires = "source_kind")]
        source_params: Option<String>,
    },

    /// List the owner's tasks
    List {
        #[arg(short, long)]
        owner: String,
    },

    /// Stop polling a task
    Pause {
        #[arg(short, long)]
        owner: String,
        id: i64,
    },

    /// Start polling a paused task again
    Resume {
        #[arg(short, long)]
        owner: String,
        id: i64,
    },

    /// Delete a task (terminal)
    Delete {
        #[arg(short, long)]
        owner: String,
        id: i64,
    },

    /// Send feedback to refine a task's filter
    Feedback {
        #[arg(short, long)]
        owner: String,
        id: i64,
        text: String,
    },

    /// Route an owner message (subject + body) onto the matching command
    Inbound {
        /// Sender, e.g. "Ana <ana@example.com>"
        #[arg(long)]
        sender: String,

        #[arg(long)]
        subject: String,

        #[arg(default_value = "")]
        body: String,
    },

    /// Remove a task row and its processed items for good
    Purge { id: i64 },
}

struct Services {
    config: PipelineConfig,
    store: Arc<PgTaskStore>,
    broker: Arc<PgBroker>,
}

impl Services {
    /// Connect to the store/broker database, retrying per configuration
    async fn connect() -> Result<Self> {
        let config = PipelineConfig::from_env()?;
        let broker = PgBroker::connect(
            &config.database_url,
            config.connect_attempts,
            config.connect_retry_interval,
            config.visibility_timeout,
        )
        .await
        .context("broker connection failed")?;
        let store = PgTaskStore::new(broker.pool().clone());
        info!("Database connection established");

        Ok(Self {
            config,
            store: Arc::new(store),
            broker: Arc::new(broker),
        })
    }

    fn poller(&self, worker: WorkerConfig) -> Result<SourcePoller> {
        let sources = SourceRegistry::with_defaults(&self.config.user_agent, Duration::from_secs(30))?;
        Ok(SourcePoller::new(self.store.clone(), self.broker.clone(), sources, worker)
            .with_seen_cache(SeenCache::new(100_000)))
    }

    fn filter(&self, worker: &WorkerConfig) -> Result<RelevanceFilter> {
        let chat = ChatClient::new(self.config.llm()?)?;
        Ok(RelevanceFilter::new(
            self.store.clone(),
            self.broker.clone(),
            Arc::new(LlmClassifier::new(chat)),
            worker.retry.clone(),
        ))
    }

    fn feedback(&self, worker: &WorkerConfig) -> Result<FeedbackWorker> {
        let chat = ChatClient::new(self.config.llm()?)?;
        Ok(FeedbackWorker::new(
            self.store.clone(),
            self.broker.clone(),
            Arc::new(LlmRefiner::new(chat)),
            worker.retry.clone(),
        ))
    }

    fn runner(&self, handler: Arc<dyn MessageHandler>, worker: WorkerConfig) -> ConsumerRunner {
        ConsumerRunner::new(self.broker.clone(), handler, worker)
    }

    fn intake(&self) -> TaskIntake {
        TaskIntake::new(self.store.clone(), self.broker.clone())
    }
}

async fn consume(runner: ConsumerRunner, once: bool) -> Result<()> {
    if once {
        if runner.process_one().await? {
            println!("Message processed");
        } else {
            println!("Queue empty");
        }
    } else {
        setup_signal_handler(runner.shutdown_handle());
        runner.run().await?;
    }
    Ok(())
}

fn print_outcome(outcome: &TransitionOutcome) {
    match outcome {
        TransitionOutcome::Applied(task) => println!("Task #{} is now {}", task.id, task.status),
        TransitionOutcome::NotFound => println!("Task not found or doesn't belong to you"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let services = Services::connect().await?;
    let worker_config = services.config.worker();

    match cli.command {
        Commands::InitDb => {
            init_schema(services.broker.pool()).await?;
            println!("Schema ready");
        }

        Commands::Poller { once, interval } => {
            let mut worker = worker_config;
            if let Some(secs) = interval {
                worker.poll_interval = Duration::from_secs(secs);
            }
            let poller = services.poller(worker)?;

            if once {
                let report = poller.run_cycle().await?;
                println!(
                    "{} tasks, {} fetched, {} published, {} skipped, {} failed",
                    report.tasks, report.fetched, report.published, report.skipped, report.failed_tasks
                );
            } else {
                setup_signal_handler(poller.shutdown_handle());
                poller.run().await?;
            }
        }

        Commands::Filter { once } => {
            let handler = Arc::new(services.filter(&worker_config)?);
            consume(services.runner(handler, worker_config), once).await?;
        }

        Commands::Feedback { once } => {
            let handler = Arc::new(services.feedback(&worker_config)?);
            consume(services.runner(handler, worker_config), once).await?;
        }

        Commands::Notifier { once } => {
            let handler = Arc::new(NotifierWorker::new(Arc::new(LogChannel)));
            consume(services.runner(handler, worker_config), once).await?;
        }

        Commands::RunAll => {
            let shutdown = Arc::new(AtomicBool::new(false));
            setup_signal_handler(shutdown.clone());

            let poller = services
                .poller(worker_config.clone())?
                .with_shutdown(shutdown.clone());
            let handlers: Vec<Arc<dyn MessageHandler>> = vec![
                Arc::new(services.filter(&worker_config)?),
                Arc::new(services.feedback(&worker_config)?),
                Arc::new(NotifierWorker::new(Arc::new(LogChannel))),
            ];
            let runners: Vec<ConsumerRunner> = handlers
                .into_iter()
                .map(|h| {
                    services
                        .runner(h, worker_config.clone())
                        .with_shutdown(shutdown.clone())
                })
                .collect();

            info!("Running all workers in one process...");
            let consumers = try_join_all(runners.iter().map(|r| r.run()));
            tokio::try_join!(poller.run(), consumers)?;
        }

        Commands::Status => {
            for queue in [QueueName::RawContent, QueueName::Notify, QueueName::Feedback] {
                println!("{:<12} {}", queue.as_str(), services.broker.depth(queue).await?);
            }
        }

        Commands::Task { command } => {
            let intake = services.intake();
            match command {
                TaskCommands::Create {
                    owner,
                    description,
                    source_kind,
                    source_params,
                } => {
                    let source = match (source_kind, source_params) {
                        (Some(kind), Some(params)) => Some(SourceDescriptor::new(
                            kind,
                            serde_json::from_str(&params).context("--source-params is not JSON")?,
                        )),
                        _ => None,
                    };
                    let task = intake.create_task(&owner, &description, source).await?;
                    println!("Created task #{} ({} source)", task.id, task.source.kind);
                }
                TaskCommands::List { owner } => {
                    let tasks = intake.list_tasks(&owner).await?;
                    if tasks.is_empty() {
                        println!("No tasks for {}", owner);
                    }
                    for task in tasks {
                        println!(
                            "#{:<6} {:<8} {:<7} {}",
                            task.id,
                            task.status.as_str(),
                            task.source.kind,
                            task.description
                        );
                    }
                }
                TaskCommands::Pause { owner, id } => {
                    print_outcome(&intake.pause(&owner, id).await?);
                }
                TaskCommands::Resume { owner, id } => {
                    print_outcome(&intake.resume(&owner, id).await?);
                }
                TaskCommands::Delete { owner, id } => {
                    print_outcome(&intake.delete(&owner, id).await?);
                }
                TaskCommands::Feedback { owner, id, text } => {
                    if intake.submit_feedback(&owner, id, &text).await? {
                        println!("Feedback queued for task #{}", id);
                    } else {
                        bail!("task #{} not found or doesn't belong to {}", id, owner);
                    }
                }
                TaskCommands::Inbound {
                    sender,
                    subject,
                    body,
                } => match intake.route_inbound(&sender, &subject, &body).await? {
                    InboundOutcome::Created(task) => {
                        println!("Created task #{} ({} source)", task.id, task.source.kind)
                    }
                    InboundOutcome::Listed(tasks) => println!("Listed {} tasks", tasks.len()),
                    InboundOutcome::StatusChanged(outcome) => print_outcome(&outcome),
                    InboundOutcome::Feedback { task_id, queued } => {
                        if queued {
                            println!("Feedback queued for task #{}", task_id);
                        } else {
                            println!("Task not found or doesn't belong to you");
                        }
                    }
                    InboundOutcome::Ignored => println!("Unknown command, ignored"),
                },
                TaskCommands::Purge { id } => {
                    if services.store.purge_task(id).await? {
                        println!("Task #{} purged", id);
                    } else {
                        println!("Task #{} not found", id);
                    }
                }
            }
        }
    }

    Ok(())
}
