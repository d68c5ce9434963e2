//! Owner-facing task management: create, list, pause, resume, delete and
//! feedback submission, plus routing of owner messages onto those commands

use crate::broker::{self, Broker};
use crate::db::models::{
    NewTask, SourceDescriptor, Task, TaskAction, TaskId, TransitionOutcome, CONTENT_PLACEHOLDER,
};
use crate::error::{PipelineError, Result};
use crate::messages::{Feedback, Notify, NotifyContent};
use crate::notify;
use crate::store::{owned_task, TaskStore};
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Items per reddit fetch for inferred sources
pub const DEFAULT_SOURCE_LIMIT: u64 = 25;

impl SourceDescriptor {
    /// Guess the source from a free-text request.
    ///
    /// `/r/<name>`, `r/<name>` or `subreddit <name>` select reddit; otherwise
    /// the first http(s) URL is taken as a feed. Anything else watches
    /// reddit's `all`.
    pub fn infer(text: &str) -> SourceDescriptor {
        static SUBREDDIT_RE: OnceLock<Regex> = OnceLock::new();
        static URL_RE: OnceLock<Regex> = OnceLock::new();

        let subreddit_re = SUBREDDIT_RE.get_or_init(|| {
            Regex::new(r"(?i)(?:(?:^|[\s(])/?r/|\bsubreddit\s+)([A-Za-z0-9_]+)")
                .expect("invalid subreddit regex")
        });
        let url_re =
            URL_RE.get_or_init(|| Regex::new(r"https?://[^\s<>]+").expect("invalid url regex"));

        if let Some(caps) = subreddit_re.captures(text) {
            return reddit(&caps[1].to_lowercase());
        }
        if let Some(url) = url_re.find(text) {
            let url = url.as_str().trim_end_matches(['.', ',', ')', ';']);
            return SourceDescriptor::new("rss", serde_json::json!({ "url": url }));
        }
        reddit("all")
    }
}

fn reddit(subreddit: &str) -> SourceDescriptor {
    SourceDescriptor::new(
        "reddit",
        serde_json::json!({ "subreddit": subreddit, "limit": DEFAULT_SOURCE_LIMIT }),
    )
}

/// Filtering prompt a new task starts with
pub fn initial_prompt(description: &str) -> String {
    format!(
        "You are a content filter. Your task is to determine if content is relevant to the user's criteria.\n\n\
         User's criteria: {description}\n\n\
         Analyze the following content and respond with ONLY \"YES\" if it matches the criteria, or \"NO\" if it doesn't.\n\
         Be strict but fair in your judgment. Consider the topic, keywords, and intent.\n\n\
         Content to analyze:\n\
         {placeholder}\n\n\
         Your decision (YES or NO):",
        description = description.trim(),
        placeholder = CONTENT_PLACEHOLDER,
    )
}

/// An owner message reduced to the command it asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    NewTask { description: String },
    ListTasks,
    Change { task_id: TaskId, action: TaskAction },
    Feedback { task_id: TaskId, text: String },
    Unknown,
}

impl InboundCommand {
    /// Read a command from a message subject and body.
    ///
    /// A reply (`Re:` subject) whose body carries a `Task ID: N` line, as
    /// every notification does, is feedback on task N. Otherwise the subject
    /// selects the command: `new task`, `list tasks`, or
    /// `pause|resume|delete [task] [#]N`.
    pub fn parse(subject: &str, body: &str) -> InboundCommand {
        static REPLY_RE: OnceLock<Regex> = OnceLock::new();
        static TASK_ID_RE: OnceLock<Regex> = OnceLock::new();
        static NEW_TASK_RE: OnceLock<Regex> = OnceLock::new();
        static LIST_RE: OnceLock<Regex> = OnceLock::new();
        static CHANGE_RE: OnceLock<Regex> = OnceLock::new();

        let reply_re =
            REPLY_RE.get_or_init(|| Regex::new(r"(?i)^\s*re\s*:").expect("invalid reply regex"));
        let task_id_re = TASK_ID_RE
            .get_or_init(|| Regex::new(r"(?i)Task ID:\s*(\d+)").expect("invalid task id regex"));
        let new_task_re = NEW_TASK_RE.get_or_init(|| {
            Regex::new(r"(?i)^\s*new\s+task\b[\s:\-]*(.*)$").expect("invalid new task regex")
        });
        let list_re = LIST_RE
            .get_or_init(|| Regex::new(r"(?i)^\s*list\s+tasks?\b").expect("invalid list regex"));
        let change_re = CHANGE_RE.get_or_init(|| {
            Regex::new(r"(?i)^\s*(pause|resume|delete)\s+(?:task\s+)?#?(\d+)\b")
                .expect("invalid command regex")
        });

        if reply_re.is_match(subject) {
            let task_id = task_id_re
                .captures(body)
                .and_then(|caps| caps[1].parse::<TaskId>().ok());
            if let Some(task_id) = task_id {
                return InboundCommand::Feedback {
                    task_id,
                    text: reply_text(body),
                };
            }
        }

        let subject = reply_re.replace(subject, "");
        let subject: &str = &subject;

        if let Some(caps) = new_task_re.captures(subject) {
            let description = if body.trim().is_empty() {
                caps[1].trim().to_string()
            } else {
                body.trim().to_string()
            };
            return InboundCommand::NewTask { description };
        }
        if list_re.is_match(subject) {
            return InboundCommand::ListTasks;
        }
        if let Some(caps) = change_re.captures(subject) {
            let action = match caps[1].to_lowercase().as_str() {
                "pause" => TaskAction::Pause,
                "resume" => TaskAction::Resume,
                _ => TaskAction::Delete,
            };
            if let Ok(task_id) = caps[2].parse::<TaskId>() {
                return InboundCommand::Change { task_id, action };
            }
        }
        InboundCommand::Unknown
    }
}

/// What the owner wrote above the quoted notification. Falls back to the
/// whole body when nothing precedes the quote.
fn reply_text(body: &str) -> String {
    let own: Vec<&str> = body
        .lines()
        .take_while(|line| {
            let line = line.trim_start();
            !line.starts_with('>')
                && !(line.starts_with("On ") && line.trim_end().ends_with("wrote:"))
                && !line.starts_with("Task ID:")
        })
        .collect();
    let own = own.join("\n").trim().to_string();
    if own.is_empty() {
        body.trim().to_string()
    } else {
        own
    }
}

/// Mail address inside a `From`-style sender, or the bare sender
fn sender_address(sender: &str) -> Option<String> {
    static ADDRESS_RE: OnceLock<Regex> = OnceLock::new();
    let address_re = ADDRESS_RE
        .get_or_init(|| Regex::new(r"[\w.+-]+@[\w-]+(?:\.[\w-]+)*").expect("invalid address regex"));

    if let Some(found) = address_re.find(sender) {
        return Some(found.as_str().to_lowercase());
    }
    let sender = sender.trim();
    (!sender.is_empty()).then(|| sender.to_string())
}

/// What `route_inbound` did with a message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    Created(Task),
    Listed(Vec<Task>),
    StatusChanged(TransitionOutcome),
    Feedback { task_id: TaskId, queued: bool },
    Ignored,
}

pub struct TaskIntake {
    store: Arc<dyn TaskStore>,
    broker: Arc<dyn Broker>,
}

impl TaskIntake {
    pub fn new(store: Arc<dyn TaskStore>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    /// Create an active task. The source is inferred from the description
    /// when not given.
    pub async fn create_task(
        &self,
        owner: &str,
        description: &str,
        source: Option<SourceDescriptor>,
    ) -> Result<Task> {
        if owner.trim().is_empty() {
            return Err(PipelineError::InvalidInput("owner is empty".to_string()));
        }
        if description.trim().is_empty() {
            return Err(PipelineError::InvalidInput("description is empty".to_string()));
        }

        let source = source.unwrap_or_else(|| SourceDescriptor::infer(description));
        let task = self
            .store
            .create_task(NewTask {
                owner: owner.to_string(),
                description: description.trim().to_string(),
                source,
                current_prompt: initial_prompt(description),
            })
            .await?;

        info!(
            "Created task {} for {} ({} source)",
            task.id, task.owner, task.source.kind
        );
        self.tell(Some(task.id), owner, notify::task_created(&task)).await;
        Ok(task)
    }

    pub async fn list_tasks(&self, owner: &str) -> Result<Vec<Task>> {
        self.store.list_for_owner(owner).await
    }

    pub async fn pause(&self, owner: &str, task_id: TaskId) -> Result<TransitionOutcome> {
        self.change_status(owner, task_id, TaskAction::Pause).await
    }

    pub async fn resume(&self, owner: &str, task_id: TaskId) -> Result<TransitionOutcome> {
        self.change_status(owner, task_id, TaskAction::Resume)
            .await
    }

    pub async fn delete(&self, owner: &str, task_id: TaskId) -> Result<TransitionOutcome> {
        self.change_status(owner, task_id, TaskAction::Delete)
            .await
    }

    /// Apply an owner action and tell the requester how it went
    pub async fn change_status(
        &self,
        owner: &str,
        task_id: TaskId,
        action: TaskAction,
    ) -> Result<TransitionOutcome> {
        let outcome = self.store.transition(task_id, owner, action).await?;

        match &outcome {
            TransitionOutcome::Applied(task) => {
                info!("Task {} {} by owner", task.id, action.past_tense().to_lowercase());
                self.tell(Some(task.id), owner, notify::status_changed(task, action)).await;
            }
            TransitionOutcome::NotFound => {
                debug!("{} of task {} refused for {}", action.as_str(), task_id, owner);
                self.tell(None, owner, notify::task_not_found(task_id)).await;
            }
        }
        Ok(outcome)
    }

    /// Queue owner feedback for refinement. Returns false when the task is
    /// not one of the owner's live tasks.
    pub async fn submit_feedback(&self, owner: &str, task_id: TaskId, text: &str) -> Result<bool> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::InvalidInput("feedback is empty".to_string()));
        }

        let Some(task) = owned_task(self.store.as_ref(), task_id, owner).await? else {
            debug!("Feedback for task {} refused for {}", task_id, owner);
            self.tell(None, owner, notify::task_not_found(task_id)).await;
            return Ok(false);
        };

        let message = Feedback {
            task_id: task.id,
            feedback_text: text.to_string(),
            prompt_snapshot: task.current_prompt,
        };
        broker::publish(self.broker.as_ref(), &message).await?;
        info!("Queued feedback for task {}", task_id);
        Ok(true)
    }

    /// Route a message from an owner (a mail, say) onto the matching command.
    ///
    /// Unrecognised messages are logged and ignored.
    pub async fn route_inbound(
        &self,
        sender: &str,
        subject: &str,
        body: &str,
    ) -> Result<InboundOutcome> {
        let owner = sender_address(sender)
            .ok_or_else(|| PipelineError::InvalidInput("sender is empty".to_string()))?;

        match InboundCommand::parse(subject, body) {
            InboundCommand::NewTask { description } => {
                let task = self.create_task(&owner, &description, None).await?;
                Ok(InboundOutcome::Created(task))
            }
            InboundCommand::ListTasks => {
                let tasks = self.list_tasks(&owner).await?;
                self.tell(None, &owner, notify::task_list(&tasks)).await;
                Ok(InboundOutcome::Listed(tasks))
            }
            InboundCommand::Change { task_id, action } => {
                let outcome = self.change_status(&owner, task_id, action).await?;
                Ok(InboundOutcome::StatusChanged(outcome))
            }
            InboundCommand::Feedback { task_id, text } => {
                let queued = self.submit_feedback(&owner, task_id, &text).await?;
                Ok(InboundOutcome::Feedback { task_id, queued })
            }
            InboundCommand::Unknown => {
                info!("Ignoring message from {} with unknown command {:?}", owner, subject);
                Ok(InboundOutcome::Ignored)
            }
        }
    }

    /// Queue a notice for the owner. The action it reports has already
    /// been committed, so a publish failure is logged and not returned.
    async fn tell(&self, task_id: Option<TaskId>, owner: &str, content: NotifyContent) {
        let subject = content.subject.clone();
        let message = Notify {
            task_id,
            recipient: owner.to_string(),
            content,
        };
        if let Err(e) = broker::publish(self.broker.as_ref(), &message).await {
            warn!("Could not queue \"{}\" for {}: {}", subject, owner, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::failing::FailingBroker;
    use crate::broker::MemoryBroker;
    use crate::db::models::{validate_prompt, TaskStatus};
    use crate::messages::{ContentItem, Envelope, QueueName};
    use crate::store::MemoryTaskStore;
    use serde_json::json;

    fn intake() -> (Arc<MemoryBroker>, TaskIntake) {
        let broker = Arc::new(MemoryBroker::new());
        let intake = TaskIntake::new(Arc::new(MemoryTaskStore::new()), broker.clone());
        (broker, intake)
    }

    #[test]
    fn infers_reddit_from_subreddit_mentions() {
        let source = SourceDescriptor::infer("monitor /r/Python for web frameworks");
        assert_eq!(source.kind, "reddit");
        assert_eq!(source.params["subreddit"], json!("python"));
        assert_eq!(source.params["limit"], json!(25));

        let source = SourceDescriptor::infer("watch the subreddit rust for releases");
        assert_eq!(source.params["subreddit"], json!("rust"));
    }

    #[test]
    fn infers_rss_from_url() {
        let source = SourceDescriptor::infer("AI news from https://example.com/feed.xml.");
        assert_eq!(source.kind, "rss");
        assert_eq!(source.params["url"], json!("https://example.com/feed.xml"));
    }

    #[test]
    fn falls_back_to_reddit_all() {
        let source = SourceDescriptor::infer("anything about quantum computing");
        assert_eq!(source.kind, "reddit");
        assert_eq!(source.params["subreddit"], json!("all"));
    }

    #[test]
    fn initial_prompt_is_valid() {
        let prompt = initial_prompt("  Rust compiler news ");
        assert!(validate_prompt(&prompt).is_ok());
        assert!(prompt.contains("User's criteria: Rust compiler news\n"));
    }

    #[tokio::test]
    async fn create_task_confirms_to_owner() {
        let (broker, intake) = intake();
        let task = intake
            .create_task("ana", "new crates in /r/rust", None)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Active);
        assert_eq!(task.source.kind, "reddit");

        let pending = broker.pending(QueueName::Notify).await;
        let confirmation = Notify::decode(&pending[0]).unwrap();
        assert_eq!(confirmation.recipient, "ana");
        assert_eq!(confirmation.content.subject, format!("Task Created - #{}", task.id));
    }

    #[tokio::test]
    async fn foreign_owner_sees_not_found() {
        let (broker, intake) = intake();
        let task = intake.create_task("ana", "rust", None).await.unwrap();

        let outcome = intake.pause("mallory", task.id).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::NotFound);
        assert!(!intake
            .submit_feedback("mallory", task.id, "make it about cats")
            .await
            .unwrap());
        assert!(broker.pending(QueueName::Feedback).await.is_empty());
    }

    #[tokio::test]
    async fn feedback_carries_prompt_snapshot() {
        let (broker, intake) = intake();
        let task = intake.create_task("ana", "rust", None).await.unwrap();

        assert!(intake
            .submit_feedback("ana", task.id, " fewer memes ")
            .await
            .unwrap());

        let pending = broker.pending(QueueName::Feedback).await;
        let feedback = Feedback::decode(&pending[0]).unwrap();
        assert_eq!(feedback.feedback_text, "fewer memes");
        assert_eq!(feedback.prompt_snapshot, task.current_prompt);
    }

    #[tokio::test]
    async fn empty_feedback_is_rejected() {
        let (_, intake) = intake();
        let task = intake.create_task("ana", "rust", None).await.unwrap();
        let err = intake.submit_feedback("ana", task.id, "   ").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn create_task_survives_lost_confirmation() {
        let store = Arc::new(MemoryTaskStore::new());
        let memory = Arc::new(MemoryBroker::new());
        let broker = Arc::new(FailingBroker::new(memory.clone()).fail_publish(1));
        let intake = TaskIntake::new(store.clone(), broker.clone());

        let task = intake.create_task("ana", "rust", None).await.unwrap();
        assert_eq!(broker.failed(), 1);
        assert!(store.get_task(task.id).await.unwrap().is_some());
        assert!(memory.pending(QueueName::Notify).await.is_empty());
    }

    #[test]
    fn parses_subject_commands() {
        assert_eq!(
            InboundCommand::parse("Pause Task 42", ""),
            InboundCommand::Change {
                task_id: 42,
                action: TaskAction::Pause
            }
        );
        assert_eq!(
            InboundCommand::parse("resume #7", ""),
            InboundCommand::Change {
                task_id: 7,
                action: TaskAction::Resume
            }
        );
        assert_eq!(
            InboundCommand::parse("Re: delete task 3", ""),
            InboundCommand::Change {
                task_id: 3,
                action: TaskAction::Delete
            }
        );
        assert_eq!(InboundCommand::parse("List Tasks", ""), InboundCommand::ListTasks);
        assert_eq!(InboundCommand::parse("pause task", ""), InboundCommand::Unknown);
        assert_eq!(InboundCommand::parse("hello there", "hi"), InboundCommand::Unknown);
    }

    #[test]
    fn new_task_description_comes_from_body_or_subject() {
        assert_eq!(
            InboundCommand::parse("New Task", "  monitor /r/rust for releases \n"),
            InboundCommand::NewTask {
                description: "monitor /r/rust for releases".to_string()
            }
        );
        assert_eq!(
            InboundCommand::parse("new task: AI papers", ""),
            InboundCommand::NewTask {
                description: "AI papers".to_string()
            }
        );
    }

    #[test]
    fn reply_with_task_id_is_feedback() {
        let body = "Too many memes, only release notes please.\n\n\
                    On Mon, Veritas wrote:\n\
                    > New relevant content found for your monitoring task!\n\
                    > Task ID: 42\n";
        assert_eq!(
            InboundCommand::parse("Re: [Task #42] Rust 1.80", body),
            InboundCommand::Feedback {
                task_id: 42,
                text: "Too many memes, only release notes please.".to_string()
            }
        );

        // Not a reply: the task id in the body does not make it feedback
        assert_eq!(
            InboundCommand::parse("[Task #42] Rust 1.80", body),
            InboundCommand::Unknown
        );
    }

    #[test]
    fn sender_address_is_extracted() {
        assert_eq!(
            sender_address("Ana Lima <Ana@Example.com>").as_deref(),
            Some("ana@example.com")
        );
        assert_eq!(sender_address(" ana ").as_deref(), Some("ana"));
        assert_eq!(sender_address("  "), None);
    }

    #[tokio::test]
    async fn routes_new_task_and_listing() {
        let (broker, intake) = intake();

        let created = intake
            .route_inbound("Ana <ana@example.com>", "New Task", "watch /r/rust for releases")
            .await
            .unwrap();
        let task = match created {
            InboundOutcome::Created(task) => task,
            other => panic!("expected Created, got {:?}", other),
        };
        assert_eq!(task.owner, "ana@example.com");
        assert_eq!(task.source.params["subreddit"], json!("rust"));

        let listed = intake
            .route_inbound("ana@example.com", "list tasks", "")
            .await
            .unwrap();
        assert_eq!(listed, InboundOutcome::Listed(vec![task.clone()]));

        let pending = broker.pending(QueueName::Notify).await;
        let listing = Notify::decode(&pending[1]).unwrap();
        assert_eq!(listing.content.subject, "Your Tasks");
        assert!(listing.content.body.contains(&format!("Task ID: {}", task.id)));
    }

    #[tokio::test]
    async fn routes_status_changes_through_ownership() {
        let (_, intake) = intake();
        let task = intake.create_task("ana@example.com", "rust", None).await.unwrap();

        let foreign = intake
            .route_inbound("mallory@example.com", &format!("Delete Task {}", task.id), "")
            .await
            .unwrap();
        assert_eq!(foreign, InboundOutcome::StatusChanged(TransitionOutcome::NotFound));

        let paused = intake
            .route_inbound("ana@example.com", &format!("pause task {}", task.id), "")
            .await
            .unwrap();
        match paused {
            InboundOutcome::StatusChanged(TransitionOutcome::Applied(t)) => {
                assert_eq!(t.status, TaskStatus::Paused)
            }
            other => panic!("expected Applied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn routes_notification_reply_to_feedback() {
        let (broker, intake) = intake();
        let task = intake.create_task("ana@example.com", "rust", None).await.unwrap();
        let item = ContentItem::new("t3_1", "Rust meme", "lol", "https://reddit.com/r/rust/1");
        let notice = notify::relevant_content(&task, &item);
        let quoted: String = notice.body.lines().map(|l| format!("> {}\n", l)).collect();
        let body = format!("No memes please.\n\n{}", quoted);

        let outcome = intake
            .route_inbound("ana@example.com", &format!("Re: {}", notice.subject), &body)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            InboundOutcome::Feedback {
                task_id: task.id,
                queued: true
            }
        );

        let pending = broker.pending(QueueName::Feedback).await;
        let feedback = Feedback::decode(&pending[0]).unwrap();
        assert_eq!(feedback.feedback_text, "No memes please.");
    }

    #[tokio::test]
    async fn unknown_and_anonymous_messages() {
        let (broker, intake) = intake();
        let outcome = intake
            .route_inbound("ana@example.com", "hello", "is anyone there?")
            .await
            .unwrap();
        assert_eq!(outcome, InboundOutcome::Ignored);
        assert_eq!(broker.depth(QueueName::Notify).await.unwrap(), 0);

        let err = intake.route_inbound("", "list tasks", "").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }
}
