//! Notification delivery and message formatting

use crate::db::models::{Task, TaskAction};
use crate::error::Result;
use crate::messages::{ContentItem, NotifyContent};
use async_trait::async_trait;
use tracing::info;

const SEPARATOR_WIDTH: usize = 60;
const SUBJECT_TITLE_CHARS: usize = 50;

/// Hands a notification to the outside world (mail, chat, log...)
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(&self, recipient: &str, content: &NotifyContent) -> Result<()>;
}

/// Writes notifications to the log instead of sending them
#[derive(Debug, Default, Clone)]
pub struct LogChannel;

#[async_trait]
impl DeliveryChannel for LogChannel {
    async fn deliver(&self, recipient: &str, content: &NotifyContent) -> Result<()> {
        info!(
            recipient = recipient,
            subject = %content.subject,
            "Notification:\n{}",
            content.body
        );
        Ok(())
    }
}

/// `[Task #id] <title>`, title cut to 50 characters
pub fn relevant_subject(task_id: i64, item: &ContentItem) -> String {
    let title = if item.title.is_empty() {
        "New Content".to_string()
    } else {
        item.title.chars().take(SUBJECT_TITLE_CHARS).collect()
    };
    format!("[Task #{}] {}", task_id, title)
}

/// Notification for content that passed the filter
pub fn relevant_content(task: &Task, item: &ContentItem) -> NotifyContent {
    let separator = "-".repeat(SEPARATOR_WIDTH);
    let body = format!(
        "New relevant content found for your monitoring task!\n\n\
         Task ID: {id}\n\
         Task Description: {description}\n\n\
         {sep}\n\n\
         {content}\n\
         {sep}\n\n\
         Reply with feedback to improve filtering:\n\
         - \"This is exactly what I want\" to reinforce this type of content\n\
         - \"This is not relevant\" to filter out similar content\n\
         - Any other feedback to refine the criteria\n",
        id = task.id,
        description = task.description,
        sep = separator,
        content = item.render(),
    );

    NotifyContent {
        subject: relevant_subject(task.id, item),
        body,
    }
}

pub fn task_created(task: &Task) -> NotifyContent {
    NotifyContent {
        subject: format!("Task Created - #{}", task.id),
        body: format!(
            "Your monitoring task has been created.\n\n\
             Task ID: {id}\n\
             Description: {description}\n\
             Source: {source}\n\
             Status: {status}\n\n\
             You will be notified when relevant content is found.\n\
             Reply to any notification with feedback to improve filtering.\n\n\
             To manage this task:\n\
             - pause {id}: temporarily stop it\n\
             - resume {id}: start it again\n\
             - delete {id}: remove it permanently\n",
            id = task.id,
            description = task.description,
            source = task.source.kind,
            status = task.status,
        ),
    }
}

pub fn status_changed(task: &Task, action: TaskAction) -> NotifyContent {
    NotifyContent {
        subject: format!("Task {} - #{}", action.past_tense(), task.id),
        body: format!(
            "Task #{} is now {}.\n\nDescription: {}\n",
            task.id, task.status, task.description
        ),
    }
}

/// Reply to a list request
pub fn task_list(tasks: &[Task]) -> NotifyContent {
    let body = if tasks.is_empty() {
        "You have no active tasks.\n".to_string()
    } else {
        let mut body = String::from("Your tasks:\n\n");
        for task in tasks {
            body.push_str(&format!(
                "Task ID: {}\nStatus: {}\nDescription: {}\nCreated: {}\n{}\n\n",
                task.id,
                task.status,
                task.description,
                task.created_at.format("%Y-%m-%d %H:%M UTC"),
                "-".repeat(50),
            ));
        }
        body
    };

    NotifyContent {
        subject: "Your Tasks".to_string(),
        body,
    }
}

/// Same wording for unknown, foreign and deleted tasks
pub fn task_not_found(task_id: i64) -> NotifyContent {
    NotifyContent {
        subject: "Task Not Found".to_string(),
        body: format!("Task #{} not found or doesn't belong to you.\n", task_id),
    }
}

pub fn feedback_applied(task: &Task) -> NotifyContent {
    NotifyContent {
        subject: format!("Feedback Received - Task #{}", task.id),
        body: format!(
            "Thank you for your feedback!\n\n\
             Task ID: {}\n\n\
             The filtering criteria have been updated.\n\
             Future content will be filtered using the refined criteria.\n\n\
             Original request:\n{}\n",
            task.id, task.description
        ),
    }
}
