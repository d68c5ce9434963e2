//! Queue names and message envelopes (the wire contract between workers)

use crate::db::models::TaskId;
use crate::error::{PipelineError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named durable queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    RawContent,
    Notify,
    Feedback,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::RawContent => "raw-content",
            QueueName::Notify => "notify",
            QueueName::Feedback => "feedback",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of content returned by a source fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable within the source
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: String,
    /// Source-specific fields (author, score, published...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContentItem {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            url: url.into(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    fn extra_str(&self, key: &str) -> Option<String> {
        self.extra.get(key).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Plain-text rendering used for classification and notifications
    pub fn render(&self) -> String {
        let mut out = format!("Title: {}\n\n", self.title);
        out.push_str(&format!(
            "Author: {}\n",
            self.extra_str("author")
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| "Unknown".to_string())
        ));
        if let Some(published) = self.extra_str("published").filter(|p| !p.is_empty()) {
            out.push_str(&format!("Published: {}\n", published));
        }
        if let Some(score) = self.extra_str("score") {
            out.push_str(&format!("Score: {}\n", score));
        }
        out.push_str(&format!("\nContent:\n{}\n\nURL: {}\n", self.body, self.url));
        out
    }
}

/// raw-content: a newly discovered item for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawContent {
    pub task_id: TaskId,
    pub item: ContentItem,
}

/// notify: something to hand to the delivery channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notify {
    pub task_id: Option<TaskId>,
    pub recipient: String,
    pub content: NotifyContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyContent {
    pub subject: String,
    pub body: String,
}

/// feedback: owner reply used to refine a task's prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub task_id: TaskId,
    pub feedback_text: String,
    /// Prompt at the time feedback was given. Informational only: the
    /// feedback worker refines the stored prompt, never this snapshot.
    pub prompt_snapshot: String,
}

/// Binds an envelope type to the queue that carries it
pub trait Envelope: Serialize + DeserializeOwned + Send + Sync {
    const QUEUE: QueueName;

    fn encode(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a payload; failures become `MalformedMessage`
    fn decode(payload: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(payload.clone()).map_err(|e| PipelineError::MalformedMessage {
            queue: Self::QUEUE.as_str().to_string(),
            reason: e.to_string(),
        })
    }
}

impl Envelope for RawContent {
    const QUEUE: QueueName = QueueName::RawContent;
}

impl Envelope for Notify {
    const QUEUE: QueueName = QueueName::Notify;
}

impl Envelope for Feedback {
    const QUEUE: QueueName = QueueName::Feedback;
}
