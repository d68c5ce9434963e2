//! Relevance classification

use super::{ChatClient, Completion};
use crate::db::models::CONTENT_PLACEHOLDER;
use crate::error::{PipelineError, Result};
use crate::messages::ContentItem;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

/// Outcome of one relevance decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub relevant: bool,
    pub reason: String,
}

impl Verdict {
    pub fn relevant(reason: impl Into<String>) -> Self {
        Self {
            relevant: true,
            reason: reason.into(),
        }
    }

    pub fn not_relevant(reason: impl Into<String>) -> Self {
        Self {
            relevant: false,
            reason: reason.into(),
        }
    }

    /// Safe default when no trustworthy decision is available
    pub fn fail_closed(reason: impl Into<String>) -> Self {
        Self::not_relevant(format!("fail-closed: {}", reason.into()))
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Decide whether `item` matches `prompt`.
    ///
    /// Errors are reserved for calls that did not produce an answer.
    /// An answer that cannot be interpreted yields `Ok(Verdict::fail_closed(..))`.
    async fn classify(&self, prompt: &str, item: &ContentItem) -> Result<Verdict>;
}

/// Substitute the rendered item into a filtering prompt
pub fn fill_prompt(prompt: &str, item: &ContentItem) -> String {
    prompt.replace(CONTENT_PLACEHOLDER, &item.render())
}

/// Read a YES/NO answer. The first standalone YES or NO wins.
pub fn parse_decision(answer: &str) -> Result<bool> {
    static DECISION_RE: OnceLock<Regex> = OnceLock::new();
    let decision_re = DECISION_RE
        .get_or_init(|| Regex::new(r"(?i)\b(yes|no)\b").expect("invalid decision regex"));

    match decision_re.captures(answer) {
        Some(caps) => Ok(caps[1].eq_ignore_ascii_case("yes")),
        None => Err(PipelineError::ClassifierParse(answer.chars().take(80).collect())),
    }
}

pub struct LlmClassifier {
    chat: ChatClient,
}

impl LlmClassifier {
    const PARAMS: Completion = Completion {
        max_tokens: 10,
        temperature: 0.1,
    };

    pub fn new(chat: ChatClient) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, prompt: &str, item: &ContentItem) -> Result<Verdict> {
        let filled = fill_prompt(prompt, item);
        let answer = self.chat.complete(None, &filled, Self::PARAMS).await?;

        match parse_decision(&answer) {
            Ok(true) => Ok(Verdict::relevant(answer)),
            Ok(false) => Ok(Verdict::not_relevant(answer)),
            Err(e) => {
                warn!("Classifier returned no decision for item {}: {}", item.id, e);
                Ok(Verdict::fail_closed("unparsable answer"))
            }
        }
    }
}
