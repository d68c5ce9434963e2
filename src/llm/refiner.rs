//! Feedback-driven prompt refinement

use super::{ChatClient, Completion};
use crate::db::models::CONTENT_PLACEHOLDER;
use crate::error::Result;
use async_trait::async_trait;
use tracing::warn;

/// Shortest answer accepted as a rewritten prompt
pub const MIN_REFINED_PROMPT_LEN: usize = 50;

const REFINE_SYSTEM_PROMPT: &str = "You are a prompt engineer. Your task is to refine content filtering prompts based on user feedback.

You will be given:
1. The current filtering prompt
2. User feedback about the filtering results

Generate an improved version of the prompt that incorporates the user's feedback.
The improved prompt should:
- Keep asking for a single YES or NO decision
- Include the feedback to make filtering more accurate
- Be clear and specific
- Keep the {{CONTENT}} placeholder exactly once

Return ONLY the improved prompt, nothing else.";

#[async_trait]
pub trait PromptRefiner: Send + Sync {
    /// Produce a new prompt from the current one and owner feedback.
    ///
    /// `Ok(None)` means no usable rewrite was produced. Any `Some` keeps
    /// the content placeholder.
    async fn refine(&self, current: &str, feedback: &str) -> Result<Option<String>>;
}

/// Whether a rewritten prompt is fit to replace the stored one
pub fn accept_refinement(candidate: &str) -> bool {
    candidate.chars().count() > MIN_REFINED_PROMPT_LEN && candidate.contains(CONTENT_PLACEHOLDER)
}

pub struct LlmRefiner {
    chat: ChatClient,
}

impl LlmRefiner {
    const PARAMS: Completion = Completion {
        max_tokens: 500,
        temperature: 0.3,
    };

    pub fn new(chat: ChatClient) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl PromptRefiner for LlmRefiner {
    async fn refine(&self, current: &str, feedback: &str) -> Result<Option<String>> {
        let user_message = format!(
            "Current Prompt:\n{}\n\nUser Feedback:\n{}\n\nGenerate an improved prompt:",
            current, feedback
        );
        let answer = self
            .chat
            .complete(Some(REFINE_SYSTEM_PROMPT), &user_message, Self::PARAMS)
            .await?;

        if accept_refinement(&answer) {
            Ok(Some(answer))
        } else {
            warn!(
                "Refined prompt rejected ({} chars, placeholder present: {})",
                answer.chars().count(),
                answer.contains(CONTENT_PLACEHOLDER)
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_or_placeholderless_rewrites_are_rejected() {
        assert!(!accept_refinement("YES if Rust {{CONTENT}}"));
        assert!(!accept_refinement(&"Only posts about Rust compilers. ".repeat(3)));
        assert!(accept_refinement(
            "Only accept posts about the Rust compiler internals or MIR.\n{{CONTENT}}\nYES or NO:"
        ));
    }
}
