//! Replace old messages with one summary written by a delegate.

use super::{
    Summarizer, TruncationFuture, TruncationStrategy, apply_mask, build_summarization_prompt,
    dropped, keep_recent,
};
use crate::Message;
use std::sync::Arc;
use tracing::{debug, warn};

/// Text used when the summarizer fails.
pub fn summary_placeholder(condensed: usize) -> String {
    format!("[Summary unavailable: {condensed} earlier messages were condensed.]")
}

/// Keeps the last `keep_messages` messages and folds everything older into a
/// single developer message.
#[derive(Clone)]
pub struct SummarizationStrategy {
    summarizer: Arc<dyn Summarizer>,
    keep_messages: usize,
    preserve_system: bool,
}

impl SummarizationStrategy {
    pub fn new(summarizer: Arc<dyn Summarizer>, keep_messages: usize) -> Self {
        Self {
            summarizer,
            keep_messages,
            preserve_system: true,
        }
    }

    pub fn with_preserve_system(mut self, preserve: bool) -> Self {
        self.preserve_system = preserve;
        self
    }

    async fn run(
        &self,
        messages: Vec<Message>,
        budget_threshold: usize,
        current_usage: usize,
    ) -> Vec<Message> {
        if current_usage <= budget_threshold {
            return messages;
        }
        let mask = keep_recent(&messages, self.keep_messages, self.preserve_system);
        let span = dropped(&messages, &mask);
        if span.is_empty() {
            return messages;
        }
        let condensed = span.len();
        let prompt = build_summarization_prompt(span);

        let summary = match self.summarizer.summarize(prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                debug!("Summarized {condensed} message(s) into {} chars", text.len());
                text
            }
            Ok(_) => {
                warn!("Summarizer returned an empty summary for {condensed} message(s)");
                summary_placeholder(condensed)
            }
            Err(e) => {
                warn!("Summarizer failed for {condensed} message(s): {e}");
                summary_placeholder(condensed)
            }
        };
        apply_mask(messages, &mask, Some(Message::developer(summary)))
    }
}

impl TruncationStrategy for SummarizationStrategy {
    fn name(&self) -> &'static str {
        "summarization"
    }

    fn truncate<'a>(
        &'a self,
        messages: Vec<Message>,
        budget_threshold: usize,
        current_usage: usize,
    ) -> TruncationFuture<'a> {
        Box::pin(self.run(messages, budget_threshold, current_usage))
    }
}
