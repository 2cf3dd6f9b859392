//! Compress each old message into a one-line symbol.

use super::{
    Summarizer, TruncationFuture, TruncationStrategy, apply_mask, build_symbolization_prompt,
    dropped, keep_recent,
};
use crate::Message;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

const SYMBOLS_HEADER: &str = "Earlier conversation, one line per message:";

/// Like [`SummarizationStrategy`](super::SummarizationStrategy), but every
/// dropped message gets its own line. One failed line degrades to a content
/// preview without affecting the others.
#[derive(Clone)]
pub struct SymbolizationStrategy {
    summarizer: Arc<dyn Summarizer>,
    keep_messages: usize,
    preserve_system: bool,
    preview_chars: usize,
}

impl SymbolizationStrategy {
    pub fn new(summarizer: Arc<dyn Summarizer>, keep_messages: usize) -> Self {
        Self {
            summarizer,
            keep_messages,
            preserve_system: true,
            preview_chars: 80,
        }
    }

    pub fn with_preserve_system(mut self, preserve: bool) -> Self {
        self.preserve_system = preserve;
        self
    }

    /// Length of the fallback preview, in characters.
    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.preview_chars = preview_chars;
        self
    }

    async fn symbolize(&self, message: &Message) -> String {
        let symbol = match self
            .summarizer
            .summarize(build_symbolization_prompt(message))
            .await
        {
            Ok(text) => match text.lines().map(str::trim).find(|l| !l.is_empty()) {
                Some(line) => line.to_string(),
                None => preview(message, self.preview_chars),
            },
            Err(e) => {
                warn!("Symbolizing a {} message failed: {e}", message.role);
                preview(message, self.preview_chars)
            }
        };
        format!("- [{}] {symbol}", message.role)
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

        // join_all yields results in input order.
        let lines = join_all(span.iter().map(|m| self.symbolize(m))).await;
        debug!("Symbolized {} message(s)", lines.len());

        let body = format!("{SYMBOLS_HEADER}\n{}", lines.join("\n"));
        apply_mask(messages, &mask, Some(Message::developer(body)))
    }
}

/// First `max_chars` characters of the message text, with an ellipsis when cut.
fn preview(message: &Message, max_chars: usize) -> String {
    let text = message.text().replace('\n', " ");
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else if head.is_empty() {
        "[no content]".to_string()
    } else {
        head
    }
}

impl TruncationStrategy for SymbolizationStrategy {
    fn name(&self) -> &'static str {
        "symbolization"
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
