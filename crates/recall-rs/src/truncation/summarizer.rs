//! The summarizer delegate and the prompts sent to it.
//!
//! Which model condenses old messages is the caller's choice: anything that
//! turns a prompt into text can be a [`Summarizer`]. A failed call is never
//! fatal; the strategies fall back to deterministic text.

use crate::Message;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Summarizer::summarize`]. The error is a
/// human-readable reason, logged by the strategy.
pub type SummaryFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<String, String>> + Send + 'a>>;

/// Turns a prompt into condensed text, usually through a cheap LLM call.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, prompt: String) -> SummaryFuture<'_>;
}

/// Adapts an async closure into a [`Summarizer`].
///
/// ```ignore
/// let summarizer = FnSummarizer::new(move |prompt| {
///     let client = client.clone();
///     async move { client.complete(&prompt).await.map_err(|e| e.to_string()) }
/// });
/// ```
pub struct FnSummarizer<F>(F);

impl<F, Fut> FnSummarizer<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<String, String>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> Summarizer for FnSummarizer<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<String, String>> + Send + 'static,
{
    fn summarize(&self, prompt: String) -> SummaryFuture<'_> {
        Box::pin((self.0)(prompt))
    }
}

const SUMMARIZATION_PROMPT: &str = "\
Summarize the following conversation messages concisely. Focus on:
- What the user asked for and what was answered
- Decisions, preferences, and facts stated by either side
- Open questions and anything promised for later

Rules:
- Only include facts explicitly stated in the messages. Do not infer.
- Preserve names, numbers, identifiers, and quoted text verbatim.
- Write plain prose, no preamble.";

const SYMBOLIZATION_PROMPT: &str = "\
Reduce the following message to a single line of at most 15 words that \
captures its gist. Keep names, numbers, and identifiers verbatim. Reply with \
the line only.";

/// Prompt asking for one summary of `span`. Full message text is included.
pub fn build_summarization_prompt<'m>(span: impl IntoIterator<Item = &'m Message>) -> String {
    let mut prompt = String::from(SUMMARIZATION_PROMPT);
    prompt.push_str("\n\n=== MESSAGES ===\n");
    for message in span {
        prompt.push_str(&format!("[{}]: {}\n\n", message.role, describe(message)));
    }
    prompt
}

/// Prompt asking for a one-line gist of `message`.
pub fn build_symbolization_prompt(message: &Message) -> String {
    format!(
        "{SYMBOLIZATION_PROMPT}\n\n[{}]: {}",
        message.role,
        describe(message)
    )
}

fn describe(message: &Message) -> String {
    if let Some(calls) = &message.tool_calls {
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        return format!("[tool calls: {}]", names.join(", "));
    }
    match message.content.as_deref() {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => "[no content]".to_string(),
    }
}
