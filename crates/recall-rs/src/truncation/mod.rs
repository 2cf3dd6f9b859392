//! Keeping message history inside a context-window budget.
//!
//! Every strategy implements [`TruncationStrategy`]: given the messages, the
//! budget, and the current usage it returns a reduced list. All of them:
//!
//! - return the input unchanged when `current_usage <= budget_threshold`
//! - never drop system/developer messages when `preserve_system` is set
//! - keep the original relative order of everything they keep
//!
//! | Strategy | Dropped messages become |
//! |----------|-------------------------|
//! | [`SimpleTruncationStrategy`] | nothing |
//! | [`TokenBasedTruncationStrategy`] | nothing |
//! | [`SummarizationStrategy`] | one developer summary |
//! | [`SymbolizationStrategy`] | one developer message, one line per message |
//!
//! The two delegate-based strategies call a [`Summarizer`] (usually a cheap
//! LLM), which is why the trait returns a future.

pub mod simple;
pub mod summarization;
pub mod summarizer;
pub mod symbolization;
pub mod token_based;

pub use simple::SimpleTruncationStrategy;
pub use summarization::SummarizationStrategy;
pub use summarizer::{
    FnSummarizer, SummaryFuture, Summarizer, build_summarization_prompt,
    build_symbolization_prompt,
};
pub use symbolization::SymbolizationStrategy;
pub use token_based::TokenBasedTruncationStrategy;

use crate::error::{RecallError, Result};
use crate::{Message, MessageRole};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Default characters-per-token ratio for the fallback estimate.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

/// Boxed future returned by [`TruncationStrategy::truncate`].
pub type TruncationFuture<'a> = Pin<Box<dyn Future<Output = Vec<Message>> + Send + 'a>>;

/// Reduces a message list to fit a budget.
///
/// Strategies are configured at construction and hold no other state, so one
/// instance can serve any number of conversations.
pub trait TruncationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn truncate<'a>(
        &'a self,
        messages: Vec<Message>,
        budget_threshold: usize,
        current_usage: usize,
    ) -> TruncationFuture<'a>;
}

// ── Token estimation ───────────────────────────────────────────────

/// Estimated tokens for one message.
///
/// Assistant messages use the completion tokens the model reported, when
/// present. Prompt tokens are never used: they count the whole prior context.
/// Everything else falls back to `ceil(chars / chars_per_token)`.
pub fn estimate_tokens(message: &Message, chars_per_token: f64) -> usize {
    if message.role == MessageRole::Assistant
        && let Some(completion) = message.usage.as_ref().and_then(|u| u.completion_tokens)
    {
        return completion as usize;
    }
    let mut chars = message.text().chars().count();
    for call in message.tool_calls.iter().flatten() {
        chars += call.name.chars().count() + call.arguments.chars().count();
    }
    (chars as f64 / chars_per_token).ceil() as usize
}

/// Sum of [`estimate_tokens`] over `messages`.
pub fn estimate_total_tokens(messages: &[Message], chars_per_token: f64) -> usize {
    messages
        .iter()
        .map(|m| estimate_tokens(m, chars_per_token))
        .sum()
}

// ── Shared helpers ─────────────────────────────────────────────────

fn is_protected(message: &Message, preserve_system: bool) -> bool {
    preserve_system && message.is_preserved()
}

/// Mark which messages survive when only the `keep` most recent unprotected
/// messages are kept.
fn keep_recent(messages: &[Message], keep: usize, preserve_system: bool) -> Vec<bool> {
    let mut remaining = keep;
    let mut mask = vec![false; messages.len()];
    for (index, message) in messages.iter().enumerate().rev() {
        if is_protected(message, preserve_system) {
            mask[index] = true;
        } else if remaining > 0 {
            mask[index] = true;
            remaining -= 1;
        }
    }
    mask
}

/// Keep the messages marked in `mask`; the dropped ones are replaced by
/// `replacement` at the position of the first dropped message.
fn apply_mask(messages: Vec<Message>, mask: &[bool], replacement: Option<Message>) -> Vec<Message> {
    let mut replacement = replacement;
    let mut out = Vec::with_capacity(messages.len());
    for (message, keep) in messages.into_iter().zip(mask) {
        if *keep {
            out.push(message);
        } else if let Some(r) = replacement.take() {
            out.push(r);
        }
    }
    out
}

fn dropped<'m>(messages: &'m [Message], mask: &[bool]) -> Vec<&'m Message> {
    messages
        .iter()
        .zip(mask)
        .filter(|(_, keep)| !**keep)
        .map(|(m, _)| m)
        .collect()
}

// ── Configuration ──────────────────────────────────────────────────

/// Which strategy [`TruncationConfig::build`] creates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Simple,
    TokenBased,
    Summarization,
    Symbolization,
}

/// Serializable strategy configuration. Knobs a strategy does not use are
/// ignored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TruncationConfig {
    pub strategy: StrategyKind,
    /// Most recent non-preserved messages kept verbatim.
    pub keep_messages: usize,
    /// Never drop system/developer messages.
    pub preserve_system: bool,
    /// Fraction of the budget the token-based strategy aims for.
    pub target_percentage: f64,
    pub chars_per_token: f64,
    /// Most recent messages the token-based strategy always keeps.
    pub min_messages: usize,
    /// Length of the content preview used when symbolizing a message fails.
    pub symbol_preview_chars: usize,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Simple,
            keep_messages: 10,
            preserve_system: true,
            target_percentage: 0.75,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            min_messages: 1,
            symbol_preview_chars: 80,
        }
    }
}

impl TruncationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.target_percentage > 0.0 && self.target_percentage <= 1.0) {
            return Err(RecallError::invalid(format!(
                "target_percentage must be in (0, 1], got {}",
                self.target_percentage
            )));
        }
        if self.chars_per_token.is_nan() || self.chars_per_token <= 0.0 {
            return Err(RecallError::invalid(format!(
                "chars_per_token must be positive, got {}",
                self.chars_per_token
            )));
        }
        Ok(())
    }

    /// Build the configured strategy. The summarization and symbolization
    /// strategies need a `summarizer`.
    pub fn build(
        &self,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Result<Box<dyn TruncationStrategy>> {
        self.validate()?;
        let require = |kind: &str| {
            summarizer.clone().ok_or_else(|| {
                RecallError::invalid(format!("the {kind} strategy needs a summarizer"))
            })
        };
        let strategy: Box<dyn TruncationStrategy> = match self.strategy {
            StrategyKind::Simple => Box::new(
                SimpleTruncationStrategy::new(self.keep_messages)
                    .with_preserve_system(self.preserve_system),
            ),
            StrategyKind::TokenBased => Box::new(
                TokenBasedTruncationStrategy::new(self.target_percentage)
                    .with_chars_per_token(self.chars_per_token)
                    .with_min_messages(self.min_messages)
                    .with_preserve_system(self.preserve_system),
            ),
            StrategyKind::Summarization => Box::new(
                SummarizationStrategy::new(require("summarization")?, self.keep_messages)
                    .with_preserve_system(self.preserve_system),
            ),
            StrategyKind::Symbolization => Box::new(
                SymbolizationStrategy::new(require("symbolization")?, self.keep_messages)
                    .with_preserve_system(self.preserve_system)
                    .with_preview_chars(self.symbol_preview_chars),
            ),
        };
        Ok(strategy)
    }
}
