//! Keep the last N messages, drop the rest.

use super::{TruncationFuture, TruncationStrategy, apply_mask, keep_recent};
use crate::Message;

#[derive(Debug, Clone)]
pub struct SimpleTruncationStrategy {
    keep_messages: usize,
    preserve_system: bool,
}

impl Default for SimpleTruncationStrategy {
    fn default() -> Self {
        Self::new(10)
    }
}

impl SimpleTruncationStrategy {
    pub fn new(keep_messages: usize) -> Self {
        Self {
            keep_messages,
            preserve_system: true,
        }
    }

    pub fn with_preserve_system(mut self, preserve: bool) -> Self {
        self.preserve_system = preserve;
        self
    }

    /// Synchronous form of [`TruncationStrategy::truncate`].
    pub fn apply(
        &self,
        messages: Vec<Message>,
        budget_threshold: usize,
        current_usage: usize,
    ) -> Vec<Message> {
        if current_usage <= budget_threshold {
            return messages;
        }
        let mask = keep_recent(&messages, self.keep_messages, self.preserve_system);
        apply_mask(messages, &mask, None)
    }
}

impl TruncationStrategy for SimpleTruncationStrategy {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn truncate<'a>(
        &'a self,
        messages: Vec<Message>,
        budget_threshold: usize,
        current_usage: usize,
    ) -> TruncationFuture<'a> {
        Box::pin(async move { self.apply(messages, budget_threshold, current_usage) })
    }
}
