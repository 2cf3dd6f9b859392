//! Drop the oldest messages until the estimate fits a fraction of the budget.

use super::{
    DEFAULT_CHARS_PER_TOKEN, TruncationFuture, TruncationStrategy, apply_mask, estimate_tokens,
    is_protected,
};
use crate::Message;
use tracing::debug;

/// Keeps as many recent messages as fit in `target_percentage × budget`.
///
/// Preserved messages are reserved first. The remaining messages are scanned
/// newest to oldest and the first one that does not fit ends the scan, so the
/// result is always a contiguous recent tail (plus the preserved messages).
#[derive(Debug, Clone)]
pub struct TokenBasedTruncationStrategy {
    target_percentage: f64,
    chars_per_token: f64,
    min_messages: usize,
    preserve_system: bool,
}

impl Default for TokenBasedTruncationStrategy {
    fn default() -> Self {
        Self::new(0.75)
    }
}

impl TokenBasedTruncationStrategy {
    pub fn new(target_percentage: f64) -> Self {
        Self {
            target_percentage,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            min_messages: 1,
            preserve_system: true,
        }
    }

    pub fn with_chars_per_token(mut self, chars_per_token: f64) -> Self {
        self.chars_per_token = chars_per_token;
        self
    }

    /// Most recent messages kept even when they alone exceed the target.
    pub fn with_min_messages(mut self, min_messages: usize) -> Self {
        self.min_messages = min_messages;
        self
    }

    pub fn with_preserve_system(mut self, preserve: bool) -> Self {
        self.preserve_system = preserve;
        self
    }

    /// Token target for `budget_threshold`.
    pub fn target(&self, budget_threshold: usize) -> usize {
        (budget_threshold as f64 * self.target_percentage).floor() as usize
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
        let target = self.target(budget_threshold);

        let mut mask: Vec<bool> = messages
            .iter()
            .map(|m| is_protected(m, self.preserve_system))
            .collect();
        let mut used: usize = messages
            .iter()
            .zip(&mask)
            .filter(|(_, protected)| **protected)
            .map(|(m, _)| estimate_tokens(m, self.chars_per_token))
            .sum();

        let mut kept = 0;
        for (index, message) in messages.iter().enumerate().rev() {
            if mask[index] {
                continue;
            }
            let tokens = estimate_tokens(message, self.chars_per_token);
            if kept >= self.min_messages && used + tokens > target {
                break;
            }
            mask[index] = true;
            used += tokens;
            kept += 1;
        }

        debug!(
            "Token-based truncation kept {kept} message(s), ~{used} of {target} target tokens"
        );
        apply_mask(messages, &mask, None)
    }
}

impl TruncationStrategy for TokenBasedTruncationStrategy {
    fn name(&self) -> &'static str {
        "token_based"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UsageInfo;

    /// A user message of exactly `tokens` estimated tokens.
    fn sized(tokens: usize) -> Message {
        Message::user("x".repeat(tokens * 4))
    }

    #[test]
    fn drops_oldest_until_under_target() {
        let messages = vec![sized(10), sized(10), sized(10), sized(10)];
        // target = 0.75 * 40 = 30 tokens -> the three newest fit.
        let out = TokenBasedTruncationStrategy::default().apply(messages.clone(), 40, 41);
        assert_eq!(out, messages[1..]);
    }

    #[test]
    fn first_overflow_stops_the_scan() {
        // Newest first: 5 fits, 30 overflows, the older 1 would fit but is
        // never reached.
        let messages = vec![sized(1), sized(30), sized(5)];
        let out = TokenBasedTruncationStrategy::new(0.5).apply(messages.clone(), 20, 100);
        assert_eq!(out, [messages[2].clone()]);
    }

    #[test]
    fn preserved_tokens_are_reserved_first() {
        let messages = vec![
            Message::system("s".repeat(80)), // 20 tokens
            sized(10),
            sized(10),
        ];
        // target = 30, 20 reserved -> only the newest fits.
        let out = TokenBasedTruncationStrategy::new(1.0).apply(messages.clone(), 30, 31);
        assert_eq!(out, [messages[0].clone(), messages[2].clone()]);
    }

    #[test]
    fn min_messages_survive_a_tiny_target() {
        let messages = vec![sized(50), sized(50), sized(50)];
        let out = TokenBasedTruncationStrategy::default()
            .with_min_messages(2)
            .apply(messages.clone(), 1, 100);
        assert_eq!(out, messages[1..]);
    }

    #[test]
    fn assistant_usage_drives_the_estimate() {
        let cheap_answer = Message::assistant_text("y".repeat(4000)).with_usage(UsageInfo {
            completion_tokens: Some(2),
            ..Default::default()
        });
        let messages = vec![sized(3), cheap_answer];
        // target = 7: the 2-token answer and the 3-token question both fit.
        let out = TokenBasedTruncationStrategy::new(1.0).apply(messages.clone(), 7, 8);
        assert_eq!(out, messages);
    }
}
