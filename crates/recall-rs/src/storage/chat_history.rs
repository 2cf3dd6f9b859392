//! Conversation transcript storage.

use super::{Storage, StorageKind};
use crate::{Message, MessageRole};

/// Ordered [`Message`]s of one session.
pub struct ChatHistory;

impl StorageKind for ChatHistory {
    const PREFIX: &'static str = "chat_history";
    type Item = Message;
}

pub type ChatHistoryStorage = Storage<ChatHistory>;

impl Storage<ChatHistory> {
    /// Messages with the given role, in order.
    pub fn by_role(&mut self, role: MessageRole) -> Vec<Message> {
        self.get()
            .iter()
            .filter(|m| m.role == role)
            .cloned()
            .collect()
    }

    /// Sum of `completion_tokens` reported on stored assistant messages.
    pub fn completion_tokens(&mut self) -> u64 {
        self.get()
            .iter()
            .filter_map(|m| m.usage.as_ref()?.completion_tokens)
            .map(u64::from)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionIdentity;
    use crate::storage::StorageManager;
    use crate::driver::MemoryDriver;
    use crate::UsageInfo;

    #[test]
    fn role_filter_and_usage_total() {
        let manager = StorageManager::single(MemoryDriver::new());
        let mut history = ChatHistoryStorage::new(&SessionIdentity::new("bot"), manager);
        history
            .set(vec![
                Message::system("rules"),
                Message::user("q1"),
                Message::assistant_text("a1").with_usage(UsageInfo {
                    completion_tokens: Some(12),
                    ..Default::default()
                }),
                Message::user("q2"),
                Message::assistant_text("a2").with_usage(UsageInfo {
                    completion_tokens: Some(30),
                    ..Default::default()
                }),
            ])
            .unwrap();

        let users: Vec<String> = history
            .by_role(MessageRole::User)
            .iter()
            .map(|m| m.text().to_string())
            .collect();
        assert_eq!(users, ["q1", "q2"]);
        assert_eq!(history.completion_tokens(), 42);
    }
}
