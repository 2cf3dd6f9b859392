//! Session identities: the value that names a storage subject.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies whose state a storage holds: an agent, optionally narrowed to a
/// chat and/or a user, optionally scoped to one storage purpose.
///
/// Identities are immutable values. [`with_scope`](Self::with_scope) returns
/// a new identity; nothing mutates in place.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Free-form grouping label. Used for filtering, not part of the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl SessionIdentity {
    /// An agent-wide identity with no chat, user, group, or scope.
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            chat_name: None,
            user_id: None,
            group: None,
            scope: None,
        }
    }

    pub fn with_chat(mut self, chat_name: impl Into<String>) -> Self {
        self.chat_name = Some(chat_name.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Return a copy of this identity scoped to one storage purpose.
    pub fn with_scope(&self, scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            ..self.clone()
        }
    }

    /// Return a copy with the scope removed.
    pub fn without_scope(&self) -> Self {
        Self {
            scope: None,
            ..self.clone()
        }
    }

    pub fn is_scoped(&self) -> bool {
        self.scope.is_some()
    }

    /// Deterministic storage key.
    ///
    /// Format: `{agent}[_{chat}][_@{user}][:{scope}]`. The `@` marker keeps a
    /// chat and a user with the same name apart. Segments are escaped so
    /// that `_`, `@`, `:` and `%` inside a value can never forge a separator.
    pub fn key(&self) -> String {
        let mut key = escape_segment(&self.agent_name);
        if let Some(ref chat) = self.chat_name {
            key.push('_');
            key.push_str(&escape_segment(chat));
        }
        if let Some(ref user) = self.user_id {
            key.push_str("_@");
            key.push_str(&escape_segment(user));
        }
        if let Some(ref scope) = self.scope {
            key.push(':');
            key.push_str(&escape_segment(scope));
        }
        key
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

fn escape_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            ':' => out.push_str("%3A"),
            '@' => out.push_str("%40"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_uses_agent_and_chat_or_user() {
        assert_eq!(SessionIdentity::new("bot").with_chat("c1").key(), "bot_c1");
        assert_eq!(SessionIdentity::new("bot").with_user("u1").key(), "bot_@u1");
        assert_eq!(
            SessionIdentity::new("bot").with_chat("c1").with_user("u1").key(),
            "bot_c1_@u1"
        );
        assert_eq!(SessionIdentity::new("bot").key(), "bot");
    }

    #[test]
    fn identical_fields_produce_identical_keys() {
        let a = SessionIdentity::new("bot").with_chat("c").with_user("u");
        let b = SessionIdentity::new("bot").with_chat("c").with_user("u");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn changing_any_field_changes_the_key() {
        let base = SessionIdentity::new("bot").with_chat("c").with_user("u");
        let variants = [
            SessionIdentity::new("bot2").with_chat("c").with_user("u"),
            SessionIdentity::new("bot").with_chat("c2").with_user("u"),
            SessionIdentity::new("bot").with_chat("c").with_user("u2"),
            SessionIdentity::new("bot").with_chat("c"),
        ];
        for v in &variants {
            assert_ne!(base.key(), v.key(), "{v:?}");
        }
    }

    #[test]
    fn scoped_key_never_collides_with_unscoped() {
        let scoped = SessionIdentity::new("bot").with_chat("c").with_scope("memory");
        let forged = SessionIdentity::new("bot").with_chat("c:memory");
        assert_ne!(scoped.key(), forged.key());
        assert_eq!(scoped.key(), "bot_c:memory");
        assert_eq!(forged.key(), "bot_c%3Amemory");
    }

    #[test]
    fn chat_and_user_of_the_same_name_differ() {
        let chat = SessionIdentity::new("bot").with_chat("x");
        let user = SessionIdentity::new("bot").with_user("x");
        assert_ne!(chat.key(), user.key());

        let forged = SessionIdentity::new("bot").with_chat("@x");
        assert_ne!(forged.key(), user.key());
        assert_eq!(forged.key(), "bot_%40x");
    }

    #[test]
    fn separators_inside_values_are_escaped() {
        let a = SessionIdentity::new("a_b").with_chat("c");
        let b = SessionIdentity::new("a").with_chat("b_c");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn with_scope_leaves_original_untouched() {
        let base = SessionIdentity::new("bot").with_chat("c");
        let scoped = base.with_scope("chat_history");
        assert!(base.scope.is_none());
        assert_eq!(scoped.scope.as_deref(), Some("chat_history"));
        assert_eq!(scoped.without_scope(), base);
    }

    #[test]
    fn group_is_not_part_of_the_key() {
        let a = SessionIdentity::new("bot").with_chat("c").with_group("team-a");
        let b = SessionIdentity::new("bot").with_chat("c");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn serde_skips_absent_fields() {
        let id = SessionIdentity::new("bot").with_chat("c");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json, serde_json::json!({"agent_name": "bot", "chat_name": "c"}));
        let back: SessionIdentity = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }
}
