//! Persistent, multi-backend conversation state for LLM agents.
//!
//! `recall-rs` keeps an agent's conversational state (chat history,
//! preferences, any typed key-value collection) in one or more storage
//! backends and provides policies for keeping message history inside a
//! context-window budget.
//!
//! # Where to find things
//!
//! - **Name a session:** [`SessionIdentity`] derives the storage key from
//!   agent, chat, user, and scope.
//!
//! - **Plug in a backend:** implement [`StorageDriver`](driver::StorageDriver)
//!   or use one of the shipped drivers in [`driver`]: in-memory, session,
//!   cache, JSON files, single-row SQLite, and the multi-row SQLite message
//!   driver.
//!
//! - **Replicate across backends:** [`StorageManager`](storage::manager::StorageManager)
//!   reads from the first driver that has data and writes to all of them,
//!   isolating failures per driver.
//!
//! - **Hold typed state:** [`Storage`](storage::Storage) wraps a manager with
//!   lazy loading and dirty tracking. [`ChatHistoryStorage`](storage::ChatHistoryStorage),
//!   [`PreferenceStorage`](storage::PreferenceStorage) and
//!   [`IdentityStorage`](storage::IdentityStorage) ship ready to use.
//!
//! - **Manage a session:** [`Context`](context::Context) composes several
//!   storages under one identity with bulk save/read/clear/remove, and tracks
//!   every identity in the agent's ledger.
//!   [`ContextManager`](context::manager::ContextManager) queries that ledger
//!   across sessions.
//!
//! - **Fit the context window:** the [`truncation`] strategies drop,
//!   summarize, or symbolize old messages.
//!
//! - **Configure it:** [`RecallConfig`](config::RecallConfig) describes drivers
//!   and truncation in a JSON file.
//!
//! # Example
//!
//! ```ignore
//! use recall_rs::prelude::*;
//!
//! let config = RecallConfig::default();
//! let registry = Arc::new(config.build_registry()?);
//! let identity = SessionIdentity::new("support-bot").with_chat("ticket-42");
//!
//! let mut context = Context::from_config(identity, &config, registry)?;
//! let history = context.make::<ChatHistory>()?;
//! history.add(Message::user("My order never arrived."));
//! context.save()?;
//! ```

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod identity;
pub mod item;
pub mod prelude;
pub mod storage;
pub mod truncation;

use serde::{Deserialize, Serialize};

pub use error::{RecallError, Result};
pub use identity::SessionIdentity;
pub use item::{ItemCollection, StorageItem};

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::Developer => write!(f, "developer"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Non-text content attached to a message.
///
/// Stored with a `type` discriminator; payloads with an unknown `type` are
/// rejected when a collection is rehydrated.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    Document {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
        /// Extracted text, when available.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

/// Token usage reported by the model for the response that produced a message.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UsageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

/// A tool call requested by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments string as returned by the model.
    pub arguments: String,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,
}

impl Message {
    fn with_role(role: MessageRole, content: Option<String>) -> Self {
        Self {
            role,
            content,
            attachments: Vec::new(),
            tool_calls: None,
            tool_call_id: None,
            usage: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, Some(content.into()))
    }

    pub fn developer(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Developer, Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, Some(content.into()))
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, Some(content.into()))
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::with_role(MessageRole::Assistant, None)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::with_role(MessageRole::Tool, Some(content.into()))
        }
    }

    /// Attach response usage metadata (typically on assistant messages).
    pub fn with_usage(mut self, usage: UsageInfo) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Text content, or an empty string.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// System and developer messages carry instructions that truncation
    /// keeps when configured to preserve them.
    pub fn is_preserved(&self) -> bool {
        matches!(self.role, MessageRole::System | MessageRole::Developer)
    }
}
