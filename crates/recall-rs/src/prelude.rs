//! Common imports for working with contexts and storages.
//!
//! ```ignore
//! use recall_rs::prelude::*;
//! ```

pub use std::sync::Arc;

pub use crate::config::{DriverConfig, RecallConfig};
pub use crate::context::manager::ContextManager;
pub use crate::context::{Context, EventHandler, HoldsContext, LoggingHandler};
pub use crate::driver::{DriverRef, DriverRegistry, StorageDriver};
pub use crate::error::{RecallError, Result};
pub use crate::identity::SessionIdentity;
pub use crate::item::{ItemCollection, StorageItem};
pub use crate::storage::{
    ChatHistory, ChatHistoryStorage, FailurePolicy, Identities, IdentityStorage, PreferenceStorage,
    Preferences, Storage, StorageKind, StorageManager,
};
pub use crate::truncation::{Summarizer, TruncationConfig, TruncationStrategy};
pub use crate::{Message, MessageRole};
