//! Error type shared by drivers, storages, contexts, and configuration.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, RecallError>;

/// Errors surfaced by the storage layer.
///
/// Transient backend failures are normally absorbed by
/// [`StorageManager`](crate::storage::manager::StorageManager) and
/// [`Storage::load`](crate::storage::Storage::load); only contract violations
/// and total unavailability reach callers by default.
#[derive(Debug, Error)]
pub enum RecallError {
    /// A caller passed something the API does not accept (bad item payload,
    /// empty driver list, unknown driver or cache store name).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),

    /// A backend-specific failure that is not I/O or SQL (poisoned handle,
    /// rejected value, ...).
    #[error("backend error: {0}")]
    Backend(String),

    /// Every driver answered, none of them holds data for the key.
    #[error("no data stored for {key}")]
    NotFound { key: String },

    /// No driver produced data and at least one of them failed.
    #[error("storage unavailable for {key}: {}", failures.join("; "))]
    Unavailable { key: String, failures: Vec<String> },

    /// Every configured driver failed to persist the key.
    #[error("every driver failed to write {key}")]
    WriteFailed { key: String },
}

impl From<rusqlite::Error> for RecallError {
    fn from(e: rusqlite::Error) -> Self {
        RecallError::Database(e.to_string())
    }
}

impl RecallError {
    /// Shorthand for [`RecallError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        RecallError::InvalidArgument(msg.into())
    }

    /// Whether this error only means "nothing stored yet".
    pub fn is_not_found(&self) -> bool {
        matches!(self, RecallError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_lists_every_failure() {
        let err = RecallError::Unavailable {
            key: "bot_c1".into(),
            failures: vec!["file: disk full".into(), "cache: timeout".into()],
        };
        let text = err.to_string();
        assert!(text.contains("bot_c1"));
        assert!(text.contains("disk full; cache: timeout"));
    }

    #[test]
    fn not_found_is_distinguishable() {
        assert!(RecallError::NotFound { key: "k".into() }.is_not_found());
        assert!(!RecallError::invalid("nope").is_not_found());
    }
}
