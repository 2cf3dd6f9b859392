//! Storage drivers: one backend each, raw JSON blobs keyed by identity.
//!
//! | Driver | Backend | Persistence |
//! |--------|---------|-------------|
//! | [`MemoryDriver`] | injectable shared map | process lifetime |
//! | [`SessionDriver`] | a [`SessionStore`] bag | session lifetime |
//! | [`CacheDriver`] | a named [`CacheStore`] | until expiry |
//! | [`FileDriver`] | one JSON file per key | durable |
//! | [`SqliteDriver`] | one row per key | durable |
//! | [`SqliteMessageDriver`] | session row + message rows | durable |
//!
//! Drivers hold nothing but their backend handle. Replication, fallback and
//! failure isolation live one level up in
//! [`StorageManager`](crate::storage::manager::StorageManager).

pub mod cache;
pub mod file;
pub mod memory;
pub mod session;
pub mod sqlite;
pub mod sqlite_messages;

use crate::error::{RecallError, Result};
use crate::identity::SessionIdentity;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use cache::{CacheDriver, CacheRepository, CacheStore, MemoryCache};
pub use file::FileDriver;
pub use memory::{MemoryDriver, SharedMemory};
pub use session::{MemorySession, SessionDriver, SessionStore};
pub use sqlite::SqliteDriver;
pub use sqlite_messages::SqliteMessageDriver;

/// A single storage backend.
///
/// Implementations must be safe for concurrent use with distinct keys.
/// Serializing concurrent writes to the same key is the backend's business.
pub trait StorageDriver: Send + Sync {
    /// Short label used in diagnostics.
    fn name(&self) -> &str;

    /// Fetch the blob stored for `identity`.
    ///
    /// Returns `Ok(None)` when nothing is stored. Errors are reserved for
    /// genuine backend failures.
    fn read(&self, identity: &SessionIdentity) -> Result<Option<Value>>;

    /// Store `data` for `identity`, replacing anything already there.
    ///
    /// Returns `Ok(false)` when the backend declined the write.
    fn write(&self, identity: &SessionIdentity, data: &Value) -> Result<bool>;

    /// Delete whatever is stored for `identity`. Returns whether anything
    /// was removed.
    fn remove(&self, identity: &SessionIdentity) -> Result<bool>;
}

/// A driver given either by registry name or as a live instance.
#[derive(Clone)]
pub enum DriverRef {
    Named(String),
    Instance(Arc<dyn StorageDriver>),
}

impl fmt::Debug for DriverRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
            DriverRef::Instance(d) => f.debug_tuple("Instance").field(&d.name()).finish(),
        }
    }
}

impl From<&str> for DriverRef {
    fn from(name: &str) -> Self {
        DriverRef::Named(name.to_string())
    }
}

impl From<String> for DriverRef {
    fn from(name: String) -> Self {
        DriverRef::Named(name)
    }
}

impl From<Arc<dyn StorageDriver>> for DriverRef {
    fn from(driver: Arc<dyn StorageDriver>) -> Self {
        DriverRef::Instance(driver)
    }
}

/// Named driver instances shared by every storage built from a config.
///
/// # Example
///
/// ```ignore
/// let registry = DriverRegistry::new()
///     .with("memory", MemoryDriver::new())
///     .with("files", FileDriver::new("/var/lib/agent/state"));
///
/// let drivers = registry.resolve(&["files".into(), "memory".into()])?;
/// ```
#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn StorageDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under `name` (builder pattern). Replaces any driver
    /// already registered under that name.
    pub fn with(mut self, name: impl Into<String>, driver: impl StorageDriver + 'static) -> Self {
        self.insert(name, Arc::new(driver));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, driver: Arc<dyn StorageDriver>) {
        self.drivers.insert(name.into(), driver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageDriver>> {
        self.drivers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Turn a mixed list of names and instances into concrete drivers,
    /// preserving order.
    pub fn resolve(&self, refs: &[DriverRef]) -> Result<Vec<Arc<dyn StorageDriver>>> {
        refs.iter()
            .map(|r| match r {
                DriverRef::Instance(driver) => Ok(driver.clone()),
                DriverRef::Named(name) => self.get(name).ok_or_else(|| {
                    RecallError::invalid(format!(
                        "unknown storage driver '{name}' (registered: {})",
                        self.names().join(", ")
                    ))
                }),
            })
            .collect()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_keeps_order_and_mixes_names_with_instances() {
        let registry = DriverRegistry::new()
            .with("a", MemoryDriver::new())
            .with("b", MemoryDriver::new());
        let extra: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new());

        let drivers = registry
            .resolve(&["b".into(), DriverRef::Instance(extra.clone()), "a".into()])
            .unwrap();
        assert_eq!(drivers.len(), 3);
        assert!(Arc::ptr_eq(&drivers[0], &registry.get("b").unwrap()));
        assert!(Arc::ptr_eq(&drivers[1], &extra));
    }

    #[test]
    fn unknown_name_is_an_invalid_argument() {
        let registry = DriverRegistry::new().with("memory", MemoryDriver::new());
        let err = registry.resolve(&["redis".into()]).err().unwrap();
        assert!(matches!(err, RecallError::InvalidArgument(_)));
        assert!(err.to_string().contains("redis"));
        assert!(err.to_string().contains("memory"));
    }
}
