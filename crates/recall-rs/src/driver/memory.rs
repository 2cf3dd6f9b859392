//! Process-local driver over an explicitly shared map.

use super::{StorageDriver, lock};
use crate::error::Result;
use crate::identity::SessionIdentity;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Backing map for [`MemoryDriver`]. Clone it to let several drivers (or a
/// test and a driver) observe the same data.
#[derive(Clone, Default, Debug)]
pub struct SharedMemory(Arc<Mutex<HashMap<String, Value>>>);

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        lock(&self.0).contains_key(key)
    }
}

/// Keeps blobs in memory. Nothing survives the process.
#[derive(Clone, Default, Debug)]
pub struct MemoryDriver {
    store: SharedMemory,
}

impl MemoryDriver {
    /// A driver with its own private map.
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver over a map owned by the caller.
    pub fn with_store(store: SharedMemory) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SharedMemory {
        &self.store
    }
}

impl StorageDriver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn read(&self, identity: &SessionIdentity) -> Result<Option<Value>> {
        Ok(lock(&self.store.0).get(&identity.key()).cloned())
    }

    fn write(&self, identity: &SessionIdentity, data: &Value) -> Result<bool> {
        lock(&self.store.0).insert(identity.key(), data.clone());
        Ok(true)
    }

    fn remove(&self, identity: &SessionIdentity) -> Result<bool> {
        Ok(lock(&self.store.0).remove(&identity.key()).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_missing_returns_none() {
        let driver = MemoryDriver::new();
        assert!(driver.read(&SessionIdentity::new("bot")).unwrap().is_none());
    }

    #[test]
    fn write_read_remove() {
        let driver = MemoryDriver::new();
        let id = SessionIdentity::new("bot").with_chat("c1");
        assert!(driver.write(&id, &json!([{"a": 1}])).unwrap());
        assert_eq!(driver.read(&id).unwrap(), Some(json!([{"a": 1}])));
        assert!(driver.remove(&id).unwrap());
        assert!(!driver.remove(&id).unwrap());
        assert!(driver.read(&id).unwrap().is_none());
    }

    #[test]
    fn drivers_over_one_store_share_data() {
        let store = SharedMemory::new();
        let a = MemoryDriver::with_store(store.clone());
        let b = MemoryDriver::with_store(store.clone());
        let id = SessionIdentity::new("bot");
        a.write(&id, &json!([])).unwrap();
        assert_eq!(b.read(&id).unwrap(), Some(json!([])));
        assert!(store.contains_key("bot"));
    }

    #[test]
    fn separate_drivers_are_isolated() {
        let a = MemoryDriver::new();
        let b = MemoryDriver::new();
        let id = SessionIdentity::new("bot");
        a.write(&id, &json!([1])).unwrap();
        assert!(b.read(&id).unwrap().is_none());
    }
}
