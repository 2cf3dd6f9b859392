//! Session-scoped driver: state lives as long as the caller's session bag.

use super::{StorageDriver, lock};
use crate::error::Result;
use crate::identity::SessionIdentity;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Namespace prepended to every key written into a session.
pub const SESSION_NAMESPACE: &str = "recall.";

/// A per-session key-value bag, usually owned by the surrounding request
/// framework.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn put(&self, key: &str, value: Value) -> Result<()>;
    fn forget(&self, key: &str) -> Result<bool>;
}

/// In-memory [`SessionStore`]. Clones share the same bag.
#[derive(Clone, Default, Debug)]
pub struct MemorySession(Arc<Mutex<HashMap<String, Value>>>);

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.0).keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl SessionStore for MemorySession {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(lock(&self.0).get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        lock(&self.0).insert(key.to_string(), value);
        Ok(())
    }

    fn forget(&self, key: &str) -> Result<bool> {
        Ok(lock(&self.0).remove(key).is_some())
    }
}

/// Stores blobs inside a [`SessionStore`] under `recall.{key}`.
#[derive(Clone)]
pub struct SessionDriver {
    session: Arc<dyn SessionStore>,
}

impl SessionDriver {
    pub fn new(session: Arc<dyn SessionStore>) -> Self {
        Self { session }
    }

    fn session_key(identity: &SessionIdentity) -> String {
        format!("{SESSION_NAMESPACE}{}", identity.key())
    }
}

impl StorageDriver for SessionDriver {
    fn name(&self) -> &str {
        "session"
    }

    fn read(&self, identity: &SessionIdentity) -> Result<Option<Value>> {
        self.session.get(&Self::session_key(identity))
    }

    fn write(&self, identity: &SessionIdentity, data: &Value) -> Result<bool> {
        self.session.put(&Self::session_key(identity), data.clone())?;
        Ok(true)
    }

    fn remove(&self, identity: &SessionIdentity) -> Result<bool> {
        self.session.forget(&Self::session_key(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_are_namespaced_inside_the_session() {
        let bag = MemorySession::new();
        let driver = SessionDriver::new(Arc::new(bag.clone()));
        let id = SessionIdentity::new("bot").with_user("u1");

        driver.write(&id, &json!([{"k": "v"}])).unwrap();
        assert_eq!(bag.keys(), vec!["recall.bot_u1".to_string()]);
        assert_eq!(driver.read(&id).unwrap(), Some(json!([{"k": "v"}])));
    }

    #[test]
    fn remove_reports_whether_anything_was_there() {
        let driver = SessionDriver::new(Arc::new(MemorySession::new()));
        let id = SessionIdentity::new("bot");
        assert!(!driver.remove(&id).unwrap());
        driver.write(&id, &json!([])).unwrap();
        assert!(driver.remove(&id).unwrap());
        assert!(driver.read(&id).unwrap().is_none());
    }
}
