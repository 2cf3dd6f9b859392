//! Cache-backed driver with optional named stores and expiry.

use super::{StorageDriver, lock};
use crate::error::{RecallError, Result};
use crate::identity::SessionIdentity;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Key prefix applied to every cache entry written by [`CacheDriver`].
pub const DEFAULT_CACHE_PREFIX: &str = "recall:";

/// A key-value cache with optional per-entry time-to-live.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    /// Store `value`. `ttl = None` keeps it until explicitly forgotten.
    fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;
    fn forget(&self, key: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process [`CacheStore`]. Expired entries are dropped lazily on access.
#[derive(Clone, Default, Debug)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        lock(&self.entries)
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        lock(&self.entries).insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    fn forget(&self, key: &str) -> Result<bool> {
        Ok(lock(&self.entries).remove(key).is_some())
    }
}

/// A default cache store plus any number of named ones.
#[derive(Clone)]
pub struct CacheRepository {
    default: Arc<dyn CacheStore>,
    named: HashMap<String, Arc<dyn CacheStore>>,
}

impl CacheRepository {
    pub fn new(default: Arc<dyn CacheStore>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    /// Register a named store (builder pattern).
    pub fn with_store(mut self, name: impl Into<String>, store: Arc<dyn CacheStore>) -> Self {
        self.named.insert(name.into(), store);
        self
    }

    /// Look up a store by name; `None` selects the default store.
    pub fn store(&self, name: Option<&str>) -> Result<Arc<dyn CacheStore>> {
        match name {
            None => Ok(self.default.clone()),
            Some(name) => self
                .named
                .get(name)
                .cloned()
                .ok_or_else(|| RecallError::invalid(format!("unknown cache store '{name}'"))),
        }
    }
}

impl Default for CacheRepository {
    fn default() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }
}

impl fmt::Debug for CacheRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.named.keys().collect();
        names.sort();
        f.debug_struct("CacheRepository")
            .field("named", &names)
            .finish()
    }
}

/// Stores blobs in a cache store.
///
/// The store is resolved once at construction so an unknown store name fails
/// immediately instead of on the first write.
#[derive(Clone)]
pub struct CacheDriver {
    store: Arc<dyn CacheStore>,
    store_name: Option<String>,
    ttl: Option<Duration>,
    key_prefix: String,
}

impl CacheDriver {
    /// Use the repository's default store.
    pub fn new(repository: &CacheRepository) -> Self {
        Self {
            store: repository.default.clone(),
            store_name: None,
            ttl: None,
            key_prefix: DEFAULT_CACHE_PREFIX.to_string(),
        }
    }

    /// Use a named store from the repository.
    pub fn with_named_store(repository: &CacheRepository, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let store = repository.store(Some(&name))?;
        Ok(Self {
            store,
            store_name: Some(name),
            ttl: None,
            key_prefix: DEFAULT_CACHE_PREFIX.to_string(),
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn store_name(&self) -> Option<&str> {
        self.store_name.as_deref()
    }

    fn cache_key(&self, identity: &SessionIdentity) -> String {
        format!("{}{}", self.key_prefix, identity.key())
    }
}

impl StorageDriver for CacheDriver {
    fn name(&self) -> &str {
        "cache"
    }

    fn read(&self, identity: &SessionIdentity) -> Result<Option<Value>> {
        self.store.get(&self.cache_key(identity))
    }

    fn write(&self, identity: &SessionIdentity, data: &Value) -> Result<bool> {
        self.store
            .put(&self.cache_key(identity), data.clone(), self.ttl)?;
        Ok(true)
    }

    fn remove(&self, identity: &SessionIdentity) -> Result<bool> {
        self.store.forget(&self.cache_key(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_store_roundtrip() {
        let repo = CacheRepository::default();
        let driver = CacheDriver::new(&repo);
        let id = SessionIdentity::new("bot").with_chat("c");
        driver.write(&id, &json!([{"x": 1}])).unwrap();
        assert_eq!(driver.read(&id).unwrap(), Some(json!([{"x": 1}])));
        assert!(driver.remove(&id).unwrap());
        assert!(driver.read(&id).unwrap().is_none());
    }

    #[test]
    fn named_store_is_isolated_from_default() {
        let fast = MemoryCache::new();
        let repo = CacheRepository::default().with_store("fast", Arc::new(fast.clone()));
        let named = CacheDriver::with_named_store(&repo, "fast").unwrap();
        let default = CacheDriver::new(&repo);
        let id = SessionIdentity::new("bot");

        named.write(&id, &json!([])).unwrap();
        assert_eq!(fast.len(), 1);
        assert!(default.read(&id).unwrap().is_none());
        assert_eq!(named.store_name(), Some("fast"));
    }

    #[test]
    fn unknown_named_store_fails_at_construction() {
        let repo = CacheRepository::default();
        let err = CacheDriver::with_named_store(&repo, "redis").err().unwrap();
        assert!(matches!(err, RecallError::InvalidArgument(_)));
    }

    #[test]
    fn expired_entries_read_as_missing() {
        let cache = MemoryCache::new();
        cache
            .put("k", json!([1]), Some(Duration::from_millis(0)))
            .unwrap();
        assert!(cache.get("k").unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn keys_carry_the_prefix() {
        let cache = MemoryCache::new();
        let repo = CacheRepository::new(Arc::new(cache.clone()));
        let driver = CacheDriver::new(&repo).with_key_prefix("agents/");
        driver.write(&SessionIdentity::new("bot"), &json!([])).unwrap();
        assert!(cache.get("agents/bot").unwrap().is_some());
    }
}
