//! Typed storages: one item collection per purpose, persisted through a
//! [`StorageManager`].
//!
//! A [`Storage<K>`] wraps a manager with lazy loading and dirty tracking.
//! The kind `K` fixes the item type and the storage prefix at compile time:
//!
//! ```ignore
//! let mut history = ChatHistoryStorage::new(identity, manager);
//! history.add(Message::user("hi"));   // loads persisted items first
//! history.save()?;                    // writes only if something changed
//! ```
//!
//! # Flags
//!
//! | Operation | `loaded` | `dirty` |
//! |-----------|----------|---------|
//! | `get` / `count` / `last` | loads if needed | unchanged |
//! | `add` / `remove_item` | loads if needed | set |
//! | `set` / `clear` | set (no read) | set |
//! | `load` / `read` | set | cleared |
//! | `save` (any driver accepted) | set | cleared |
//! | `remove` | set | cleared |

pub mod chat_history;
pub mod identity;
pub mod manager;
pub mod preferences;

pub use chat_history::{ChatHistory, ChatHistoryStorage};
pub use identity::{Identities, IdentityStorage};
pub use manager::{StorageManager, WriteReport};
pub use preferences::{Preference, PreferenceStorage, Preferences};

use crate::error::{RecallError, Result};
use crate::identity::SessionIdentity;
use crate::item::{ItemCollection, StorageItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use tracing::{debug, warn};

/// Declares one storage purpose: its prefix and the single item type it holds.
pub trait StorageKind: Send + Sync + 'static {
    /// Scope segment of the storage key and the default registration key.
    const PREFIX: &'static str;
    type Item: StorageItem;
}

/// How a storage reacts when every backend fails.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Degrade to empty reads and keep unsaved changes dirty; log a warning.
    #[default]
    Permissive,
    /// Surface backend unavailability from explicit `read()` and `save()`.
    Strict,
}

/// Input accepted by [`Storage::set`].
#[derive(Debug, Clone)]
pub enum StorageInput<T> {
    Items(ItemCollection<T>),
    /// A plain JSON array, validated against the declared item type.
    Raw(Value),
}

impl<T> From<ItemCollection<T>> for StorageInput<T> {
    fn from(items: ItemCollection<T>) -> Self {
        StorageInput::Items(items)
    }
}

impl<T> From<Vec<T>> for StorageInput<T> {
    fn from(items: Vec<T>) -> Self {
        StorageInput::Items(items.into())
    }
}

impl<T> From<Value> for StorageInput<T> {
    fn from(value: Value) -> Self {
        StorageInput::Raw(value)
    }
}

/// A typed, lazily loaded item collection bound to one session identity.
pub struct Storage<K: StorageKind> {
    identity: SessionIdentity,
    registration_key: String,
    manager: StorageManager,
    items: ItemCollection<K::Item>,
    loaded: bool,
    dirty: bool,
    policy: FailurePolicy,
}

impl<K: StorageKind> Storage<K> {
    /// A storage registered under the kind's prefix.
    pub fn new(identity: &SessionIdentity, manager: StorageManager) -> Self {
        Self::named(identity, K::PREFIX, manager)
    }

    /// A storage with an instance-specific registration key, so several
    /// storages of the same kind can live in one context.
    pub fn named(
        identity: &SessionIdentity,
        registration_key: impl Into<String>,
        manager: StorageManager,
    ) -> Self {
        let registration_key = registration_key.into();
        Self {
            identity: identity.with_scope(registration_key.clone()),
            registration_key,
            manager,
            items: ItemCollection::new(),
            loaded: false,
            dirty: false,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_failure_policy(&mut self, policy: FailurePolicy) {
        self.policy = policy;
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    /// The scoped identity this storage persists under.
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn prefix(&self) -> &'static str {
        K::PREFIX
    }

    pub fn registration_key(&self) -> &str {
        &self.registration_key
    }

    pub fn manager(&self) -> &StorageManager {
        &self.manager
    }

    pub(crate) fn manager_mut(&mut self) -> &mut StorageManager {
        &mut self.manager
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    // ── Items ──────────────────────────────────────────────────────

    pub fn get(&mut self) -> &ItemCollection<K::Item> {
        self.ensure_loaded();
        &self.items
    }

    /// Replace the whole collection. Nothing is read from the backends.
    ///
    /// A raw value that is not an array of valid items is rejected and the
    /// storage is left as it was.
    pub fn set(&mut self, input: impl Into<StorageInput<K::Item>>) -> Result<()> {
        let items = match input.into() {
            StorageInput::Items(items) => items,
            StorageInput::Raw(value) => ItemCollection::from_value(value)?,
        };
        self.replace(items);
        Ok(())
    }

    pub(crate) fn replace(&mut self, items: ItemCollection<K::Item>) {
        self.items = items;
        self.loaded = true;
        self.dirty = true;
    }

    /// Append one item after merging with persisted state.
    pub fn add(&mut self, item: K::Item) {
        self.ensure_loaded();
        self.items.push(item);
        self.dirty = true;
    }

    /// Remove every item matching `predicate`. Returns how many were removed.
    pub fn remove_item(&mut self, predicate: impl FnMut(&K::Item) -> bool) -> usize {
        self.ensure_loaded();
        let removed = self.items.remove_where(predicate);
        self.dirty = true;
        removed
    }

    pub fn last(&mut self) -> Option<&K::Item> {
        self.ensure_loaded();
        self.items.last()
    }

    pub fn count(&mut self) -> usize {
        self.ensure_loaded();
        self.items.len()
    }

    /// Empty the collection locally. Persisted on the next `save()`.
    pub fn clear(&mut self) {
        self.items.clear();
        self.loaded = true;
        self.dirty = true;
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Write to every driver when there are unsaved changes.
    ///
    /// If no driver accepts the write the storage stays dirty. Under
    /// [`FailurePolicy::Strict`] that is an error.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let data = self.items.to_value()?;
        let report = self.manager.save(&self.identity, &data);
        if report.is_total_failure() {
            warn!(
                key = %self.identity.key(),
                drivers = report.attempted(),
                "no storage driver accepted the write, changes kept in memory"
            );
            return match self.policy {
                FailurePolicy::Permissive => Ok(()),
                FailurePolicy::Strict => Err(RecallError::WriteFailed {
                    key: self.identity.key(),
                }),
            };
        }
        debug!("Saved {} item(s) to {}", self.items.len(), self.identity.key());
        self.dirty = false;
        self.loaded = true;
        Ok(())
    }

    /// Reload from the backends, discarding unsaved changes.
    ///
    /// Missing data reads as empty. Backend failures degrade to empty unless
    /// the storage is [`Strict`](FailurePolicy::Strict).
    pub fn read(&mut self) -> Result<()> {
        match self.fetch() {
            Ok(items) => self.replace_loaded(items),
            Err(e) if e.is_not_found() => self.replace_loaded(ItemCollection::new()),
            Err(e) if self.policy == FailurePolicy::Strict => return Err(e),
            Err(e) => self.degrade(e),
        }
        Ok(())
    }

    /// Reload from the backends, always degrading to empty on failure.
    pub fn load(&mut self) {
        match self.fetch() {
            Ok(items) => self.replace_loaded(items),
            Err(e) if e.is_not_found() => self.replace_loaded(ItemCollection::new()),
            Err(e) => self.degrade(e),
        }
    }

    /// Remove from every driver and reset to an empty, clean, loaded state.
    pub fn remove(&mut self) -> WriteReport {
        let report = self.manager.remove(&self.identity);
        self.replace_loaded(ItemCollection::new());
        report
    }

    fn fetch(&self) -> Result<ItemCollection<K::Item>> {
        let value = self.manager.read(&self.identity)?;
        ItemCollection::from_value(value)
    }

    fn replace_loaded(&mut self, items: ItemCollection<K::Item>) {
        self.items = items;
        self.loaded = true;
        self.dirty = false;
    }

    // A degraded load still counts as loaded, otherwise the next lazy read
    // would discard items added in the meantime.
    fn degrade(&mut self, error: RecallError) {
        warn!(
            key = %self.identity.key(),
            error = %error,
            "storage read failed, continuing with an empty collection"
        );
        self.replace_loaded(ItemCollection::new());
    }

    fn ensure_loaded(&mut self) {
        if !self.loaded {
            self.load();
        }
    }
}

impl<K: StorageKind> fmt::Debug for Storage<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("key", &self.identity.key())
            .field("registration_key", &self.registration_key)
            .field("items", &self.items.len())
            .field("loaded", &self.loaded)
            .field("dirty", &self.dirty)
            .finish()
    }
}

// ── Type-erased access ─────────────────────────────────────────────

/// Object-safe view of a [`Storage<K>`] used by contexts to run bulk
/// operations over storages of different kinds.
pub trait DynStorage: Send {
    fn registration_key(&self) -> &str;
    fn prefix(&self) -> &'static str;
    fn identity(&self) -> &SessionIdentity;
    fn is_dirty(&self) -> bool;
    fn is_loaded(&self) -> bool;
    fn count(&mut self) -> usize;
    fn save(&mut self) -> Result<()>;
    fn read(&mut self) -> Result<()>;
    fn clear(&mut self);
    fn remove(&mut self) -> WriteReport;
    /// Current items as a JSON array, loading first if needed.
    fn snapshot(&mut self) -> Result<Value>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<K: StorageKind> DynStorage for Storage<K> {
    fn registration_key(&self) -> &str {
        &self.registration_key
    }

    fn prefix(&self) -> &'static str {
        K::PREFIX
    }

    fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn count(&mut self) -> usize {
        Storage::count(self)
    }

    fn save(&mut self) -> Result<()> {
        Storage::save(self)
    }

    fn read(&mut self) -> Result<()> {
        Storage::read(self)
    }

    fn clear(&mut self) {
        Storage::clear(self)
    }

    fn remove(&mut self) -> WriteReport {
        Storage::remove(self)
    }

    fn snapshot(&mut self) -> Result<Value> {
        self.get().to_value()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::manager::tests::BrokenDriver;
    use super::*;
    use crate::Message;
    use crate::driver::{FileDriver, MemoryDriver, SqliteDriver, StorageDriver};
    use serde_json::json;
    use std::sync::Arc;

    fn identity() -> SessionIdentity {
        SessionIdentity::new("bot").with_chat("c1")
    }

    fn memory_manager() -> (MemoryDriver, StorageManager) {
        let driver = MemoryDriver::new();
        let manager = StorageManager::single(driver.clone());
        (driver, manager)
    }

    #[test]
    fn identity_is_scoped_by_prefix() {
        let (_, manager) = memory_manager();
        let storage = ChatHistoryStorage::new(&identity(), manager);
        assert_eq!(storage.identity().key(), "bot_c1:chat%5Fhistory");
        assert_eq!(storage.prefix(), "chat_history");
        assert_eq!(storage.registration_key(), "chat_history");
    }

    #[test]
    fn named_storage_uses_its_own_scope() {
        let (_, manager) = memory_manager();
        let storage = ChatHistoryStorage::named(&identity(), "scratch", manager);
        assert_eq!(storage.identity().scope.as_deref(), Some("scratch"));
        assert_eq!(storage.prefix(), "chat_history");
    }

    #[test]
    fn fresh_storage_is_clean_and_unloaded() {
        let (_, manager) = memory_manager();
        let storage = ChatHistoryStorage::new(&identity(), manager);
        assert!(!storage.is_loaded());
        assert!(!storage.is_dirty());
    }

    #[test]
    fn save_is_a_noop_when_clean() {
        let (driver, manager) = memory_manager();
        let mut storage = ChatHistoryStorage::new(&identity(), manager);
        storage.save().unwrap();
        assert!(driver.store().is_empty());
    }

    #[test]
    fn mutations_mark_dirty_and_save_clears_it() {
        let (driver, manager) = memory_manager();
        let mut storage = ChatHistoryStorage::new(&identity(), manager);

        storage.add(Message::user("hi"));
        assert!(storage.is_dirty());
        storage.save().unwrap();
        assert!(!storage.is_dirty());
        assert!(storage.is_loaded());
        assert_eq!(driver.store().len(), 1);

        storage.remove_item(|m| m.text() == "nothing");
        assert!(storage.is_dirty());
        storage.save().unwrap();

        storage.clear();
        assert!(storage.is_dirty());
    }

    #[test]
    fn count_triggers_lazy_load() {
        let (driver, manager) = memory_manager();
        let scoped = identity().with_scope("chat_history");
        driver
            .write(&scoped, &json!([{"role": "user", "content": "earlier"}]))
            .unwrap();

        let mut storage = ChatHistoryStorage::new(&identity(), manager);
        assert!(!storage.is_loaded());
        assert_eq!(storage.count(), 1);
        assert!(storage.is_loaded());
        assert!(!storage.is_dirty());
    }

    #[test]
    fn add_merges_with_persisted_items() {
        let (driver, manager) = memory_manager();
        let scoped = identity().with_scope("chat_history");
        driver
            .write(&scoped, &json!([{"role": "user", "content": "one"}]))
            .unwrap();

        let mut storage = ChatHistoryStorage::new(&identity(), manager);
        storage.add(Message::assistant_text("two"));
        let texts: Vec<&str> = storage.get().iter().map(Message::text).collect();
        assert_eq!(texts, ["one", "two"]);
    }

    #[test]
    fn set_replaces_without_reading() {
        let (driver, manager) = memory_manager();
        let scoped = identity().with_scope("chat_history");
        driver
            .write(&scoped, &json!([{"role": "user", "content": "old"}]))
            .unwrap();

        let mut storage = ChatHistoryStorage::new(&identity(), manager);
        storage.set(vec![Message::user("new")]).unwrap();
        assert!(storage.is_loaded());
        assert!(storage.is_dirty());
        assert_eq!(storage.count(), 1);
        assert_eq!(storage.last().map(Message::text), Some("new"));
    }

    #[test]
    fn set_rejects_raw_non_array_and_keeps_state() {
        let (_, manager) = memory_manager();
        let mut storage = ChatHistoryStorage::new(&identity(), manager);
        storage.set(vec![Message::user("keep")]).unwrap();

        let err = storage.set(json!({"role": "user"})).unwrap_err();
        assert!(matches!(err, RecallError::InvalidArgument(_)));
        assert_eq!(storage.count(), 1);
    }

    #[test]
    fn set_accepts_raw_array() {
        let (_, manager) = memory_manager();
        let mut storage = ChatHistoryStorage::new(&identity(), manager);
        storage
            .set(json!([{"role": "system", "content": "rules"}]))
            .unwrap();
        assert!(storage.get().as_slice()[0].is_preserved());
    }

    #[test]
    fn roundtrip_through_every_persistent_driver() {
        let dir = tempfile::tempdir().unwrap();
        let drivers: Vec<Arc<dyn StorageDriver>> = vec![
            Arc::new(MemoryDriver::new()),
            Arc::new(FileDriver::new(dir.path())),
            Arc::new(SqliteDriver::open_in_memory().unwrap()),
        ];
        let messages = vec![
            Message::system("rules"),
            Message::user("question"),
            Message::assistant_text("answer"),
        ];

        for driver in drivers {
            let name = driver.name().to_string();
            let manager = StorageManager::new(vec![driver]).unwrap();
            let mut writer = ChatHistoryStorage::new(&identity(), manager.clone());
            writer.set(messages.clone()).unwrap();
            writer.save().unwrap();

            let mut reader = ChatHistoryStorage::new(&identity(), manager);
            assert_eq!(reader.get().as_slice(), messages.as_slice(), "{name}");
        }
    }

    #[test]
    fn permissive_load_degrades_to_empty() {
        let manager = StorageManager::single(BrokenDriver::new());
        let mut storage = ChatHistoryStorage::new(&identity(), manager);
        assert_eq!(storage.count(), 0);
        assert!(storage.is_loaded());
        storage.read().unwrap();
    }

    #[test]
    fn null_primary_loads_the_secondary_copy() {
        let scoped = identity().with_scope("chat_history");
        let primary = MemoryDriver::new();
        let secondary = MemoryDriver::new();
        primary.write(&scoped, &json!(null)).unwrap();
        secondary
            .write(&scoped, &json!([{"role": "user", "content": "kept"}]))
            .unwrap();
        let manager = StorageManager::new(vec![Arc::new(primary), Arc::new(secondary)]).unwrap();

        let mut storage = ChatHistoryStorage::new(&identity(), manager);
        assert_eq!(storage.count(), 1);
        assert_eq!(storage.last().map(Message::text), Some("kept"));
    }

    #[test]
    fn strict_read_surfaces_unavailable() {
        let manager = StorageManager::single(BrokenDriver::new());
        let mut storage = ChatHistoryStorage::new(&identity(), manager)
            .with_failure_policy(FailurePolicy::Strict);
        let err = storage.read().unwrap_err();
        assert!(matches!(err, RecallError::Unavailable { .. }));
    }

    #[test]
    fn strict_read_of_missing_data_is_empty() {
        let (_, manager) = memory_manager();
        let mut storage = ChatHistoryStorage::new(&identity(), manager)
            .with_failure_policy(FailurePolicy::Strict);
        storage.read().unwrap();
        assert_eq!(storage.count(), 0);
    }

    #[test]
    fn total_write_failure_keeps_changes_dirty() {
        let manager = StorageManager::single(BrokenDriver::new());
        let mut storage = ChatHistoryStorage::new(&identity(), manager);
        storage.set(vec![Message::user("unsent")]).unwrap();

        storage.save().unwrap();
        assert!(storage.is_dirty());

        let mut strict = storage.with_failure_policy(FailurePolicy::Strict);
        assert!(matches!(
            strict.save().unwrap_err(),
            RecallError::WriteFailed { .. }
        ));
        assert!(strict.is_dirty());
    }

    #[test]
    fn remove_resets_local_state() {
        let (driver, manager) = memory_manager();
        let mut storage = ChatHistoryStorage::new(&identity(), manager);
        storage.add(Message::user("hi"));
        storage.save().unwrap();

        storage.remove();
        assert!(driver.store().is_empty());
        assert!(storage.is_loaded());
        assert!(!storage.is_dirty());
        assert_eq!(storage.count(), 0);
    }

    #[test]
    fn dyn_storage_downcasts_to_the_concrete_kind() {
        let (_, manager) = memory_manager();
        let mut boxed: Box<dyn DynStorage> =
            Box::new(ChatHistoryStorage::new(&identity(), manager));
        boxed
            .as_any_mut()
            .downcast_mut::<ChatHistoryStorage>()
            .unwrap()
            .add(Message::user("via downcast"));
        assert!(boxed.is_dirty());
        assert_eq!(boxed.snapshot().unwrap()[0]["content"], "via downcast");
        assert!(boxed.as_any().downcast_ref::<PreferenceStorage>().is_none());
    }
}
