//! Session contexts: every storage of one session behind one handle.
//!
//! A [`Context`] owns the storages registered for a session identity, keyed
//! by registration key in registration order, plus the agent's identity
//! ledger. Registering a storage records its scoped identity in the ledger,
//! which is what lets a [`ContextManager`](manager::ContextManager) find the
//! session again later.
//!
//! ```ignore
//! let mut context = Context::new(identity, registry, vec!["sqlite".into()])?
//!     .with_event_handler(LoggingHandler);
//! context.make::<ChatHistory>()?.add(Message::user("hello"));
//! context.make::<Preferences>()?.put("tone", "formal");
//! context.save()?; // both storages, then the ledger
//! ```

pub mod events;
pub mod manager;

pub use events::{
    CompositeEventHandler, ContextEvent, EventHandler, EventObserver, LoggingHandler, NoopHandler,
};

use crate::config::RecallConfig;
use crate::driver::{DriverRef, DriverRegistry};
use crate::error::{RecallError, Result};
use crate::identity::SessionIdentity;
use crate::storage::{
    DynStorage, FailurePolicy, Identities, IdentityStorage, Storage, StorageKind, StorageManager,
};
use std::fmt;
use std::sync::Arc;

/// Either a literal prefix or the prefix declared by a storage kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixRef {
    Literal(String),
    Kind(&'static str),
}

impl PrefixRef {
    pub fn of<K: StorageKind>() -> Self {
        PrefixRef::Kind(K::PREFIX)
    }
}

impl From<&str> for PrefixRef {
    fn from(prefix: &str) -> Self {
        PrefixRef::Literal(prefix.to_string())
    }
}

impl From<String> for PrefixRef {
    fn from(prefix: String) -> Self {
        PrefixRef::Literal(prefix)
    }
}

/// Anything that owns a [`Context`]: usually an agent.
pub trait HoldsContext {
    fn context(&self) -> &Context;
    fn context_mut(&mut self) -> &mut Context;
}

/// The storages of one session.
pub struct Context {
    identity: SessionIdentity,
    registry: Arc<DriverRegistry>,
    default_drivers: Vec<DriverRef>,
    storages: Vec<Box<dyn DynStorage>>,
    identities: IdentityStorage,
    handler: Arc<dyn EventHandler>,
    policy: FailurePolicy,
    read_repair: bool,
}

impl Context {
    /// A context for `identity` whose storages default to `default_drivers`
    /// (first one primary). The agent's ledger uses the same drivers.
    pub fn new(
        identity: SessionIdentity,
        registry: Arc<DriverRegistry>,
        default_drivers: Vec<DriverRef>,
    ) -> Result<Self> {
        let identity = identity.without_scope();
        let ledger_manager = StorageManager::resolve(&default_drivers, &registry)?;
        let identities = IdentityStorage::for_agent(identity.agent_name.clone(), ledger_manager);
        Ok(Self {
            identity,
            registry,
            default_drivers,
            storages: Vec::new(),
            identities,
            handler: Arc::new(NoopHandler),
            policy: FailurePolicy::default(),
            read_repair: false,
        })
    }

    /// A context using the default drivers, failure policy and read-repair
    /// setting from `config`.
    pub fn from_config(
        identity: SessionIdentity,
        config: &RecallConfig,
        registry: Arc<DriverRegistry>,
    ) -> Result<Self> {
        Ok(Self::new(identity, registry, config.default_refs())?
            .with_failure_policy(config.failure_policy)
            .with_read_repair(config.read_repair))
    }

    pub fn with_event_handler(self, handler: impl EventHandler + 'static) -> Self {
        self.with_shared_event_handler(Arc::new(handler))
    }

    /// Share one handler across several contexts.
    pub fn with_shared_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Applies to the ledger and to storages made after this call.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self.identities.set_failure_policy(policy);
        self
    }

    /// Applies to the ledger and to storages made after this call.
    pub fn with_read_repair(mut self, enabled: bool) -> Self {
        self.read_repair = enabled;
        self.identities.manager_mut().set_read_repair(enabled);
        self
    }

    // ── Accessors ──────────────────────────────────────────────────

    /// The unscoped session identity.
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// The agent's identity ledger.
    pub fn identities(&mut self) -> &mut IdentityStorage {
        &mut self.identities
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    /// A manager over the default drivers, for storages built by hand.
    pub fn default_manager(&self) -> Result<StorageManager> {
        Ok(StorageManager::resolve(&self.default_drivers, &self.registry)?
            .with_read_repair(self.read_repair))
    }

    pub fn has(&self, registration_key: &str) -> bool {
        self.position(registration_key).is_some()
    }

    /// Registration keys in registration order.
    pub fn keys(&self) -> Vec<&str> {
        self.storages.iter().map(|s| s.registration_key()).collect()
    }

    pub fn len(&self) -> usize {
        self.storages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }

    /// The storage registered under the kind's prefix.
    pub fn get<K: StorageKind>(&mut self) -> Option<&mut Storage<K>> {
        self.get_named::<K>(K::PREFIX)
    }

    /// The storage registered under `registration_key`, if it is of kind `K`.
    pub fn get_named<K: StorageKind>(&mut self, registration_key: &str) -> Option<&mut Storage<K>> {
        let index = self.position(registration_key)?;
        self.storages[index].as_any_mut().downcast_mut::<Storage<K>>()
    }

    /// Type-erased access to any registered storage.
    pub fn storage(&mut self, registration_key: &str) -> Option<&mut dyn DynStorage> {
        let index = self.position(registration_key)?;
        let storage: &mut dyn DynStorage = self.storages[index].as_mut();
        Some(storage)
    }

    /// Normalize a literal prefix or a kind reference to the prefix string.
    pub fn resolve_prefix(prefix: impl Into<PrefixRef>) -> Result<String> {
        match prefix.into() {
            PrefixRef::Kind(prefix) => Ok(prefix.to_string()),
            PrefixRef::Literal(prefix) if prefix.trim().is_empty() => {
                Err(RecallError::invalid("storage prefix must not be empty"))
            }
            PrefixRef::Literal(prefix) => Ok(prefix),
        }
    }

    // ── Registration ───────────────────────────────────────────────

    /// Register `storage` under its registration key, replacing any storage
    /// already registered there, and record its identity in the ledger.
    pub fn register<K: StorageKind>(&mut self, storage: Storage<K>) -> Result<()> {
        self.register_boxed(Box::new(storage))
    }

    /// Fails for a storage of another agent, and for the registration key
    /// reserved for the agent's identity ledger.
    pub fn register_boxed(&mut self, storage: Box<dyn DynStorage>) -> Result<()> {
        Self::check_registration_key(storage.registration_key())?;
        if storage.identity().agent_name != self.identity.agent_name {
            return Err(RecallError::invalid(format!(
                "storage for agent '{}' cannot join a context of agent '{}'",
                storage.identity().agent_name,
                self.identity.agent_name
            )));
        }
        let identity = storage.identity().clone();
        let key = storage.registration_key().to_string();
        match self.position(&key) {
            Some(index) => self.storages[index] = storage,
            None => self.storages.push(storage),
        }
        self.identities.add_identity(identity.clone());
        self.emit(ContextEvent::StorageRegistered {
            registration_key: &key,
            identity: &identity,
        });
        Ok(())
    }

    /// Build a storage of kind `K` on the default drivers and register it.
    pub fn make<K: StorageKind>(&mut self) -> Result<&mut Storage<K>> {
        let drivers = self.default_drivers.clone();
        self.build::<K>(K::PREFIX, &drivers)
    }

    /// Build a storage of kind `K` on the given drivers and register it.
    pub fn make_with<K: StorageKind>(&mut self, drivers: &[DriverRef]) -> Result<&mut Storage<K>> {
        self.build::<K>(K::PREFIX, drivers)
    }

    /// Build a storage of kind `K` under its own registration key.
    pub fn make_named<K: StorageKind>(&mut self, registration_key: &str) -> Result<&mut Storage<K>> {
        let registration_key = Self::resolve_prefix(registration_key)?;
        let drivers = self.default_drivers.clone();
        self.build::<K>(&registration_key, &drivers)
    }

    // An agent-wide storage under the ledger's key would share its scoped
    // key, and the ledger refresh on save would overwrite it.
    fn check_registration_key(registration_key: &str) -> Result<()> {
        if registration_key == Identities::PREFIX {
            return Err(RecallError::invalid(format!(
                "registration key '{registration_key}' is reserved for the identity ledger"
            )));
        }
        Ok(())
    }

    fn build<K: StorageKind>(
        &mut self,
        registration_key: &str,
        drivers: &[DriverRef],
    ) -> Result<&mut Storage<K>> {
        Self::check_registration_key(registration_key)?;
        let manager = StorageManager::resolve(drivers, &self.registry)?
            .with_read_repair(self.read_repair);
        let storage = Storage::<K>::named(&self.identity, registration_key, manager)
            .with_failure_policy(self.policy);
        self.emit(ContextEvent::StorageCreated {
            registration_key,
            identity: storage.identity(),
        });
        self.register(storage)?;
        self.get_named::<K>(registration_key).ok_or_else(|| {
            RecallError::invalid(format!("storage '{registration_key}' was not registered"))
        })
    }

    // ── Bulk operations ────────────────────────────────────────────

    /// Save every storage in registration order, then the ledger.
    ///
    /// Every storage is attempted; the first error is returned afterwards.
    pub fn save(&mut self) -> Result<()> {
        let count = self.storages.len();
        self.emit(ContextEvent::Saving {
            identity: &self.identity,
            storages: count,
        });
        let mut first_error = None;
        for storage in &mut self.storages {
            if let Err(e) = storage.save() {
                first_error.get_or_insert(e);
            }
        }
        if self.identities.is_dirty() {
            self.refresh_ledger();
        }
        if let Err(e) = self.identities.save() {
            first_error.get_or_insert(e);
        }
        self.emit(ContextEvent::Saved {
            identity: &self.identity,
            storages: count,
        });
        first_error.map_or(Ok(()), Err)
    }

    /// Reload every storage from its backends. The ledger is left alone.
    pub fn read(&mut self) -> Result<()> {
        let count = self.storages.len();
        self.emit(ContextEvent::Reading {
            identity: &self.identity,
            storages: count,
        });
        let mut first_error = None;
        for storage in &mut self.storages {
            if let Err(e) = storage.read() {
                first_error.get_or_insert(e);
            }
        }
        self.emit(ContextEvent::Read {
            identity: &self.identity,
            storages: count,
        });
        first_error.map_or(Ok(()), Err)
    }

    /// Empty every storage locally. The ledger is left alone.
    pub fn clear(&mut self) {
        let count = self.storages.len();
        self.emit(ContextEvent::Clearing {
            identity: &self.identity,
            storages: count,
        });
        for storage in &mut self.storages {
            storage.clear();
        }
        self.emit(ContextEvent::Cleared {
            identity: &self.identity,
            storages: count,
        });
    }

    /// Remove every storage from its backends and drop this session's
    /// identities from the ledger.
    ///
    /// The ledger itself is not emptied: it is shared by every session of the
    /// agent, so only the entries of storages registered here are stripped
    /// before it is saved. Use [`ContextManager::remove`] to erase all of an
    /// agent's sessions.
    ///
    /// [`ContextManager::remove`]: manager::ContextManager::remove
    pub fn remove(&mut self) -> Result<()> {
        let count = self.storages.len();
        self.emit(ContextEvent::Removing {
            identity: &self.identity,
            storages: count,
        });
        for storage in &mut self.storages {
            storage.remove();
        }
        self.identities.load();
        for storage in &self.storages {
            self.identities.remove_by_key(&storage.identity().key());
        }
        let saved = self.identities.save();
        self.emit(ContextEvent::Removed {
            identity: &self.identity,
            storages: count,
        });
        saved
    }

    /// Remove one storage from its backends, the ledger, and this context.
    /// Returns whether it was registered.
    pub fn remove_storage(&mut self, registration_key: &str) -> Result<bool> {
        let Some(index) = self.position(registration_key) else {
            return Ok(false);
        };
        let mut storage = self.storages.remove(index);
        storage.remove();
        self.identities.load();
        self.identities.remove_by_key(&storage.identity().key());
        self.identities.save()?;
        Ok(true)
    }

    /// Empty one storage locally. Returns whether it was registered.
    pub fn clear_storage(&mut self, registration_key: &str) -> bool {
        match self.storage(registration_key) {
            Some(storage) => {
                storage.clear();
                true
            }
            None => false,
        }
    }

    // Another context of the same agent may have saved the ledger since this
    // one loaded it. Re-read before writing so its entries survive.
    fn refresh_ledger(&mut self) {
        self.identities.load();
        for storage in &self.storages {
            self.identities.add_identity(storage.identity().clone());
        }
    }

    fn position(&self, registration_key: &str) -> Option<usize> {
        self.storages
            .iter()
            .position(|s| s.registration_key() == registration_key)
    }

    fn emit(&self, event: ContextEvent<'_>) {
        self.handler.on_event(&event);
    }
}

impl HoldsContext for Context {
    fn context(&self) -> &Context {
        self
    }

    fn context_mut(&mut self) -> &mut Context {
        self
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("identity", &self.identity.key())
            .field("storages", &self.keys())
            .field("default_drivers", &self.default_drivers)
            .field("policy", &self.policy)
            .finish()
    }
}
