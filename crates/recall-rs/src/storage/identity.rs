//! The per-agent identity ledger.
//!
//! Every identity registered through a context of an agent is recorded here,
//! unique by [`SessionIdentity::key`]. The ledger itself lives under the
//! agent-only identity with the `identities` scope, so it is shared by every
//! chat and user of that agent.

use super::{Storage, StorageKind, StorageManager};
use crate::identity::SessionIdentity;

pub struct Identities;

impl StorageKind for Identities {
    const PREFIX: &'static str = "identities";
    type Item = SessionIdentity;
}

pub type IdentityStorage = Storage<Identities>;

impl Storage<Identities> {
    /// The ledger for `agent_name`.
    pub fn for_agent(agent_name: impl Into<String>, manager: StorageManager) -> Self {
        Self::new(&SessionIdentity::new(agent_name), manager)
    }

    pub fn has_key(&mut self, key: &str) -> bool {
        self.get().iter().any(|id| id.key() == key)
    }

    pub fn get_by_key(&mut self, key: &str) -> Option<SessionIdentity> {
        self.get().iter().find(|id| id.key() == key).cloned()
    }

    /// Record `identity` unless its key is already present. Returns whether
    /// it was added.
    pub fn add_identity(&mut self, identity: SessionIdentity) -> bool {
        if self.has_key(&identity.key()) {
            return false;
        }
        self.add(identity);
        true
    }

    /// Returns whether an entry was removed.
    pub fn remove_by_key(&mut self, key: &str) -> bool {
        if !self.has_key(key) {
            return false;
        }
        self.remove_item(|id| id.key() == key) > 0
    }

    /// Keys of every recorded identity, in insertion order.
    pub fn keys(&mut self) -> Vec<String> {
        self.get().iter().map(SessionIdentity::key).collect()
    }
}
