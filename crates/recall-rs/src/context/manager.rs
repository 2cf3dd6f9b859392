//! Cross-session queries over an agent's identity ledger.
//!
//! A [`ContextManager`] starts from every identity the agent ever registered
//! and narrows the set with filters. Nothing is read until a terminal
//! operation runs:
//!
//! ```ignore
//! let erased = ContextManager::for_agent("support-bot", manager, rebuild_agent)
//!     .for_user("u-17")
//!     .of_kind::<ChatHistory>()
//!     .remove()?;
//! ```
//!
//! Terminal operations that hand out agents (`each`, `map`, `first`)
//! realize one agent per distinct session, no matter how many storages that
//! session has in the ledger.

use super::HoldsContext;
use crate::error::Result;
use crate::identity::SessionIdentity;
use crate::storage::{IdentityStorage, StorageKind, StorageManager};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// Rebuilds an agent from an unscoped session identity.
pub type AgentFactory<A> = Box<dyn Fn(&SessionIdentity) -> Result<A> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Filter {
    User(String),
    Chat(String),
    Group(String),
    Prefix(String),
}

impl Filter {
    fn matches(&self, identity: &SessionIdentity) -> bool {
        match self {
            Filter::User(user) => identity.user_id.as_deref() == Some(user.as_str()),
            Filter::Chat(chat) => identity.chat_name.as_deref() == Some(chat.as_str()),
            Filter::Group(group) => identity.group.as_deref() == Some(group.as_str()),
            Filter::Prefix(prefix) => identity.scope.as_deref() == Some(prefix.as_str()),
        }
    }
}

/// Filterable façade over one agent's ledger.
pub struct ContextManager<A> {
    ledger: IdentityStorage,
    factory: AgentFactory<A>,
    filters: Vec<Filter>,
}

impl<A: HoldsContext> ContextManager<A> {
    pub fn new(
        ledger: IdentityStorage,
        factory: impl Fn(&SessionIdentity) -> Result<A> + Send + Sync + 'static,
    ) -> Self {
        Self {
            ledger,
            factory: Box::new(factory),
            filters: Vec::new(),
        }
    }

    /// A manager over `agent_name`'s ledger, read through `manager`.
    pub fn for_agent(
        agent_name: impl Into<String>,
        manager: StorageManager,
        factory: impl Fn(&SessionIdentity) -> Result<A> + Send + Sync + 'static,
    ) -> Self {
        Self::new(IdentityStorage::for_agent(agent_name, manager), factory)
    }

    // ── Filters ────────────────────────────────────────────────────

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.filters.push(Filter::User(user_id.into()));
        self
    }

    pub fn for_chat(mut self, chat_name: impl Into<String>) -> Self {
        self.filters.push(Filter::Chat(chat_name.into()));
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.filters.push(Filter::Group(group.into()));
        self
    }

    /// Only storages of kind `K` (registered under the kind's prefix).
    pub fn of_kind<K: StorageKind>(self) -> Self {
        self.with_prefix(K::PREFIX)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filters.push(Filter::Prefix(prefix.into()));
        self
    }

    // ── Terminal operations ────────────────────────────────────────

    /// Ledger records matching every filter, in ledger order.
    pub fn identities(&mut self) -> Vec<SessionIdentity> {
        let filters = &self.filters;
        self.ledger
            .get()
            .iter()
            .filter(|id| filters.iter().all(|f| f.matches(id)))
            .cloned()
            .collect()
    }

    /// Distinct unscoped sessions among the matching identities.
    pub fn sessions(&mut self) -> Vec<SessionIdentity> {
        let mut seen = HashSet::new();
        self.identities()
            .into_iter()
            .map(|id| id.without_scope())
            .filter(|session| seen.insert(session.key()))
            .collect()
    }

    /// Realize each matching session's agent and pass it to `f`. Returns how
    /// many agents were visited.
    pub fn each(&mut self, mut f: impl FnMut(&mut A)) -> Result<usize> {
        let sessions = self.sessions();
        for session in &sessions {
            let mut agent = (self.factory)(session)?;
            f(&mut agent);
        }
        Ok(sessions.len())
    }

    pub fn map<R>(&mut self, mut f: impl FnMut(&mut A) -> R) -> Result<Vec<R>> {
        self.sessions()
            .iter()
            .map(|session| (self.factory)(session).map(|mut agent| f(&mut agent)))
            .collect()
    }

    pub fn first(&mut self) -> Result<Option<A>> {
        match self.sessions().first() {
            Some(session) => (self.factory)(session).map(Some),
            None => Ok(None),
        }
    }

    /// Empty and save every matching storage. Returns how many were cleared.
    pub fn clear(&mut self) -> Result<usize> {
        let mut cleared = 0;
        for (session, scoped) in self.grouped() {
            let mut agent = (self.factory)(&session)?;
            let context = agent.context_mut();
            for identity in scoped {
                let Some(prefix) = identity.scope.as_deref() else {
                    continue;
                };
                match context.storage(prefix) {
                    Some(storage) => {
                        storage.clear();
                        storage.save()?;
                    }
                    None => {
                        let manager = context.default_manager()?;
                        manager.save(&identity, &Value::Array(Vec::new()));
                    }
                }
                cleared += 1;
            }
        }
        debug!("Cleared {cleared} storage(s)");
        Ok(cleared)
    }

    /// Remove every matching storage from its backends and from the ledger.
    /// The ledger is saved once, after all removals. Returns how many
    /// storages were removed.
    ///
    /// A session whose agent cannot be built is skipped and keeps its ledger
    /// entries; everything removed before or after it is still dropped from
    /// the ledger, and the first error is returned at the end.
    pub fn remove(&mut self) -> Result<usize> {
        let mut removed = Vec::new();
        let mut first_error = None;
        for (session, scoped) in self.grouped() {
            let mut agent = match (self.factory)(&session) {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(session = %session.key(), error = %e, "cannot build agent, skipping");
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            let context = agent.context_mut();
            for identity in scoped {
                let Some(prefix) = identity.scope.as_deref() else {
                    continue;
                };
                match context.storage(prefix) {
                    Some(storage) => {
                        storage.remove();
                    }
                    None => match context.default_manager() {
                        Ok(manager) => {
                            manager.remove(&identity);
                        }
                        Err(e) => {
                            first_error.get_or_insert(e);
                            continue;
                        }
                    },
                }
                removed.push(identity.key());
            }
        }
        for key in &removed {
            self.ledger.remove_by_key(key);
        }
        if let Err(e) = self.ledger.save() {
            first_error.get_or_insert(e);
        }
        debug!("Removed {} storage(s)", removed.len());
        first_error.map_or(Ok(removed.len()), Err)
    }

    /// Matching identities grouped by session, sessions in first-seen order.
    fn grouped(&mut self) -> Vec<(SessionIdentity, Vec<SessionIdentity>)> {
        let mut groups: Vec<(SessionIdentity, Vec<SessionIdentity>)> = Vec::new();
        for identity in self.identities() {
            let session = identity.without_scope();
            match groups.iter_mut().find(|(s, _)| s.key() == session.key()) {
                Some((_, members)) => members.push(identity),
                None => groups.push((session, vec![identity])),
            }
        }
        groups
    }
}

impl<A> fmt::Debug for ContextManager<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextManager")
            .field("ledger", &self.ledger.identity().key())
            .field("filters", &self.filters)
            .finish()
    }
}
