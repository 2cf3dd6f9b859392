//! Lifecycle notifications emitted by a [`Context`](super::Context).
//!
//! Handlers observe; they never influence what the context does. Every bulk
//! operation is bracketed by a pair of events (`Saving`/`Saved`, ...), and
//! storage creation and registration each emit one event.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | The default; tests and scripts |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`EventObserver`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Metrics, audit trails, cache invalidation |

use crate::identity::SessionIdentity;
use tracing::{debug, info};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by a context during its lifecycle.
#[derive(Debug)]
pub enum ContextEvent<'a> {
    /// A storage was built by `make*` and is about to be registered.
    StorageCreated {
        registration_key: &'a str,
        identity: &'a SessionIdentity,
    },
    /// A storage was registered and its identity recorded in the ledger.
    StorageRegistered {
        registration_key: &'a str,
        identity: &'a SessionIdentity,
    },
    Saving { identity: &'a SessionIdentity, storages: usize },
    Saved { identity: &'a SessionIdentity, storages: usize },
    Reading { identity: &'a SessionIdentity, storages: usize },
    Read { identity: &'a SessionIdentity, storages: usize },
    Clearing { identity: &'a SessionIdentity, storages: usize },
    Cleared { identity: &'a SessionIdentity, storages: usize },
    Removing { identity: &'a SessionIdentity, storages: usize },
    Removed { identity: &'a SessionIdentity, storages: usize },
}

impl ContextEvent<'_> {
    /// Short machine-friendly name, e.g. `"saving"`.
    pub fn name(&self) -> &'static str {
        match self {
            ContextEvent::StorageCreated { .. } => "storage_created",
            ContextEvent::StorageRegistered { .. } => "storage_registered",
            ContextEvent::Saving { .. } => "saving",
            ContextEvent::Saved { .. } => "saved",
            ContextEvent::Reading { .. } => "reading",
            ContextEvent::Read { .. } => "read",
            ContextEvent::Clearing { .. } => "clearing",
            ContextEvent::Cleared { .. } => "cleared",
            ContextEvent::Removing { .. } => "removing",
            ContextEvent::Removed { .. } => "removed",
        }
    }
}

/// Handler for context events.
///
/// The default implementation ignores every event.
///
/// # Example
///
/// ```ignore
/// struct AuditHandler;
///
/// impl EventHandler for AuditHandler {
///     fn on_event(&self, event: &ContextEvent<'_>) {
///         if let ContextEvent::Removed { identity, .. } = event {
///             println!("session {identity} erased");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &ContextEvent<'_>) {
        let _ = event;
    }
}

/// A handler that ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// Wraps an observing closure into an [`EventHandler`].
///
/// ```ignore
/// let handler = EventObserver::new(|event| {
///     if let ContextEvent::Saved { storages, .. } = event {
///         println!("saved {storages} storage(s)");
///     }
/// });
/// ```
pub struct EventObserver<F>(F)
where
    F: Fn(&ContextEvent<'_>) + Send + Sync;

impl<F> EventObserver<F>
where
    F: Fn(&ContextEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for EventObserver<F>
where
    F: Fn(&ContextEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ContextEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches each event to several handlers, in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(audit_enabled, AuditHandler);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add `handler` only when `condition` holds.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &ContextEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &ContextEvent<'_>) {
        match event {
            ContextEvent::StorageCreated {
                registration_key,
                identity,
            } => {
                debug!("Created storage '{registration_key}' for {identity}");
            }
            ContextEvent::StorageRegistered {
                registration_key,
                identity,
            } => {
                debug!("Registered storage '{registration_key}' as {identity}");
            }
            ContextEvent::Saving { identity, storages } => {
                debug!("Saving {storages} storage(s) for {identity}");
            }
            ContextEvent::Saved { identity, storages } => {
                info!("Saved {storages} storage(s) for {identity}");
            }
            ContextEvent::Reading { identity, storages } => {
                debug!("Reading {storages} storage(s) for {identity}");
            }
            ContextEvent::Read { identity, storages } => {
                debug!("Read {storages} storage(s) for {identity}");
            }
            ContextEvent::Clearing { identity, storages } => {
                debug!("Clearing {storages} storage(s) for {identity}");
            }
            ContextEvent::Cleared { identity, storages } => {
                info!("Cleared {storages} storage(s) for {identity}");
            }
            ContextEvent::Removing { identity, storages } => {
                debug!("Removing {storages} storage(s) for {identity}");
            }
            ContextEvent::Removed { identity, storages } => {
                info!("Removed {storages} storage(s) for {identity}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn composite_dispatches_to_every_handler_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = seen.clone();
        let second = seen.clone();

        let handler = CompositeEventHandler::new()
            .with(EventObserver::new(move |e| {
                first.lock().unwrap().push(format!("a:{}", e.name()))
            }))
            .with_if(false, NoopHandler)
            .with_opt(None::<NoopHandler>)
            .with(EventObserver::new(move |e| {
                second.lock().unwrap().push(format!("b:{}", e.name()))
            }));
        assert_eq!(handler.len(), 2);

        let id = SessionIdentity::new("bot");
        handler.on_event(&ContextEvent::Saving {
            identity: &id,
            storages: 1,
        });
        assert_eq!(*seen.lock().unwrap(), ["a:saving", "b:saving"]);
    }

    #[test]
    fn logging_handler_accepts_every_event() {
        let id = SessionIdentity::new("bot");
        for event in [
            ContextEvent::StorageCreated {
                registration_key: "chat_history",
                identity: &id,
            },
            ContextEvent::Removed {
                identity: &id,
                storages: 0,
            },
        ] {
            LoggingHandler.on_event(&event);
        }
    }
}
