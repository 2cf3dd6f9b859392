//! Configuration: which drivers exist, which ones storages use by default,
//! and how history is truncated.
//!
//! Loaded from JSON:
//!
//! ```json
//! {
//!   "drivers": {
//!     "db":    { "type": "sqlite_messages", "path": "recall.db" },
//!     "cache": { "type": "cache", "ttl_secs": 3600 }
//!   },
//!   "default_drivers": ["db", "cache"],
//!   "failure_policy": "permissive",
//!   "truncation": { "strategy": "token_based", "target_percentage": 0.8 }
//! }
//! ```
//!
//! Or built in code:
//!
//! ```ignore
//! let config = RecallConfig::default()
//!     .with_driver("files", DriverConfig::File { path: "state".into() })
//!     .with_default_drivers(["files", "memory"]);
//! let registry = config.build_registry()?;
//! ```

use crate::driver::{
    CacheDriver, CacheRepository, DriverRef, DriverRegistry, FileDriver, MemoryDriver,
    MemorySession, SessionDriver, SessionStore, SqliteDriver, SqliteMessageDriver, StorageDriver,
};
use crate::error::{RecallError, Result};
use crate::storage::{FailurePolicy, StorageManager};
use crate::truncation::TruncationConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// SQLite paths with this value open an in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// One configured backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverConfig {
    Memory,
    Session,
    Cache {
        /// Named store in the cache repository; the default store when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        store: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_secs: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_prefix: Option<String>,
    },
    File {
        path: PathBuf,
    },
    Sqlite {
        path: PathBuf,
    },
    SqliteMessages {
        path: PathBuf,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RecallConfig {
    pub drivers: BTreeMap<String, DriverConfig>,
    /// Driver names used by storages that don't pick their own; the first
    /// one is the primary.
    pub default_drivers: Vec<String>,
    pub failure_policy: FailurePolicy,
    pub read_repair: bool,
    pub truncation: TruncationConfig,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            drivers: BTreeMap::from([("memory".to_string(), DriverConfig::Memory)]),
            default_drivers: vec!["memory".to_string()],
            failure_policy: FailurePolicy::default(),
            read_repair: false,
            truncation: TruncationConfig::default(),
        }
    }
}

impl RecallConfig {
    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn with_driver(mut self, name: impl Into<String>, driver: DriverConfig) -> Self {
        self.drivers.insert(name.into(), driver);
        self
    }

    pub fn with_default_drivers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_drivers = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_read_repair(mut self, enabled: bool) -> Self {
        self.read_repair = enabled;
        self
    }

    pub fn with_truncation(mut self, truncation: TruncationConfig) -> Self {
        self.truncation = truncation;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_drivers.is_empty() {
            return Err(RecallError::invalid("default_drivers must name at least one driver"));
        }
        for name in &self.default_drivers {
            if !self.drivers.contains_key(name) {
                return Err(RecallError::invalid(format!(
                    "default driver '{name}' is not configured"
                )));
            }
        }
        self.truncation.validate()
    }

    /// Instantiate every configured driver with fresh in-process cache and
    /// session stores.
    pub fn build_registry(&self) -> Result<DriverRegistry> {
        self.build_registry_with(&CacheRepository::default(), Arc::new(MemorySession::new()))
    }

    /// Instantiate every configured driver against the given cache
    /// repository and session store.
    pub fn build_registry_with(
        &self,
        caches: &CacheRepository,
        session: Arc<dyn SessionStore>,
    ) -> Result<DriverRegistry> {
        self.validate()?;
        let mut registry = DriverRegistry::new();
        for (name, driver) in &self.drivers {
            let built: Arc<dyn StorageDriver> = match driver {
                DriverConfig::Memory => Arc::new(MemoryDriver::new()),
                DriverConfig::Session => Arc::new(SessionDriver::new(session.clone())),
                DriverConfig::Cache {
                    store,
                    ttl_secs,
                    key_prefix,
                } => {
                    let mut cache = match store {
                        Some(store) => CacheDriver::with_named_store(caches, store)?,
                        None => CacheDriver::new(caches),
                    };
                    if let Some(secs) = ttl_secs {
                        cache = cache.with_ttl(Duration::from_secs(*secs));
                    }
                    if let Some(prefix) = key_prefix {
                        cache = cache.with_key_prefix(prefix);
                    }
                    Arc::new(cache)
                }
                DriverConfig::File { path } => Arc::new(FileDriver::new(path)),
                DriverConfig::Sqlite { path } if path.as_os_str() == IN_MEMORY_PATH => {
                    Arc::new(SqliteDriver::open_in_memory()?)
                }
                DriverConfig::Sqlite { path } => Arc::new(SqliteDriver::open(path)?),
                DriverConfig::SqliteMessages { path } if path.as_os_str() == IN_MEMORY_PATH => {
                    Arc::new(SqliteMessageDriver::open_in_memory()?)
                }
                DriverConfig::SqliteMessages { path } => Arc::new(SqliteMessageDriver::open(path)?),
            };
            debug!("Configured driver '{name}' ({})", built.name());
            registry.insert(name.clone(), built);
        }
        Ok(registry)
    }

    /// References to the default drivers, in order.
    pub fn default_refs(&self) -> Vec<DriverRef> {
        self.default_drivers
            .iter()
            .map(|name| DriverRef::from(name.as_str()))
            .collect()
    }

    /// A manager over the default drivers of `registry`.
    pub fn default_manager(&self, registry: &DriverRegistry) -> Result<StorageManager> {
        Ok(StorageManager::resolve(&self.default_refs(), registry)?.with_read_repair(self.read_repair))
    }
}
