//! Primary/secondary replication across storage drivers.
//!
//! Reads fall back through the drivers in order until one has data. Writes
//! fan out to every driver, best effort: a broken secondary never blocks the
//! primary, and a broken primary never blocks the secondaries. There is no
//! rollback and no cross-driver atomicity, so replicas can diverge silently;
//! enable [read repair](StorageManager::with_read_repair) to heal a replica
//! whenever a read has to fall back past it.

use crate::driver::{DriverRef, DriverRegistry, StorageDriver};
use crate::error::{RecallError, Result};
use crate::identity::SessionIdentity;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a fan-out write or remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Drivers that accepted the operation.
    pub succeeded: usize,
    /// `(driver name, reason)` for every driver that failed or declined.
    pub failed: Vec<(String, String)>,
}

impl WriteReport {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    /// No driver accepted the operation.
    pub fn is_total_failure(&self) -> bool {
        self.succeeded == 0
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One primary plus zero or more secondary drivers for one logical storage.
#[derive(Clone)]
pub struct StorageManager {
    drivers: Vec<Arc<dyn StorageDriver>>,
    read_repair: bool,
}

impl StorageManager {
    /// Build from an ordered list; the first driver becomes the primary.
    pub fn new(drivers: Vec<Arc<dyn StorageDriver>>) -> Result<Self> {
        if drivers.is_empty() {
            return Err(RecallError::invalid(
                "a storage manager needs at least one driver",
            ));
        }
        Ok(Self {
            drivers,
            read_repair: false,
        })
    }

    /// Resolve a mixed list of driver names and instances.
    pub fn resolve(refs: &[DriverRef], registry: &DriverRegistry) -> Result<Self> {
        Self::new(registry.resolve(refs)?)
    }

    /// A manager over a single driver.
    pub fn single(driver: impl StorageDriver + 'static) -> Self {
        Self {
            drivers: vec![Arc::new(driver)],
            read_repair: false,
        }
    }

    /// When a read is served by a secondary, write the value back to the
    /// drivers that came before it. Off by default.
    pub fn with_read_repair(mut self, enabled: bool) -> Self {
        self.set_read_repair(enabled);
        self
    }

    pub fn set_read_repair(&mut self, enabled: bool) {
        self.read_repair = enabled;
    }

    pub fn primary(&self) -> &Arc<dyn StorageDriver> {
        &self.drivers[0]
    }

    pub fn secondaries(&self) -> &[Arc<dyn StorageDriver>] {
        &self.drivers[1..]
    }

    pub fn drivers(&self) -> &[Arc<dyn StorageDriver>] {
        &self.drivers
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Read from the first driver that has data.
    ///
    /// A driver that errors or has nothing stored is skipped, and so is one
    /// holding `null` or any other blob that is not an array. An empty array
    /// is a real answer and stops the search. When no driver has data the
    /// error is [`RecallError::NotFound`] if every driver answered cleanly,
    /// or [`RecallError::Unavailable`] if any of them failed.
    pub fn read(&self, identity: &SessionIdentity) -> Result<Value> {
        let mut failures = Vec::new();

        for (index, driver) in self.drivers.iter().enumerate() {
            match driver.read(identity) {
                Ok(None | Some(Value::Null)) => {}
                Ok(Some(value)) if !value.is_array() => {
                    warn!(
                        driver = driver.name(),
                        key = %identity.key(),
                        "stored value is not an array, trying next driver"
                    );
                    failures.push(format!("{}: stored value is not an array", driver.name()));
                }
                Ok(Some(value)) => {
                    if index > 0 {
                        debug!(
                            "Read {} from fallback driver {} (position {index})",
                            identity.key(),
                            driver.name()
                        );
                        if self.read_repair {
                            self.repair(identity, &value, index);
                        }
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        driver = driver.name(),
                        key = %identity.key(),
                        error = %e,
                        "storage driver read failed, trying next driver"
                    );
                    failures.push(format!("{}: {e}", driver.name()));
                }
            }
        }

        if failures.is_empty() {
            Err(RecallError::NotFound {
                key: identity.key(),
            })
        } else {
            Err(RecallError::Unavailable {
                key: identity.key(),
                failures,
            })
        }
    }

    /// Write to the primary, then every secondary. Failures are logged per
    /// driver and reported, never raised.
    pub fn save(&self, identity: &SessionIdentity, data: &Value) -> WriteReport {
        self.fan_out(identity, "write", |driver| driver.write(identity, data))
    }

    /// Remove from every driver, best effort.
    pub fn remove(&self, identity: &SessionIdentity) -> WriteReport {
        // A driver with nothing to remove still did its job.
        self.fan_out(identity, "remove", |driver| {
            driver.remove(identity).map(|_| true)
        })
    }

    fn fan_out(
        &self,
        identity: &SessionIdentity,
        op: &str,
        mut apply: impl FnMut(&dyn StorageDriver) -> Result<bool>,
    ) -> WriteReport {
        let mut report = WriteReport::default();
        for driver in &self.drivers {
            match apply(driver.as_ref()) {
                Ok(true) => report.succeeded += 1,
                Ok(false) => {
                    warn!(
                        driver = driver.name(),
                        key = %identity.key(),
                        op,
                        "storage driver declined the operation"
                    );
                    report
                        .failed
                        .push((driver.name().to_string(), "declined".to_string()));
                }
                Err(e) => {
                    warn!(
                        driver = driver.name(),
                        key = %identity.key(),
                        op,
                        error = %e,
                        "storage driver failed"
                    );
                    report.failed.push((driver.name().to_string(), e.to_string()));
                }
            }
        }
        report
    }

    fn repair(&self, identity: &SessionIdentity, value: &Value, served_by: usize) {
        for driver in &self.drivers[..served_by] {
            match driver.write(identity, value) {
                Ok(true) => debug!("Repaired {} on {}", identity.key(), driver.name()),
                Ok(false) => {}
                Err(e) => warn!(
                    driver = driver.name(),
                    key = %identity.key(),
                    error = %e,
                    "read repair failed"
                ),
            }
        }
    }
}

impl fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.drivers.iter().map(|d| d.name()).collect();
        f.debug_struct("StorageManager")
            .field("drivers", &names)
            .field("read_repair", &self.read_repair)
            .finish()
    }
}
