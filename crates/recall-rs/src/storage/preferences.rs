//! Key-value preferences, stored as an ordered list of entries.

use super::{Storage, StorageKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One named preference.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Preference {
    pub key: String,
    pub value: Value,
}

pub struct Preferences;

impl StorageKind for Preferences {
    const PREFIX: &'static str = "preferences";
    type Item = Preference;
}

pub type PreferenceStorage = Storage<Preferences>;

impl Storage<Preferences> {
    pub fn value(&mut self, key: &str) -> Option<Value> {
        self.get()
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.clone())
    }

    /// Insert or replace the entry for `key`. Order of existing keys is kept.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let mut entries = self.get().clone().into_vec();
        match entries.iter_mut().find(|p| p.key == key) {
            Some(existing) => existing.value = value,
            None => entries.push(Preference { key, value }),
        }
        self.replace(entries.into());
    }

    /// Drop the entry for `key`. Returns whether one existed.
    pub fn unset(&mut self, key: &str) -> bool {
        self.remove_item(|p| p.key == key) > 0
    }
}
