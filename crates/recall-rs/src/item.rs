//! Typed item collections and their plain-JSON representation.
//!
//! The persisted shape of a collection is a bare JSON array with one object
//! per item. There is no envelope; drivers store the array verbatim.

use crate::error::{RecallError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A record that can live in a [`Storage`](crate::storage::Storage).
///
/// This is the `to_value` / `from_value` contract drivers rely on. Every
/// serde-capable type gets it for free; polymorphic records should be enums
/// with an explicit `#[serde(tag = "...")]` so unknown tags are rejected.
pub trait StorageItem: Sized + Clone + Send + Sync + 'static {
    fn to_value(&self) -> Result<Value>;
    fn from_value(value: Value) -> Result<Self>;
}

impl<T> StorageItem for T
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Ordered sequence of items of one declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemCollection<T> {
    items: Vec<T>,
}

impl<T> Default for ItemCollection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: StorageItem> ItemCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Remove every item matching `predicate`. Returns how many were removed.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !predicate(item));
        before - self.items.len()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    /// Serialize to a JSON array, one element per item.
    pub fn to_value(&self) -> Result<Value> {
        let values = self
            .items
            .iter()
            .map(StorageItem::to_value)
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Array(values))
    }

    /// Rehydrate from a JSON array. Anything other than an array is a
    /// contract violation.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(values) = value else {
            return Err(RecallError::invalid(format!(
                "expected a JSON array of items, got {}",
                json_kind(&value)
            )));
        };
        let items = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                T::from_value(v).map_err(|e| {
                    RecallError::invalid(format!("item {i} does not match the declared type: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { items })
    }
}

impl<T> From<Vec<T>> for ItemCollection<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

impl<T> FromIterator<T> for ItemCollection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<'a, T> IntoIterator for &'a ItemCollection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
