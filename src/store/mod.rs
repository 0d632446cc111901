//! Persistent key-value store.
//!
//! The store is the single source of truth for every piece of service state.
//! Records are JSON objects; `get` returns only the keys that exist and `set`
//! merges a partial record into the stored one.

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use crate::error::{CardsError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A partial or complete set of named values.
pub type Record = serde_json::Map<String, Value>;

/// Durable async key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the named keys. Missing keys are absent from the result.
    async fn get(&self, keys: &[&str]) -> Result<Record>;

    /// Merge `items` into the stored record.
    async fn set(&self, items: Record) -> Result<()>;

    /// Delete the named keys.
    async fn remove(&self, keys: &[&str]) -> Result<()>;
}

/// Decode `key` from `record`, repairing missing or undecodable values with
/// the type's default.
pub fn decode_or_default<T>(record: &Record, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let Some(value) = record.get(key) else {
        return T::default();
    };
    if value.is_null() {
        return T::default();
    }
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(key, "ignoring undecodable stored value: {e}");
            T::default()
        }
    }
}

/// Encode a value for [`KeyValueStore::set`].
pub fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| CardsError::Store(format!("cannot encode value: {e}")))
}

/// Build a single-key record.
pub fn record_of<T: Serialize>(key: &str, value: &T) -> Result<Record> {
    let mut record = Record::new();
    record.insert(key.to_owned(), encode(value)?);
    Ok(record)
}
