//! In-memory store, used for tests and ephemeral runs.

use super::{KeyValueStore, Record};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Mutex;

/// Non-durable [`KeyValueStore`] backed by a map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<Record>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `items`.
    pub fn with_items(items: Record) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    /// Copy of everything currently stored.
    pub fn snapshot(&self) -> Record {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Record> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        Ok(keys
            .iter()
            .filter_map(|key| items.get(*key).map(|v| ((*key).to_owned(), v.clone())))
            .collect())
    }

    async fn set(&self, new_items: Record) -> Result<()> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.extend(new_items);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            items.remove(*key);
        }
        Ok(())
    }
}
