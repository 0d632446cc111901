//! File-backed store persisted as one JSON document.
//!
//! The whole document is cached in memory and rewritten on every mutation
//! through a temp file and rename, so a crash never leaves a torn file.

use super::{KeyValueStore, Record};
use crate::error::{CardsError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Durable [`KeyValueStore`] backed by a JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    items: Mutex<Record>,
}

impl JsonFileStore {
    /// Open the store at `path`.
    ///
    /// A missing file yields an empty store. A file that does not hold a JSON
    /// object is logged and treated as empty; it is replaced on the next write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let items = read_document(&path).await?;
        debug!(path = %path.display(), keys = items.len(), "opened state store");
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, items: &Record) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CardsError::Store(format!("cannot create state directory: {e}"))
            })?;
        }

        let json = serde_json::to_vec_pretty(items)
            .map_err(|e| CardsError::Store(format!("cannot serialize state: {e}")))?;
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| CardsError::Store(format!("cannot write state temp file: {e}")))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| CardsError::Store(format!("cannot finalize state file: {e}")))?;
        Ok(())
    }
}

async fn read_document(path: &Path) -> Result<Record> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Record::new()),
        Err(e) => {
            return Err(CardsError::Store(format!(
                "cannot read state {}: {e}",
                path.display()
            )));
        }
    };

    match serde_json::from_slice::<Record>(&bytes) {
        Ok(items) => Ok(items),
        Err(e) => {
            warn!("ignoring malformed state file at {}: {e}", path.display());
            Ok(Record::new())
        }
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<Record> {
        let items = self.items.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| items.get(*key).map(|v| ((*key).to_owned(), v.clone())))
            .collect())
    }

    async fn set(&self, new_items: Record) -> Result<()> {
        let mut items = self.items.lock().await;
        let mut next = items.clone();
        next.extend(new_items);
        self.persist(&next).await?;
        *items = next;
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut items = self.items.lock().await;
        if !keys.iter().any(|key| items.contains_key(*key)) {
            return Ok(());
        }
        let mut next = items.clone();
        for key in keys {
            next.remove(*key);
        }
        self.persist(&next).await?;
        *items = next;
        Ok(())
    }
}
