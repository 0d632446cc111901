//! Notification rendering and URL opening collaborators.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Mutex;
use tracing::info;

/// Renders cards as user-visible notifications.
///
/// `spec` is the card's opaque `notification` payload as sent by the server.
#[async_trait]
pub trait NotificationDisplay: Send + Sync {
    /// Show a notification, replacing any existing one with the same id.
    /// Returns the id of the shown notification.
    async fn create(&self, notification_id: &str, spec: &Value) -> Result<String>;

    /// Update a shown notification in place. Returns `false` if it was not shown.
    async fn update(&self, notification_id: &str, spec: &Value) -> Result<bool>;

    /// Remove a notification. Returns `false` if it was not shown.
    async fn clear(&self, notification_id: &str) -> Result<bool>;
}

/// Opens URLs attached to clicked notifications.
#[async_trait]
pub trait UrlOpener: Send + Sync {
    async fn open_url(&self, url: &str) -> Result<()>;
}

/// Display that writes notifications to the log and tracks which are shown.
#[derive(Debug, Default)]
pub struct LoggingDisplay {
    shown: Mutex<BTreeSet<String>>,
}

impl LoggingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of the currently shown notifications.
    pub fn shown(&self) -> Vec<String> {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationDisplay for LoggingDisplay {
    async fn create(&self, notification_id: &str, spec: &Value) -> Result<String> {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(notification_id.to_owned());
        info!(notification_id, %spec, "notification shown");
        Ok(notification_id.to_owned())
    }

    async fn update(&self, notification_id: &str, spec: &Value) -> Result<bool> {
        let was_shown = self
            .shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(notification_id);
        if was_shown {
            info!(notification_id, %spec, "notification updated");
        }
        Ok(was_shown)
    }

    async fn clear(&self, notification_id: &str) -> Result<bool> {
        let was_shown = self
            .shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(notification_id);
        if was_shown {
            info!(notification_id, "notification cleared");
        }
        Ok(was_shown)
    }
}

/// Opener that only logs the URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingUrlOpener;

#[async_trait]
impl UrlOpener for LoggingUrlOpener {
    async fn open_url(&self, url: &str) -> Result<()> {
        info!(url, "opening url");
        Ok(())
    }
}
