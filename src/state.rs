//! Persisted service records and their store keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Store key of the [`ActiveNotifications`] map.
pub const ACTIVE_NOTIFICATIONS_KEY: &str = "activeNotifications";

/// Store key of the pending dismissal queue.
pub const PENDING_DISMISSALS_KEY: &str = "pendingDismissals";

/// Store key of the [`RecentDismissals`] map.
pub const RECENT_DISMISSALS_KEY: &str = "recentDismissals";

/// Locally tracked data of a displayed card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// URLs opened when the card body or one of its buttons is clicked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_urls: Option<Value>,
    /// Version of the card as last rendered.
    #[serde(default)]
    pub version: u64,
}

/// Displayed cards keyed by notification id.
pub type ActiveNotifications = BTreeMap<String, NotificationRecord>;

/// Acknowledged dismissals: notification id to acknowledgment time (epoch ms).
pub type RecentDismissals = BTreeMap<String, u64>;

/// A user dismissal the server has not acknowledged yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDismissal {
    /// Dismissed card.
    pub notification_id: String,
    /// When the user dismissed it (epoch ms).
    pub time: u64,
}

/// Drop dismissals acknowledged `retention_ms` or more before `now_ms`.
pub fn unexpired_dismissals(
    recent: &RecentDismissals,
    now_ms: u64,
    retention_ms: u64,
) -> RecentDismissals {
    recent
        .iter()
        .filter(|(_, dismissed_at)| now_ms.saturating_sub(**dismissed_at) < retention_ms)
        .map(|(id, dismissed_at)| (id.clone(), *dismissed_at))
        .collect()
}
