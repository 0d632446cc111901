//! Dismissal outbox.
//!
//! User dismissals are appended to `pendingDismissals` and drained to the
//! server strictly in order, one request at a time. An entry leaves the queue
//! only after the server acknowledges it, at which point it moves to
//! `recentDismissals` so stale server responses cannot resurrect the card.

use crate::clock::Clock;
use crate::diagnostics::{self, DiagnosticEvent};
use crate::error::Result;
use crate::scheduler::AttemptManager;
use crate::server::CardsServer;
use crate::state::{
    PENDING_DISMISSALS_KEY, PendingDismissal, RECENT_DISMISSALS_KEY, RecentDismissals,
};
use crate::store::{self, KeyValueStore, Record};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Delivers user dismissals to the cards server.
#[derive(Clone)]
pub struct DismissalPipeline {
    store: Arc<dyn KeyValueStore>,
    server: Arc<dyn CardsServer>,
    clock: Arc<dyn Clock>,
    attempts: Arc<AttemptManager>,
}

impl std::fmt::Debug for DismissalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DismissalPipeline")
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl DismissalPipeline {
    /// `attempts` is the `dismiss` series; it is stopped once the queue drains.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        server: Arc<dyn CardsServer>,
        clock: Arc<dyn Clock>,
        attempts: Arc<AttemptManager>,
    ) -> Self {
        Self {
            store,
            server,
            clock,
            attempts,
        }
    }

    /// Queue a dismissal of `notification_id` and try to deliver everything
    /// pending. Returns whether the queue is now empty.
    pub async fn enqueue(&self, notification_id: &str) -> Result<bool> {
        let items = self.store.get(&[PENDING_DISMISSALS_KEY]).await?;
        let now = self.clock.now_epoch_millis();
        let (mut pending, _) = load_pending(&items, now);
        pending.push_back(PendingDismissal {
            notification_id: notification_id.to_owned(),
            time: now,
        });
        debug!(notification_id, queued = pending.len(), "dismissal queued");
        self.store
            .set(store::record_of(PENDING_DISMISSALS_KEY, &pending)?)
            .await?;

        self.flush().await
    }

    /// Deliver pending dismissals in order, stopping at the first failure.
    ///
    /// Returns `true` when no dismissals are left.
    pub async fn flush(&self) -> Result<bool> {
        let items = self
            .store
            .get(&[PENDING_DISMISSALS_KEY, RECENT_DISMISSALS_KEY])
            .await?;
        let (mut pending, repaired) = load_pending(&items, self.clock.now_epoch_millis());
        let mut recent: RecentDismissals = store::decode_or_default(&items, RECENT_DISMISSALS_KEY);

        let mut changed = repaired;
        let mut drained = true;
        while let Some(head) = pending.front() {
            let age_ms = self.clock.now_epoch_millis().saturating_sub(head.time);
            diagnostics::record(DiagnosticEvent::DismissalRequested);

            match self
                .server
                .request_dismissal(&head.notification_id, age_ms)
                .await
            {
                Ok(()) => {
                    diagnostics::record(DiagnosticEvent::DismissalSucceeded);
                    info!(notification_id = %head.notification_id, age_ms, "dismissal acknowledged");
                    recent.insert(head.notification_id.clone(), self.clock.now_epoch_millis());
                    pending.pop_front();
                    changed = true;
                }
                Err(e) => {
                    warn!(
                        notification_id = %head.notification_id,
                        remaining = pending.len(),
                        "dismissal not delivered: {e}"
                    );
                    drained = false;
                    break;
                }
            }
        }

        if changed {
            let mut record = Record::new();
            record.insert(PENDING_DISMISSALS_KEY.to_owned(), store::encode(&pending)?);
            record.insert(RECENT_DISMISSALS_KEY.to_owned(), store::encode(&recent)?);
            self.store.set(record).await?;
        }

        if drained {
            self.attempts.stop().await?;
        }
        Ok(drained)
    }
}

/// Decode the stored queue entry by entry.
///
/// An entry with a usable id is kept; a missing or invalid `time` is repaired
/// (fractions truncated, anything else set to `now_ms`). Entries without an id
/// cannot be delivered and are skipped. The flag reports whether anything was
/// repaired or skipped.
fn load_pending(items: &Record, now_ms: u64) -> (VecDeque<PendingDismissal>, bool) {
    let entries = match items.get(PENDING_DISMISSALS_KEY) {
        None | Some(Value::Null) => return (VecDeque::new(), false),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            warn!(value = %other, "pending dismissal queue is not a list; resetting");
            return (VecDeque::new(), true);
        }
    };

    let mut repaired = false;
    let mut pending = VecDeque::with_capacity(entries.len());
    for entry in entries {
        if let Ok(decoded) = serde_json::from_value::<PendingDismissal>(entry.clone()) {
            pending.push_back(decoded);
            continue;
        }

        repaired = true;
        let Some(id) = entry.get("notificationId").and_then(Value::as_str) else {
            warn!(%entry, "skipping pending dismissal without an id");
            continue;
        };
        let time = entry
            .get("time")
            .and_then(Value::as_f64)
            .filter(|t| t.is_finite() && *t >= 0.0)
            .map_or(now_ms, |t| t as u64);
        warn!(notification_id = id, time, "repaired pending dismissal entry");
        pending.push_back(PendingDismissal {
            notification_id: id.to_owned(),
            time,
        });
    }
    (pending, repaired)
}
