//! Card update pipeline.
//!
//! One run of the `update-cards` task:
//!
//! 1. pre-arm the polling retry (`plan_for_next`)
//! 2. flush pending dismissals, aborting if any are left
//! 3. fetch and validate cards for the current position
//! 4. reconcile them with the displayed notifications and recent dismissals
//! 5. render the delta, arm the next poll and persist the new state
//!
//! Any abort before step 5 leaves the pre-armed retry in place, so transient
//! failures back off exponentially.

use crate::clock::Clock;
use crate::diagnostics::{self, DiagnosticEvent};
use crate::dismissals::DismissalPipeline;
use crate::display::NotificationDisplay;
use crate::error::Result;
use crate::location::Position;
use crate::protocol::{self, CardsResponse};
use crate::scheduler::{AttemptManager, TaskContext};
use crate::server::CardsServer;
use crate::state::{
    ACTIVE_NOTIFICATIONS_KEY, ActiveNotifications, NotificationRecord, RECENT_DISMISSALS_KEY,
    RecentDismissals, unexpired_dismissals,
};
use crate::store::{self, KeyValueStore, Record};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a card is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// New card or new version: (re)create the notification.
    Create,
    /// Same version: update the notification in place.
    Update,
}

/// One card to render.
#[derive(Debug, Clone, PartialEq)]
pub struct Render {
    pub notification_id: String,
    pub mode: RenderMode,
    pub notification: Value,
}

/// Result of reconciling a server response with local state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Previously displayed notifications that did not receive an update.
    pub to_clear: Vec<String>,
    /// Cards to render, in response order.
    pub to_show: Vec<Render>,
    /// New `activeNotifications`: exactly the cards in `to_show`.
    pub active: ActiveNotifications,
    /// Non-expired recent dismissals.
    pub recent: RecentDismissals,
}

/// Compute the display delta for `response`.
///
/// Pure function of its inputs; the caller applies the result.
pub fn reconcile(
    response: &CardsResponse,
    previous: &ActiveNotifications,
    recent: &RecentDismissals,
    now_ms: u64,
    retention_ms: u64,
) -> Reconciliation {
    let recent = unexpired_dismissals(recent, now_ms, retention_ms);

    let updated: BTreeSet<&str> = response
        .cards
        .iter()
        .map(|card| card.notification_id.as_str())
        .filter(|id| !recent.contains_key(*id) && previous.contains_key(*id))
        .collect();

    let to_clear = previous
        .keys()
        .filter(|id| !updated.contains(id.as_str()))
        .cloned()
        .collect();

    let mut to_show = Vec::new();
    let mut active = ActiveNotifications::new();
    for card in &response.cards {
        if recent.contains_key(&card.notification_id) {
            debug!(notification_id = %card.notification_id, "skipping recently dismissed card");
            continue;
        }

        let previous_version = previous.get(&card.notification_id).map(|r| r.version);
        let version = card.version.or(previous_version).unwrap_or(0);
        let mode = if previous_version == Some(version) {
            RenderMode::Update
        } else {
            RenderMode::Create
        };

        to_show.push(Render {
            notification_id: card.notification_id.clone(),
            mode,
            notification: card.notification.clone(),
        });
        active.insert(
            card.notification_id.clone(),
            NotificationRecord {
                action_urls: card.action_urls.clone(),
                version,
            },
        );
    }

    Reconciliation {
        to_clear,
        to_show,
        active,
        recent,
    }
}

/// How an update run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Dismissals could not be delivered; nothing was fetched.
    DismissalsPending,
    /// The server could not be reached or refused the request.
    FetchFailed,
    /// The server answered with an unusable payload.
    Malformed,
    /// Cards were rendered and the next poll is armed.
    Rendered { shown: usize, cleared: usize },
}

/// Fetches cards and keeps the displayed notifications in sync.
#[derive(Clone)]
pub struct CardUpdatePipeline {
    store: Arc<dyn KeyValueStore>,
    server: Arc<dyn CardsServer>,
    display: Arc<dyn NotificationDisplay>,
    clock: Arc<dyn Clock>,
    attempts: Arc<AttemptManager>,
    dismissals: DismissalPipeline,
    retention_ms: u64,
}

impl std::fmt::Debug for CardUpdatePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardUpdatePipeline")
            .field("attempts", &self.attempts)
            .field("retention_ms", &self.retention_ms)
            .finish_non_exhaustive()
    }
}

impl CardUpdatePipeline {
    /// `attempts` is the `cards-update` series.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        server: Arc<dyn CardsServer>,
        display: Arc<dyn NotificationDisplay>,
        clock: Arc<dyn Clock>,
        attempts: Arc<AttemptManager>,
        dismissals: DismissalPipeline,
        retention_ms: u64,
    ) -> Self {
        Self {
            store,
            server,
            display,
            clock,
            attempts,
            dismissals,
            retention_ms,
        }
    }

    /// Run one update for `position`. Display failures are captured through
    /// `ctx`; only store failures are returned.
    pub async fn run(&self, position: &Position, ctx: &TaskContext) -> Result<UpdateOutcome> {
        ctx.set_step("plan-next-update");
        self.attempts.plan_for_next().await?;

        ctx.set_step("flush-dismissals");
        if !self.dismissals.flush().await? {
            info!("dismissals still pending; skipping card update");
            return Ok(UpdateOutcome::DismissalsPending);
        }

        ctx.set_step("request-cards");
        diagnostics::record(DiagnosticEvent::CardsRequested);
        let body = match self.server.request_cards(position).await {
            Ok(body) => body,
            Err(e) => {
                warn!("card request failed: {e}");
                return Ok(UpdateOutcome::FetchFailed);
            }
        };
        diagnostics::record(DiagnosticEvent::CardsRequestSucceeded);

        let response = match protocol::parse_cards_response(&body) {
            Ok(response) => response,
            Err(e) => {
                warn!("ignoring cards response: {e}");
                return Ok(UpdateOutcome::Malformed);
            }
        };

        ctx.set_step("reconcile-cards");
        let items = self
            .store
            .get(&[ACTIVE_NOTIFICATIONS_KEY, RECENT_DISMISSALS_KEY])
            .await?;
        let previous: ActiveNotifications =
            store::decode_or_default(&items, ACTIVE_NOTIFICATIONS_KEY);
        let recent: RecentDismissals = store::decode_or_default(&items, RECENT_DISMISSALS_KEY);
        let plan = reconcile(
            &response,
            &previous,
            &recent,
            self.clock.now_epoch_millis(),
            self.retention_ms,
        );
        diagnostics::record(DiagnosticEvent::CardsParsed);

        ctx.set_step("render-cards");
        for id in &plan.to_clear {
            debug!(notification_id = %id, "clearing card without update");
            ctx.wrap_external_call("display.clear", self.display.clear(id))
                .await;
        }
        for render in &plan.to_show {
            self.render(render, ctx).await;
        }

        ctx.set_step("schedule-next-update");
        self.attempts
            .start(Some(response.expiration_seconds))
            .await?;

        let mut record = Record::new();
        record.insert(ACTIVE_NOTIFICATIONS_KEY.to_owned(), store::encode(&plan.active)?);
        record.insert(RECENT_DISMISSALS_KEY.to_owned(), store::encode(&plan.recent)?);
        self.store.set(record).await?;

        info!(
            shown = plan.to_show.len(),
            cleared = plan.to_clear.len(),
            next_update_secs = response.expiration_seconds,
            "cards updated"
        );
        Ok(UpdateOutcome::Rendered {
            shown: plan.to_show.len(),
            cleared: plan.to_clear.len(),
        })
    }

    async fn render(&self, render: &Render, ctx: &TaskContext) {
        let id = render.notification_id.as_str();
        match render.mode {
            RenderMode::Create => {
                ctx.wrap_external_call("display.create", self.display.create(id, &render.notification))
                    .await;
            }
            RenderMode::Update => {
                let updated = ctx
                    .wrap_external_call("display.update", self.display.update(id, &render.notification))
                    .await;
                if updated == Some(false) {
                    warn!(notification_id = id, "notification to update was not shown");
                }
            }
        }
    }
}
