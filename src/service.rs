//! The cards service.
//!
//! [`CardsService`] is built once at process start. It owns the task queue,
//! both attempt series and the pipelines, and turns every inbound
//! [`Trigger`] into a named task so that all store access is serialized.

use crate::cards::CardUpdatePipeline;
use crate::clock::Clock;
use crate::config::CardsConfig;
use crate::diagnostics::{self, UserAction};
use crate::dismissals::DismissalPipeline;
use crate::display::{NotificationDisplay, UrlOpener};
use crate::error::Result;
use crate::location::{LocationProvider, Position};
use crate::scheduler::tasks::{
    TASK_CARD_CLICKED, TASK_DISMISS_CARD, TASK_INITIALIZE, TASK_RETRY_DISMISS, TASK_UPDATE_CARDS,
};
use crate::scheduler::{
    Admission, AttemptManager, DueSink, TaskContext, TaskManager, are_tasks_conflicting,
};
use crate::server::CardsServer;
use crate::state::{ACTIVE_NOTIFICATIONS_KEY, ActiveNotifications};
use crate::store::{self, KeyValueStore};
use crate::trigger::{ClickTarget, InstallReason, Trigger, TriggerReceiver, TriggerSender};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Attempt series driving card polling.
pub const CARDS_UPDATE_SERIES: &str = "cards-update";

/// Attempt series driving dismissal retries.
pub const DISMISS_SERIES: &str = "dismiss";

/// External collaborators the service drives.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn KeyValueStore>,
    pub server: Arc<dyn CardsServer>,
    pub display: Arc<dyn NotificationDisplay>,
    pub opener: Arc<dyn UrlOpener>,
    pub location: Arc<dyn LocationProvider>,
    pub clock: Arc<dyn Clock>,
}

/// Background cards service.
#[derive(Clone)]
pub struct CardsService {
    tasks: TaskManager,
    cards_attempts: Arc<AttemptManager>,
    dismiss_attempts: Arc<AttemptManager>,
    dismissals: DismissalPipeline,
    updates: CardUpdatePipeline,
    store: Arc<dyn KeyValueStore>,
    display: Arc<dyn NotificationDisplay>,
    opener: Arc<dyn UrlOpener>,
    location: Arc<dyn LocationProvider>,
}

impl std::fmt::Debug for CardsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardsService")
            .field("tasks", &self.tasks)
            .field("cards_attempts", &self.cards_attempts)
            .field("dismiss_attempts", &self.dismiss_attempts)
            .finish_non_exhaustive()
    }
}

impl CardsService {
    /// Wire the service. Due attempt timers are delivered through `triggers`.
    pub fn new(config: &CardsConfig, deps: Collaborators, triggers: TriggerSender) -> Self {
        let on_due: DueSink = Arc::new(move |series: &str| {
            triggers.send(Trigger::AttemptDue(series.to_owned()));
        });

        let cards_attempts = Arc::new(AttemptManager::new(
            CARDS_UPDATE_SERIES,
            config.polling.backoff(),
            Arc::clone(&deps.store),
            Arc::clone(&deps.clock),
            Arc::clone(&on_due),
        ));
        let dismiss_attempts = Arc::new(AttemptManager::new(
            DISMISS_SERIES,
            config.dismissal.backoff(),
            Arc::clone(&deps.store),
            Arc::clone(&deps.clock),
            on_due,
        ));

        let dismissals = DismissalPipeline::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.server),
            Arc::clone(&deps.clock),
            Arc::clone(&dismiss_attempts),
        );
        let updates = CardUpdatePipeline::new(
            Arc::clone(&deps.store),
            deps.server,
            Arc::clone(&deps.display),
            deps.clock,
            Arc::clone(&cards_attempts),
            dismissals.clone(),
            config.dismissal.retention_ms(),
        );

        Self {
            tasks: TaskManager::new(are_tasks_conflicting),
            cards_attempts,
            dismiss_attempts,
            dismissals,
            updates,
            store: deps.store,
            display: deps.display,
            opener: deps.opener,
            location: deps.location,
        }
    }

    /// The task queue.
    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// The `cards-update` attempt series.
    pub fn cards_attempts(&self) -> &AttemptManager {
        &self.cards_attempts
    }

    /// The `dismiss` attempt series.
    pub fn dismiss_attempts(&self) -> &AttemptManager {
        &self.dismiss_attempts
    }

    /// Process triggers until `cancel` fires, then drain the queue.
    pub async fn run(&self, mut triggers: TriggerReceiver, cancel: CancellationToken) -> Result<()> {
        self.restore_timers().await;
        info!("cards service running");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => self.dispatch(trigger).await,
                    None => break,
                },
            }
        }

        info!("cards service stopping");
        self.tasks.wait_idle().await;
        self.cards_attempts.shutdown();
        self.dismiss_attempts.shutdown();
        Ok(())
    }

    async fn restore_timers(&self) {
        for attempts in [&self.cards_attempts, &self.dismiss_attempts] {
            if let Err(e) = attempts.restore().await {
                warn!(series = attempts.name(), "failed to restore attempt timer: {e}");
            }
        }
    }

    /// Handle one trigger.
    pub async fn dispatch(&self, trigger: Trigger) {
        debug!(?trigger, "dispatching trigger");
        match trigger {
            Trigger::Startup => {
                self.initialize();
            }
            Trigger::Installed(InstallReason::BrowserUpdate) => {
                debug!("host updated; keeping current state");
            }
            Trigger::Installed(_) => {
                self.initialize();
            }
            Trigger::LocationUpdate(position) => {
                self.update_cards(position);
            }
            Trigger::NotificationClosed {
                notification_id,
                by_user,
            } => {
                if by_user {
                    self.dismiss_card(notification_id);
                }
            }
            Trigger::NotificationClicked {
                notification_id,
                target,
            } => {
                self.card_clicked(notification_id, target);
            }
            Trigger::AttemptDue(series) => match series.as_str() {
                CARDS_UPDATE_SERIES => self.request_location().await,
                DISMISS_SERIES => {
                    self.retry_dismiss();
                }
                other => warn!(series = other, "unknown attempt series fired"),
            },
        }
    }

    async fn request_location(&self) {
        if let Err(e) = self.location.request_fix().await {
            warn!("location request failed: {e}");
        }
    }

    /// Arm the polling watchdog, forget displayed cards and ask for a fix.
    pub fn initialize(&self) -> Admission {
        let attempts = Arc::clone(&self.cards_attempts);
        let state_store = Arc::clone(&self.store);
        let location = Arc::clone(&self.location);

        self.tasks.submit(TASK_INITIALIZE, move |ctx: TaskContext| async move {
            ctx.set_step("initialize-watchdog");
            let watchdog = attempts.policy().max_delay_secs;
            ctx.wrap_external_call("attempts.start", attempts.start(Some(watchdog)))
                .await;

            ctx.set_step("initialize-reset-notifications");
            let reset = state_store.remove(&[ACTIVE_NOTIFICATIONS_KEY]);
            ctx.wrap_external_call("store.remove", reset).await;

            ctx.set_step("initialize-request-location");
            ctx.wrap_external_call("location.request_fix", location.request_fix())
                .await;
            info!("service initialized");
        })
    }

    /// Fetch and render cards for `position`.
    pub fn update_cards(&self, position: Position) -> Admission {
        let updates = self.updates.clone();
        self.tasks.submit(TASK_UPDATE_CARDS, move |ctx: TaskContext| async move {
            let run = updates.run(&position, &ctx);
            if let Some(outcome) = ctx.wrap_external_call("cards.update", run).await {
                debug!(?outcome, "card update finished");
            }
        })
    }

    /// Handle a user dismissal of `notification_id`.
    pub fn dismiss_card(&self, notification_id: String) -> Admission {
        diagnostics::record_action(&notification_id, UserAction::Dismissed);
        let attempts = Arc::clone(&self.dismiss_attempts);
        let display = Arc::clone(&self.display);
        let dismissals = self.dismissals.clone();

        self.tasks.submit(TASK_DISMISS_CARD, move |ctx: TaskContext| async move {
            ctx.set_step("dismiss-start-retries");
            ctx.wrap_external_call("attempts.start", attempts.start(None))
                .await;

            // The card may have been shown again while this task was queued.
            ctx.set_step("dismiss-clear-notification");
            ctx.wrap_external_call("display.clear", display.clear(&notification_id))
                .await;

            ctx.set_step("dismiss-enqueue");
            if let Some(drained) = ctx
                .wrap_external_call("dismissals.enqueue", dismissals.enqueue(&notification_id))
                .await
            {
                debug!(notification_id = %notification_id, drained, "dismissal processed");
            }
        })
    }

    /// Retry delivering pending dismissals.
    pub fn retry_dismiss(&self) -> Admission {
        let attempts = Arc::clone(&self.dismiss_attempts);
        let dismissals = self.dismissals.clone();

        self.tasks.submit(TASK_RETRY_DISMISS, move |ctx: TaskContext| async move {
            ctx.set_step("retry-dismiss-plan");
            if ctx
                .wrap_external_call("attempts.plan_for_next", attempts.plan_for_next())
                .await
                .is_none()
            {
                return;
            }

            ctx.set_step("retry-dismiss-flush");
            if let Some(drained) = ctx
                .wrap_external_call("dismissals.flush", dismissals.flush())
                .await
            {
                debug!(drained, "dismissal retry finished");
            }
        })
    }

    /// Open the URL attached to the clicked area of `notification_id`.
    pub fn card_clicked(&self, notification_id: String, target: ClickTarget) -> Admission {
        let action = match target {
            ClickTarget::Message => UserAction::MessageClicked,
            ClickTarget::Button(index) => UserAction::ButtonClicked(index),
        };
        diagnostics::record_action(&notification_id, action);

        let state_store = Arc::clone(&self.store);
        let opener = Arc::clone(&self.opener);

        self.tasks.submit(TASK_CARD_CLICKED, move |ctx: TaskContext| async move {
            ctx.set_step("card-clicked-read");
            let Some(items) = ctx
                .wrap_external_call("store.get", state_store.get(&[ACTIVE_NOTIFICATIONS_KEY]))
                .await
            else {
                return;
            };
            let active: ActiveNotifications =
                store::decode_or_default(&items, ACTIVE_NOTIFICATIONS_KEY);

            let Some(url) = active
                .get(&notification_id)
                .and_then(|record| record.action_urls.as_ref())
                .and_then(|urls| click_url(urls, target))
            else {
                debug!(notification_id = %notification_id, ?target, "no url for clicked card");
                return;
            };

            ctx.set_step("card-clicked-open");
            ctx.wrap_external_call("opener.open_url", opener.open_url(&url))
                .await;
        })
    }
}

/// URL for the clicked area: `messageUrl` for the body, `buttonUrls[i]` for
/// button `i`. Anything that is not a string yields `None`.
pub fn click_url(action_urls: &Value, target: ClickTarget) -> Option<String> {
    let url = match target {
        ClickTarget::Message => action_urls.get("messageUrl"),
        ClickTarget::Button(index) => action_urls
            .get("buttonUrls")
            .and_then(Value::as_array)
            .and_then(|urls| urls.get(index)),
    }?;
    url.as_str().map(str::to_owned)
}
