//! now-cards: location-based card notifications as a background service.
//!
//! The service polls a cards server for items relevant to the device's
//! location, shows them as persistent notifications, and reliably reports
//! user dismissals back to the server across network failures and restarts.
//!
//! # Architecture
//!
//! - **Task queue** ([`scheduler::TaskManager`]): all work runs as named,
//!   mutually exclusive tasks with conflict-based deduplication
//! - **Attempt series** ([`scheduler::AttemptManager`]): persisted
//!   exponential-backoff timers for polling and dismissal retries
//! - **Dismissal outbox** ([`dismissals::DismissalPipeline`]): at-least-once,
//!   in-order delivery of dismissals
//! - **Card updates** ([`cards::CardUpdatePipeline`]): fetch, reconcile and
//!   render cards
//! - **Service** ([`service::CardsService`]): maps inbound [`Trigger`]s onto
//!   tasks
//!
//! Storage, transport, display, URL opening and location are traits so the
//! host can plug in its own implementations.

pub mod cards;
pub mod cards_dirs;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod dismissals;
pub mod display;
pub mod error;
pub mod location;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod state;
pub mod store;
pub mod trigger;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::CardsConfig;
pub use error::{CardsError, Result};
pub use service::{CardsService, Collaborators};
pub use trigger::{ClickTarget, InstallReason, Trigger, TriggerSender};
