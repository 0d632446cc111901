//! Inbound host events.
//!
//! Everything that wakes the service up (startup, install, location fixes,
//! user actions on notifications, due attempt timers) is a [`Trigger`] sent
//! through a [`TriggerSender`] to the service event loop.

use crate::location::Position;
use tokio::sync::mpsc;
use tracing::debug;

/// Why the host installed or updated the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    /// First install.
    Install,
    /// The service itself was updated.
    Update,
    /// The host browser was updated; no re-initialization needed.
    BrowserUpdate,
}

/// Area of a notification the user clicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget {
    /// The notification body.
    Message,
    /// Button at the given index.
    Button(usize),
}

/// A host event delivered to the service.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Host process started.
    Startup,
    /// Service installed or updated.
    Installed(InstallReason),
    /// A location fix arrived.
    LocationUpdate(Position),
    /// A notification was closed.
    NotificationClosed {
        /// Closed notification.
        notification_id: String,
        /// `true` if the user closed it, `false` if the system did.
        by_user: bool,
    },
    /// A notification was clicked.
    NotificationClicked {
        /// Clicked notification.
        notification_id: String,
        /// Clicked area.
        target: ClickTarget,
    },
    /// The attempt timer of the named series fired.
    AttemptDue(String),
}

/// Receiving half of the trigger channel, consumed by the service loop.
pub type TriggerReceiver = mpsc::UnboundedReceiver<Trigger>;

/// Cloneable handle for delivering triggers to the service.
#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: mpsc::UnboundedSender<Trigger>,
}

impl TriggerSender {
    /// Deliver a trigger. Returns `false` once the service loop has exited.
    pub fn send(&self, trigger: Trigger) -> bool {
        match self.tx.send(trigger) {
            Ok(()) => true,
            Err(mpsc::error::SendError(trigger)) => {
                debug!(?trigger, "service stopped; dropping trigger");
                false
            }
        }
    }
}

/// Create a connected trigger sender and receiver.
pub fn channel() -> (TriggerSender, TriggerReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TriggerSender { tx }, rx)
}
