//! Diagnostic counters and user actions.
//!
//! Emitted as `tracing` events on the `now_cards::diagnostics` target so a
//! subscriber can route or count them separately from regular logs.

use tracing::info;

/// Service milestones worth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticEvent {
    CardsRequested,
    CardsRequestSucceeded,
    CardsParsed,
    DismissalRequested,
    DismissalSucceeded,
}

impl DiagnosticEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CardsRequested => "cards_requested",
            Self::CardsRequestSucceeded => "cards_request_succeeded",
            Self::CardsParsed => "cards_parsed",
            Self::DismissalRequested => "dismissal_requested",
            Self::DismissalSucceeded => "dismissal_succeeded",
        }
    }
}

/// Things the user did with a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Dismissed,
    MessageClicked,
    ButtonClicked(usize),
}

/// Record a diagnostic milestone.
pub fn record(event: DiagnosticEvent) {
    info!(target: "now_cards::diagnostics", event = event.as_str(), "diagnostic event");
}

/// Record a user action on `notification_id`.
pub fn record_action(notification_id: &str, action: UserAction) {
    match action {
        UserAction::Dismissed => {
            info!(target: "now_cards::diagnostics", notification_id, action = "dismissed", "user action");
        }
        UserAction::MessageClicked => {
            info!(target: "now_cards::diagnostics", notification_id, action = "message_clicked", "user action");
        }
        UserAction::ButtonClicked(index) => {
            info!(
                target: "now_cards::diagnostics",
                notification_id,
                action = "button_clicked",
                button = index,
                "user action"
            );
        }
    }
}
