//! Cards server response schema.
//!
//! Parsing is explicit validation: the payload must be a JSON object with a
//! `cards` array and a non-negative numeric `expiration_timestamp_seconds`.
//! Anything else is [`CardsError::MalformedResponse`]. Individual cards are
//! lenient: entries without a string `notificationId` are skipped and a
//! version that is not a non-negative integer is left for the caller to repair.

use crate::error::{CardsError, Result};
use serde_json::Value;
use tracing::warn;

/// One card from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub notification_id: String,
    /// `None` when the server sent no usable version.
    pub version: Option<u64>,
    /// Opaque notification payload passed to the display.
    pub notification: Value,
    /// `{messageUrl, buttonUrls}` used by click handling.
    pub action_urls: Option<Value>,
}

/// A validated `notifications` response.
#[derive(Debug, Clone, PartialEq)]
pub struct CardsResponse {
    pub cards: Vec<Card>,
    /// Seconds until the next poll.
    pub expiration_seconds: u64,
}

/// Parse and validate a raw `notifications` response body.
pub fn parse_cards_response(body: &str) -> Result<CardsResponse> {
    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| CardsError::MalformedResponse(format!("invalid JSON: {e}")))?;

    let Some(raw_cards) = parsed.get("cards").and_then(Value::as_array) else {
        return Err(CardsError::MalformedResponse(
            "`cards` is missing or not an array".into(),
        ));
    };

    let expiration_seconds = parsed
        .get("expiration_timestamp_seconds")
        .and_then(Value::as_f64)
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| secs.ceil() as u64)
        .ok_or_else(|| {
            CardsError::MalformedResponse(
                "`expiration_timestamp_seconds` is missing or invalid".into(),
            )
        })?;

    let cards = raw_cards.iter().filter_map(parse_card).collect();
    Ok(CardsResponse {
        cards,
        expiration_seconds,
    })
}

fn parse_card(raw: &Value) -> Option<Card> {
    let Some(notification_id) = raw.get("notificationId").and_then(Value::as_str) else {
        warn!(card = %raw, "skipping card without notificationId");
        return None;
    };

    let version = raw.get("version").and_then(Value::as_u64);
    if version.is_none() {
        warn!(notification_id, "card version is not a non-negative integer");
    }

    Some(Card {
        notification_id: notification_id.to_owned(),
        version,
        notification: raw.get("notification").cloned().unwrap_or(Value::Null),
        action_urls: raw.get("actionUrls").filter(|v| !v.is_null()).cloned(),
    })
}
