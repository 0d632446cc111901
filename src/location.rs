//! Device location acquisition.

use crate::error::{CardsError, Result};
use crate::trigger::{Trigger, TriggerSender};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A location fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Accuracy radius in meters.
    pub accuracy: f64,
}

impl Position {
    /// `lat,lon,accuracy` as sent to the cards server.
    pub fn to_query(&self) -> String {
        format!("{},{},{}", self.latitude, self.longitude, self.accuracy)
    }
}

/// Source of location fixes.
///
/// A request only asks for a fix; the fix itself arrives later as a
/// [`Trigger::LocationUpdate`].
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Ask for a fresh location fix.
    async fn request_fix(&self) -> Result<()>;
}

/// Provider that always reports one configured position.
#[derive(Debug, Clone)]
pub struct FixedLocationProvider {
    position: Position,
    triggers: TriggerSender,
}

impl FixedLocationProvider {
    pub fn new(position: Position, triggers: TriggerSender) -> Self {
        Self { position, triggers }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn request_fix(&self) -> Result<()> {
        debug!(position = %self.position.to_query(), "reporting fixed location");
        if self.triggers.send(Trigger::LocationUpdate(self.position)) {
            Ok(())
        } else {
            Err(CardsError::Location("service is not running".into()))
        }
    }
}
