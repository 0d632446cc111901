//! Shared fakes for unit tests of the pipelines and the service.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::display::{NotificationDisplay, UrlOpener};
use crate::error::{CardsError, Result};
use crate::location::{LocationProvider, Position};
use crate::server::CardsServer;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const NOW_MS: u64 = 1_700_000_000_000;

pub fn position() -> Position {
    Position {
        latitude: 37.42,
        longitude: -122.08,
        accuracy: 30.0,
    }
}

/// Scripted cards server.
///
/// Card requests pop responses from a queue; an empty queue answers 500.
/// Dismissals succeed unless their id was marked failing.
#[derive(Default)]
pub struct FakeServer {
    responses: Mutex<VecDeque<Result<String>>>,
    failing: Mutex<HashSet<String>>,
    card_requests: AtomicUsize,
    dismissed: Mutex<Vec<String>>,
}

impl FakeServer {
    pub fn respond(&self, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(body.to_string()));
    }

    pub fn respond_raw(&self, body: &str) {
        self.responses.lock().unwrap().push_back(Ok(body.to_owned()));
    }

    pub fn fail_dismissal(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_owned());
    }

    pub fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn card_requests(&self) -> usize {
        self.card_requests.load(Ordering::SeqCst)
    }

    pub fn dismissed(&self) -> Vec<String> {
        self.dismissed.lock().unwrap().clone()
    }
}

#[async_trait]
impl CardsServer for FakeServer {
    async fn request_cards(&self, _position: &Position) -> Result<String> {
        self.card_requests.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(CardsError::Status {
                endpoint: "notifications".into(),
                status: 500,
            }))
    }

    async fn request_dismissal(&self, notification_id: &str, _age_ms: u64) -> Result<()> {
        if self.failing.lock().unwrap().contains(notification_id) {
            return Err(CardsError::Http("connection refused".into()));
        }
        self.dismissed
            .lock()
            .unwrap()
            .push(notification_id.to_owned());
        Ok(())
    }
}

/// A call the display received.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayCall {
    Create(String, Value),
    Update(String, Value),
    Clear(String),
}

/// Display that records every call.
#[derive(Default)]
pub struct RecordingDisplay {
    calls: Mutex<Vec<DisplayCall>>,
    shown: Mutex<BTreeSet<String>>,
    pub fail_creates: std::sync::atomic::AtomicBool,
}

impl RecordingDisplay {
    pub fn calls(&self) -> Vec<DisplayCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationDisplay for RecordingDisplay {
    async fn create(&self, notification_id: &str, spec: &Value) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push(DisplayCall::Create(notification_id.to_owned(), spec.clone()));
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(CardsError::Display("notification center unavailable".into()));
        }
        self.shown.lock().unwrap().insert(notification_id.to_owned());
        Ok(notification_id.to_owned())
    }

    async fn update(&self, notification_id: &str, spec: &Value) -> Result<bool> {
        self.calls
            .lock()
            .unwrap()
            .push(DisplayCall::Update(notification_id.to_owned(), spec.clone()));
        Ok(self.shown.lock().unwrap().contains(notification_id))
    }

    async fn clear(&self, notification_id: &str) -> Result<bool> {
        self.calls
            .lock()
            .unwrap()
            .push(DisplayCall::Clear(notification_id.to_owned()));
        Ok(self.shown.lock().unwrap().remove(notification_id))
    }
}

/// Opener that records opened URLs.
#[derive(Default)]
pub struct RecordingOpener {
    opened: Mutex<Vec<String>>,
}

impl RecordingOpener {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl UrlOpener for RecordingOpener {
    async fn open_url(&self, url: &str) -> Result<()> {
        self.opened.lock().unwrap().push(url.to_owned());
        Ok(())
    }
}

/// Location provider that only counts requests.
#[derive(Default)]
pub struct CountingLocation {
    requests: AtomicUsize,
}

impl CountingLocation {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationProvider for CountingLocation {
    async fn request_fix(&self) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
