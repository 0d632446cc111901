//! Shared fakes and harness for driving the whole service.

use async_trait::async_trait;
use now_cards::clock::Clock;
use now_cards::display::{NotificationDisplay, UrlOpener};
use now_cards::location::{FixedLocationProvider, Position};
use now_cards::server::CardsServer;
use now_cards::store::KeyValueStore;
use now_cards::trigger::{self, TriggerSender};
use now_cards::{CardsConfig, CardsError, CardsService, Collaborators, Result};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) fn position() -> Position {
    Position {
        latitude: 40.7,
        longitude: -74.0,
        accuracy: 15.0,
    }
}

/// Cards server with scripted card responses and switchable dismissal failures.
#[derive(Default)]
pub(crate) struct ScriptedServer {
    responses: Mutex<VecDeque<String>>,
    failing: Mutex<HashSet<String>>,
    dismissed: Mutex<Vec<(String, u64)>>,
}

impl ScriptedServer {
    pub(crate) fn respond(&self, body: Value) {
        self.responses.lock().unwrap().push_back(body.to_string());
    }

    pub(crate) fn fail_dismissal(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_owned());
    }

    pub(crate) fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub(crate) fn dismissed(&self) -> Vec<String> {
        self.dismissed
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl CardsServer for ScriptedServer {
    async fn request_cards(&self, _position: &Position) -> Result<String> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CardsError::Http("no scripted response".into()))
    }

    async fn request_dismissal(&self, notification_id: &str, age_ms: u64) -> Result<()> {
        if self.failing.lock().unwrap().contains(notification_id) {
            return Err(CardsError::Status {
                endpoint: "dismiss".into(),
                status: 502,
            });
        }
        self.dismissed
            .lock()
            .unwrap()
            .push((notification_id.to_owned(), age_ms));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Shown {
    Created(String),
    Updated(String),
    Cleared(String),
}

/// Display recording what happened to each notification.
#[derive(Default)]
pub(crate) struct RecordingDisplay {
    events: Mutex<Vec<Shown>>,
}

impl RecordingDisplay {
    pub(crate) fn events(&self) -> Vec<Shown> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationDisplay for RecordingDisplay {
    async fn create(&self, notification_id: &str, _spec: &Value) -> Result<String> {
        self.events
            .lock()
            .unwrap()
            .push(Shown::Created(notification_id.to_owned()));
        Ok(notification_id.to_owned())
    }

    async fn update(&self, notification_id: &str, _spec: &Value) -> Result<bool> {
        self.events
            .lock()
            .unwrap()
            .push(Shown::Updated(notification_id.to_owned()));
        Ok(true)
    }

    async fn clear(&self, notification_id: &str) -> Result<bool> {
        self.events
            .lock()
            .unwrap()
            .push(Shown::Cleared(notification_id.to_owned()));
        Ok(true)
    }
}

#[derive(Default)]
pub(crate) struct RecordingOpener {
    opened: Mutex<Vec<String>>,
}

impl RecordingOpener {
    pub(crate) fn opened(&self) -> Vec<String> {
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

/// A running service plus handles to its fakes.
pub(crate) struct Harness {
    pub(crate) server: Arc<ScriptedServer>,
    pub(crate) display: Arc<RecordingDisplay>,
    pub(crate) opener: Arc<RecordingOpener>,
    pub(crate) service: CardsService,
    pub(crate) triggers: TriggerSender,
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl Harness {
    /// Start a service over `store` with fresh fakes.
    pub(crate) fn start(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::start_with_server(store, clock, Arc::new(ScriptedServer::default()))
    }

    pub(crate) fn start_with_server(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        server: Arc<ScriptedServer>,
    ) -> Self {
        let display = Arc::new(RecordingDisplay::default());
        let opener = Arc::new(RecordingOpener::default());
        let (triggers, receiver) = trigger::channel();

        let service = CardsService::new(
            &CardsConfig::default(),
            Collaborators {
                store,
                server: server.clone(),
                display: display.clone(),
                opener: opener.clone(),
                location: Arc::new(FixedLocationProvider::new(position(), triggers.clone())),
                clock,
            },
            triggers.clone(),
        );

        let cancel = CancellationToken::new();
        let runner = service.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { runner.run(receiver, token).await });

        Self {
            server,
            display,
            opener,
            service,
            triggers,
            cancel,
            handle,
        }
    }

    /// Cancel the service loop and wait for it to drain.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

/// Poll `condition` until it holds, sleeping between checks.
pub(crate) async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
