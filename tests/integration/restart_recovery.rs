//! Timer-driven behavior across polls and process restarts.
//!
//! Runs on paused tokio time with a shared in-memory store standing in for
//! the state file, so a "restart" is a second service over the same store.

use crate::helpers::{Harness, ScriptedServer, Shown, eventually, position};
use now_cards::clock::ManualClock;
use now_cards::state::{PENDING_DISMISSALS_KEY, PendingDismissal};
use now_cards::store::{self, KeyValueStore, MemoryStore};
use now_cards::Trigger;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const NOW_MS: u64 = 1_700_000_000_000;

fn pending(store: &MemoryStore) -> Vec<PendingDismissal> {
    store::decode_or_default(&store.snapshot(), PENDING_DISMISSALS_KEY)
}

#[tokio::test(start_paused = true)]
async fn pending_dismissal_is_delivered_after_restart() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW_MS));

    let first = Harness::start(store.clone(), clock.clone());
    first.server.fail_dismissal("a");
    first.triggers.send(Trigger::NotificationClosed {
        notification_id: "a".into(),
        by_user: true,
    });
    let watched = store.clone();
    eventually("dismissal to be queued", || {
        let store = watched.clone();
        async move { pending(&store).len() == 1 }
    })
    .await;
    first.service.tasks().wait_idle().await;
    assert!(first.service.dismiss_attempts().is_running().await.unwrap());
    assert!(first.server.dismissed().is_empty());
    first.stop().await;

    let second = Harness::start(store.clone(), clock.clone());
    tokio::time::sleep(Duration::from_secs(61)).await;
    let server = second.server.clone();
    eventually("retry after restart", || {
        let server = server.clone();
        async move { server.dismissed() == vec!["a".to_owned()] }
    })
    .await;
    second.service.tasks().wait_idle().await;

    assert!(pending(&store).is_empty());
    assert!(!second.service.dismiss_attempts().is_running().await.unwrap());
    second.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_retries_keep_entry_until_server_recovers() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let server = Arc::new(ScriptedServer::default());
    server.fail_dismissal("a");

    let harness = Harness::start_with_server(store.clone(), clock.clone(), server.clone());
    harness.triggers.send(Trigger::NotificationClosed {
        notification_id: "a".into(),
        by_user: true,
    });
    let watched = store.clone();
    eventually("dismissal to be queued", || {
        let store = watched.clone();
        async move { pending(&store).len() == 1 }
    })
    .await;

    // First retry at 60s fails and doubles the delay.
    tokio::time::sleep(Duration::from_secs(61)).await;
    harness.service.tasks().wait_idle().await;
    assert_eq!(pending(&store).len(), 1);
    let state = harness.service.dismiss_attempts().state().await.unwrap();
    assert_eq!(state.current_delay_seconds, 120);

    server.recover();
    tokio::time::sleep(Duration::from_secs(121)).await;
    eventually("delivery", || {
        let server = server.clone();
        async move { server.dismissed() == vec!["a".to_owned()] }
    })
    .await;
    harness.service.tasks().wait_idle().await;
    assert!(pending(&store).is_empty());

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn expiration_drives_next_poll() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let harness = Harness::start(store, clock);
    harness.server.respond(json!({
        "cards": [{"notificationId": "a", "version": 1, "notification": {}}],
        "expiration_timestamp_seconds": 600
    }));
    harness.server.respond(json!({
        "cards": [{"notificationId": "a", "version": 2, "notification": {}}],
        "expiration_timestamp_seconds": 600
    }));

    harness.triggers.send(Trigger::LocationUpdate(position()));
    let display = harness.display.clone();
    eventually("first poll", || {
        let display = display.clone();
        async move { display.events().len() == 1 }
    })
    .await;

    // The next poll happens on its own once the expiration elapses.
    tokio::time::sleep(Duration::from_secs(601)).await;
    eventually("second poll", || {
        let display = display.clone();
        async move { display.events().len() == 2 }
    })
    .await;

    assert_eq!(
        harness.display.events(),
        vec![Shown::Created("a".into()), Shown::Created("a".into())]
    );
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn zero_expiration_does_not_poll_back_to_back() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let harness = Harness::start(store, clock);
    for _ in 0..10 {
        harness.server.respond(json!({
            "cards": [{"notificationId": "a", "version": 1, "notification": {}}],
            "expiration_timestamp_seconds": 0
        }));
    }

    harness.triggers.send(Trigger::LocationUpdate(position()));
    let display = harness.display.clone();
    eventually("first poll", || {
        let display = display.clone();
        async move { !display.events().is_empty() }
    })
    .await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    harness.service.tasks().wait_idle().await;
    assert_eq!(harness.display.events(), vec![Shown::Created("a".into())]);

    let state = harness.service.cards_attempts().state().await.unwrap();
    assert_eq!(state.current_delay_seconds, 300);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn undecodable_queue_entry_does_not_drop_the_others() {
    let seeded = json!([
        {"notificationId": "a", "time": 1},
        {"notificationId": "b", "time": 1.5}
    ]);
    let store = Arc::new(MemoryStore::new());
    store
        .set(store::record_of(PENDING_DISMISSALS_KEY, &seeded).unwrap())
        .await
        .unwrap();
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let server = Arc::new(ScriptedServer::default());
    server.fail_dismissal("a");

    let harness = Harness::start_with_server(store.clone(), clock, server.clone());
    harness.triggers.send(Trigger::NotificationClosed {
        notification_id: "c".into(),
        by_user: true,
    });
    let watched = store.clone();
    eventually("dismissal to be queued", || {
        let store = watched.clone();
        async move { pending(&store).len() == 3 }
    })
    .await;
    harness.service.tasks().wait_idle().await;

    let ids: Vec<String> = pending(&store)
        .into_iter()
        .map(|p| p.notification_id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(server.dismissed().is_empty());
    harness.stop().await;
}
