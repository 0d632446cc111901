//! Config file persistence and how it drives the service's cadence.

use now_cards::CardsConfig;
use now_cards::scheduler::BackoffPolicy;
use std::path::PathBuf;

#[test]
fn config_survives_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = CardsConfig::default();
    config.server.base_url = Some("https://cards.example.com/".into());
    config.polling.initial_delay_secs = 120;
    config.dismissal.retention_secs = 600;
    config.storage.state_path = Some(PathBuf::from("/var/lib/now-cards/state.json"));
    config.location.latitude = Some(48.85);
    config.location.longitude = Some(2.35);
    config.logging.directory = Some(dir.path().join("logs"));
    config.save_to_file(&path).unwrap();

    let loaded = CardsConfig::from_file(&path).unwrap();
    assert!(loaded.validate().is_ok());
    assert_eq!(
        loaded.server.base_url.as_deref(),
        Some("https://cards.example.com/")
    );
    assert_eq!(loaded.polling.backoff(), BackoffPolicy::new(120, 3600));
    assert_eq!(loaded.dismissal.retention_ms(), 600_000);
    assert_eq!(
        loaded.storage.resolved_state_path(),
        PathBuf::from("/var/lib/now-cards/state.json")
    );
    let position = loaded.location.position().unwrap();
    assert_eq!((position.latitude, position.longitude), (48.85, 2.35));
    assert_eq!(loaded.logging.directory, Some(dir.path().join("logs")));
}

#[test]
fn hand_written_file_with_only_server_section_is_complete() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[server]\nbase_url = \"http://localhost:8080/cards\"\n",
    )
    .unwrap();

    let config = CardsConfig::from_file(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.server.request_timeout_secs, 30);
    assert_eq!(config.polling.backoff(), BackoffPolicy::new(300, 3600));
    assert_eq!(config.dismissal.backoff(), BackoffPolicy::new(60, 3600));
}

#[test]
fn malformed_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[server\nbase_url = ").unwrap();

    let err = CardsConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, now_cards::CardsError::Config(_)));
}
