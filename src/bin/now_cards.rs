//! `now-cards` daemon.
//!
//! Loads the config file, wires the service with the file store, the HTTP
//! server client, the logging display and the configured fixed location, and
//! runs until Ctrl-C.
//!
//! Logs go to stderr and, when `logging.directory` is set, to a daily-rolling
//! file as well.

use anyhow::Context;
use now_cards::clock::SystemClock;
use now_cards::display::{LoggingDisplay, LoggingUrlOpener};
use now_cards::location::FixedLocationProvider;
use now_cards::server::HttpCardsServer;
use now_cards::store::JsonFileStore;
use now_cards::{CardsConfig, CardsService, Collaborators, Trigger, trigger};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = CardsConfig::default_config_path();
    let config = if config_path.exists() {
        CardsConfig::from_file(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?
    } else {
        CardsConfig::default()
    };

    let _log_guard = init_logging(&config);
    tracing::info!(config = %config_path.display(), "now-cards starting");

    config.validate().context("invalid configuration")?;
    let position = config
        .location
        .position()
        .context("location.latitude and location.longitude must be set")?;

    let state_path = config.storage.resolved_state_path();
    let store = JsonFileStore::open(&state_path)
        .await
        .with_context(|| format!("failed to open state at {}", state_path.display()))?;
    let server = HttpCardsServer::from_config(&config)?;

    let (triggers, receiver) = trigger::channel();
    let deps = Collaborators {
        store: Arc::new(store),
        server: Arc::new(server),
        display: Arc::new(LoggingDisplay::new()),
        opener: Arc::new(LoggingUrlOpener),
        location: Arc::new(FixedLocationProvider::new(position, triggers.clone())),
        clock: Arc::new(SystemClock),
    };
    let service = CardsService::new(&config, deps, triggers.clone());

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl-C");
        }
        shutdown.cancel();
    });

    triggers.send(Trigger::Startup);
    service.run(receiver, cancel).await.map_err(|e| {
        tracing::error!(error = %e, "now-cards exited with error");
        anyhow::anyhow!("now-cards failed: {e}")
    })?;

    tracing::info!("now-cards shut down cleanly");
    Ok(())
}

fn init_logging(config: &CardsConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));

    let (file_layer, guard) = match &config.logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "now-cards.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}
