//! Modular bot entry point
//!
//! Wires the shared pieces together:
//! 1. Loads configuration and initializes logging
//! 2. Builds the event bus and the state store
//! 3. Restores the persistent state snapshot
//! 4. Runs the strategy module against the bus until Ctrl+C
//! 5. Snapshots persistent state on shutdown

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use modular_bot::config;
use modular_bot::core::{init_logging, EventBus, StateStore};
use modular_bot::modules::{Module, MovingAverageCross, ACCOUNT_VALUE_KEY};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenvy::dotenv().ok();

    init_logging();

    info!("modular bot starting");

    let config = match config::load_config(Path::new("config.yaml")) {
        Ok(cfg) => {
            info!(
                strategy = %cfg.strategy.id,
                pairs = ?cfg.strategy.pairs,
                state_file = %cfg.state_file.display(),
                "configuration loaded"
            );
            cfg
        }
        Err(e) => {
            error!("configuration failed: {}", e);
            std::process::exit(1);
        }
    };

    let bus = Arc::new(EventBus::default());
    let store = Arc::new(StateStore::new(bus.clone()));

    // Restore the persistent subset from the previous run, if any
    if config.state_file.exists() {
        if store.load_state(&config.state_file) {
            let info = store.get_state_info();
            info!(entries = info.total_keys, "state restored");
        }
    } else {
        info!(path = %config.state_file.display(), "no state snapshot found, starting fresh");
    }

    // Seed an account value until an account module provides a live one
    if store.get_state(ACCOUNT_VALUE_KEY).is_none() {
        store.set_state(ACCOUNT_VALUE_KEY, json!(10_000.0), "main", None, true);
    }

    let mut strategy = MovingAverageCross::new(config.strategy.clone(), store.clone(), bus.clone());
    strategy.initialize().await?;

    // TODO: connect a market data feed publishing PriceUpdate events into the
    // bus; until then the strategy only reacts to state watch notifications.

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("graceful shutdown initiated");
                let _ = shutdown_tx.send(());
            }
            Err(err) => {
                error!("failed to listen for Ctrl+C signal: {}", err);
            }
        }
    });

    let mut events = bus.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if let Err(e) = strategy.handle_event(&event).await {
                        error!(kind = event.kind(), error = %e, "module failed to handle event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event consumer lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    strategy.shutdown().await?;

    if let Some(parent) = config.state_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }
    if !store.save_state(&config.state_file) {
        error!(path = %config.state_file.display(), "failed to save state snapshot on shutdown");
    }

    let stats = bus.statistics();
    info!(event_counts = ?stats.event_counts, "clean exit");
    Ok(())
}
