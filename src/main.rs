//! Binary entry point: wires the store, event bus, manager, event loop, and
//! scheduler together, then runs until interrupted.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fetchq::manager::{listen, scheduler, QueueManager};
use fetchq::{datadir, logging, Database, EventBus, Store};

/// Database file name under the data directory.
const DATABASE_FILE_NAME: &str = "sqlite.db";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create data directory {}", dir.display()))?;
            dir
        }
        None => datadir::app_data_dir().context("failed to determine data directory")?,
    };

    if logging::init(&data_dir).is_err() {
        logging::init_stderr();
    }

    let db = Database::open(&data_dir.join(DATABASE_FILE_NAME))
        .await
        .context("failed to open database")?;
    let store = Store::new(db);

    let (bus, core_events, mut ui_events) = EventBus::new();
    let manager = QueueManager::init(store, bus)
        .await
        .context("failed to initialize queue manager")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(listen::listen(Arc::clone(&manager), core_events));
    tokio::spawn(scheduler::run(Arc::clone(&manager), shutdown.clone()));

    // Headless observer: keep the UI channel drained so the event loop never
    // back-pressures against a missing front-end.
    tokio::spawn(async move {
        while let Some(event) = ui_events.recv().await {
            tracing::debug!(?event, "ui event");
        }
    });

    info!(data_dir = %data_dir.display(), "engine running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    shutdown.cancel();
    info!("shutting down");
    Ok(())
}
