//! PebbleKV server entry point.
//!
//! Loads the snapshot, starts the expiry reaper and serves connections until
//! Ctrl+C.

use clap::Parser;
use pebblekv::commands::CommandHandler;
use pebblekv::connection::{handle_connection, ConnectionStats};
use pebblekv::storage::{ExpirySweeper, Snapshotter, StorageEngine};
use pebblekv::Config;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!(version = pebblekv::VERSION, "PebbleKV starting");

    let snapshotter = Arc::new(Snapshotter::new(config.db_file.clone()));
    let storage = Arc::new(StorageEngine::from_keyspace(snapshotter.load()));
    info!(keys = storage.len(), "Keyspace ready");

    let _sweeper = ExpirySweeper::start(Arc::clone(&storage), config.expiry());

    let handler = CommandHandler::new(Arc::clone(&storage), snapshotter);
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, handler, Arc::clone(&stats)) => {}
        _ = shutdown => {}
    }

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        expired = storage.stats().expired,
        "Server shutdown complete"
    );
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
