//! CLI for nettables
//!
//! Subcommands:
//! - `server`: run the topic storage, the WebSocket server and the time sync server
//! - `timesync`: run a time sync client against a server and log the offsets

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use nettables::config::{Settings, load_config};
use nettables::instance::Instance;
use nettables::timesync::{TimeSyncClient, TimeSyncServer};
use nettables::transport::websocket::start_websocket_server;
use nettables::utils::clock::MonotonicClock;
use nettables::utils::error::{NtError, Result};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "nettables")]
enum Command {
    /// Start the storage, WebSocket and time sync servers
    Server,
    /// Estimate the clock offset to a running server
    Timesync {
        /// Time sync server address
        #[arg(long, default_value = "127.0.0.1:5810")]
        server: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            nettables::utils::logging::init("info");
            error!("Failed to load configuration: {}", e);
            return;
        }
    };
    nettables::utils::logging::init(&config.logging.level);

    match cmd {
        Command::Server => {
            if let Err(e) = run_server(config).await {
                error!("Server failed: {}", e);
            }
        }
        Command::Timesync { server } => {
            if let Err(e) = run_timesync(&server, &config).await {
                error!("Time sync failed: {}", e);
            }
        }
    }
}

async fn run_server(config: Settings) -> Result<()> {
    let instance = Instance::start(&config)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let timesync_addr = format!("{}:{}", config.server.host, config.timesync.port);
    let timesync = TimeSyncServer::bind(&timesync_addr, instance.clock()).await?;

    tokio::select! {
        result = start_websocket_server(addr, instance.handle(), instance.clock(), config.clone()) => {
            error!("WebSocket server exited unexpectedly: {:?}", result);
        }
        result = timesync.run() => {
            error!("Time sync server exited unexpectedly: {:?}", result);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    instance.shutdown().await;
    Ok(())
}

async fn run_timesync(server: &str, config: &Settings) -> Result<()> {
    let addr = tokio::net::lookup_host(server)
        .await?
        .next()
        .ok_or_else(|| NtError::Protocol(format!("cannot resolve {server}")))?;
    let client = TimeSyncClient::connect(
        addr,
        Arc::new(MonotonicClock::new()),
        Duration::from_millis(config.timesync.interval_ms),
        Duration::from_millis(config.timesync.timeout_ms),
    )
    .await?;

    let handle = client.spawn();
    let mut samples = handle.subscribe();
    loop {
        tokio::select! {
            changed = samples.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(sample) = *samples.borrow_and_update() {
                    info!(offset_us = sample.offset, rtt_us = sample.rtt, "clock offset");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                break;
            }
        }
    }
    Ok(())
}
