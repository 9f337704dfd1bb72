#![doc = include_str!("../README.md")]

mod server;

use anyhow::{Context, bail};
use clap::Parser;
use server::config::{AppConfig, CliArgs, HandlerKind};
use server::handlers::{DiscardHandler, EchoHandler};
use server::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::signal;
use turnstile::Server;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = AppConfig::try_from(args)?;

    init_telemetry(config.log_format)?;
    log_startup_info(&config);

    let server = Arc::new(Server::new(config.server.clone()));
    match config.handler {
        HandlerKind::Echo => server.start(EchoHandler)?,
        HandlerKind::Discard => server.start(DiscardHandler)?,
    }
    let terminated = server
        .terminated()
        .context("server run ended before it could be observed")?;

    let listener_failed = tokio::select! {
        () = shutdown_signal() => false,
        () = terminated.cancelled() => true,
    };

    tracing::info!("Shutting down, waiting for accepted connections...");
    let stopper = Arc::clone(&server);
    tokio::task::spawn_blocking(move || stopper.stop()).await??;

    if listener_failed {
        bail!("listener failed, server terminated");
    }

    tracing::info!("Server shut down successfully");
    Ok(())
}

fn log_startup_info(config: &AppConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting turnstile on {} with full config: {:#?}",
            config.server.addr(),
            config
        );
    } else {
        tracing::info!(
            "Starting turnstile on {} with {:?} handler and {}..={} workers",
            config.server.addr(),
            config.handler,
            config.server.pool.min_workers,
            config.server.pool.max_workers
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
