//! Pool Broker
//!
//! Single-binary service that:
//! 1. Loads the service catalog and master key
//! 2. Optionally seeds demo accounts and users
//! 3. Serves the session and billing API on the public listener
//! 4. Serves credential administration on a separate admin listener
//! 5. Sweeps overdue sessions on a fixed interval

mod admin;
mod api;
mod bootstrap;
mod config;
mod error;
mod metrics;
mod sweep;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use broker_core::{Platform, SystemClock};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::api::{AppState, build_router};
use crate::config::Config;

/// How long in-flight requests get to finish once shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting pool-broker");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_listen_addr = %config.server.admin_listen_addr,
        services = config.services.len(),
        sweep_interval_secs = config.broker.sweep_interval_secs,
        seed_demo = config.broker.seed_demo,
        "configuration loaded"
    );

    let master_key = config
        .broker
        .master_key
        .take()
        .context("master key missing after config load")?;
    let platform = Platform::new(&master_key, Arc::new(SystemClock));
    drop(master_key);

    bootstrap::register_services(&platform, &config.services);
    let upstreams = if config.broker.seed_demo {
        bootstrap::seed_demo(&platform).context("failed to seed demo data")?
    } else {
        HashMap::new()
    };

    let sweep_task = sweep::spawn_sweep_task(platform.clone(), config.broker.sweep_interval());

    let app = build_router(
        AppState::new(platform.clone(), prometheus_handle),
        config.server.max_connections,
    );
    let admin_app = build_admin_router(AdminState::new(platform, upstreams));

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    let admin_addr = config.server.admin_listen_addr;
    let admin_listener = TcpListener::bind(admin_addr)
        .await
        .with_context(|| format!("failed to bind admin listener to {admin_addr}"))?;

    info!(addr = %listen_addr, admin_addr = %admin_addr, "accepting requests");

    // Graceful shutdown: on SIGTERM/SIGINT both listeners stop accepting and
    // drain in-flight requests. DRAIN_TIMEOUT starts at signal receipt so a
    // slow client cannot block process exit.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());

    let mut public_rx = shutdown_rx.clone();
    let public_server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = public_rx.changed().await;
            })
            .await
    });

    let mut admin_rx = shutdown_rx;
    let admin_server = tokio::spawn(async move {
        axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(async move {
                let _ = admin_rx.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    sweep_task.abort();
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, async {
        tokio::join!(public_server, admin_server)
    })
    .await
    {
        Ok((public, admin)) => {
            for (name, result) in [("public", public), ("admin", admin)] {
                match result {
                    Ok(Ok(())) => info!(listener = name, "in-flight requests drained"),
                    Ok(Err(e)) => {
                        error!(listener = name, error = %e, "server error during shutdown")
                    }
                    Err(e) => error!(listener = name, error = %e, "server task panicked"),
                }
            }
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
