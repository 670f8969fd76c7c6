//! sentinel-proxy
//!
//! TCP proxy that always forwards to the current Redis master.
//!
//! This service:
//! - Polls every configured sentinel for the master address
//! - Keeps the most recently reported address as the current master
//! - Accepts TCP connections on the listen address
//! - Forwards each connection, byte for byte, to the master known at accept time

use std::io;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sentinel_proxy::config::{Config, LogFormat};
use sentinel_proxy::pidfile::PidFile;
use sentinel_proxy::{DiscoveryCoordinator, Listener, ListenerConfig, MasterRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Initialize tracing (prefer RUST_LOG, fallback to --log-level)
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!("Starting sentinel-proxy");
    info!(
        listen = %config.listen,
        master_name = %config.master_name,
        sentinel_count = config.sentinels.len(),
        "Configuration loaded"
    );

    let _pid_file = config
        .pid_file
        .as_deref()
        .map(PidFile::create)
        .transpose()
        .context("Unable to create pid file")?;

    let registry = Arc::new(MasterRegistry::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = Listener::bind(
        ListenerConfig::new(config.listen.clone()),
        Arc::clone(&registry),
    )
    .await
    .with_context(|| format!("Failed to bind listener on {}", config.listen))?;

    let coordinator = DiscoveryCoordinator::new(config.discovery(), Arc::clone(&registry));
    let discovery_handle = tokio::spawn(coordinator.run(shutdown_rx.clone()));

    let mut listener_handle = tokio::spawn(Arc::new(listener).run(shutdown_rx));

    let outcome = tokio::select! {
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            Ok(())
        }
        result = &mut listener_handle => listener_outcome(result),
    };

    // Signal shutdown to discovery and the accept loop; open sessions are not drained.
    let _ = shutdown_tx.send(true);
    let _ = discovery_handle.await;
    if !listener_handle.is_finished() {
        let _ = listener_handle.await;
    }

    info!("sentinel-proxy shutdown complete");
    outcome
}

/// Map the listener task's end to the process result. The accept loop only
/// returns on its own when something went wrong.
fn listener_outcome(result: Result<io::Result<()>, JoinError>) -> Result<()> {
    match result {
        Ok(Ok(())) => {
            info!("Listener exited");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Listener error");
            Err(anyhow::Error::new(e).context("Listener failed"))
        }
        Err(e) => {
            error!(error = %e, "Listener task panicked");
            Err(anyhow!("Listener task panicked: {e}"))
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
