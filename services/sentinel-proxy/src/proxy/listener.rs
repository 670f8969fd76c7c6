//! TCP listener and connection handling.
//!
//! Every accepted connection reads the master registry once and is handed
//! to a `ForwardingSession` bound to that snapshot.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use super::session::ForwardingSession;
use crate::endpoint::EndpointAddress;
use crate::error::SessionError;
use crate::registry::SharedMasterRegistry;

/// Pause after a failed accept before trying again.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: EndpointAddress,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: EndpointAddress) -> Self {
        Self { bind_addr }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Total connections currently active.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Connections closed because no master was known yet.
    pub sessions_without_master: AtomicU64,
    /// Backend connection successes.
    pub backend_connected: AtomicU64,
    /// Backend connection failures.
    pub backend_failed: AtomicU64,
    /// Bytes proxied to backend.
    pub bytes_to_backend: AtomicU64,
    /// Bytes proxied from backend.
    pub bytes_from_backend: AtomicU64,
}

/// The public endpoint clients connect to.
pub struct Listener {
    /// The TCP listener.
    listener: TcpListener,
    /// Source of the master address for new sessions.
    registry: SharedMasterRegistry,
    /// Statistics.
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind the listen address. Failure here is fatal to the caller.
    pub async fn bind(config: ListenerConfig, registry: SharedMasterRegistry) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr.as_pair()).await?;
        let local_addr = listener.local_addr()?;

        info!(bind_addr = %local_addr, "Listener bound");

        Ok(Self {
            listener,
            registry,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Accept connections until shutdown is signalled.
    ///
    /// Accept errors are logged and never end the loop. Sessions already
    /// running are not drained on shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => self.spawn_session(stream, peer_addr),
                    Err(e) => {
                        error!(error = %e, "Accept error");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(bind_addr = %local_addr, "Listener shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        // Bound once; later master changes do not affect this session.
        let master = self.registry.get();

        self.stats
            .connections_accepted
            .fetch_add(1, Ordering::Relaxed);
        self.stats
            .connections_active
            .fetch_add(1, Ordering::Relaxed);

        let stats = Arc::clone(&self.stats);
        let session = ForwardingSession::new(stream, peer_addr, master);

        tokio::spawn(
            async move {
                match session.connect().await {
                    Ok(connected) => {
                        stats.backend_connected.fetch_add(1, Ordering::Relaxed);
                        let summary = connected.forward().await;
                        stats
                            .bytes_to_backend
                            .fetch_add(summary.bytes_to_backend, Ordering::Relaxed);
                        stats
                            .bytes_from_backend
                            .fetch_add(summary.bytes_from_backend, Ordering::Relaxed);
                        debug!(
                            bytes_to_backend = summary.bytes_to_backend,
                            bytes_from_backend = summary.bytes_from_backend,
                            "Connection closed"
                        );
                    }
                    Err(SessionError::NoMaster) => {
                        stats.sessions_without_master.fetch_add(1, Ordering::Relaxed);
                        warn!("No master known yet, closing connection");
                    }
                    Err(e) => {
                        stats.backend_failed.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "Backend connection failed");
                    }
                }

                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                stats.connections_closed.fetch_add(1, Ordering::Relaxed);
            }
            .instrument(connection_span(peer_addr)),
        );
    }
}

fn connection_span(peer_addr: SocketAddr) -> tracing::Span {
    tracing::info_span!("connection", peer_addr = %peer_addr)
}
