//! Fan-in of sentinel reports into the master registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument};

use super::client::{MasterReport, RetryPolicy, SentinelClient};
use crate::endpoint::EndpointAddress;
use crate::registry::SharedMasterRegistry;

/// Default window after which a silent sentinel set is reported.
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(2);

/// Configuration for master discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Sentinels to poll, one client each.
    pub sentinels: Vec<EndpointAddress>,
    /// Name of the monitored master.
    pub master_name: String,
    /// Silence longer than this logs a liveness warning.
    pub liveness_window: Duration,
    /// Retry behavior shared by every client.
    pub retry: RetryPolicy,
}

impl DiscoveryConfig {
    /// Create a discovery configuration with default timings.
    pub fn new(sentinels: Vec<EndpointAddress>, master_name: impl Into<String>) -> Self {
        Self {
            sentinels,
            master_name: master_name.into(),
            liveness_window: DEFAULT_LIVENESS_WINDOW,
            retry: RetryPolicy::default(),
        }
    }
}

/// Counters for the discovery loop.
#[derive(Debug, Default)]
pub struct DiscoveryStats {
    /// Reports written into the registry.
    pub reports_applied: AtomicU64,
    /// Reports that changed the registry value.
    pub master_changes: AtomicU64,
    /// Liveness windows that passed without a report.
    pub liveness_warnings: AtomicU64,
}

/// Runs one `SentinelClient` per sentinel and applies their reports.
///
/// Reports are applied in arrival order with no quorum: whichever sentinel
/// reports last decides the registry value.
pub struct DiscoveryCoordinator {
    config: DiscoveryConfig,
    registry: SharedMasterRegistry,
    stats: Arc<DiscoveryStats>,
}

impl DiscoveryCoordinator {
    pub fn new(config: DiscoveryConfig, registry: SharedMasterRegistry) -> Self {
        Self {
            config,
            registry,
            stats: Arc::new(DiscoveryStats::default()),
        }
    }

    /// Shared handle to the discovery counters.
    pub fn stats(&self) -> Arc<DiscoveryStats> {
        Arc::clone(&self.stats)
    }

    /// Run until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let (tx, mut rx) = mpsc::channel(self.config.sentinels.len().max(1));
        let mut clients = JoinSet::new();

        for sentinel in &self.config.sentinels {
            let client = SentinelClient::new(
                sentinel.clone(),
                self.config.master_name.clone(),
                self.config.retry.clone(),
                tx.clone(),
            );
            let span = sentinel_span(client.sentinel());
            clients.spawn(client.run().instrument(span));
        }
        drop(tx);

        info!(
            master_name = %self.config.master_name,
            sentinel_count = self.config.sentinels.len(),
            "Master discovery started"
        );

        loop {
            tokio::select! {
                report = timeout(self.config.liveness_window, rx.recv()) => {
                    match report {
                        Ok(Some(report)) => self.apply(report),
                        Ok(None) => {
                            warn!("All sentinel clients exited");
                            break;
                        }
                        Err(_) => {
                            self.stats.liveness_warnings.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                window_ms = self.config.liveness_window.as_millis() as u64,
                                current_master = ?self.registry.get().map(|m| m.to_string()),
                                "No sentinel responded within liveness window"
                            );
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Master discovery shutting down");
                        break;
                    }
                }
            }
        }

        clients.shutdown().await;
    }

    fn apply(&self, report: MasterReport) {
        let previous = self.registry.set(report.master.clone());
        self.stats.reports_applied.fetch_add(1, Ordering::Relaxed);

        if previous.as_deref() == Some(&report.master) {
            debug!(sentinel = %report.sentinel, master = %report.master, "Master unchanged");
            return;
        }

        self.stats.master_changes.fetch_add(1, Ordering::Relaxed);
        info!(
            sentinel = %report.sentinel,
            master = %report.master,
            previous = ?previous.map(|m| m.to_string()),
            "Master address updated"
        );
    }
}

fn sentinel_span(sentinel: &EndpointAddress) -> tracing::Span {
    tracing::info_span!("sentinel", sentinel = %sentinel)
}
