//! Registry maintenance loop
//!
//! Background task that keeps this process's own heartbeat fresh and
//! periodically evicts stale records from the shared registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::DiscoveryClient;

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Periodic heartbeat and sweep driver for one process.
///
/// `start` spawns a single task multiplexing both timers; `shutdown` stops
/// it via the cancellation token.
pub struct RegistryMaintenance {
    discovery: Arc<DiscoveryClient>,
    self_name: String,
    heartbeat_interval: Duration,
    sweep_interval: Duration,
    stale_after: Duration,
    cancel_token: CancellationToken,
}

impl RegistryMaintenance {
    #[must_use]
    pub fn new(discovery: Arc<DiscoveryClient>, self_name: impl Into<String>) -> Self {
        Self {
            discovery,
            self_name: self_name.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            cancel_token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Spawn the maintenance task
    pub fn start(&self) -> JoinHandle<()> {
        let discovery = self.discovery.clone();
        let self_name = self.self_name.clone();
        let stale_after = self.stale_after;
        let heartbeat_interval = self.heartbeat_interval;
        let sweep_interval = self.sweep_interval;
        let cancel_token = self.cancel_token.clone();

        tracing::info!(
            service = %self_name,
            heartbeat_interval = ?heartbeat_interval,
            sweep_interval = ?sweep_interval,
            "Starting registry maintenance"
        );

        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(heartbeat_interval);
            let mut sweep = tokio::time::interval(sweep_interval);
            // The first tick of each interval fires immediately
            heartbeat.tick().await;
            sweep.tick().await;

            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        discovery.send_heartbeat(&self_name).await;
                    }
                    _ = sweep.tick() => {
                        let removed = discovery.registry().sweep_stale(stale_after).await;
                        if removed > 0 {
                            tracing::info!(removed, "Swept stale service records");
                        }
                    }
                    () = cancel_token.cancelled() => {
                        tracing::info!(service = %self_name, "Registry maintenance shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Signal the maintenance task to stop
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
