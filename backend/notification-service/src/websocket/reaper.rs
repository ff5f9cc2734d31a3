/// Background eviction of connections that vanished without a disconnect
use super::gateway::RealtimeGateway;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

pub struct ConnectionReaper {
    gateway: RealtimeGateway,
    interval: Duration,
    client_timeout: Duration,
}

impl ConnectionReaper {
    pub fn new(gateway: RealtimeGateway, interval: Duration, client_timeout: Duration) -> Self {
        Self {
            gateway,
            interval,
            client_timeout,
        }
    }

    /// Sweep once. Returns the number of evicted connections.
    pub async fn sweep(&self) -> usize {
        self.gateway.evict_stale(self.client_timeout).await
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            client_timeout_secs = self.client_timeout.as_secs(),
            "Connection reaper starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Connection reaper shutting down");
                        break;
                    }
                }
                _ = interval.tick() => {
                    let evicted = self.sweep().await;
                    if evicted > 0 {
                        info!(evicted, "Evicted stale connections");
                    } else {
                        debug!("No stale connections");
                    }
                }
            }
        }
    }
}
