/// Periodic purge of old notifications
use super::NotificationService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

pub struct RetentionSweeper {
    service: Arc<NotificationService>,
    days_to_keep: i64,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(service: Arc<NotificationService>, days_to_keep: i64, interval: Duration) -> Self {
        Self {
            service,
            days_to_keep,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            days_to_keep = self.days_to_keep,
            interval_secs = self.interval.as_secs(),
            "Retention sweeper starting"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Retention sweeper shutting down");
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.service.delete_old_notifications(self.days_to_keep).await {
                        Ok(deleted) => info!(deleted, "Retention sweep complete"),
                        Err(e) => error!(error = %e, "Retention sweep failed"),
                    }
                }
            }
        }
    }
}
