/// Email delivery worker
///
/// Drains the durable email queue through an `EmailTransport`.
///
/// Job lifecycle: `Queued -> Sending -> {Sent | Queued (retry) | DeadLettered}`.
///
/// - Permanent failures dead-letter on the first attempt.
/// - Transient failures and timeouts retry with exponential backoff until
///   `max_attempts` is reached, then dead-letter.
/// - Dead-lettered jobs are never claimed again.
/// - A transport panic counts as a transient failure.
/// - Jobs stuck in `Sending` past the in-flight lease belong to a dead
///   worker and go back to `Queued`.
/// - On shutdown the in-flight send finishes and any claimed but unstarted
///   jobs go back to `Queued`.
use super::email_transport::{EmailTransport, OutboundEmail, SendError};
use crate::config::EmailWorkerConfig;
use crate::error::Result;
use crate::metrics;
use crate::models::EmailJob;
use crate::repository::EmailJobQueue;
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Retry policy for transient send failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt number `attempt`
    /// (1-based): `base * 2^(attempt-1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: i32) -> Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 31) as u32;
        self.base_backoff
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn should_retry(&self, attempt: i32) -> bool {
        attempt < self.max_attempts
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EmailWorkerSettings {
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub send_timeout: Duration,
}

impl Default for EmailWorkerSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(1),
            batch_size: 20,
            send_timeout: Duration::from_secs(30),
        }
    }
}

impl EmailWorkerSettings {
    /// Longest a live worker can hold a claimed job: every job of a full
    /// batch ahead of it timing out, plus its own send.
    pub fn in_flight_lease(&self) -> Duration {
        let slots = u32::try_from(self.batch_size.max(0) + 1).unwrap_or(u32::MAX);
        self.send_timeout.saturating_mul(slots)
    }
}

impl From<&EmailWorkerConfig> for EmailWorkerSettings {
    fn from(config: &EmailWorkerConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                base_backoff: Duration::from_secs(config.base_backoff_secs),
                max_backoff: Duration::from_secs(config.max_backoff_secs),
            },
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            batch_size: config.batch_size,
            send_timeout: Duration::from_secs(config.send_timeout_secs),
        }
    }
}

/// What one claim-and-send pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub released: usize,
}

/// Totals over the worker's lifetime, returned when `run` exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub recovered: u64,
    pub batches: usize,
    pub sent: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub released: usize,
}

impl WorkerReport {
    fn absorb(&mut self, batch: &BatchReport) {
        if batch.claimed > 0 {
            self.batches += 1;
        }
        self.sent += batch.sent;
        self.retried += batch.retried;
        self.dead_lettered += batch.dead_lettered;
        self.released += batch.released;
    }
}

enum JobOutcome {
    Sent,
    Retried,
    DeadLettered,
}

pub struct EmailDeliveryWorker {
    queue: Arc<dyn EmailJobQueue>,
    transport: Arc<dyn EmailTransport>,
    settings: EmailWorkerSettings,
}

impl EmailDeliveryWorker {
    pub fn new(
        queue: Arc<dyn EmailJobQueue>,
        transport: Arc<dyn EmailTransport>,
        settings: EmailWorkerSettings,
    ) -> Self {
        Self {
            queue,
            transport,
            settings,
        }
    }

    /// Claim one batch of due jobs and attempt each of them.
    pub async fn process_batch(&self) -> Result<BatchReport> {
        self.claim_and_process(None).await
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> WorkerReport {
        info!(
            batch_size = self.settings.batch_size,
            max_attempts = self.settings.retry.max_attempts,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Email delivery worker starting"
        );

        let mut report = WorkerReport {
            recovered: self.recover_abandoned().await,
            ..Default::default()
        };
        let mut last_recovery = Instant::now();

        if let Ok(stats) = self.queue.stats().await {
            info!(
                queued = stats.queued,
                dead_lettered = stats.dead_lettered,
                "Email queue depth"
            );
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            if last_recovery.elapsed() >= self.settings.in_flight_lease() {
                report.recovered += self.recover_abandoned().await;
                last_recovery = Instant::now();
            }

            match self.claim_and_process(Some(&shutdown)).await {
                Ok(batch) => {
                    report.absorb(&batch);
                    // Claimed work means more may be waiting
                    if batch.claimed > 0 && batch.released == 0 {
                        continue;
                    }
                }
                Err(e) => error!(error = %e, "Email batch failed"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        info!(
            sent = report.sent,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            released = report.released,
            "Email delivery worker stopped"
        );
        report
    }

    /// Release jobs whose claim outlived the in-flight lease.
    async fn recover_abandoned(&self) -> u64 {
        let lease = chrono::Duration::from_std(self.settings.in_flight_lease())
            .unwrap_or_else(|_| chrono::Duration::days(1));
        match self.queue.release_in_flight(Utc::now() - lease).await {
            Ok(0) => 0,
            Ok(recovered) => {
                warn!(recovered, "Released email jobs abandoned by a dead worker");
                recovered
            }
            Err(e) => {
                error!(error = %e, "Failed to release abandoned email jobs");
                0
            }
        }
    }

    async fn claim_and_process(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<BatchReport> {
        let jobs = self
            .queue
            .claim_due(Utc::now(), self.settings.batch_size)
            .await?;

        let mut report = BatchReport {
            claimed: jobs.len(),
            ..Default::default()
        };
        if jobs.is_empty() {
            return Ok(report);
        }
        debug!(claimed = jobs.len(), "Claimed email jobs");

        let mut jobs = jobs.into_iter();
        while let Some(job) = jobs.next() {
            if shutdown.map(|rx| *rx.borrow()).unwrap_or(false) {
                for pending in std::iter::once(job).chain(jobs.by_ref()) {
                    match self.queue.release(pending.id).await {
                        Ok(()) => report.released += 1,
                        Err(e) => error!(job_id = %pending.id, error = %e, "Failed to release email job"),
                    }
                }
                break;
            }

            match self.deliver(job).await {
                JobOutcome::Sent => report.sent += 1,
                JobOutcome::Retried => report.retried += 1,
                JobOutcome::DeadLettered => report.dead_lettered += 1,
            }
        }

        Ok(report)
    }

    async fn deliver(&self, job: EmailJob) -> JobOutcome {
        let email = OutboundEmail {
            recipient: job.recipient.clone(),
            subject: job.subject.clone(),
            body: job.body.clone(),
            is_html: job.is_html,
        };

        let send = AssertUnwindSafe(self.transport.send(&email)).catch_unwind();
        let result = match tokio::time::timeout(self.settings.send_timeout, send).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SendError::Transient("transport panicked".to_string())),
            Err(_) => Err(SendError::Transient(format!(
                "send timed out after {:?}",
                self.settings.send_timeout
            ))),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.mark_sent(job.id).await {
                    error!(job_id = %job.id, error = %e, "Failed to record sent email");
                }
                info!(job_id = %job.id, recipient = %job.recipient, "Email sent");
                metrics::record_email_job("sent");
                JobOutcome::Sent
            }
            Err(SendError::Permanent(reason)) => {
                let attempts = job.attempt_count + 1;
                self.dead_letter(&job, attempts, &reason).await;
                JobOutcome::DeadLettered
            }
            Err(SendError::Transient(reason)) => {
                let attempts = job.attempt_count + 1;
                if !self.settings.retry.should_retry(attempts) {
                    self.dead_letter(&job, attempts, &reason).await;
                    return JobOutcome::DeadLettered;
                }

                let delay = self.settings.retry.backoff(attempts);
                let next_attempt_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

                if let Err(e) = self
                    .queue
                    .reschedule(job.id, attempts, next_attempt_at, &reason)
                    .await
                {
                    error!(job_id = %job.id, error = %e, "Failed to reschedule email job");
                }
                warn!(
                    job_id = %job.id,
                    attempt = attempts,
                    max_attempts = self.settings.retry.max_attempts,
                    backoff_secs = delay.as_secs(),
                    error = %reason,
                    "Email send failed, will retry"
                );
                metrics::record_email_job("retried");
                JobOutcome::Retried
            }
        }
    }

    async fn dead_letter(&self, job: &EmailJob, attempts: i32, reason: &str) {
        if let Err(e) = self.queue.dead_letter(job.id, attempts, reason).await {
            error!(job_id = %job.id, error = %e, "Failed to dead-letter email job");
        }
        error!(
            job_id = %job.id,
            recipient = %job.recipient,
            attempts,
            error = %reason,
            "Email job moved to dead letter"
        );
        metrics::record_email_job("dead_lettered");
    }
}
