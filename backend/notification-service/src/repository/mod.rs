/// Persistence ports
///
/// The service and worker only see these traits. `postgres` backs them with
/// sqlx; `memory` backs them with lock-guarded maps for tests and local runs.
use crate::error::Result;
use crate::models::{EmailJob, Notification};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryEmailJobQueue, InMemoryNotificationStore, InMemoryUserDirectory};
pub use postgres::{PgEmailJobQueue, PgNotificationStore, PgUserDirectory};

/// Durable notification records.
///
/// Every per-record mutation is scoped to `(id, user_id)`; a record owned by
/// someone else is reported as "not affected", never as an error. Expired
/// records are invisible to reads and unread counts.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<Notification>;

    async fn get(&self, id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<Notification>>;

    /// Newest first.
    async fn list_for_user(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>>;

    async fn count_unread(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<i64>;

    async fn mark_read(&self, id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn mark_all_read(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64>;

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool>;

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Queue depth by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmailQueueStats {
    pub queued: i64,
    pub sending: i64,
    pub sent: i64,
    pub dead_lettered: i64,
}

/// Durable email job queue.
///
/// `claim_due` must move jobs from `Queued` to `Sending` atomically so that
/// concurrent workers never receive the same job.
#[async_trait]
pub trait EmailJobQueue: Send + Sync {
    async fn enqueue(&self, job: &EmailJob) -> Result<()>;

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<EmailJob>>;

    async fn mark_sent(&self, id: Uuid) -> Result<()>;

    /// Back to `Queued` with the bumped attempt count.
    async fn reschedule(
        &self,
        id: Uuid,
        attempt_count: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()>;

    async fn dead_letter(&self, id: Uuid, attempt_count: i32, last_error: &str) -> Result<()>;

    /// Return a claimed but unattempted job to `Queued` unchanged.
    async fn release(&self, id: Uuid) -> Result<()>;

    /// Recover jobs stranded in `Sending` by a crashed worker: those last
    /// touched before `stale_before`. Fresher claims belong to a live worker.
    async fn release_in_flight(&self, stale_before: DateTime<Utc>) -> Result<u64>;

    async fn stats(&self) -> Result<EmailQueueStats>;
}

/// Read-only view of the shared user table.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn email_address(&self, user_id: Uuid) -> Result<Option<String>>;

    /// Company the user belongs to; `None` for unknown users.
    async fn tenant_of(&self, user_id: Uuid) -> Result<Option<Uuid>>;
}
