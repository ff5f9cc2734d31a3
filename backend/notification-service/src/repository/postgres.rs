use super::{EmailJobQueue, EmailQueueStats, NotificationStore, UserDirectory};
use crate::error::Result;
use crate::models::{
    EmailJob, EmailJobStatus, Notification, NotificationPriority, NotificationType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error};
use uuid::Uuid;

const NOTIFICATION_COLUMNS: &str = "id, user_id, title, message, notification_type, \
     related_entity_id, related_entity_type, is_read, read_at, priority, expires_at, created_at";

const EMAIL_JOB_COLUMNS: &str = "id, recipient, subject, body, is_html, attempt_count, \
     next_attempt_at, status, last_error, created_at, updated_at";

fn notification_from_row(row: &PgRow) -> Notification {
    let notification_type: String = row.get("notification_type");
    let priority: String = row.get("priority");

    Notification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        message: row.get("message"),
        notification_type: NotificationType::parse(&notification_type),
        related_entity_id: row.get("related_entity_id"),
        related_entity_type: row.get("related_entity_type"),
        is_read: row.get("is_read"),
        read_at: row.get("read_at"),
        priority: NotificationPriority::parse(&priority),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

fn email_job_from_row(row: &PgRow) -> EmailJob {
    let status: String = row.get("status");

    EmailJob {
        id: row.get("id"),
        recipient: row.get("recipient"),
        subject: row.get("subject"),
        body: row.get("body"),
        is_html: row.get("is_html"),
        attempt_count: row.get("attempt_count"),
        next_attempt_at: row.get("next_attempt_at"),
        status: EmailJobStatus::parse(&status),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// `notifications` table
#[derive(Clone)]
pub struct PgNotificationStore {
    db: PgPool,
}

impl PgNotificationStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert(&self, n: &Notification) -> Result<Notification> {
        let query = format!(
            r#"
            INSERT INTO notifications (
                id, user_id, title, message, notification_type, related_entity_id,
                related_entity_type, is_read, read_at, priority, expires_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(n.id)
            .bind(n.user_id)
            .bind(&n.title)
            .bind(&n.message)
            .bind(n.notification_type.as_str())
            .bind(n.related_entity_id)
            .bind(&n.related_entity_type)
            .bind(n.is_read)
            .bind(n.read_at)
            .bind(n.priority.as_str())
            .bind(n.expires_at)
            .bind(n.created_at)
            .fetch_one(&self.db)
            .await
            .map_err(|e| {
                error!(user_id = %n.user_id, error = %e, "Failed to insert notification");
                e
            })?;

        Ok(notification_from_row(&row))
    }

    async fn get(&self, id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<Notification>> {
        let query = format!(
            r#"
            SELECT {}
            FROM notifications
            WHERE id = $1 AND user_id = $2
              AND (expires_at IS NULL OR expires_at > $3)
            "#,
            NOTIFICATION_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(id)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.as_ref().map(notification_from_row))
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        let query = format!(
            r#"
            SELECT {}
            FROM notifications
            WHERE user_id = $1
              AND ($2 = false OR is_read = false)
              AND (expires_at IS NULL OR expires_at > $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#,
            NOTIFICATION_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(unread_only)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.db)
            .await?;

        Ok(rows.iter().map(notification_from_row).collect())
    }

    async fn count_unread(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM notifications
            WHERE user_id = $1 AND is_read = false
              AND (expires_at IS NULL OR expires_at > $2)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }

    async fn mark_read(&self, id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        // COALESCE keeps the first read time on repeated calls
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = true, read_at = COALESCE(read_at, $3)
            WHERE id = $1 AND user_id = $2
              AND (expires_at IS NULL OR expires_at > $3)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = true, read_at = $2
            WHERE user_id = $1 AND is_read = false
              AND (expires_at IS NULL OR expires_at > $2)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;

        debug!(cutoff = %cutoff, deleted = result.rows_affected(), "Purged old notifications");
        Ok(result.rows_affected())
    }
}

/// `email_jobs` table
#[derive(Clone)]
pub struct PgEmailJobQueue {
    db: PgPool,
}

impl PgEmailJobQueue {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EmailJobQueue for PgEmailJobQueue {
    async fn enqueue(&self, job: &EmailJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO email_jobs (
                id, recipient, subject, body, is_html, attempt_count,
                next_attempt_at, status, last_error, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id)
        .bind(&job.recipient)
        .bind(&job.subject)
        .bind(&job.body)
        .bind(job.is_html)
        .bind(job.attempt_count)
        .bind(job.next_attempt_at)
        .bind(job.status.as_str())
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<EmailJob>> {
        // SKIP LOCKED lets several workers claim disjoint batches
        let query = format!(
            r#"
            UPDATE email_jobs
            SET status = 'sending', updated_at = $1
            WHERE id IN (
                SELECT id FROM email_jobs
                WHERE status = 'queued' AND next_attempt_at <= $1
                ORDER BY next_attempt_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            EMAIL_JOB_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.db)
            .await?;

        Ok(rows.iter().map(email_job_from_row).collect())
    }

    async fn mark_sent(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'sent', last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempt_count: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'queued', attempt_count = $2, next_attempt_at = $3,
                last_error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .bind(next_attempt_at)
        .bind(last_error)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn dead_letter(&self, id: Uuid, attempt_count: i32, last_error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'dead_lettered', attempt_count = $2, last_error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .bind(last_error)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn release(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'queued', updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn release_in_flight(&self, stale_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'queued', updated_at = NOW()
            WHERE status = 'sending' AND updated_at < $1
            "#,
        )
        .bind(stale_before)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<EmailQueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM email_jobs GROUP BY status")
            .fetch_all(&self.db)
            .await?;

        let mut stats = EmailQueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            match EmailJobStatus::parse(&status) {
                EmailJobStatus::Queued => stats.queued = count,
                EmailJobStatus::Sending => stats.sending = count,
                EmailJobStatus::Sent => stats.sent = count,
                EmailJobStatus::DeadLettered => stats.dead_lettered = count,
            }
        }
        Ok(stats)
    }
}

/// Reads addresses and company membership from the shared `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    db: PgPool,
}

impl PgUserDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn email_address(&self, user_id: Uuid) -> Result<Option<String>> {
        let email: Option<Option<String>> =
            sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;

        Ok(email.flatten().filter(|e| !e.trim().is_empty()))
    }

    async fn tenant_of(&self, user_id: Uuid) -> Result<Option<Uuid>> {
        let tenant: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT company_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;

        Ok(tenant.flatten())
    }
}
