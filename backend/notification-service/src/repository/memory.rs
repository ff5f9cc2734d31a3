use super::{EmailJobQueue, EmailQueueStats, NotificationStore, UserDirectory};
use crate::error::{AppError, Result};
use crate::models::{EmailJob, EmailJobStatus, Notification};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Notification store kept in process memory.
#[derive(Clone, Default)]
pub struct InMemoryNotificationStore {
    records: Arc<RwLock<HashMap<Uuid, Notification>>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record regardless of owner or expiry.
    pub async fn all(&self) -> Vec<Notification> {
        self.records.read().await.values().cloned().collect()
    }
}

fn visible(n: &Notification, user_id: Uuid, now: DateTime<Utc>) -> bool {
    n.user_id == user_id && !n.is_expired(now)
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<Notification> {
        let mut records = self.records.write().await;
        if records.contains_key(&notification.id) {
            return Err(AppError::Database(format!(
                "duplicate notification id {}",
                notification.id
            )));
        }
        records.insert(notification.id, notification.clone());
        Ok(notification.clone())
    }

    async fn get(&self, id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<Notification>> {
        let records = self.records.read().await;
        Ok(records
            .get(&id)
            .filter(|n| visible(n, user_id, now))
            .cloned())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        let records = self.records.read().await;
        let mut list: Vec<Notification> = records
            .values()
            .filter(|n| visible(n, user_id, now) && (!unread_only || !n.is_read))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.truncate(limit.max(0) as usize);
        Ok(list)
    }

    async fn count_unread(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<i64> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|n| visible(n, user_id, now) && !n.is_read)
            .count() as i64)
    }

    async fn mark_read(&self, id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(n) if visible(n, user_id, now) => {
                if !n.is_read {
                    n.is_read = true;
                    n.read_at = Some(now);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_all_read(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let mut updated = 0;
        for n in records.values_mut() {
            if visible(n, user_id, now) && !n.is_read {
                n.is_read = true;
                n.read_at = Some(now);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get(&id) {
            Some(n) if n.user_id == user_id => {
                records.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, n| n.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

/// Email queue kept in process memory. A single mutex makes claims atomic.
#[derive(Clone, Default)]
pub struct InMemoryEmailJobQueue {
    jobs: Arc<Mutex<HashMap<Uuid, EmailJob>>>,
}

impl InMemoryEmailJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn job(&self, id: Uuid) -> Option<EmailJob> {
        self.jobs.lock().await.get(&id).cloned()
    }

    pub async fn jobs(&self) -> Vec<EmailJob> {
        self.jobs.lock().await.values().cloned().collect()
    }

    async fn update<F>(&self, id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut EmailJob) + Send,
    {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::Queue(format!("email job {} not found", id)))?;
        f(job);
        job.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl EmailJobQueue for InMemoryEmailJobQueue {
    async fn enqueue(&self, job: &EmailJob) -> Result<()> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<EmailJob>> {
        let mut jobs = self.jobs.lock().await;
        let mut due: Vec<&mut EmailJob> = jobs
            .values_mut()
            .filter(|j| j.status == EmailJobStatus::Queued && j.next_attempt_at <= now)
            .collect();
        due.sort_by_key(|j| j.next_attempt_at);

        let claimed = due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|job| {
                job.status = EmailJobStatus::Sending;
                job.updated_at = now;
                job.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn mark_sent(&self, id: Uuid) -> Result<()> {
        self.update(id, |job| {
            job.status = EmailJobStatus::Sent;
            job.last_error = None;
        })
        .await
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempt_count: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        let last_error = last_error.to_string();
        self.update(id, move |job| {
            job.status = EmailJobStatus::Queued;
            job.attempt_count = attempt_count;
            job.next_attempt_at = next_attempt_at;
            job.last_error = Some(last_error);
        })
        .await
    }

    async fn dead_letter(&self, id: Uuid, attempt_count: i32, last_error: &str) -> Result<()> {
        let last_error = last_error.to_string();
        self.update(id, move |job| {
            job.status = EmailJobStatus::DeadLettered;
            job.attempt_count = attempt_count;
            job.last_error = Some(last_error);
        })
        .await
    }

    async fn release(&self, id: Uuid) -> Result<()> {
        self.update(id, |job| {
            if job.status == EmailJobStatus::Sending {
                job.status = EmailJobStatus::Queued;
            }
        })
        .await
    }

    async fn release_in_flight(&self, stale_before: DateTime<Utc>) -> Result<u64> {
        let mut jobs = self.jobs.lock().await;
        let mut released = 0;
        for job in jobs.values_mut() {
            if job.status == EmailJobStatus::Sending && job.updated_at < stale_before {
                job.status = EmailJobStatus::Queued;
                job.updated_at = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn stats(&self) -> Result<EmailQueueStats> {
        let jobs = self.jobs.lock().await;
        let mut stats = EmailQueueStats::default();
        for job in jobs.values() {
            match job.status {
                EmailJobStatus::Queued => stats.queued += 1,
                EmailJobStatus::Sending => stats.sending += 1,
                EmailJobStatus::Sent => stats.sent += 1,
                EmailJobStatus::DeadLettered => stats.dead_lettered += 1,
            }
        }
        Ok(stats)
    }
}

/// Fixed user-to-address map.
#[derive(Clone, Default)]
pub struct InMemoryUserDirectory {
    addresses: Arc<RwLock<HashMap<Uuid, String>>>,
    tenants: Arc<RwLock<HashMap<Uuid, Uuid>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: Uuid, email: impl Into<String>) {
        self.addresses.write().await.insert(user_id, email.into());
    }

    pub async fn set_tenant(&self, user_id: Uuid, tenant_id: Uuid) {
        self.tenants.write().await.insert(user_id, tenant_id);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn email_address(&self, user_id: Uuid) -> Result<Option<String>> {
        Ok(self.addresses.read().await.get(&user_id).cloned())
    }

    async fn tenant_of(&self, user_id: Uuid) -> Result<Option<Uuid>> {
        Ok(self.tenants.read().await.get(&user_id).copied())
    }
}
