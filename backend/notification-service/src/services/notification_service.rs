/// Notification service core
///
/// Persists notifications, pushes them to connected recipients and queues
/// emails for the types that warrant one. Persistence is the only step that
/// can fail a `create`; the live push and the email enqueue are best-effort
/// once the record is durable.
use super::templates::{self, EmailSettings};
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{
    CreateNotification, EmailJob, Notification, NotificationPriority, NotificationType,
    TaskSummary,
};
use crate::repository::{EmailJobQueue, NotificationStore, UserDirectory};
use crate::websocket::{GroupKey, PushOutcome, RealtimeGateway, ServerEvent};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

const TASK_ENTITY_TYPE: &str = "Task";

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    email_queue: Arc<dyn EmailJobQueue>,
    directory: Arc<dyn UserDirectory>,
    gateway: RealtimeGateway,
    email_settings: EmailSettings,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        email_queue: Arc<dyn EmailJobQueue>,
        directory: Arc<dyn UserDirectory>,
        gateway: RealtimeGateway,
        email_settings: EmailSettings,
    ) -> Self {
        Self {
            store,
            email_queue,
            directory,
            gateway,
            email_settings,
        }
    }

    pub fn gateway(&self) -> &RealtimeGateway {
        &self.gateway
    }

    pub fn email_queue(&self) -> &Arc<dyn EmailJobQueue> {
        &self.email_queue
    }

    /// Persist, then push, then queue the email.
    pub async fn create(&self, request: CreateNotification) -> Result<Notification> {
        if request.title.trim().is_empty() {
            return Err(AppError::Validation("title must not be empty".to_string()));
        }

        let notification = self
            .store
            .insert(&request.into_notification(Utc::now()))
            .await?;

        metrics::record_notification_created(notification.notification_type.as_str());
        info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            notification_type = notification.notification_type.as_str(),
            "Created notification"
        );

        let outcome = self
            .gateway
            .push_to_user(notification.user_id, ServerEvent::notification(notification.clone()))
            .await;
        if let PushOutcome::NotConnected = outcome {
            debug!(user_id = %notification.user_id, "Recipient offline; live push skipped");
        }

        if notification.notification_type.is_email_eligible() {
            self.enqueue_email(&notification).await;
        }

        Ok(notification)
    }

    async fn enqueue_email(&self, notification: &Notification) {
        let Some(rendered) = templates::render(notification, &self.email_settings) else {
            return;
        };

        let recipient = match self.directory.email_address(notification.user_id).await {
            Ok(Some(address)) => address,
            Ok(None) => {
                warn!(user_id = %notification.user_id, "No email address on file; email skipped");
                return;
            }
            Err(e) => {
                error!(user_id = %notification.user_id, error = %e, "Email address lookup failed");
                return;
            }
        };

        let job = EmailJob::new(recipient, rendered.subject, rendered.html_body, true);
        match self.email_queue.enqueue(&job).await {
            Ok(()) => {
                metrics::record_email_job("enqueued");
                debug!(job_id = %job.id, notification_id = %notification.id, "Email job queued");
            }
            Err(e) => error!(
                notification_id = %notification.id,
                error = %e,
                "Failed to enqueue notification email"
            ),
        }
    }

    pub async fn get_notification(&self, id: Uuid, user_id: Uuid) -> Result<Option<Notification>> {
        self.store.get(id, user_id, Utc::now()).await
    }

    /// Newest first. `limit` defaults to 50 and is clamped to 1..=200.
    pub async fn get_user_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: Option<i64>,
    ) -> Result<Vec<Notification>> {
        let limit = limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        self.store
            .list_for_user(user_id, unread_only, limit, Utc::now())
            .await
    }

    pub async fn get_unread_count(&self, user_id: Uuid) -> Result<i64> {
        self.store.count_unread(user_id, Utc::now()).await
    }

    /// `Ok(false)` when the notification does not exist or belongs to someone else.
    pub async fn mark_as_read(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let updated = self.store.mark_read(id, user_id, Utc::now()).await?;
        if !updated {
            debug!(notification_id = %id, user_id = %user_id, "mark_as_read matched nothing");
        }
        Ok(updated)
    }

    pub async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64> {
        let updated = self.store.mark_all_read(user_id, Utc::now()).await?;
        debug!(user_id = %user_id, updated, "Marked all notifications read");
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        self.store.delete(id, user_id).await
    }

    /// Purge notifications created more than `days_to_keep` days ago.
    pub async fn delete_old_notifications(&self, days_to_keep: i64) -> Result<u64> {
        if days_to_keep < 1 {
            return Err(AppError::Validation(
                "days_to_keep must be at least 1".to_string(),
            ));
        }

        let cutoff = Duration::try_days(days_to_keep)
            .and_then(|keep| Utc::now().checked_sub_signed(keep))
            .ok_or_else(|| {
                AppError::Validation(format!("days_to_keep {} is out of range", days_to_keep))
            })?;
        let deleted = self.store.delete_created_before(cutoff).await?;
        metrics::record_retention_deleted(deleted);
        info!(days_to_keep, deleted, "Deleted old notifications");
        Ok(deleted)
    }

    pub async fn send_task_assignment_notification(
        &self,
        task: &TaskSummary,
        assignee_id: Uuid,
    ) -> Result<Notification> {
        let message = match &task.project_name {
            Some(project) => format!(
                "You have been assigned to \"{}\" in {}.",
                task.title, project
            ),
            None => format!("You have been assigned to \"{}\".", task.title),
        };

        self.create(
            CreateNotification::new(
                assignee_id,
                "Task Assigned",
                with_due_date(message, task),
                NotificationType::Assignment,
            )
            .related_to(task.id, TASK_ENTITY_TYPE),
        )
        .await
    }

    pub async fn send_task_status_update_notification(
        &self,
        task: &TaskSummary,
        user_id: Uuid,
        old_status: &str,
        new_status: &str,
    ) -> Result<Notification> {
        self.create(
            CreateNotification::new(
                user_id,
                "Task Status Updated",
                format!(
                    "\"{}\" moved from {} to {}.",
                    task.title, old_status, new_status
                ),
                NotificationType::StatusChange,
            )
            .related_to(task.id, TASK_ENTITY_TYPE),
        )
        .await
    }

    pub async fn send_task_reminder_notification(
        &self,
        task: &TaskSummary,
        user_id: Uuid,
    ) -> Result<Notification> {
        let message = with_due_date(format!("Reminder: \"{}\" is coming up.", task.title), task);

        self.create(
            CreateNotification::new(user_id, "Task Reminder", message, NotificationType::Reminder)
                .related_to(task.id, TASK_ENTITY_TYPE)
                .with_priority(NotificationPriority::High),
        )
        .await
    }

    pub async fn send_task_overdue_notification(
        &self,
        task: &TaskSummary,
        user_id: Uuid,
    ) -> Result<Notification> {
        let message = with_due_date(format!("\"{}\" is overdue.", task.title), task);

        self.create(
            CreateNotification::new(user_id, "Task Overdue", message, NotificationType::Overdue)
                .related_to(task.id, TASK_ENTITY_TYPE)
                .with_priority(NotificationPriority::Urgent),
        )
        .await
    }

    /// Push a task change to everyone watching the task. Returns the number
    /// of sockets reached.
    pub async fn broadcast_task_update(&self, task_id: Uuid, update: serde_json::Value) -> usize {
        self.gateway
            .push_to_group(GroupKey::task(task_id), ServerEvent::task_update(task_id, update))
            .await
    }

    /// `broadcast_task_update` limited to watchers in `tenant_id`.
    pub async fn broadcast_task_update_in_tenant(
        &self,
        tenant_id: Uuid,
        task_id: Uuid,
        update: serde_json::Value,
    ) -> usize {
        self.gateway
            .push_to_group_in_tenant(
                GroupKey::task(task_id),
                tenant_id,
                ServerEvent::task_update(task_id, update),
            )
            .await
    }

    /// Whether `user_id` belongs to `tenant_id`. Unknown users belong nowhere.
    pub async fn is_tenant_member(&self, user_id: Uuid, tenant_id: Uuid) -> Result<bool> {
        Ok(self.directory.tenant_of(user_id).await? == Some(tenant_id))
    }

    pub async fn broadcast_to_company(&self, tenant_id: Uuid, event: ServerEvent) -> usize {
        self.gateway
            .push_to_group(GroupKey::company(tenant_id), event)
            .await
    }
}

fn with_due_date(message: String, task: &TaskSummary) -> String {
    match task.due_date {
        Some(due) => format!("{} Due {}.", message, due.format("%Y-%m-%d %H:%M UTC")),
        None => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryEmailJobQueue, InMemoryNotificationStore, InMemoryUserDirectory};
    use crate::websocket::{ConnectionId, ConnectionRegistry};
    use tokio::sync::mpsc;

    struct Fixture {
        service: NotificationService,
        store: InMemoryNotificationStore,
        queue: InMemoryEmailJobQueue,
        directory: InMemoryUserDirectory,
    }

    fn fixture() -> Fixture {
        let store = InMemoryNotificationStore::new();
        let queue = InMemoryEmailJobQueue::new();
        let directory = InMemoryUserDirectory::new();
        let service = NotificationService::new(
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            Arc::new(directory.clone()),
            RealtimeGateway::new(ConnectionRegistry::new()),
            EmailSettings::default(),
        );
        Fixture {
            service,
            store,
            queue,
            directory,
        }
    }

    fn task() -> TaskSummary {
        TaskSummary {
            id: Uuid::new_v4(),
            title: "Write report".to_string(),
            status: "Todo".to_string(),
            due_date: None,
            project_name: Some("Q3".to_string()),
        }
    }

    #[tokio::test]
    async fn test_empty_title_is_rejected_before_persisting() {
        let f = fixture();
        let err = f
            .service
            .create(CreateNotification::new(Uuid::new_v4(), "  ", "m", NotificationType::System))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(f.store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_pushes_to_connected_user() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        f.service
            .gateway()
            .on_connect(user_id, Uuid::new_v4(), ConnectionId::new(), tx)
            .await;
        rx.recv().await; // Connected

        let created = f
            .service
            .create(CreateNotification::new(user_id, "Hi", "there", NotificationType::Comment))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(ServerEvent::notification(created)));
    }

    #[tokio::test]
    async fn test_comment_does_not_queue_email() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        f.directory.insert(user_id, "user@example.com").await;

        f.service
            .create(CreateNotification::new(user_id, "Hi", "there", NotificationType::Comment))
            .await
            .unwrap();
        assert!(f.queue.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_assignment_queues_email() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        f.directory.insert(user_id, "user@example.com").await;

        let n = f
            .service
            .send_task_assignment_notification(&task(), user_id)
            .await
            .unwrap();
        assert_eq!(n.title, "Task Assigned");
        assert_eq!(n.related_entity_type.as_deref(), Some("Task"));
        assert!(n.message.contains("Q3"));

        let jobs = f.queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].recipient, "user@example.com");
        assert!(jobs[0].is_html);
    }

    #[tokio::test]
    async fn test_missing_address_still_creates() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let n = f
            .service
            .send_task_overdue_notification(&task(), user_id)
            .await
            .unwrap();

        assert_eq!(n.priority, NotificationPriority::Urgent);
        assert_eq!(f.service.get_unread_count(user_id).await.unwrap(), 1);
        assert!(f.queue.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_update_message() {
        let f = fixture();
        let n = f
            .service
            .send_task_status_update_notification(&task(), Uuid::new_v4(), "Todo", "Done")
            .await
            .unwrap();
        assert_eq!(n.notification_type, NotificationType::StatusChange);
        assert!(n.message.contains("from Todo to Done"));
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        for i in 0..3 {
            f.service
                .create(CreateNotification::new(
                    user_id,
                    format!("n{}", i),
                    "m",
                    NotificationType::System,
                ))
                .await
                .unwrap();
        }

        let one = f
            .service
            .get_user_notifications(user_id, false, Some(0))
            .await
            .unwrap();
        assert_eq!(one.len(), 1);

        let all = f
            .service
            .get_user_notifications(user_id, false, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_retention_rejects_zero_days() {
        let f = fixture();
        let err = f.service.delete_old_notifications(0).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_retention_rejects_out_of_range_days() {
        let f = fixture();
        for days in [i64::MAX, 1_000_000_000] {
            let err = f.service.delete_old_notifications(days).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "days = {}", days);
        }
    }
}
