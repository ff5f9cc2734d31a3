use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotificationType {
    /// A task was assigned to the recipient
    Assignment,
    /// A task the recipient follows changed status
    StatusChange,
    /// A task is coming due
    Reminder,
    /// A task is past its due date
    Overdue,
    /// Someone commented on a task
    Comment,
    /// The recipient was mentioned
    Mention,
    /// System notification
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Assignment => "Assignment",
            NotificationType::StatusChange => "StatusChange",
            NotificationType::Reminder => "Reminder",
            NotificationType::Overdue => "Overdue",
            NotificationType::Comment => "Comment",
            NotificationType::Mention => "Mention",
            NotificationType::System => "System",
        }
    }

    /// Parse a stored or client-supplied type name. Unknown names map to `System`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().replace(['_', '-', ' '], "").as_str() {
            "assignment" | "taskassigned" => NotificationType::Assignment,
            "statuschange" | "taskstatuschanged" => NotificationType::StatusChange,
            "reminder" | "taskreminder" => NotificationType::Reminder,
            "overdue" | "taskoverdue" => NotificationType::Overdue,
            "comment" => NotificationType::Comment,
            "mention" => NotificationType::Mention,
            _ => NotificationType::System,
        }
    }

    /// Whether creating a notification of this type also queues an email.
    pub fn is_email_eligible(&self) -> bool {
        matches!(
            self,
            NotificationType::Assignment
                | NotificationType::StatusChange
                | NotificationType::Reminder
                | NotificationType::Overdue
        )
    }
}

/// Notification priority level
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "Low",
            NotificationPriority::Normal => "Normal",
            NotificationPriority::High => "High",
            NotificationPriority::Urgent => "Urgent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "low" => NotificationPriority::Low,
            "high" => NotificationPriority::High,
            "urgent" => NotificationPriority::Urgent,
            _ => NotificationPriority::Normal,
        }
    }
}

/// Core notification model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,

    /// Owning user; every read/write is scoped to this id
    pub user_id: Uuid,

    pub title: String,

    pub message: String,

    pub notification_type: NotificationType,

    /// Entity the notification refers to (e.g. a task id)
    pub related_entity_id: Option<Uuid>,

    /// Kind of the related entity (e.g. "Task")
    pub related_entity_type: Option<String>,

    pub is_read: bool,

    pub read_at: Option<DateTime<Utc>>,

    pub priority: NotificationPriority,

    /// After this instant the notification is hidden from queries
    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Request to create a notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotification {
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    #[serde(default)]
    pub related_entity_id: Option<Uuid>,
    #[serde(default)]
    pub related_entity_type: Option<String>,
    #[serde(default)]
    pub priority: NotificationPriority,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateNotification {
    pub fn new(
        user_id: Uuid,
        title: impl Into<String>,
        message: impl Into<String>,
        notification_type: NotificationType,
    ) -> Self {
        Self {
            user_id,
            title: title.into(),
            message: message.into(),
            notification_type,
            related_entity_id: None,
            related_entity_type: None,
            priority: NotificationPriority::Normal,
            expires_at: None,
        }
    }

    pub fn related_to(mut self, entity_id: Uuid, entity_type: impl Into<String>) -> Self {
        self.related_entity_id = Some(entity_id);
        self.related_entity_type = Some(entity_type.into());
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Materialize the record that will be persisted.
    pub fn into_notification(self, now: DateTime<Utc>) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            title: self.title,
            message: self.message,
            notification_type: self.notification_type,
            related_entity_id: self.related_entity_id,
            related_entity_type: self.related_entity_type,
            is_read: false,
            read_at: None,
            priority: self.priority,
            expires_at: self.expires_at,
            created_at: now,
        }
    }
}

/// The task fields the integrated senders derive their text from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: Uuid,
    pub title: String,
    pub status: String,
    pub due_date: Option<DateTime<Utc>>,
    pub project_name: Option<String>,
}

/// Email job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EmailJobStatus {
    /// Waiting for `next_attempt_at`
    Queued,
    /// Claimed by a worker
    Sending,
    /// Delivered to the transport (terminal)
    Sent,
    /// Gave up; needs operator attention (terminal)
    DeadLettered,
}

impl EmailJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailJobStatus::Queued => "queued",
            EmailJobStatus::Sending => "sending",
            EmailJobStatus::Sent => "sent",
            EmailJobStatus::DeadLettered => "dead_lettered",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sending" => EmailJobStatus::Sending,
            "sent" => EmailJobStatus::Sent,
            "dead_lettered" => EmailJobStatus::DeadLettered,
            _ => EmailJobStatus::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EmailJobStatus::Sent | EmailJobStatus::DeadLettered)
    }
}

/// Outbound email waiting in the durable queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailJob {
    pub id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    pub attempt_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub status: EmailJobStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailJob {
    /// A fresh job, due immediately.
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        is_html: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            is_html,
            attempt_count: 0,
            next_attempt_at: now,
            status: EmailJobStatus::Queued,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
