pub mod email_transport;
pub mod email_worker;
pub mod notification_service;
pub mod retention;
pub mod templates;

pub use email_transport::{
    build_transport, EmailTransport, LogOnlyTransport, OutboundEmail, SendError,
    SmtpEmailTransport,
};
pub use email_worker::{
    BatchReport, EmailDeliveryWorker, EmailWorkerSettings, RetryPolicy, WorkerReport,
};
pub use notification_service::NotificationService;
pub use retention::RetentionSweeper;
pub use templates::EmailSettings;
