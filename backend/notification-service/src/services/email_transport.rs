/// Outbound email transports
///
/// The worker only knows `EmailTransport`. Failures are classified into the
/// two kinds the retry policy cares about: `Transient` is worth retrying,
/// `Permanent` never is.
use crate::config::SmtpConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// A rendered message ready for the wire
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SendError {
    #[error("transient send failure: {0}")]
    Transient(String),

    #[error("permanent send failure: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, SendError::Permanent(_))
    }
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> std::result::Result<(), SendError>;
}

/// SMTP relay via lettre
pub struct SmtpEmailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| AppError::Internal(format!("Invalid SMTP_FROM address: {}", e)))?;

        let builder = if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        }
        .map_err(|e| AppError::Internal(format!("Failed to configure SMTP transport: {}", e)))?
        .port(config.port);

        let builder = if let (Some(username), Some(password)) = (&config.username, &config.password)
        {
            builder.credentials(Credentials::new(username.to_string(), password.to_string()))
        } else {
            builder
        };

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, email: &OutboundEmail) -> std::result::Result<Message, SendError> {
        let to = email
            .recipient
            .parse::<Mailbox>()
            .map_err(|e| SendError::Permanent(format!("invalid recipient address: {}", e)))?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone());

        let message = if email.is_html {
            builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(super::templates::html_to_text(&email.body)),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(email.body.clone()),
                    ),
            )
        } else {
            builder
                .header(header::ContentType::TEXT_PLAIN)
                .body(email.body.clone())
        };

        message.map_err(|e| SendError::Permanent(format!("failed to build message: {}", e)))
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send(&self, email: &OutboundEmail) -> std::result::Result<(), SendError> {
        let message = self.build_message(email)?;

        match self.transport.send(message).await {
            Ok(_) => Ok(()),
            // 5xx replies will fail the same way every time
            Err(e) if e.is_permanent() => Err(SendError::Permanent(e.to_string())),
            Err(e) => Err(SendError::Transient(e.to_string())),
        }
    }
}

/// Development transport: logs instead of sending.
#[derive(Debug, Default, Clone)]
pub struct LogOnlyTransport;

#[async_trait]
impl EmailTransport for LogOnlyTransport {
    async fn send(&self, email: &OutboundEmail) -> std::result::Result<(), SendError> {
        info!(
            recipient = %email.recipient,
            subject = %email.subject,
            "SMTP not configured; skipping actual send"
        );
        Ok(())
    }
}

/// Pick the transport for the given settings.
pub fn build_transport(config: &SmtpConfig) -> Result<Arc<dyn EmailTransport>> {
    if config.host.trim().is_empty() {
        warn!("SMTP host not configured; emails will only be logged");
        return Ok(Arc::new(LogOnlyTransport));
    }
    Ok(Arc::new(SmtpEmailTransport::new(config)?))
}

/// Transport that replays a fixed script of outcomes and records what it was
/// asked to send. Once the script runs out every send succeeds.
#[cfg(test)]
pub(crate) mod scripted {
    use super::{EmailTransport, OutboundEmail, SendError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        script: Arc<Mutex<VecDeque<Result<(), SendError>>>>,
        sent: Arc<Mutex<Vec<OutboundEmail>>>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<(), SendError>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Every send fails with the same error.
        pub fn always(error: SendError, times: usize) -> Self {
            Self::new(vec![Err(error); times])
        }

        pub async fn attempts(&self) -> Vec<OutboundEmail> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl EmailTransport for ScriptedTransport {
        async fn send(&self, email: &OutboundEmail) -> Result<(), SendError> {
            self.sent.lock().await.push(email.clone());
            self.script.lock().await.pop_front().unwrap_or(Ok(()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedTransport;
    use super::*;

    fn smtp_config(from: &str) -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: None,
            password: None,
            from: from.to_string(),
            use_starttls: true,
        }
    }

    fn email(recipient: &str, is_html: bool) -> OutboundEmail {
        OutboundEmail {
            recipient: recipient.to_string(),
            subject: "Subject".to_string(),
            body: "<p>Body</p>".to_string(),
            is_html,
        }
    }

    #[test]
    fn test_invalid_from_is_rejected() {
        assert!(SmtpEmailTransport::new(&smtp_config("not an address")).is_err());
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_permanent() {
        let transport = SmtpEmailTransport::new(&smtp_config("noreply@example.com")).unwrap();
        let err = transport.build_message(&email("nope", false)).unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_html_message_builds() {
        let transport = SmtpEmailTransport::new(&smtp_config("noreply@example.com")).unwrap();
        assert!(transport.build_message(&email("user@example.com", true)).is_ok());
    }

    #[test]
    fn test_empty_host_selects_log_only() {
        let mut config = smtp_config("noreply@example.com");
        config.host = "  ".to_string();
        assert!(build_transport(&config).is_ok());
    }

    #[tokio::test]
    async fn test_scripted_transport_replays_then_succeeds() {
        let transport = ScriptedTransport::new(vec![Err(SendError::Transient("busy".into()))]);
        let msg = email("user@example.com", false);

        assert_eq!(
            transport.send(&msg).await,
            Err(SendError::Transient("busy".into()))
        );
        assert_eq!(transport.send(&msg).await, Ok(()));
        assert_eq!(transport.attempts().await.len(), 2);
    }
}
