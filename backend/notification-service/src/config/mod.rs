use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for `NOTIFICATION_RETENTION_DAYS` (100 years)
const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub smtp: SmtpConfig,
    pub email_worker: EmailWorkerConfig,
    pub retention: RetentionConfig,
    pub websocket: WebSocketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
    /// Public URL of the task app, used for links in emails
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(skip_serializing)]
    pub jwt_secret: String,
}

/// SMTP relay. An empty host selects the log-only transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub from: String,
    pub use_starttls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailWorkerConfig {
    pub max_attempts: i32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    pub send_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub days_to_keep: i64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub reaper_interval_secs: u64,
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5,
            client_timeout_secs: 30,
            reaper_interval_secs: 60,
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config {
            app: AppConfig {
                env: var_or("APP_ENV", "development"),
                port: var_or("APP_PORT", "8000").parse()?,
                base_url: var_or("APP_BASE_URL", "http://localhost:3000"),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
                max_connections: var_or("DATABASE_MAX_CONNECTIONS", "10").parse()?,
            },
            auth: AuthConfig {
                jwt_secret: std::env::var("JWT_SECRET")?,
            },
            smtp: SmtpConfig {
                host: var_or("SMTP_HOST", ""),
                port: var_or("SMTP_PORT", "587").parse()?,
                username: optional_var("SMTP_USERNAME"),
                password: optional_var("SMTP_PASSWORD"),
                from: var_or("SMTP_FROM", "Task Notifications <noreply@localhost>"),
                use_starttls: var_or("SMTP_STARTTLS", "true").parse()?,
            },
            email_worker: EmailWorkerConfig {
                max_attempts: var_or("EMAIL_MAX_ATTEMPTS", "5").parse()?,
                base_backoff_secs: var_or("EMAIL_BASE_BACKOFF_SECS", "30").parse()?,
                max_backoff_secs: var_or("EMAIL_MAX_BACKOFF_SECS", "3600").parse()?,
                poll_interval_ms: var_or("EMAIL_POLL_INTERVAL_MS", "1000").parse()?,
                batch_size: var_or("EMAIL_BATCH_SIZE", "20").parse()?,
                send_timeout_secs: var_or("EMAIL_SEND_TIMEOUT_SECS", "30").parse()?,
            },
            retention: RetentionConfig {
                days_to_keep: var_or("NOTIFICATION_RETENTION_DAYS", "90").parse()?,
                sweep_interval_secs: var_or("RETENTION_SWEEP_INTERVAL_SECS", "86400").parse()?,
            },
            websocket: WebSocketConfig {
                heartbeat_interval_secs: var_or("WS_HEARTBEAT_INTERVAL_SECS", "5").parse()?,
                client_timeout_secs: var_or("WS_CLIENT_TIMEOUT_SECS", "30").parse()?,
                reaper_interval_secs: var_or("WS_REAPER_INTERVAL_SECS", "60").parse()?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.email_worker.max_attempts < 1 {
            return Err("EMAIL_MAX_ATTEMPTS must be at least 1".to_string());
        }
        if self.email_worker.batch_size < 1 {
            return Err("EMAIL_BATCH_SIZE must be at least 1".to_string());
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention.days_to_keep) {
            return Err(format!(
                "NOTIFICATION_RETENTION_DAYS must be between 1 and {}",
                MAX_RETENTION_DAYS
            ));
        }
        if self.websocket.client_timeout_secs <= self.websocket.heartbeat_interval_secs {
            return Err(
                "WS_CLIENT_TIMEOUT_SECS must be greater than WS_HEARTBEAT_INTERVAL_SECS"
                    .to_string(),
            );
        }
        Ok(())
    }
}
