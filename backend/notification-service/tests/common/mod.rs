use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use task_notification_service::services::{EmailTransport, OutboundEmail, SendError};
use tokio::sync::Mutex;

/// Replays a fixed script of outcomes, then succeeds. Records every send.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Result<(), SendError>>>>,
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new(script: Vec<Result<(), SendError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

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
