/// WebSocket message types for the live notification channel
use crate::models::Notification;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events pushed from the server to a connected client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A notification was created for the connected user
    ReceiveNotification { notification: Notification },

    /// Something changed on a task the client follows
    ReceiveTaskUpdate {
        task_id: Uuid,
        update: serde_json::Value,
        timestamp: i64,
    },

    /// Connection established confirmation
    Connected {
        connection_id: Uuid,
        timestamp: i64,
    },

    /// Server acknowledges a client command
    Ack { command: String },

    /// Error message from server
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn notification(notification: Notification) -> Self {
        ServerEvent::ReceiveNotification { notification }
    }

    pub fn task_update(task_id: Uuid, update: serde_json::Value) -> Self {
        ServerEvent::ReceiveTaskUpdate {
            task_id,
            update,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn connected(connection_id: Uuid) -> Self {
        ServerEvent::Connected {
            connection_id,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn ack(command: impl Into<String>) -> Self {
        ServerEvent::Ack {
            command: command.into(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Commands a client may send over its socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientCommand {
    JoinTaskGroup { task_id: Uuid },
    LeaveTaskGroup { task_id: Uuid },
    /// Application-level keepalive for clients that cannot send WS pings
    Ping,
}

impl ClientCommand {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::JoinTaskGroup { .. } => "JoinTaskGroup",
            ClientCommand::LeaveTaskGroup { .. } => "LeaveTaskGroup",
            ClientCommand::Ping => "Ping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_update_wire_shape() {
        let task_id = Uuid::new_v4();
        let event = ServerEvent::task_update(task_id, serde_json::json!({"status": "Done"}));
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "ReceiveTaskUpdate");
        assert_eq!(value["task_id"], task_id.to_string());
        assert_eq!(value["update"]["status"], "Done");
    }

    #[test]
    fn test_parse_join_task_group() {
        let task_id = Uuid::new_v4();
        let json = format!(r#"{{"type":"JoinTaskGroup","task_id":"{}"}}"#, task_id);
        assert_eq!(
            ClientCommand::from_json(&json).unwrap(),
            ClientCommand::JoinTaskGroup { task_id }
        );
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(ClientCommand::from_json(r#"{"type":"DropTables"}"#).is_err());
    }

    #[test]
    fn test_connected_message() {
        let json = ServerEvent::connected(Uuid::new_v4()).to_json().unwrap();
        assert!(json.contains("Connected"));
    }
}
