//! JSON messages exchanged on the event push socket.
use camgate_hub::PushFrame;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// RFC 3339 UTC with millisecond precision, e.g. `2025-01-01T00:00:00.000Z`.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {
        connection_id: String,
        tenant_id: String,
        user_id: String,
        timestamp: String,
    },
    Event {
        data: Value,
        timestamp: String,
    },
    Pong {
        timestamp: String,
    },
    Subscribed {
        timestamp: String,
    },
    Unsubscribed {
        timestamp: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn connected(connection_id: String, tenant_id: &str, user_id: &str) -> Self {
        Self::Connected {
            connection_id,
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Ping,
    Subscribe,
    Unsubscribe,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Acknowledgment sent back for this control message.
    pub fn reply(self) -> ServerMessage {
        let timestamp = now_rfc3339();
        match self {
            ClientMessage::Ping => ServerMessage::Pong { timestamp },
            ClientMessage::Subscribe => ServerMessage::Subscribed { timestamp },
            ClientMessage::Unsubscribe => ServerMessage::Unsubscribed { timestamp },
        }
    }
}

/// Serialize an event payload once; every recipient shares the same text.
pub fn event_frame(payload: &Value) -> Result<PushFrame, serde_json::Error> {
    let text = ServerMessage::Event {
        data: payload.clone(),
        timestamp: now_rfc3339(),
    }
    .to_json()?;
    Ok(PushFrame::new(text))
}
