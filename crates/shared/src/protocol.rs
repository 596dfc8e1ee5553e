use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::domain::{Conversation, ConversationMap, Direction};

/// Message timestamp as delivered by the gateway: epoch millis or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GatewayTimestamp {
    Millis(i64),
    Text(String),
}

impl GatewayTimestamp {
    pub fn to_millis(&self) -> Option<i64> {
        match self {
            Self::Millis(ms) => Some(*ms),
            Self::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<i64>() {
                    return Some(ms);
                }
                DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|parsed| parsed.timestamp_millis())
            }
        }
    }
}

/// A message event exactly as the gateway reported it. Every field is optional
/// here; validation happens during normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default, alias = "counterpartId")]
    pub counterpart_id: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timestamp: Option<GatewayTimestamp>,
    #[serde(default, alias = "senderDisplayName")]
    pub sender_display_name: Option<String>,
    #[serde(default, alias = "isGroupOriginated")]
    pub is_group_originated: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum GatewayEvent {
    Connected,
    #[serde(alias = "qr-challenge", alias = "qr")]
    QrChallenge(String),
    Ready,
    Message(RawMessage),
    Disconnected,
    #[serde(alias = "auth-failure")]
    AuthFailure(String),
}

/// Connection status of the gateway, forwarded to viewers untouched by the fold path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum GatewayStatus {
    Connected,
    QrChallenge(String),
    Ready,
    Disconnected,
    AuthFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    ConversationUpdated {
        conversation: Conversation,
    },
    Status {
        status: GatewayStatus,
    },
    /// Bootstrap frame for a viewer that has just joined.
    Snapshot {
        conversations: ConversationMap,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<GatewayStatus>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(alias = "phoneNumber")]
    pub contact_id: String,
    #[serde(alias = "message")]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SendMessageResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}
