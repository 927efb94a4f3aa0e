use serde::{Deserialize, Serialize};

use crate::chat::model::{Message, MessageKind};

/// Frames a client may send. Anything else fails to parse and is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Chat {
        sender_id: String,
        receiver_id: String,
        text: String,
        #[serde(default)]
        message_type: MessageKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Live push to the receiver.
    Chat { message: Message },
    /// Acknowledgement to the sender once the message is stored.
    ChatSent { message: Message },
    #[serde(rename_all = "camelCase")]
    ChatFailed { receiver_id: String, reason: String },
}

impl ClientFrame {
    pub fn parse(raw: &str) -> Result<ClientFrame, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl ServerFrame {
    pub fn parse(raw: &str) -> Result<ServerFrame, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            ServerFrame::Chat { message } | ServerFrame::ChatSent { message } => Some(message),
            ServerFrame::ChatFailed { .. } => None,
        }
    }
}
