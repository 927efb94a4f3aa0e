use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

const IMAGE_PREFIX: &str = "[Image]: ";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown message type {0:?}")]
pub struct UnknownKind(String);

impl FromStr for MessageKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            other => Err(UnknownKind(other.to_owned())),
        }
    }
}

/// A direct message as stored and as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    pub message_type: MessageKind,
    pub is_deleted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b) || (self.sender_id == b && self.receiver_id == a)
    }

    /// Same rule the router enforces, for hiding the delete action early.
    pub fn can_delete(&self, requester: &str, now: OffsetDateTime, window: Duration) -> bool {
        self.sender_id == requester && !self.is_deleted && now - self.created_at < window
    }

    pub fn image_description(&self) -> Option<&str> {
        match self.message_type {
            MessageKind::Image => Some(self.message.strip_prefix(IMAGE_PREFIX).unwrap_or(&self.message)),
            MessageKind::Text => None,
        }
    }
}

pub fn image_body(description: &str) -> String {
    format!("{IMAGE_PREFIX}{description}")
}

/// What the router hands the store; id and timestamp are assigned there.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    pub message_type: MessageKind,
}
