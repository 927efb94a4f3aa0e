use std::fmt;

use axum::http::StatusCode;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDenied {
    NotSender,
    WindowExpired,
}

impl fmt::Display for DeleteDenied {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DeleteDenied::*;
        match self {
            NotSender => write!(f, "requester is not the sender"),
            WindowExpired => write!(f, "delete window has passed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("storage failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("user {0} is unknown or inactive")]
    UnknownUser(String),

    #[error("{sender} is not allowed to message {receiver}")]
    NotEligible { sender: String, receiver: String },

    #[error("message body is empty")]
    EmptyBody,

    #[error("message {0} not found")]
    NotFound(Uuid),

    #[error("cannot delete message {id}: {reason}")]
    Forbidden { id: Uuid, reason: DeleteDenied },

    #[error("not logged in")]
    Unauthenticated,

    #[error("admin role required")]
    AdminOnly,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("credential backend: {0}")]
    Credential(String),
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        use ChatError::*;
        match self {
            Persistence(_) | Credential(_) => StatusCode::INTERNAL_SERVER_ERROR,
            UnknownUser(_) | NotFound(_) => StatusCode::NOT_FOUND,
            NotEligible { .. } | Forbidden { .. } | AdminOnly => StatusCode::FORBIDDEN,
            EmptyBody => StatusCode::BAD_REQUEST,
            Unauthenticated | InvalidCredentials => StatusCode::UNAUTHORIZED,
        }
    }

    /// Message shown to the client. Delete denials never say which rule failed.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Forbidden { .. } => "cannot delete message".to_owned(),
            ChatError::Persistence(_) | ChatError::Credential(_) => "internal server error".to_owned(),
            other => other.to_string(),
        }
    }
}
