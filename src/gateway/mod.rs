mod ws;

use axum::{Router, routing::get};
use tokio::sync::mpsc;

use crate::{
    AppState,
    chat::MessageRouter,
    error::ChatError,
    presence::ConnectionHandle,
    protocol::{ClientFrame, ServerFrame},
};

pub use ws::chat_ws;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws::chat_ws))
}

/// A registered connection: its handle plus the frames queued for it.
pub struct Connection {
    pub handle: ConnectionHandle,
    pub user_id: String,
    pub outbound: mpsc::UnboundedReceiver<ServerFrame>,
}

/// Binds live connections to users and feeds their frames to the router.
#[derive(Clone)]
pub struct Gateway {
    router: MessageRouter,
    session_required: bool,
}

impl Gateway {
    pub fn new(router: MessageRouter) -> Self {
        Self { router, session_required: false }
    }

    /// When set, `/ws` refuses a bare `?userId=` without a logged-in session.
    pub fn with_session_required(mut self, required: bool) -> Self {
        self.session_required = required;
        self
    }

    pub fn session_required(&self) -> bool {
        self.session_required
    }

    /// Refuses empty, unknown and inactive user ids.
    pub async fn authorize(&self, user_id: &str) -> Result<(), ChatError> {
        if user_id.is_empty() || self.router.directory().active_user(user_id).await?.is_none() {
            return Err(ChatError::UnknownUser(user_id.to_owned()));
        }
        Ok(())
    }

    /// Registers a connection for an already authorized user, replacing any previous one.
    pub fn attach(&self, user_id: &str) -> Connection {
        let (tx, outbound) = mpsc::unbounded_channel();
        let handle = self.router.presence().register(user_id, tx, self.router.now());
        tracing::info!(user_id, %handle, "connected");

        Connection { handle, user_id: user_id.to_owned(), outbound }
    }

    pub async fn on_connect(&self, user_id: &str) -> Result<Connection, ChatError> {
        self.authorize(user_id).await?;
        Ok(self.attach(user_id))
    }

    pub fn on_disconnect(&self, handle: ConnectionHandle) {
        match self.router.presence().deregister(handle) {
            Some(user_id) => tracing::info!(%user_id, %handle, "disconnected"),
            None => tracing::debug!(%handle, "orphaned connection closed"),
        }
    }

    /// Malformed frames and frames from replaced connections are logged and dropped.
    pub async fn on_inbound_frame(&self, handle: ConnectionHandle, raw: &str) {
        let frame = match ClientFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%handle, error = %e, "dropping malformed frame");
                return;
            }
        };

        let Some(user_id) = self.router.presence().user_of(handle) else {
            tracing::debug!(%handle, "dropping frame from orphaned connection");
            return;
        };

        match frame {
            ClientFrame::Chat { sender_id, receiver_id, text, message_type } => {
                if sender_id != user_id {
                    tracing::warn!(%user_id, claimed = %sender_id, "dropping frame with foreign sender id");
                    return;
                }

                if let Err(e) = self.router.send(&user_id, &receiver_id, &text, message_type).await {
                    tracing::warn!(%user_id, %receiver_id, error = %e, "send failed");
                    self.router.presence().push(
                        &user_id,
                        ServerFrame::ChatFailed { receiver_id, reason: e.public_message() },
                    );
                }
            }
        }
    }
}
