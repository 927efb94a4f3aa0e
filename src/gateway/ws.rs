use axum::{
    debug_handler,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{AppResult, error::ChatError, session::USER_ID};

use super::{Connection, Gateway};

#[derive(Deserialize)]
pub struct ChatWsQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// Upgrades to the chat socket for `userId`, or for the session user.
///
/// A session user and a differing `userId` is refused. Without a session the
/// query id is trusted as is, so anyone who knows an id can connect as that
/// user; deployments that log everyone in should set
/// [`Gateway::with_session_required`].
#[debug_handler(state = crate::AppState)]
pub async fn chat_ws(
    Query(ChatWsQuery { user_id }): Query<ChatWsQuery>,
    State(gateway): State<Gateway>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let session_user = session.get::<String>(USER_ID).await?;

    let user_id = match (user_id, session_user) {
        (Some(claimed), Some(logged_in)) if claimed != logged_in => {
            tracing::warn!(%claimed, %logged_in, "websocket user does not match session");
            return Ok(StatusCode::FORBIDDEN.into_response());
        }
        (Some(claimed), None) if gateway.session_required() => {
            tracing::warn!(%claimed, "websocket without session refused");
            return Ok(StatusCode::UNAUTHORIZED.into_response());
        }
        (Some(user_id), _) | (None, Some(user_id)) => user_id,
        (None, None) => return Ok(StatusCode::UNAUTHORIZED.into_response()),
    };

    match gateway.authorize(&user_id).await {
        Ok(()) => {}
        Err(e @ ChatError::UnknownUser(_)) => {
            tracing::warn!(%user_id, error = %e, "refusing websocket");
            return Ok(StatusCode::FORBIDDEN.into_response());
        }
        Err(e) => return Err(e.into()),
    }

    Ok(ws.on_upgrade(async move |socket| serve_socket(gateway, socket, user_id).await))
}

async fn serve_socket(gateway: Gateway, socket: WebSocket, user_id: String) {
    let Connection { handle, mut outbound, .. } = gateway.attach(&user_id);
    let (mut sender, mut receiver) = socket.split();

    // ends on its own once the registry drops our sender (replaced connection)
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "unserializable frame");
                    continue;
                }
            };
            if sender.send(Message::text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => gateway.on_inbound_frame(handle, text.as_str()).await,
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => gateway.on_inbound_frame(handle, text).await,
                Err(_) => tracing::warn!(%handle, "dropping non-utf8 binary frame"),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    writer.abort();
    gateway.on_disconnect(handle);
}
