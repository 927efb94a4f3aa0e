use axum::{
    Json, debug_handler,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    AppResult, AppState,
    auth::current_user,
    directory::{Directory, Role},
};

use super::{model::Message, router::MessageRouter};

/// Someone the current user may open a conversation with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPeer {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub online: bool,
}

#[debug_handler(state = AppState)]
pub(crate) async fn peers(
    State(directory): State<Directory>,
    State(router): State<MessageRouter>,
    session: Session,
) -> AppResult<Json<Vec<ChatPeer>>> {
    let me = current_user(&session, &directory).await?;

    let peers = directory
        .peers(&me.id)
        .await?
        .into_iter()
        .map(|user| ChatPeer {
            online: router.presence().is_online(&user.id),
            id: user.id,
            name: user.display_name,
            role: user.role,
        })
        .collect();

    Ok(Json(peers))
}

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    Path(peer_id): Path<String>,
    State(directory): State<Directory>,
    State(router): State<MessageRouter>,
    session: Session,
) -> AppResult<Json<Vec<Message>>> {
    let me = current_user(&session, &directory).await?;
    Ok(Json(router.fetch_conversation(&me.id, &peer_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete_message(
    Path(message_id): Path<Uuid>,
    State(directory): State<Directory>,
    State(router): State<MessageRouter>,
    session: Session,
) -> AppResult<StatusCode> {
    let me = current_user(&session, &directory).await?;
    router.soft_delete(message_id, &me.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
pub(crate) async fn audit(
    Path((user_a, user_b)): Path<(String, String)>,
    State(directory): State<Directory>,
    State(router): State<MessageRouter>,
    session: Session,
) -> AppResult<Json<Vec<Message>>> {
    let me = current_user(&session, &directory).await?;
    Ok(Json(router.audit_conversation(&me.id, &user_a, &user_b).await?))
}
