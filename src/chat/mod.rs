pub mod model;
pub mod router;
pub mod store;

mod api;

use axum::{
    Router,
    routing::{delete, get},
};

use crate::AppState;

pub use api::ChatPeer;
pub use router::{DEFAULT_DELETE_WINDOW, MessageRouter};
pub use store::MessageStore;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chat/users", get(api::peers))
        .route("/api/chat/messages/{message_id}", delete(api::delete_message))
        .route("/api/chat/{peer_id}", get(api::history))
        .route("/api/admin/chat/{user_a}/{user_b}", get(api::audit))
}
