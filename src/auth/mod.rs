use axum::{
    Json, Router, debug_handler,
    extract::State,
    routing::{get, post},
};
use tower_sessions::Session;

use crate::{
    AppResult, AppState,
    directory::{Directory, User},
    error::ChatError,
    session::USER_ID,
};

mod login;
mod logout;

pub use login::login;
pub use logout::logout;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/login", post(login::login))
        .route("/api/logout", post(logout::logout))
        .route("/api/me", get(me))
}

/// The logged-in user, if the session points at an active account.
pub(crate) async fn current_user(session: &Session, directory: &Directory) -> AppResult<User> {
    let Some(user_id) = session.get::<String>(USER_ID).await? else {
        return Err(ChatError::Unauthenticated.into());
    };

    directory
        .active_user(&user_id)
        .await?
        .ok_or_else(|| ChatError::Unauthenticated.into())
}

#[debug_handler(state = AppState)]
pub(crate) async fn me(
    State(directory): State<Directory>,
    session: Session,
) -> AppResult<Json<User>> {
    Ok(Json(current_user(&session, &directory).await?))
}
