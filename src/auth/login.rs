use axum::{Json, debug_handler, extract::State};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{
    AppResult, AppState,
    directory::{Directory, User},
    error::ChatError,
    session::USER_ID,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[debug_handler(state = AppState)]
pub async fn login(
    State(directory): State<Directory>,
    session: Session,

    Json(LoginRequest { username, password }): Json<LoginRequest>,
) -> AppResult<Json<User>> {
    let Some(user) = directory.authenticate(&username, &password).await? else {
        tracing::warn!(%username, "login rejected");
        return Err(ChatError::InvalidCredentials.into());
    };

    session.cycle_id().await?;
    session.insert(USER_ID, &user.id).await?;

    tracing::info!(user_id = %user.id, role = %user.role, "logged in");
    Ok(Json(user))
}
