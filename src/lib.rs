pub mod appresult;
pub mod auth;
pub mod chat;
pub mod client;
pub mod clock;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod presence;
pub mod protocol;
pub mod session;

use axum::{Json, Router, debug_handler, extract::{FromRef, State}, routing::get};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use time::Duration;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};

pub use appresult::{AppError, AppResult};

use chat::{MessageRouter, MessageStore};
use clock::SharedClock;
use directory::Directory;
use gateway::Gateway;
use presence::PresenceRegistry;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub directory: Directory,
    pub router: MessageRouter,
    pub gateway: Gateway,
}

impl AppState {
    /// Wires one presence registry into both the router and the gateway.
    pub fn new(db_pool: SqlitePool, clock: SharedClock, delete_window: Duration) -> Self {
        let directory = Directory::new(db_pool.clone(), clock.clone());
        let router = MessageRouter::new(
            MessageStore::new(db_pool.clone()),
            directory.clone(),
            PresenceRegistry::new(),
            clock,
            delete_window,
        );
        let gateway = Gateway::new(router.clone());

        AppState { db_pool, directory, router, gateway }
    }

    pub fn with_socket_session_required(mut self, required: bool) -> Self {
        self.gateway = self.gateway.with_session_required(required);
        self
    }

    pub fn presence(&self) -> &PresenceRegistry {
        self.router.presence()
    }
}

pub fn session_layer(secure: bool, inactivity: Duration) -> SessionManagerLayer<MemoryStore> {
    SessionManagerLayer::new(MemoryStore::default())
        .with_secure(secure)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(inactivity))
}

pub fn app(state: AppState, session_layer: SessionManagerLayer<MemoryStore>) -> Router {
    Router::new()
        .route("/api/health", get(health))

        .merge(auth::router())
        .merge(chat::router())
        .merge(gateway::router())

        .with_state(state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
}

#[debug_handler]
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "database": db::ping(&state.db_pool).await,
        "websocket": true,
        "online": state.presence().online_count(),
    }))
}
