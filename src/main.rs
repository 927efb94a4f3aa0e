use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use carechat::{AppState, app, clock::SystemClock, config::Config, db, session_layer};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("carechat=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let db_pool = db::connect(&config.database_url, config.db_max_connections)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;

    let app_state = AppState::new(db_pool, Arc::new(SystemClock), config.delete_window)
        .with_socket_session_required(config.socket_requires_session);

    let cors = match &config.allowed_origin {
        Some(origin) => CorsLayer::new().allow_origin(origin.parse::<HeaderValue>()?),
        None => CorsLayer::new().allow_origin(Any),
    };

    let app = app(
        app_state,
        session_layer(config.secure_cookies, config.session_inactivity),
    )
    .layer(cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
