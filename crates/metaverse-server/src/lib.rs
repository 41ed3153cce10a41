pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod oracle;
pub mod registry;
pub mod session;
pub mod state;
pub mod ws;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use config::{ConfigError, ServerConfig};
use state::AppState;

/// Build the Axum router around an already-constructed state.
pub fn router(state: AppState) -> Router<()> {
    Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> Result<(Router<()>, AppState), ConfigError> {
    let state = AppState::new(config)?;
    Ok((router(state.clone()), state))
}
