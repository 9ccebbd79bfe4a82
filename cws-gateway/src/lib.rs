//! WebSocket transport in front of the terminal session runtime.

pub mod config;
pub mod protocol;
pub mod state;
pub mod ws;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::Config;
pub use state::AppState;

pub fn create_app(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/terminal", get(ws::terminal_ws))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "cws-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.session_count()
    }))
}
