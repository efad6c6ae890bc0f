//! HTTP and WebSocket routes.

mod api;
mod ws;

pub use api::ApiError;

use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Coherence
        .route("/api/coherence/current", get(api::get_coherence_current))
        .route("/api/coherence/history", get(api::get_coherence_history))
        // Connections and emergence
        .route("/api/connections/strongest", get(api::get_strongest))
        .route("/api/emergence/patterns", get(api::get_patterns))
        // Inputs from collaborators
        .route("/api/signals", post(api::post_signal))
        .route("/api/interactions", post(api::post_interaction))
        // Swarm state
        .route("/api/stats", get(api::get_stats))
        .route("/api/quorum", get(api::get_quorum))
        // WebSocket for live cycle reports
        .route("/ws/events", get(ws::events_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
