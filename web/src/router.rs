//! Router configuration for the booking server.

use crate::handlers::{bookings, health, websocket};
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `GET /health` (no authentication)
/// - `GET /ws` WebSocket upgrade
/// - `/api/bookings/...` booking endpoints
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/bookings", get(bookings::list).post(bookings::create))
        .route("/bookings/stats", get(bookings::stats))
        .route("/bookings/:id", get(bookings::get))
        .route("/bookings/:id/status", put(bookings::update_status))
        .route("/bookings/:id/message", post(bookings::add_message))
        .route("/bookings/:id/rating", post(bookings::add_rating));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ws", get(websocket::handle))
        .nest("/api", api_routes)
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
