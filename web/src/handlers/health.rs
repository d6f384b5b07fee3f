//! Health check endpoint.
//!
//! Used by load balancers and monitoring systems to verify the process is
//! up. It does not touch the booking store.

use crate::state::AppState;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Always `"ok"`
    pub status: String,
    /// Open WebSocket connections
    pub connections: usize,
}

/// Liveness check.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {"status": "ok", "connections": 3}
/// ```
pub async fn health_check(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
        connections: state.rooms.connection_count().await,
    })
}
