use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;

use crate::response::{HealthResponse, MessageResponse};
use crate::throttler::Throttle;

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub throttle: Throttle,
}

/// Demo resource behind the default limit
pub async fn index() -> impl IntoResponse {
    Json(MessageResponse::new("ok"))
}

/// Demo form endpoint behind a stricter per-route limit
pub async fn login() -> impl IntoResponse {
    Json(MessageResponse::new("login accepted"))
}

/// Health check endpoint; never rate limited
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let store = state.throttle.store();
    let algorithm = state.throttle.algorithm_name();
    match store.ping().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse::healthy(store.name(), algorithm))),
        Err(err) => {
            tracing::warn!(store = store.name(), error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse::unhealthy(store.name(), algorithm, err.to_string())),
            )
        }
    }
}
