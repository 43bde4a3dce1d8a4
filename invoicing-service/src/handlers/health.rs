use axum::{extract::State, response::IntoResponse, Json};
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::AppState;

/// Liveness: the process answers.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness: the store answers.
pub async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::ServiceUnavailable("database unavailable".to_string())
    })?;

    Ok(Json(json!({
        "status": "ready",
        "service": state.config.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "database": "up",
            "email": state.email_provider,
        }
    })))
}

pub async fn metrics() -> impl IntoResponse {
    crate::services::metrics::get_metrics()
}
