//! Endpoints hit once a day by the scheduler.

use axum::{
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::utils::secrets_match;

use crate::dtos::ScanReport;
use crate::AppState;

/// `Authorization: Bearer <CRON_SECRET>`. Open when no secret is configured.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(secret) = &state.config.cron_secret else {
        tracing::warn!("CRON_SECRET not set, cron endpoint is unauthenticated");
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();

    if !secrets_match(secret.expose_secret(), provided) {
        return Err(AppError::Unauthorized(anyhow::anyhow!("Unauthorized")));
    }
    Ok(())
}

pub async fn overdue(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ScanReport>, AppError> {
    authorize(&state, &headers)?;
    let report = state.engine.run_overdue_scan().await?;
    tracing::info!(
        candidates = report.candidates,
        notified = report.results.len(),
        "Overdue scan finished"
    );
    Ok(Json(report))
}

pub async fn reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ScanReport>, AppError> {
    authorize(&state, &headers)?;
    let report = state.engine.run_upcoming_scan().await?;
    tracing::info!(
        candidates = report.candidates,
        notified = report.results.len(),
        "Reminder scan finished"
    );
    Ok(Json(report))
}
