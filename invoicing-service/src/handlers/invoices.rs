use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{
    FullInvoiceRequest, InvoiceListItem, InvoiceOutcome, InvoiceView, QuickInvoiceRequest,
    StatusChangeRequest, UpdateInvoiceRequest,
};
use crate::middleware::{AdminUser, CurrentUser};
use crate::models::{InvoiceFilter, InvoiceStats};
use crate::AppState;

pub async fn list_invoices(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<InvoiceFilter>,
) -> Result<Json<Vec<InvoiceListItem>>, AppError> {
    let invoices = state.engine.list_invoices(&user, filter).await?;
    Ok(Json(invoices))
}

pub async fn create_invoice(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(req): Json<QuickInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceView>), AppError> {
    let invoice = state.engine.create_invoice(req).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn create_full_invoice(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(req): Json<FullInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceOutcome>), AppError> {
    let outcome = state.engine.create_full_invoice(&admin, req).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceView>, AppError> {
    Ok(Json(state.engine.get_invoice(id, &user).await?))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateInvoiceRequest>,
) -> Result<Json<InvoiceOutcome>, AppError> {
    Ok(Json(state.engine.update_invoice(id, req).await?))
}

pub async fn change_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusChangeRequest>,
) -> Result<Json<InvoiceOutcome>, AppError> {
    if req.force {
        tracing::info!(invoice_id = %id, admin_id = %admin.id, "Forced status change requested");
    }
    Ok(Json(state.engine.change_status(id, req).await?))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.engine.delete_invoice(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn invoice_pdf(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (data, bytes) = state.engine.render_pdf(id, &user).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, data.content_disposition()),
        ],
        bytes,
    )
        .into_response())
}

pub async fn pay_invoice(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.engine.payment_action(id, &user, "pay").await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn dispute_invoice(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.engine.payment_action(id, &user, "dispute").await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<InvoiceStats>, AppError> {
    Ok(Json(state.engine.stats(&user).await?))
}
