use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{ConversationRequest, MarkReadResponse, MessageRequest, UnreadCount};
use crate::middleware::CurrentUser;
use crate::models::{Conversation, ConversationDetail, ConversationSummary, Message};
use crate::AppState;

pub async fn list_conversations(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    Ok(Json(state.chat.list(&user).await?))
}

/// Get or create the thread for a client and optional invoice.
pub async fn open_conversation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ConversationRequest>,
) -> Result<Json<Conversation>, AppError> {
    Ok(Json(state.chat.open(&user, req).await?))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationDetail>, AppError> {
    Ok(Json(state.chat.get(id, &user).await?))
}

pub async fn send_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let message = state.chat.send(id, &user, req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MarkReadResponse>, AppError> {
    let updated = state.chat.mark_read(id, &user).await?;
    Ok(Json(MarkReadResponse { updated }))
}

pub async fn unread_count(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<UnreadCount>, AppError> {
    let unread = state.chat.unread_count(&user).await?;
    Ok(Json(UnreadCount { unread }))
}
