use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::RoleRequest;
use crate::middleware::{AdminUser, CurrentUser};
use crate::models::{User, UserSummary};
use crate::AppState;

/// The signed-in user, as mirrored locally.
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    Ok(Json(state.accounts.list().await?))
}

pub async fn set_role(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
    Json(req): Json<RoleRequest>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.accounts.set_role(&id, req.role).await?))
}

pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if admin.id == id {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Admins cannot delete their own account"
        )));
    }
    state.accounts.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
