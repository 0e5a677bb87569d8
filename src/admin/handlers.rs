use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{
        DashboardResponse, DeleteUserRequest, LogsResponse, RoleSummary, UpdateRoleRequest,
        UpdateRoleResponse, UsersResponse,
    },
    services,
};
use crate::{
    auth::{extractors::AdminUser, handlers::body},
    error::{AuthError, MessageBody},
    state::AppState,
};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/dashboard", get(dashboard))
        .route("/admin/logs", get(list_logs))
        .route("/admin/users", get(list_users))
        .route("/admin/users/update-role", post(update_role))
        .route("/admin/users/delete", post(delete_user))
}

#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn dashboard(AdminUser(admin): AdminUser) -> Json<DashboardResponse> {
    Json(DashboardResponse {
        message: "Welcome to Admin Dashboard",
        user: admin,
    })
}

#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> Result<Json<UsersResponse>, AuthError> {
    let users = services::list_users(&state).await?;
    Ok(Json(UsersResponse { users }))
}

#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn list_logs(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> Result<Json<LogsResponse>, AuthError> {
    let logs = services::list_logs(&state).await?;
    Ok(Json(LogsResponse { logs }))
}

#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn update_role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> Result<Json<UpdateRoleResponse>, AuthError> {
    let updated = services::update_role(&state, &admin, body(payload)?).await?;
    Ok(Json(UpdateRoleResponse {
        message: "User role updated",
        user: RoleSummary {
            id: updated.id,
            role: updated.role,
        },
    }))
}

#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    payload: Result<Json<DeleteUserRequest>, JsonRejection>,
) -> Result<Json<MessageBody>, AuthError> {
    services::delete_user(&state, &admin, body(payload)?).await?;
    Ok(Json(MessageBody::new("User deleted successfully")))
}
