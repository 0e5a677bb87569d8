use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{DeleteUserRequest, UpdateRoleRequest};
use crate::{
    auth::{
        repo_types::{Activity, ActivityEntry, PublicUser, User},
        roles::Role,
        services::audit,
    },
    error::AuthError,
    state::AppState,
};

pub async fn list_users(st: &AppState) -> Result<Vec<PublicUser>, AuthError> {
    let users = st.store.list().await?;
    Ok(users.iter().map(PublicUser::from).collect())
}

pub async fn list_logs(st: &AppState) -> Result<Vec<ActivityEntry>, AuthError> {
    Ok(st.store.list_activity().await?)
}

pub async fn update_role(
    st: &AppState,
    actor: &PublicUser,
    req: UpdateRoleRequest,
) -> Result<User, AuthError> {
    let (Some(user_id), Some(role)) = (req.user_id, req.role) else {
        return Err(AuthError::validation("User ID and role are required"));
    };
    let role: Role = role.trim().parse().map_err(|e| {
        warn!(error = %e, "update-role with unknown role");
        AuthError::validation("Invalid role")
    })?;

    let Some(updated) = st.store.update_role(user_id, role).await? else {
        return Err(AuthError::NotFound("User not found".into()));
    };

    audit(st, actor.id, Activity::UpdatedRole(role)).await;
    info!(actor = %actor.id, target = %user_id, %role, "role updated");
    Ok(updated)
}

pub async fn delete_user(
    st: &AppState,
    actor: &PublicUser,
    req: DeleteUserRequest,
) -> Result<Uuid, AuthError> {
    let Some(user_id) = req.user_id else {
        return Err(AuthError::validation("User ID is required"));
    };

    if !st.store.delete(user_id).await? {
        return Err(AuthError::NotFound("User not found".into()));
    }

    // An admin deleting their own account leaves no row to log against.
    if actor.id != user_id {
        audit(st, actor.id, Activity::DeletedUser).await;
    }
    info!(actor = %actor.id, target = %user_id, "user deleted");
    Ok(user_id)
}
