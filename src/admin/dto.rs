use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{
    repo_types::{ActivityEntry, PublicUser},
    roles::Role,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateRoleRequest {
    pub user_id: Option<Uuid>,
    /// Parsed against [`Role`] after deserialization so unknown names get a 400.
    pub role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeleteUserRequest {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<PublicUser>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<ActivityEntry>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub message: &'static str,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct RoleSummary {
    pub id: Uuid,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct UpdateRoleResponse {
    pub message: &'static str,
    pub user: RoleSummary,
}
