use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::repo::ContactMessage;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContactRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContactCreated {
    pub message: &'static str,
    pub id: Uuid,
}

/// `?page=&limit=`; both optional.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct ContactListResponse {
    pub messages: Vec<ContactMessage>,
    pub pagination: Pagination,
}
