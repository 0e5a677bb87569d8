use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{ContactListResponse, ContactRequest, PageQuery, Pagination},
    repo::NewContactMessage,
};
use crate::{
    auth::{dto::present, services::is_valid_email},
    error::AuthError,
    state::AppState,
};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

pub async fn submit(st: &AppState, req: ContactRequest) -> Result<Uuid, AuthError> {
    let (Some(name), Some(email), Some(message)) =
        (present(req.name), present(req.email), present(req.message))
    else {
        return Err(AuthError::validation("Name, email, and message are required"));
    };
    if !is_valid_email(&email) {
        warn!(email = %email, "contact form with invalid email");
        return Err(AuthError::validation("Invalid email format"));
    }

    let saved = st
        .contacts
        .create(NewContactMessage {
            name,
            email,
            message,
        })
        .await?;
    info!(message_id = %saved.id, "contact message stored");
    Ok(saved.id)
}

pub async fn list(st: &AppState, query: PageQuery) -> Result<ContactListResponse, AuthError> {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if page < 1 || !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AuthError::validation("Invalid pagination parameters"));
    }
    let offset = (page - 1)
        .checked_mul(limit)
        .ok_or_else(|| AuthError::validation("Invalid pagination parameters"))?;

    let (messages, total) = st.contacts.list(limit, offset).await?;
    Ok(ContactListResponse {
        messages,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        },
    })
}
