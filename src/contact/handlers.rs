use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::{instrument, warn};

use super::{
    dto::{ContactCreated, ContactListResponse, ContactRequest, PageQuery},
    services,
};
use crate::{
    auth::{extractors::AdminUser, handlers::body},
    error::AuthError,
    state::AppState,
};

pub fn contact_routes() -> Router<AppState> {
    Router::new().route("/contact", post(submit).get(list))
}

#[instrument(skip_all)]
pub async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<ContactRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ContactCreated>), AuthError> {
    let id = services::submit(&state, body(payload)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(ContactCreated {
            message: "Message sent successfully",
            id,
        }),
    ))
}

#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn list(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<ContactListResponse>, AuthError> {
    let Query(query) = query.map_err(|e| {
        warn!(error = %e, "rejected query string");
        AuthError::validation("Invalid pagination parameters")
    })?;
    services::list(&state, query).await.map(Json)
}
