use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use tracing::{debug, warn};

use super::{
    jwt::TokenError,
    repo_types::PublicUser,
    roles::{authorize, Role},
};
use crate::{error::AuthError, state::AppState};

/// Resolves the bearer session token on a request to the current user.
///
/// Expired and tampered tokens produce the same response so callers cannot
/// tell them apart.
pub async fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<PublicUser, AuthError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::unauthorized("Unauthorized"))?;

    let claims = state.keys.verify(token).map_err(|e| {
        match &e {
            TokenError::Expired => debug!("session token expired"),
            TokenError::Invalid(_) => warn!(error = %e, "session token rejected"),
        }
        AuthError::unauthorized("Invalid or expired token")
    })?;

    // The token can outlive the account it was issued for.
    let user = state
        .store
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %claims.sub, "session token for unknown user");
            AuthError::unauthorized("User not found")
        })?;

    Ok(PublicUser::from(&user))
}

/// Authenticated caller.
pub struct AuthUser(pub PublicUser);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        authenticate(&parts.headers, state).await.map(AuthUser)
    }
}

/// Authenticated caller holding the ADMIN role. Authentication runs first, so
/// an anonymous request is answered with 401 before any role check.
pub struct AdminUser(pub PublicUser);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if let Err(e) = authorize(user.role, &[Role::Admin]) {
            warn!(user_id = %user.id, role = %user.role, "admin access denied");
            return Err(e);
        }
        Ok(AdminUser(user))
    }
}
