use std::fmt;

use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{roles::Role, tokens::OneTimeToken};

/// User record as the credential store holds it.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String, // Argon2 PHC string, never plaintext
    pub role: Role,
    pub email_verified: bool,
    pub email_verify_token: Option<OneTimeToken>,
    pub reset_token: Option<OneTimeToken>,
    pub created_at: OffsetDateTime,
}

/// Fields needed to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub email_verify_token: OneTimeToken,
}

/// Raw `users` row; role is stored as text and token/expiry as separate columns.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: String,
    pub email_verified: bool,
    pub email_verify_token: Option<String>,
    pub email_verify_expiry: Option<OffsetDateTime>,
    pub reset_token: Option<String>,
    pub reset_token_expiry: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            role: r.role.parse()?,
            id: r.id,
            email: r.email,
            name: r.name,
            password_hash: r.password_hash,
            email_verified: r.email_verified,
            email_verify_token: OneTimeToken::from_columns(
                r.email_verify_token,
                r.email_verify_expiry,
            ),
            reset_token: OneTimeToken::from_columns(r.reset_token, r.reset_token_expiry),
            created_at: r.created_at,
        })
    }
}

/// Sanitized projection returned to clients. Carries no hash and no tokens.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_email_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role,
            is_email_verified: u.email_verified,
            created_at: u.created_at,
        }
    }
}

/// Audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Login,
    EmailVerified,
    ResetPassword,
    ChangePassword,
    DeletedUser,
    UpdatedRole(Role),
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activity::Login => f.write_str("LOGIN"),
            Activity::EmailVerified => f.write_str("EMAIL_VERIFIED"),
            Activity::ResetPassword => f.write_str("RESET_PASSWORD"),
            Activity::ChangePassword => f.write_str("CHANGE_PASSWORD"),
            Activity::DeletedUser => f.write_str("DELETED_USER"),
            Activity::UpdatedRole(role) => write!(f, "UPDATED_ROLE_TO_{role}"),
        }
    }
}

/// One audit log line joined with the acting user's email and role.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub user_email: Option<String>,
    pub user_role: Option<Role>,
}

#[derive(Debug, FromRow)]
pub struct ActivityRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: String,
    pub created_at: OffsetDateTime,
    pub email: Option<String>,
    pub role: Option<String>,
}

impl From<ActivityRow> for ActivityEntry {
    fn from(r: ActivityRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            action: r.action,
            created_at: r.created_at,
            user_email: r.email,
            user_role: r.role.and_then(|s| s.parse().ok()),
        }
    }
}
