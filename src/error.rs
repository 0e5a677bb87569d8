use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::config::ConfigError;

pub const INVALID_CREDENTIALS: &str = "Invalid email or password";
pub const INVALID_RESET_TOKEN: &str = "Invalid or expired token";

/// Every failure a request can end with. Workflows return the first one they hit.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed or missing input.
    #[error("{0}")]
    Validation(String),
    /// Missing, invalid or expired session, or rejected credentials.
    #[error("{0}")]
    Authentication(String),
    #[error("Access denied")]
    Authorization,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Please verify your email before logging in")]
    EmailNotVerified { expired: bool },
    #[error("Invalid verification token")]
    InvalidVerificationToken,
    #[error("Verification link has expired. Please request a new one.")]
    VerificationExpired,
    #[error("{}", INVALID_RESET_TOKEN)]
    InvalidResetToken,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    pub fn invalid_credentials() -> Self {
        Self::Authentication(INVALID_CREDENTIALS.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::InvalidVerificationToken
            | Self::VerificationExpired
            | Self::InvalidResetToken => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization | Self::EmailNotVerified { .. } => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            Self::EmailNotVerified { .. } => Some("EMAIL_NOT_VERIFIED"),
            Self::InvalidVerificationToken => Some("INVALID_TOKEN"),
            Self::VerificationExpired => Some("TOKEN_EXPIRED"),
            _ => None,
        }
    }

    fn expired(&self) -> Option<bool> {
        match self {
            Self::EmailNotVerified { expired } => Some(*expired),
            Self::VerificationExpired => Some(true),
            _ => None,
        }
    }
}

/// JSON body shared by every response that only carries a message.
#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<bool>,
}

impl MessageBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            expired: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: &'static str) -> Self {
        Self {
            code: Some(code),
            ..Self::new(message)
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Config(e) => {
                error!(error = %e, "configuration error surfaced at request time");
                "Internal server error".to_string()
            }
            Self::Internal(e) => {
                error!(error = %format!("{e:#}"), "request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = MessageBody {
            message,
            code: self.code(),
            expired: self.expired(),
        };
        (status, Json(body)).into_response()
    }
}
