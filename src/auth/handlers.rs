use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, EmailRequest, LoginRequest, LoginResponse, MeResponse,
            RegisterRequest, ResetPasswordRequest, VerifyEmailRequest,
        },
        extractors::AuthUser,
        services::{self, ResendOutcome, VerifyOutcome, FORGOT_PASSWORD_MESSAGE},
    },
    error::{AuthError, MessageBody},
    state::AppState,
};

type JsonResult<T> = Result<Json<T>, AuthError>;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(get_me))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/send-verification", post(send_verification))
        .route("/auth/change-password", post(change_password))
}

/// Unwraps a JSON body, turning framework rejections into 400s.
pub(crate) fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload.map(|Json(v)| v).map_err(|e| {
        warn!(error = %e, "rejected request body");
        AuthError::validation("Invalid request body")
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageBody>), AuthError> {
    services::register(&state, body(payload)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageBody::new(
            "Registration successful. Please verify your email before login.",
        )),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> JsonResult<LoginResponse> {
    services::login(&state, body(payload)?).await.map(Json)
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(AuthUser(user): AuthUser) -> JsonResult<MeResponse> {
    Ok(Json(MeResponse {
        message: "Authenticated user",
        user,
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> JsonResult<MessageBody> {
    services::forgot_password(&state, body(payload)?).await?;
    Ok(Json(MessageBody::new(FORGOT_PASSWORD_MESSAGE)))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> JsonResult<MessageBody> {
    services::reset_password(&state, body(payload)?).await?;
    Ok(Json(MessageBody::new("Password reset successful")))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    payload: Result<Json<VerifyEmailRequest>, JsonRejection>,
) -> JsonResult<MessageBody> {
    let reply = match services::verify_email(&state, body(payload)?).await? {
        VerifyOutcome::Verified => MessageBody::new("Email verified successfully"),
        VerifyOutcome::AlreadyVerified => {
            MessageBody::with_code("Email is already verified", "ALREADY_VERIFIED")
        }
    };
    Ok(Json(reply))
}

#[instrument(skip(state, payload))]
pub async fn send_verification(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> JsonResult<MessageBody> {
    let reply = match services::send_verification(&state, body(payload)?).await? {
        ResendOutcome::Sent => MessageBody::new("Verification email sent"),
        ResendOutcome::AlreadyVerified => MessageBody::new("Email already verified"),
    };
    Ok(Json(reply))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> JsonResult<MessageBody> {
    services::change_password(&state, &user, body(payload)?).await?;
    Ok(Json(MessageBody::new("Password changed successfully")))
}
