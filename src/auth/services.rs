use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    dto::{
        present, secret, ChangePasswordRequest, EmailRequest, LoginRequest, LoginResponse,
        RegisterRequest, ResetPasswordRequest, VerifyEmailRequest,
    },
    password::{hash_password, validate_new_password, verify_password, DUMMY_HASH},
    repo::CreateUserError,
    repo_types::{Activity, NewUser, PublicUser},
    tokens,
};
use crate::{error::AuthError, mailer, state::AppState};

pub const FORGOT_PASSWORD_MESSAGE: &str = "If the email exists, a reset link has been sent";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Audit writes follow the state change they describe; a failed write is
/// logged and does not undo or fail the request.
pub(crate) async fn audit(st: &AppState, user_id: Uuid, action: Activity) {
    if let Err(e) = st.store.record_activity(user_id, action).await {
        warn!(error = %e, %user_id, action = %action, "activity log write failed");
    }
}

pub async fn register(st: &AppState, req: RegisterRequest) -> Result<(), AuthError> {
    let (Some(name), Some(email), Some(password)) =
        (present(req.name), present(req.email), secret(req.password))
    else {
        return Err(AuthError::validation("All fields are required"));
    };

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AuthError::validation("Invalid email format"));
    }
    validate_new_password(&password)?;

    if st.store.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AuthError::Conflict("User already exists".into()));
    }

    let password_hash = hash_password(&password)?;
    let verification = tokens::mint(st.config.tokens.email_verify_ttl)?;
    let token = verification.token.clone();

    let user = st
        .store
        .create(NewUser {
            email,
            name,
            password_hash,
            email_verify_token: verification,
        })
        .await
        .map_err(|e| match e {
            CreateUserError::DuplicateEmail => AuthError::Conflict("User already exists".into()),
            CreateUserError::Other(e) => AuthError::Internal(e),
        })?;

    // Without the email the account cannot be verified, so a send failure fails the request.
    st.mailer
        .send(mailer::verification_email(
            &st.config.app_url,
            &user.email,
            &user.name,
            &token,
            st.config.tokens.email_verify_ttl,
        ))
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %user.id, "verification email failed");
            AuthError::Internal(e.context("send verification email"))
        })?;

    info!(user_id = %user.id, "user registered");
    Ok(())
}

pub async fn login(st: &AppState, req: LoginRequest) -> Result<LoginResponse, AuthError> {
    let (Some(email), Some(password)) = (present(req.email), secret(req.password)) else {
        return Err(AuthError::validation("Email and password are required"));
    };

    let Some(user) = st.store.find_by_email(&email).await? else {
        // Same Argon2 work as a real check, so timing does not reveal the miss.
        verify_password(&password, DUMMY_HASH)?;
        warn!("login for unknown email");
        return Err(AuthError::invalid_credentials());
    };

    if !verify_password(&password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AuthError::invalid_credentials());
    }

    if !user.email_verified {
        let now = OffsetDateTime::now_utc();
        let expired = user
            .email_verify_token
            .as_ref()
            .map_or(true, |t| t.is_expired_at(now));
        info!(user_id = %user.id, expired, "login before email verification");
        return Err(AuthError::EmailNotVerified { expired });
    }

    let token = st.keys.issue(user.id, user.role)?;
    audit(st, user.id, Activity::Login).await;

    info!(user_id = %user.id, "user logged in");
    Ok(LoginResponse {
        message: "Login successful",
        token,
        user: PublicUser::from(&user),
    })
}

/// Same reply whether or not the account exists.
pub async fn forgot_password(st: &AppState, req: EmailRequest) -> Result<(), AuthError> {
    let Some(email) = present(req.email) else {
        return Err(AuthError::validation("Email is required"));
    };

    let Some(user) = st.store.find_by_email(&email).await? else {
        info!("password reset requested for unknown email");
        return Ok(());
    };

    let reset = tokens::mint(st.config.tokens.reset_ttl)?;
    if !st.store.set_reset_token(user.id, &reset).await? {
        // deleted between lookup and write
        return Ok(());
    }

    // A failure here must not change the reply, or the reply would reveal the account.
    if let Err(e) = st
        .mailer
        .send(mailer::reset_email(
            &st.config.app_url,
            &user.email,
            &reset.token,
            st.config.tokens.reset_ttl,
        ))
        .await
    {
        error!(error = %e, user_id = %user.id, "reset email failed");
    }

    info!(user_id = %user.id, "password reset token issued");
    Ok(())
}

pub async fn reset_password(st: &AppState, req: ResetPasswordRequest) -> Result<(), AuthError> {
    let (Some(token), Some(new_password)) = (present(req.token), secret(req.new_password)) else {
        return Err(AuthError::validation("Token and new password are required"));
    };
    validate_new_password(&new_password)?;

    let now = OffsetDateTime::now_utc();
    // Cheap pre-check so junk tokens do not cost a hash.
    if st.store.find_by_live_reset_token(&token, now).await?.is_none() {
        warn!("reset with unknown or expired token");
        return Err(AuthError::InvalidResetToken);
    }

    let password_hash = hash_password(&new_password)?;
    let Some(user_id) = st
        .store
        .consume_reset_token(&token, &password_hash, now)
        .await?
    else {
        warn!("reset token consumed concurrently");
        return Err(AuthError::InvalidResetToken);
    };

    audit(st, user_id, Activity::ResetPassword).await;
    info!(%user_id, "password reset");
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    AlreadyVerified,
}

pub async fn verify_email(
    st: &AppState,
    req: VerifyEmailRequest,
) -> Result<VerifyOutcome, AuthError> {
    let Some(token) = present(req.token) else {
        return Err(AuthError::validation("Verification token required"));
    };

    // Looked up ignoring expiry so an expired link can be told apart from a bogus one.
    let Some(user) = st.store.find_by_verify_token(&token).await? else {
        return Err(AuthError::InvalidVerificationToken);
    };

    let now = OffsetDateTime::now_utc();
    if user
        .email_verify_token
        .as_ref()
        .is_some_and(|t| t.is_expired_at(now))
    {
        info!(user_id = %user.id, "expired verification token");
        return Err(AuthError::VerificationExpired);
    }

    if user.email_verified {
        return Ok(VerifyOutcome::AlreadyVerified);
    }

    if !st.store.mark_email_verified(user.id, &token, now).await? {
        // lost a race with another consumer of the same token
        return Err(AuthError::InvalidVerificationToken);
    }

    audit(st, user.id, Activity::EmailVerified).await;
    info!(user_id = %user.id, "email verified");
    Ok(VerifyOutcome::Verified)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResendOutcome {
    Sent,
    AlreadyVerified,
}

pub async fn send_verification(
    st: &AppState,
    req: EmailRequest,
) -> Result<ResendOutcome, AuthError> {
    let Some(email) = present(req.email) else {
        return Err(AuthError::validation("Email is required"));
    };

    let Some(user) = st.store.find_by_email(&email).await? else {
        return Err(AuthError::NotFound("User not found".into()));
    };
    if user.email_verified {
        return Ok(ResendOutcome::AlreadyVerified);
    }

    let verification = tokens::mint(st.config.tokens.email_verify_ttl)?;
    if !st.store.set_verify_token(user.id, &verification).await? {
        return Err(AuthError::NotFound("User not found".into()));
    }

    st.mailer
        .send(mailer::verification_email(
            &st.config.app_url,
            &user.email,
            &user.name,
            &verification.token,
            st.config.tokens.email_verify_ttl,
        ))
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %user.id, "verification email failed");
            AuthError::Internal(e.context("send verification email"))
        })?;

    info!(user_id = %user.id, "verification email re-sent");
    Ok(ResendOutcome::Sent)
}

pub async fn change_password(
    st: &AppState,
    caller: &PublicUser,
    req: ChangePasswordRequest,
) -> Result<(), AuthError> {
    let (Some(current), Some(new_password)) =
        (secret(req.current_password), secret(req.new_password))
    else {
        return Err(AuthError::validation("Current and new password are required"));
    };
    validate_new_password(&new_password)?;

    let user = st
        .store
        .find_by_id(caller.id)
        .await?
        .ok_or_else(|| AuthError::unauthorized("User not found"))?;

    // A stolen session alone must not be enough to take over the account.
    if !verify_password(&current, &user.password_hash)? {
        warn!(user_id = %user.id, "change password with wrong current password");
        return Err(AuthError::unauthorized("Current password is incorrect"));
    }

    let password_hash = hash_password(&new_password)?;
    if !st.store.update_password(user.id, &password_hash).await? {
        return Err(AuthError::unauthorized("User not found"));
    }

    audit(st, user.id, Activity::ChangePassword).await;
    info!(user_id = %user.id, "password changed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use time::Duration;

    use super::*;
    use crate::{
        auth::{roles::Role, tokens::mint_at},
        mailer::{Mailer, OutboundEmail},
    };

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _email: OutboundEmail) -> anyhow::Result<()> {
            anyhow::bail!("smtp unreachable")
        }
    }

    fn register_req(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: Some("Alice".into()),
            email: Some(email.into()),
            password: Some(password.into()),
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: Some(email.into()),
            password: Some(password.into()),
        }
    }

    async fn verify_token_of(st: &AppState, email: &str) -> String {
        st.store
            .find_by_email(email)
            .await
            .unwrap()
            .unwrap()
            .email_verify_token
            .expect("token present")
            .token
    }

    async fn registered_and_verified(st: &AppState, email: &str, password: &str) {
        register(st, register_req(email, password)).await.unwrap();
        let token = verify_token_of(st, email).await;
        verify_email(st, VerifyEmailRequest { token: Some(token) })
            .await
            .unwrap();
    }

    #[test]
    fn email_format() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a x@x.com"));
        assert!(!is_valid_email("@x.com"));
    }

    #[tokio::test]
    async fn register_stores_a_hash_and_an_unverified_user() {
        let st = AppState::fake();
        register(&st, register_req("a@x.com", "pw123456")).await.unwrap();
        let user = st.store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_ne!(user.password_hash, "pw123456");
        assert!(verify_password("pw123456", &user.password_hash).unwrap());
        assert!(!user.email_verified);
        assert_eq!(user.role, Role::User);
        let t = user.email_verify_token.unwrap();
        let ttl = t.expires_at - user.created_at;
        assert!(ttl > Duration::hours(23) && ttl <= Duration::hours(24));
    }

    #[tokio::test]
    async fn register_rejects_missing_fields_and_duplicates() {
        let st = AppState::fake();
        let err = register(
            &st,
            RegisterRequest {
                name: None,
                ..register_req("a@x.com", "pw123456")
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        let err = register(&st, register_req("not-an-email", "pw123456"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        register(&st, register_req("a@x.com", "pw123456")).await.unwrap();
        let err = register(&st, register_req("a@x.com", "other-pass"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
    }

    #[tokio::test]
    async fn register_fails_when_the_verification_email_cannot_be_sent() {
        let st = AppState::fake_with_mailer(Arc::new(FailingMailer));
        let err = register(&st, register_req("a@x.com", "pw123456"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
    }

    #[tokio::test]
    async fn forgot_password_survives_mail_failure() {
        let st = AppState::fake_with_mailer(Arc::new(FailingMailer));
        // seed directly; register itself needs a working mailer
        let user = st
            .store
            .create(NewUser {
                email: "a@x.com".into(),
                name: "A".into(),
                password_hash: hash_password("pw123456").unwrap(),
                email_verify_token: tokens::mint(Duration::hours(24)).unwrap(),
            })
            .await
            .unwrap();
        forgot_password(&st, EmailRequest { email: Some("a@x.com".into()) })
            .await
            .unwrap();
        let stored = st.store.find_by_id(user.id).await.unwrap().unwrap();
        let reset = stored.reset_token.expect("reset token minted");
        let ttl = reset.expires_at - OffsetDateTime::now_utc();
        assert!(ttl > Duration::minutes(14) && ttl <= Duration::minutes(15));
    }

    #[tokio::test]
    async fn unverified_login_reports_email_not_verified_without_token() {
        let st = AppState::fake();
        register(&st, register_req("a@x.com", "pw123456")).await.unwrap();
        let err = login(&st, login_req("a@x.com", "pw123456")).await.unwrap_err();
        assert!(matches!(err, AuthError::EmailNotVerified { expired: false }));
    }

    #[tokio::test]
    async fn unverified_login_flags_expired_verification_token() {
        let st = AppState::fake();
        register(&st, register_req("a@x.com", "pw123456")).await.unwrap();
        let user = st.store.find_by_email("a@x.com").await.unwrap().unwrap();
        let stale = mint_at(Duration::hours(24), OffsetDateTime::now_utc() - Duration::days(2))
            .unwrap();
        st.store.set_verify_token(user.id, &stale).await.unwrap();
        let err = login(&st, login_req("a@x.com", "pw123456")).await.unwrap_err();
        assert!(matches!(err, AuthError::EmailNotVerified { expired: true }));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let st = AppState::fake();
        registered_and_verified(&st, "a@x.com", "pw123456").await;
        let a = login(&st, login_req("a@x.com", "wrong-pass")).await.unwrap_err();
        let b = login(&st, login_req("nobody@x.com", "pw123456")).await.unwrap_err();
        assert_eq!(a.status(), b.status());
        assert_eq!(a.to_string(), b.to_string());
    }

    #[tokio::test]
    async fn login_issues_a_session_token_and_audits() {
        let st = AppState::fake();
        registered_and_verified(&st, "a@x.com", "pw123456").await;
        let res = login(&st, login_req("a@x.com", "pw123456")).await.unwrap();
        let claims = st.keys.verify(&res.token).unwrap();
        assert_eq!(claims.sub, res.user.id);
        assert_eq!(claims.role, Role::User);

        let actions: Vec<String> = st
            .store
            .list_activity()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert_eq!(actions, vec!["LOGIN", "EMAIL_VERIFIED"]);
    }

    #[tokio::test]
    async fn verification_token_is_single_use() {
        let st = AppState::fake();
        register(&st, register_req("a@x.com", "pw123456")).await.unwrap();
        let token = verify_token_of(&st, "a@x.com").await;

        let first = verify_email(&st, VerifyEmailRequest { token: Some(token.clone()) })
            .await
            .unwrap();
        assert_eq!(first, VerifyOutcome::Verified);
        let second = verify_email(&st, VerifyEmailRequest { token: Some(token) })
            .await
            .unwrap_err();
        assert!(matches!(second, AuthError::InvalidVerificationToken));
    }

    #[tokio::test]
    async fn expired_verification_token_is_distinguished() {
        let st = AppState::fake();
        register(&st, register_req("a@x.com", "pw123456")).await.unwrap();
        let user = st.store.find_by_email("a@x.com").await.unwrap().unwrap();
        let stale = mint_at(Duration::hours(24), OffsetDateTime::now_utc() - Duration::days(2))
            .unwrap();
        st.store.set_verify_token(user.id, &stale).await.unwrap();

        let err = verify_email(&st, VerifyEmailRequest { token: Some(stale.token) })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::VerificationExpired));
    }

    #[tokio::test]
    async fn verifying_an_already_verified_account_is_idempotent() {
        let st = AppState::fake();
        registered_and_verified(&st, "a@x.com", "pw123456").await;
        let user = st.store.find_by_email("a@x.com").await.unwrap().unwrap();
        // a token left on a verified record
        let extra = tokens::mint(Duration::hours(24)).unwrap();
        st.store.set_verify_token(user.id, &extra).await.unwrap();
        let outcome = verify_email(&st, VerifyEmailRequest { token: Some(extra.token) })
            .await
            .unwrap();
        assert_eq!(outcome, VerifyOutcome::AlreadyVerified);
    }

    #[tokio::test]
    async fn reset_password_replaces_the_password_once() {
        let st = AppState::fake();
        registered_and_verified(&st, "a@x.com", "pw123456").await;
        forgot_password(&st, EmailRequest { email: Some("a@x.com".into()) })
            .await
            .unwrap();
        let token = st
            .store
            .find_by_email("a@x.com")
            .await
            .unwrap()
            .unwrap()
            .reset_token
            .unwrap()
            .token;

        let req = |pw: &str| ResetPasswordRequest {
            token: Some(token.clone()),
            new_password: Some(pw.into()),
        };
        reset_password(&st, req("brand-new-pw")).await.unwrap();
        let again = reset_password(&st, req("yet-another-pw")).await.unwrap_err();
        assert!(matches!(again, AuthError::InvalidResetToken));

        assert!(login(&st, login_req("a@x.com", "brand-new-pw")).await.is_ok());
        assert!(login(&st, login_req("a@x.com", "pw123456")).await.is_err());
    }

    #[tokio::test]
    async fn expired_reset_token_is_rejected() {
        let st = AppState::fake();
        registered_and_verified(&st, "a@x.com", "pw123456").await;
        let user = st.store.find_by_email("a@x.com").await.unwrap().unwrap();
        let stale = mint_at(Duration::minutes(15), OffsetDateTime::now_utc() - Duration::hours(1))
            .unwrap();
        st.store.set_reset_token(user.id, &stale).await.unwrap();

        let err = reset_password(
            &st,
            ResetPasswordRequest {
                token: Some(stale.token),
                new_password: Some("brand-new-pw".into()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::InvalidResetToken));
        assert_eq!(err.to_string(), "Invalid or expired token");
    }

    #[tokio::test]
    async fn change_password_requires_the_current_password() {
        let st = AppState::fake();
        registered_and_verified(&st, "a@x.com", "pw123456").await;
        let caller = login(&st, login_req("a@x.com", "pw123456")).await.unwrap().user;

        let err = change_password(
            &st,
            &caller,
            ChangePasswordRequest {
                current_password: Some("guess-guess".into()),
                new_password: Some("new-pass-1".into()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::Authentication(_)));

        change_password(
            &st,
            &caller,
            ChangePasswordRequest {
                current_password: Some("pw123456".into()),
                new_password: Some("new-pass-1".into()),
            },
        )
        .await
        .unwrap();
        assert!(login(&st, login_req("a@x.com", "new-pass-1")).await.is_ok());
        assert!(login(&st, login_req("a@x.com", "pw123456")).await.is_err());
    }

    #[tokio::test]
    async fn change_password_voids_an_outstanding_reset_token() {
        let st = AppState::fake();
        registered_and_verified(&st, "a@x.com", "pw123456").await;
        let caller = login(&st, login_req("a@x.com", "pw123456")).await.unwrap().user;
        forgot_password(&st, EmailRequest { email: Some("a@x.com".into()) })
            .await
            .unwrap();
        let reset = st
            .store
            .find_by_id(caller.id)
            .await
            .unwrap()
            .unwrap()
            .reset_token
            .unwrap();

        change_password(
            &st,
            &caller,
            ChangePasswordRequest {
                current_password: Some("pw123456".into()),
                new_password: Some("new-pass-1".into()),
            },
        )
        .await
        .unwrap();

        let err = reset_password(
            &st,
            ResetPasswordRequest {
                token: Some(reset.token),
                new_password: Some("attacker-pw".into()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::InvalidResetToken));
    }

    #[tokio::test]
    async fn send_verification_handles_unknown_and_verified_users() {
        let st = AppState::fake();
        let err = send_verification(&st, EmailRequest { email: Some("nobody@x.com".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));

        register(&st, register_req("a@x.com", "pw123456")).await.unwrap();
        let old = verify_token_of(&st, "a@x.com").await;
        let sent = send_verification(&st, EmailRequest { email: Some("a@x.com".into()) })
            .await
            .unwrap();
        assert_eq!(sent, ResendOutcome::Sent);
        let new = verify_token_of(&st, "a@x.com").await;
        assert_ne!(old, new);

        verify_email(&st, VerifyEmailRequest { token: Some(new) }).await.unwrap();
        let again = send_verification(&st, EmailRequest { email: Some("a@x.com".into()) })
            .await
            .unwrap();
        assert_eq!(again, ResendOutcome::AlreadyVerified);
    }
}
