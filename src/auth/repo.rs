use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    repo_types::{Activity, ActivityEntry, ActivityRow, NewUser, User, UserRow},
    roles::Role,
    tokens::OneTimeToken,
};

#[derive(Debug, thiserror::Error)]
pub enum CreateUserError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Credential store. Each method is atomic for the record it touches; the
/// token-consuming methods are compare-and-clear so concurrent callers cannot
/// both succeed.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    /// Exact match on the verification token, whether or not it has expired.
    async fn find_by_verify_token(&self, token: &str) -> anyhow::Result<Option<User>>;
    /// Exact match on a reset token that is still live at `now`.
    async fn find_by_live_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;
    async fn create(&self, new: NewUser) -> Result<User, CreateUserError>;
    async fn list(&self) -> anyhow::Result<Vec<User>>;

    /// Replaces any previous verification token. Returns false when the user is gone.
    async fn set_verify_token(&self, id: Uuid, token: &OneTimeToken) -> anyhow::Result<bool>;
    /// Marks the user verified and clears the token, only if `token` is still the
    /// user's live verification token.
    async fn mark_email_verified(
        &self,
        id: Uuid,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool>;

    /// Replaces any previous reset token. Returns false when the user is gone.
    async fn set_reset_token(&self, id: Uuid, token: &OneTimeToken) -> anyhow::Result<bool>;
    /// Writes the new hash and clears the reset token in one step. Returns the
    /// user id when a live token matched.
    async fn consume_reset_token(
        &self,
        token: &str,
        new_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Uuid>>;
    /// Writes the new hash and drops any outstanding reset token.
    async fn update_password(&self, id: Uuid, new_hash: &str) -> anyhow::Result<bool>;

    async fn update_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<User>>;
    /// Removes the user's activity rows, then the user.
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;

    async fn record_activity(&self, user_id: Uuid, action: Activity) -> anyhow::Result<()>;
    /// Newest first.
    async fn list_activity(&self) -> anyhow::Result<Vec<ActivityEntry>>;
}

const USER_COLUMNS: &str = "id, email, name, password_hash, role, email_verified, \
     email_verify_token, email_verify_expiry, reset_token, reset_token_expiry, created_at";

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_user(&self, sql: &str, bind: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("find user by id")?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_user(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"),
            email,
        )
        .await
        .context("find user by email")
    }

    async fn find_by_verify_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_user(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email_verify_token = $1"),
            token,
        )
        .await
        .context("find user by verification token")
    }

    async fn find_by_live_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE reset_token = $1 AND reset_token_expiry > $2"
        ))
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("find user by reset token")?;
        row.map(User::try_from).transpose()
    }

    async fn create(&self, new: NewUser) -> Result<User, CreateUserError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, email, name, password_hash, role, email_verified,
                               email_verify_token, email_verify_expiry)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.password_hash)
        .bind(Role::User.as_str())
        .bind(&new.email_verify_token.token)
        .bind(new.email_verify_token.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CreateUserError::DuplicateEmail
            } else {
                CreateUserError::Other(anyhow::Error::new(e).context("insert user"))
            }
        })?;
        Ok(User::try_from(row)?)
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("list users")?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn set_verify_token(&self, id: Uuid, token: &OneTimeToken) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET email_verify_token = $2, email_verify_expiry = $3
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&token.token)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await
        .context("set verification token")?;
        Ok(res.rows_affected() == 1)
    }

    async fn mark_email_verified(
        &self,
        id: Uuid,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET email_verified = TRUE, email_verify_token = NULL, email_verify_expiry = NULL
             WHERE id = $1 AND email_verify_token = $2 AND email_verify_expiry > $3
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("mark email verified")?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_reset_token(&self, id: Uuid, token: &OneTimeToken) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET reset_token = $2, reset_token_expiry = $3
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&token.token)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await
        .context("set reset token")?;
        Ok(res.rows_affected() == 1)
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        new_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE users
               SET password_hash = $2, reset_token = NULL, reset_token_expiry = NULL
             WHERE reset_token = $1 AND reset_token_expiry > $3
            RETURNING id
            "#,
        )
        .bind(token)
        .bind(new_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("consume reset token")?;
        Ok(id)
    }

    async fn update_password(&self, id: Uuid, new_hash: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2, reset_token = NULL, reset_token_expiry = NULL
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(new_hash)
        .execute(&self.pool)
        .await
        .context("update password")?;
        Ok(res.rows_affected() == 1)
    }

    async fn update_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("update role")?;
        row.map(User::try_from).transpose()
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await.context("begin tx")?;
        sqlx::query("DELETE FROM activity_logs WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("delete activity")?;
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("delete user")?;
        tx.commit().await.context("commit tx")?;
        Ok(res.rows_affected() == 1)
    }

    async fn record_activity(&self, user_id: Uuid, action: Activity) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO activity_logs (id, user_id, action) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(action.to_string())
            .execute(&self.pool)
            .await
            .context("insert activity")?;
        Ok(())
    }

    async fn list_activity(&self) -> anyhow::Result<Vec<ActivityEntry>> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r#"
            SELECT a.id, a.user_id, a.action, a.created_at, u.email, u.role
              FROM activity_logs a
              LEFT JOIN users u ON u.id = a.user_id
             ORDER BY a.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("list activity")?;
        Ok(rows.into_iter().map(ActivityEntry::from).collect())
    }
}
