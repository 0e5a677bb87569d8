use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ContactMessage {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewContactMessage {
    pub name: String,
    pub email: String,
    pub message: String,
}

/// Inbox for messages sent through the public contact form.
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn create(&self, new: NewContactMessage) -> anyhow::Result<ContactMessage>;
    /// One page, newest first, plus the total number of stored messages.
    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<(Vec<ContactMessage>, i64)>;
}

#[derive(Clone)]
pub struct PgContactStore {
    pool: PgPool,
}

impl PgContactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn create(&self, new: NewContactMessage) -> anyhow::Result<ContactMessage> {
        let row = sqlx::query_as::<_, ContactMessage>(
            r#"
            INSERT INTO contact_messages (id, name, email, message)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, email, message, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.message)
        .fetch_one(&self.pool)
        .await
        .context("insert contact message")?;
        Ok(row)
    }

    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<(Vec<ContactMessage>, i64)> {
        let rows = sqlx::query_as::<_, ContactMessage>(
            r#"
            SELECT id, name, email, message, created_at
              FROM contact_messages
             ORDER BY created_at DESC
             LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("list contact messages")?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contact_messages")
            .fetch_one(&self.pool)
            .await
            .context("count contact messages")?;
        Ok((rows, total))
    }
}

/// Process-local inbox, oldest first internally.
#[derive(Default)]
pub struct MemoryContactStore {
    messages: RwLock<Vec<ContactMessage>>,
}

impl MemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn create(&self, new: NewContactMessage) -> anyhow::Result<ContactMessage> {
        let msg = ContactMessage {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            message: new.message,
            created_at: OffsetDateTime::now_utc(),
        };
        self.messages.write().await.push(msg.clone());
        Ok(msg)
    }

    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<(Vec<ContactMessage>, i64)> {
        let messages = self.messages.read().await;
        let page = messages
            .iter()
            .rev()
            .skip(usize::try_from(offset).context("negative offset")?)
            .take(usize::try_from(limit).context("negative limit")?)
            .cloned()
            .collect();
        Ok((page, messages.len() as i64))
    }
}
