use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    repo::{CreateUserError, UserStore},
    repo_types::{Activity, ActivityEntry, NewUser, User},
    roles::Role,
    tokens::OneTimeToken,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    activity: Vec<ActivityEntry>,
}

/// Process-local store. Every mutation happens under one write lock, which
/// gives the same per-record atomicity the Postgres store gets from row locks.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn live(token: &Option<OneTimeToken>, value: &str, now: OffsetDateTime) -> bool {
    token
        .as_ref()
        .is_some_and(|t| t.token == value && !t.is_expired_at(now))
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_verify_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| {
                u.email_verify_token
                    .as_ref()
                    .is_some_and(|t| t.token == token)
            })
            .cloned())
    }

    async fn find_by_live_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| live(&u.reset_token, token, now))
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User, CreateUserError> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.email == new.email) {
            return Err(CreateUserError::DuplicateEmail);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            role: Role::User,
            email_verified: false,
            email_verify_token: Some(new.email_verify_token),
            reset_token: None,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let inner = self.inner.read().await;
        let mut users: Vec<User> = inner.users.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn set_verify_token(&self, id: Uuid, token: &OneTimeToken) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.users.get_mut(&id) {
            Some(user) => {
                user.email_verify_token = Some(token.clone());
                true
            }
            None => false,
        })
    }

    async fn mark_email_verified(
        &self,
        id: Uuid,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.users.get_mut(&id) {
            Some(user) if live(&user.email_verify_token, token, now) => {
                user.email_verified = true;
                user.email_verify_token = None;
                true
            }
            _ => false,
        })
    }

    async fn set_reset_token(&self, id: Uuid, token: &OneTimeToken) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.users.get_mut(&id) {
            Some(user) => {
                user.reset_token = Some(token.clone());
                true
            }
            None => false,
        })
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        new_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Uuid>> {
        let mut inner = self.inner.write().await;
        let Some(user) = inner
            .users
            .values_mut()
            .find(|u| live(&u.reset_token, token, now))
        else {
            return Ok(None);
        };
        user.password_hash = new_hash.to_string();
        user.reset_token = None;
        Ok(Some(user.id))
    }

    async fn update_password(&self, id: Uuid, new_hash: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = new_hash.to_string();
                user.reset_token = None;
                true
            }
            None => false,
        })
    }

    async fn update_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<User>> {
        let mut inner = self.inner.write().await;
        Ok(inner.users.get_mut(&id).map(|user| {
            user.role = role;
            user.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        inner.activity.retain(|a| a.user_id != id);
        Ok(inner.users.remove(&id).is_some())
    }

    async fn record_activity(&self, user_id: Uuid, action: Activity) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        anyhow::ensure!(
            inner.users.contains_key(&user_id),
            "activity for unknown user {user_id}"
        );
        inner.activity.push(ActivityEntry {
            id: Uuid::new_v4(),
            user_id,
            action: action.to_string(),
            created_at: OffsetDateTime::now_utc(),
            user_email: None,
            user_role: None,
        });
        Ok(())
    }

    async fn list_activity(&self) -> anyhow::Result<Vec<ActivityEntry>> {
        let inner = self.inner.read().await;
        // insertion order is chronological
        Ok(inner
            .activity
            .iter()
            .rev()
            .map(|a| {
                let user = inner.users.get(&a.user_id);
                ActivityEntry {
                    user_email: user.map(|u| u.email.clone()),
                    user_role: user.map(|u| u.role),
                    ..a.clone()
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::Duration;

    use super::*;
    use crate::auth::tokens::{mint, mint_at};

    async fn seeded(store: &MemoryUserStore, email: &str) -> User {
        store
            .create(NewUser {
                email: email.into(),
                name: "Test".into(),
                password_hash: "$argon2id$fake".into(),
                email_verify_token: mint(Duration::hours(24)).unwrap(),
            })
            .await
            .expect("create")
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryUserStore::new();
        seeded(&store, "a@x.com").await;
        let err = store
            .create(NewUser {
                email: "a@x.com".into(),
                name: "Other".into(),
                password_hash: "h".into(),
                email_verify_token: mint(Duration::hours(24)).unwrap(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CreateUserError::DuplicateEmail));
    }

    #[tokio::test]
    async fn email_lookup_is_case_sensitive() {
        let store = MemoryUserStore::new();
        seeded(&store, "a@x.com").await;
        assert!(store.find_by_email("A@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_token_is_single_use() {
        let store = MemoryUserStore::new();
        let user = seeded(&store, "a@x.com").await;
        let t = mint(Duration::minutes(15)).unwrap();
        store.set_reset_token(user.id, &t).await.unwrap();

        let now = OffsetDateTime::now_utc();
        let first = store.consume_reset_token(&t.token, "new-hash", now).await.unwrap();
        assert_eq!(first, Some(user.id));
        let second = store.consume_reset_token(&t.token, "other", now).await.unwrap();
        assert_eq!(second, None);

        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "new-hash");
        assert!(stored.reset_token.is_none());
    }

    #[tokio::test]
    async fn concurrent_consumers_have_one_winner() {
        let store = Arc::new(MemoryUserStore::new());
        let user = seeded(&store, "a@x.com").await;
        let t = mint(Duration::minutes(15)).unwrap();
        store.set_reset_token(user.id, &t).await.unwrap();

        let now = OffsetDateTime::now_utc();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let token = t.token.clone();
                tokio::spawn(async move {
                    store
                        .consume_reset_token(&token, &format!("hash-{i}"), now)
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn expired_reset_token_does_not_match() {
        let store = MemoryUserStore::new();
        let user = seeded(&store, "a@x.com").await;
        let past = OffsetDateTime::now_utc() - Duration::hours(1);
        let t = mint_at(Duration::minutes(15), past).unwrap();
        store.set_reset_token(user.id, &t).await.unwrap();

        let now = OffsetDateTime::now_utc();
        assert!(store.find_by_live_reset_token(&t.token, now).await.unwrap().is_none());
        assert!(store.consume_reset_token(&t.token, "h", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn new_reset_request_supersedes_the_old_token() {
        let store = MemoryUserStore::new();
        let user = seeded(&store, "a@x.com").await;
        let old = mint(Duration::minutes(15)).unwrap();
        let new = mint(Duration::minutes(15)).unwrap();
        store.set_reset_token(user.id, &old).await.unwrap();
        store.set_reset_token(user.id, &new).await.unwrap();

        let now = OffsetDateTime::now_utc();
        assert!(store.consume_reset_token(&old.token, "h", now).await.unwrap().is_none());
        assert!(store.consume_reset_token(&new.token, "h", now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn password_update_clears_reset_token() {
        let store = MemoryUserStore::new();
        let user = seeded(&store, "a@x.com").await;
        let t = mint(Duration::minutes(15)).unwrap();
        store.set_reset_token(user.id, &t).await.unwrap();
        assert!(store.update_password(user.id, "changed").await.unwrap());
        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.reset_token.is_none());
    }

    #[tokio::test]
    async fn verification_is_compare_and_clear() {
        let store = MemoryUserStore::new();
        let user = seeded(&store, "a@x.com").await;
        let token = user.email_verify_token.clone().unwrap().token;
        let now = OffsetDateTime::now_utc();

        assert!(!store.mark_email_verified(user.id, "wrong", now).await.unwrap());
        assert!(store.mark_email_verified(user.id, &token, now).await.unwrap());
        assert!(!store.mark_email_verified(user.id, &token, now).await.unwrap());

        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.email_verified);
        assert!(stored.email_verify_token.is_none());
        assert!(store.find_by_verify_token(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cascades_activity() {
        let store = MemoryUserStore::new();
        let a = seeded(&store, "a@x.com").await;
        let b = seeded(&store, "b@x.com").await;
        store.record_activity(a.id, Activity::Login).await.unwrap();
        store.record_activity(b.id, Activity::Login).await.unwrap();

        assert!(store.delete(a.id).await.unwrap());
        assert!(!store.delete(a.id).await.unwrap());

        let log = store.list_activity().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].user_id, b.id);
        assert_eq!(log[0].user_email.as_deref(), Some("b@x.com"));
    }

    #[tokio::test]
    async fn activity_is_listed_newest_first() {
        let store = MemoryUserStore::new();
        let a = seeded(&store, "a@x.com").await;
        store.record_activity(a.id, Activity::Login).await.unwrap();
        store.record_activity(a.id, Activity::ChangePassword).await.unwrap();
        let log = store.list_activity().await.unwrap();
        assert_eq!(log[0].action, "CHANGE_PASSWORD");
        assert_eq!(log[1].action, "LOGIN");
        assert_eq!(log[0].user_role, Some(Role::User));
    }
}
