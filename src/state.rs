use std::sync::Arc;

use crate::auth::{
    jwt::JwtKeys,
    memory::MemoryUserStore,
    repo::{PgUserStore, UserStore},
};
use crate::config::{AppConfig, ConfigError};
use crate::contact::repo::{ContactStore, MemoryContactStore, PgContactStore};
use crate::db;
use crate::mailer::{LogMailer, Mailer};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub contacts: Arc<dyn ContactStore>,
    pub mailer: Arc<dyn Mailer>,
    pub config: Arc<AppConfig>,
    pub keys: JwtKeys,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let (store, contacts): (Arc<dyn UserStore>, Arc<dyn ContactStore>) =
            match &config.database_url {
                Some(url) => {
                    let pool = db::connect(url).await?;
                    (
                        Arc::new(PgUserStore::new(pool.clone())),
                        Arc::new(PgContactStore::new(pool)),
                    )
                }
                None => {
                    tracing::warn!("DATABASE_URL not set; using in-memory stores");
                    (
                        Arc::new(MemoryUserStore::new()),
                        Arc::new(MemoryContactStore::new()),
                    )
                }
            };
        Ok(Self::from_parts(store, contacts, Arc::new(LogMailer), config)?)
    }

    /// Signing keys are derived here so a bad secret stops start-up, not a request.
    pub fn from_parts(
        store: Arc<dyn UserStore>,
        contacts: Arc<dyn ContactStore>,
        mailer: Arc<dyn Mailer>,
        config: AppConfig,
    ) -> Result<Self, ConfigError> {
        let keys = JwtKeys::new(&config.jwt)?;
        Ok(Self {
            store,
            contacts,
            mailer,
            config: Arc::new(config),
            keys,
        })
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_with_mailer(Arc::new(LogMailer))
    }

    #[cfg(test)]
    pub fn fake_with_mailer(mailer: Arc<dyn Mailer>) -> Self {
        let config = AppConfig {
            database_url: None,
            app_url: "http://localhost:3000".into(),
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_days: 7,
            },
            tokens: crate::config::TokenPolicy::default(),
        };
        Self::from_parts(
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryContactStore::new()),
            mailer,
            config,
        )
            .expect("test config is valid")
    }
}
