use time::Duration;

/// Start-up configuration failures. These abort the process before it serves anything.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set to a non-empty value")]
    Missing(&'static str),
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Upper bounds on configured lifetimes. Values past these are rejected at start-up.
pub const MAX_SESSION_TTL_DAYS: i64 = 365;
pub const MAX_EMAIL_VERIFY_TTL_HOURS: i64 = 24 * 30;
pub const MAX_RESET_TOKEN_TTL_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_days: i64,
}

/// Lifetimes of the single-use tokens mailed to users.
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    pub email_verify_ttl: Duration,
    pub reset_ttl: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            email_verify_ttl: Duration::hours(24),
            reset_ttl: Duration::minutes(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub app_url: String,
    pub jwt: JwtConfig,
    pub tokens: TokenPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let jwt = JwtConfig {
            secret,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "rolegate".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "rolegate-users".into()),
            ttl_days: env_number("SESSION_TTL_DAYS", 7, MAX_SESSION_TTL_DAYS)?,
        };

        let tokens = TokenPolicy {
            email_verify_ttl: Duration::hours(env_number(
                "EMAIL_VERIFY_TTL_HOURS",
                24,
                MAX_EMAIL_VERIFY_TTL_HOURS,
            )?),
            reset_ttl: Duration::minutes(env_number(
                "RESET_TOKEN_TTL_MINUTES",
                15,
                MAX_RESET_TOKEN_TTL_MINUTES,
            )?),
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.is_empty()),
            app_url: std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".into()),
            jwt,
            tokens,
        })
    }
}

fn env_number(var: &'static str, default: i64, max: i64) -> Result<i64, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(value) => match value.trim().parse::<i64>() {
            Ok(n) if (1..=max).contains(&n) => Ok(n),
            _ => Err(ConfigError::Invalid { var, value }),
        },
    }
}
