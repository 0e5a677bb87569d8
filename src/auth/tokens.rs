use anyhow::Context;
use rand::{rngs::OsRng, RngCore};
use time::{Duration, OffsetDateTime};

const TOKEN_BYTES: usize = 32;

/// Single-use token mailed to a user, stored together with its absolute expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct OneTimeToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

impl OneTimeToken {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Pairs a nullable token column with its nullable expiry column.
    pub fn from_columns(token: Option<String>, expires_at: Option<OffsetDateTime>) -> Option<Self> {
        match (token, expires_at) {
            (Some(token), Some(expires_at)) => Some(Self { token, expires_at }),
            _ => None,
        }
    }
}

impl std::fmt::Debug for OneTimeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneTimeToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Mint a token valid for `ttl` from now.
pub fn mint(ttl: Duration) -> anyhow::Result<OneTimeToken> {
    mint_at(ttl, OffsetDateTime::now_utc())
}

pub(crate) fn mint_at(ttl: Duration, now: OffsetDateTime) -> anyhow::Result<OneTimeToken> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate one-time token")?;
    let expires_at = now
        .checked_add(ttl)
        .context("one-time token expiry out of range")?;
    Ok(OneTimeToken {
        token: hex::encode(bytes),
        expires_at,
    })
}
