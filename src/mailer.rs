use async_trait::async_trait;
use time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Outbound email collaborator. Delivery itself lives outside this service.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> anyhow::Result<()>;
}

/// Records dispatch through tracing only. Links carry live tokens, so the body is not logged.
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutboundEmail) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, "email dispatched");
        Ok(())
    }
}

fn describe(ttl: Duration) -> String {
    let minutes = ttl.whole_minutes();
    match minutes {
        m if m >= 60 && m % 60 == 0 => format!("{} hours", m / 60),
        m => format!("{m} minutes"),
    }
}

fn link(app_url: &str, path: &str, token: &str) -> String {
    let base = app_url.trim_end_matches('/');
    format!("{base}/{path}?token={token}")
}

pub fn verification_email(
    app_url: &str,
    to: &str,
    name: &str,
    token: &str,
    ttl: Duration,
) -> OutboundEmail {
    let url = link(app_url, "verify-email", token);
    let valid_for = describe(ttl);
    OutboundEmail {
        to: to.to_string(),
        subject: "Verify your email".into(),
        html: format!(
            "<p>Hello {name},</p>\
             <p>Please verify your email by clicking the link below:</p>\
             <a href=\"{url}\">{url}</a>\
             <p>This link is valid for {valid_for}.</p>"
        ),
    }
}

pub fn reset_email(app_url: &str, to: &str, token: &str, ttl: Duration) -> OutboundEmail {
    let url = link(app_url, "reset-password", token);
    let valid_for = describe(ttl);
    OutboundEmail {
        to: to.to_string(),
        subject: "Reset your password".into(),
        html: format!(
            "<h2>Password Reset</h2>\
             <p>Click the link below to reset your password:</p>\
             <a href=\"{url}\">{url}</a>\
             <p>This link is valid for {valid_for}.</p>"
        ),
    }
}
