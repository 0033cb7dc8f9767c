use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::Config;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()>;
}

/// Sends through the Resend HTTP API.
pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendMailer {
    const ENDPOINT: &'static str = "https://api.resend.com/emails";

    pub fn new(api_key: String, from: String) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, api_key, from })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()> {
        let response = self
            .client
            .post(Self::ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [email.to],
                "subject": email.subject,
                "html": email.html,
            }))
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Email request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Email provider returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

/// Used when no provider key is configured; the message is only logged.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()> {
        tracing::info!(to = %email.to, subject = %email.subject, "Email delivery disabled, dropping message");
        Ok(())
    }
}

pub fn from_config(config: &Config) -> AppResult<Arc<dyn Mailer>> {
    match &config.resend_api_key {
        Some(key) => Ok(Arc::new(ResendMailer::new(
            key.clone(),
            config.email_from.clone(),
        )?)),
        None => {
            tracing::warn!("RESEND_API_KEY not set, outgoing email is disabled");
            Ok(Arc::new(LogMailer))
        }
    }
}

pub fn password_reset_email(to: &str, frontend_url: &str, token: &str) -> OutgoingEmail {
    let link = format!(
        "{}/reset-password?token={}",
        frontend_url.trim_end_matches('/'),
        token
    );

    OutgoingEmail {
        to: to.to_string(),
        subject: "Reset your password".to_string(),
        html: format!(
            "<p>We received a request to reset your password.</p>\
             <p><a href=\"{link}\">Choose a new password</a></p>\
             <p>The link expires in 15 minutes. If you did not ask for it, ignore this email.</p>"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_email_contains_link() {
        let email = password_reset_email("alice@x.com", "https://app.example/", "abc.def");

        assert_eq!(email.to, "alice@x.com");
        assert!(email
            .html
            .contains("https://app.example/reset-password?token=abc.def"));
    }
}
