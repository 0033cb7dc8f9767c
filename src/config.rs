use std::env;

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
    pub bucket: String,
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub stripe_webhook_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub frontend_url: String,
    pub supabase: Option<SupabaseConfig>,
    pub request_timeout_secs: u64,
    pub advance_interval_secs: u64,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let supabase = match (optional("SUPABASE_URL"), optional("SUPABASE_KEY")) {
            (Some(url), Some(key)) => Some(SupabaseConfig {
                url: url.trim_end_matches('/').to_string(),
                key,
                bucket: optional("SUPABASE_BUCKET")
                    .unwrap_or_else(|| "profile-images".to_string()),
            }),
            _ => None,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            server_host: optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parsed("PORT", 8080)?,
            resend_api_key: optional("RESEND_API_KEY"),
            email_from: optional("EMAIL_FROM")
                .unwrap_or_else(|| "no-reply@petcare.local".to_string()),
            frontend_url: optional("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            supabase,
            request_timeout_secs: parsed("REQUEST_TIMEOUT_SECS", 30)?,
            advance_interval_secs: parsed("ADVANCE_INTERVAL_SECS", 60)?,
            admin_email: optional("ADMIN_EMAIL"),
            admin_password: optional("ADMIN_PASSWORD"),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn required(key: &str) -> AppResult<String> {
    optional(key).ok_or_else(|| AppError::Internal(format!("{} must be set", key)))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> AppResult<T> {
    match optional(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Internal(format!("{} must be a number", key))),
        None => Ok(default),
    }
}
