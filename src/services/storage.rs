use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;

use crate::config::{Config, SupabaseConfig};
use crate::error::{AppError, AppResult};

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Stores `bytes` under `path` and returns the public URL.
    async fn upload(&self, path: &str, content_type: &str, bytes: Bytes) -> AppResult<String>;
}

pub struct SupabaseStorage {
    client: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseStorage {
    pub fn new(config: SupabaseConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.url, self.config.bucket, path
        )
    }
}

#[async_trait]
impl BlobStorage for SupabaseStorage {
    async fn upload(&self, path: &str, content_type: &str, bytes: Bytes) -> AppResult<String> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.config.url, self.config.bucket, path
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.key)
            .header("apikey", &self.config.key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Storage request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Storage provider returned {}: {}",
                status, body
            )));
        }

        Ok(self.public_url(path))
    }
}

pub struct DisabledStorage;

#[async_trait]
impl BlobStorage for DisabledStorage {
    async fn upload(&self, _path: &str, _content_type: &str, _bytes: Bytes) -> AppResult<String> {
        Err(AppError::Internal(
            "File storage is not configured".to_string(),
        ))
    }
}

pub fn from_config(config: &Config) -> AppResult<Arc<dyn BlobStorage>> {
    match &config.supabase {
        Some(supabase) => Ok(Arc::new(SupabaseStorage::new(supabase.clone())?)),
        None => {
            tracing::warn!("SUPABASE_URL/SUPABASE_KEY not set, profile uploads are disabled");
            Ok(Arc::new(DisabledStorage))
        }
    }
}
