//! Receipt image storage.

use async_trait::async_trait;
use reqwest::{header, Client};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::database::store::{ObjectStore, StoreError, StoreResult};

/// Supabase storage bucket, addressed through its object API.
#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    client: Client,
    base_url: String,
    api_key: String,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(base_url: &str, api_key: &str, bucket: &str) -> StoreResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            bucket: bucket.to_string(),
        })
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn put_image(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> StoreResult<String> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path);
        let response = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(header::CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, body });
        }

        debug!(bucket = %self.bucket, path, "uploaded object");
        Ok(self.public_url(path))
    }
}

/// Directory-backed object store used with the SQLite backend.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_image(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> StoreResult<String> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(format!("file://{}", target.display()))
    }
}

/// Object path for a receipt upload, keyed by user and upload time.
pub fn receipt_path(telegram_id: i64, uploaded_at: chrono::DateTime<chrono::Utc>) -> String {
    format!("{}/{}.jpg", telegram_id, uploaded_at.format("%Y%m%d%H%M%S%3f"))
}
