use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.cloudinary.com";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("blob storage returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobKey {
    pub folder: String,
    pub id: i64,
}

impl BlobKey {
    pub fn new(folder: impl Into<String>, id: i64) -> Self {
        Self {
            folder: folder.into(),
            id,
        }
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.folder, self.id)
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores PNG bytes under `key` and returns the public url of the blob.
    async fn upload_png(&self, key: &BlobKey, png: Vec<u8>) -> Result<Url, BlobError>;
}

#[derive(Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for CloudinaryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudinaryCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

pub struct CloudinaryStore {
    http: Client,
    upload_url: Url,
    credentials: CloudinaryCredentials,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Url,
}

impl CloudinaryStore {
    pub fn new(credentials: CloudinaryCredentials, timeout: Duration) -> Result<Self, BlobError> {
        Self::with_base_url(DEFAULT_BASE_URL, credentials, timeout)
    }

    pub fn with_base_url(
        base_url: &str,
        credentials: CloudinaryCredentials,
        timeout: Duration,
    ) -> Result<Self, BlobError> {
        let upload_url = Url::parse(base_url)?.join(&format!(
            "/v1_1/{}/image/upload",
            credentials.cloud_name
        ))?;
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            upload_url,
            credentials,
        })
    }

    fn signed_params(&self, key: &BlobKey, timestamp: i64) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("asset_folder", key.folder.clone()),
            ("public_id", key.to_string()),
            ("timestamp", timestamp.to_string()),
        ];
        let signature = sign(&params, &self.credentials.api_secret);
        params.push(("api_key", self.credentials.api_key.clone()));
        params.push(("signature", signature));
        params.push(("signature_algorithm", "sha256".to_string()));
        params
    }
}

#[async_trait]
impl BlobStore for CloudinaryStore {
    async fn upload_png(&self, key: &BlobKey, png: Vec<u8>) -> Result<Url, BlobError> {
        let timestamp = time::OffsetDateTime::now_utc().unix_timestamp();
        let file = Part::bytes(png)
            .file_name(format!("{}.png", key.id))
            .mime_str("image/png")?;
        let mut form = Form::new().part("file", file);
        for (name, value) in self.signed_params(key, timestamp) {
            form = form.text(name, value);
        }

        let response = self
            .http
            .post(self.upload_url.clone())
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BlobError::Api { status, body });
        }
        let payload: UploadResponse = response.json().await?;
        Ok(payload.secure_url)
    }
}

/// Request signature: the parameters sorted by name, joined as `k=v&k=v`,
/// followed by the api secret, hashed with SHA-256.
fn sign(params: &[(&'static str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<_> = params.iter().collect();
    sorted.sort_by_key(|(name, _)| *name);
    let joined = sorted
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    format!("{:x}", hasher.finalize())
}
