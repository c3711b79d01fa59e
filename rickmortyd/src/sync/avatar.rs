use std::io::Cursor;
use std::sync::Arc;

use image::ImageFormat;
use rickmorty_core::{ApiError, RickMortyClient};
use thiserror::Error;
use url::Url;

use super::mirror::{MirrorStore, StoreError};
use crate::storage::{BlobError, BlobKey, BlobStore};

#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("avatar fetch failed: {0}")]
    Fetch(#[from] ApiError),
    #[error("avatar re-encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("avatar upload failed: {0}")]
    Upload(#[from] BlobError),
    #[error("encoder task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarOutcome {
    Uploaded(Url),
    AlreadyUploaded,
}

pub struct AvatarMirror {
    client: RickMortyClient,
    blob: Arc<dyn BlobStore>,
    folder: String,
}

impl AvatarMirror {
    pub fn new(client: RickMortyClient, blob: Arc<dyn BlobStore>, folder: impl Into<String>) -> Self {
        Self {
            client,
            blob,
            folder: folder.into(),
        }
    }

    /// Copies the character's avatar into blob storage unless the persisted
    /// flag says it is already there. The flag is set only after the upload
    /// succeeds.
    pub async fn mirror(
        &self,
        store: &MirrorStore,
        character_id: i64,
    ) -> Result<AvatarOutcome, AvatarError> {
        if !store.avatar_pending(character_id).await? {
            return Ok(AvatarOutcome::AlreadyUploaded);
        }

        let original = self.client.fetch_avatar(character_id).await?;
        let png = tokio::task::spawn_blocking(move || reencode_png(&original)).await??;
        let key = BlobKey::new(self.folder.clone(), character_id);
        let url = self.blob.upload_png(&key, png).await?;
        store.mark_avatar_uploaded(character_id).await?;
        tracing::info!(character_id, %url, "avatar mirrored");
        Ok(AvatarOutcome::Uploaded(url))
    }
}

pub fn reencode_png(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let mut out = Cursor::new(Vec::new());
    decoded.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
