//! Object store holding the videos, thumbnails and the index document.

mod local;
mod s3;

pub use local::LocalStore;
pub use s3::S3Store;

use std::{fmt::Display, path::Path};

use async_trait::async_trait;

use crate::retry::{retry_with_backoff, RetryPolicy};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_JPEG: &str = "image/jpeg";
pub const CONTENT_TYPE_MP4: &str = "video/mp4";

/// Opaque version token of a stored object, like an S3 ETag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion(pub String);

impl Display for ObjectVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub version: Option<ObjectVersion>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object store request failed: {0}")]
    Remote(String),
}

/// Key-value blob store addressed by string keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns `None` if there's no object under this key.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError>;

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<Option<ObjectVersion>, StoreError>;

    /// Like [`ObjectStore::put`], but streams the contents from a file on disk.
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<Option<ObjectVersion>, StoreError>;

    /// Existence check. Returns the current version if the object exists.
    async fn head(&self, key: &str) -> Result<Option<ObjectVersion>, StoreError>;

    /// Publicly reachable URL of the object under this key.
    fn public_url(&self, key: &str) -> String;
}

/// Join a public base URL and a key with exactly one slash in between.
#[must_use]
pub fn join_public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

/// Upload an asset, retrying transient failures. Returns its public URL.
pub async fn upload_with_retry(
    store: &dyn ObjectStore,
    policy: RetryPolicy,
    key: &str,
    data: &[u8],
    content_type: &str,
) -> Result<String, StoreError> {
    retry_with_backoff(policy, &format!("upload of {key}"), || {
        store.put(key, data.to_vec(), content_type)
    })
    .await?;
    Ok(store.public_url(key))
}

/// Upload a file from disk, retrying transient failures. Returns its public URL.
pub async fn upload_file_with_retry(
    store: &dyn ObjectStore,
    policy: RetryPolicy,
    key: &str,
    path: &Path,
    content_type: &str,
) -> Result<String, StoreError> {
    retry_with_backoff(policy, &format!("upload of {key}"), || {
        store.put_file(key, path, content_type)
    })
    .await?;
    Ok(store.public_url(key))
}

/// Keys of the assets belonging to one video, and of runtime settings.
pub mod keys {
    pub const TITLES: &str = "config/titles.json";
    pub const BLUR: &str = "config/blur.json";

    #[must_use]
    pub fn video(video_id: &str) -> String {
        format!("videos/{video_id}.mp4")
    }

    #[must_use]
    pub fn thumb(video_id: &str) -> String {
        format!("thumbs/{video_id}.jpg")
    }

    #[must_use]
    pub fn safe_thumb(video_id: &str) -> String {
        format!("thumbs/{video_id}_blur.jpg")
    }
}
