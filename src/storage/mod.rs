//! Object storage for uploaded images.
//!
//! Stored image references are plain strings. [`ImageStorage::resolve`] is the
//! one place that decides what a browser should be shown for them.

#[cfg(test)]
pub(crate) mod memory;
mod s3;

use std::{io::Cursor, sync::Arc, time::Duration};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

pub use s3::S3Store;

use crate::{
    config::{ImageConfig, StorageConfig},
    metrics::STORAGE_CLEANUP_FAILED,
    models::DELETED_IMAGE_SENTINEL,
};

/// JPEG quality used when re-encoding uploads.
const JPEG_QUALITY: u8 = 85;

const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".tif", ".webp", ".svg", ".ico", ".heic",
    ".heif",
];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object store request failed: {0}")]
    Backend(String),
    #[error("invalid presigning configuration: {0}")]
    Presign(String),
    #[error("uploaded file is not a readable image")]
    Decode(#[from] image::ImageError),
    #[error("image processing task failed")]
    Join(#[from] tokio::task::JoinError),
}

/// A bucket of objects addressed by key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, publicly readable.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    /// A time-limited GET URL for `key`.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Which picture of a person an upload is for. Doubles as the key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Portrait,
    Background,
}

impl ImageKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Portrait => "portrait",
            Self::Background => "background",
        }
    }
}

/// Image uploads, reference resolution and cleanup over an [`ObjectStore`].
#[derive(Clone)]
pub struct ImageStorage {
    store: Arc<dyn ObjectStore>,
    /// `{endpoint}/{bucket}/`
    prefix: String,
    signed_url_ttl: Duration,
    images: ImageConfig,
}

impl std::fmt::Debug for ImageStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStorage")
            .field("prefix", &self.prefix)
            .field("signed_url_ttl", &self.signed_url_ttl)
            .finish_non_exhaustive()
    }
}

impl ImageStorage {
    pub fn new(store: Arc<dyn ObjectStore>, storage: &StorageConfig, images: ImageConfig) -> Self {
        Self {
            store,
            prefix: storage.object_url_prefix(),
            signed_url_ttl: Duration::from_secs(storage.signed_url_ttl_secs),
            images,
        }
    }

    /// Re-encode an uploaded picture as JPEG and store it.
    ///
    /// Returns the object's public URL, `{endpoint}/{bucket}/{kind}/{uuid}-{file name}`.
    pub async fn upload(
        &self,
        kind: ImageKind,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError> {
        let jpeg = tokio::task::spawn_blocking(move || recompress(&bytes)).await??;

        let key = format!("{}/{}-{}", kind.prefix(), Uuid::new_v4(), base_name(file_name));
        self.store.put(&key, jpeg, "image/jpeg").await?;

        Ok(format!("{}{key}", self.prefix))
    }

    /// The object key of `url`, if it points into the configured bucket.
    pub fn object_key<'a>(&self, url: &'a str) -> Option<&'a str> {
        let parsed = url::Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }

        url.strip_prefix(&self.prefix).filter(|key| !key.is_empty())
    }

    /// What to show the browser for a stored image reference.
    ///
    /// The removal sentinel maps to the deleted placeholder; blank or implausible
    /// references map to the default placeholder; managed objects get a signed
    /// URL; anything else is an external URL and passes through.
    pub async fn resolve(&self, reference: Option<&str>) -> String {
        let Some(reference) = reference else {
            return self.images.default_url.clone();
        };

        if reference == DELETED_IMAGE_SENTINEL {
            return self.images.deleted_url.clone();
        }

        if !is_plausible_image_url(reference) {
            return self.images.default_url.clone();
        }

        let Some(key) = self.object_key(reference) else {
            return reference.to_owned();
        };

        match self.store.presign_get(key, self.signed_url_ttl).await {
            Ok(url) => url,
            Err(err) => {
                warn!(key, "failed to sign image url: {err}");
                self.images.default_url.clone()
            }
        }
    }

    /// Delete the object behind `reference` when it is one of ours.
    ///
    /// Never fails: errors are logged and counted, and the object is left behind.
    pub async fn delete_if_managed(&self, reference: Option<&str>) {
        let Some(key) = reference.and_then(|r| self.object_key(r)) else {
            return;
        };

        if let Err(err) = self.store.delete(key).await {
            error!(key, "failed to delete stored image, object is orphaned: {err}");
            counter!(STORAGE_CLEANUP_FAILED).increment(1);
        }
    }
}

/// A well-formed absolute URL, or something that at least ends like an image file.
pub fn is_plausible_image_url(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }

    if url::Url::parse(trimmed).is_ok_and(|u| u.has_host()) {
        return true;
    }

    let lower = trimmed.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn recompress(bytes: &[u8]) -> Result<Vec<u8>, StorageError> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(&rgb)?;
    Ok(out.into_inner())
}

/// The last path component of a client-supplied file name.
fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("upload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    fn storage(store: Arc<MemoryStore>) -> ImageStorage {
        let config = StorageConfig {
            endpoint: "https://s3.example.com".to_owned(),
            bucket: "farewell".to_owned(),
            region: "us-east-1".to_owned(),
            access_key: "key".to_owned(),
            secret_key: "secret".to_owned(),
            signed_url_ttl_secs: 3600,
            max_upload_bytes: 5 * 1024 * 1024,
        };
        ImageStorage::new(store, &config, ImageConfig::default())
    }

    fn png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn removed_images_resolve_to_the_deleted_placeholder() {
        let images = storage(Arc::new(MemoryStore::default()));
        assert_eq!(
            images.resolve(Some("DELETED BY ADMIN")).await,
            ImageConfig::default().deleted_url
        );
    }

    #[tokio::test]
    async fn blank_references_resolve_to_the_default_placeholder() {
        let images = storage(Arc::new(MemoryStore::default()));
        let default = ImageConfig::default().default_url;

        assert_eq!(images.resolve(None).await, default);
        assert_eq!(images.resolve(Some("")).await, default);
        assert_eq!(images.resolve(Some("not an image")).await, default);
    }

    #[tokio::test]
    async fn external_urls_pass_through() {
        let images = storage(Arc::new(MemoryStore::default()));
        assert_eq!(
            images.resolve(Some("https://cdn.example.com/x.png")).await,
            "https://cdn.example.com/x.png"
        );
    }

    #[tokio::test]
    async fn managed_objects_are_signed() {
        let images = storage(Arc::new(MemoryStore::default()));
        let input = "https://s3.example.com/farewell/portrait/abc.jpg";

        let resolved = images.resolve(Some(input)).await;
        assert_ne!(resolved, input);
        assert!(resolved.contains("portrait/abc.jpg"));
        assert!(resolved.contains("expires=3600"));
    }

    #[test]
    fn only_http_urls_under_the_bucket_have_keys() {
        let images = storage(Arc::new(MemoryStore::default()));
        assert_eq!(
            images.object_key("https://s3.example.com/farewell/background/x.jpg"),
            Some("background/x.jpg")
        );
        assert_eq!(images.object_key("https://s3.example.com/other/x.jpg"), None);
        assert_eq!(images.object_key("https://s3.example.com/farewell/"), None);
        assert_eq!(images.object_key("portrait/x.jpg"), None);
    }

    #[tokio::test]
    async fn uploads_are_reencoded_under_a_prefixed_key() {
        let store = Arc::new(MemoryStore::default());
        let images = storage(store.clone());

        let url = images
            .upload(ImageKind::Portrait, "C:\\photos\\mum.png", png())
            .await
            .unwrap();

        let key = images.object_key(&url).unwrap();
        assert!(key.starts_with("portrait/"));
        assert!(key.ends_with("-mum.png"));

        let (body, content_type) = store.get(key).unwrap();
        assert_eq!(content_type, "image/jpeg");
        assert_eq!(
            image::guess_format(&body).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[tokio::test]
    async fn garbage_uploads_are_rejected() {
        let store = Arc::new(MemoryStore::default());
        let images = storage(store.clone());

        let err = images
            .upload(ImageKind::Background, "x.png", b"not an image".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Decode(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn cleanup_ignores_foreign_urls_and_tolerates_failures() {
        let store = Arc::new(MemoryStore::default());
        let images = storage(store.clone());
        let url = images.upload(ImageKind::Portrait, "a.png", png()).await.unwrap();

        images
            .delete_if_managed(Some("https://cdn.example.com/a.png"))
            .await;
        assert_eq!(store.len(), 1);

        images.delete_if_managed(Some(&url)).await;
        assert!(store.is_empty());

        store.fail_deletes(true);
        images.delete_if_managed(Some(&url)).await;
    }
}
