//! Image ingestion and storage. Uploaded bytes are decoded, cover-resized to
//! the target frame, re-encoded as JPEG quality 90 and written under the
//! public upload directory. Stored records keep filenames only; the files are
//! served from the static path.

use std::{io::Cursor, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use image::{ImageReader, codecs::jpeg::JpegEncoder, imageops::FilterType};
use rand::Rng;
use uuid::Uuid;

use crate::error::AppError;

/// Gallery and featured property shots, 3:2 landscape frame.
const PROPERTY_WIDTH: u32 = 2000;
const PROPERTY_HEIGHT: u32 = 1333;
/// Square profile photos.
const PHOTO_SIDE: u32 = 500;
const JPEG_QUALITY: u8 = 90;

/// Filenames produced by one property upload batch.
#[derive(Debug, Clone, Default)]
pub struct PropertyImages {
    pub featured_image: Option<String>,
    pub images: Vec<String>,
}

/// MediaStore
///
/// The file storage boundary. The production implementation processes and
/// persists to the local filesystem; tests swap in a mock that records calls.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Processes a property upload batch. All-or-nothing: if any file fails to
    /// decode or write, files already written by this batch are removed and
    /// the error is returned.
    async fn store_property_images(
        &self,
        featured: Option<Vec<u8>>,
        gallery: Vec<Vec<u8>>,
    ) -> Result<PropertyImages, AppError>;

    /// Processes a profile photo, returning its filename.
    async fn store_user_photo(&self, user_id: Uuid, data: Vec<u8>) -> Result<String, AppError>;

    /// Removes a stored file. Idempotent and best-effort: a missing file or a
    /// failed removal is logged, never surfaced.
    async fn delete(&self, filename: &str);
}

pub type MediaState = Arc<dyn MediaStore>;

/// Decode, cover-resize and re-encode as JPEG. CPU-bound, so callers run it
/// on the blocking pool.
fn process_jpeg(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, AppError> {
    let decoded = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| AppError::Internal(format!("image probe failed: {e}")))?
        .decode()
        .map_err(|_| {
            AppError::Validation("Not an image! Please upload only images.".to_string())
        })?;

    let resized = decoded.resize_to_fill(width, height, FilterType::Lanczos3);

    let mut out = Vec::new();
    resized
        .write_with_encoder(JpegEncoder::new_with_quality(
            Cursor::new(&mut out),
            JPEG_QUALITY,
        ))
        .map_err(|e| AppError::Internal(format!("jpeg encode failed: {e}")))?;
    Ok(out)
}

/// FsMediaStore
///
/// Local-filesystem implementation writing under the configured upload
/// directory (served statically at /public/img).
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn write_processed(
        &self,
        filename: &str,
        data: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<(), AppError> {
        let bytes =
            tokio::task::spawn_blocking(move || process_jpeg(&data, width, height))
                .await
                .map_err(|e| AppError::Internal(format!("image task panicked: {e}")))??;

        let path = self.root.join(subdir_for(filename)).join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::Internal(format!("failed to write {}: {e}", path.display())))
    }

    /// Batch prefix shared by all files of one upload, e.g.
    /// `property-1724400000000-483920175`.
    fn batch_prefix() -> String {
        let ts = Utc::now().timestamp_millis();
        let rand: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
        format!("property-{ts}-{rand}")
    }
}

/// Files are served from per-kind subdirectories of the upload root; the kind
/// is recoverable from the filename prefix.
fn subdir_for(filename: &str) -> &'static str {
    if filename.starts_with("user-") {
        "users"
    } else {
        "properties"
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn store_property_images(
        &self,
        featured: Option<Vec<u8>>,
        gallery: Vec<Vec<u8>>,
    ) -> Result<PropertyImages, AppError> {
        tokio::fs::create_dir_all(self.root.join("properties"))
            .await
            .map_err(|e| AppError::Internal(format!("failed to create upload dir: {e}")))?;

        let prefix = Self::batch_prefix();
        let mut written: Vec<String> = Vec::new();
        let mut result = PropertyImages::default();
        let mut first_err: Option<AppError> = None;

        // One future per file, processed and written concurrently.
        let featured_write = async {
            match featured {
                Some(data) => {
                    let filename = format!("{prefix}-featured.jpeg");
                    self.write_processed(&filename, data, PROPERTY_WIDTH, PROPERTY_HEIGHT)
                        .await
                        .map(|_| Some(filename))
                }
                None => Ok(None),
            }
        };
        let gallery_writes = join_all(gallery.into_iter().enumerate().map(|(i, data)| {
            let filename = format!("{prefix}-{}.jpeg", i + 1);
            async move {
                self.write_processed(&filename, data, PROPERTY_WIDTH, PROPERTY_HEIGHT)
                    .await
                    .map(|_| filename)
            }
        }));
        let (featured_outcome, gallery_outcomes) = futures::join!(featured_write, gallery_writes);

        match featured_outcome {
            Ok(Some(filename)) => {
                written.push(filename.clone());
                result.featured_image = Some(filename);
            }
            Ok(None) => {}
            Err(err) => first_err = Some(err),
        }
        for outcome in gallery_outcomes {
            match outcome {
                Ok(filename) => {
                    written.push(filename.clone());
                    result.images.push(filename);
                }
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_err {
            // All-or-nothing: roll back files already written by this batch.
            join_all(written.iter().map(|filename| self.delete(filename))).await;
            return Err(err);
        }

        Ok(result)
    }

    async fn store_user_photo(&self, user_id: Uuid, data: Vec<u8>) -> Result<String, AppError> {
        tokio::fs::create_dir_all(self.root.join("users"))
            .await
            .map_err(|e| AppError::Internal(format!("failed to create upload dir: {e}")))?;

        let filename = format!("user-{user_id}-{}.jpeg", Utc::now().timestamp_millis());
        self.write_processed(&filename, data, PHOTO_SIDE, PHOTO_SIDE)
            .await?;
        Ok(filename)
    }

    async fn delete(&self, filename: &str) {
        let path = self.root.join(subdir_for(filename)).join(filename);
        if let Err(err) = tokio::fs::remove_file(&path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(file = %path.display(), error = %err, "failed to remove media file");
            }
        }
    }
}

/// MockMediaStore
///
/// Records stored and deleted filenames without touching the filesystem.
#[derive(Default)]
pub struct MockMediaStore {
    pub stored: std::sync::Mutex<Vec<String>>,
    pub deleted: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl MediaStore for MockMediaStore {
    async fn store_property_images(
        &self,
        featured: Option<Vec<u8>>,
        gallery: Vec<Vec<u8>>,
    ) -> Result<PropertyImages, AppError> {
        let mut result = PropertyImages::default();
        let mut stored = self.stored.lock().unwrap();
        if featured.is_some() {
            let filename = format!("property-mock-{}-featured.jpeg", stored.len());
            stored.push(filename.clone());
            result.featured_image = Some(filename);
        }
        for _ in gallery {
            let filename = format!("property-mock-{}.jpeg", stored.len());
            stored.push(filename.clone());
            result.images.push(filename);
        }
        Ok(result)
    }

    async fn store_user_photo(&self, user_id: Uuid, _data: Vec<u8>) -> Result<String, AppError> {
        let filename = format!("user-{user_id}-mock.jpeg");
        self.stored.lock().unwrap().push(filename.clone());
        Ok(filename)
    }

    async fn delete(&self, filename: &str) {
        self.deleted.lock().unwrap().push(filename.to_string());
    }
}
