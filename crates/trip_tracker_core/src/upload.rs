//! crates/trip_tracker_core/src/upload.rs
//!
//! The photo upload retry loop shared by trip start and trip end.
//!
//! One attempt reads the captured file and puts it into the object store. When
//! it fails, the user decides between Retry and Cancel; there is no attempt cap
//! and no backoff. Each attempt is bounded by its own timeout, the human
//! decision is not.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::{PhotoPhase, PhotoRef};
use crate::ports::{PhotoStore, PortError, PortResult, RetryPrompt, UploadDecision};

/// Why a single upload attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Could not read photo {path}: {source}")]
    ReadPhoto {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Photo store rejected the upload: {0}")]
    Store(#[from] PortError),
    #[error("Upload timed out after {0:?}")]
    Timeout(Duration),
}

/// `{folder}/{owner_id}_{millis}.{extension}`
pub fn object_path(folder: &str, owner_id: &str, at: DateTime<Utc>, extension: &str) -> String {
    format!("{folder}/{owner_id}_{}.{extension}", at.timestamp_millis())
}

/// The upload time encoded in an object path, when `path` belongs to `prefix`.
fn uploaded_millis(path: &str, prefix: &str) -> Option<i64> {
    let rest = path.strip_prefix(prefix)?;
    let millis = rest.split_once('.').map_or(rest, |(millis, _)| millis);
    millis.parse().ok()
}

pub fn content_type_for(extension: &str) -> &'static str {
    if extension.eq_ignore_ascii_case("png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}

/// Where a trip's photos can be fetched from. A phase whose upload was
/// cancelled or never attempted has no URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TripPhotos {
    pub start_url: Option<String>,
    pub end_url: Option<String>,
}

/// Uploads captured photos into the object store.
#[derive(Clone)]
pub struct PhotoUploader {
    store: Arc<dyn PhotoStore>,
    attempt_timeout: Duration,
}

impl PhotoUploader {
    pub fn new(store: Arc<dyn PhotoStore>, attempt_timeout: Duration) -> Self {
        Self {
            store,
            attempt_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn PhotoStore> {
        &self.store
    }

    /// One upload attempt. Returns the object path on success.
    pub async fn upload_once(
        &self,
        folder: &str,
        owner_id: &str,
        photo: &PhotoRef,
    ) -> Result<String, UploadError> {
        let extension = photo.extension();
        let path = object_path(folder, owner_id, Utc::now(), &extension);
        let bytes = tokio::fs::read(photo.path())
            .await
            .map_err(|source| UploadError::ReadPhoto {
                path: photo.path().display().to_string(),
                source,
            })?;

        let put = self.store.put(&path, bytes, content_type_for(&extension));
        match tokio::time::timeout(self.attempt_timeout, put).await {
            Ok(Ok(())) => Ok(path),
            Ok(Err(e)) => Err(UploadError::Store(e)),
            Err(_) => Err(UploadError::Timeout(self.attempt_timeout)),
        }
    }

    /// Uploads a trip photo, asking `prompt` after every failure.
    ///
    /// Returns `false` straight away when there is nothing to upload, and
    /// `false` when the user cancels. Callers that require a photo must check
    /// for one before calling.
    pub async fn attempt_upload(
        &self,
        owner_id: &str,
        phase: PhotoPhase,
        photo: Option<&PhotoRef>,
        prompt: &dyn RetryPrompt,
    ) -> bool {
        let Some(photo) = photo else {
            debug!(owner_id, %phase, "No photo to upload.");
            return false;
        };

        let mut attempt: u32 = 1;
        loop {
            match self.upload_once(phase.as_str(), owner_id, photo).await {
                Ok(path) => {
                    info!(owner_id, %phase, %path, attempt, "Trip photo uploaded.");
                    return true;
                }
                Err(e) => {
                    warn!(owner_id, %phase, attempt, "Trip photo upload failed: {}", e);
                    match prompt.upload_failed(phase, &e.to_string()).await {
                        UploadDecision::Retry => attempt += 1,
                        UploadDecision::Cancel => {
                            info!(owner_id, %phase, "Photo upload cancelled by user.");
                            return false;
                        }
                    }
                }
            }
        }
    }

    /// Finds the photos stored for a trip. When a phase was uploaded more
    /// than once, the latest upload wins.
    pub async fn trip_photos(&self, trip_id: &str) -> PortResult<TripPhotos> {
        Ok(TripPhotos {
            start_url: self.latest_url(PhotoPhase::Start, trip_id).await?,
            end_url: self.latest_url(PhotoPhase::End, trip_id).await?,
        })
    }

    async fn latest_url(&self, phase: PhotoPhase, trip_id: &str) -> PortResult<Option<String>> {
        let prefix = format!("{}/{trip_id}_", phase.as_str());
        let latest = self
            .store
            .list(&prefix)
            .await?
            .into_iter()
            .filter_map(|path| uploaded_millis(&path, &prefix).map(|millis| (millis, path)))
            .max();
        match latest {
            Some((_, path)) => Ok(Some(self.store.url_for(&path).await?)),
            None => Ok(None),
        }
    }
}
