//! services/trip_api/src/adapters/photos.rs
//!
//! Filesystem storage for photos: the object store that uploads land in, and a
//! staging area for images received from clients before they are uploaded.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use trip_tracker_core::domain::PhotoRef;
use trip_tracker_core::ports::{PhotoStore, PortError, PortResult};
use uuid::Uuid;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Resolves a relative object path under `root`, refusing anything that would escape it.
fn resolve(root: &Path, object_path: &str) -> PortResult<PathBuf> {
    let relative = Path::new(object_path);
    let safe = !object_path.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(PortError::Unexpected(format!(
            "Refusing object path '{}'",
            object_path
        )));
    }
    Ok(root.join(relative))
}

//=========================================================================================
// Object Store
//=========================================================================================

/// A `PhotoStore` that writes objects below a root directory and serves them
/// from a configured base URL.
#[derive(Clone)]
pub struct FsPhotoStore {
    root: PathBuf,
    base_url: String,
}

impl FsPhotoStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PhotoStore for FsPhotoStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> PortResult<()> {
        let target = resolve(&self.root, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PortError::Unavailable(format!("Photo store unavailable: {}", e)))?;
        }
        // Objects are never overwritten.
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await;
        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(PortError::Unexpected(format!("Object {} already exists", path)))
            }
            Err(e) => return Err(PortError::Unavailable(format!("Could not store {}: {}", path, e))),
        };
        tokio::io::AsyncWriteExt::write_all(&mut file, &bytes)
            .await
            .map_err(|e| PortError::Unavailable(format!("Could not store {}: {}", path, e)))?;
        debug!(%path, content_type, size = bytes.len(), "Photo stored.");
        Ok(())
    }

    async fn url_for(&self, path: &str) -> PortResult<String> {
        let target = resolve(&self.root, path)?;
        match tokio::fs::try_exists(&target).await {
            Ok(true) => Ok(format!("{}/{}", self.base_url, path)),
            Ok(false) => Err(PortError::NotFound(format!("Object {} not found", path))),
            Err(e) => Err(PortError::Unavailable(e.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> PortResult<Vec<String>> {
        let (folder, name_prefix) = match prefix.rsplit_once('/') {
            Some((folder, name)) => (Some(folder), name),
            None => (None, prefix),
        };
        let dir = match folder {
            Some(folder) => resolve(&self.root, folder)?,
            None => self.root.clone(),
        };
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PortError::Unavailable(format!("Could not list {}: {}", prefix, e))),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PortError::Unavailable(format!("Could not list {}: {}", prefix, e)))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.starts_with(name_prefix) {
                continue;
            }
            paths.push(match folder {
                Some(folder) => format!("{folder}/{name}"),
                None => name,
            });
        }
        Ok(paths)
    }
}

//=========================================================================================
// Staging Area
//=========================================================================================

/// Holds client-sent images as local files until the lifecycle uploads them.
#[derive(Clone)]
pub struct PhotoStaging {
    dir: PathBuf,
}

impl PhotoStaging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `bytes` to a fresh file. PNG data keeps a `.png` name, anything
    /// else is treated as JPEG.
    pub async fn stage(&self, bytes: &[u8]) -> std::io::Result<PhotoRef> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let extension = if bytes.starts_with(&PNG_SIGNATURE) {
            "png"
        } else {
            "jpg"
        };
        let path = self.dir.join(format!("{}.{}", Uuid::new_v4(), extension));
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), size = bytes.len(), "Photo staged.");
        Ok(PhotoRef::new(path))
    }

    /// Removes a staged file. Missing files are ignored.
    pub async fn discard(&self, photo: &PhotoRef) {
        match tokio::fs::remove_file(photo.path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %photo.path().display(), "Could not remove staged photo: {}", e),
        }
    }
}
