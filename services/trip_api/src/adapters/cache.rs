//! services/trip_api/src/adapters/cache.rs
//!
//! A `TripCache` backed by a single JSON object on disk.
//!
//! Every write replaces the file through a temporary sibling and a rename, so
//! a crash mid-write leaves either the old or the new contents, never a torn file.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;
use trip_tracker_core::cache::ALL_KEYS;
use trip_tracker_core::ports::{PortError, PortResult, TripCache};

pub struct FileTripCache {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileTripCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> PortResult<HashMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                PortError::Unexpected(format!(
                    "Trip cache {} is not valid JSON: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }

    async fn write(&self, entries: &HashMap<String, String>) -> PortResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| PortError::Unexpected(format!("Could not encode trip cache: {}", e)))?;

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| io_error(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        debug!(path = %self.path.display(), keys = entries.len(), "Trip cache written.");
        Ok(())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> PortError {
    PortError::Unexpected(format!("Trip cache I/O on {} failed: {}", path.display(), e))
}

#[async_trait]
impl TripCache for FileTripCache {
    async fn get_all(&self) -> PortResult<HashMap<String, String>> {
        self.read().await
    }

    async fn set_all(&self, entries: HashMap<String, String>) -> PortResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut current = self.read().await?;
        current.extend(entries);
        self.write(&current).await
    }

    async fn clear_all(&self) -> PortResult<()> {
        let _guard = self.write_lock.lock().await;
        // An unreadable file is replaced outright rather than left behind.
        let mut current = self.read().await.unwrap_or_default();
        for key in ALL_KEYS {
            current.remove(key);
        }
        self.write(&current).await
    }
}
