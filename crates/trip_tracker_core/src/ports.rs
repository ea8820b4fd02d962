//! crates/trip_tracker_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the trip tracker's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the remote backend, the device cache and the UI.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::{
    NewReceipt, NewTrip, PhotoPhase, ReceiptQuery, ReceiptRecord, RemoteTripRecord,
    TripEndUpdate, TripId,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (database, filesystem, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// The backend could not be reached at all (connection refused, DNS, pool exhausted).
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

impl PortError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The remote record store holding every trip.
#[async_trait]
pub trait TripStore: Send + Sync {
    /// Inserts a new, open trip. End fields and earnings start out null.
    async fn create(&self, trip: NewTrip) -> PortResult<RemoteTripRecord>;

    /// Point lookup. A missing row is `PortError::NotFound`.
    async fn get(&self, id: &TripId) -> PortResult<RemoteTripRecord>;

    /// Applies the end-of-trip partial update and returns the updated row.
    async fn update_end(&self, id: &TripId, update: TripEndUpdate)
        -> PortResult<RemoteTripRecord>;

    /// Every trip, newest start first.
    async fn list_all(&self) -> PortResult<Vec<RemoteTripRecord>>;
}

/// The remote object store that trip and receipt photos are uploaded to.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> PortResult<()>;

    /// A URL the stored object can be fetched from.
    async fn url_for(&self, path: &str) -> PortResult<String>;

    /// Paths of stored objects that start with `prefix`, in no particular order.
    async fn list(&self, prefix: &str) -> PortResult<Vec<String>>;
}

/// Durable, string-valued key-value storage on the device.
#[async_trait]
pub trait TripCache: Send + Sync {
    async fn get_all(&self) -> PortResult<HashMap<String, String>>;

    /// Writes every entry in `entries`, leaving other keys untouched.
    async fn set_all(&self, entries: HashMap<String, String>) -> PortResult<()>;

    /// Removes every trip key.
    async fn clear_all(&self) -> PortResult<()>;
}

/// What the user chose after a photo upload failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadDecision {
    Retry,
    Cancel,
}

/// Asks the user whether a failed upload should be retried.
///
/// Implementations may wait indefinitely; only the upload itself is time-bounded.
#[async_trait]
pub trait RetryPrompt: Send + Sync {
    async fn upload_failed(&self, phase: PhotoPhase, reason: &str) -> UploadDecision;
}

/// The remote record store holding expense receipts.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn create(&self, receipt: NewReceipt) -> PortResult<ReceiptRecord>;

    async fn get(&self, id: &str) -> PortResult<ReceiptRecord>;

    /// Receipts matching `query`, newest receipt date first.
    async fn query(&self, query: &ReceiptQuery) -> PortResult<Vec<ReceiptRecord>>;

    async fn set_image_url(&self, id: &str, url: &str) -> PortResult<()>;
}
