//! services/trip_api/src/web/state.rs
//!
//! Defines the application's shared and connection-specific states.

use crate::adapters::PhotoStaging;
use crate::config::Config;
use std::sync::Arc;
use trip_tracker_core::domain::PhotoRef;
use trip_tracker_core::ports::TripStore;
use trip_tracker_core::upload::PhotoUploader;
use trip_tracker_core::{ReceiptService, TripController};

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub trips: Arc<dyn TripStore>,
    /// The single lifecycle controller of the process.
    pub controller: Arc<TripController>,
    pub receipts: ReceiptService,
    /// Looks up the photos stored for a trip.
    pub photos: PhotoUploader,
    pub staging: PhotoStaging,
}

//=========================================================================================
// ConnectionState (Specific to One WebSocket Connection)
//=========================================================================================

/// The state for a single WebSocket connection.
#[derive(Debug, Default)]
pub struct ConnectionState {
    /// The last photo frame received and not yet consumed by a transition.
    pub pending_photo: Option<PhotoRef>,
}
