pub mod amounts;
pub mod cache;
pub mod controller;
pub mod domain;
pub mod error;
pub mod ids;
pub mod memory;
pub mod ports;
pub mod receipts;
pub mod reconcile;
pub mod stats;
pub mod upload;

pub use controller::{EndedTrip, LifecycleSettings, StartTripRequest, StartedTrip, TripController};
pub use domain::{
    ActiveTrip, EndDraft, Odometer, PhotoPhase, PhotoRef, ReceiptCategory, ReceiptQuery,
    ReceiptRecord, RemoteTripRecord, TripId, TripState,
};
pub use error::{PreconditionError, TripError, TripResult, ValidationError};
pub use ports::{
    PhotoStore, PortError, PortResult, ReceiptStore, RetryPrompt, TripCache, TripStore,
    UploadDecision,
};
pub use receipts::{ReceiptForm, ReceiptService, ReceiptSubmission};
pub use reconcile::{reconcile, Reconciliation};
