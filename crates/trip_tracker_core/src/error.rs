//! crates/trip_tracker_core/src/error.rs
//!
//! The error taxonomy surfaced by the trip lifecycle and receipt flows.

use std::time::Duration;

use crate::domain::{PhotoPhase, TripId};
use crate::ports::PortError;

/// Malformed or missing user input. Never retried, never mutates state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please enter a valid odometer reading")]
    MissingOdometer,
    #[error("Please enter a valid odometer reading ('{0}' is not a reading between 0 and 99,999,999)")]
    InvalidOdometer(String),
    #[error("Ending odometer ({ending}) must be greater than starting odometer ({starting})")]
    OdometerNotIncreasing { starting: String, ending: String },
    #[error("A {0} photo is required before you continue")]
    MissingPhoto(PhotoPhase),
    #[error("Earnings must be a non-negative amount up to 9,999,999,999.99 ('{0}' is not valid)")]
    InvalidEarnings(String),
    #[error("Please capture a receipt photo first")]
    MissingReceiptPhoto,
    #[error("Please enter a vendor name")]
    VendorRequired,
    #[error("Vendor name must be {max} characters or less")]
    VendorTooLong { max: usize },
    #[error("Please select a receipt category")]
    CategoryRequired,
    #[error("Unknown receipt category '{0}'")]
    UnknownCategory(String),
    #[error("Please enter a valid date in YYYY-MM-DD format ('{0}' is not valid)")]
    InvalidDate(String),
    #[error("Receipt date cannot be more than one year in the future")]
    DateTooFarInFuture,
    #[error("Description must be {max} characters or less")]
    DescriptionTooLong { max: usize },
    #[error("Please enter a valid total or subtotal amount")]
    AmountRequired,
    #[error("Amount must be between 0 and {max}")]
    AmountOutOfRange { max: u32 },
}

/// An action attempted in the wrong lifecycle state. Never mutates state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    #[error("Trip state is still being restored, please wait")]
    NotInitialized,
    #[error("You have already started a trip ({trip_id})")]
    AlreadyActive { trip_id: TripId },
    #[error("There is no active trip to end")]
    NoActiveTrip,
    #[error("Another trip action is still in progress")]
    TransitionInFlight,
}

/// The error type returned by every lifecycle and receipt operation.
#[derive(Debug, thiserror::Error)]
pub enum TripError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not allowed right now: {0}")]
    Precondition(#[from] PreconditionError),

    /// The remote store rejected the call or could not be reached.
    #[error("Remote store error: {0}")]
    Remote(#[from] PortError),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The user chose Cancel after a failed photo upload.
    #[error("The {phase} photo upload was cancelled")]
    UploadCancelled { phase: PhotoPhase },
}

impl TripError {
    /// Whether resubmitting the same action may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TripError::Remote(_) | TripError::Timeout(_) | TripError::UploadCancelled { .. }
        )
    }

    /// The text shown to the user for this error.
    pub fn user_message(&self) -> String {
        match self {
            TripError::Validation(e) => e.to_string(),
            TripError::Precondition(e) => e.to_string(),
            TripError::Remote(_) | TripError::Timeout(_) => {
                "Could not reach the trip store. Please check your connection and try again."
                    .to_string()
            }
            TripError::UploadCancelled { phase } => {
                format!("The {phase} photo was not uploaded, so nothing was saved.")
            }
        }
    }
}

pub type TripResult<T> = Result<T, TripError>;
