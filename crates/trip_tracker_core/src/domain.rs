//! crates/trip_tracker_core/src/domain.rs
//!
//! Defines the pure, core data structures for the trip tracker.
//! These structs are independent of any database, cache or wire format.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::amounts::ReceiptAmounts;
use crate::error::ValidationError;

//=========================================================================================
// Identifiers and Inputs
//=========================================================================================

/// The client-generated identifier of a trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(String);

impl TripId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An odometer reading as the user entered it, together with its parsed value.
///
/// The raw text is what gets stored remotely and in the local cache; the
/// decimal value is what comparisons use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Odometer {
    raw: String,
    value: Decimal,
}

impl Odometer {
    /// Highest reading accepted, in kilometres.
    pub const MAX: i64 = 99_999_999;

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingOdometer);
        }
        let invalid = || ValidationError::InvalidOdometer(trimmed.to_string());
        let value = Decimal::from_str(trimmed).map_err(|_| invalid())?;
        if (value.is_sign_negative() && !value.is_zero()) || value > Decimal::from(Self::MAX) {
            return Err(invalid());
        }
        Ok(Self {
            raw: trimmed.to_string(),
            value,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> Decimal {
        self.value
    }
}

impl TryFrom<String> for Odometer {
    type Error = ValidationError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Odometer::parse(&raw)
    }
}

impl From<Odometer> for String {
    fn from(odometer: Odometer) -> Self {
        odometer.raw
    }
}

impl fmt::Display for Odometer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Which end of a trip a photo belongs to. Also the upload folder name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoPhase {
    Start,
    End,
}

impl PhotoPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoPhase::Start => "start",
            PhotoPhase::End => "end",
        }
    }
}

impl fmt::Display for PhotoPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured image that still lives on the device and has not been uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoRef(PathBuf);

impl PhotoRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// The lowercased file extension, falling back to `jpg` when the file name
    /// has none (camera URIs frequently don't).
    pub fn extension(&self) -> String {
        self.0
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "jpg".to_string())
    }
}

//=========================================================================================
// Trip Session State
//=========================================================================================

/// End-of-trip form inputs being edited while a trip is active.
///
/// Kept as raw text so a failed end attempt can hand the user back exactly
/// what they typed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndDraft {
    pub ending_odometer: Option<String>,
    pub earnings: Option<String>,
    /// Server-local file; never part of the wire state.
    #[serde(skip)]
    pub end_photo: Option<PhotoRef>,
}

/// The fields of a trip that has been started and not yet ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTrip {
    pub trip_id: TripId,
    pub starting_odometer: Odometer,
    pub start_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub draft: EndDraft,
}

/// The lifecycle state owned by the `TripController`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TripState {
    /// Reconciliation has not finished yet; no transitions are accepted.
    Uninitialized,
    Idle,
    /// A start has been confirmed and its upload or remote create is in flight.
    Starting,
    Active(ActiveTrip),
    /// An end has been confirmed and its upload or remote update is in flight.
    Ending(ActiveTrip),
}

impl TripState {
    pub fn is_initialized(&self) -> bool {
        !matches!(self, TripState::Uninitialized)
    }

    /// True strictly between a successful start and a successful end.
    pub fn is_active(&self) -> bool {
        matches!(self, TripState::Active(_) | TripState::Ending(_))
    }

    pub fn active_trip(&self) -> Option<&ActiveTrip> {
        match self {
            TripState::Active(trip) | TripState::Ending(trip) => Some(trip),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TripState::Uninitialized => "uninitialized",
            TripState::Idle => "idle",
            TripState::Starting => "starting",
            TripState::Active(_) => "active",
            TripState::Ending(_) => "ending",
        }
    }
}

//=========================================================================================
// Remote Trip Records
//=========================================================================================

/// A trip as stored in the remote trip store, the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTripRecord {
    pub id: TripId,
    pub starting_odometer: String,
    pub start_timestamp: DateTime<Utc>,
    pub ending_odometer: Option<String>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub earnings: Option<Decimal>,
    pub created_at: Option<DateTime<Utc>>,
}

impl RemoteTripRecord {
    /// A record is open until it carries an end timestamp.
    pub fn is_open(&self) -> bool {
        self.end_timestamp.is_none()
    }

    /// Completed trips have both an end timestamp and an ending odometer.
    pub fn is_completed(&self) -> bool {
        self.end_timestamp.is_some()
            && self
                .ending_odometer
                .as_deref()
                .is_some_and(|value| !value.trim().is_empty())
    }

    /// Distance driven, when both readings are present and numeric. Readings
    /// stored before input bounds existed may not subtract; those yield `None`.
    pub fn distance(&self) -> Option<Decimal> {
        let start = Decimal::from_str(self.starting_odometer.trim()).ok()?;
        let end = Decimal::from_str(self.ending_odometer.as_deref()?.trim()).ok()?;
        end.checked_sub(start)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.end_timestamp.map(|end| end - self.start_timestamp)
    }
}

/// The payload used to create a remote record at trip start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrip {
    pub id: TripId,
    pub starting_odometer: String,
    pub start_timestamp: DateTime<Utc>,
}

/// The partial update applied to a remote record at trip end.
///
/// `earnings` is omitted from the update when the user left it blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripEndUpdate {
    pub ending_odometer: String,
    pub end_timestamp: DateTime<Utc>,
    pub earnings: Option<Decimal>,
}

//=========================================================================================
// Receipts
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReceiptCategory {
    Fuel,
    #[serde(rename = "Car Service")]
    CarService,
    #[serde(rename = "Car Wash")]
    CarWash,
    Parking,
    Supplies,
    #[serde(rename = "Food/Meals")]
    FoodMeals,
    Tools,
    Maintenance,
}

impl ReceiptCategory {
    pub const ALL: [ReceiptCategory; 8] = [
        ReceiptCategory::Fuel,
        ReceiptCategory::CarService,
        ReceiptCategory::CarWash,
        ReceiptCategory::Parking,
        ReceiptCategory::Supplies,
        ReceiptCategory::FoodMeals,
        ReceiptCategory::Tools,
        ReceiptCategory::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptCategory::Fuel => "Fuel",
            ReceiptCategory::CarService => "Car Service",
            ReceiptCategory::CarWash => "Car Wash",
            ReceiptCategory::Parking => "Parking",
            ReceiptCategory::Supplies => "Supplies",
            ReceiptCategory::FoodMeals => "Food/Meals",
            ReceiptCategory::Tools => "Tools",
            ReceiptCategory::Maintenance => "Maintenance",
        }
    }
}

impl fmt::Display for ReceiptCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiptCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReceiptCategory::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::UnknownCategory(s.to_string()))
    }
}

/// A stored expense receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub id: String,
    pub receipt_date: NaiveDate,
    pub created_at: Option<DateTime<Utc>>,
    pub category: ReceiptCategory,
    pub vendor: String,
    pub description: Option<String>,
    pub subtotal: Decimal,
    pub gst: Decimal,
    pub total_amount: Decimal,
    pub receipt_image_url: Option<String>,
}

/// A validated receipt ready to be written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReceipt {
    pub id: String,
    pub receipt_date: NaiveDate,
    pub category: ReceiptCategory,
    pub vendor: String,
    pub description: Option<String>,
    pub amounts: ReceiptAmounts,
}

/// Filters for listing receipts. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptQuery {
    pub search: Option<String>,
    pub category: Option<ReceiptCategory>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
}
