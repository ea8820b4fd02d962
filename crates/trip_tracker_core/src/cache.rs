//! crates/trip_tracker_core/src/cache.rs
//!
//! The key layout of the local trip cache and conversion to and from the
//! `ActiveTrip` it mirrors.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::domain::{ActiveTrip, TripId};

pub const ACTIVE_TRIP_ID_KEY: &str = "@trip_active_id";
pub const IS_TRIP_ACTIVE_KEY: &str = "@trip_is_active";
pub const STARTING_ODOMETER_KEY: &str = "@trip_starting_odometer";
pub const START_TIMESTAMP_KEY: &str = "@trip_start_timestamp";
pub const EARNINGS_DRAFT_KEY: &str = "@trip_earnings_draft";

pub const ALL_KEYS: [&str; 5] = [
    ACTIVE_TRIP_ID_KEY,
    IS_TRIP_ACTIVE_KEY,
    STARTING_ODOMETER_KEY,
    START_TIMESTAMP_KEY,
    EARNINGS_DRAFT_KEY,
];

/// The raw contents of the cache, with blank values read as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedTrip {
    pub trip_id: Option<String>,
    pub is_active: bool,
    pub starting_odometer: Option<String>,
    pub start_timestamp: Option<String>,
    pub earnings_draft: Option<String>,
}

impl CachedTrip {
    pub fn from_entries(entries: &HashMap<String, String>) -> Self {
        let read = |key: &str| {
            entries
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            trip_id: read(ACTIVE_TRIP_ID_KEY),
            is_active: read(IS_TRIP_ACTIVE_KEY).as_deref() == Some("true"),
            starting_odometer: read(STARTING_ODOMETER_KEY),
            start_timestamp: read(START_TIMESTAMP_KEY),
            earnings_draft: read(EARNINGS_DRAFT_KEY),
        }
    }

    pub fn from_active(trip: &ActiveTrip) -> Self {
        Self {
            trip_id: Some(trip.trip_id.to_string()),
            is_active: true,
            starting_odometer: Some(trip.starting_odometer.to_string()),
            start_timestamp: Some(trip.start_timestamp.to_rfc3339()),
            earnings_draft: trip.draft.earnings.clone(),
        }
    }

    /// All five keys; absent values are written as empty strings.
    pub fn into_entries(self) -> HashMap<String, String> {
        let mut entries = HashMap::with_capacity(ALL_KEYS.len());
        entries.insert(ACTIVE_TRIP_ID_KEY.to_string(), self.trip_id.unwrap_or_default());
        entries.insert(IS_TRIP_ACTIVE_KEY.to_string(), self.is_active.to_string());
        entries.insert(
            STARTING_ODOMETER_KEY.to_string(),
            self.starting_odometer.unwrap_or_default(),
        );
        entries.insert(
            START_TIMESTAMP_KEY.to_string(),
            self.start_timestamp.unwrap_or_default(),
        );
        entries.insert(
            EARNINGS_DRAFT_KEY.to_string(),
            self.earnings_draft.unwrap_or_default(),
        );
        entries
    }

    /// The cached trip id, but only when the active flag is also set.
    pub fn active_trip_id(&self) -> Option<TripId> {
        match (&self.trip_id, self.is_active) {
            (Some(id), true) => Some(TripId::new(id.clone())),
            _ => None,
        }
    }

    pub fn parsed_start_timestamp(&self) -> Option<DateTime<Utc>> {
        self.start_timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}
