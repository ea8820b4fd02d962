//! crates/trip_tracker_core/src/ids.rs
//!
//! Client-side identifier generation for trips and receipts.
//!
//! Ids are a base-36 millisecond timestamp followed by random base-36 digits.
//! Collisions are not detected, only made negligible.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::TripId;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const TRIP_SUFFIX_LEN: usize = 13;
const RECEIPT_SUFFIX_LEN: usize = 9;

pub fn generate_trip_id() -> TripId {
    generate_trip_id_at(Utc::now())
}

pub fn generate_trip_id_at(now: DateTime<Utc>) -> TripId {
    let prefix = to_base36(now.timestamp_millis().max(0) as u128);
    TripId::new(format!("{prefix}{}", random_base36(TRIP_SUFFIX_LEN)))
}

pub fn generate_receipt_id() -> String {
    format!(
        "receipt_{}_{}",
        Utc::now().timestamp_millis(),
        random_base36(RECEIPT_SUFFIX_LEN)
    )
}

fn to_base36(mut value: u128) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    digits.iter().rev().collect()
}

/// `len` base-36 digits drawn from the 122 random bits of a v4 UUID.
fn random_base36(len: usize) -> String {
    let mut bits = Uuid::new_v4().as_u128();
    (0..len)
        .map(|_| {
            let digit = ALPHABET[(bits % 36) as usize] as char;
            bits /= 36;
            digit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn base36_matches_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn trip_id_starts_with_timestamp_prefix() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let id = generate_trip_id_at(now);
        let prefix = to_base36(1_700_000_000_000);
        assert!(id.as_str().starts_with(&prefix));
        assert_eq!(id.as_str().len(), prefix.len() + TRIP_SUFFIX_LEN);
    }

    #[test]
    fn ids_do_not_repeat_within_the_same_millisecond() {
        let now = Utc::now();
        let ids: HashSet<_> = (0..1000).map(|_| generate_trip_id_at(now)).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn receipt_id_has_expected_shape() {
        let id = generate_receipt_id();
        let parts: Vec<_> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "receipt");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), RECEIPT_SUFFIX_LEN);
    }
}
