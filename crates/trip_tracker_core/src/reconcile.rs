//! crates/trip_tracker_core/src/reconcile.rs
//!
//! The startup check that decides whether a trip left in the local cache is
//! still open according to the remote trip store.
//!
//! The cache is only ever discarded on a positive answer from the store (the
//! trip is closed or does not exist). When the store cannot be asked, the
//! cached trip is trusted so a flaky network never loses a trip in progress.

use std::time::Duration;
use tracing::{error, info, warn};

use crate::cache::CachedTrip;
use crate::controller::within_timeout;
use crate::domain::{ActiveTrip, EndDraft, Odometer, RemoteTripRecord, TripId, TripState};
use crate::error::TripError;
use crate::ports::{PortError, TripCache, TripStore};

/// Why a cached trip was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The remote record already has an end timestamp.
    Closed,
    /// The remote store has no record with the cached id.
    Missing,
    /// The cache lacks the odometer or start time and the store could not supply them.
    Corrupt,
}

/// The outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Nothing was cached, or the cached trip was not flagged active.
    NoTrip,
    /// The cached trip is open. `verified` is false when the store could not be
    /// reached and the cache was trusted as-is.
    Restored { trip: ActiveTrip, verified: bool },
    Discarded {
        trip_id: TripId,
        reason: DiscardReason,
    },
}

impl Reconciliation {
    pub fn into_state(self) -> TripState {
        match self {
            Reconciliation::Restored { trip, .. } => TripState::Active(trip),
            Reconciliation::NoTrip | Reconciliation::Discarded { .. } => TripState::Idle,
        }
    }
}

pub async fn reconcile(
    cache: &dyn TripCache,
    store: &dyn TripStore,
    remote_timeout: Duration,
) -> Reconciliation {
    let entries = match cache.get_all().await {
        Ok(entries) => entries,
        Err(e) => {
            error!("Error reading the local trip cache: {}", e);
            return Reconciliation::NoTrip;
        }
    };

    let cached = CachedTrip::from_entries(&entries);
    let Some(trip_id) = cached.active_trip_id() else {
        info!("No active trip found in local cache.");
        return Reconciliation::NoTrip;
    };

    let remote = match within_timeout(remote_timeout, store.get(&trip_id)).await {
        Ok(record) if record.is_open() => Some(record),
        Ok(_) => return discard(cache, trip_id, DiscardReason::Closed).await,
        Err(TripError::Remote(PortError::NotFound(_))) => {
            return discard(cache, trip_id, DiscardReason::Missing).await
        }
        Err(e) => {
            warn!(%trip_id, "Could not verify cached trip, keeping it: {}", e);
            None
        }
    };

    let verified = remote.is_some();
    match restore(&trip_id, &cached, remote.as_ref()) {
        Some(trip) => {
            info!(%trip_id, verified, "Restoring active trip.");
            Reconciliation::Restored { trip, verified }
        }
        None => discard(cache, trip_id, DiscardReason::Corrupt).await,
    }
}

/// Rebuilds the active trip from the cache, filling gaps from the remote record.
fn restore(
    trip_id: &TripId,
    cached: &CachedTrip,
    remote: Option<&RemoteTripRecord>,
) -> Option<ActiveTrip> {
    let starting_odometer = cached
        .starting_odometer
        .as_deref()
        .and_then(|raw| Odometer::parse(raw).ok())
        .or_else(|| remote.and_then(|r| Odometer::parse(&r.starting_odometer).ok()))?;
    let start_timestamp = cached
        .parsed_start_timestamp()
        .or_else(|| remote.map(|r| r.start_timestamp))?;

    Some(ActiveTrip {
        trip_id: trip_id.clone(),
        starting_odometer,
        start_timestamp,
        draft: EndDraft {
            earnings: cached.earnings_draft.clone(),
            ..EndDraft::default()
        },
    })
}

async fn discard(cache: &dyn TripCache, trip_id: TripId, reason: DiscardReason) -> Reconciliation {
    info!(%trip_id, ?reason, "Cached trip is stale, clearing local cache.");
    if let Err(e) = cache.clear_all().await {
        error!(%trip_id, "Error clearing the local trip cache: {}", e);
    }
    Reconciliation::Discarded { trip_id, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachedTrip, START_TIMESTAMP_KEY, STARTING_ODOMETER_KEY};
    use crate::memory::{InMemoryTripStore, MemoryTripCache};
    use chrono::{TimeZone, Utc};

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn cached_trip() -> ActiveTrip {
        ActiveTrip {
            trip_id: TripId::new("trip-1"),
            starting_odometer: Odometer::parse("1000").unwrap(),
            start_timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            draft: EndDraft::default(),
        }
    }

    fn remote_for(trip: &ActiveTrip) -> RemoteTripRecord {
        RemoteTripRecord {
            id: trip.trip_id.clone(),
            starting_odometer: trip.starting_odometer.to_string(),
            start_timestamp: trip.start_timestamp,
            ending_odometer: None,
            end_timestamp: None,
            earnings: None,
            created_at: None,
        }
    }

    fn seeded_cache(trip: &ActiveTrip) -> MemoryTripCache {
        let cache = MemoryTripCache::new();
        cache.seed(CachedTrip::from_active(trip).into_entries());
        cache
    }

    #[tokio::test]
    async fn empty_cache_means_no_trip() {
        let cache = MemoryTripCache::new();
        let store = InMemoryTripStore::new();
        assert_eq!(reconcile(&cache, &store, TIMEOUT).await, Reconciliation::NoTrip);
    }

    #[tokio::test]
    async fn open_remote_trip_is_restored() {
        let trip = cached_trip();
        let cache = seeded_cache(&trip);
        let store = InMemoryTripStore::new();
        store.insert(remote_for(&trip));

        let outcome = reconcile(&cache, &store, TIMEOUT).await;
        assert_eq!(
            outcome,
            Reconciliation::Restored {
                trip,
                verified: true
            }
        );
        assert!(!cache.is_empty());
    }

    #[tokio::test]
    async fn closed_remote_trip_clears_the_cache() {
        let trip = cached_trip();
        let cache = seeded_cache(&trip);
        let store = InMemoryTripStore::new();
        let mut closed = remote_for(&trip);
        closed.ending_odometer = Some("1100".to_string());
        closed.end_timestamp = Some(Utc::now());
        store.insert(closed);

        let outcome = reconcile(&cache, &store, TIMEOUT).await;
        assert!(matches!(
            outcome,
            Reconciliation::Discarded {
                reason: DiscardReason::Closed,
                ..
            }
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn missing_remote_trip_clears_the_cache() {
        let trip = cached_trip();
        let cache = seeded_cache(&trip);
        let store = InMemoryTripStore::new();

        let outcome = reconcile(&cache, &store, TIMEOUT).await;
        assert!(matches!(
            outcome,
            Reconciliation::Discarded {
                reason: DiscardReason::Missing,
                ..
            }
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn unreachable_store_trusts_the_cache() {
        let trip = cached_trip();
        let cache = seeded_cache(&trip);
        let store = InMemoryTripStore::new();
        store.fail_next_with(PortError::Unavailable("offline".to_string()));

        let outcome = reconcile(&cache, &store, TIMEOUT).await;
        assert_eq!(
            outcome,
            Reconciliation::Restored {
                trip,
                verified: false
            }
        );
    }

    #[tokio::test]
    async fn slow_store_is_treated_like_a_network_failure() {
        let trip = cached_trip();
        let cache = seeded_cache(&trip);
        let store = InMemoryTripStore::new();
        store.set_delay(Duration::from_millis(500));

        let outcome = reconcile(&cache, &store, Duration::from_millis(20)).await;
        assert!(matches!(
            outcome,
            Reconciliation::Restored {
                verified: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_cached_fields_are_filled_from_the_remote_record() {
        let trip = cached_trip();
        let cache = seeded_cache(&trip);
        let mut entries = cache.snapshot();
        entries.insert(STARTING_ODOMETER_KEY.to_string(), String::new());
        entries.insert(START_TIMESTAMP_KEY.to_string(), "garbage".to_string());
        cache.seed(entries);
        let store = InMemoryTripStore::new();
        store.insert(remote_for(&trip));

        let outcome = reconcile(&cache, &store, TIMEOUT).await;
        assert_eq!(
            outcome,
            Reconciliation::Restored {
                trip,
                verified: true
            }
        );
    }

    #[tokio::test]
    async fn incomplete_cache_without_remote_answer_is_discarded() {
        let trip = cached_trip();
        let cache = seeded_cache(&trip);
        let mut entries = cache.snapshot();
        entries.insert(STARTING_ODOMETER_KEY.to_string(), String::new());
        cache.seed(entries);
        let store = InMemoryTripStore::new();
        store.fail_next_with(PortError::Unavailable("offline".to_string()));

        let outcome = reconcile(&cache, &store, TIMEOUT).await;
        assert!(matches!(
            outcome,
            Reconciliation::Discarded {
                reason: DiscardReason::Corrupt,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unreadable_cache_means_no_trip() {
        let cache = MemoryTripCache::new();
        cache.fail_next_with(PortError::Unexpected("corrupt storage".to_string()));
        let store = InMemoryTripStore::new();
        assert_eq!(reconcile(&cache, &store, TIMEOUT).await, Reconciliation::NoTrip);
    }
}
