//! End-to-end behaviour of the trip lifecycle against the in-memory adapters.

use chrono::Utc;
use rust_decimal::Decimal;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use trip_tracker_core::amounts::{AmountEntry, AmountMode};
use trip_tracker_core::cache::CachedTrip;
use trip_tracker_core::memory::{
    InMemoryPhotoStore, InMemoryTripStore, Journal, JournalEntry, MemoryTripCache, ScriptedPrompt,
};
use trip_tracker_core::{
    ActiveTrip, EndDraft, LifecycleSettings, Odometer, PhotoRef, PortError, PreconditionError,
    RemoteTripRecord, StartTripRequest, TripController, TripError, TripId, TripState,
    UploadDecision, ValidationError,
};

struct World {
    journal: Journal,
    store: Arc<InMemoryTripStore>,
    cache: Arc<MemoryTripCache>,
    photos: Arc<InMemoryPhotoStore>,
    _photo_file: tempfile::NamedTempFile,
    photo: PhotoRef,
}

impl World {
    fn new() -> Self {
        let journal = Journal::new();
        let mut file = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
        file.write_all(b"odometer photo").unwrap();
        let photo = PhotoRef::new(file.path());
        Self {
            store: Arc::new(InMemoryTripStore::with_journal(journal.clone())),
            cache: Arc::new(MemoryTripCache::with_journal(journal.clone())),
            photos: Arc::new(InMemoryPhotoStore::with_journal(journal.clone())),
            journal,
            _photo_file: file,
            photo,
        }
    }

    /// A fresh controller over the same stores, as after an app restart.
    fn controller(&self) -> TripController {
        TripController::new(
            self.store.clone(),
            self.cache.clone(),
            self.photos.clone(),
            LifecycleSettings {
                remote_timeout: Duration::from_millis(250),
                upload_timeout: Duration::from_millis(250),
            },
        )
    }

    fn start(&self, odometer: &str) -> StartTripRequest {
        StartTripRequest {
            starting_odometer: Some(odometer.to_string()),
            start_photo: Some(self.photo.clone()),
        }
    }

    fn end(&self, odometer: &str, earnings: Option<&str>) -> EndDraft {
        EndDraft {
            ending_odometer: Some(odometer.to_string()),
            earnings: earnings.map(str::to_string),
            end_photo: Some(self.photo.clone()),
        }
    }

    fn seed_cached_trip(&self, id: &str) -> ActiveTrip {
        let trip = ActiveTrip {
            trip_id: TripId::new(id),
            starting_odometer: Odometer::parse("5000").unwrap(),
            start_timestamp: Utc::now() - chrono::Duration::hours(2),
            draft: EndDraft::default(),
        };
        self.cache.seed(CachedTrip::from_active(&trip).into_entries());
        trip
    }

    fn remote_record(trip: &ActiveTrip, closed: bool) -> RemoteTripRecord {
        RemoteTripRecord {
            id: trip.trip_id.clone(),
            starting_odometer: trip.starting_odometer.to_string(),
            start_timestamp: trip.start_timestamp,
            ending_odometer: closed.then(|| "5100".to_string()),
            end_timestamp: closed.then(Utc::now),
            earnings: None,
            created_at: None,
        }
    }
}

fn never_retry() -> ScriptedPrompt {
    ScriptedPrompt::always(UploadDecision::Cancel)
}

#[tokio::test]
async fn starting_twice_is_a_precondition_error() {
    let world = World::new();
    let controller = world.controller();
    controller.initialize().await;
    let prompt = never_retry();

    let started = controller.start_trip(world.start("1000"), &prompt).await.unwrap();
    let before = controller.state();

    let err = controller
        .start_trip(world.start("2000"), &prompt)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TripError::Precondition(PreconditionError::AlreadyActive { ref trip_id })
            if *trip_id == started.trip.trip_id
    ));
    assert_eq!(controller.state(), before);
    assert_eq!(world.store.records().len(), 1);
}

#[tokio::test]
async fn starting_twice_with_bad_input_is_still_a_precondition_error() {
    let world = World::new();
    let controller = world.controller();
    controller.initialize().await;
    let prompt = never_retry();
    controller.start_trip(world.start("1000"), &prompt).await.unwrap();

    let err = controller
        .start_trip(StartTripRequest::default(), &prompt)
        .await
        .unwrap_err();
    assert!(matches!(err, TripError::Precondition(_)));
}

#[tokio::test]
async fn ending_odometer_must_exceed_starting() {
    let world = World::new();
    let controller = world.controller();
    controller.initialize().await;
    let prompt = never_retry();
    controller.start_trip(world.start("1000"), &prompt).await.unwrap();

    for ending in ["1000", "999.5"] {
        let err = controller
            .end_trip(world.end(ending, None), &prompt)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TripError::Validation(ValidationError::OdometerNotIncreasing { .. })
        ));
        assert!(matches!(controller.state(), TripState::Active(_)));
    }
    assert!(world.store.records()[0].is_open());
}

#[tokio::test]
async fn photos_are_mandatory_on_start_and_end() {
    let world = World::new();
    let controller = world.controller();
    controller.initialize().await;
    let prompt = never_retry();

    let no_photo = StartTripRequest {
        starting_odometer: Some("1000".to_string()),
        start_photo: None,
    };
    let err = controller.start_trip(no_photo, &prompt).await.unwrap_err();
    assert!(matches!(
        err,
        TripError::Validation(ValidationError::MissingPhoto(_))
    ));
    assert_eq!(controller.state(), TripState::Idle);
    assert!(world.store.records().is_empty());

    controller.start_trip(world.start("1000"), &prompt).await.unwrap();
    let mut form = world.end("1100", Some("10"));
    form.end_photo = None;
    let err = controller.end_trip(form, &prompt).await.unwrap_err();
    assert!(matches!(
        err,
        TripError::Validation(ValidationError::MissingPhoto(_))
    ));
    assert!(world.store.records()[0].is_open());
}

#[tokio::test]
async fn photo_upload_always_precedes_the_remote_write() {
    let world = World::new();
    let controller = world.controller();
    controller.initialize().await;
    world.photos.fail_next(1);
    let prompt = ScriptedPrompt::always(UploadDecision::Retry);

    let started = controller.start_trip(world.start("1000"), &prompt).await.unwrap();
    controller
        .end_trip(world.end("1010", None), &prompt)
        .await
        .unwrap();

    let entries = world.journal.entries();
    let start_photo = world
        .journal
        .position(|e| matches!(e, JournalEntry::PhotoStored { path } if path.starts_with("start/")))
        .unwrap();
    let created = world
        .journal
        .position(|e| matches!(e, JournalEntry::TripCreated { .. }))
        .unwrap();
    let end_photo = world
        .journal
        .position(|e| matches!(e, JournalEntry::PhotoStored { path } if path.starts_with("end/")))
        .unwrap();
    let ended = world
        .journal
        .position(|e| matches!(e, JournalEntry::TripEnded { .. }))
        .unwrap();

    assert!(start_photo < created, "{entries:?}");
    assert!(end_photo < ended, "{entries:?}");
    assert_eq!(prompt.times_asked(), 1);
    assert!(world
        .photos
        .paths()
        .iter()
        .all(|p| p.contains(started.trip.trip_id.as_str())));
}

#[tokio::test]
async fn reconciliation_is_idempotent_across_restarts() {
    let world = World::new();
    let trip = world.seed_cached_trip("resume-me");
    world.store.insert(World::remote_record(&trip, false));

    let first = world.controller().initialize().await;
    let second = world.controller().initialize().await;
    assert_eq!(first, TripState::Active(trip));
    assert_eq!(first, second);

    let closed = world.seed_cached_trip("closed");
    world.store.insert(World::remote_record(&closed, true));
    let first = world.controller().initialize().await;
    let second = world.controller().initialize().await;
    assert_eq!(first, TripState::Idle);
    assert_eq!(second, TripState::Idle);
}

#[tokio::test]
async fn network_failure_at_launch_keeps_the_cached_trip() {
    let world = World::new();
    let trip = world.seed_cached_trip("offline");
    world
        .store
        .fail_next_with(PortError::Unavailable("no network".to_string()));

    let controller = world.controller();
    assert_eq!(controller.initialize().await, TripState::Active(trip.clone()));
    assert_eq!(
        CachedTrip::from_entries(&world.cache.snapshot()).active_trip_id(),
        Some(trip.trip_id)
    );
}

#[tokio::test]
async fn stale_cache_is_discarded() {
    for closed in [true, false] {
        let world = World::new();
        let trip = world.seed_cached_trip("stale");
        if closed {
            world.store.insert(World::remote_record(&trip, true));
        }

        let controller = world.controller();
        assert_eq!(controller.initialize().await, TripState::Idle);
        assert!(world.cache.is_empty());
    }
}

#[test]
fn receipt_amounts_round_trip() {
    let dec = |s: &str| Decimal::from_str(s).unwrap();
    let amounts = AmountEntry::Total(dec("110")).resolve();
    assert_eq!(
        (amounts.subtotal, amounts.gst, amounts.total),
        (dec("100"), dec("10"), dec("110"))
    );

    let total = AmountEntry::Total(dec("37.95"));
    let back = total.switch_to(AmountMode::Subtotal).switch_to(AmountMode::Total);
    assert!((back.value() - total.value()).abs() <= dec("0.01"));
}

#[tokio::test]
async fn full_trip_from_start_to_end() {
    let world = World::new();
    let controller = world.controller();
    let mut states = controller.subscribe();
    controller.initialize().await;
    let prompt = never_retry();

    let started = controller.start_trip(world.start("1000"), &prompt).await.unwrap();
    assert!(started.cached);
    assert!(controller.state().is_active());
    let cached = CachedTrip::from_entries(&world.cache.snapshot());
    assert_eq!(cached.active_trip_id(), Some(started.trip.trip_id.clone()));
    assert_eq!(cached.starting_odometer.as_deref(), Some("1000"));

    let ended = controller
        .end_trip(world.end("1050", Some("42.50")), &prompt)
        .await
        .unwrap();
    assert!(ended.cache_cleared);
    assert_eq!(ended.record.ending_odometer.as_deref(), Some("1050"));
    assert_eq!(ended.record.earnings, Some(Decimal::from_str("42.50").unwrap()));
    assert!(ended.record.end_timestamp.is_some());
    assert_eq!(ended.record.distance(), Some(Decimal::from(50)));

    assert_eq!(controller.state(), TripState::Idle);
    assert!(world.cache.is_empty());
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), TripState::Idle);
}

#[tokio::test]
async fn blank_earnings_are_left_out_of_the_update() {
    let world = World::new();
    let controller = world.controller();
    controller.initialize().await;
    let prompt = never_retry();
    controller.start_trip(world.start("1000"), &prompt).await.unwrap();

    let ended = controller
        .end_trip(world.end("1001", Some("  ")), &prompt)
        .await
        .unwrap();
    assert_eq!(ended.record.earnings, None);
}

#[tokio::test]
async fn cancelled_start_upload_leaves_no_trace() {
    let world = World::new();
    let controller = world.controller();
    controller.initialize().await;
    world.photos.fail_next(1);
    let prompt = never_retry();

    let err = controller
        .start_trip(world.start("1000"), &prompt)
        .await
        .unwrap_err();
    assert!(matches!(err, TripError::UploadCancelled { .. }));
    assert_eq!(controller.state(), TripState::Idle);
    assert!(world.store.records().is_empty());
    assert!(world.cache.is_empty());
    assert_eq!(prompt.times_asked(), 1);
}

#[tokio::test]
async fn cancelled_end_upload_keeps_the_trip_and_inputs() {
    let world = World::new();
    let controller = world.controller();
    controller.initialize().await;
    let prompt = never_retry();
    controller.start_trip(world.start("1000"), &prompt).await.unwrap();

    world.photos.fail_next(1);
    let form = world.end("1200", Some("30"));
    let err = controller.end_trip(form.clone(), &prompt).await.unwrap_err();
    assert!(matches!(err, TripError::UploadCancelled { .. }));

    let state = controller.state();
    assert!(matches!(state, TripState::Active(_)));
    assert_eq!(state.active_trip().unwrap().draft, form);
    assert!(world.store.records()[0].is_open());
    assert!(!world.cache.is_empty());
}
