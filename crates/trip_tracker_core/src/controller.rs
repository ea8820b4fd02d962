//! crates/trip_tracker_core/src/controller.rs
//!
//! The trip lifecycle state machine.
//!
//! `TripController` owns the one `TripState` of the process and is the only
//! place it changes. Each transition flips the state into a transient
//! `Starting`/`Ending` value under the channel's write lock, so a second
//! transition racing the first is rejected instead of interleaving with it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::amounts::parse_earnings;
use crate::cache::{CachedTrip, EARNINGS_DRAFT_KEY};
use crate::domain::{
    ActiveTrip, EndDraft, NewTrip, Odometer, PhotoPhase, PhotoRef, RemoteTripRecord, TripEndUpdate,
    TripState,
};
use crate::error::{PreconditionError, TripError, TripResult, ValidationError};
use crate::ids::generate_trip_id;
use crate::ports::{PhotoStore, PortResult, RetryPrompt, TripCache, TripStore};
use crate::reconcile::{reconcile, Reconciliation};
use crate::upload::PhotoUploader;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a remote call, turning an elapsed deadline into `TripError::Timeout`.
pub(crate) async fn within_timeout<T>(
    limit: Duration,
    call: impl Future<Output = PortResult<T>>,
) -> TripResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(TripError::from),
        Err(_) => Err(TripError::Timeout(limit)),
    }
}

/// Deadlines applied by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Bound on every remote create, update and lookup.
    pub remote_timeout: Duration,
    /// Bound on each individual photo upload attempt.
    pub upload_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            remote_timeout: DEFAULT_TIMEOUT,
            upload_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Start-of-trip form inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTripRequest {
    pub starting_odometer: Option<String>,
    pub start_photo: Option<PhotoRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedTrip {
    pub trip: ActiveTrip,
    pub record: RemoteTripRecord,
    /// False when the remote record was created but the local cache write
    /// failed. The trip is active for this process but will not survive a restart.
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndedTrip {
    pub record: RemoteTripRecord,
    pub cache_cleared: bool,
}

/// Restores the pre-transition state if a transition is abandoned midway,
/// e.g. because its future was dropped.
struct InFlight<'a> {
    state: &'a watch::Sender<TripState>,
    restore: Option<TripState>,
}

impl InFlight<'_> {
    fn settle(mut self, next: TripState) {
        self.restore = None;
        self.state.send_replace(next);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.restore.take() {
            warn!(
                state = previous.label(),
                "Trip transition abandoned, restoring previous state."
            );
            self.state.send_replace(previous);
        }
    }
}

pub struct TripController {
    store: Arc<dyn TripStore>,
    cache: Arc<dyn TripCache>,
    uploader: PhotoUploader,
    settings: LifecycleSettings,
    state: watch::Sender<TripState>,
    init_lock: Mutex<()>,
}

impl TripController {
    pub fn new(
        store: Arc<dyn TripStore>,
        cache: Arc<dyn TripCache>,
        photos: Arc<dyn PhotoStore>,
        settings: LifecycleSettings,
    ) -> Self {
        let (state, _) = watch::channel(TripState::Uninitialized);
        Self {
            store,
            cache,
            uploader: PhotoUploader::new(photos, settings.upload_timeout),
            settings,
            state,
            init_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> TripState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<TripState> {
        self.state.subscribe()
    }

    /// Runs reconciliation and leaves `Uninitialized`. Only the first call does
    /// any work; later calls return the current state.
    pub async fn initialize(&self) -> TripState {
        let _guard = self.init_lock.lock().await;
        if self.state.borrow().is_initialized() {
            return self.state();
        }

        let outcome = reconcile(
            self.cache.as_ref(),
            self.store.as_ref(),
            self.settings.remote_timeout,
        )
        .await;
        if let Reconciliation::Discarded { trip_id, reason } = &outcome {
            info!(%trip_id, ?reason, "Starting without the cached trip.");
        }

        let next = outcome.into_state();
        info!(state = next.label(), "Trip controller initialized.");
        self.state.send_replace(next.clone());
        next
    }

    /// Checks the current state and swaps in the next one atomically.
    /// Returns the state that was replaced alongside the value `check` produced.
    fn transition<T>(
        &self,
        check: impl FnOnce(&TripState) -> TripResult<(TripState, T)>,
    ) -> TripResult<(TripState, T)> {
        let mut outcome: TripResult<(TripState, T)> = Err(PreconditionError::NotInitialized.into());
        self.state.send_if_modified(|state| match check(state) {
            Ok((next, value)) => {
                let previous = std::mem::replace(state, next);
                outcome = Ok((previous, value));
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    fn begin<T>(
        &self,
        check: impl FnOnce(&TripState) -> TripResult<(TripState, T)>,
    ) -> TripResult<(InFlight<'_>, T)> {
        let (previous, value) = self.transition(check)?;
        let guard = InFlight {
            state: &self.state,
            restore: Some(previous),
        };
        Ok((guard, value))
    }

    /// `Idle -> Starting -> Active`.
    ///
    /// The start photo is uploaded before any remote record exists; if the user
    /// cancels the upload nothing is written anywhere.
    pub async fn start_trip(
        &self,
        request: StartTripRequest,
        prompt: &dyn RetryPrompt,
    ) -> TripResult<StartedTrip> {
        let (in_flight, (odometer, photo)) = self.begin(|state| match state {
            TripState::Uninitialized => Err(PreconditionError::NotInitialized.into()),
            TripState::Starting | TripState::Ending(_) => {
                Err(PreconditionError::TransitionInFlight.into())
            }
            TripState::Active(trip) => Err(PreconditionError::AlreadyActive {
                trip_id: trip.trip_id.clone(),
            }
            .into()),
            TripState::Idle => {
                let odometer =
                    Odometer::parse(request.starting_odometer.as_deref().unwrap_or_default())?;
                let photo = request
                    .start_photo
                    .clone()
                    .ok_or(ValidationError::MissingPhoto(PhotoPhase::Start))?;
                Ok((TripState::Starting, (odometer, photo)))
            }
        })?;

        let trip_id = generate_trip_id();
        let start_timestamp = Utc::now();
        info!(%trip_id, %odometer, "Starting trip.");

        let uploaded = self
            .uploader
            .attempt_upload(trip_id.as_str(), PhotoPhase::Start, Some(&photo), prompt)
            .await;
        if !uploaded {
            in_flight.settle(TripState::Idle);
            return Err(TripError::UploadCancelled {
                phase: PhotoPhase::Start,
            });
        }

        let new_trip = NewTrip {
            id: trip_id.clone(),
            starting_odometer: odometer.to_string(),
            start_timestamp,
        };
        let record = match within_timeout(self.settings.remote_timeout, self.store.create(new_trip))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(%trip_id, "Failed to create trip record: {}", e);
                in_flight.settle(TripState::Idle);
                return Err(e);
            }
        };

        let trip = ActiveTrip {
            trip_id,
            starting_odometer: odometer,
            start_timestamp,
            draft: EndDraft::default(),
        };
        let cached = self.persist(&trip).await;
        in_flight.settle(TripState::Active(trip.clone()));
        info!(trip_id = %trip.trip_id, cached, "Trip started.");

        Ok(StartedTrip {
            trip,
            record,
            cached,
        })
    }

    /// `Active -> Ending -> Idle`.
    ///
    /// On cancel or remote failure the trip stays active and the submitted
    /// inputs are kept in its draft.
    pub async fn end_trip(
        &self,
        form: EndDraft,
        prompt: &dyn RetryPrompt,
    ) -> TripResult<EndedTrip> {
        let (in_flight, (trip, ending, earnings, photo)) = self.begin(|state| match state {
            TripState::Uninitialized => Err(PreconditionError::NotInitialized.into()),
            TripState::Idle => Err(PreconditionError::NoActiveTrip.into()),
            TripState::Starting | TripState::Ending(_) => {
                Err(PreconditionError::TransitionInFlight.into())
            }
            TripState::Active(trip) => {
                let ending = Odometer::parse(form.ending_odometer.as_deref().unwrap_or_default())?;
                if ending.value() <= trip.starting_odometer.value() {
                    return Err(ValidationError::OdometerNotIncreasing {
                        starting: trip.starting_odometer.to_string(),
                        ending: ending.to_string(),
                    }
                    .into());
                }
                let earnings = parse_earnings(form.earnings.as_deref())?;
                let photo = form
                    .end_photo
                    .clone()
                    .ok_or(ValidationError::MissingPhoto(PhotoPhase::End))?;

                let mut ending_trip = trip.clone();
                ending_trip.draft = form.clone();
                Ok((
                    TripState::Ending(ending_trip.clone()),
                    (ending_trip, ending, earnings, photo),
                ))
            }
        })?;

        let trip_id = trip.trip_id.clone();
        let end_timestamp = Utc::now();
        info!(%trip_id, ending_odometer = %ending, "Ending trip.");

        let uploaded = self
            .uploader
            .attempt_upload(trip_id.as_str(), PhotoPhase::End, Some(&photo), prompt)
            .await;
        if !uploaded {
            in_flight.settle(TripState::Active(trip));
            return Err(TripError::UploadCancelled {
                phase: PhotoPhase::End,
            });
        }

        let update = TripEndUpdate {
            ending_odometer: ending.to_string(),
            end_timestamp,
            earnings,
        };
        let record = match within_timeout(
            self.settings.remote_timeout,
            self.store.update_end(&trip_id, update),
        )
        .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(%trip_id, "Failed to update trip record: {}", e);
                // The uploaded photo is not reused; a retry captures a new one.
                let mut trip = trip;
                trip.draft.end_photo = None;
                in_flight.settle(TripState::Active(trip));
                return Err(e);
            }
        };

        let cache_cleared = match self.cache.clear_all().await {
            Ok(()) => true,
            Err(e) => {
                warn!(%trip_id, "Failed to clear local trip cache: {}", e);
                false
            }
        };
        in_flight.settle(TripState::Idle);
        info!(%trip_id, "Trip ended.");

        Ok(EndedTrip {
            record,
            cache_cleared,
        })
    }

    /// Stores end-form edits on the active trip. The earnings draft is also
    /// written to the local cache so it survives a restart.
    pub async fn update_end_draft(&self, draft: EndDraft) -> TripResult<()> {
        let (_, (trip_id, earnings)) = self.transition(|state| match state {
            TripState::Uninitialized => Err(PreconditionError::NotInitialized.into()),
            TripState::Idle => Err(PreconditionError::NoActiveTrip.into()),
            TripState::Starting | TripState::Ending(_) => {
                Err(PreconditionError::TransitionInFlight.into())
            }
            TripState::Active(trip) => {
                let mut trip = trip.clone();
                trip.draft = draft;
                let captured = (trip.trip_id.clone(), trip.draft.earnings.clone());
                Ok((TripState::Active(trip), captured))
            }
        })?;

        let entries = HashMap::from([(
            EARNINGS_DRAFT_KEY.to_string(),
            earnings.unwrap_or_default(),
        )]);
        if let Err(e) = self.cache.set_all(entries).await {
            warn!(%trip_id, "Failed to save earnings draft: {}", e);
        }
        Ok(())
    }

    async fn persist(&self, trip: &ActiveTrip) -> bool {
        let entries = CachedTrip::from_active(trip).into_entries();
        match self.cache.set_all(entries).await {
            Ok(()) => true,
            Err(e) => {
                error!(trip_id = %trip.trip_id, "Failed to save trip to local cache: {}", e);
                false
            }
        }
    }
}
