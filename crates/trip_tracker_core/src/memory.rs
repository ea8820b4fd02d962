//! crates/trip_tracker_core/src/memory.rs
//!
//! In-memory implementations of every port. They back the test suites and are
//! handy for running the lifecycle without a backend. Each adapter can be told
//! to fail or stall, and they can share a `Journal` so callers can check the
//! order in which side effects happened.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::cache::ALL_KEYS;
use crate::domain::{
    NewReceipt, NewTrip, PhotoPhase, ReceiptQuery, ReceiptRecord, RemoteTripRecord,
    TripEndUpdate, TripId,
};
use crate::ports::{
    PhotoStore, PortError, PortResult, ReceiptStore, RetryPrompt, TripCache, TripStore,
    UploadDecision,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//=========================================================================================
// Shared Journal
//=========================================================================================

/// A side effect observed by one of the in-memory adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    PhotoStored { path: String },
    TripCreated { id: TripId },
    TripLookedUp { id: TripId },
    TripEnded { id: TripId },
    CacheWritten,
    CacheCleared,
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<JournalEntry>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: JournalEntry) {
        lock(&self.0).push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        lock(&self.0).clone()
    }

    /// Position of the first entry matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&JournalEntry) -> bool) -> Option<usize> {
        lock(&self.0).iter().position(predicate)
    }
}

/// Queued failures and an optional artificial latency.
#[derive(Default)]
struct FaultPlan {
    failures: Mutex<VecDeque<PortError>>,
    delay: Mutex<Option<Duration>>,
}

impl FaultPlan {
    async fn apply(&self) -> PortResult<()> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match lock(&self.failures).pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//=========================================================================================
// Trip Store
//=========================================================================================

#[derive(Default)]
pub struct InMemoryTripStore {
    records: Mutex<Vec<RemoteTripRecord>>,
    faults: FaultPlan,
    journal: Journal,
}

impl InMemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Seeds a record directly, bypassing fault injection.
    pub fn insert(&self, record: RemoteTripRecord) {
        lock(&self.records).push(record);
    }

    /// The next call of any kind fails with `error`.
    pub fn fail_next_with(&self, error: PortError) {
        lock(&self.faults.failures).push_back(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.faults.delay) = Some(delay);
    }

    pub fn records(&self) -> Vec<RemoteTripRecord> {
        lock(&self.records).clone()
    }

    pub fn record(&self, id: &TripId) -> Option<RemoteTripRecord> {
        lock(&self.records).iter().find(|r| &r.id == id).cloned()
    }
}

#[async_trait]
impl TripStore for InMemoryTripStore {
    async fn create(&self, trip: NewTrip) -> PortResult<RemoteTripRecord> {
        self.faults.apply().await?;
        let mut records = lock(&self.records);
        if records.iter().any(|r| r.id == trip.id) {
            return Err(PortError::Unexpected(format!("duplicate trip id {}", trip.id)));
        }
        let record = RemoteTripRecord {
            id: trip.id.clone(),
            starting_odometer: trip.starting_odometer,
            start_timestamp: trip.start_timestamp,
            ending_odometer: None,
            end_timestamp: None,
            earnings: None,
            created_at: Some(Utc::now()),
        };
        records.push(record.clone());
        self.journal.record(JournalEntry::TripCreated { id: trip.id });
        Ok(record)
    }

    async fn get(&self, id: &TripId) -> PortResult<RemoteTripRecord> {
        self.faults.apply().await?;
        self.journal.record(JournalEntry::TripLookedUp { id: id.clone() });
        self.record(id)
            .ok_or_else(|| PortError::NotFound(format!("Trip {id} not found")))
    }

    async fn update_end(
        &self,
        id: &TripId,
        update: TripEndUpdate,
    ) -> PortResult<RemoteTripRecord> {
        self.faults.apply().await?;
        let mut records = lock(&self.records);
        let record = records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| PortError::NotFound(format!("Trip {id} not found")))?;
        record.ending_odometer = Some(update.ending_odometer);
        record.end_timestamp = Some(update.end_timestamp);
        if let Some(earnings) = update.earnings {
            record.earnings = Some(earnings);
        }
        self.journal.record(JournalEntry::TripEnded { id: id.clone() });
        Ok(record.clone())
    }

    async fn list_all(&self) -> PortResult<Vec<RemoteTripRecord>> {
        self.faults.apply().await?;
        let mut records = self.records();
        records.sort_by(|a, b| b.start_timestamp.cmp(&a.start_timestamp));
        Ok(records)
    }
}

//=========================================================================================
// Photo Store
//=========================================================================================

#[derive(Debug, Clone)]
struct StoredObject {
    path: String,
    content_type: String,
    size: usize,
}

#[derive(Default)]
pub struct InMemoryPhotoStore {
    objects: Mutex<Vec<StoredObject>>,
    faults: FaultPlan,
    journal: Journal,
}

impl InMemoryPhotoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// The next `count` puts fail with an unavailable error.
    pub fn fail_next(&self, count: usize) {
        let mut failures = lock(&self.faults.failures);
        for _ in 0..count {
            failures.push_back(PortError::Unavailable("object store offline".to_string()));
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.faults.delay) = Some(delay);
    }

    /// Stored paths in upload order.
    pub fn paths(&self) -> Vec<String> {
        lock(&self.objects).iter().map(|o| o.path.clone()).collect()
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        lock(&self.objects)
            .iter()
            .find(|o| o.path == path)
            .map(|o| o.content_type.clone())
    }

    pub fn size(&self, path: &str) -> Option<usize> {
        lock(&self.objects).iter().find(|o| o.path == path).map(|o| o.size)
    }
}

#[async_trait]
impl PhotoStore for InMemoryPhotoStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> PortResult<()> {
        self.faults.apply().await?;
        lock(&self.objects).push(StoredObject {
            path: path.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len(),
        });
        self.journal.record(JournalEntry::PhotoStored {
            path: path.to_string(),
        });
        Ok(())
    }

    async fn url_for(&self, path: &str) -> PortResult<String> {
        if lock(&self.objects).iter().any(|o| o.path == path) {
            Ok(format!("memory://photos/{path}"))
        } else {
            Err(PortError::NotFound(format!("Object {path} not found")))
        }
    }

    async fn list(&self, prefix: &str) -> PortResult<Vec<String>> {
        Ok(lock(&self.objects)
            .iter()
            .filter(|o| o.path.starts_with(prefix))
            .map(|o| o.path.clone())
            .collect())
    }
}

//=========================================================================================
// Local Trip Cache
//=========================================================================================

#[derive(Default)]
pub struct MemoryTripCache {
    entries: Mutex<HashMap<String, String>>,
    faults: FaultPlan,
    journal: Journal,
}

impl MemoryTripCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Seeds the cache directly.
    pub fn seed(&self, entries: HashMap<String, String>) {
        lock(&self.entries).extend(entries);
    }

    pub fn fail_next_with(&self, error: PortError) {
        lock(&self.faults.failures).push_back(error);
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        lock(&self.entries).clone()
    }

    /// True when no trip key holds a non-blank value.
    pub fn is_empty(&self) -> bool {
        let entries = lock(&self.entries);
        ALL_KEYS
            .iter()
            .all(|key| entries.get(*key).map_or(true, |v| v.trim().is_empty()))
    }
}

#[async_trait]
impl TripCache for MemoryTripCache {
    async fn get_all(&self) -> PortResult<HashMap<String, String>> {
        self.faults.apply().await?;
        Ok(self.snapshot())
    }

    async fn set_all(&self, entries: HashMap<String, String>) -> PortResult<()> {
        self.faults.apply().await?;
        lock(&self.entries).extend(entries);
        self.journal.record(JournalEntry::CacheWritten);
        Ok(())
    }

    async fn clear_all(&self) -> PortResult<()> {
        self.faults.apply().await?;
        let mut entries = lock(&self.entries);
        for key in ALL_KEYS {
            entries.remove(key);
        }
        self.journal.record(JournalEntry::CacheCleared);
        Ok(())
    }
}

//=========================================================================================
// Retry Prompt
//=========================================================================================

/// Answers upload failures from a script, then with a fallback decision.
pub struct ScriptedPrompt {
    script: Mutex<VecDeque<UploadDecision>>,
    fallback: UploadDecision,
    asked: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn always(decision: UploadDecision) -> Self {
        Self::sequence(Vec::new(), decision)
    }

    pub fn sequence(script: Vec<UploadDecision>, fallback: UploadDecision) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn times_asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetryPrompt for ScriptedPrompt {
    async fn upload_failed(&self, _phase: PhotoPhase, _reason: &str) -> UploadDecision {
        self.asked.fetch_add(1, Ordering::SeqCst);
        lock(&self.script).pop_front().unwrap_or(self.fallback)
    }
}

//=========================================================================================
// Receipt Store
//=========================================================================================

#[derive(Default)]
pub struct InMemoryReceiptStore {
    receipts: Mutex<Vec<ReceiptRecord>>,
    faults: FaultPlan,
}

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_with(&self, error: PortError) {
        lock(&self.faults.failures).push_back(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.faults.delay) = Some(delay);
    }

    pub fn receipts(&self) -> Vec<ReceiptRecord> {
        lock(&self.receipts).clone()
    }
}

fn matches_query(receipt: &ReceiptRecord, query: &ReceiptQuery) -> bool {
    if let Some(term) = query.search.as_deref().map(str::to_lowercase) {
        let haystacks = [
            Some(receipt.vendor.to_lowercase()),
            receipt.description.as_deref().map(str::to_lowercase),
            Some(receipt.category.as_str().to_lowercase()),
        ];
        if !haystacks.iter().flatten().any(|h| h.contains(&term)) {
            return false;
        }
    }
    query.category.map_or(true, |c| receipt.category == c)
        && query.start_date.map_or(true, |d| receipt.receipt_date >= d)
        && query.end_date.map_or(true, |d| receipt.receipt_date <= d)
        && query.min_amount.map_or(true, |m| receipt.total_amount >= m)
        && query.max_amount.map_or(true, |m| receipt.total_amount <= m)
}

#[async_trait]
impl ReceiptStore for InMemoryReceiptStore {
    async fn create(&self, receipt: NewReceipt) -> PortResult<ReceiptRecord> {
        self.faults.apply().await?;
        let record = ReceiptRecord {
            id: receipt.id,
            receipt_date: receipt.receipt_date,
            created_at: Some(Utc::now()),
            category: receipt.category,
            vendor: receipt.vendor,
            description: receipt.description,
            subtotal: receipt.amounts.subtotal,
            gst: receipt.amounts.gst,
            total_amount: receipt.amounts.total,
            receipt_image_url: None,
        };
        lock(&self.receipts).push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> PortResult<ReceiptRecord> {
        self.faults.apply().await?;
        lock(&self.receipts)
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Receipt {id} not found")))
    }

    async fn query(&self, query: &ReceiptQuery) -> PortResult<Vec<ReceiptRecord>> {
        self.faults.apply().await?;
        let mut found: Vec<_> = lock(&self.receipts)
            .iter()
            .filter(|r| matches_query(r, query))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.receipt_date.cmp(&a.receipt_date));
        Ok(found)
    }

    async fn set_image_url(&self, id: &str, url: &str) -> PortResult<()> {
        self.faults.apply().await?;
        let mut receipts = lock(&self.receipts);
        let receipt = receipts
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| PortError::NotFound(format!("Receipt {id} not found")))?;
        receipt.receipt_image_url = Some(url.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_trip(id: &str, day: u32) -> NewTrip {
        NewTrip {
            id: TripId::new(id),
            starting_odometer: "1000".to_string(),
            start_timestamp: Utc.with_ymd_and_hms(2024, 3, day, 8, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn trip_history_is_newest_first() {
        let store = InMemoryTripStore::new();
        store.create(new_trip("older", 1)).await.unwrap();
        store.create(new_trip("newer", 5)).await.unwrap();

        let ids: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.as_str().to_string())
            .collect();
        assert_eq!(ids, ["newer", "older"]);
    }

    #[tokio::test]
    async fn duplicate_and_missing_ids_are_errors() {
        let store = InMemoryTripStore::new();
        store.create(new_trip("t1", 1)).await.unwrap();
        assert!(store.create(new_trip("t1", 2)).await.is_err());
        assert!(store
            .get(&TripId::new("nope"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn queued_failures_apply_once() {
        let store = InMemoryTripStore::new();
        store.fail_next_with(PortError::Unavailable("offline".to_string()));
        assert_eq!(
            store.list_all().await,
            Err(PortError::Unavailable("offline".to_string()))
        );
        assert!(store.list_all().await.unwrap().is_empty());
    }
}
