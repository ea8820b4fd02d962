//! services/trip_api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the `TripStore` and `ReceiptStore` ports from the `core` crate. It handles
//! all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use trip_tracker_core::domain::{
    NewReceipt, NewTrip, ReceiptCategory, ReceiptQuery, ReceiptRecord, RemoteTripRecord,
    TripEndUpdate, TripId,
};
use trip_tracker_core::ports::{PortError, PortResult, ReceiptStore, TripStore};

const TRIP_COLUMNS: &str = "id, starting_odometer, start_timestamp, ending_odometer, \
     end_timestamp, earnings, created_at";
const RECEIPT_COLUMNS: &str = "id, receipt_date, created_at, category, vendor, description, \
     subtotal, gst, total_amount, receipt_image_url";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `TripStore` and `ReceiptStore` ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Maps a `sqlx` failure onto the port taxonomy. Connection-level failures are
/// `Unavailable` so callers can tell them apart from a definite answer.
fn port_error(e: sqlx::Error, missing: impl FnOnce() -> String) -> PortError {
    match &e {
        sqlx::Error::RowNotFound => PortError::NotFound(missing()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => PortError::Unavailable(e.to_string()),
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct TripRow {
    id: String,
    starting_odometer: String,
    start_timestamp: DateTime<Utc>,
    ending_odometer: Option<String>,
    end_timestamp: Option<DateTime<Utc>>,
    earnings: Option<Decimal>,
    created_at: Option<DateTime<Utc>>,
}

impl TripRow {
    fn to_domain(self) -> RemoteTripRecord {
        RemoteTripRecord {
            id: TripId::new(self.id),
            starting_odometer: self.starting_odometer,
            start_timestamp: self.start_timestamp,
            ending_odometer: self.ending_odometer,
            end_timestamp: self.end_timestamp,
            earnings: self.earnings,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ReceiptRow {
    id: String,
    receipt_date: NaiveDate,
    created_at: Option<DateTime<Utc>>,
    category: String,
    vendor: String,
    description: Option<String>,
    subtotal: Decimal,
    gst: Decimal,
    total_amount: Decimal,
    receipt_image_url: Option<String>,
}

impl ReceiptRow {
    fn to_domain(self) -> PortResult<ReceiptRecord> {
        let category = self.category.parse::<ReceiptCategory>().map_err(|e| {
            PortError::Unexpected(format!("Receipt {} has a bad category: {}", self.id, e))
        })?;
        Ok(ReceiptRecord {
            id: self.id,
            receipt_date: self.receipt_date,
            created_at: self.created_at,
            category,
            vendor: self.vendor,
            description: self.description,
            subtotal: self.subtotal,
            gst: self.gst,
            total_amount: self.total_amount,
            receipt_image_url: self.receipt_image_url,
        })
    }
}

//=========================================================================================
// `TripStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl TripStore for DbAdapter {
    async fn create(&self, trip: NewTrip) -> PortResult<RemoteTripRecord> {
        let sql = format!(
            "INSERT INTO trips (id, starting_odometer, start_timestamp) \
             VALUES ($1, $2, $3) RETURNING {TRIP_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TripRow>(&sql)
            .bind(trip.id.as_str())
            .bind(&trip.starting_odometer)
            .bind(trip.start_timestamp)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || format!("Trip {} was not created", trip.id)))?;
        Ok(row.to_domain())
    }

    async fn get(&self, id: &TripId) -> PortResult<RemoteTripRecord> {
        let sql = format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = $1");
        let row = sqlx::query_as::<_, TripRow>(&sql)
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || format!("Trip {} not found", id)))?;
        Ok(row.to_domain())
    }

    async fn update_end(
        &self,
        id: &TripId,
        update: TripEndUpdate,
    ) -> PortResult<RemoteTripRecord> {
        // A NULL earnings parameter leaves the stored value alone.
        let sql = format!(
            "UPDATE trips SET ending_odometer = $2, end_timestamp = $3, \
             earnings = COALESCE($4, earnings) WHERE id = $1 RETURNING {TRIP_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TripRow>(&sql)
            .bind(id.as_str())
            .bind(&update.ending_odometer)
            .bind(update.end_timestamp)
            .bind(update.earnings)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || format!("Trip {} not found", id)))?;
        Ok(row.to_domain())
    }

    async fn list_all(&self) -> PortResult<Vec<RemoteTripRecord>> {
        let sql = format!("SELECT {TRIP_COLUMNS} FROM trips ORDER BY start_timestamp DESC");
        let rows = sqlx::query_as::<_, TripRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| port_error(e, || "No trips".to_string()))?;
        Ok(rows.into_iter().map(TripRow::to_domain).collect())
    }
}

//=========================================================================================
// `ReceiptStore` Trait Implementation
//=========================================================================================

/// `%search%`, with the LIKE wildcards and the escape character in `search`
/// matched literally.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Appends the `WHERE` clauses for `query` to a receipt select.
fn push_receipt_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &ReceiptQuery) {
    builder.push(" WHERE TRUE");
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let term = like_pattern(search);
        builder
            .push(" AND (vendor ILIKE ")
            .push_bind(term.clone())
            .push(" OR description ILIKE ")
            .push_bind(term.clone())
            .push(" OR category ILIKE ")
            .push_bind(term)
            .push(")");
    }
    if let Some(category) = query.category {
        builder.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(start) = query.start_date {
        builder.push(" AND receipt_date >= ").push_bind(start);
    }
    if let Some(end) = query.end_date {
        builder.push(" AND receipt_date <= ").push_bind(end);
    }
    if let Some(min) = query.min_amount {
        builder.push(" AND total_amount >= ").push_bind(min);
    }
    if let Some(max) = query.max_amount {
        builder.push(" AND total_amount <= ").push_bind(max);
    }
    builder.push(" ORDER BY receipt_date DESC");
}

#[async_trait]
impl ReceiptStore for DbAdapter {
    async fn create(&self, receipt: NewReceipt) -> PortResult<ReceiptRecord> {
        let sql = format!(
            "INSERT INTO receipts (id, receipt_date, category, vendor, description, \
             subtotal, gst, total_amount) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {RECEIPT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ReceiptRow>(&sql)
            .bind(&receipt.id)
            .bind(receipt.receipt_date)
            .bind(receipt.category.as_str())
            .bind(&receipt.vendor)
            .bind(&receipt.description)
            .bind(receipt.amounts.subtotal)
            .bind(receipt.amounts.gst)
            .bind(receipt.amounts.total)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || format!("Receipt {} was not created", receipt.id)))?;
        row.to_domain()
    }

    async fn get(&self, id: &str) -> PortResult<ReceiptRecord> {
        let sql = format!("SELECT {RECEIPT_COLUMNS} FROM receipts WHERE id = $1");
        let row = sqlx::query_as::<_, ReceiptRow>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || format!("Receipt {} not found", id)))?;
        row.to_domain()
    }

    async fn query(&self, query: &ReceiptQuery) -> PortResult<Vec<ReceiptRecord>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {RECEIPT_COLUMNS} FROM receipts"));
        push_receipt_filters(&mut builder, query);
        let rows = builder
            .build_query_as::<ReceiptRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| port_error(e, || "No receipts".to_string()))?;
        rows.into_iter().map(ReceiptRow::to_domain).collect()
    }

    async fn set_image_url(&self, id: &str, url: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE receipts SET receipt_image_url = $2 WHERE id = $1")
            .bind(id)
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(|e| port_error(e, || format!("Receipt {} not found", id)))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Receipt {} not found", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_unavailable() {
        let e = port_error(sqlx::Error::PoolTimedOut, || "x".to_string());
        assert!(matches!(e, PortError::Unavailable(_)));
        let e = port_error(sqlx::Error::RowNotFound, || "Trip t1 not found".to_string());
        assert_eq!(e, PortError::NotFound("Trip t1 not found".to_string()));
    }

    #[test]
    fn receipt_filters_build_in_order() {
        let query = ReceiptQuery {
            search: Some("shell".to_string()),
            category: Some(ReceiptCategory::Fuel),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            max_amount: Some(Decimal::from(100)),
            ..ReceiptQuery::default()
        };
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM receipts");
        push_receipt_filters(&mut builder, &query);
        assert_eq!(
            builder.sql(),
            "SELECT * FROM receipts WHERE TRUE AND (vendor ILIKE $1 OR description ILIKE $2 \
             OR category ILIKE $3) AND category = $4 AND receipt_date >= $5 \
             AND total_amount <= $6 ORDER BY receipt_date DESC"
        );
    }

    #[test]
    fn search_wildcards_match_literally() {
        assert_eq!(like_pattern("shell"), "%shell%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
        assert_eq!(like_pattern("a\\%"), "%a\\\\\\%%");
    }

    #[test]
    fn unknown_category_in_a_row_is_unexpected() {
        let row = ReceiptRow {
            id: "r1".to_string(),
            receipt_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            created_at: None,
            category: "Snacks".to_string(),
            vendor: "Shop".to_string(),
            description: None,
            subtotal: Decimal::ONE,
            gst: Decimal::ZERO,
            total_amount: Decimal::ONE,
            receipt_image_url: None,
        };
        assert!(matches!(row.to_domain(), Err(PortError::Unexpected(_))));
    }
}
