//! crates/trip_tracker_core/src/stats.rs
//!
//! Dashboard KPIs and export summaries over completed trips.
//!
//! Every figure is a `Decimal`. Ratios whose divisor is zero, or whose
//! quotient does not fit, are reported as zero. Totals saturate rather than
//! overflow. Calendar comparisons ("today") use UTC dates.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::amounts::round_cents;
use crate::domain::RemoteTripRecord;

const SECONDS_PER_HOUR: i64 = 3600;

fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    numerator.checked_div(denominator).unwrap_or(Decimal::ZERO)
}

fn total(values: impl Iterator<Item = Decimal>) -> Decimal {
    values.fold(Decimal::ZERO, Decimal::saturating_add)
}

fn hours(duration: Duration) -> Decimal {
    Decimal::from(duration.num_seconds()) / Decimal::from(SECONDS_PER_HOUR)
}

fn round_tenths(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(1, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
}

/// A trip that has both end fields, with its derived figures.
#[derive(Debug, Clone)]
struct CompletedTrip<'a> {
    record: &'a RemoteTripRecord,
    distance: Decimal,
    duration: Duration,
    earnings: Decimal,
}

fn completed(trips: &[RemoteTripRecord]) -> Vec<CompletedTrip<'_>> {
    trips
        .iter()
        .filter(|trip| trip.is_completed())
        .map(|record| CompletedTrip {
            record,
            distance: record.distance().unwrap_or_default(),
            duration: record.duration().unwrap_or_else(Duration::zero),
            earnings: record.earnings.unwrap_or_default(),
        })
        .collect()
}

//=========================================================================================
// Date Ranges
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "range", rename_all = "snake_case")]
pub enum DateRange {
    Last7Days,
    Last30Days,
    Custom {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl DateRange {
    /// The short key used in export file names.
    pub fn key(&self) -> &'static str {
        match self {
            DateRange::Last7Days => "7days",
            DateRange::Last30Days => "30days",
            DateRange::Custom { .. } => "custom",
        }
    }

    pub fn label(&self) -> String {
        match self {
            DateRange::Last7Days => "Last 7 Days".to_string(),
            DateRange::Last30Days => "Last 30 Days".to_string(),
            DateRange::Custom { start, end } => format!(
                "{} - {}",
                start.format("%b %-d, %Y"),
                end.format("%b %-d, %Y")
            ),
        }
    }

    /// Inclusive `[start, end]` bounds relative to `now`.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match *self {
            DateRange::Last7Days => (now - Duration::days(7), now),
            DateRange::Last30Days => (now - Duration::days(30), now),
            DateRange::Custom { start, end } => (start, end),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let (start, end) = self.bounds(now);
        at >= start && at <= end
    }
}

/// Trips whose start timestamp falls inside `range`.
pub fn filter_by_range(
    trips: &[RemoteTripRecord],
    range: DateRange,
    now: DateTime<Utc>,
) -> Vec<RemoteTripRecord> {
    trips
        .iter()
        .filter(|trip| range.contains(trip.start_timestamp, now))
        .cloned()
        .collect()
}

//=========================================================================================
// Dashboard KPIs
//=========================================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripKpis {
    pub total_trips: usize,
    pub total_distance: Decimal,
    pub avg_distance: Decimal,
    pub total_duration_hours: Decimal,
    pub avg_duration_hours: Decimal,
    pub longest_trip: Decimal,
    pub shortest_trip: Decimal,
    pub this_week_trips: usize,
    pub this_month_trips: usize,
    /// Raw odometer text of the most recent trip.
    pub current_odometer: String,
    pub avg_speed: Decimal,
    pub total_earnings: Decimal,
    pub avg_earnings_per_trip: Decimal,
    pub earnings_per_hour: Decimal,
    pub earnings_per_km: Decimal,
    pub today_earnings: Decimal,
    pub week_earnings: Decimal,
    pub month_earnings: Decimal,
}

impl TripKpis {
    /// `trips` must be ordered newest first, as `TripStore::list_all` returns them.
    pub fn compute(trips: &[RemoteTripRecord], now: DateTime<Utc>) -> Self {
        let done = completed(trips);
        if done.is_empty() {
            return TripKpis {
                current_odometer: "0".to_string(),
                ..TripKpis::default()
            };
        }

        let count = Decimal::from(done.len());
        let total_distance = total(done.iter().map(|t| t.distance));
        let total_hours = total(done.iter().map(|t| hours(t.duration)));
        let total_earnings = total(done.iter().map(|t| t.earnings));
        let longest_trip = done.iter().map(|t| t.distance).max().unwrap_or_default();
        let shortest_trip = done.iter().map(|t| t.distance).min().unwrap_or_default();

        let week = DateRange::Last7Days;
        let month = DateRange::Last30Days;
        let in_range = |range: DateRange| {
            done.iter()
                .filter(move |t| range.contains(t.record.start_timestamp, now))
        };
        let today = now.date_naive();

        TripKpis {
            total_trips: done.len(),
            total_distance: round_tenths(total_distance),
            avg_distance: round_tenths(total_distance / count),
            total_duration_hours: round_tenths(total_hours),
            avg_duration_hours: round_tenths(total_hours / count),
            longest_trip: round_tenths(longest_trip),
            shortest_trip: round_tenths(shortest_trip),
            this_week_trips: in_range(week).count(),
            this_month_trips: in_range(month).count(),
            current_odometer: current_odometer(trips),
            avg_speed: round_tenths(ratio(total_distance, total_hours)),
            total_earnings: round_cents(total_earnings),
            avg_earnings_per_trip: round_cents(total_earnings / count),
            earnings_per_hour: round_cents(ratio(total_earnings, total_hours)),
            earnings_per_km: round_cents(ratio(total_earnings, total_distance)),
            today_earnings: round_cents(total(
                done.iter()
                    .filter(|t| t.record.start_timestamp.date_naive() == today)
                    .map(|t| t.earnings),
            )),
            week_earnings: round_cents(total(in_range(week).map(|t| t.earnings))),
            month_earnings: round_cents(total(in_range(month).map(|t| t.earnings))),
        }
    }
}

/// The latest trip's ending reading, falling back to its starting reading
/// while it is still open (or was recorded as "0").
fn current_odometer(trips: &[RemoteTripRecord]) -> String {
    let Some(latest) = trips.first() else {
        return "0".to_string();
    };
    match latest.ending_odometer.as_deref().map(str::trim) {
        Some(ending) if !ending.is_empty() && ending != "0" => ending.to_string(),
        _ if !latest.starting_odometer.trim().is_empty() => latest.starting_odometer.clone(),
        _ => "0".to_string(),
    }
}

//=========================================================================================
// Export Summary
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Excel,
    Pdf,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Excel => "excel",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Excel => "xlsx",
            ExportFormat::Pdf => "pdf",
        }
    }
}

/// `"{h}h {m}m"`, truncating seconds.
pub fn format_duration(duration: Duration) -> String {
    let minutes = duration.num_minutes().max(0);
    format!("{}h {}m", minutes / 60, minutes % 60)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub export_date: NaiveDate,
    pub date_range_label: String,
    pub total_trips: usize,
    pub total_distance: Decimal,
    pub avg_distance: Decimal,
    pub total_duration: String,
    pub avg_duration: String,
    pub total_earnings: Decimal,
    pub avg_earnings: Decimal,
}

impl ExportSummary {
    /// Summarises the completed trips that started inside `range`.
    pub fn compute(trips: &[RemoteTripRecord], range: DateRange, now: DateTime<Utc>) -> Self {
        let in_range = filter_by_range(trips, range, now);
        let done = completed(&in_range);
        let count = done.len();

        let total_distance = total(done.iter().map(|t| t.distance));
        let total_duration = done.iter().fold(Duration::zero(), |sum, t| {
            sum.checked_add(&t.duration).unwrap_or(sum)
        });
        let total_earnings = total(done.iter().map(|t| t.earnings));

        let (avg_distance, avg_duration, avg_earnings) = if count == 0 {
            (Decimal::ZERO, Duration::zero(), Decimal::ZERO)
        } else {
            let n = Decimal::from(count);
            (
                total_distance / n,
                total_duration / count as i32,
                total_earnings / n,
            )
        };

        ExportSummary {
            export_date: now.date_naive(),
            date_range_label: range.label(),
            total_trips: count,
            total_distance: round_tenths(total_distance),
            avg_distance: round_tenths(avg_distance),
            total_duration: format_duration(total_duration),
            avg_duration: format_duration(avg_duration),
            total_earnings: round_cents(total_earnings),
            avg_earnings: round_cents(avg_earnings),
        }
    }
}

/// `trips_export_{format}_{range}_{yyyymmdd}.{ext}`
pub fn export_file_name(format: ExportFormat, range: DateRange, now: DateTime<Utc>) -> String {
    format!(
        "trips_export_{}_{}_{}.{}",
        format.as_str(),
        range.key(),
        now.format("%Y%m%d"),
        format.extension()
    )
}
