//! services/trip_api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};
use trip_tracker_core::amounts::AmountMode;
use trip_tracker_core::domain::{ReceiptQuery, ReceiptRecord, RemoteTripRecord, TripId, TripState};
use trip_tracker_core::ports::{PortError, PortResult};
use trip_tracker_core::stats::{
    export_file_name, format_duration, DateRange, ExportFormat, ExportSummary, TripKpis,
};
use trip_tracker_core::upload::TripPhotos;
use trip_tracker_core::{ReceiptForm, TripError};
use utoipa::{IntoParams, OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_trips_handler,
        get_trip_handler,
        trip_state_handler,
        dashboard_handler,
        export_summary_handler,
        list_receipts_handler,
        get_receipt_handler,
        create_receipt_handler,
    ),
    components(
        schemas(TripView, TripDetailView, TripStateResponse, DashboardResponse, ExportSummaryResponse, ReceiptView, ReceiptCreatedResponse)
    ),
    tags(
        (name = "Trip Tracker API", description = "Trip history, dashboard figures and expense receipts.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A trip as listed in the history.
#[derive(Serialize, ToSchema)]
pub struct TripView {
    id: String,
    starting_odometer: String,
    start_timestamp: DateTime<Utc>,
    ending_odometer: Option<String>,
    end_timestamp: Option<DateTime<Utc>>,
    earnings: Option<Decimal>,
    /// Kilometres driven; absent for open trips.
    distance: Option<Decimal>,
    /// `"{h}h {m}m"`; absent for open trips.
    duration: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl From<RemoteTripRecord> for TripView {
    fn from(record: RemoteTripRecord) -> Self {
        Self {
            distance: record.distance(),
            duration: record.duration().map(format_duration),
            id: record.id.as_str().to_string(),
            starting_odometer: record.starting_odometer,
            start_timestamp: record.start_timestamp,
            ending_odometer: record.ending_odometer,
            end_timestamp: record.end_timestamp,
            earnings: record.earnings,
            created_at: record.created_at,
        }
    }
}

/// A single trip with the photos taken at its start and end.
#[derive(Serialize, ToSchema)]
pub struct TripDetailView {
    #[serde(flatten)]
    trip: TripView,
    start_photo_url: Option<String>,
    end_photo_url: Option<String>,
    /// Set when the trip loaded but its photos could not be looked up.
    photos_error: Option<String>,
}

impl TripDetailView {
    fn new(record: RemoteTripRecord, photos: Option<TripPhotos>) -> Self {
        let photos_error = photos
            .is_none()
            .then(|| "Unable to load photos".to_string());
        let photos = photos.unwrap_or_default();
        Self {
            trip: TripView::from(record),
            start_photo_url: photos.start_url,
            end_photo_url: photos.end_url,
            photos_error,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct TripStateResponse {
    #[schema(value_type = Object)]
    state: TripState,
}

#[derive(Serialize, ToSchema)]
pub struct DashboardResponse {
    #[schema(value_type = Object)]
    kpis: TripKpis,
    #[schema(value_type = Object)]
    state: TripState,
}

#[derive(Serialize, ToSchema)]
pub struct ExportSummaryResponse {
    /// Suggested name for the exported document.
    file_name: String,
    #[schema(value_type = Object)]
    summary: ExportSummary,
}

#[derive(Serialize, ToSchema)]
pub struct ReceiptView {
    id: String,
    receipt_date: NaiveDate,
    category: String,
    vendor: String,
    description: Option<String>,
    subtotal: Decimal,
    gst: Decimal,
    total_amount: Decimal,
    receipt_image_url: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl From<ReceiptRecord> for ReceiptView {
    fn from(record: ReceiptRecord) -> Self {
        Self {
            id: record.id,
            receipt_date: record.receipt_date,
            category: record.category.to_string(),
            vendor: record.vendor,
            description: record.description,
            subtotal: record.subtotal,
            gst: record.gst,
            total_amount: record.total_amount,
            receipt_image_url: record.receipt_image_url,
            created_at: record.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ReceiptCreatedResponse {
    receipt: ReceiptView,
    /// False when the receipt was saved but its photo could not be stored.
    photo_uploaded: bool,
}

/// Query parameters for `/export/summary`.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExportQuery {
    /// `7days`, `30days` or `custom`.
    range: String,
    /// Start of a custom range (RFC 3339).
    start: Option<DateTime<Utc>>,
    /// End of a custom range (RFC 3339).
    end: Option<DateTime<Utc>>,
    /// `excel` (default) or `pdf`.
    format: Option<String>,
}

impl ExportQuery {
    fn date_range(&self) -> Result<DateRange, String> {
        match self.range.as_str() {
            "7days" => Ok(DateRange::Last7Days),
            "30days" => Ok(DateRange::Last30Days),
            "custom" => match (self.start, self.end) {
                (Some(start), Some(end)) if start <= end => Ok(DateRange::Custom { start, end }),
                (Some(_), Some(_)) => Err("start must not be after end".to_string()),
                _ => Err("A custom range needs both start and end".to_string()),
            },
            other => Err(format!("Unknown range '{}'", other)),
        }
    }

    fn export_format(&self) -> Result<ExportFormat, String> {
        match self.format.as_deref() {
            None | Some("excel") => Ok(ExportFormat::Excel),
            Some("pdf") => Ok(ExportFormat::Pdf),
            Some(other) => Err(format!("Unknown format '{}'", other)),
        }
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn trip_error_response(e: TripError) -> (StatusCode, String) {
    let status = match &e {
        TripError::Validation(_) => StatusCode::BAD_REQUEST,
        TripError::Precondition(_) | TripError::UploadCancelled { .. } => StatusCode::CONFLICT,
        TripError::Remote(PortError::NotFound(_)) => {
            return (StatusCode::NOT_FOUND, e.to_string());
        }
        TripError::Remote(_) => StatusCode::BAD_GATEWAY,
        TripError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    };
    if status.is_server_error() {
        error!("Request failed: {}", e);
    }
    (status, e.user_message())
}

/// Runs a store call under the configured remote deadline.
async fn remote<T>(
    app_state: &AppState,
    call: impl Future<Output = PortResult<T>>,
) -> Result<T, (StatusCode, String)> {
    let limit = app_state.config.remote_timeout;
    let result = match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(TripError::from),
        Err(_) => Err(TripError::Timeout(limit)),
    };
    result.map_err(trip_error_response)
}

fn bad_request(message: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.into())
}

//=========================================================================================
// Trip Handlers
//=========================================================================================

/// List every trip, newest first.
#[utoipa::path(
    get,
    path = "/trips",
    responses(
        (status = 200, description = "All trips", body = [TripView]),
        (status = 502, description = "The trip store could not be reached")
    )
)]
pub async fn list_trips_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let trips = remote(&app_state, app_state.trips.list_all()).await?;
    let views: Vec<TripView> = trips.into_iter().map(TripView::from).collect();
    Ok(Json(views))
}

/// Fetch a single trip with its photo URLs.
#[utoipa::path(
    get,
    path = "/trips/{id}",
    params(("id" = String, Path, description = "The trip ID.")),
    responses(
        (status = 200, description = "The trip and its photos", body = TripDetailView),
        (status = 404, description = "No trip with that ID")
    )
)]
pub async fn get_trip_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let trip_id = TripId::new(id);
    let trip = remote(&app_state, app_state.trips.get(&trip_id)).await?;
    // A photo lookup failure still returns the trip.
    let photos = match remote(&app_state, app_state.photos.trip_photos(trip_id.as_str())).await {
        Ok(photos) => Some(photos),
        Err((_, message)) => {
            warn!(trip_id = %trip_id.as_str(), "Trip photos unavailable: {}", message);
            None
        }
    };
    Ok(Json(TripDetailView::new(trip, photos)))
}

/// The lifecycle state of this server's current trip.
#[utoipa::path(
    get,
    path = "/trip/state",
    responses((status = 200, description = "Current lifecycle state", body = TripStateResponse))
)]
pub async fn trip_state_handler(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(TripStateResponse {
        state: app_state.controller.state(),
    })
}

/// Dashboard figures over all trips.
#[utoipa::path(
    get,
    path = "/dashboard",
    responses(
        (status = 200, description = "Dashboard KPIs and the current state", body = DashboardResponse),
        (status = 502, description = "The trip store could not be reached")
    )
)]
pub async fn dashboard_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let trips = remote(&app_state, app_state.trips.list_all()).await?;
    let kpis = TripKpis::compute(&trips, Utc::now());
    Ok(Json(DashboardResponse {
        kpis,
        state: app_state.controller.state(),
    }))
}

/// Summary figures for an export over a date range.
#[utoipa::path(
    get,
    path = "/export/summary",
    params(ExportQuery),
    responses(
        (status = 200, description = "Summary and suggested file name", body = ExportSummaryResponse),
        (status = 400, description = "Unknown range or format")
    )
)]
pub async fn export_summary_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let range = query.date_range().map_err(bad_request)?;
    let format = query.export_format().map_err(bad_request)?;
    let trips = remote(&app_state, app_state.trips.list_all()).await?;

    let now = Utc::now();
    Ok(Json(ExportSummaryResponse {
        file_name: export_file_name(format, range, now),
        summary: ExportSummary::compute(&trips, range, now),
    }))
}

//=========================================================================================
// Receipt Handlers
//=========================================================================================

/// List receipts, newest first, optionally filtered.
#[utoipa::path(
    get,
    path = "/receipts",
    params(
        ("search" = Option<String>, Query, description = "Matches vendor or description, case-insensitively."),
        ("category" = Option<String>, Query, description = "Exact category, e.g. `Fuel`."),
        ("start_date" = Option<NaiveDate>, Query, description = "Earliest receipt date."),
        ("end_date" = Option<NaiveDate>, Query, description = "Latest receipt date."),
        ("min_amount" = Option<String>, Query, description = "Minimum total amount."),
        ("max_amount" = Option<String>, Query, description = "Maximum total amount.")
    ),
    responses(
        (status = 200, description = "Matching receipts", body = [ReceiptView]),
        (status = 502, description = "The receipt store could not be reached")
    )
)]
pub async fn list_receipts_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ReceiptQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let receipts = app_state
        .receipts
        .query(&query)
        .await
        .map_err(trip_error_response)?;
    let views: Vec<ReceiptView> = receipts.into_iter().map(ReceiptView::from).collect();
    Ok(Json(views))
}

/// Fetch a single receipt.
#[utoipa::path(
    get,
    path = "/receipts/{id}",
    params(("id" = String, Path, description = "The receipt ID.")),
    responses(
        (status = 200, description = "The receipt", body = ReceiptView),
        (status = 404, description = "No receipt with that ID")
    )
)]
pub async fn get_receipt_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let receipt = app_state
        .receipts
        .get(&id)
        .await
        .map_err(trip_error_response)?;
    Ok(Json(ReceiptView::from(receipt)))
}

/// Create a receipt from a photo and its details.
///
/// Accepts a multipart/form-data request with a `photo` file part and the
/// text parts `vendor`, `category`, `receipt_date`, `description`,
/// `amount_mode` (`total` or `subtotal`) and `amount`.
#[utoipa::path(
    post,
    path = "/receipts",
    request_body(content_type = "multipart/form-data", description = "The receipt photo and fields."),
    responses(
        (status = 201, description = "Receipt saved", body = ReceiptCreatedResponse),
        (status = 400, description = "Invalid or missing fields"),
        (status = 502, description = "The receipt store could not be reached")
    )
)]
pub async fn create_receipt_handler(
    State(app_state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut form = ReceiptForm {
        photo: None,
        vendor: String::new(),
        category: None,
        receipt_date: String::new(),
        description: String::new(),
        amount_mode: AmountMode::Total,
        amount: String::new(),
    };

    let mut parsed: Result<(), (StatusCode, String)> = Ok(());
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                parsed = Err(bad_request(format!("Failed to read multipart data: {}", e)));
                break;
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        if name == "photo" {
            let step = match field.bytes().await {
                Ok(data) if data.is_empty() => Ok(()),
                Ok(data) => match app_state.staging.stage(&data).await {
                    Ok(photo) => {
                        if let Some(old) = form.photo.replace(photo) {
                            app_state.staging.discard(&old).await;
                        }
                        Ok(())
                    }
                    Err(e) => {
                        error!("Failed to stage receipt photo: {}", e);
                        Err((
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Failed to store the uploaded photo".to_string(),
                        ))
                    }
                },
                Err(e) => Err(bad_request(format!("Failed to read photo bytes: {}", e))),
            };
            if let Err(e) = step {
                parsed = Err(e);
                break;
            }
            continue;
        }

        let value = match field.text().await {
            Ok(value) => value,
            Err(e) => {
                parsed = Err(bad_request(format!("Failed to read field '{}': {}", name, e)));
                break;
            }
        };
        if let Err(e) = apply_field(&mut form, &name, value) {
            parsed = Err(bad_request(e));
            break;
        }
    }

    let result = match parsed {
        Ok(()) => app_state
            .receipts
            .submit(form.clone())
            .await
            .map_err(trip_error_response),
        Err(e) => Err(e),
    };
    // The staged copy is never needed again, whatever the outcome.
    if let Some(photo) = &form.photo {
        app_state.staging.discard(photo).await;
    }

    let submission = result?;
    if submission.is_partial() {
        warn!(receipt_id = %submission.record.id, "Receipt created without its photo.");
    } else {
        info!(receipt_id = %submission.record.id, "Receipt created.");
    }
    Ok((
        StatusCode::CREATED,
        Json(ReceiptCreatedResponse {
            photo_uploaded: submission.photo_uploaded,
            receipt: ReceiptView::from(submission.record),
        }),
    ))
}

/// Copies one text part of the receipt form. Unknown parts are ignored.
fn apply_field(form: &mut ReceiptForm, name: &str, value: String) -> Result<(), String> {
    match name {
        "vendor" => form.vendor = value,
        "category" => form.category = Some(value).filter(|c| !c.trim().is_empty()),
        "receipt_date" => form.receipt_date = value,
        "description" => form.description = value,
        "amount" => form.amount = value,
        "amount_mode" => {
            form.amount_mode = match value.trim() {
                "total" => AmountMode::Total,
                "subtotal" => AmountMode::Subtotal,
                other => return Err(format!("Unknown amount_mode '{}'", other)),
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use trip_tracker_core::domain::PhotoPhase;
    use trip_tracker_core::{PreconditionError, ValidationError};

    fn export_query(range: &str) -> ExportQuery {
        ExportQuery {
            range: range.to_string(),
            start: None,
            end: None,
            format: None,
        }
    }

    fn finished_trip() -> RemoteTripRecord {
        let start = DateTime::parse_from_rfc3339("2024-06-15T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        RemoteTripRecord {
            id: TripId::new("t1"),
            starting_odometer: "1000".to_string(),
            start_timestamp: start,
            ending_odometer: Some("1042".to_string()),
            end_timestamp: Some(start + chrono::Duration::minutes(75)),
            earnings: Some(Decimal::new(3150, 2)),
            created_at: None,
        }
    }

    #[test]
    fn trip_detail_carries_photo_urls_next_to_the_trip() {
        let photos = TripPhotos {
            start_url: Some("http://localhost:3000/photos/start/t1_1.jpg".to_string()),
            end_url: None,
        };
        let json = serde_json::to_value(TripDetailView::new(finished_trip(), Some(photos))).unwrap();
        assert_eq!(json["id"], "t1");
        assert_eq!(json["duration"], "1h 15m");
        assert_eq!(
            json["start_photo_url"],
            "http://localhost:3000/photos/start/t1_1.jpg"
        );
        assert!(json["end_photo_url"].is_null());
        assert!(json["photos_error"].is_null());
    }

    #[test]
    fn trip_detail_reports_unloadable_photos_separately() {
        let json = serde_json::to_value(TripDetailView::new(finished_trip(), None)).unwrap();
        assert_eq!(json["ending_odometer"], "1042");
        assert!(json["start_photo_url"].is_null());
        assert_eq!(json["photos_error"], "Unable to load photos");
    }

    #[test]
    fn export_query_parses_ranges_and_formats() {
        assert_eq!(export_query("7days").date_range(), Ok(DateRange::Last7Days));
        assert_eq!(export_query("30days").date_range(), Ok(DateRange::Last30Days));
        assert!(export_query("90days").date_range().is_err());
        assert!(export_query("custom").date_range().is_err());

        let start = "2024-03-01T00:00:00Z".parse().unwrap();
        let end = "2024-03-05T00:00:00Z".parse().unwrap();
        let custom = ExportQuery {
            start: Some(start),
            end: Some(end),
            ..export_query("custom")
        };
        assert_eq!(custom.date_range(), Ok(DateRange::Custom { start, end }));
        let backwards = ExportQuery {
            start: Some(end),
            end: Some(start),
            ..export_query("custom")
        };
        assert!(backwards.date_range().is_err());

        assert_eq!(export_query("7days").export_format(), Ok(ExportFormat::Excel));
        let pdf = ExportQuery {
            format: Some("pdf".to_string()),
            ..export_query("7days")
        };
        assert_eq!(pdf.export_format(), Ok(ExportFormat::Pdf));
    }

    #[test]
    fn trip_errors_map_to_statuses() {
        let status = |e: TripError| trip_error_response(e).0;
        assert_eq!(
            status(ValidationError::MissingPhoto(PhotoPhase::Start).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(PreconditionError::TransitionInFlight.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(PortError::NotFound("t1".to_string()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(PortError::Unavailable("down".to_string()).into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(TripError::Timeout(Duration::from_secs(30))),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn receipt_fields_fill_the_form() {
        let mut form = ReceiptForm {
            photo: None,
            vendor: String::new(),
            category: None,
            receipt_date: String::new(),
            description: String::new(),
            amount_mode: AmountMode::Total,
            amount: String::new(),
        };
        apply_field(&mut form, "vendor", "Shell".to_string()).unwrap();
        apply_field(&mut form, "category", "  ".to_string()).unwrap();
        apply_field(&mut form, "amount_mode", "subtotal".to_string()).unwrap();
        apply_field(&mut form, "ignored", "x".to_string()).unwrap();
        assert_eq!(form.vendor, "Shell");
        assert_eq!(form.category, None);
        assert_eq!(form.amount_mode, AmountMode::Subtotal);
        assert!(apply_field(&mut form, "amount_mode", "gross".to_string()).is_err());
    }
}
