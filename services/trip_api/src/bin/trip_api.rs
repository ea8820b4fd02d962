//! services/trip_api/src/bin/trip_api.rs

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::get,
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trip_api_lib::{
    adapters::{DbAdapter, FileTripCache, FsPhotoStore, PhotoStaging},
    config::{Config, ConfigError},
    error::ApiError,
    web::{
        create_receipt_handler, dashboard_handler, export_summary_handler, get_receipt_handler,
        get_trip_handler, list_receipts_handler, list_trips_handler, rest::ApiDoc,
        state::AppState, trip_state_handler, ws_handler,
    },
};
use trip_tracker_core::upload::PhotoUploader;
use trip_tracker_core::{ReceiptService, TripController};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Local Storage Adapters ---
    tokio::fs::create_dir_all(&config.photo_root).await?;
    let photo_store = Arc::new(FsPhotoStore::new(
        config.photo_root.clone(),
        config.photo_base_url.clone(),
    ));
    let trip_cache = Arc::new(FileTripCache::new(config.trip_cache_path.clone()));
    let staging = PhotoStaging::new(config.photo_staging_dir.clone());

    // --- 4. Reconcile the Cached Trip Before Accepting Requests ---
    let controller = Arc::new(TripController::new(
        db_adapter.clone(),
        trip_cache,
        photo_store.clone(),
        config.lifecycle_settings(),
    ));
    let initial = controller.initialize().await;
    info!(state = initial.label(), "Trip lifecycle initialized.");

    let photos = PhotoUploader::new(photo_store.clone(), config.upload_timeout);
    let receipts = ReceiptService::new(
        db_adapter.clone(),
        photo_store,
        config.lifecycle_settings(),
    );

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        trips: db_adapter,
        controller,
        receipts,
        photos,
        staging,
    });

    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string())
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    let api_router = Router::new()
        .route("/trips", get(list_trips_handler))
        .route("/trips/{id}", get(get_trip_handler))
        .route("/trip/state", get(trip_state_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/export/summary", get(export_summary_handler))
        .route(
            "/receipts",
            get(list_receipts_handler).post(create_receipt_handler),
        )
        .route("/receipts/{id}", get(get_receipt_handler))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Uploaded photos are served back from the URLs the photo store hands out.
    let app = Router::new()
        .merge(api_router)
        .nest_service("/photos", ServeDir::new(&config.photo_root))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
