pub mod prompt;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the main WebSocket handler to make it easily accessible
// to the binary that will build the web server router.
pub use ws_handler::ws_handler;
pub use rest::{
    create_receipt_handler, dashboard_handler, export_summary_handler, get_receipt_handler,
    get_trip_handler, list_receipts_handler, list_trips_handler, trip_state_handler,
};
