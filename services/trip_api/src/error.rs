//! services/trip_api/src/error.rs
//!
//! Defines the error type for server startup. Request handlers map their
//! failures to HTTP responses or WebSocket messages and never return it.

use crate::config::ConfigError;

/// The primary error type for the `trip_api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
