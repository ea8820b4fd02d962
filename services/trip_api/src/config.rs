//! services/trip_api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use trip_tracker_core::LifecycleSettings;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub trip_cache_path: PathBuf,
    pub photo_root: PathBuf,
    pub photo_base_url: String,
    /// Where client-sent photos wait before upload. Kept outside `photo_root`
    /// so staged files are never served.
    pub photo_staging_dir: PathBuf,
    pub remote_timeout: Duration,
    pub upload_timeout: Duration,
    pub cors_origin: String,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn seconds_var(name: &str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(Duration::from_secs(default)),
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{}' is not a positive number of seconds", raw),
            )),
        },
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Server and Database ---
        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Local Storage ---
        let trip_cache_path = PathBuf::from(var_or("TRIP_CACHE_PATH", "./data/trip_cache.json"));
        let photo_root = PathBuf::from(var_or("PHOTO_ROOT", "./data/photos"));
        let photo_base_url = var_or("PHOTO_BASE_URL", "http://localhost:3000/photos")
            .trim_end_matches('/')
            .to_string();
        let photo_staging_dir = PathBuf::from(var_or("PHOTO_STAGING_DIR", "./data/staging"));

        // --- Deadlines ---
        let remote_timeout = seconds_var("REMOTE_TIMEOUT_SECS", 30)?;
        let upload_timeout = seconds_var("UPLOAD_TIMEOUT_SECS", 30)?;

        let cors_origin = var_or("CORS_ORIGIN", "http://localhost:8081");

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            trip_cache_path,
            photo_root,
            photo_base_url,
            photo_staging_dir,
            remote_timeout,
            upload_timeout,
            cors_origin,
        })
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            remote_timeout: self.remote_timeout,
            upload_timeout: self.upload_timeout,
        }
    }
}
