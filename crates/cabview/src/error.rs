//! Error types for cabview.
//!
//! Runtime failures of the telemetry sources are absorbed by the controller
//! (see [`crate::controller`]); the variants here surface at startup, from the
//! CLI, or from the one-shot geocode command.

use std::path::PathBuf;
use thiserror::Error;

use crate::geocode::GeocodeError;

/// The main error type for cabview operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Source Errors ===
    /// A reverse-geocoding lookup failed.
    #[error("geocode lookup failed: {0}")]
    Geocode(#[from] GeocodeError),

    /// Failed to build the HTTP client used for lookups.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// The controller was already unmounted.
    #[error("controller is not mounted")]
    NotMounted,

    // === I/O Errors ===
    /// Failed to read a replay file.
    #[error("failed to read replay file {path}: {source}")]
    ReplayRead {
        /// Path of the replay file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for cabview operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Check if this error came from a lookup rather than setup.
    #[must_use]
    pub fn is_source_error(&self) -> bool {
        matches!(self, Self::Geocode(_))
    }
}
