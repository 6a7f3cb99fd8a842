//! Configuration management for cabview.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geocode::{
    DEFAULT_ENDPOINT, DEFAULT_FAILURE_MARKER, DEFAULT_LOCALITY_PATTERN, DEFAULT_REGION_INDEX,
};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "cabview";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `CABVIEW_`)
/// 2. TOML config file at `~/.config/cabview/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Clock configuration.
    pub clock: ClockConfig,
    /// Position source configuration.
    pub position: PositionConfig,
    /// Reverse geocoding configuration.
    pub geocode: GeocodeConfig,
    /// Static route display.
    pub route: RouteConfig,
}

/// Clock-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Milliseconds between clock updates.
    pub interval_ms: u64,
}

/// Which location capability to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSourceKind {
    /// A gpsd daemon.
    #[default]
    Gpsd,
    /// A recorded track file.
    Replay,
    /// No location capability.
    None,
}

impl std::fmt::Display for PositionSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gpsd => write!(f, "gpsd"),
            Self::Replay => write!(f, "replay"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Position-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// The location capability.
    pub source: PositionSourceKind,
    /// Require precise (3D) fixes.
    pub high_accuracy: bool,
    /// Oldest fix that may be delivered, in milliseconds.
    pub maximum_age_ms: u64,
    /// Acquisition timeout in milliseconds.
    pub timeout_ms: u64,
    /// gpsd `host:port`.
    pub gpsd_address: String,
    /// Track file for the replay source.
    pub replay_path: Option<PathBuf>,
    /// Milliseconds between replayed samples.
    pub replay_interval_ms: u64,
}

/// Reverse-geocoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeConfig {
    /// Nominatim-compatible reverse endpoint.
    pub endpoint: String,
    /// Preferred response language.
    pub language: String,
    /// `User-Agent` sent with lookups.
    pub user_agent: String,
    /// Place name shown when a lookup fails.
    pub failure_marker: String,
    /// Index of the region segment in the description.
    pub region_index: usize,
    /// Regex matching locality segments.
    pub locality_pattern: String,
    /// Drop responses to lookups that were superseded by a newer one.
    pub discard_stale: bool,
}

/// The static route panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Line code shown above the panel.
    pub line_code: String,
    /// Service type, e.g. express.
    pub service_type: String,
    /// Operating pattern.
    pub pattern: String,
    /// Current station.
    pub origin: String,
    /// Next stop.
    pub next_stop: String,
    /// Terminal station.
    pub terminal: String,
    /// Run number.
    pub run_number: String,
    /// Run number suffix.
    pub run_suffix: String,
    /// Distance marker.
    pub distance_marker: String,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            source: PositionSourceKind::Gpsd,
            high_accuracy: true,
            maximum_age_ms: 1000,
            timeout_ms: 5000,
            gpsd_address: "127.0.0.1:2947".to_string(),
            replay_path: None,
            replay_interval_ms: 1000,
        }
    }
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            language: "ja".to_string(),
            user_agent: concat!(
                "cabview/",
                env!("CARGO_PKG_VERSION"),
                " (Rust; https://github.com/oxur/cabview)"
            )
            .to_string(),
            failure_marker: DEFAULT_FAILURE_MARKER.to_string(),
            region_index: DEFAULT_REGION_INDEX,
            locality_pattern: DEFAULT_LOCALITY_PATTERN.to_string(),
            discard_stale: false,
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            line_code: "CO1AB".to_string(),
            service_type: "急行".to_string(),
            pattern: "府中→大阪市内".to_string(),
            origin: "府中".to_string(),
            next_stop: "桜上水".to_string(),
            terminal: "高幡不動".to_string(),
            run_number: "25".to_string(),
            run_suffix: "S".to_string(),
            distance_marker: "100km".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `CABVIEW_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Toml::file(&config_file))
                .merge(Env::prefixed("CABVIEW_").split("__")),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.clock.interval_ms == 0 {
            return Err(Error::config_validation(
                "clock.interval_ms must be greater than 0",
            ));
        }

        if self.position.timeout_ms == 0 {
            return Err(Error::config_validation(
                "position.timeout_ms must be greater than 0",
            ));
        }

        if self.position.source == PositionSourceKind::Replay {
            if self.position.replay_path.is_none() {
                return Err(Error::config_validation(
                    "position.replay_path is required when source is replay",
                ));
            }
            if self.position.replay_interval_ms == 0 {
                return Err(Error::config_validation(
                    "position.replay_interval_ms must be greater than 0",
                ));
            }
        }

        if let Err(e) = url::Url::parse(&self.geocode.endpoint) {
            return Err(Error::config_validation(format!(
                "invalid geocode.endpoint {}: {e}",
                self.geocode.endpoint
            )));
        }

        if regex::Regex::new(&self.geocode.locality_pattern).is_err() {
            return Err(Error::config_validation(format!(
                "invalid regex pattern: {}",
                self.geocode.locality_pattern
            )));
        }

        Ok(())
    }

    /// Get the clock interval as a Duration.
    #[must_use]
    pub fn clock_interval(&self) -> Duration {
        Duration::from_millis(self.clock.interval_ms)
    }
}
