//! `cabview` - A train cab telemetry display
//!
//! Combines a one-second clock, a GPS position subscription and reverse
//! geocoding into a single published state, rendered as a cab-style dashboard.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod geocode;
pub mod logging;
pub mod position;
pub mod render;
pub mod telemetry;

pub use config::Config;
pub use controller::{ControllerHandle, TelemetryController};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use telemetry::{ClockReading, Coordinates, PlaceName, SpeedReading, TelemetryState};
