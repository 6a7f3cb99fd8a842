//! Renderable telemetry values.
//!
//! These are the display-ready values the controller publishes after every
//! update. Nothing here is persisted; a new [`TelemetryState`] snapshot
//! replaces the previous one on each render pass.

use serde::{Deserialize, Serialize};

/// Conversion factor from metres per second to kilometres per hour.
pub const MPS_TO_KMH: f64 = 3.6;

/// Speed shown when no usable sample is available.
pub const UNKNOWN_SPEED: &str = "0";

/// A wall-clock reading with zero-padded display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockReading {
    /// Hour of day, 0-23.
    pub hour: u8,
    /// Minute, 0-59.
    pub minute: u8,
    /// Second, 0-59 (60 during a leap second).
    pub second: u8,
}

impl ClockReading {
    /// Create a reading from its components.
    #[must_use]
    pub const fn from_time(hour: u8, minute: u8, second: u8) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    /// Format in the cab display's native style, e.g. `09時05分07秒`.
    #[must_use]
    pub fn to_cab_string(&self) -> String {
        format!("{:02}時{:02}分{:02}秒", self.hour, self.minute, self.second)
    }
}

impl std::fmt::Display for ClockReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Speed in km/h, already formatted for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeedReading(String);

impl SpeedReading {
    /// The reading shown when speed is unavailable.
    #[must_use]
    pub fn unknown() -> Self {
        Self(UNKNOWN_SPEED.to_string())
    }

    /// Derive a reading from a raw m/s sample.
    ///
    /// Absent and non-finite samples yield [`UNKNOWN_SPEED`]; anything else is
    /// converted to km/h and formatted with one decimal place. A value lying
    /// exactly halfway between two tenths rounds away from zero.
    #[must_use]
    pub fn from_meters_per_second(sample: Option<f64>) -> Self {
        match sample {
            Some(mps) if mps.is_finite() => {
                // Adding 0.0 folds -0.0 into 0.0 so it never renders as "-0.0".
                let kmh = round_half_tenth_away(mps * MPS_TO_KMH) + 0.0;
                Self(format!("{kmh:.1}"))
            }
            _ => Self::unknown(),
        }
    }

    /// The display string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the "no data" reading.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_SPEED
    }
}

/// Resolve exact ties at the first decimal away from zero.
///
/// `format!("{:.1}")` breaks exact ties to even. Only values whose scaled form
/// is exactly representable and ends in `.5` are adjusted; all others are left
/// to the formatter's correctly rounded output.
#[allow(clippy::float_cmp)]
fn round_half_tenth_away(value: f64) -> f64 {
    let tenths = value * 10.0;
    let exact = value.mul_add(10.0, -tenths) == 0.0;
    if exact && (tenths - tenths.trunc()).abs() == 0.5 {
        tenths.round() / 10.0
    } else {
        value
    }
}

impl Default for SpeedReading {
    fn default() -> Self {
        Self::unknown()
    }
}

impl std::fmt::Display for SpeedReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude, positive north.
    pub latitude: f64,
    /// Longitude, positive east.
    pub longitude: f64,
}

impl Coordinates {
    /// Create a coordinate pair.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// A resolved, human-readable place description.
///
/// Empty until a lookup completes, and empty again whenever coordinates are
/// cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaceName(String);

impl PlaceName {
    /// Compose a place name from its region and locality.
    ///
    /// The locality is appended after a single space; an empty locality adds
    /// nothing, not even the space.
    #[must_use]
    pub fn compose(region: &str, locality: &str) -> Self {
        if locality.is_empty() {
            Self(region.to_string())
        } else {
            Self(format!("{region} {locality}"))
        }
    }

    /// Wrap a literal string, such as a failure marker.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The display string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether nothing has been resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for PlaceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything one render pass needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryState {
    /// Current wall-clock time.
    pub clock: ClockReading,
    /// Current speed.
    pub speed: SpeedReading,
    /// Current position, if a fix is held.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    /// Resolved place for `coordinates`.
    pub place_name: PlaceName,
}
