//! The clock source: a repeating trigger producing wall-clock readings.

use std::time::Duration;

use chrono::Timelike;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::telemetry::ClockReading;

/// Default period between clock updates.
pub const DEFAULT_CLOCK_INTERVAL: Duration = Duration::from_secs(1);

/// Where wall-clock time comes from.
pub trait TimeSource: Send + Sync + std::fmt::Debug {
    /// The current local time.
    fn now(&self) -> ClockReading;
}

/// Local system time via `chrono`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    // chrono keeps these in range, the casts cannot truncate
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> ClockReading {
        let now = chrono::Local::now();
        ClockReading::from_time(now.hour() as u8, now.minute() as u8, now.second() as u8)
    }
}

/// A time source that always reports the same reading.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource(pub ClockReading);

impl TimeSource for FixedTimeSource {
    fn now(&self) -> ClockReading {
        self.0
    }
}

/// A repeating trigger.
///
/// The first tick fires one full period after creation, matching a plain
/// repeating timer; the initial reading is taken at mount instead. Ticks that
/// are missed while the owner is busy are skipped rather than bunched, so the
/// clock never updates more than once per period. Dropping the source cancels
/// the trigger.
#[derive(Debug)]
pub struct ClockSource {
    ticker: Interval,
    period: Duration,
}

impl ClockSource {
    /// Start a trigger with the given period.
    ///
    /// # Panics
    ///
    /// If `period` is zero. Configuration validation rejects that value first.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { ticker, period }
    }

    /// The trigger period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next trigger.
    pub async fn tick(&mut self) {
        self.ticker.tick().await;
    }
}
