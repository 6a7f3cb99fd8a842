//! Position sources.
//!
//! A [`PositionProvider`] is the location capability: when asked to watch, it
//! spawns a task that streams [`PositionEvent`]s into a channel and hands back
//! a [`Subscription`] that owns that task. Closing (or dropping) the
//! subscription stops the stream.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::{PositionConfig, PositionSourceKind};
use crate::telemetry::{Coordinates, SpeedReading};

/// Command that switches a gpsd connection into JSON watch mode.
const GPSD_WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

/// gpsd fix mode for a 2D fix.
const GPSD_MODE_2D: u8 = 2;

/// gpsd fix mode for a 3D fix.
const GPSD_MODE_3D: u8 = 3;

/// Errors a position subscription can report.
///
/// These mirror the failure kinds of a platform location capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PositionError {
    /// The user or platform refused access to location.
    #[error("location permission denied")]
    PermissionDenied,

    /// No position could be obtained from the source.
    #[error("position unavailable")]
    Unavailable,

    /// No usable fix arrived within the acquisition timeout.
    #[error("timed out waiting for a position fix")]
    Timeout,
}

/// Options for a continuous position watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Prefer precise fixes over fast ones.
    pub high_accuracy: bool,
    /// Oldest sample that may still be delivered.
    pub maximum_age: Duration,
    /// How long to wait for a usable fix before reporting [`PositionError::Timeout`].
    pub timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            maximum_age: Duration::from_millis(1000),
            timeout: Duration::from_millis(5000),
        }
    }
}

impl From<&PositionConfig> for WatchOptions {
    fn from(config: &PositionConfig) -> Self {
        Self {
            high_accuracy: config.high_accuracy,
            maximum_age: Duration::from_millis(config.maximum_age_ms),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

/// One reading from a position subscription.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Ground speed in metres per second, when the source knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// When the fix was taken, when the source reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl PositionSample {
    /// A sample without speed or timestamp.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            speed: None,
            timestamp: None,
        }
    }

    /// Attach a ground speed in m/s.
    #[must_use]
    pub const fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// The coordinates of this sample.
    #[must_use]
    pub const fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// The display speed for this sample.
    #[must_use]
    pub fn speed_reading(&self) -> SpeedReading {
        SpeedReading::from_meters_per_second(self.speed)
    }
}

/// What a subscription delivers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionEvent {
    /// A successful reading.
    Sample(PositionSample),
    /// The subscription hit an error.
    Error(PositionError),
}

/// A cancellable handle to a running position watch.
///
/// [`Subscription::close`] consumes the handle, so it can only be closed once.
/// A handle dropped without closing cancels its watch as well.
#[derive(Debug)]
pub struct Subscription {
    provider: &'static str,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap the task that feeds a watch.
    #[must_use]
    pub fn new(provider: &'static str, task: JoinHandle<()>) -> Self {
        Self {
            provider,
            task: Some(task),
        }
    }

    /// The provider that opened this subscription.
    #[must_use]
    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Whether the watch task is still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the watch. No events are sent after this returns.
    pub fn close(mut self) {
        debug!(provider = self.provider, "Closing position subscription");
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A location capability.
pub trait PositionProvider: Send + Sync + std::fmt::Debug {
    /// The name of this provider (for logging).
    fn name(&self) -> &'static str;

    /// Whether the capability exists at all.
    ///
    /// When this is `false` no watch should be opened.
    fn is_available(&self) -> bool;

    /// Open a continuous watch that sends events through `tx`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::Unavailable`] if the capability is missing.
    fn watch(
        &self,
        options: WatchOptions,
        tx: mpsc::Sender<PositionEvent>,
    ) -> Result<Subscription, PositionError>;
}

/// Build the provider selected in configuration.
#[must_use]
pub fn provider_from_config(config: &PositionConfig) -> Arc<dyn PositionProvider> {
    match config.source {
        PositionSourceKind::Gpsd => Arc::new(GpsdProvider::new(config.gpsd_address.clone())),
        PositionSourceKind::Replay => match &config.replay_path {
            Some(path) => Arc::new(ReplayProvider::new(
                path.clone(),
                Duration::from_millis(config.replay_interval_ms),
            )),
            None => Arc::new(NoPositionProvider),
        },
        PositionSourceKind::None => Arc::new(NoPositionProvider),
    }
}

/// The absent capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPositionProvider;

impl PositionProvider for NoPositionProvider {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn watch(
        &self,
        _options: WatchOptions,
        _tx: mpsc::Sender<PositionEvent>,
    ) -> Result<Subscription, PositionError> {
        Err(PositionError::Unavailable)
    }
}

/// Positions from a gpsd daemon.
///
/// The connection is opened when the watch starts; failing to connect is
/// reported through the subscription as [`PositionError::Unavailable`].
#[derive(Debug, Clone)]
pub struct GpsdProvider {
    address: String,
}

impl GpsdProvider {
    /// Create a provider for the daemon at `address` (`host:port`).
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// The daemon address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl PositionProvider for GpsdProvider {
    fn name(&self) -> &'static str {
        "gpsd"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn watch(
        &self,
        options: WatchOptions,
        tx: mpsc::Sender<PositionEvent>,
    ) -> Result<Subscription, PositionError> {
        debug!(address = %self.address, ?options, "Opening gpsd watch");
        let task = tokio::spawn(run_gpsd_watch(self.address.clone(), options, tx));
        Ok(Subscription::new(self.name(), task))
    }
}

async fn run_gpsd_watch(address: String, options: WatchOptions, tx: mpsc::Sender<PositionEvent>) {
    let stream = match TcpStream::connect(&address).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(address = %address, error = %e, "Could not connect to gpsd");
            let _ = tx.send(PositionEvent::Error(PositionError::Unavailable)).await;
            return;
        }
    };

    let (reader, mut writer) = stream.into_split();
    if let Err(e) = writer.write_all(GPSD_WATCH_COMMAND).await {
        warn!(error = %e, "Could not enable gpsd watch mode");
        let _ = tx.send(PositionEvent::Error(PositionError::Unavailable)).await;
        return;
    }

    let mut lines = BufReader::new(reader).lines();
    loop {
        let event = match tokio::time::timeout(options.timeout, next_fix(&mut lines, &options)).await
        {
            Ok(Ok(Some(sample))) => PositionEvent::Sample(sample),
            Ok(Ok(None)) => {
                warn!("gpsd closed the connection");
                let _ = tx.send(PositionEvent::Error(PositionError::Unavailable)).await;
                return;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Lost gpsd connection");
                let _ = tx.send(PositionEvent::Error(PositionError::Unavailable)).await;
                return;
            }
            Err(_) => {
                debug!(timeout_ms = options.timeout.as_millis(), "No gpsd fix within timeout");
                PositionEvent::Error(PositionError::Timeout)
            }
        };

        if tx.send(event).await.is_err() {
            debug!("Position channel closed, stopping gpsd watch");
            return;
        }
    }
}

/// Read lines until one carries a usable fix. `Ok(None)` means end of stream.
async fn next_fix<R>(
    lines: &mut tokio::io::Lines<R>,
    options: &WatchOptions,
) -> std::io::Result<Option<PositionSample>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        if let Some(sample) = parse_gpsd_report(&line, options, Utc::now()) {
            return Ok(Some(sample));
        }
    }
    Ok(None)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "class")]
enum GpsdReport {
    #[serde(rename = "TPV")]
    Tpv(TpvReport),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TpvReport {
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    speed: Option<f64>,
    time: Option<DateTime<Utc>>,
}

/// Turn one gpsd JSON line into a sample, if it is a usable fix.
fn parse_gpsd_report(
    line: &str,
    options: &WatchOptions,
    now: DateTime<Utc>,
) -> Option<PositionSample> {
    let report = match serde_json::from_str::<GpsdReport>(line) {
        Ok(GpsdReport::Tpv(report)) => report,
        Ok(GpsdReport::Other) => return None,
        Err(e) => {
            trace!(error = %e, "Ignoring unparseable gpsd line");
            return None;
        }
    };

    let required_mode = if options.high_accuracy {
        GPSD_MODE_3D
    } else {
        GPSD_MODE_2D
    };
    if report.mode < required_mode {
        trace!(mode = report.mode, required_mode, "Fix not good enough");
        return None;
    }

    let (Some(latitude), Some(longitude)) = (report.lat, report.lon) else {
        return None;
    };

    if let Some(time) = report.time {
        let age = now.signed_duration_since(time);
        if age.to_std().is_ok_and(|age| age > options.maximum_age) {
            trace!(age_ms = age.num_milliseconds(), "Discarding stale fix");
            return None;
        }
    }

    Some(PositionSample {
        latitude,
        longitude,
        speed: report.speed,
        timestamp: report.time,
    })
}

/// Replays recorded samples from a newline-delimited JSON file.
///
/// Each line is a [`PositionSample`]. Samples are delivered one per
/// `interval`, the first one immediately; recorded timestamps are not checked
/// against the maximum age. Unparseable lines are skipped. The watch goes
/// quiet once the file is exhausted.
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    path: PathBuf,
    interval: Duration,
}

impl ReplayProvider {
    /// Create a provider replaying `path` at one sample per `interval`.
    #[must_use]
    pub fn new(path: PathBuf, interval: Duration) -> Self {
        Self { path, interval }
    }
}

impl PositionProvider for ReplayProvider {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn watch(
        &self,
        _options: WatchOptions,
        tx: mpsc::Sender<PositionEvent>,
    ) -> Result<Subscription, PositionError> {
        debug!(path = %self.path.display(), "Opening replay watch");
        let task = tokio::spawn(run_replay(self.path.clone(), self.interval, tx));
        Ok(Subscription::new(self.name(), task))
    }
}

async fn run_replay(path: PathBuf, interval: Duration, tx: mpsc::Sender<PositionEvent>) {
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read replay file");
            let _ = tx.send(PositionEvent::Error(PositionError::Unavailable)).await;
            return;
        }
    };

    let mut ticker = tokio::time::interval(interval);
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let sample = match serde_json::from_str::<PositionSample>(line) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed replay sample");
                continue;
            }
        };

        ticker.tick().await;
        if tx.send(PositionEvent::Sample(sample)).await.is_err() {
            debug!("Position channel closed, stopping replay");
            return;
        }
    }
    debug!(path = %path.display(), "Replay finished");
}
