//! The telemetry view controller.
//!
//! One event-loop task owns the [`TelemetryState`]. The clock trigger, the
//! position subscription and finished geocode lookups all reach it as events,
//! and every mutation is published through a `watch` channel, which is the
//! render pass. Nothing else touches the state, so no locks are involved.
//!
//! Lookups run on their own tasks and are never cancelled. By default the
//! response that completes last wins, even if it was requested first; with
//! `geocode.discard_stale` set, responses to superseded requests are dropped.
//! A response that arrives after coordinates were cleared is always dropped,
//! so a cleared position never shows a place name.
//!
//! A repeated fix only triggers a lookup while the failure marker is shown
//! and no lookup for the current position is outstanding.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{ClockSource, SystemTimeSource, TimeSource};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::geocode::{GeocodeResolver, NominatimClient};
use crate::position::{
    provider_from_config, PositionEvent, PositionProvider, Subscription, WatchOptions,
};
use crate::telemetry::{Coordinates, PlaceName, SpeedReading, TelemetryState};

/// Buffer between the position subscription and the event loop.
const POSITION_CHANNEL_CAPACITY: usize = 32;

/// Buffer for finished lookups.
const LOOKUP_CHANNEL_CAPACITY: usize = 16;

/// A finished reverse-geocoding lookup.
#[derive(Debug)]
struct LookupComplete {
    sequence: u64,
    coordinates: Coordinates,
    place: PlaceName,
}

/// Builds and mounts the telemetry event loop.
#[derive(Debug)]
pub struct TelemetryController {
    clock_interval: Duration,
    watch_options: WatchOptions,
    discard_stale: bool,
    provider: Arc<dyn PositionProvider>,
    resolver: Arc<GeocodeResolver>,
    time_source: Arc<dyn TimeSource>,
}

impl TelemetryController {
    /// Create a controller with explicit sources.
    #[must_use]
    pub fn new(
        config: &Config,
        provider: Arc<dyn PositionProvider>,
        resolver: GeocodeResolver,
    ) -> Self {
        Self {
            clock_interval: config.clock_interval(),
            watch_options: WatchOptions::from(&config.position),
            discard_stale: config.geocode.discard_stale,
            provider,
            resolver: Arc::new(resolver),
            time_source: Arc::new(SystemTimeSource),
        }
    }

    /// Create a controller with the sources named in configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the geocoding client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = provider_from_config(&config.position);
        let client = NominatimClient::from_config(&config.geocode)?;
        let resolver = GeocodeResolver::from_config(Arc::new(client), &config.geocode)?;
        Ok(Self::new(config, provider, resolver))
    }

    /// Replace the wall-clock source.
    #[must_use]
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    /// Start the clock and the position watch and spawn the event loop.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn mount(self) -> ControllerHandle {
        let state = TelemetryState {
            clock: self.time_source.now(),
            ..TelemetryState::default()
        };

        let (position_tx, position_rx) = mpsc::channel(POSITION_CHANNEL_CAPACITY);
        let subscription = if self.provider.is_available() {
            match self.provider.watch(self.watch_options, position_tx) {
                Ok(subscription) => Some(subscription),
                Err(e) => {
                    warn!(provider = self.provider.name(), error = %e, "Could not open position watch");
                    None
                }
            }
        } else {
            info!(provider = self.provider.name(), "Location capability unavailable");
            None
        };

        info!(
            provider = self.provider.name(),
            clock_interval_ms = self.clock_interval.as_millis(),
            discard_stale = self.discard_stale,
            "Mounting telemetry controller"
        );

        let (state_tx, state_rx) = watch::channel(state.clone());
        let (lookup_tx, lookup_rx) = mpsc::channel(LOOKUP_CHANNEL_CAPACITY);
        let (unmount_tx, unmount_rx) = oneshot::channel();

        let event_loop = EventLoop {
            positions_open: subscription.is_some(),
            state,
            state_tx,
            clock: ClockSource::new(self.clock_interval),
            time_source: self.time_source,
            position_rx,
            subscription,
            resolver: self.resolver,
            lookup_tx,
            lookup_rx,
            sequence: 0,
            latest_pending: false,
            discard_stale: self.discard_stale,
        };
        let task = tokio::spawn(event_loop.run(unmount_rx));

        ControllerHandle {
            state: state_rx,
            unmount: Some(unmount_tx),
            task: Some(task),
        }
    }
}

/// A mounted controller.
///
/// Dropping the handle without calling [`ControllerHandle::unmount`] still
/// tears the controller down, just without waiting for it.
#[derive(Debug)]
pub struct ControllerHandle {
    state: watch::Receiver<TelemetryState>,
    unmount: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<TelemetryState>>,
}

impl ControllerHandle {
    /// Observe every published state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TelemetryState> {
        self.state.clone()
    }

    /// The most recently published state.
    #[must_use]
    pub fn snapshot(&self) -> TelemetryState {
        self.state.borrow().clone()
    }

    /// Cancel the clock, close the position subscription and stop the loop.
    ///
    /// Returns the last state. Nothing is published after this resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the event loop panicked.
    pub async fn unmount(mut self) -> Result<TelemetryState> {
        let (Some(unmount), Some(task)) = (self.unmount.take(), self.task.take()) else {
            return Err(Error::NotMounted);
        };
        let _ = unmount.send(());
        task.await
            .map_err(|e| Error::internal(format!("telemetry event loop failed: {e}")))
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        if let Some(unmount) = self.unmount.take() {
            let _ = unmount.send(());
        }
    }
}

struct EventLoop {
    state: TelemetryState,
    state_tx: watch::Sender<TelemetryState>,
    clock: ClockSource,
    time_source: Arc<dyn TimeSource>,
    position_rx: mpsc::Receiver<PositionEvent>,
    positions_open: bool,
    subscription: Option<Subscription>,
    resolver: Arc<GeocodeResolver>,
    lookup_tx: mpsc::Sender<LookupComplete>,
    lookup_rx: mpsc::Receiver<LookupComplete>,
    /// Sequence number of the latest lookup request or coordinate clear.
    sequence: u64,
    /// Whether the lookup numbered `sequence` has yet to complete.
    latest_pending: bool,
    discard_stale: bool,
}

impl EventLoop {
    async fn run(mut self, mut unmount: oneshot::Receiver<()>) -> TelemetryState {
        loop {
            tokio::select! {
                biased;

                // A dropped handle counts as an unmount.
                _ = &mut unmount => break,

                () = self.clock.tick() => self.on_clock_tick(),

                event = self.position_rx.recv(), if self.positions_open => match event {
                    Some(event) => self.on_position(event),
                    None => {
                        debug!("Position subscription ended");
                        self.positions_open = false;
                    }
                },

                Some(done) = self.lookup_rx.recv() => self.on_lookup_complete(done),
            }
        }

        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
        info!("Telemetry controller unmounted");
        self.state
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    fn on_clock_tick(&mut self) {
        self.state.clock = self.time_source.now();
        self.publish();
    }

    fn on_position(&mut self, event: PositionEvent) {
        match event {
            PositionEvent::Sample(sample) => {
                debug!(
                    lat = sample.latitude,
                    lon = sample.longitude,
                    speed = ?sample.speed,
                    "Position sample"
                );
                self.state.speed = sample.speed_reading();
                self.set_coordinates(Some(sample.coordinates()));
            }
            PositionEvent::Error(e) => {
                warn!(error = %e, "Position subscription error");
                self.state.speed = SpeedReading::unknown();
                self.set_coordinates(None);
            }
        }
        self.publish();
    }

    fn set_coordinates(&mut self, coordinates: Option<Coordinates>) {
        if self.state.coordinates == coordinates {
            if let Some(coordinates) = coordinates {
                self.retry_failed_lookup(coordinates);
            }
            return;
        }
        self.state.coordinates = coordinates;

        match coordinates {
            None => {
                self.sequence += 1;
                self.latest_pending = false;
                self.state.place_name = PlaceName::default();
            }
            Some(coordinates) => self.request_lookup(coordinates),
        }
    }

    fn retry_failed_lookup(&mut self, coordinates: Coordinates) {
        if self.latest_pending || self.state.place_name != *self.resolver.failure_marker() {
            return;
        }
        debug!(%coordinates, "Retrying failed place lookup");
        self.request_lookup(coordinates);
    }

    fn request_lookup(&mut self, coordinates: Coordinates) {
        self.sequence += 1;
        self.latest_pending = true;
        let sequence = self.sequence;
        let resolver = Arc::clone(&self.resolver);
        let lookup_tx = self.lookup_tx.clone();
        debug!(sequence, %coordinates, "Requesting place lookup");

        tokio::spawn(async move {
            let place = resolver.resolve(coordinates).await;
            let done = LookupComplete {
                sequence,
                coordinates,
                place,
            };
            if lookup_tx.send(done).await.is_err() {
                debug!(sequence, "Controller gone, dropping lookup result");
            }
        });
    }

    fn on_lookup_complete(&mut self, done: LookupComplete) {
        if done.sequence == self.sequence {
            self.latest_pending = false;
        }
        if self.state.coordinates.is_none() {
            debug!(sequence = done.sequence, "Coordinates cleared, dropping lookup result");
            return;
        }
        if self.discard_stale && done.sequence != self.sequence {
            debug!(
                sequence = done.sequence,
                latest = self.sequence,
                "Dropping superseded lookup result"
            );
            return;
        }

        debug!(
            sequence = done.sequence,
            coordinates = %done.coordinates,
            place = %done.place,
            "Place resolved"
        );
        self.state.place_name = done.place;
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::clock::FixedTimeSource;
    use crate::geocode::{GeocodeError, PlaceExtractor, ReverseGeocoder, DEFAULT_FAILURE_MARKER};
    use crate::position::{NoPositionProvider, PositionError, PositionSample};
    use crate::telemetry::ClockReading;

    const WAIT: Duration = Duration::from_secs(5);

    /// A provider fed by the test through a channel.
    #[derive(Debug)]
    struct ScriptedProvider {
        feed: Mutex<Option<mpsc::Receiver<PositionEvent>>>,
        watches: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new() -> (Arc<Self>, mpsc::Sender<PositionEvent>) {
            let (tx, rx) = mpsc::channel(8);
            let provider = Arc::new(Self {
                feed: Mutex::new(Some(rx)),
                watches: AtomicUsize::new(0),
            });
            (provider, tx)
        }
    }

    impl PositionProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn watch(
            &self,
            _options: WatchOptions,
            tx: mpsc::Sender<PositionEvent>,
        ) -> std::result::Result<Subscription, PositionError> {
            self.watches.fetch_add(1, Ordering::SeqCst);
            let mut feed = self.feed.lock().unwrap().take().unwrap();
            let task = tokio::spawn(async move {
                while let Some(event) = feed.recv().await {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
            Ok(Subscription::new("scripted", task))
        }
    }

    /// Describes a position as `p0, .., p4, {lat}県, {lon}市`.
    #[derive(Debug, Default)]
    struct EchoGeocoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReverseGeocoder for EchoGeocoder {
        async fn reverse(
            &self,
            coordinates: Coordinates,
        ) -> std::result::Result<Option<String>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(format!(
                "p0, p1, p2, p3, p4, {}県, {}市",
                coordinates.latitude, coordinates.longitude
            )))
        }
    }

    #[derive(Debug)]
    struct FailingGeocoder;

    #[async_trait]
    impl ReverseGeocoder for FailingGeocoder {
        async fn reverse(
            &self,
            _coordinates: Coordinates,
        ) -> std::result::Result<Option<String>, GeocodeError> {
            Err(GeocodeError::Status(500))
        }
    }

    /// Holds each lookup until the test releases it, keyed by latitude.
    #[derive(Debug)]
    struct GatedGeocoder {
        gates: Mutex<HashMap<u64, oneshot::Receiver<String>>>,
        started: mpsc::UnboundedSender<f64>,
    }

    impl GatedGeocoder {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<f64>) {
            let (started, started_rx) = mpsc::unbounded_channel();
            let geocoder = Arc::new(Self {
                gates: Mutex::new(HashMap::new()),
                started,
            });
            (geocoder, started_rx)
        }

        fn gate(&self, latitude: f64) -> oneshot::Sender<String> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().insert(latitude.to_bits(), rx);
            tx
        }
    }

    #[async_trait]
    impl ReverseGeocoder for GatedGeocoder {
        async fn reverse(
            &self,
            coordinates: Coordinates,
        ) -> std::result::Result<Option<String>, GeocodeError> {
            let gate = self
                .gates
                .lock()
                .unwrap()
                .remove(&coordinates.latitude.to_bits())
                .unwrap();
            let _ = self.started.send(coordinates.latitude);
            Ok(gate.await.ok())
        }
    }

    fn resolver(geocoder: Arc<dyn ReverseGeocoder>) -> GeocodeResolver {
        GeocodeResolver::new(geocoder, PlaceExtractor::default(), DEFAULT_FAILURE_MARKER)
    }

    fn controller(
        config: &Config,
        provider: Arc<dyn PositionProvider>,
        geocoder: Arc<dyn ReverseGeocoder>,
    ) -> TelemetryController {
        TelemetryController::new(config, provider, resolver(geocoder))
            .with_time_source(Arc::new(FixedTimeSource(ClockReading::from_time(12, 0, 0))))
    }

    async fn wait_for(
        rx: &mut watch::Receiver<TelemetryState>,
        predicate: impl FnMut(&TelemetryState) -> bool,
    ) -> TelemetryState {
        tokio::time::timeout(WAIT, rx.wait_for(predicate))
            .await
            .expect("state never matched")
            .expect("controller stopped")
            .clone()
    }

    fn sample(latitude: f64, longitude: f64, speed: Option<f64>) -> PositionEvent {
        PositionEvent::Sample(PositionSample {
            latitude,
            longitude,
            speed,
            timestamp: None,
        })
    }

    #[derive(Debug)]
    struct CountingTimeSource(AtomicUsize);

    impl TimeSource for CountingTimeSource {
        fn now(&self) -> ClockReading {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            #[allow(clippy::cast_possible_truncation)]
            let second = (n % 60) as u8;
            ClockReading::from_time(0, 0, second)
        }
    }

    #[tokio::test]
    async fn test_unavailable_capability_defaults() {
        let handle = controller(
            &Config::default(),
            Arc::new(NoPositionProvider),
            Arc::new(EchoGeocoder::default()),
        )
        .mount();

        let state = handle.snapshot();
        assert_eq!(state.speed.as_str(), "0");
        assert!(state.coordinates.is_none());
        assert!(state.place_name.is_empty());
        assert_eq!(state.clock, ClockReading::from_time(12, 0, 0));

        handle.unmount().await.unwrap();
    }

    #[tokio::test]
    async fn test_sample_updates_speed_coordinates_and_place() {
        let (provider, feed) = ScriptedProvider::new();
        let handle = controller(&Config::default(), provider.clone(), Arc::new(EchoGeocoder::default())).mount();
        let mut rx = handle.subscribe();

        feed.send(sample(35.0, 139.0, Some(10.0))).await.unwrap();
        let state = wait_for(&mut rx, |s| !s.place_name.is_empty()).await;

        assert_eq!(state.speed.as_str(), "36.0");
        assert_eq!(state.coordinates, Some(Coordinates::new(35.0, 139.0)));
        assert_eq!(state.place_name.as_str(), "35県 139市");
        assert_eq!(provider.watches.load(Ordering::SeqCst), 1);

        handle.unmount().await.unwrap();
    }

    #[tokio::test]
    async fn test_sample_without_speed_shows_zero() {
        let (provider, feed) = ScriptedProvider::new();
        let handle = controller(&Config::default(), provider, Arc::new(EchoGeocoder::default())).mount();
        let mut rx = handle.subscribe();

        feed.send(sample(35.0, 139.0, Some(10.0))).await.unwrap();
        wait_for(&mut rx, |s| s.speed.as_str() == "36.0").await;

        feed.send(sample(35.1, 139.0, None)).await.unwrap();
        let state = wait_for(&mut rx, |s| s.coordinates == Some(Coordinates::new(35.1, 139.0))).await;
        assert_eq!(state.speed.as_str(), "0");

        feed.send(sample(35.2, 139.0, Some(f64::NAN))).await.unwrap();
        let state = wait_for(&mut rx, |s| s.coordinates == Some(Coordinates::new(35.2, 139.0))).await;
        assert_eq!(state.speed.as_str(), "0");

        handle.unmount().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_clears_coordinates_and_place() {
        let (provider, feed) = ScriptedProvider::new();
        let handle = controller(&Config::default(), provider, Arc::new(EchoGeocoder::default())).mount();
        let mut rx = handle.subscribe();

        feed.send(sample(35.0, 139.0, Some(10.0))).await.unwrap();
        wait_for(&mut rx, |s| !s.place_name.is_empty()).await;

        feed.send(PositionEvent::Error(PositionError::Timeout)).await.unwrap();
        let state = wait_for(&mut rx, |s| s.coordinates.is_none()).await;
        assert_eq!(state.speed.as_str(), "0");
        assert!(state.place_name.is_empty());

        handle.unmount().await.unwrap();
    }

    #[tokio::test]
    async fn test_lookup_failure_shows_marker() {
        let (provider, feed) = ScriptedProvider::new();
        let handle = controller(&Config::default(), provider, Arc::new(FailingGeocoder)).mount();
        let mut rx = handle.subscribe();

        feed.send(sample(35.0, 139.0, None)).await.unwrap();
        let state = wait_for(&mut rx, |s| !s.place_name.is_empty()).await;
        assert_eq!(state.place_name.as_str(), "取得失敗");

        handle.unmount().await.unwrap();
    }

    #[tokio::test]
    async fn test_unchanged_coordinates_do_not_requery() {
        let (provider, feed) = ScriptedProvider::new();
        let geocoder = Arc::new(EchoGeocoder::default());
        let handle = controller(&Config::default(), provider, geocoder.clone()).mount();
        let mut rx = handle.subscribe();

        feed.send(sample(35.0, 139.0, Some(1.0))).await.unwrap();
        feed.send(sample(35.0, 139.0, Some(2.0))).await.unwrap();
        wait_for(&mut rx, |s| s.speed.as_str() == "7.2" && !s.place_name.is_empty()).await;

        feed.send(sample(36.0, 139.0, Some(2.0))).await.unwrap();
        wait_for(&mut rx, |s| s.place_name.as_str() == "36県 139市").await;

        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 2);
        handle.unmount().await.unwrap();
    }

    /// Fails the first `failures` lookups, then behaves like [`EchoGeocoder`].
    #[derive(Debug)]
    struct FlakyGeocoder {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReverseGeocoder for FlakyGeocoder {
        async fn reverse(
            &self,
            coordinates: Coordinates,
        ) -> std::result::Result<Option<String>, GeocodeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(GeocodeError::Status(503));
            }
            EchoGeocoder::default().reverse(coordinates).await
        }
    }

    #[tokio::test]
    async fn test_failed_lookup_is_retried_on_same_fix() {
        let (provider, feed) = ScriptedProvider::new();
        let geocoder = Arc::new(FlakyGeocoder {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let handle = controller(&Config::default(), provider, geocoder.clone()).mount();
        let mut rx = handle.subscribe();

        feed.send(sample(35.0, 139.0, Some(1.0))).await.unwrap();
        wait_for(&mut rx, |s| s.place_name.as_str() == "取得失敗").await;

        feed.send(sample(35.0, 139.0, Some(2.0))).await.unwrap();
        wait_for(&mut rx, |s| s.place_name.as_str() == "35県 139市").await;

        // Resolved now, so a further identical fix does not look up again.
        feed.send(sample(35.0, 139.0, Some(3.0))).await.unwrap();
        wait_for(&mut rx, |s| s.speed.as_str() == "10.8").await;
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 2);

        handle.unmount().await.unwrap();
    }

    #[tokio::test]
    async fn test_last_completed_lookup_wins_by_default() {
        let (provider, feed) = ScriptedProvider::new();
        let (geocoder, mut started) = GatedGeocoder::new();
        let first = geocoder.gate(1.0);
        let second = geocoder.gate(2.0);
        let handle = controller(&Config::default(), provider, geocoder).mount();
        let mut rx = handle.subscribe();

        feed.send(sample(1.0, 0.0, None)).await.unwrap();
        assert_eq!(started.recv().await, Some(1.0));
        feed.send(sample(2.0, 0.0, None)).await.unwrap();
        assert_eq!(started.recv().await, Some(2.0));

        second.send("a, b, c, d, e, 大阪府, 大阪市".to_string()).unwrap();
        wait_for(&mut rx, |s| s.place_name.as_str() == "大阪府 大阪市").await;

        // The older request finishes last and overwrites the newer answer.
        first.send("a, b, c, d, e, 東京都, 府中市".to_string()).unwrap();
        let state = wait_for(&mut rx, |s| s.place_name.as_str() == "東京都 府中市").await;
        assert_eq!(state.coordinates, Some(Coordinates::new(2.0, 0.0)));

        handle.unmount().await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_stale_keeps_latest_request() {
        let mut config = Config::default();
        config.geocode.discard_stale = true;

        let (provider, feed) = ScriptedProvider::new();
        let (geocoder, mut started) = GatedGeocoder::new();
        let first = geocoder.gate(1.0);
        let second = geocoder.gate(2.0);
        let handle = controller(&config, provider, geocoder).mount();
        let mut rx = handle.subscribe();

        feed.send(sample(1.0, 0.0, None)).await.unwrap();
        assert_eq!(started.recv().await, Some(1.0));
        feed.send(sample(2.0, 0.0, None)).await.unwrap();
        assert_eq!(started.recv().await, Some(2.0));

        second.send("a, b, c, d, e, 大阪府, 大阪市".to_string()).unwrap();
        wait_for(&mut rx, |s| s.place_name.as_str() == "大阪府 大阪市").await;

        first.send("a, b, c, d, e, 東京都, 府中市".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.snapshot().place_name.as_str(), "大阪府 大阪市");

        handle.unmount().await.unwrap();
    }

    #[tokio::test]
    async fn test_late_lookup_after_clear_is_dropped() {
        let (provider, feed) = ScriptedProvider::new();
        let (geocoder, mut started) = GatedGeocoder::new();
        let gate = geocoder.gate(1.0);
        let handle = controller(&Config::default(), provider, geocoder).mount();
        let mut rx = handle.subscribe();

        feed.send(sample(1.0, 0.0, None)).await.unwrap();
        assert_eq!(started.recv().await, Some(1.0));

        feed.send(PositionEvent::Error(PositionError::PermissionDenied)).await.unwrap();
        wait_for(&mut rx, |s| s.coordinates.is_none()).await;

        gate.send("a, b, c, d, e, 東京都, 府中市".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.snapshot().place_name.is_empty());

        handle.unmount().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_updates_once_per_second_until_unmount() {
        let time_source = Arc::new(CountingTimeSource(AtomicUsize::new(0)));
        let handle = TelemetryController::new(
            &Config::default(),
            Arc::new(NoPositionProvider),
            resolver(Arc::new(EchoGeocoder::default())),
        )
        .with_time_source(time_source.clone())
        .mount();
        let mut rx = handle.subscribe();

        // One reading at mount, then one per elapsed second.
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(time_source.0.load(Ordering::SeqCst), 4);
        assert_eq!(rx.borrow_and_update().clock, ClockReading::from_time(0, 0, 3));

        let last = handle.unmount().await.unwrap();
        assert_eq!(last.clock, ClockReading::from_time(0, 0, 3));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(time_source.0.load(Ordering::SeqCst), 4);
        assert!(rx.changed().await.is_err());
    }

    #[tokio::test]
    async fn test_unmount_closes_subscription() {
        let (provider, feed) = ScriptedProvider::new();
        let handle = controller(&Config::default(), provider, Arc::new(EchoGeocoder::default())).mount();

        handle.unmount().await.unwrap();
        tokio::time::timeout(WAIT, feed.closed())
            .await
            .expect("subscription was not closed");
        assert!(feed.send(sample(1.0, 1.0, None)).await.is_err());
    }

    #[tokio::test]
    async fn test_dropping_handle_tears_down() {
        let (provider, feed) = ScriptedProvider::new();
        let handle = controller(&Config::default(), provider, Arc::new(EchoGeocoder::default())).mount();
        let mut rx = handle.subscribe();

        drop(handle);
        tokio::time::timeout(WAIT, feed.closed())
            .await
            .expect("subscription was not closed");
        rx.borrow_and_update();
        assert!(rx.changed().await.is_err());
    }

    #[test]
    fn test_from_config_builds_default_sources() {
        let controller = TelemetryController::from_config(&Config::default()).unwrap();
        assert_eq!(controller.provider.name(), "gpsd");
        assert_eq!(controller.clock_interval, Duration::from_secs(1));
        assert!(!controller.discard_stale);
    }
}
