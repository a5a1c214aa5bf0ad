//! Location/heading provider.
//!
//! Wraps a [`PlatformSource`] and turns its readings into gated, fan-out
//! events. Two location channels exist: `raw_location_updated` sees every new
//! reading and is never muted; `location_updated` only sees readings that pass
//! the update policy (time, distance, accuracy, pause) and is silenced while
//! the provider is muted. Start-up failures go out on `failed`, never through
//! the update channels.

pub mod mock;
pub mod sensors;

use crate::config::LocationProviderOptions;
use crate::events::Channel;
use crate::geo_math;
use crate::smoothing::AngleLowPassFilter;
use crate::types::{HeadingReading, LocationReading};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tokio::time::{sleep, Duration};

pub use mock::{MockFeed, MockSource};
pub use sensors::{ChannelSource, SensorSample};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderStatus {
    Idle,
    Initializing,
    Started,
    Failed,
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderStatus::Idle => "Idle",
            ProviderStatus::Initializing => "Initializing",
            ProviderStatus::Started => "Started",
            ProviderStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Platform-specific location/compass backend
pub trait PlatformSource {
    fn name(&self) -> &str;

    fn is_compass_enabled(&self) -> bool;

    /// Ask the platform to begin delivering location and compass updates.
    fn request_updates(&mut self, options: &LocationProviderOptions);

    /// Current state of the update request.
    fn poll_status(&mut self) -> ProviderStatus;

    /// Latest known location, if any. Repeating the same reading is fine; the
    /// provider drops readings whose timestamp has not changed.
    fn read_location(&mut self) -> Option<LocationReading>;

    fn read_heading(&mut self) -> Option<HeadingReading>;
}

/// Payload of the location channels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocationUpdate {
    pub current: LocationReading,
    pub last: LocationReading,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeadingUpdate {
    pub current: HeadingReading,
    pub last: HeadingReading,
}

#[derive(Clone, Debug, Default)]
pub struct ProviderState {
    pub is_enabled: bool,
    pub first_reading: bool,
    pub paused: bool,
    /// Readings accepted by the update policy since the last restart
    pub update_count: u32,
    pub first_location: LocationReading,
    pub current_location: LocationReading,
    pub last_location: LocationReading,
    pub current_location_raw: LocationReading,
    pub last_location_raw: LocationReading,
    pub current_heading: HeadingReading,
    pub last_heading: HeadingReading,
    /// Epoch milliseconds at which start-up completed
    pub start_time: Option<i64>,
}

pub type SharedProvider = Rc<RefCell<LocationProvider>>;

pub struct LocationProvider {
    source: Box<dyn PlatformSource>,
    options: LocationProviderOptions,
    status: ProviderStatus,
    state: ProviderState,
    mute: bool,
    /// Emissions on `location_updated`; drives the max-updates auto-pause
    measurement_count: u32,
    compass_filter: AngleLowPassFilter,

    pub location_updated: Channel<LocationUpdate>,
    pub raw_location_updated: Channel<LocationUpdate>,
    pub compass_updated: Channel<HeadingUpdate>,
    pub enabled: Channel<LocationReading>,
    pub failed: Channel<String>,
    pub restarted: Channel<()>,
}

impl LocationProvider {
    pub fn new(source: Box<dyn PlatformSource>, options: LocationProviderOptions) -> Self {
        let compass_filter = AngleLowPassFilter::new(options.compass_low_pass_factor);
        LocationProvider {
            source,
            options,
            status: ProviderStatus::Idle,
            state: ProviderState {
                first_reading: true,
                ..Default::default()
            },
            mute: false,
            measurement_count: 0,
            compass_filter,
            location_updated: Channel::new("location_updated"),
            raw_location_updated: Channel::new("raw_location_updated"),
            compass_updated: Channel::new("compass_updated"),
            enabled: Channel::new("enabled"),
            failed: Channel::new("failed"),
            restarted: Channel::new("restarted"),
        }
    }

    pub fn shared(source: Box<dyn PlatformSource>, options: LocationProviderOptions) -> SharedProvider {
        Rc::new(RefCell::new(Self::new(source, options)))
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn options(&self) -> &LocationProviderOptions {
        &self.options
    }

    pub fn status(&self) -> ProviderStatus {
        self.status
    }

    pub fn state(&self) -> &ProviderState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled
    }

    pub fn has_started(&self) -> bool {
        self.status == ProviderStatus::Started
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn is_muted(&self) -> bool {
        self.mute
    }

    pub fn is_compass_enabled(&self) -> bool {
        self.source.is_compass_enabled()
    }

    pub fn current_location(&self) -> LocationReading {
        self.state.current_location
    }

    pub fn last_location(&self) -> LocationReading {
        self.state.last_location
    }

    pub fn current_heading(&self) -> HeadingReading {
        self.state.current_heading
    }

    pub fn location_update_count(&self) -> u32 {
        self.state.update_count
    }

    pub fn measurement_count(&self) -> u32 {
        self.measurement_count
    }

    /// Seconds since start-up completed
    pub fn time_since_start(&self) -> Option<f64> {
        self.state
            .start_time
            .map(|t| (Utc::now().timestamp_millis() - t) as f64 / 1000.0)
    }

    pub fn distance_from_start_point(&self) -> f64 {
        geo_math::horizontal_distance(
            &self.state.first_location.position,
            &self.state.current_location.position,
        )
    }

    pub fn reset_start_point(&mut self) {
        self.state.first_location = self.state.current_location;
    }

    pub fn set_compass_low_pass_factor(&mut self, factor: f64) {
        self.compass_filter.set_factor(factor);
    }

    // ===== Start-up =====

    /// Ask the platform source for updates. Follow with [`poll_start`](Self::poll_start).
    pub fn request_updates(&mut self) {
        log::info!("[provider] requesting updates from {}", self.source.name());
        self.source.request_updates(&self.options);
        self.status = self.source.poll_status();
    }

    pub fn poll_start(&mut self) -> ProviderStatus {
        self.status = self.source.poll_status();
        self.status
    }

    /// Conclude start-up after polling has stopped.
    ///
    /// # Returns
    /// The final status; `failed` has been emitted unless it is `Started`.
    pub fn finish_start(&mut self) -> ProviderStatus {
        let message = match self.status {
            ProviderStatus::Started => {
                self.state.first_reading = true;
                self.state.start_time = Some(Utc::now().timestamp_millis());
                log::info!("[provider] {} started", self.source.name());
                return self.status;
            }
            ProviderStatus::Initializing => "Timed out",
            ProviderStatus::Failed => "Failed to initialize location updates.",
            ProviderStatus::Idle => "Unknown error initializing location updates.",
        };

        if self.status == ProviderStatus::Initializing {
            self.status = ProviderStatus::Failed;
        }
        log::warn!("[provider] start failed: {}", message);
        self.failed.emit(&message.to_string());
        self.status
    }

    /// Start without sleeping: polls up to `max_wait_time` times back to back.
    pub fn start_now(&mut self) -> ProviderStatus {
        self.request_updates();
        let mut remaining = self.options.max_wait_time;
        while self.status == ProviderStatus::Initializing && remaining > 0 {
            self.poll_start();
            remaining -= 1;
        }
        self.finish_start()
    }

    // ===== Per-tick update =====

    pub fn update(&mut self) {
        if !self.has_started() {
            return;
        }

        let location = self.source.read_location();
        let heading = self.source.read_heading();
        let (location, heading) = match (location, heading) {
            (Some(l), Some(h)) => (l, h),
            _ => return,
        };
        let heading = self.filter_heading(heading);

        if self.state.first_reading {
            self.state.first_location = location;
            self.state.current_location = location;
            self.state.current_location_raw = location;
            self.state.current_heading = heading;
            self.state.is_enabled = true;
            self.state.first_reading = false;

            log::info!(
                "[provider] enabled at ({:.6}, {:.6}) +/- {:.1} m",
                location.position.latitude,
                location.position.longitude,
                location.accuracy
            );
            self.enabled.emit(&location);
            self.emit_compass_updated();
            self.emit_location_updated();
            self.emit_raw_location_updated();
            return;
        }

        self.update_location(location);
        self.update_heading(heading);
    }

    fn filter_heading(&mut self, mut heading: HeadingReading) -> HeadingReading {
        if self.compass_filter.factor() > 0.0 {
            heading.heading = crate::types::normalize_angle_360(self.compass_filter.apply(heading.heading));
        }
        heading
    }

    fn update_location(&mut self, reading: LocationReading) {
        if reading.timestamp == self.state.current_location_raw.timestamp {
            return;
        }

        self.state.last_location_raw = self.state.current_location_raw;
        self.state.current_location_raw = reading;
        self.emit_raw_location_updated();

        if !self.should_update_location(&reading) {
            return;
        }

        self.state.last_location = self.state.current_location;
        self.state.current_location = reading;
        self.state.update_count += 1;
        self.emit_location_updated();
    }

    fn update_heading(&mut self, reading: HeadingReading) {
        if reading.timestamp == self.state.current_heading.timestamp {
            return;
        }
        self.state.last_heading = self.state.current_heading;
        self.state.current_heading = reading;
        self.emit_compass_updated();
    }

    fn should_update_location(&self, reading: &LocationReading) -> bool {
        if self.state.paused {
            return false;
        }

        let min_interval_ms = (self.options.time_between_updates * 1000.0) as i64;
        if reading.timestamp - self.state.current_location.timestamp < min_interval_ms {
            return false;
        }

        let moved = geo_math::horizontal_distance(
            &reading.position,
            &self.state.current_location.position,
        );
        if moved < self.options.min_distance {
            return false;
        }

        if self.options.accuracy_radius > 0.0 && reading.accuracy > self.options.accuracy_radius {
            log::debug!(
                "[provider] dropping reading with accuracy {:.1} m (limit {:.1} m)",
                reading.accuracy,
                self.options.accuracy_radius
            );
            return false;
        }

        true
    }

    // ===== Emission =====

    fn emit_location_updated(&mut self) {
        if self.mute {
            return;
        }

        self.measurement_count += 1;
        if self.options.max_number_of_updates > 0
            && self.measurement_count >= self.options.max_number_of_updates
        {
            log::debug!(
                "[provider] reached {} updates, pausing",
                self.measurement_count
            );
            self.state.paused = true;
        }

        let update = LocationUpdate {
            current: self.state.current_location,
            last: self.state.last_location,
        };
        self.location_updated.emit(&update);
    }

    fn emit_raw_location_updated(&mut self) {
        let mut update = LocationUpdate {
            current: self.state.current_location_raw,
            last: self.state.last_location_raw,
        };
        update.current.raw = true;
        update.last.raw = true;
        self.raw_location_updated.emit(&update);
    }

    fn emit_compass_updated(&mut self) {
        if self.mute {
            return;
        }
        let update = HeadingUpdate {
            current: self.state.current_heading,
            last: self.state.last_heading,
        };
        self.compass_updated.emit(&update);
    }

    // ===== Control =====

    /// Re-emit the current readings without asking the source for new data.
    pub fn force_location_update(&mut self) {
        self.emit_location_updated();
        self.emit_raw_location_updated();
    }

    pub fn mute(&mut self) {
        log::debug!("[provider] muted");
        self.mute = true;
    }

    /// # Arguments
    /// * `emit` - replay the last reading so subscribers that attached while muted catch up
    pub fn unmute(&mut self, emit: bool) {
        log::debug!("[provider] unmuted");
        self.mute = false;
        if self.state.is_enabled && emit {
            self.force_location_update();
        }
    }

    pub fn pause(&mut self) {
        self.state.paused = true;
    }

    pub fn resume(&mut self) {
        self.state.paused = false;
    }

    /// Forget the first-reading state and counters; the next reading re-enables the provider.
    pub fn restart(&mut self) {
        log::info!("[provider] restarting");
        self.state.update_count = 0;
        self.state.first_reading = true;
        self.state.paused = false;
        self.measurement_count = 0;
        self.compass_filter.reset();
        self.restarted.emit(&());
    }

    // ===== Subscription helpers =====

    /// Subscribe to filtered location updates, replaying the current reading first if enabled.
    ///
    /// # Arguments
    /// * `use_raw_if_enabled` - pair the replayed reading with the last raw reading instead
    ///   of the last filtered one
    pub fn on_location_updated<F>(&mut self, mut handler: F, use_raw_if_enabled: bool) -> crate::events::SubscriberId
    where
        F: FnMut(&LocationUpdate) + 'static,
    {
        if self.state.is_enabled {
            let last = if use_raw_if_enabled {
                self.state.last_location_raw
            } else {
                self.state.last_location
            };
            handler(&LocationUpdate {
                current: self.state.current_location,
                last,
            });
        }
        self.location_updated.subscribe(handler)
    }

    /// Subscribe to the enabled event; runs immediately if already enabled.
    pub fn on_enabled<F>(&mut self, mut handler: F) -> crate::events::SubscriberId
    where
        F: FnMut(&LocationReading) + 'static,
    {
        if self.state.is_enabled {
            handler(&self.state.current_location);
        }
        self.enabled.subscribe(handler)
    }

    pub fn info(&self) -> String {
        format!(
            "{} {{ status = {}, enabled = {}, paused = {}, updates = {}, distance_from_start = {:.1} m }}",
            self.source.name(),
            self.status,
            self.state.is_enabled,
            self.state.paused,
            self.state.update_count,
            self.distance_from_start_point()
        )
    }
}

/// Run the start-up sequence: optional delay, request updates, then poll once a
/// second while the source is initializing, up to `max_wait_time` seconds.
///
/// The provider is only borrowed between suspension points.
pub async fn start(provider: &SharedProvider) -> ProviderStatus {
    let (delay, max_wait) = {
        let p = provider.borrow();
        (p.options.start_delay, p.options.max_wait_time)
    };

    if delay > 0 {
        sleep(Duration::from_secs(delay as u64)).await;
    }

    provider.borrow_mut().request_updates();

    let mut remaining = max_wait;
    while provider.borrow().status() == ProviderStatus::Initializing && remaining > 0 {
        sleep(Duration::from_secs(1)).await;
        remaining -= 1;
        provider.borrow_mut().poll_start();
    }

    provider.borrow_mut().finish_start()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoPoint;
    use std::cell::RefCell;

    fn reading(lat: f64, lon: f64, accuracy: f64, ts: i64) -> LocationReading {
        LocationReading::new(GeoPoint::flat(lat, lon), accuracy, ts)
    }

    fn started_provider(options: LocationProviderOptions) -> (LocationProvider, MockFeed) {
        let (source, feed) = MockSource::new();
        let mut provider = LocationProvider::new(Box::new(source), options);
        assert_eq!(provider.start_now(), ProviderStatus::Started);
        (provider, feed)
    }

    fn counter() -> (Rc<RefCell<Vec<LocationUpdate>>>, impl FnMut(&LocationUpdate) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |u: &LocationUpdate| sink.borrow_mut().push(*u))
    }

    #[test]
    fn test_first_reading_enables_and_emits() {
        let (mut provider, feed) = started_provider(LocationProviderOptions::default());
        let (seen, handler) = counter();
        provider.location_updated.subscribe(handler);
        let enabled = Rc::new(RefCell::new(0));
        let e = enabled.clone();
        provider.enabled.subscribe(move |_| *e.borrow_mut() += 1);

        feed.push_location(reading(10.0, 20.0, 5.0, 1_000));
        feed.push_heading(HeadingReading::new(90.0, 1_000));
        provider.update();

        assert!(provider.is_enabled());
        assert_eq!(*enabled.borrow(), 1);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(provider.measurement_count(), 1);
    }

    #[test]
    fn test_gating_by_time_and_accuracy_but_raw_sees_all() {
        let (mut provider, feed) = started_provider(LocationProviderOptions::default());
        let (filtered, f) = counter();
        let (raw, r) = counter();
        provider.location_updated.subscribe(f);
        provider.raw_location_updated.subscribe(r);
        feed.push_heading(HeadingReading::new(0.0, 0));

        feed.push_location(reading(10.0, 20.0, 5.0, 1_000));
        provider.update();
        // too soon (< 2 s)
        feed.push_location(reading(10.0001, 20.0, 5.0, 2_000));
        provider.update();
        // too inaccurate
        feed.push_location(reading(10.0002, 20.0, 60.0, 4_000));
        provider.update();
        // accepted
        feed.push_location(reading(10.0003, 20.0, 5.0, 6_000));
        provider.update();
        // duplicate timestamp ignored everywhere
        provider.update();

        assert_eq!(filtered.borrow().len(), 2);
        assert_eq!(raw.borrow().len(), 4);
        assert!(raw.borrow().iter().all(|u| u.current.raw));
        assert_eq!(provider.location_update_count(), 1);
    }

    #[test]
    fn test_mute_blocks_filtered_channel_only() {
        let (mut provider, feed) = started_provider(LocationProviderOptions {
            time_between_updates: 0.0,
            ..Default::default()
        });
        let (filtered, f) = counter();
        let (raw, r) = counter();
        provider.location_updated.subscribe(f);
        provider.raw_location_updated.subscribe(r);
        feed.push_heading(HeadingReading::new(0.0, 0));

        provider.mute();
        feed.push_location(reading(1.0, 1.0, 1.0, 100));
        provider.update();
        feed.push_location(reading(1.0001, 1.0, 1.0, 200));
        provider.update();

        assert_eq!(filtered.borrow().len(), 0);
        assert_eq!(raw.borrow().len(), 2);

        provider.unmute(true);
        assert_eq!(filtered.borrow().len(), 1);
        assert_eq!(filtered.borrow()[0].current.timestamp, 200);
    }

    #[test]
    fn test_max_updates_auto_pauses() {
        let (mut provider, feed) = started_provider(LocationProviderOptions {
            time_between_updates: 0.0,
            max_number_of_updates: 2,
            ..Default::default()
        });
        let (filtered, f) = counter();
        provider.location_updated.subscribe(f);
        feed.push_heading(HeadingReading::new(0.0, 0));

        for i in 0..5 {
            feed.push_location(reading(1.0 + i as f64 * 1e-4, 1.0, 1.0, 100 * (i + 1)));
            provider.update();
        }

        assert!(provider.is_paused());
        assert_eq!(filtered.borrow().len(), 2);

        provider.restart();
        assert!(!provider.is_paused());
        assert_eq!(provider.measurement_count(), 0);
    }

    #[test]
    fn test_late_subscriber_gets_replay() {
        let (mut provider, feed) = started_provider(LocationProviderOptions::default());
        feed.push_location(reading(5.0, 5.0, 1.0, 10));
        feed.push_heading(HeadingReading::new(0.0, 10));
        provider.update();

        let (seen, handler) = counter();
        provider.on_location_updated(handler, false);
        assert_eq!(seen.borrow().len(), 1);

        let calls = Rc::new(RefCell::new(0));
        let c = calls.clone();
        provider.on_enabled(move |_| *c.borrow_mut() += 1);
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_start_failure_goes_to_failed_channel() {
        let (source, feed) = MockSource::new();
        feed.set_start_result(ProviderStatus::Failed);
        let mut provider = LocationProvider::new(Box::new(source), LocationProviderOptions::default());
        let (updates, f) = counter();
        provider.location_updated.subscribe(f);
        let messages = Rc::new(RefCell::new(Vec::new()));
        let m = messages.clone();
        provider.failed.subscribe(move |msg: &String| m.borrow_mut().push(msg.clone()));

        assert_eq!(provider.start_now(), ProviderStatus::Failed);
        assert_eq!(*messages.borrow(), vec!["Failed to initialize location updates.".to_string()]);
        assert!(updates.borrow().is_empty());
    }

    #[test]
    fn test_start_times_out() {
        let (source, feed) = MockSource::new();
        feed.set_initializing_polls(u32::MAX);
        let mut provider = LocationProvider::new(
            Box::new(source),
            LocationProviderOptions {
                max_wait_time: 3,
                ..Default::default()
            },
        );
        let messages = Rc::new(RefCell::new(Vec::new()));
        let m = messages.clone();
        provider.failed.subscribe(move |msg: &String| m.borrow_mut().push(msg.clone()));

        provider.start_now();
        assert_eq!(*messages.borrow(), vec!["Timed out".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_start_waits_for_source() {
        let (source, feed) = MockSource::new();
        feed.set_initializing_polls(3);
        let provider = LocationProvider::shared(Box::new(source), LocationProviderOptions::default());

        let status = start(&provider).await;
        assert_eq!(status, ProviderStatus::Started);
        assert!(provider.borrow().has_started());
    }

    #[test]
    fn test_compass_low_pass_smooths_heading() {
        let (mut provider, feed) = started_provider(LocationProviderOptions {
            compass_low_pass_factor: 0.5,
            ..Default::default()
        });
        feed.push_location(reading(1.0, 1.0, 1.0, 1));
        feed.push_heading(HeadingReading::new(0.0, 1));
        provider.update();
        feed.push_heading(HeadingReading::new(90.0, 2));
        provider.update();

        let h = provider.current_heading().heading;
        assert!(h > 0.0 && h < 90.0, "heading = {}", h);
    }
}
