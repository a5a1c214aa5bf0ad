//! Channel-fed platform source and the async producer loops that feed it.
//!
//! Producers run as tokio tasks and push [`SensorSample`]s with `try_send`;
//! the tick loop drains them through [`ChannelSource`]. On a Termux device the
//! location loop reads real fixes from `termux-location`; everywhere else it
//! falls back to walking a scripted path.

use super::{PlatformSource, ProviderStatus};
use crate::config::LocationProviderOptions;
use crate::geo_math;
use crate::types::{GeoPoint, HeadingReading, LocationReading};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::process::Command;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::{interval, Duration, Instant};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SensorSample {
    Location(LocationReading),
    Heading(HeadingReading),
}

/// Platform source backed by a tokio mpsc channel
pub struct ChannelSource {
    rx: Receiver<SensorSample>,
    status: ProviderStatus,
    latest_location: Option<LocationReading>,
    latest_heading: Option<HeadingReading>,
    received: u64,
}

impl ChannelSource {
    pub fn new(rx: Receiver<SensorSample>) -> Self {
        ChannelSource {
            rx,
            status: ProviderStatus::Idle,
            latest_location: None,
            latest_heading: None,
            received: 0,
        }
    }

    /// Pull everything currently queued, keeping the newest of each kind.
    ///
    /// # Returns
    /// False once every sender has been dropped.
    fn drain(&mut self) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(SensorSample::Location(l)) => {
                    self.latest_location = Some(l);
                    self.received += 1;
                }
                Ok(SensorSample::Heading(h)) => {
                    self.latest_heading = Some(h);
                    self.received += 1;
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    pub fn samples_received(&self) -> u64 {
        self.received
    }
}

impl PlatformSource for ChannelSource {
    fn name(&self) -> &str {
        "ChannelSource"
    }

    fn is_compass_enabled(&self) -> bool {
        true
    }

    fn request_updates(&mut self, _options: &LocationProviderOptions) {
        if self.status == ProviderStatus::Idle {
            self.status = ProviderStatus::Initializing;
        }
    }

    /// Started once the first sample arrives; Failed if the producers hang up first.
    fn poll_status(&mut self) -> ProviderStatus {
        if self.status == ProviderStatus::Initializing {
            let open = self.drain();
            if self.received > 0 {
                self.status = ProviderStatus::Started;
            } else if !open {
                self.status = ProviderStatus::Failed;
            }
        }
        self.status
    }

    fn read_location(&mut self) -> Option<LocationReading> {
        if !self.drain() && self.latest_location.is_none() {
            log::warn!("[sensors] location channel closed before first fix");
        }
        self.latest_location
    }

    fn read_heading(&mut self) -> Option<HeadingReading> {
        self.drain();
        self.latest_heading
    }
}

/// Constant-speed walk along a polyline of geographic points.
#[derive(Clone, Debug)]
pub struct WalkPath {
    points: Vec<GeoPoint>,
    /// Cumulative distance at each point (metres)
    cumulative: Vec<f64>,
    pub speed_mps: f64,
}

impl WalkPath {
    pub fn new(points: Vec<GeoPoint>, speed_mps: f64) -> Self {
        let mut cumulative = Vec::with_capacity(points.len());
        let mut total = 0.0;
        for (i, p) in points.iter().enumerate() {
            if i > 0 {
                total += geo_math::geodesic_distance(&points[i - 1], p);
            }
            cumulative.push(total);
        }
        WalkPath {
            points,
            cumulative,
            speed_mps,
        }
    }

    pub fn total_length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.speed_mps > 0.0 {
            self.total_length() / self.speed_mps
        } else {
            0.0
        }
    }

    /// Position and walking bearing after `t` seconds; clamps at the last point.
    pub fn pose_at(&self, t: f64) -> Option<(GeoPoint, f64)> {
        let first = *self.points.first()?;
        if self.points.len() == 1 {
            return Some((first, 0.0));
        }

        let travelled = (t.max(0.0) * self.speed_mps).min(self.total_length());
        let seg = self
            .cumulative
            .windows(2)
            .position(|w| travelled <= w[1])
            .unwrap_or(self.points.len() - 2);

        let a = &self.points[seg];
        let b = &self.points[seg + 1];
        let heading = geo_math::bearing(a, b);
        let along = travelled - self.cumulative[seg];
        Some((geo_math::destination(a, heading, along), heading))
    }
}

/// Emit location fixes at a fixed rate until the receiver goes away.
///
/// # Arguments
/// * `walk` - path used whenever no real fix is available
/// * `use_termux` - try `termux-location` before falling back to the walk
pub async fn location_loop(tx: Sender<SensorSample>, walk: WalkPath, period: Duration, use_termux: bool) {
    let mut ticker = interval(period);
    let started = Instant::now();
    let mut fix_count = 0u64;

    loop {
        ticker.tick().await;

        let fix = match use_termux.then(read_termux_location).flatten() {
            Some(reading) => reading,
            None => match simulated_fix(&walk, started.elapsed().as_secs_f64(), fix_count) {
                Some(reading) => reading,
                None => continue,
            },
        };

        match tx.try_send(SensorSample::Location(fix)) {
            Ok(_) => {
                fix_count += 1;
                log::debug!("[sensors] {} fixes", fix_count);
            }
            Err(TrySendError::Closed(_)) => {
                log::info!("[sensors] location channel closed after {} fixes", fix_count);
                break;
            }
            Err(TrySendError::Full(_)) => {
                // Channel full, drop this fix
            }
        }
    }
}

/// Emit compass readings that follow the walking direction, with a small wobble.
pub async fn heading_loop(tx: Sender<SensorSample>, walk: WalkPath, period: Duration) {
    let mut ticker = interval(period);
    let started = Instant::now();
    let mut sample_count = 0u64;

    loop {
        ticker.tick().await;

        let t = started.elapsed().as_secs_f64();
        let Some((_, bearing)) = walk.pose_at(t) else {
            continue;
        };
        let wobble = (t * 1.7).sin() * 2.0;
        let heading = crate::types::normalize_angle_360(bearing + wobble);
        let reading = HeadingReading {
            heading,
            magnetic_heading: heading,
            accuracy: 5.0,
            timestamp: Utc::now().timestamp_millis(),
            is_magnetic_heading_available: true,
        };

        match tx.try_send(SensorSample::Heading(reading)) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 100 == 0 {
                    log::debug!("[sensors] {} heading samples", sample_count);
                }
            }
            Err(TrySendError::Closed(_)) => {
                log::info!("[sensors] heading channel closed after {} samples", sample_count);
                break;
            }
            Err(TrySendError::Full(_)) => {}
        }
    }
}

/// Walk position with a deterministic accuracy wobble (3-7 m).
fn simulated_fix(walk: &WalkPath, t: f64, seq: u64) -> Option<LocationReading> {
    let (position, _) = walk.pose_at(t)?;
    let accuracy = 5.0 + (seq as f64 * 0.7).sin() * 2.0;
    Some(LocationReading::new(
        position,
        accuracy,
        Utc::now().timestamp_millis(),
    ))
}

#[derive(Debug, Deserialize)]
struct TermuxLocation {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    altitude: f64,
    #[serde(default)]
    accuracy: f64,
}

fn read_termux_location() -> Option<LocationReading> {
    // termux-location -p gps -r last
    match Command::new("termux-location")
        .arg("-p")
        .arg("gps")
        .arg("-r")
        .arg("last")
        .output()
    {
        Ok(output) => parse_termux_location(&String::from_utf8_lossy(&output.stdout)),
        Err(_) => None,
    }
}

fn parse_termux_location(output: &str) -> Option<LocationReading> {
    let raw: TermuxLocation = serde_json::from_str(output.trim()).ok()?;
    let position = GeoPoint::new(
        raw.latitude,
        raw.longitude,
        raw.altitude,
        crate::types::AltitudeMode::Absolute,
    );
    Some(LocationReading::new(
        position,
        raw.accuracy,
        Utc::now().timestamp_millis(),
    ))
}
