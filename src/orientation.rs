//! Compass calibration of the local frame's root yaw.
//!
//! Every heading sample yields `value = camera_yaw - true_heading`, the yaw
//! the root needs for its +z axis to point at true north. Early samples are
//! applied as snaps; later ones are averaged in batches of `average_count` and
//! applied as smoothed targets that the per-tick update approaches
//! exponentially.

use crate::config::OrientationOptions;
use crate::events::{Channel, SubscriberId};
use crate::frame::SharedFrame;
use crate::provider::{HeadingUpdate, SharedProvider};
use crate::types::{approach_weight, delta_angle, lerp_angle, normalize_angle_180, HeadingReading, ANGLE_EPSILON_DEG};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Below this, a sample carries no correction.
const VALUE_EPSILON_DEG: f64 = 1e-7;
/// Manual offsets smaller than this count as "not configured".
const OFFSET_EPSILON_DEG: f64 = 1e-6;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrientationState {
    pub target_yaw: f64,
    /// Yaw samples awaiting averaging
    pub samples: Vec<f64>,
    pub update_count: u32,
    pub first_average_done: bool,
    pub transitioning: bool,
}

pub type SharedCalibrator = Rc<RefCell<OrientationCalibrator>>;

pub struct OrientationCalibrator {
    options: OrientationOptions,
    frame: SharedFrame,
    state: OrientationState,
    compass_enabled: bool,
    subscription: Option<SubscriberId>,

    /// Target yaw, emitted just before it is applied
    pub before_update: Channel<f64>,
    /// Emitted after a snap, with the new root yaw
    pub updated: Channel<f64>,
    /// Emitted once when a smoothed transition reaches its target
    pub settled: Channel<f64>,
}

impl OrientationCalibrator {
    pub fn new(options: OrientationOptions, frame: SharedFrame, compass_enabled: bool) -> Self {
        let target_yaw = frame.borrow().camera_yaw_deg;
        OrientationCalibrator {
            options,
            frame,
            state: OrientationState {
                target_yaw,
                ..Default::default()
            },
            compass_enabled,
            subscription: None,
            before_update: Channel::new("before_orientation_update"),
            updated: Channel::new("orientation_updated"),
            settled: Channel::new("orientation_settled"),
        }
    }

    /// Build a calibrator and subscribe it to the provider's compass channel.
    ///
    /// A positive `low_pass_filter_factor` is pushed down to the provider's compass filter.
    pub fn attach(provider: &SharedProvider, frame: SharedFrame, options: OrientationOptions) -> SharedCalibrator {
        let mut p = provider.borrow_mut();
        if options.low_pass_filter_factor > 0.0 {
            p.set_compass_low_pass_factor(options.low_pass_filter_factor);
        }

        let calibrator = Rc::new(RefCell::new(Self::new(options, frame, p.is_compass_enabled())));
        let weak: Weak<RefCell<OrientationCalibrator>> = Rc::downgrade(&calibrator);
        let id = p.compass_updated.subscribe(move |update: &HeadingUpdate| {
            if let Some(c) = weak.upgrade() {
                c.borrow_mut().on_heading(&update.current);
            }
        });
        calibrator.borrow_mut().subscription = Some(id);
        calibrator
    }

    pub fn detach(&mut self, provider: &SharedProvider) {
        if let Some(id) = self.subscription.take() {
            provider.borrow_mut().compass_updated.unsubscribe(id);
        }
    }

    pub fn options(&self) -> &OrientationOptions {
        &self.options
    }

    pub fn state(&self) -> &OrientationState {
        &self.state
    }

    pub fn is_settled(&self) -> bool {
        !self.state.transitioning
    }

    fn cap_reached(&self) -> bool {
        self.options.max_number_of_updates > 0
            && self.state.update_count >= self.options.max_number_of_updates
    }

    /// Consume one compass sample.
    pub fn on_heading(&mut self, heading: &HeadingReading) {
        if self.frame.borrow().waiting_for_tracking {
            return;
        }
        if !heading.is_magnetic_heading_available {
            log::warn!("[orientation] magnetic heading not available");
            return;
        }
        if self.cap_reached() {
            return;
        }

        let true_heading = if self.options.true_north_offset.abs() > OFFSET_EPSILON_DEG {
            heading.magnetic_heading + self.options.true_north_offset
        } else {
            heading.heading
        };

        let camera_yaw = self.frame.borrow().camera_yaw_deg;
        let value = normalize_angle_180(camera_yaw - true_heading);
        if value.abs() < VALUE_EPSILON_DEG {
            return;
        }

        if self.options.average_count <= 1 {
            if self.state.update_count == 0 {
                self.snap(value);
            } else {
                self.set_smoothed_target(value);
            }
            return;
        }

        self.state.samples.push(value);

        if self.state.samples.len() >= self.options.average_count {
            let average = self.state.samples.iter().sum::<f64>() / self.state.samples.len() as f64;
            self.state.samples.clear();
            self.state.first_average_done = true;
            log::debug!("[orientation] averaged yaw {:.2}", average);
            self.set_smoothed_target(average);
            return;
        }

        let first_ever = self.state.update_count == 0 && self.state.samples.len() == 1;
        let raw_phase = self.options.use_raw_until_first_average && !self.state.first_average_done;
        if first_ever || raw_phase {
            self.snap(value);
        }
    }

    fn snap(&mut self, yaw: f64) {
        self.state.target_yaw = yaw;
        self.before_update.emit(&yaw);
        self.frame.borrow_mut().root_yaw_deg = yaw;
        self.state.update_count += 1;
        log::info!("[orientation] root yaw set to {:.2}", yaw);
        self.updated.emit(&yaw);
    }

    fn set_smoothed_target(&mut self, yaw: f64) {
        if self.cap_reached() {
            return;
        }
        self.state.target_yaw = yaw;
        self.before_update.emit(&yaw);
        self.state.transitioning = true;
        self.state.update_count += 1;
    }

    /// Advance the root yaw toward the target.
    pub fn tick(&mut self, dt: f64) {
        if !self.compass_enabled {
            return;
        }

        let current = self.frame.borrow().root_yaw_deg;
        let target = self.state.target_yaw;

        if delta_angle(current, target).abs() <= ANGLE_EPSILON_DEG {
            self.frame.borrow_mut().root_yaw_deg = target;
            if self.state.transitioning {
                self.state.transitioning = false;
                log::info!("[orientation] settled at {:.2}", target);
                self.settled.emit(&target);
            }
            return;
        }

        let t = approach_weight(self.options.movement_smoothing_factor, dt);
        self.frame.borrow_mut().root_yaw_deg = normalize_angle_180(lerp_angle(current, target, t));
    }

    /// Drop all samples and counters; the target re-aligns with the camera.
    pub fn restart(&mut self) {
        log::info!("[orientation] restart");
        self.state = OrientationState {
            target_yaw: self.frame.borrow().camera_yaw_deg,
            ..Default::default()
        };
    }
}
