//! Geo-anchored placement of a single object.
//!
//! Each filtered location update recomputes where the object's geographic
//! point lands in the local frame, relative to the camera and the calibrated
//! root yaw. The first placement snaps; later ones animate when smoothing is
//! configured. Ground-relative objects keep their height and let an owned
//! [`GroundHeightEstimator`] drive it instead.
//!
//! Positions are stored root-local, so a later root-yaw correction carries the
//! object with it.

use crate::config::{GroundHeightOptions, PlacementOptions};
use crate::events::{Channel, SubscriberId};
use crate::frame::SharedFrame;
use crate::geo_math;
use crate::ground::{GroundHeightEstimator, GroundPlane};
use crate::provider::{LocationProvider, LocationUpdate, SharedProvider};
use crate::smoothing::{MovingAveragePosition, SmoothMove, SmoothMoveMode};
use crate::types::{horizontal_distance, yaw_rotation, AltitudeMode, GeoPoint, LocalPoint, LocationReading};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Payload of the placement channels
#[derive(Clone, Debug, PartialEq)]
pub struct PlacementEvent {
    pub name: String,
    pub location: GeoPoint,
    pub count: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlacementState {
    pub location: GeoPoint,
    pub location_updated_count: u32,
    pub position_updated_count: u32,
    pub paused: bool,
}

pub type SharedPlacement = Rc<RefCell<PlacementController>>;

pub struct PlacementController {
    name: String,
    options: PlacementOptions,
    frame: SharedFrame,
    state: PlacementState,
    local_position: LocalPoint,
    visible: bool,
    /// Last device reading seen, reused by forced updates
    last_device: Option<LocationReading>,
    smooth_move: Option<SmoothMove>,
    moving_average: Option<MovingAveragePosition>,
    ground: Option<GroundHeightEstimator>,
    location_subscription: Option<SubscriberId>,
    restart_subscription: Option<SubscriberId>,

    pub location_updated: Channel<PlacementEvent>,
    pub position_updated: Channel<PlacementEvent>,
    pub visibility_changed: Channel<bool>,
}

impl PlacementController {
    /// # Arguments
    /// * `accuracy_radius` - provider accuracy limit; caps the moving-average weights
    pub fn new(
        name: &str,
        location: GeoPoint,
        mut options: PlacementOptions,
        ground_options: GroundHeightOptions,
        frame: SharedFrame,
        accuracy_radius: f64,
    ) -> Self {
        if options.show_object_after_this_many_updates == 0 {
            options.hide_object_until_it_is_placed = false;
        }

        let smooth_move = (options.movement_smoothing > 0.0).then(|| {
            let mode = if location.altitude_mode == AltitudeMode::GroundRelative {
                SmoothMoveMode::Horizontal
            } else {
                SmoothMoveMode::Full
            };
            SmoothMove::new(options.movement_smoothing, mode)
        });

        let moving_average = options.use_moving_average.then(|| {
            let a_max = if accuracy_radius > 0.0 {
                accuracy_radius
            } else {
                MovingAveragePosition::DEFAULT_A_MAX
            };
            MovingAveragePosition::new(options.moving_average_window, a_max)
        });

        let ground = (location.altitude_mode == AltitudeMode::GroundRelative).then(|| {
            GroundHeightEstimator::new(
                GroundHeightOptions {
                    altitude: location.altitude,
                    ..ground_options
                },
                frame.clone(),
            )
        });

        log::debug!("[placement] {} initialized at {:?}", name, location);

        PlacementController {
            name: name.to_string(),
            visible: !options.hide_object_until_it_is_placed,
            options,
            frame,
            state: PlacementState {
                location,
                ..Default::default()
            },
            local_position: LocalPoint::zeros(),
            last_device: None,
            smooth_move,
            moving_average,
            ground,
            location_subscription: None,
            restart_subscription: None,
            location_updated: Channel::new("placement_location_updated"),
            position_updated: Channel::new("placement_position_updated"),
            visibility_changed: Channel::new("placement_visibility_changed"),
        }
    }

    /// Build a placement and subscribe it to the provider.
    ///
    /// The placement is updated immediately if the provider is already enabled.
    pub fn attach(
        provider: &SharedProvider,
        frame: SharedFrame,
        name: &str,
        location: GeoPoint,
        options: PlacementOptions,
        ground_options: GroundHeightOptions,
    ) -> SharedPlacement {
        let mut p = provider.borrow_mut();
        let accuracy_radius = p.options().accuracy_radius;
        let placement = Rc::new(RefCell::new(Self::new(
            name,
            location,
            options,
            ground_options,
            frame,
            accuracy_radius,
        )));

        let weak: Weak<RefCell<PlacementController>> = Rc::downgrade(&placement);
        let location_id = p.on_location_updated(
            move |update: &LocationUpdate| {
                if let Some(pl) = weak.upgrade() {
                    pl.borrow_mut().on_location_updated(update);
                }
            },
            true,
        );

        let weak = Rc::downgrade(&placement);
        let restart_id = p.restarted.subscribe(move |_: &()| {
            if let Some(pl) = weak.upgrade() {
                pl.borrow_mut().provider_restarted();
            }
        });

        {
            let mut pl = placement.borrow_mut();
            pl.location_subscription = Some(location_id);
            pl.restart_subscription = Some(restart_id);
        }
        placement
    }

    pub fn detach(&mut self, provider: &SharedProvider) {
        self.detach_from(&mut provider.borrow_mut());
    }

    pub fn detach_from(&mut self, provider: &mut LocationProvider) {
        if let Some(id) = self.location_subscription.take() {
            provider.location_updated.unsubscribe(id);
        }
        if let Some(id) = self.restart_subscription.take() {
            provider.restarted.unsubscribe(id);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &PlacementOptions {
        &self.options
    }

    pub fn state(&self) -> &PlacementState {
        &self.state
    }

    pub fn location(&self) -> GeoPoint {
        self.state.location
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_moving(&self) -> bool {
        self.smooth_move.as_ref().map_or(false, |m| m.is_moving())
    }

    pub fn ground(&self) -> Option<&GroundHeightEstimator> {
        self.ground.as_ref()
    }

    pub fn local_position(&self) -> LocalPoint {
        self.local_position
    }

    pub fn world_position(&self) -> LocalPoint {
        self.frame.borrow().to_world(&self.local_position)
    }

    /// Horizontal distance between the camera and the placed object, scene units
    pub fn scene_distance(&self) -> f64 {
        let camera = self.frame.borrow().camera_position;
        horizontal_distance(&camera, &self.world_position())
    }

    /// Geodetic distance from the last device reading to the object's point
    pub fn gps_distance(&self) -> Option<f64> {
        self.last_device
            .map(|d| geo_math::horizontal_distance(&d.position, &self.state.location))
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.state.paused = paused;
    }

    /// Move the anchor to a new geographic point and re-place it right away.
    pub fn set_location(&mut self, location: GeoPoint) {
        if let Some(ground) = self.ground.as_mut() {
            ground.set_altitude(location.altitude);
        }
        self.state.location = location;
        if let Some(device) = self.last_device {
            self.update_position(&device, true);
        }
    }

    fn on_location_updated(&mut self, update: &LocationUpdate) {
        self.update_position(&update.current, false);
    }

    fn provider_restarted(&mut self) {
        log::debug!("[placement] {} provider restarted", self.name);
        self.state.location_updated_count = 0;
        self.state.position_updated_count = 0;
    }

    /// World position the object should occupy for the given device location.
    fn target_world_position(&self, device: &GeoPoint) -> LocalPoint {
        let location = &self.state.location;
        let device_relative = location.altitude_mode == AltitudeMode::DeviceRelative;
        let ignore_height = location.altitude_mode == AltitudeMode::GroundRelative || device_relative;

        let frame = self.frame.borrow();
        let displacement = geo_math::vector_from_to(device, location, ignore_height);
        let mut world = frame.camera_position + yaw_rotation(frame.root_yaw_deg) * displacement;
        if device_relative {
            world.y = location.altitude;
        }
        world
    }

    /// Recompute the object's position from a device reading.
    ///
    /// # Arguments
    /// * `force` - ignore the per-object update cap
    pub fn update_position(&mut self, device: &LocationReading, force: bool) {
        self.last_device = Some(*device);

        if self.state.paused {
            return;
        }
        if self.options.max_number_of_location_updates > 0
            && self.state.location_updated_count >= self.options.max_number_of_location_updates
            && !force
        {
            return;
        }

        let world = self.target_world_position(&device.position);
        let mut target = self.frame.borrow().to_local(&world);
        if let Some(avg) = self.moving_average.as_mut() {
            target = avg.add_entry(target, device.accuracy);
        }
        if self.ground.is_some() {
            target.y = self.local_position.y;
        }

        let animate = self.state.position_updated_count > 0 && self.smooth_move.is_some();
        if animate {
            if let Some(mv) = self.smooth_move.as_mut() {
                mv.move_to(target);
            }
        } else {
            self.local_position = target;
            self.position_updated();
        }

        self.state.location_updated_count += 1;
        let event = self.event(self.state.location_updated_count);
        self.location_updated.emit(&event);
    }

    fn position_updated(&mut self) {
        if self.options.hide_object_until_it_is_placed
            && !self.visible
            && self.state.position_updated_count + 1 == self.options.show_object_after_this_many_updates
        {
            self.visible = true;
            log::debug!("[placement] {} revealed", self.name);
            self.visibility_changed.emit(&true);
        }

        self.state.position_updated_count += 1;
        let event = self.event(self.state.position_updated_count);
        self.position_updated.emit(&event);
    }

    fn event(&self, count: u32) -> PlacementEvent {
        PlacementEvent {
            name: self.name.clone(),
            location: self.state.location,
            count,
        }
    }

    /// Advance the smooth move and the ground height.
    pub fn tick(&mut self, dt: f64) {
        if let Some(mv) = self.smooth_move.as_mut() {
            let step = mv.step(self.local_position, dt);
            self.local_position = step.position;
            if step.arrived {
                self.position_updated();
            }
        }

        if let Some(ground) = self.ground.as_mut() {
            ground.tick(&mut self.local_position.y, dt);
        }
    }

    /// Forward plane changes to the owned ground estimator, if any.
    pub fn on_planes_changed(&mut self, planes: &[GroundPlane]) {
        let world = self.world_position();
        if let Some(ground) = self.ground.as_mut() {
            ground.on_planes_changed(planes, &world, &mut self.local_position.y);
        }
    }

    /// Reset counters, filters and position, then re-place from `current` if given.
    pub fn restart(&mut self, current: Option<&LocationReading>) {
        log::info!("[placement] {} restarting", self.name);
        self.state = PlacementState {
            location: self.state.location,
            ..Default::default()
        };
        self.local_position = LocalPoint::zeros();
        if self.options.hide_object_until_it_is_placed && self.visible {
            self.visible = false;
            self.visibility_changed.emit(&false);
        }
        if let Some(mv) = self.smooth_move.as_mut() {
            mv.cancel();
        }
        if let Some(avg) = self.moving_average.as_mut() {
            avg.reset();
        }
        if let Some(ground) = self.ground.as_mut() {
            ground.restart();
        }
        if let Some(reading) = current {
            self.update_position(reading, false);
        }
    }
}
