//! Ground-height tracking for a single object.
//!
//! Plane candidates come from the host's plane detector. A candidate is kept
//! when it is horizontal, sits a plausible distance below the camera, and is
//! horizontally closer to the tracked object than the plane accepted before
//! it. The tracked object's height then follows the accepted plane.

use crate::config::GroundHeightOptions;
use crate::frame::SharedFrame;
use crate::types::{approach_weight, horizontal_distance, LocalPoint};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaneAlignment {
    HorizontalUp,
    HorizontalDown,
    Vertical,
    NotAxisAligned,
}

impl PlaneAlignment {
    pub fn is_horizontal(&self) -> bool {
        matches!(self, PlaneAlignment::HorizontalUp | PlaneAlignment::HorizontalDown)
    }
}

/// A detected plane, with its centre in world coordinates
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundPlane {
    pub center: LocalPoint,
    pub alignment: PlaneAlignment,
}

impl GroundPlane {
    pub fn horizontal(center: LocalPoint) -> Self {
        GroundPlane {
            center,
            alignment: PlaneAlignment::HorizontalUp,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroundState {
    pub current_ground_y: f64,
    /// Horizontal distance to the accepted plane; `None` until one is accepted
    pub nearest_plane_distance: Option<f64>,
    pub nearest_plane_center: Option<LocalPoint>,
    pub needs_update: bool,
}

pub struct GroundHeightEstimator {
    options: GroundHeightOptions,
    frame: SharedFrame,
    state: GroundState,
}

impl GroundHeightEstimator {
    pub fn new(options: GroundHeightOptions, frame: SharedFrame) -> Self {
        let state = GroundState {
            current_ground_y: -options.initial_ground_height_guess,
            nearest_plane_distance: None,
            nearest_plane_center: None,
            needs_update: true,
        };
        GroundHeightEstimator {
            options,
            frame,
            state,
        }
    }

    pub fn options(&self) -> &GroundHeightOptions {
        &self.options
    }

    pub fn state(&self) -> &GroundState {
        &self.state
    }

    pub fn current_ground_y(&self) -> f64 {
        self.state.current_ground_y
    }

    /// Height the tracked object should end up at
    pub fn target_y(&self) -> f64 {
        self.state.current_ground_y + self.options.altitude
    }

    pub fn set_altitude(&mut self, altitude: f64) {
        if (self.options.altitude - altitude).abs() > f64::EPSILON {
            self.options.altitude = altitude;
            self.state.needs_update = true;
        }
    }

    fn is_valid_height_for_ground(&self, plane_y: f64) -> bool {
        let diff = self.frame.borrow().camera_position.y - plane_y;
        diff >= self.options.min_ground_height && diff <= self.options.max_ground_height
    }

    /// Offer one plane candidate.
    ///
    /// # Arguments
    /// * `plane` - candidate plane, world coordinates
    /// * `tracked` - world position of the tracked object
    ///
    /// # Returns
    /// True if the candidate became the reference plane.
    pub fn process_plane(&mut self, plane: &GroundPlane, tracked: &LocalPoint) -> bool {
        if !plane.alignment.is_horizontal() {
            return false;
        }
        if !self.is_valid_height_for_ground(plane.center.y) {
            return false;
        }

        let distance = horizontal_distance(tracked, &plane.center);
        if let Some(current) = self.state.nearest_plane_distance {
            if distance >= current {
                return false;
            }
        }

        log::debug!(
            "[ground] accepted plane at y = {:.3} ({:.2} m away)",
            plane.center.y,
            distance
        );
        self.state.nearest_plane_distance = Some(distance);
        self.state.current_ground_y = plane.center.y;
        self.state.nearest_plane_center = Some(plane.center);
        self.state.needs_update = true;
        true
    }

    /// Offer a batch of added/updated planes, then apply the result.
    ///
    /// # Returns
    /// Number of planes accepted from the batch.
    pub fn on_planes_changed(&mut self, planes: &[GroundPlane], tracked: &LocalPoint, object_y: &mut f64) -> usize {
        if planes.is_empty() {
            return 0;
        }
        let accepted = planes
            .iter()
            .filter(|p| self.process_plane(p, tracked))
            .count();
        self.update_object_height(object_y, false);
        accepted
    }

    /// Apply a pending change immediately when smoothing is off.
    pub fn update_object_height(&mut self, object_y: &mut f64, force: bool) {
        if !self.state.needs_update && !force {
            return;
        }
        if self.options.smoothing <= 0.0 {
            *object_y = self.target_y();
        }
        self.state.needs_update = false;
    }

    /// Move `object_y` toward the ground target.
    pub fn tick(&mut self, object_y: &mut f64, dt: f64) {
        if self.options.disable_update {
            return;
        }

        if self.options.smoothing <= 0.0 {
            if self.state.needs_update {
                *object_y = self.target_y();
                self.state.needs_update = false;
            }
            return;
        }

        let target = self.target_y();
        if (*object_y - target).abs() <= self.options.precision {
            *object_y = target;
            self.state.needs_update = false;
            return;
        }

        let t = approach_weight(self.options.smoothing, dt);
        *object_y += (target - *object_y) * t;
    }

    pub fn restart(&mut self) {
        self.state = GroundState {
            current_ground_y: -self.options.initial_ground_height_guess,
            nearest_plane_distance: None,
            nearest_plane_center: None,
            needs_update: true,
        };
    }
}
