//! Shared local-frame state.
//!
//! The root carries the calibrated yaw that aligns its +z axis with true north.
//! Placed content lives in root-local coordinates, so rotating the root moves
//! every anchor with it. The camera pose is reported by the host each frame in
//! world coordinates.

use crate::types::{yaw_rotation, LocalPoint};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneFrame {
    pub root_yaw_deg: f64,
    pub camera_position: LocalPoint,
    pub camera_yaw_deg: f64,
    /// Set while the host waits for AR tracking; compass samples are ignored meanwhile.
    pub waiting_for_tracking: bool,
}

pub type SharedFrame = Rc<RefCell<SceneFrame>>;

impl SceneFrame {
    pub fn shared() -> SharedFrame {
        Rc::new(RefCell::new(SceneFrame::default()))
    }

    pub fn set_camera(&mut self, position: LocalPoint, yaw_deg: f64) {
        self.camera_position = position;
        self.camera_yaw_deg = yaw_deg;
    }

    /// Root-local -> world
    pub fn to_world(&self, local: &LocalPoint) -> LocalPoint {
        yaw_rotation(self.root_yaw_deg) * local
    }

    /// World -> root-local
    pub fn to_local(&self, world: &LocalPoint) -> LocalPoint {
        yaw_rotation(self.root_yaw_deg).inverse() * world
    }

    pub fn camera_in_root(&self) -> LocalPoint {
        self.to_local(&self.camera_position)
    }
}
