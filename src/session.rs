//! Per-frame orchestration of the navigation components.
//!
//! The host owns one [`Session`] and calls [`Session::tick`] once per frame
//! after reporting the camera pose. Within a tick the provider runs first, so
//! the calibrator and every anchor see this frame's readings before the route
//! engine and its signposts do.

use crate::config::{NavConfig, PlacementOptions};
use crate::events::Channel;
use crate::frame::{SceneFrame, SharedFrame};
use crate::ground::{GroundHeightEstimator, GroundPlane};
use crate::orientation::{OrientationCalibrator, SharedCalibrator};
use crate::placement::{PlacementController, SharedPlacement};
use crate::provider::{self, LocationProvider, PlatformSource, ProviderStatus, SharedProvider};
use crate::route::RouteEngine;
use crate::types::{GeoPoint, LocalPoint};

pub struct Session {
    config: NavConfig,
    frame: SharedFrame,
    provider: SharedProvider,
    calibrator: SharedCalibrator,
    /// Floor under the camera, for hosts that draw one
    ground: GroundHeightEstimator,
    ground_y: f64,
    placements: Vec<SharedPlacement>,
    route: RouteEngine,
    tracking: bool,
    tracking_started: bool,

    pub tracking_started_event: Channel<()>,
    pub tracking_lost: Channel<()>,
    pub tracking_restored: Channel<()>,
}

impl Session {
    pub fn new(source: Box<dyn PlatformSource>, mut config: NavConfig) -> Self {
        config.validate();

        let frame = SceneFrame::shared();
        let provider = LocationProvider::shared(source, config.provider.clone());
        let calibrator = OrientationCalibrator::attach(&provider, frame.clone(), config.orientation.clone());
        let route = RouteEngine::new(provider.clone(), frame.clone(), &config);
        let ground = GroundHeightEstimator::new(config.ground.clone(), frame.clone());
        let ground_y = ground.target_y();

        if config.session.wait_for_tracking {
            log::info!("[session] waiting for AR tracking");
            provider.borrow_mut().mute();
            frame.borrow_mut().waiting_for_tracking = true;
        }

        Session {
            config,
            frame,
            provider,
            calibrator,
            ground,
            ground_y,
            placements: Vec::new(),
            route,
            tracking: false,
            tracking_started: false,
            tracking_started_event: Channel::new("tracking_started"),
            tracking_lost: Channel::new("tracking_lost"),
            tracking_restored: Channel::new("tracking_restored"),
        }
    }

    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    pub fn frame(&self) -> &SharedFrame {
        &self.frame
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    pub fn calibrator(&self) -> &SharedCalibrator {
        &self.calibrator
    }

    pub fn route(&self) -> &RouteEngine {
        &self.route
    }

    pub fn route_mut(&mut self) -> &mut RouteEngine {
        &mut self.route
    }

    pub fn placements(&self) -> &[SharedPlacement] {
        &self.placements
    }

    pub fn ground_y(&self) -> f64 {
        self.ground_y
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Run the provider's start-up sequence.
    pub async fn start(&self) -> ProviderStatus {
        provider::start(&self.provider).await
    }

    pub fn start_now(&self) -> ProviderStatus {
        self.provider.borrow_mut().start_now()
    }

    /// Place an object at `location`, with the session's placement options unless given.
    pub fn add_placement(&mut self, name: &str, location: GeoPoint, options: Option<PlacementOptions>) -> SharedPlacement {
        let placement = PlacementController::attach(
            &self.provider,
            self.frame.clone(),
            name,
            location,
            options.unwrap_or_else(|| self.config.placement.clone()),
            self.config.ground.clone(),
        );
        self.placements.push(placement.clone());
        placement
    }

    pub fn remove_placement(&mut self, name: &str) -> bool {
        let Some(index) = self.placements.iter().position(|p| p.borrow().name() == name) else {
            return false;
        };
        let placement = self.placements.remove(index);
        placement.borrow_mut().detach(&self.provider);
        true
    }

    /// Camera pose for this frame, world coordinates.
    pub fn set_camera(&mut self, position: LocalPoint, yaw_deg: f64) {
        self.frame.borrow_mut().set_camera(position, yaw_deg);
    }

    /// Report the host's AR tracking state.
    pub fn set_tracking(&mut self, tracking: bool) {
        if tracking == self.tracking {
            return;
        }
        self.tracking = tracking;

        if !tracking {
            log::warn!("[session] AR tracking lost");
            self.tracking_lost.emit(&());
            return;
        }

        if !self.tracking_started {
            self.tracking_started = true;
            log::info!("[session] AR tracking started");
            if self.config.session.wait_for_tracking {
                self.frame.borrow_mut().waiting_for_tracking = false;
                self.provider.borrow_mut().unmute(true);
            }
            self.tracking_started_event.emit(&());
            return;
        }

        log::info!("[session] AR tracking restored");
        if self.config.session.restart_when_tracking_restored {
            self.restart();
        }
        self.tracking_restored.emit(&());
    }

    /// Start calibration and placement over from the next reading.
    pub fn restart(&mut self) {
        log::info!("[session] restarting");
        self.calibrator.borrow_mut().restart();
        self.provider.borrow_mut().restart();
        self.ground.restart();
        for placement in &self.placements {
            placement.borrow_mut().restart(None);
        }
        self.route.restart();
    }

    pub fn on_planes_changed(&mut self, planes: &[GroundPlane]) {
        let camera = self.frame.borrow().camera_position;
        self.ground.on_planes_changed(planes, &camera, &mut self.ground_y);
        for placement in &self.placements {
            placement.borrow_mut().on_planes_changed(planes);
        }
        self.route.on_planes_changed(planes);
    }

    pub fn tick(&mut self, dt: f64) {
        self.provider.borrow_mut().update();
        self.calibrator.borrow_mut().tick(dt);

        self.ground.tick(&mut self.ground_y, dt);
        for placement in &self.placements {
            placement.borrow_mut().tick(dt);
        }

        self.route.tick(dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionOptions;
    use crate::geo_math;
    use crate::provider::{MockFeed, MockSource};
    use crate::types::{AltitudeMode, HeadingReading, LocationReading};
    use approx::assert_abs_diff_eq;

    fn origin() -> GeoPoint {
        GeoPoint::flat(40.0, -3.7)
    }

    fn config(session: SessionOptions) -> NavConfig {
        let mut config = NavConfig {
            session,
            ..Default::default()
        };
        config.provider.time_between_updates = 0.0;
        config.ground.smoothing = 0.0;
        config
    }

    fn session(options: SessionOptions) -> (Session, MockFeed) {
        let (source, feed) = MockSource::new();
        let session = Session::new(Box::new(source), config(options));
        assert_eq!(session.start_now(), ProviderStatus::Started);
        (session, feed)
    }

    fn feed_reading(feed: &MockFeed, heading: f64, ts: i64) {
        feed.push_heading(HeadingReading::new(heading, ts));
        feed.push_location(LocationReading::new(origin(), 3.0, ts));
    }

    fn north_anchor() -> GeoPoint {
        geo_math::destination(&origin(), 0.0, 10.0).with_altitude(0.0, AltitudeMode::DeviceRelative)
    }

    #[test]
    fn test_first_tick_calibrates_then_places() {
        let (mut s, feed) = session(SessionOptions::default());
        let anchor = s.add_placement("anchor", north_anchor(), None);

        feed_reading(&feed, 90.0, 1);
        s.tick(0.1);

        assert_abs_diff_eq!(s.frame().borrow().root_yaw_deg, -90.0, epsilon = 1e-9);
        let world = anchor.borrow().world_position();
        // north is world -x once the root is turned
        assert_abs_diff_eq!(world.x, -10.0, epsilon = 0.05);
        assert_abs_diff_eq!(world.z, 0.0, epsilon = 0.05);
    }

    #[test]
    fn test_waits_for_tracking_before_placing() {
        let (mut s, feed) = session(SessionOptions {
            wait_for_tracking: true,
            ..Default::default()
        });
        let anchor = s.add_placement("anchor", north_anchor(), None);

        feed_reading(&feed, 90.0, 1);
        s.tick(0.1);
        assert_eq!(anchor.borrow().state().location_updated_count, 0);
        assert_abs_diff_eq!(s.frame().borrow().root_yaw_deg, 0.0);

        s.set_tracking(true);
        assert_eq!(anchor.borrow().state().location_updated_count, 1);
        assert!(!s.frame().borrow().waiting_for_tracking);
    }

    #[test]
    fn test_restart_when_tracking_restored() {
        let (mut s, feed) = session(SessionOptions {
            restart_when_tracking_restored: true,
            ..Default::default()
        });
        let anchor = s.add_placement("anchor", north_anchor(), None);
        let restored = std::rc::Rc::new(std::cell::RefCell::new(0));
        let r = restored.clone();
        s.tracking_restored.subscribe(move |_: &()| *r.borrow_mut() += 1);

        s.set_tracking(true);
        feed_reading(&feed, 90.0, 1);
        s.tick(0.1);
        assert_eq!(anchor.borrow().state().location_updated_count, 1);

        s.set_tracking(false);
        s.set_tracking(true);
        assert_eq!(*restored.borrow(), 1);
        assert_eq!(anchor.borrow().state().location_updated_count, 0);
        assert_eq!(s.calibrator().borrow().state().update_count, 0);
    }

    #[test]
    fn test_planes_reach_the_floor_estimate() {
        let (mut s, _feed) = session(SessionOptions::default());
        s.set_camera(LocalPoint::new(0.0, 1.6, 0.0), 0.0);
        assert_abs_diff_eq!(s.ground_y(), -1.4);

        s.on_planes_changed(&[GroundPlane::horizontal(LocalPoint::new(1.0, 0.1, 1.0))]);
        assert_abs_diff_eq!(s.ground_y(), 0.1);
    }

    #[test]
    fn test_restart_forgets_placement_ground_plane() {
        let (mut s, feed) = session(SessionOptions::default());
        s.set_camera(LocalPoint::new(0.0, 1.6, 0.0), 0.0);
        let location = geo_math::destination(&origin(), 0.0, 4.0).with_altitude(0.0, AltitudeMode::GroundRelative);
        let anchor = s.add_placement("anchor", location, None);

        feed_reading(&feed, 0.0, 1);
        s.tick(0.1);
        s.on_planes_changed(&[GroundPlane::horizontal(LocalPoint::new(0.0, 0.0, 1.0))]);
        let nearest = anchor.borrow().ground().and_then(|g| g.state().nearest_plane_distance);
        assert_abs_diff_eq!(nearest.unwrap_or(f64::NAN), 3.0, epsilon = 0.05);

        s.restart();
        assert!(anchor.borrow().ground().is_some_and(|g| g.state().nearest_plane_distance.is_none()));

        feed_reading(&feed, 0.0, 2);
        s.tick(0.1);
        assert_eq!(anchor.borrow().state().location_updated_count, 1);

        // farther than the plane seen before the restart
        s.on_planes_changed(&[GroundPlane::horizontal(LocalPoint::new(0.0, 0.2, 8.0))]);
        let ground_y = anchor.borrow().ground().map(|g| g.current_ground_y());
        assert_abs_diff_eq!(ground_y.unwrap_or(f64::NAN), 0.2);
    }

    #[test]
    fn test_remove_placement_detaches() {
        let (mut s, _feed) = session(SessionOptions::default());
        s.add_placement("a", north_anchor(), None);
        s.add_placement("b", north_anchor(), None);

        assert!(s.remove_placement("a"));
        assert!(!s.remove_placement("a"));
        assert_eq!(s.placements().len(), 1);
        assert_eq!(s.provider().borrow().location_updated.len(), 1);
    }
}
