//! Turn-by-turn route navigation.
//!
//! [`RouteEngine`] places one geo-anchor per route step and drives the
//! step's signposts every tick. The current target advances when its
//! signpost asks for it; at most one advance happens per tick, after every
//! signpost has seen the same target index.

pub mod custom;
pub mod loader;
pub mod mapbox;
pub mod signpost;

pub use custom::{CustomRoute, CustomRoutePoint};
pub use loader::{RouteLoader, RouteSettings, RouteWaypoint, RoutingService};
pub use mapbox::MapboxClient;
pub use signpost::{
    MachineState, Signpost, SignpostEventArgs, SignpostFactory, SignpostPart, SignpostPose, SignpostStateMachine,
    SignpostStateType, StepInit, VisualEffect,
};

use crate::config::{GroundHeightOptions, NavConfig, PlacementOptions, RouteOptions};
use crate::error::NavResult;
use crate::events::Channel;
use crate::frame::SharedFrame;
use crate::geo_math::{point_segment_distance, SegmentDistance, SegmentRegion};
use crate::ground::GroundPlane;
use crate::placement::{PlacementController, SharedPlacement};
use crate::provider::SharedProvider;
use crate::types::{horizontal, horizontal_distance, GeoPoint, LocalPoint};
use serde::{Deserialize, Serialize};

/// One maneuver point
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    pub location: GeoPoint,
    pub instruction: String,
    pub name: String,
    /// Length of the leg that starts here (metres)
    pub distance: f64,
    pub maneuver_type: String,
    pub bearing_before: f64,
    pub bearing_after: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadedRoute {
    pub name: String,
    pub steps: Vec<RouteStep>,
    /// Total length (metres)
    pub distance: f64,
    /// Route polyline, for path rendering
    pub geometry: Vec<GeoPoint>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetChange {
    pub previous: Option<usize>,
    pub current: usize,
}

pub struct RouteEngine {
    provider: SharedProvider,
    frame: SharedFrame,
    options: RouteOptions,
    placement_options: PlacementOptions,
    ground_options: GroundHeightOptions,
    factories: Vec<SignpostFactory>,

    steps: Vec<RouteStep>,
    distance: f64,
    geometry: Vec<GeoPoint>,
    anchors: Vec<SharedPlacement>,
    /// Signpost instances per step, one per factory
    signposts: Vec<Vec<Box<dyn Signpost>>>,
    current_target_index: Option<usize>,
    settings: Option<RouteSettings>,
    load_route_error: Option<String>,

    /// Number of steps of the new route
    pub route_built: Channel<usize>,
    pub route_cleared: Channel<()>,
    pub target_changed: Channel<TargetChange>,
    pub route_error: Channel<String>,
}

impl RouteEngine {
    /// Engine with the reference signpost state machine installed.
    pub fn new(provider: SharedProvider, frame: SharedFrame, config: &NavConfig) -> Self {
        let mut engine = Self::without_signposts(provider, frame, config);
        engine.add_signpost_factory(SignpostStateMachine::factory(config.signpost.clone()));
        engine
    }

    pub fn without_signposts(provider: SharedProvider, frame: SharedFrame, config: &NavConfig) -> Self {
        RouteEngine {
            provider,
            frame,
            options: config.route.clone(),
            placement_options: PlacementOptions {
                max_number_of_location_updates: 0,
                ..config.placement.clone()
            },
            ground_options: config.ground.clone(),
            factories: Vec::new(),
            steps: Vec::new(),
            distance: 0.0,
            geometry: Vec::new(),
            anchors: Vec::new(),
            signposts: Vec::new(),
            current_target_index: None,
            settings: None,
            load_route_error: None,
            route_built: Channel::new("route_built"),
            route_cleared: Channel::new("route_cleared"),
            target_changed: Channel::new("target_changed"),
            route_error: Channel::new("route_error"),
        }
    }

    /// Applies to routes built afterwards.
    pub fn add_signpost_factory(&mut self, factory: SignpostFactory) {
        self.factories.push(factory);
    }

    // ===== Accessors =====

    pub fn number_of_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn steps(&self) -> &[RouteStep] {
        &self.steps
    }

    pub fn route_distance(&self) -> f64 {
        self.distance
    }

    pub fn geometry(&self) -> &[GeoPoint] {
        &self.geometry
    }

    pub fn current_target_index(&self) -> Option<usize> {
        self.current_target_index
    }

    pub fn current_step(&self) -> Option<&RouteStep> {
        self.current_target_index.and_then(|i| self.steps.get(i))
    }

    pub fn load_route_error(&self) -> Option<&str> {
        self.load_route_error.as_deref()
    }

    pub fn settings(&self) -> Option<&RouteSettings> {
        self.settings.as_ref()
    }

    pub fn anchors(&self) -> &[SharedPlacement] {
        &self.anchors
    }

    pub fn signposts(&self, step: usize) -> &[Box<dyn Signpost>] {
        self.signposts.get(step).map(|s| s.as_slice()).unwrap_or(&[])
    }

    /// State of the first signpost at each step that reports one
    pub fn signpost_states(&self) -> Vec<Option<MachineState>> {
        self.signposts
            .iter()
            .map(|step| step.iter().find_map(|s| s.state()))
            .collect()
    }

    /// Anchor positions, world coordinates
    pub fn anchor_positions(&self) -> Vec<LocalPoint> {
        self.anchors.iter().map(|a| a.borrow().world_position()).collect()
    }

    /// Horizontal camera-to-target distance in scene units
    pub fn distance_to_target(&self) -> Option<f64> {
        let anchor = self.anchors.get(self.current_target_index?)?;
        Some(anchor.borrow().scene_distance())
    }

    /// Device location to start a route from, once the provider has one
    pub fn user_location(&self) -> Option<GeoPoint> {
        let provider = self.provider.borrow();
        provider
            .is_enabled()
            .then(|| provider.current_location().position)
    }

    // ===== Building =====

    /// Tear down the current route and place the new one.
    ///
    /// # Returns
    /// False if the route has no steps; the old route is gone either way.
    pub fn build_route(&mut self, route: &LoadedRoute) -> bool {
        self.clear_route();

        if route.steps.is_empty() {
            log::warn!("[route] refusing to build an empty route");
            return false;
        }

        let number_of_steps = route.steps.len();
        for (i, step) in route.steps.iter().enumerate() {
            let anchor = PlacementController::attach(
                &self.provider,
                self.frame.clone(),
                &format!("PlaceAt_{}", i),
                step.location,
                self.placement_options.clone(),
                self.ground_options.clone(),
            );
            self.anchors.push(anchor);

            let init = StepInit {
                step_index: i,
                number_of_steps,
                instruction: step.instruction.clone(),
                name: step.name.clone(),
                ground_height: self.options.ground_height,
            };
            let instances = self
                .factories
                .iter()
                .map(|factory| {
                    let mut signpost = factory(&init);
                    signpost.init(&init);
                    signpost
                })
                .collect();
            self.signposts.push(instances);
        }

        self.steps = route.steps.clone();
        self.distance = route.distance;
        self.geometry = route.geometry.clone();
        log::info!(
            "[route] built '{}' with {} steps, {:.0} m",
            route.name,
            number_of_steps,
            route.distance
        );

        self.set_target(0);
        self.route_built.emit(&number_of_steps);
        true
    }

    pub fn clear_route(&mut self) {
        let had_route = !self.steps.is_empty();
        for anchor in self.anchors.drain(..) {
            anchor.borrow_mut().detach(&self.provider);
        }
        self.signposts.clear();
        self.steps.clear();
        self.geometry.clear();
        self.distance = 0.0;
        self.current_target_index = None;

        if had_route {
            log::debug!("[route] cleared");
            self.route_cleared.emit(&());
        }
    }

    // ===== Loading =====

    /// Apply the outcome of a load started from `settings`.
    ///
    /// A failure keeps the current route and reports the message on
    /// `route_error`.
    pub fn finish_load(&mut self, settings: RouteSettings, result: NavResult<LoadedRoute>) -> bool {
        match result {
            Ok(route) => {
                self.load_route_error = None;
                self.settings = Some(settings);
                self.build_route(&route)
            }
            Err(err) => {
                let message = err.to_string();
                log::warn!("[route] load failed: {}", message);
                self.load_route_error = Some(message.clone());
                self.route_error.emit(&message);
                false
            }
        }
    }

    pub fn load_custom_route(&mut self, route: CustomRoute) -> bool {
        let loaded = route.to_route();
        self.finish_load(RouteSettings::Custom(route), Ok(loaded))
    }

    pub async fn load_route<S: RoutingService>(
        &mut self,
        loader: &RouteLoader<S>,
        from: RouteWaypoint,
        to: RouteWaypoint,
    ) -> bool {
        self.load_settings(loader, RouteSettings::Mapbox { from, to }).await
    }

    /// Load again from the settings of the last successful load.
    pub async fn reload_route<S: RoutingService>(&mut self, loader: &RouteLoader<S>) -> bool {
        match self.settings.clone() {
            Some(settings) => self.load_settings(loader, settings).await,
            None => {
                log::warn!("[route] nothing to reload");
                false
            }
        }
    }

    async fn load_settings<S: RoutingService>(&mut self, loader: &RouteLoader<S>, settings: RouteSettings) -> bool {
        let user = self.user_location();
        let result = loader.load_settings(&settings, user).await;
        self.finish_load(settings, result)
    }

    // ===== Targets =====

    fn is_valid_target_index(&self, index: usize) -> bool {
        index < self.steps.len()
    }

    pub fn set_target(&mut self, index: usize) {
        if Some(index) == self.current_target_index || !self.is_valid_target_index(index) {
            return;
        }

        let positions = self.anchor_positions();
        let user = self.frame.borrow().camera_position;

        let previous = self.current_target_index;
        if let Some(old) = previous {
            let args = self.event_args(old, &positions, &user, 0.0);
            for signpost in self.signposts[old].iter_mut() {
                signpost.off_current_target(&args);
            }
        }

        self.current_target_index = Some(index);
        let args = self.event_args(index, &positions, &user, 0.0);
        for signpost in self.signposts[index].iter_mut() {
            signpost.on_current_target(&args);
        }

        log::info!(
            "[route] target {}/{}: {}",
            index + 1,
            self.steps.len(),
            self.steps[index].instruction
        );
        self.target_changed.emit(&TargetChange {
            previous,
            current: index,
        });
    }

    pub fn next_target(&mut self) {
        if let Some(i) = self.current_target_index {
            self.set_target(i + 1);
        }
    }

    pub fn prev_target(&mut self) {
        if let Some(i) = self.current_target_index.and_then(|i| i.checked_sub(1)) {
            self.set_target(i);
        }
    }

    pub fn first_target(&mut self) {
        self.set_target(0);
    }

    pub fn last_target(&mut self) {
        if let Some(last) = self.steps.len().checked_sub(1) {
            self.set_target(last);
        }
    }

    /// Target the far end of the route segment closest to the camera.
    ///
    /// Standing before the first step targets step 0.
    pub fn closest_target(&mut self) {
        let positions = self.anchor_positions();
        if positions.len() < 2 {
            log::warn!("[route] closest target needs at least two steps");
            return;
        }

        let user = horizontal(&self.frame.borrow().camera_position);
        let mut closest: Option<(usize, SegmentDistance)> = None;
        for (i, w) in positions.windows(2).enumerate() {
            let result = point_segment_distance(&user, &horizontal(&w[0]), &horizontal(&w[1]));
            if closest.as_ref().map_or(true, |(_, c)| result.distance < c.distance) {
                closest = Some((i, result));
            }
        }

        if let Some((segment, result)) = closest {
            log::debug!("[route] closest segment {} ({:?})", segment, result.region);
            let target = match result.region {
                SegmentRegion::Start if segment == 0 => 0,
                _ => segment + 1,
            };
            self.set_target(target);
        }
    }

    // ===== Per tick =====

    fn event_args(&self, index: usize, positions: &[LocalPoint], user: &LocalPoint, dt: f64) -> SignpostEventArgs {
        let target = positions[index];
        let step = &self.steps[index];
        SignpostEventArgs {
            target_pos: target,
            next_target_pos: positions.get(index + 1).copied(),
            prev_target_pos: index.checked_sub(1).and_then(|i| positions.get(i).copied()),
            user_pos: *user,
            distance: horizontal_distance(user, &target),
            is_current_target: Some(index) == self.current_target_index,
            step_index: index,
            instruction: step.instruction.clone(),
            name: step.name.clone(),
            delta_time: dt,
            number_of_steps: self.steps.len(),
        }
    }

    /// Move the anchors, update every signpost, then advance at most once.
    pub fn tick(&mut self, dt: f64) {
        if self.steps.is_empty() {
            return;
        }

        for anchor in &self.anchors {
            anchor.borrow_mut().tick(dt);
        }

        let positions = self.anchor_positions();
        let user = self.frame.borrow().camera_position;

        let mut advance = false;
        for i in 0..self.steps.len() {
            let args = self.event_args(i, &positions, &user, dt);
            for signpost in self.signposts[i].iter_mut() {
                let keep_target = signpost.update(&args);
                if !keep_target && args.is_current_target {
                    advance = true;
                }
            }
        }

        if advance {
            self.next_target();
        }
    }

    /// Reset every step anchor; they are placed again from the next reading.
    pub fn restart(&mut self) {
        for anchor in &self.anchors {
            anchor.borrow_mut().restart(None);
        }
    }

    pub fn on_planes_changed(&mut self, planes: &[GroundPlane]) {
        for anchor in &self.anchors {
            anchor.borrow_mut().on_planes_changed(planes);
        }
    }

    /// Drain renderer commands from every signpost, tagged with the step index.
    pub fn take_effects(&mut self) -> Vec<(usize, VisualEffect)> {
        self.signposts
            .iter_mut()
            .enumerate()
            .flat_map(|(i, step)| {
                step.iter_mut()
                    .flat_map(|s| s.take_effects())
                    .map(move |effect| (i, effect))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl Drop for RouteEngine {
    fn drop(&mut self) {
        // the provider may already be borrowed if it is being torn down
        if let Ok(mut provider) = self.provider.try_borrow_mut() {
            for anchor in &self.anchors {
                anchor.borrow_mut().detach_from(&mut provider);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocationProviderOptions;
    use crate::error::NavError;
    use crate::frame::SceneFrame;
    use crate::geo_math;
    use crate::provider::{LocationProvider, MockFeed, MockSource};
    use crate::types::{HeadingReading, LocationReading};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn origin() -> GeoPoint {
        GeoPoint::flat(51.5, -0.12)
    }

    fn east_of_origin(metres: f64) -> GeoPoint {
        geo_math::destination(&origin(), 90.0, metres)
    }

    fn enabled_provider() -> (SharedProvider, MockFeed) {
        let (source, feed) = MockSource::new();
        let provider = LocationProvider::shared(
            Box::new(source),
            LocationProviderOptions {
                time_between_updates: 0.0,
                ..Default::default()
            },
        );
        provider.borrow_mut().start_now();
        feed.push_heading(HeadingReading::new(0.0, 1));
        feed.push_location(LocationReading::new(origin(), 3.0, 1));
        provider.borrow_mut().update();
        (provider, feed)
    }

    fn straight_route(n: usize) -> LoadedRoute {
        let steps = (0..n)
            .map(|i| RouteStep {
                location: east_of_origin(10.0 * i as f64),
                instruction: format!("step {}", i),
                ..Default::default()
            })
            .collect();
        LoadedRoute {
            name: "straight".to_string(),
            steps,
            distance: 10.0 * n.saturating_sub(1) as f64,
            geometry: Vec::new(),
        }
    }

    /// Signpost that records target notifications and never asks to advance
    struct Recorder {
        step: usize,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Signpost for Recorder {
        fn init(&mut self, step: &StepInit) {
            self.step = step.step_index;
        }

        fn update(&mut self, _args: &SignpostEventArgs) -> bool {
            true
        }

        fn on_current_target(&mut self, _args: &SignpostEventArgs) {
            self.log.borrow_mut().push(format!("on {}", self.step));
        }

        fn off_current_target(&mut self, _args: &SignpostEventArgs) {
            self.log.borrow_mut().push(format!("off {}", self.step));
        }
    }

    fn recording_engine(n: usize) -> (RouteEngine, SharedFrame, Rc<RefCell<Vec<String>>>) {
        let (provider, _feed) = enabled_provider();
        let frame = SceneFrame::shared();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut engine = RouteEngine::without_signposts(provider, frame.clone(), &NavConfig::default());
        let sink = log.clone();
        engine.add_signpost_factory(Box::new(move |init: &StepInit| -> Box<dyn Signpost> {
            Box::new(Recorder {
                step: init.step_index,
                log: sink.clone(),
            })
        }));
        assert!(engine.build_route(&straight_route(n)));
        log.borrow_mut().clear();
        (engine, frame, log)
    }

    #[test]
    fn test_build_places_anchors_and_targets_first_step() {
        let (provider, _feed) = enabled_provider();
        let frame = SceneFrame::shared();
        let mut engine = RouteEngine::new(provider.clone(), frame, &NavConfig::default());

        assert!(engine.build_route(&straight_route(3)));
        assert_eq!(engine.number_of_steps(), 3);
        assert_eq!(engine.current_target_index(), Some(0));
        assert_eq!(engine.anchors()[2].borrow().name(), "PlaceAt_2");

        let positions = engine.anchor_positions();
        assert!((positions[1].x - 10.0).abs() < 0.05);
        assert!((positions[2].x - 20.0).abs() < 0.05);

        // rebuilding drops the old anchors' subscriptions
        let before = provider.borrow().location_updated.len();
        assert!(engine.build_route(&straight_route(2)));
        assert_eq!(provider.borrow().location_updated.len(), before - 1);
    }

    #[test]
    fn test_restart_replaces_anchors_from_next_reading() {
        let (provider, feed) = enabled_provider();
        let mut engine = RouteEngine::new(provider.clone(), SceneFrame::shared(), &NavConfig::default());
        assert!(engine.build_route(&straight_route(2)));
        assert_eq!(engine.anchors()[1].borrow().state().location_updated_count, 1);

        engine.restart();
        assert_eq!(engine.anchors()[1].borrow().state().location_updated_count, 0);
        assert!(engine.anchor_positions()[1].norm() < 1e-9);

        feed.push_location(LocationReading::new(origin(), 3.0, 2));
        provider.borrow_mut().update();
        assert_eq!(engine.anchors()[1].borrow().state().location_updated_count, 1);
        assert!((engine.anchor_positions()[1].x - 10.0).abs() < 0.05);
    }

    #[test]
    fn test_empty_route_is_rejected() {
        let (provider, _feed) = enabled_provider();
        let mut engine = RouteEngine::new(provider, SceneFrame::shared(), &NavConfig::default());
        assert!(!engine.build_route(&LoadedRoute::default()));
        assert_eq!(engine.current_target_index(), None);
    }

    #[test]
    fn test_set_target_twice_is_noop() {
        let (mut engine, _frame, log) = recording_engine(3);
        engine.set_target(1);
        engine.set_target(1);
        assert_eq!(*log.borrow(), vec!["off 0", "on 1"]);
    }

    #[test]
    fn test_next_and_prev_stay_in_range() {
        let (mut engine, _frame, log) = recording_engine(3);

        engine.prev_target();
        assert_eq!(engine.current_target_index(), Some(0));

        engine.next_target();
        engine.next_target();
        assert_eq!(engine.current_target_index(), Some(2));
        engine.next_target();
        assert_eq!(engine.current_target_index(), Some(2));

        engine.set_target(7);
        assert_eq!(engine.current_target_index(), Some(2));
        assert_eq!(log.borrow().len(), 4);
    }

    #[test]
    fn test_first_then_last_notifies_once() {
        let (mut engine, _frame, log) = recording_engine(4);
        engine.first_target();
        engine.last_target();
        assert_eq!(engine.current_target_index(), Some(3));
        assert_eq!(*log.borrow(), vec!["off 0", "on 3"]);
    }

    #[test]
    fn test_closest_target() {
        let (mut engine, frame, _log) = recording_engine(3);

        frame.borrow_mut().camera_position = LocalPoint::new(5.0, 0.0, 0.0);
        engine.closest_target();
        assert_eq!(engine.current_target_index(), Some(1));

        frame.borrow_mut().camera_position = LocalPoint::new(25.0, 0.0, 0.0);
        engine.closest_target();
        assert_eq!(engine.current_target_index(), Some(2));

        frame.borrow_mut().camera_position = LocalPoint::new(-5.0, 0.0, 0.0);
        engine.closest_target();
        assert_eq!(engine.current_target_index(), Some(0));
    }

    #[test]
    fn test_closest_target_needs_two_steps() {
        let (mut engine, frame, log) = recording_engine(1);
        frame.borrow_mut().camera_position = LocalPoint::new(50.0, 0.0, 0.0);
        engine.closest_target();
        assert_eq!(engine.current_target_index(), Some(0));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_auto_advance_inside_deactivation_distance() {
        let (provider, _feed) = enabled_provider();
        let frame = SceneFrame::shared();
        let mut engine = RouteEngine::new(provider, frame.clone(), &NavConfig::default());
        engine.build_route(&straight_route(3));

        let changes = Rc::new(RefCell::new(Vec::new()));
        let sink = changes.clone();
        engine
            .target_changed
            .subscribe(move |c: &TargetChange| sink.borrow_mut().push(c.current));

        // standing on step 0
        engine.tick(0.1);
        assert_eq!(engine.current_target_index(), Some(1));

        // 10 m from step 1 is outside every threshold
        engine.tick(0.1);
        assert_eq!(engine.current_target_index(), Some(1));

        frame.borrow_mut().camera_position = LocalPoint::new(9.0, 0.0, 0.0);
        engine.tick(0.1);
        assert_eq!(engine.current_target_index(), Some(2));

        // the last step never advances past the end
        frame.borrow_mut().camera_position = LocalPoint::new(19.5, 0.0, 0.0);
        engine.tick(0.1);
        engine.tick(0.1);
        assert_eq!(engine.current_target_index(), Some(2));
        assert_eq!(*changes.borrow(), vec![1, 2]);

        let effects = engine.take_effects();
        assert!(effects.contains(&(0, VisualEffect::Deactivate(SignpostPart::Root))));
        assert!(engine.take_effects().is_empty());
    }

    #[test]
    fn test_failed_load_keeps_route() {
        let (mut engine, _frame, _log) = recording_engine(3);
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        engine.route_error.subscribe(move |m: &String| sink.borrow_mut().push(m.clone()));

        let settings = RouteSettings::Mapbox {
            from: RouteWaypoint::UserLocation,
            to: RouteWaypoint::Query {
                query: "nowhere".to_string(),
            },
        };
        let built = engine.finish_load(
            settings,
            Err(NavError::WaypointResolution("No results for 'nowhere'".to_string())),
        );

        assert!(!built);
        assert_eq!(engine.number_of_steps(), 3);
        assert_eq!(
            engine.load_route_error(),
            Some("Waypoint resolution failed: No results for 'nowhere'")
        );
        assert_eq!(errors.borrow().len(), 1);
        assert!(engine.settings().is_none());
    }

    #[test]
    fn test_custom_route_load_clears_error() {
        let (mut engine, _frame, _log) = recording_engine(3);
        engine.finish_load(
            RouteSettings::Custom(CustomRoute::default()),
            Err(NavError::RouteQuery("boom".to_string())),
        );

        let custom = CustomRoute::from_json(
            r#"{ "name": "short", "points": [
                { "location": { "latitude": 51.5, "longitude": -0.12 } },
                { "location": { "latitude": 51.5001, "longitude": -0.12 } }
            ] }"#,
        )
        .unwrap();
        assert!(engine.load_custom_route(custom));
        assert_eq!(engine.number_of_steps(), 2);
        assert!(engine.load_route_error().is_none());
        assert!(matches!(engine.settings(), Some(RouteSettings::Custom(_))));
    }
}
