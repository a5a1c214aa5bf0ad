//! Per-step guidance: the [`Signpost`] contract and its reference state machine.
//!
//! A [`SignpostStateMachine`] never touches renderer objects. It records
//! [`VisualEffect`] commands on each transition and exposes a [`SignpostPose`]
//! for the host to apply after every update.

use crate::config::SignpostOptions;
use crate::types::{with_y, LocalPoint};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Data handed to a signpost when its route is built
#[derive(Clone, Debug, PartialEq)]
pub struct StepInit {
    pub step_index: usize,
    pub number_of_steps: usize,
    pub instruction: String,
    pub name: String,
    /// Camera height above the ground, used for the finish pin
    pub ground_height: f64,
}

/// Per-tick input for one step
#[derive(Clone, Debug, PartialEq)]
pub struct SignpostEventArgs {
    pub target_pos: LocalPoint,
    pub next_target_pos: Option<LocalPoint>,
    pub prev_target_pos: Option<LocalPoint>,
    pub user_pos: LocalPoint,
    /// Horizontal user-to-target distance
    pub distance: f64,
    pub is_current_target: bool,
    pub step_index: usize,
    pub instruction: String,
    pub name: String,
    pub delta_time: f64,
    pub number_of_steps: usize,
}

impl SignpostEventArgs {
    pub fn is_last_step(&self) -> bool {
        self.step_index + 1 == self.number_of_steps
    }
}

/// Behaviour attached to one route step.
///
/// `update` returns false to ask the route to move past this step; the request
/// is only honoured for the current target.
pub trait Signpost {
    fn init(&mut self, step: &StepInit);

    fn update(&mut self, args: &SignpostEventArgs) -> bool;

    fn on_current_target(&mut self, args: &SignpostEventArgs);

    fn off_current_target(&mut self, args: &SignpostEventArgs);

    /// Drain pending renderer commands.
    fn take_effects(&mut self) -> Vec<VisualEffect> {
        Vec::new()
    }

    fn state(&self) -> Option<MachineState> {
        None
    }

    fn pose(&self) -> Option<&SignpostPose> {
        None
    }
}

pub type SignpostFactory = Box<dyn Fn(&StepInit) -> Box<dyn Signpost>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignpostStateType {
    Hidden,
    Following,
    Idle,
    Deactivated,
    MapPin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState {
    pub kind: SignpostStateType,
    pub has_arrow: bool,
}

impl MachineState {
    pub const HIDDEN: MachineState = MachineState {
        kind: SignpostStateType::Hidden,
        has_arrow: false,
    };

    fn new(kind: SignpostStateType, has_arrow: bool) -> Self {
        MachineState { kind, has_arrow }
    }
}

/// Renderer sub-objects a signpost controls
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignpostPart {
    Root,
    Arrow,
    MapPin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisualEffect {
    Activate(SignpostPart),
    Deactivate(SignpostPart),
    ResetTimer(SignpostPart),
}

/// Where the host should draw the signpost's parts, world coordinates
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignpostPose {
    pub root: LocalPoint,
    pub sign: LocalPoint,
    /// Horizontal direction the sign faces
    pub sign_forward: LocalPoint,
    pub arrow: Option<LocalPoint>,
    /// Point the arrow is turned toward
    pub arrow_look_at: Option<LocalPoint>,
    pub map_pin: Option<LocalPoint>,
    pub distance_label: String,
    pub direction_label: String,
}

/// Cubic ease-out from `start` to `end`, `value` in [0, 1]
pub fn ease_out_cubic(start: f64, end: f64, value: f64) -> f64 {
    let v = value - 1.0;
    (end - start) * (v * v * v + 1.0) + start
}

/// Height of a dropped object at `time`: an eased fall from `start_y`, then a
/// slow bob around `end_y` whose amplitude is itself modulated.
#[allow(clippy::too_many_arguments)]
pub fn drop_and_float(
    time: f64,
    start_y: f64,
    end_y: f64,
    drop_duration: f64,
    amplitude: f64,
    frequency: f64,
    lfo_amp: f64,
    lfo_freq: f64,
) -> f64 {
    if time < drop_duration {
        return ease_out_cubic(start_y, end_y - amplitude / 2.0, time / drop_duration);
    }

    let t = time - drop_duration;
    let lfo = lfo_amp * (2.0 * PI * lfo_freq * t).sin();
    let phase = if end_y < start_y { 1.5 * PI } else { 0.0 };
    let dy = (amplitude + lfo) * (t * 2.0 * PI * frequency + phase).sin();
    end_y - amplitude / 2.0 + (amplitude + lfo) + dy
}

const ARROW_AMPLITUDE: f64 = 0.2;
const PIN_AMPLITUDE: f64 = 1.0;
const FLOAT_FREQUENCY: f64 = 0.3;
const FLOAT_LFO_AMP: f64 = 0.1;
const FLOAT_LFO_FREQ: f64 = 0.02;

/// Reference signpost: road sign, direction arrow and finish pin.
///
/// With L0 = follow distance, L1 = drop distance and L2 = deactivation
/// distance (L0 >= L1 >= L2):
///
/// | condition                                   | state                      |
/// |---------------------------------------------|----------------------------|
/// | current, d >= L0                            | Following                  |
/// | current, L1 <= d < L0                       | Idle                       |
/// | current, L2 <= d < L1                       | Idle + arrow, MapPin if last |
/// | current, d < L2; or not current, d <= L2, not last | Deactivated         |
/// | anything else, not last                     | Hidden                     |
pub struct SignpostStateMachine {
    options: SignpostOptions,
    state: MachineState,
    ground_height: f64,
    arrow_time: f64,
    pin_time: f64,
    arrow_active: bool,
    pin_active: bool,
    effects: Vec<VisualEffect>,
    pose: SignpostPose,
}

impl SignpostStateMachine {
    pub fn new(options: SignpostOptions) -> Self {
        SignpostStateMachine {
            options: options.validated(),
            state: MachineState::HIDDEN,
            ground_height: 0.0,
            arrow_time: 0.0,
            pin_time: 0.0,
            arrow_active: false,
            pin_active: false,
            effects: Vec::new(),
            pose: SignpostPose::default(),
        }
    }

    /// Factory building one machine per step with shared options
    pub fn factory(options: SignpostOptions) -> SignpostFactory {
        Box::new(move |_step: &StepInit| Box::new(SignpostStateMachine::new(options.clone())) as Box<dyn Signpost>)
    }

    pub fn current_state(&self) -> MachineState {
        self.state
    }

    pub fn is_arrow_active(&self) -> bool {
        self.arrow_active
    }

    pub fn is_pin_active(&self) -> bool {
        self.pin_active
    }

    /// Resolve the next state for the given input.
    ///
    /// # Returns
    /// The state to enter (`None` leaves the current one) and whether the
    /// current target should be kept.
    pub fn resolve(&self, is_current: bool, distance: f64, is_last: bool) -> (Option<MachineState>, bool) {
        let l0 = self.options.follow_distance;
        let l1 = self.options.drop_distance;
        let l2 = self.options.deactivation_distance;

        let v0 = is_current && distance >= l0;
        let v1 = is_current && distance < l0 && distance >= l1;
        let v2 = is_current && distance < l1 && distance >= l2;
        let v3 = is_current && distance < l2;
        let v4 = !is_current && distance <= l2;

        use SignpostStateType::*;
        let next = if v0 {
            Some(MachineState::new(Following, false))
        } else if v1 {
            Some(MachineState::new(Idle, false))
        } else if v2 {
            if is_last {
                Some(MachineState::new(MapPin, false))
            } else {
                Some(MachineState::new(Idle, true))
            }
        } else if v3 || (v4 && !is_last) {
            Some(MachineState::new(Deactivated, !self.options.hide_arrow_on_next_target))
        } else if !is_last {
            Some(MachineState::HIDDEN)
        } else {
            None
        };

        (next, !v3)
    }

    fn set_state(&mut self, next: MachineState) {
        use SignpostStateType::{Hidden, MapPin};
        let prev = self.state;

        if prev.kind == Hidden && next.kind != Hidden {
            self.effects.push(VisualEffect::Activate(SignpostPart::Root));
            self.deactivate_arrow();
            self.deactivate_pin();
        } else if prev.kind != Hidden && next.kind == Hidden {
            self.effects.push(VisualEffect::Deactivate(SignpostPart::Root));
            self.deactivate_arrow();
            self.deactivate_pin();
        }

        if next.has_arrow && !prev.has_arrow {
            self.arrow_active = true;
            self.arrow_time = 0.0;
            self.effects.push(VisualEffect::Activate(SignpostPart::Arrow));
            self.effects.push(VisualEffect::ResetTimer(SignpostPart::Arrow));
        } else if !next.has_arrow && prev.has_arrow {
            self.deactivate_arrow();
        }

        if next.kind == MapPin && prev.kind != MapPin {
            self.pin_active = true;
            self.pin_time = 0.0;
            self.effects.push(VisualEffect::Activate(SignpostPart::MapPin));
            self.effects.push(VisualEffect::ResetTimer(SignpostPart::MapPin));
        } else if next.kind != MapPin && prev.kind == MapPin {
            self.deactivate_pin();
        }

        if prev != next {
            log::trace!("[signpost] {:?} -> {:?}", prev, next);
        }
        self.state = next;
    }

    fn deactivate_arrow(&mut self) {
        if self.arrow_active {
            self.arrow_active = false;
            self.effects.push(VisualEffect::Deactivate(SignpostPart::Arrow));
        }
    }

    fn deactivate_pin(&mut self) {
        if self.pin_active {
            self.pin_active = false;
            self.effects.push(VisualEffect::Deactivate(SignpostPart::MapPin));
        }
    }

    fn update_pose(&mut self, args: &SignpostEventArgs) {
        let camera_y = args.user_pos.y;
        let sign_y = camera_y + self.options.sign_height;

        let mut relative = args.target_pos - args.user_pos;
        relative.y = 0.0;
        let dir = relative.try_normalize(f64::EPSILON).unwrap_or_else(LocalPoint::zeros);

        let root = with_y(&args.target_pos, 0.0);
        self.pose.root = root;

        if self.arrow_active {
            if args.is_last_step() {
                self.deactivate_arrow();
            }

            let y = drop_and_float(
                self.arrow_time,
                sign_y,
                camera_y,
                self.options.arrow_drop_duration,
                ARROW_AMPLITUDE,
                FLOAT_FREQUENCY,
                FLOAT_LFO_AMP,
                FLOAT_LFO_FREQ,
            );
            self.arrow_time += args.delta_time;
            self.pose.arrow = Some(with_y(&root, y));

            match args.next_target_pos {
                Some(next) => self.pose.arrow_look_at = Some(with_y(&next, y)),
                None => {
                    self.deactivate_arrow();
                    self.pose.arrow_look_at = None;
                }
            }
        }
        if !self.arrow_active {
            self.pose.arrow = None;
            self.pose.arrow_look_at = None;
        }

        self.pose.sign = match self.state.kind {
            SignpostStateType::Following => {
                self.pose.sign_forward = dir;
                with_y(&args.user_pos, 0.0) + dir * self.options.follow_distance
            }
            _ => root,
        };

        if self.state.kind == SignpostStateType::MapPin && self.pin_active {
            let y = drop_and_float(
                self.pin_time,
                self.options.pin_drop_height,
                -self.ground_height + PIN_AMPLITUDE,
                self.options.pin_drop_duration,
                PIN_AMPLITUDE,
                FLOAT_FREQUENCY,
                FLOAT_LFO_AMP,
                FLOAT_LFO_FREQ,
            );
            self.pin_time += args.delta_time;
            self.pose.map_pin = Some(with_y(&self.pose.sign, y));
        } else {
            self.pose.map_pin = None;
        }

        self.pose.sign.y = sign_y;

        if self.state.kind != SignpostStateType::Hidden {
            self.pose.distance_label = format!("{:.0} m", args.distance);
            self.pose.direction_label = args.instruction.clone();
        }
    }
}

impl Signpost for SignpostStateMachine {
    fn init(&mut self, step: &StepInit) {
        self.state = MachineState::HIDDEN;
        self.ground_height = step.ground_height;
        self.arrow_active = false;
        self.pin_active = false;
        self.effects.clear();
        // sub-parts start hidden; later deactivations only follow an activation
        self.effects.extend([
            VisualEffect::Deactivate(SignpostPart::Root),
            VisualEffect::Deactivate(SignpostPart::Arrow),
            VisualEffect::Deactivate(SignpostPart::MapPin),
        ]);
    }

    fn update(&mut self, args: &SignpostEventArgs) -> bool {
        let (next, keep_target) = self.resolve(args.is_current_target, args.distance, args.is_last_step());
        if let Some(next) = next {
            self.set_state(next);
        }
        self.update_pose(args);
        keep_target
    }

    fn on_current_target(&mut self, _args: &SignpostEventArgs) {}

    fn off_current_target(&mut self, _args: &SignpostEventArgs) {}

    fn take_effects(&mut self) -> Vec<VisualEffect> {
        std::mem::take(&mut self.effects)
    }

    fn state(&self) -> Option<MachineState> {
        Some(self.state)
    }

    fn pose(&self) -> Option<&SignpostPose> {
        Some(&self.pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use SignpostPart::{Arrow, Root};
    use SignpostStateType::{Deactivated, Following, Hidden, Idle, MapPin};

    const PIN: SignpostPart = SignpostPart::MapPin;

    fn options() -> SignpostOptions {
        SignpostOptions {
            follow_distance: 10.0,
            drop_distance: 5.0,
            deactivation_distance: 2.0,
            ..Default::default()
        }
    }

    fn machine() -> SignpostStateMachine {
        let mut m = SignpostStateMachine::new(options());
        m.init(&StepInit {
            step_index: 0,
            number_of_steps: 3,
            instruction: "Turn left".into(),
            name: "Main St".into(),
            ground_height: 1.4,
        });
        m.take_effects();
        m
    }

    fn args(distance: f64, is_current: bool, step_index: usize, number_of_steps: usize) -> SignpostEventArgs {
        SignpostEventArgs {
            target_pos: LocalPoint::new(0.0, 0.0, distance),
            next_target_pos: Some(LocalPoint::new(10.0, 0.0, distance)),
            prev_target_pos: None,
            user_pos: LocalPoint::new(0.0, 1.5, 0.0),
            distance,
            is_current_target: is_current,
            step_index,
            instruction: "Turn left".into(),
            name: "Main St".into(),
            delta_time: 0.1,
            number_of_steps,
        }
    }

    fn kind(m: &SignpostStateMachine) -> SignpostStateType {
        m.current_state().kind
    }

    #[test]
    fn test_thresholds_for_current_target() {
        let m = machine();
        let (s, keep) = m.resolve(true, 12.0, false);
        assert_eq!(s, Some(MachineState::new(Following, false)));
        assert!(keep);

        let (s, _) = m.resolve(true, 7.0, false);
        assert_eq!(s, Some(MachineState::new(Idle, false)));

        let (s, _) = m.resolve(true, 3.0, false);
        assert_eq!(s, Some(MachineState::new(Idle, true)));

        let (s, _) = m.resolve(true, 3.0, true);
        assert_eq!(s, Some(MachineState::new(MapPin, false)));

        let (s, keep) = m.resolve(true, 1.0, false);
        assert_eq!(s, Some(MachineState::new(Deactivated, true)));
        assert!(!keep);
    }

    #[test]
    fn test_non_current_targets() {
        let m = machine();
        let (s, keep) = m.resolve(false, 1.0, false);
        assert_eq!(s.map(|s| s.kind), Some(Deactivated));
        assert!(keep);

        let (s, _) = m.resolve(false, 50.0, false);
        assert_eq!(s, Some(MachineState::HIDDEN));

        // last step, not current: nothing applies
        assert_eq!(m.resolve(false, 50.0, true).0, None);
        assert_eq!(m.resolve(false, 1.0, true).0, None);
    }

    #[test]
    fn test_current_last_step_inside_deactivation_still_deactivates() {
        let m = machine();
        let (s, keep) = m.resolve(true, 0.5, true);
        assert_eq!(s.map(|s| s.kind), Some(Deactivated));
        assert!(!keep);
    }

    #[test]
    fn test_hide_arrow_on_next_target() {
        let m = SignpostStateMachine::new(SignpostOptions {
            hide_arrow_on_next_target: true,
            ..options()
        });
        let (s, _) = m.resolve(true, 1.0, false);
        assert_eq!(s, Some(MachineState::new(Deactivated, false)));
    }

    #[test]
    fn test_hidden_to_visible_effects() {
        let mut m = machine();
        m.update(&args(12.0, true, 0, 3));
        assert_eq!(kind(&m), Following);
        assert_eq!(m.take_effects(), vec![VisualEffect::Activate(Root)]);

        // no change, no effects
        m.update(&args(11.0, true, 0, 3));
        assert!(m.take_effects().is_empty());

        m.update(&args(50.0, false, 0, 3));
        assert_eq!(kind(&m), Hidden);
        assert_eq!(m.take_effects()[0], VisualEffect::Deactivate(Root));
    }

    #[test]
    fn test_hiding_deactivated_sign_drops_arrow_once() {
        let mut m = machine();
        m.update(&args(1.0, true, 0, 3));
        assert_eq!(m.current_state(), MachineState::new(Deactivated, true));
        assert_eq!(
            m.take_effects(),
            vec![
                VisualEffect::Activate(Root),
                VisualEffect::Activate(Arrow),
                VisualEffect::ResetTimer(Arrow),
            ]
        );

        m.update(&args(50.0, false, 0, 3));
        assert_eq!(kind(&m), Hidden);
        assert_eq!(
            m.take_effects(),
            vec![VisualEffect::Deactivate(Root), VisualEffect::Deactivate(Arrow)]
        );
        assert!(!m.is_arrow_active());
    }

    #[test]
    fn test_init_hides_every_part() {
        let mut m = SignpostStateMachine::new(options());
        m.init(&StepInit {
            step_index: 1,
            number_of_steps: 3,
            instruction: String::new(),
            name: String::new(),
            ground_height: 1.4,
        });
        assert_eq!(
            m.take_effects(),
            vec![
                VisualEffect::Deactivate(Root),
                VisualEffect::Deactivate(Arrow),
                VisualEffect::Deactivate(PIN),
            ]
        );
    }

    #[test]
    fn test_arrow_gained_resets_timer() {
        let mut m = machine();
        m.update(&args(7.0, true, 0, 3));
        m.take_effects();

        m.update(&args(3.0, true, 0, 3));
        assert_eq!(
            m.take_effects(),
            vec![VisualEffect::Activate(Arrow), VisualEffect::ResetTimer(Arrow)]
        );
        assert!(m.is_arrow_active());
        assert!(m.pose().and_then(|p| p.arrow).is_some());

        m.update(&args(7.0, true, 0, 3));
        assert_eq!(m.take_effects(), vec![VisualEffect::Deactivate(Arrow)]);
        assert!(!m.is_arrow_active());
    }

    #[test]
    fn test_map_pin_on_last_step() {
        let mut m = machine();
        m.update(&args(7.0, true, 2, 3));
        m.take_effects();
        m.update(&args(3.0, true, 2, 3));
        assert_eq!(kind(&m), MapPin);
        assert_eq!(
            m.take_effects(),
            vec![VisualEffect::Activate(PIN), VisualEffect::ResetTimer(PIN)]
        );

        let pin = m.pose().and_then(|p| p.map_pin);
        assert!(pin.is_some());

        m.update(&args(7.0, true, 2, 3));
        assert_eq!(m.take_effects(), vec![VisualEffect::Deactivate(PIN)]);
    }

    #[test]
    fn test_arrow_hidden_without_next_target() {
        let mut m = machine();
        let mut a = args(3.0, true, 0, 3);
        a.next_target_pos = None;
        m.update(&a);
        assert!(!m.is_arrow_active());
        assert!(m.pose().and_then(|p| p.arrow).is_none());
    }

    #[test]
    fn test_following_sign_sits_ahead_of_user() {
        let mut m = machine();
        m.update(&args(30.0, true, 0, 3));
        let pose = m.pose().cloned().unwrap_or_default();
        assert_abs_diff_eq!(pose.sign.z, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pose.sign.x, 0.0, epsilon = 1e-9);
        // camera height + sign height
        assert_abs_diff_eq!(pose.sign.y, 3.5, epsilon = 1e-9);
        assert_abs_diff_eq!(pose.root.z, 30.0, epsilon = 1e-9);
        assert_eq!(pose.distance_label, "30 m");
        assert_eq!(pose.direction_label, "Turn left");
    }

    #[test]
    fn test_ease_and_drop_curve() {
        assert_abs_diff_eq!(ease_out_cubic(10.0, 0.0, 0.0), 10.0);
        assert_abs_diff_eq!(ease_out_cubic(10.0, 0.0, 1.0), 0.0);
        assert!(ease_out_cubic(10.0, 0.0, 0.5) < 5.0);

        // start of the drop is at start_y
        assert_abs_diff_eq!(drop_and_float(0.0, 50.0, 0.0, 1.5, 1.0, 0.3, 0.1, 0.02), 50.0);
        // just after the drop, the float starts at the bottom of its swing
        let y = drop_and_float(1.5, 50.0, 0.0, 1.5, 1.0, 0.3, 0.1, 0.02);
        assert_abs_diff_eq!(y, -0.5, epsilon = 1e-9);
        // the bob stays within end_y - amp/2 .. end_y + 1.5 amp (+lfo)
        for i in 0..200 {
            let y = drop_and_float(1.5 + i as f64 * 0.1, 50.0, 0.0, 1.5, 1.0, 0.3, 0.1, 0.02);
            assert!(y > -0.71 && y < 1.71, "y = {}", y);
        }
    }
}
