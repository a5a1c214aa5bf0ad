use crate::types::{horizontal, LocalPoint};
use std::collections::VecDeque;

/// First-order low-pass filter.
///
/// `factor` is the weight kept from the previous output: 0 passes input through.
#[derive(Clone, Debug)]
pub struct LowPassFilter {
    pub factor: f64,
    value: Option<f64>,
}

impl LowPassFilter {
    pub fn new(factor: f64) -> Self {
        LowPassFilter {
            factor: factor.clamp(0.0, 1.0),
            value: None,
        }
    }

    pub fn apply(&mut self, input: f64) -> f64 {
        let out = match self.value {
            Some(prev) => self.factor * prev + (1.0 - self.factor) * input,
            None => input,
        };
        self.value = Some(out);
        out
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Low-pass filter for headings. Filters sin/cos separately so the 359 -> 0 wrap is continuous.
#[derive(Clone, Debug)]
pub struct AngleLowPassFilter {
    sin: LowPassFilter,
    cos: LowPassFilter,
}

impl AngleLowPassFilter {
    pub fn new(factor: f64) -> Self {
        AngleLowPassFilter {
            sin: LowPassFilter::new(factor),
            cos: LowPassFilter::new(factor),
        }
    }

    pub fn factor(&self) -> f64 {
        self.sin.factor
    }

    pub fn set_factor(&mut self, factor: f64) {
        let factor = factor.clamp(0.0, 1.0);
        self.sin.factor = factor;
        self.cos.factor = factor;
    }

    /// Returns degrees in (-180, 180]; passthrough when the factor is zero.
    pub fn apply(&mut self, angle_deg: f64) -> f64 {
        if self.sin.factor <= 0.0 {
            return angle_deg;
        }
        let (s, c) = angle_deg.to_radians().sin_cos();
        let fs = self.sin.apply(s);
        let fc = self.cos.apply(c);
        fs.atan2(fc).to_degrees()
    }

    pub fn reset(&mut self) {
        self.sin.reset();
        self.cos.reset();
    }
}

/// Accuracy-weighted average over the most recent computed positions.
///
/// Each sample is weighted by `exp(-lambda * (accuracy - a_min))`, where lambda is chosen
/// so the weight decays to `cutoff` at `a_max`. Samples at or beyond `a_max` carry no weight.
pub struct MovingAveragePosition {
    window: VecDeque<(LocalPoint, f64)>,
    window_size: usize,
    pub a_min: f64,
    pub a_max: f64,
    pub cutoff: f64,
    average: Option<LocalPoint>,
}

impl MovingAveragePosition {
    pub const DEFAULT_WINDOW: usize = 10;
    pub const DEFAULT_A_MAX: f64 = 20.0;

    /// Create a new average with the given window size and accuracy cap (metres)
    pub fn new(window_size: usize, a_max: f64) -> Self {
        MovingAveragePosition {
            window: VecDeque::with_capacity(window_size.max(1)),
            window_size: window_size.max(1),
            a_min: 2.0,
            a_max,
            cutoff: 0.01,
            average: None,
        }
    }

    pub fn weight(&self, accuracy: f64) -> f64 {
        if accuracy <= self.a_min {
            return 1.0;
        }
        if accuracy >= self.a_max || self.a_max <= self.a_min {
            return 0.0;
        }
        let lambda = (1.0 / self.cutoff).ln() / (self.a_max - self.a_min);
        (-lambda * (accuracy - self.a_min)).exp()
    }

    /// Add a sample and return the updated average.
    ///
    /// # Arguments
    /// * `position` - root-local position computed from the reading
    /// * `accuracy` - reported accuracy radius of the reading, metres
    ///
    /// # Returns
    /// The weighted mean of the window; if every sample is weightless, the previous
    /// average (or the newest sample when there is none yet).
    pub fn add_entry(&mut self, position: LocalPoint, accuracy: f64) -> LocalPoint {
        let w = self.weight(accuracy);
        self.window.push_back((position, w));
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let total: f64 = self.window.iter().map(|(_, w)| w).sum();
        let avg = if total > 0.0 {
            self.window
                .iter()
                .fold(LocalPoint::zeros(), |acc, (p, w)| acc + p * *w)
                / total
        } else {
            self.average.unwrap_or(position)
        };

        self.average = Some(avg);
        avg
    }

    pub fn average(&self) -> Option<LocalPoint> {
        self.average
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.average = None;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmoothMoveMode {
    /// Only x/z are animated; y is left to whoever owns it.
    Horizontal,
    Full,
}

/// Result of advancing a [`SmoothMove`] by one tick
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmoothStep {
    pub position: LocalPoint,
    /// True exactly on the tick the target is reached
    pub arrived: bool,
}

/// Exponential approach of a position toward a target, one tick at a time.
#[derive(Clone, Debug)]
pub struct SmoothMove {
    pub factor: f64,
    pub precision: f64,
    pub mode: SmoothMoveMode,
    target: Option<LocalPoint>,
}

impl SmoothMove {
    pub const DEFAULT_PRECISION: f64 = 0.05;

    pub fn new(factor: f64, mode: SmoothMoveMode) -> Self {
        SmoothMove {
            factor,
            precision: Self::DEFAULT_PRECISION,
            mode,
            target: None,
        }
    }

    /// Replace the target; an in-flight move continues toward the new one.
    pub fn move_to(&mut self, target: LocalPoint) {
        self.target = Some(target);
    }

    pub fn target(&self) -> Option<LocalPoint> {
        self.target
    }

    pub fn is_moving(&self) -> bool {
        self.target.is_some()
    }

    pub fn cancel(&mut self) {
        self.target = None;
    }

    pub fn step(&mut self, current: LocalPoint, dt: f64) -> SmoothStep {
        let target = match self.target {
            Some(t) => t,
            None => {
                return SmoothStep {
                    position: current,
                    arrived: false,
                }
            }
        };

        let goal = match self.mode {
            SmoothMoveMode::Horizontal => LocalPoint::new(target.x, current.y, target.z),
            SmoothMoveMode::Full => target,
        };
        let gap = match self.mode {
            SmoothMoveMode::Horizontal => (horizontal(&current) - horizontal(&goal)).norm(),
            SmoothMoveMode::Full => (current - goal).norm(),
        };

        if gap <= self.precision {
            self.target = None;
            return SmoothStep {
                position: goal,
                arrived: true,
            };
        }

        let t = crate::types::approach_weight(self.factor, dt);
        SmoothStep {
            position: current.lerp(&goal, t),
            arrived: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_low_pass_first_value_passes_through() {
        let mut lp = LowPassFilter::new(0.9);
        assert_eq!(lp.apply(5.0), 5.0);
        let next = lp.apply(15.0);
        // 0.9 * 5 + 0.1 * 15 = 6.0
        assert!((next - 6.0).abs() < 0.001);
    }

    #[test]
    fn test_angle_low_pass_wraps_north() {
        let mut lp = AngleLowPassFilter::new(0.5);
        lp.apply(350.0);
        let out = lp.apply(10.0);
        assert_abs_diff_eq!(out, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_angle_low_pass_zero_factor_passthrough() {
        let mut lp = AngleLowPassFilter::new(0.0);
        assert_eq!(lp.apply(275.0), 275.0);
    }

    #[test]
    fn test_moving_average_weights() {
        let avg = MovingAveragePosition::new(5, 20.0);
        assert_eq!(avg.weight(1.0), 1.0);
        assert_eq!(avg.weight(25.0), 0.0);
        let mid = avg.weight(11.0);
        assert!(mid > 0.01 && mid < 1.0);
        assert_abs_diff_eq!(avg.weight(19.999_999), 0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_moving_average_prefers_accurate_samples() {
        let mut avg = MovingAveragePosition::new(5, 20.0);
        avg.add_entry(LocalPoint::new(0.0, 0.0, 0.0), 1.0);
        let out = avg.add_entry(LocalPoint::new(10.0, 0.0, 0.0), 15.0);
        assert!(out.x > 0.0 && out.x < 2.0, "x = {}", out.x);
    }

    #[test]
    fn test_moving_average_window_wrapping() {
        let mut avg = MovingAveragePosition::new(2, 20.0);
        avg.add_entry(LocalPoint::new(0.0, 0.0, 0.0), 1.0);
        avg.add_entry(LocalPoint::new(2.0, 0.0, 0.0), 1.0);
        let out = avg.add_entry(LocalPoint::new(4.0, 0.0, 0.0), 1.0);
        assert_eq!(avg.len(), 2);
        assert!((out.x - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_moving_average_weightless_sample_keeps_previous() {
        let mut avg = MovingAveragePosition::new(1, 20.0);
        avg.add_entry(LocalPoint::new(1.0, 0.0, 1.0), 1.0);
        let out = avg.add_entry(LocalPoint::new(50.0, 0.0, 50.0), 40.0);
        assert_abs_diff_eq!(out.x, 1.0);
    }

    #[test]
    fn test_smooth_move_converges_and_reports_arrival_once() {
        let mut mv = SmoothMove::new(0.05, SmoothMoveMode::Full);
        mv.move_to(LocalPoint::new(10.0, 0.0, 0.0));

        let mut pos = LocalPoint::zeros();
        let mut arrivals = 0;
        for _ in 0..600 {
            let step = mv.step(pos, 1.0 / 60.0);
            pos = step.position;
            if step.arrived {
                arrivals += 1;
            }
        }

        assert_eq!(arrivals, 1);
        assert_eq!(pos, LocalPoint::new(10.0, 0.0, 0.0));
        assert!(!mv.is_moving());
    }

    #[test]
    fn test_smooth_move_horizontal_keeps_height() {
        let mut mv = SmoothMove::new(0.0, SmoothMoveMode::Horizontal);
        mv.move_to(LocalPoint::new(3.0, 9.0, 4.0));
        let step = mv.step(LocalPoint::new(0.0, -1.4, 0.0), 0.1);
        // factor 0 reaches the goal in one tick; the next tick reports arrival
        assert_abs_diff_eq!(step.position.y, -1.4);
        let step = mv.step(step.position, 0.1);
        assert!(step.arrived);
        assert_abs_diff_eq!(step.position.x, 3.0);
    }
}
