//! Crossfader gain curves

use crate::domain::dsp::Smoothed;
use serde::{Deserialize, Serialize};

/// Shape of the left/right gain law
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadeCurve {
    /// Full level until the centre, then a straight line to silence
    #[default]
    LinearKnee,
    /// Logarithmic upper half, linear tail below the centre
    TwoStageLog,
    /// Fast exponential rise that saturates early
    Exponential,
}

impl CrossfadeCurve {
    const LOG_KNEE: f32 = 0.35386;
    const EXP_RATE: f32 = 8.0;
    /// Normalises the curve so it reaches unity just past y = 3/8
    const EXP_SCALE: f32 = 0.950_495_36;

    pub fn from_control(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" | "linear" | "linear_knee" => Some(Self::LinearKnee),
            "1" | "log" | "two_stage_log" => Some(Self::TwoStageLog),
            "2" | "exp" | "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }

    /// Gain of a channel `y` of the way toward its own side (0..=1)
    pub fn gain(self, y: f32) -> f32 {
        let y = y.clamp(0.0, 1.0);
        match self {
            Self::LinearKnee => (2.0 * y).min(1.0),
            Self::TwoStageLog => {
                if y >= 0.5 {
                    Self::LOG_KNEE.powf(2.0 * (1.0 - y))
                } else {
                    Self::LOG_KNEE * 2.0 * y
                }
            }
            Self::Exponential => ((1.0 - (-Self::EXP_RATE * y).exp()) / Self::EXP_SCALE).min(1.0),
        }
    }

    /// Left and right gains for a fader `position` (0 is fully left)
    pub fn gains(self, position: f32) -> (f32, f32) {
        let x = position.clamp(0.0, 1.0);
        (self.gain(1.0 - x), self.gain(x))
    }
}

/// Fader position moving toward its target at a rate set by the fade time
#[derive(Debug, Clone, Copy)]
pub struct Crossfader {
    curve: CrossfadeCurve,
    position: Smoothed,
    gains: (f32, f32),
}

impl Crossfader {
    const MIN_TIME_SEC: f32 = 0.01;

    pub fn new(curve: CrossfadeCurve, position: f32) -> Self {
        let position = position.clamp(0.0, 1.0);
        Self {
            curve,
            position: Smoothed::new(position, 1.0),
            gains: curve.gains(position),
        }
    }

    /// Time for a full left-to-right sweep given the control tick rate
    pub fn set_time(&mut self, seconds: f32, ticks_per_second: f32) {
        let ticks = seconds.max(Self::MIN_TIME_SEC) * ticks_per_second;
        self.position.set_step(1.0 / ticks.max(1.0));
    }

    pub fn set_curve(&mut self, curve: CrossfadeCurve) {
        self.curve = curve;
        self.gains = curve.gains(self.position.value());
    }

    pub fn curve(&self) -> CrossfadeCurve {
        self.curve
    }

    pub fn set_target(&mut self, position: f32) {
        self.position.set_target(position.clamp(0.0, 1.0));
    }

    pub fn position(&self) -> f32 {
        self.position.value()
    }

    /// Advance one control tick and return the (left, right) gains
    pub fn tick(&mut self) -> (f32, f32) {
        if !self.position.is_settled() {
            let x = self.position.tick();
            self.gains = self.curve.gains(x);
        }
        self.gains
    }

    pub fn gains(&self) -> (f32, f32) {
        self.gains
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURVES: [CrossfadeCurve; 3] = [
        CrossfadeCurve::LinearKnee,
        CrossfadeCurve::TwoStageLog,
        CrossfadeCurve::Exponential,
    ];

    #[test]
    fn test_midpoint_symmetry() {
        for curve in CURVES {
            let (l, r) = curve.gains(0.5);
            assert!((l - r).abs() < 1e-6, "{curve:?}");
        }
    }

    #[test]
    fn test_extremes() {
        for curve in CURVES {
            assert_eq!(curve.gains(0.0), (1.0, 0.0), "{curve:?}");
            assert_eq!(curve.gains(1.0), (0.0, 1.0), "{curve:?}");
        }
    }

    #[test]
    fn test_curve_shapes() {
        assert_eq!(CrossfadeCurve::LinearKnee.gain(0.25), 0.5);
        assert!((CrossfadeCurve::TwoStageLog.gain(0.5) - 0.35386).abs() < 1e-5);
        assert!((CrossfadeCurve::TwoStageLog.gain(0.25) - 0.17693).abs() < 1e-5);
        assert!((CrossfadeCurve::Exponential.gain(0.375) - 1.0).abs() < 1e-3);
        assert_eq!(CrossfadeCurve::Exponential.gain(0.4), 1.0);
        assert!(CrossfadeCurve::Exponential.gain(0.1) < 0.6);
    }

    #[test]
    fn test_curves_are_monotonic() {
        for curve in CURVES {
            let mut last = 0.0;
            for i in 0..=100 {
                let g = curve.gain(i as f32 / 100.0);
                assert!(g >= last - 1e-6, "{curve:?} at {i}");
                last = g;
            }
        }
    }

    #[test]
    fn test_crossfader_moves_at_set_rate() {
        let mut fader = Crossfader::new(CrossfadeCurve::LinearKnee, 0.0);
        fader.set_time(1.0, 100.0);
        fader.set_target(1.0);
        for _ in 0..50 {
            fader.tick();
        }
        assert!((fader.position() - 0.5).abs() < 1e-4);
        for _ in 0..60 {
            fader.tick();
        }
        assert_eq!(fader.position(), 1.0);
        assert_eq!(fader.gains(), (0.0, 1.0));
    }

    #[test]
    fn test_from_control() {
        assert_eq!(
            CrossfadeCurve::from_control("exp"),
            Some(CrossfadeCurve::Exponential)
        );
        assert_eq!(CrossfadeCurve::from_control("wiggle"), None);
    }
}
