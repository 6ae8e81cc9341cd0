//! Simulated analog RC filters
//!
//! The one-pole stages are discretised RC networks; the two-pole stage is a
//! trapezoidal state-variable arrangement tuned from the same RC time
//! constant. Several filters can share one [`RcCoeffs`] value but each keeps
//! its own state, and an instance is used in one mode only.

use serde::{Deserialize, Serialize};

/// Coefficients for an RC filter at a given cutoff, Q and sample rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RcCoeffs {
    /// RC/(RC + dt): the one-pole highpass coefficient
    pub a: f32,
    /// dt/(RC + dt): the one-pole lowpass coefficient
    pub f: f32,
    /// dt/(2·RC): integrator gain of the two-pole stage
    pub g: f32,
    /// 1/Q
    pub damping: f32,
}

impl RcCoeffs {
    pub const Q_MIN: f32 = 0.7;
    pub const Q_MAX: f32 = 8.0;
    pub const CUTOFF_MIN: f32 = 10.0;

    /// Derive coefficients for `cutoff` Hz (limited to 0.4 × sample rate)
    #[must_use]
    pub fn new(cutoff: f32, q: f32, sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let cutoff = cutoff.clamp(Self::CUTOFF_MIN, sr * 0.4);
        let dt = 1.0 / sr;
        let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff);
        let a = 1.0 - dt / (rc + dt);
        Self {
            a,
            f: 1.0 - a,
            g: dt / (2.0 * rc),
            damping: 1.0 / q.clamp(Self::Q_MIN, Self::Q_MAX),
        }
    }

    /// Butterworth-damped coefficients
    #[must_use]
    pub fn butterworth(cutoff: f32, sample_rate: u32) -> Self {
        Self::new(cutoff, std::f32::consts::FRAC_1_SQRT_2, sample_rate)
    }
}

/// Simultaneous outputs of the two-pole stage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RcOutputs {
    pub lowpass: f32,
    pub bandpass: f32,
    pub highpass: f32,
}

/// One RC filter instance
#[derive(Debug, Clone)]
pub struct RcFilter {
    coeffs: RcCoeffs,
    last_input: f32,
    lp: f32,
    bp: f32,
    hp: f32,
    ap: f32,
}

impl RcFilter {
    pub fn new(coeffs: RcCoeffs) -> Self {
        Self {
            coeffs,
            last_input: 0.0,
            lp: 0.0,
            bp: 0.0,
            hp: 0.0,
            ap: 0.0,
        }
    }

    /// Replace the coefficients, keeping state so the change is click-free
    pub fn set_coeffs(&mut self, coeffs: RcCoeffs) {
        self.coeffs = coeffs;
    }

    pub fn coeffs(&self) -> RcCoeffs {
        self.coeffs
    }

    pub fn reset(&mut self) {
        self.last_input = 0.0;
        self.lp = 0.0;
        self.bp = 0.0;
        self.hp = 0.0;
        self.ap = 0.0;
    }

    /// One-pole lowpass (6 dB/oct)
    #[inline]
    pub fn lowpass(&mut self, x: f32) -> f32 {
        self.lp += self.coeffs.f * (x - self.lp);
        self.lp
    }

    /// One-pole highpass (6 dB/oct)
    #[inline]
    pub fn highpass(&mut self, x: f32) -> f32 {
        self.hp = self.coeffs.a * (self.hp + x - self.last_input);
        self.last_input = x;
        self.hp
    }

    /// First-order allpass: unity magnitude, 90° of phase shift at the cutoff
    #[inline]
    pub fn allpass(&mut self, x: f32) -> f32 {
        let c = (self.coeffs.g - 1.0) / (self.coeffs.g + 1.0);
        self.ap = c * x + self.last_input - c * self.ap;
        self.last_input = x;
        self.ap
    }

    /// Two-pole state-variable stage (12 dB/oct)
    ///
    /// `lp` and `bp` hold the trapezoidal integrator states.
    #[inline]
    pub fn two_pole(&mut self, x: f32) -> RcOutputs {
        let g = self.coeffs.g;
        let k = self.coeffs.damping;
        let a1 = 1.0 / (1.0 + g * (g + k));
        let a2 = g * a1;
        let a3 = g * a2;

        let v3 = x - self.lp;
        let v1 = a1 * self.bp + a2 * v3;
        let v2 = self.lp + a2 * self.bp + a3 * v3;
        self.bp = 2.0 * v1 - self.bp;
        self.lp = 2.0 * v2 - self.lp;
        self.hp = x - k * v1 - v2;

        RcOutputs {
            lowpass: v2,
            bandpass: v1,
            highpass: self.hp,
        }
    }
}
