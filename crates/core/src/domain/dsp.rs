//! Shared DSP utilities for the mixing pipeline
//!
//! This module provides the small building blocks every other stage uses:
//! - dB/linear conversion tables with exact fallbacks
//! - Stereo peak limiter and slow normalizer
//! - Round-robin peak followers and the peak-hold meter filter
//! - Fade envelopes and bounded-step smoothed control values
//!
//! Everything here is allocation-free once constructed and safe to call from
//! the realtime callback.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Parameter constraints shared by the DSP stages
pub mod params {
    /// Lowest level represented by the dB tables (treated as silence)
    pub const DB_FLOOR: f32 = -127.0;
    /// Highest level represented by the dB tables
    pub const DB_CEILING: f32 = 27.0;
    /// Resolution of the dB to linear table
    pub const DB_TABLE_STEP: f32 = 0.05;
    /// Entries in the linear to dB table covering [0, 1]
    pub const LIN_TABLE_SIZE: usize = 65_536;

    /// A fade is complete once its gain falls below this level
    pub const FADE_FLOOR: f32 = 1e-6;

    /// Attack/Release time ranges in seconds
    pub const ATTACK_MIN: f32 = 0.0001;
    pub const ATTACK_MAX: f32 = 1.0;
    pub const RELEASE_MIN: f32 = 0.001;
    pub const RELEASE_MAX: f32 = 10.0;
}

/// Convert decibels to linear gain (exact)
pub fn db_to_gain(db: f32) -> f32 {
    if db.is_nan() || db <= params::DB_FLOOR {
        0.0
    } else {
        10.0_f32.powf(db / 20.0)
    }
}

/// Convert linear gain to decibels (exact)
pub fn gain_to_db(gain: f32) -> f32 {
    let gain = gain.abs();
    if gain.is_nan() || gain <= 0.0 {
        params::DB_FLOOR
    } else {
        (20.0 * gain.log10()).max(params::DB_FLOOR)
    }
}

/// One-pole smoothing coefficient for a time constant
#[inline]
pub fn time_coeff(seconds: f32, sample_rate: f32) -> f32 {
    if seconds <= 0.0 {
        0.0
    } else {
        (-1.0 / (seconds * sample_rate)).exp()
    }
}

// ============================================================================
// DB TABLES
// ============================================================================

/// Precomputed dB conversion tables
///
/// Built once at startup and shared read-only afterwards. Values outside the
/// table ranges use the exact conversions.
#[derive(Debug)]
pub struct DbTables {
    db2lin: Vec<f32>,
    lin2db: Vec<f32>,
}

impl DbTables {
    pub fn new() -> Self {
        let entries =
            ((params::DB_CEILING - params::DB_FLOOR) / params::DB_TABLE_STEP).round() as usize + 2;
        let db2lin = (0..entries)
            .map(|i| db_to_gain(params::DB_FLOOR + i as f32 * params::DB_TABLE_STEP))
            .collect();

        let last = (params::LIN_TABLE_SIZE - 1) as f32;
        let lin2db = (0..params::LIN_TABLE_SIZE)
            .map(|i| gain_to_db(i as f32 / last))
            .collect();

        Self { db2lin, lin2db }
    }

    /// Process-wide tables, built on first use
    pub fn global() -> &'static DbTables {
        static TABLES: OnceLock<DbTables> = OnceLock::new();
        TABLES.get_or_init(DbTables::new)
    }

    /// Table-driven dB to linear conversion
    #[inline]
    pub fn db_to_lin(&self, db: f32) -> f32 {
        if db.is_nan() || db <= params::DB_FLOOR {
            return 0.0;
        }
        if db >= params::DB_CEILING {
            return db_to_gain(db);
        }
        let pos = (db - params::DB_FLOOR) / params::DB_TABLE_STEP;
        let idx = pos as usize;
        let frac = pos - idx as f32;
        let a = self.db2lin[idx];
        let b = self.db2lin[(idx + 1).min(self.db2lin.len() - 1)];
        a + (b - a) * frac
    }

    /// Table-driven linear to dB conversion
    #[inline]
    pub fn lin_to_db(&self, lin: f32) -> f32 {
        let lin = lin.abs();
        if lin.is_nan() {
            return params::DB_FLOOR;
        }
        if lin >= 1.0 {
            return gain_to_db(lin);
        }
        let pos = lin * (params::LIN_TABLE_SIZE - 1) as f32;
        let idx = pos as usize;
        if idx == 0 {
            // log curve is too steep near zero for interpolation
            return gain_to_db(lin);
        }
        let frac = pos - idx as f32;
        let a = self.lin2db[idx];
        let b = self.lin2db[(idx + 1).min(self.lin2db.len() - 1)];
        a + (b - a) * frac
    }
}

impl Default for DbTables {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// LIMITER
// ============================================================================

/// Stereo peak limiter
///
/// A gain-reduction envelope follows `threshold / peak` with independent
/// attack and release time constants; a final clamp keeps every sample
/// inside the threshold.
#[derive(Debug, Clone)]
pub struct Limiter {
    threshold: f32,
    attack_coeff: f32,
    release_coeff: f32,
    gain: f32,
}

impl Limiter {
    /// Create a limiter with a 1 ms attack and a 250 ms release
    pub fn new(sample_rate: u32, threshold: f32) -> Self {
        let mut limiter = Self {
            threshold: threshold.clamp(0.0, 1.0),
            attack_coeff: 0.0,
            release_coeff: 0.0,
            gain: 1.0,
        };
        limiter.set_times(0.001, 0.25, sample_rate);
        limiter
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Set attack and release time constants in seconds
    pub fn set_times(&mut self, attack_sec: f32, release_sec: f32, sample_rate: u32) {
        let sr = sample_rate as f32;
        let attack = attack_sec.clamp(params::ATTACK_MIN, params::ATTACK_MAX);
        let release = release_sec.clamp(params::RELEASE_MIN, params::RELEASE_MAX);
        self.attack_coeff = time_coeff(attack, sr);
        self.release_coeff = time_coeff(release, sr);
    }

    /// Process one stereo frame
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let peak = left.abs().max(right.abs());
        let target = if peak > self.threshold {
            self.threshold / peak
        } else {
            1.0
        };

        let coeff = if target < self.gain {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.gain = target + (self.gain - target) * coeff;

        let t = self.threshold;
        (
            (left * self.gain).clamp(-t, t),
            (right * self.gain).clamp(-t, t),
        )
    }

    /// Current gain reduction in dB (0 when idle)
    pub fn gain_reduction_db(&self) -> f32 {
        gain_to_db(self.gain)
    }

    pub fn reset(&mut self) {
        self.gain = 1.0;
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// Normalizer settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerSettings {
    pub enabled: bool,
    /// Level the normalizer steers the stream towards
    pub ceiling_db: f32,
    /// Most make-up gain it will ever apply
    pub max_gain_db: f32,
    /// Time constant for increasing gain
    pub rise_sec: f32,
    /// Time constant for decreasing gain
    pub fall_sec: f32,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ceiling_db: -12.0,
            max_gain_db: 12.0,
            rise_sec: 4.0,
            fall_sec: 0.5,
        }
    }
}

/// Slow stereo gain rider used once on the stream bus
#[derive(Debug, Clone)]
pub struct Normalizer {
    settings: NormalizerSettings,
    ceiling: f32,
    max_gain: f32,
    rise_coeff: f32,
    fall_coeff: f32,
    level_decay: f32,
    level: f32,
    gain: f32,
}

impl Normalizer {
    pub fn new(sample_rate: u32, settings: NormalizerSettings) -> Self {
        let mut normalizer = Self {
            settings,
            ceiling: 0.0,
            max_gain: 1.0,
            rise_coeff: 0.0,
            fall_coeff: 0.0,
            level_decay: time_coeff(0.5, sample_rate as f32),
            level: 0.0,
            gain: 1.0,
        };
        normalizer.set_settings(settings, sample_rate);
        normalizer
    }

    pub fn set_settings(&mut self, settings: NormalizerSettings, sample_rate: u32) {
        let sr = sample_rate as f32;
        self.settings = settings;
        self.ceiling = db_to_gain(settings.ceiling_db.clamp(-60.0, 0.0));
        self.max_gain = db_to_gain(settings.max_gain_db.clamp(0.0, 24.0));
        self.rise_coeff =
            time_coeff(settings.rise_sec.clamp(params::RELEASE_MIN, params::RELEASE_MAX), sr);
        self.fall_coeff =
            time_coeff(settings.fall_sec.clamp(params::RELEASE_MIN, params::RELEASE_MAX), sr);
        if !settings.enabled {
            self.gain = 1.0;
        }
    }

    pub fn settings(&self) -> NormalizerSettings {
        self.settings
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Process one stereo frame
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        if !self.settings.enabled {
            return (left, right);
        }

        let peak = left.abs().max(right.abs());
        self.level = if peak > self.level {
            peak
        } else {
            self.level * self.level_decay
        };

        let target = (self.ceiling / self.level.max(1e-6)).min(self.max_gain);
        let coeff = if target < self.gain {
            self.fall_coeff
        } else {
            self.rise_coeff
        };
        self.gain = target + (self.gain - target) * coeff;

        (left * self.gain, right * self.gain)
    }
}

// ============================================================================
// PEAK FOLLOWERS
// ============================================================================

/// Four-slot round-robin peak follower
///
/// Each slot holds the largest magnitude seen since it was last cleared.
/// Slots are cleared in turn at quarter offsets of `period`, so the
/// reported peak always covers at least the last three quarters of a
/// period and drops off a cliff instead of decaying.
#[derive(Debug, Clone)]
pub struct RoundRobinPeak {
    slots: [f32; 4],
    quarter: usize,
    counter: usize,
}

impl RoundRobinPeak {
    pub fn new(period: usize) -> Self {
        Self {
            slots: [0.0; 4],
            quarter: (period / 4).max(1),
            counter: 0,
        }
    }

    /// Samples covered by one full rotation
    pub fn period(&self) -> usize {
        self.quarter * 4
    }

    pub fn set_period(&mut self, period: usize) {
        self.quarter = (period / 4).max(1);
        self.reset();
    }

    /// Feed one sample and return the current peak
    #[inline]
    pub fn process(&mut self, sample: f32) -> f32 {
        if self.counter % self.quarter == 0 {
            self.slots[self.counter / self.quarter] = 0.0;
        }

        let magnitude = sample.abs();
        for slot in self.slots.iter_mut() {
            if magnitude > *slot {
                *slot = magnitude;
            }
        }

        self.counter += 1;
        if self.counter == self.quarter * 4 {
            self.counter = 0;
        }
        self.peak()
    }

    /// Maximum over all slots
    #[inline]
    pub fn peak(&self) -> f32 {
        self.slots.iter().copied().fold(0.0, f32::max)
    }

    /// Minimum over all slot maxima
    #[inline]
    pub fn floor(&self) -> f32 {
        self.slots.iter().copied().fold(f32::MAX, f32::min)
    }

    pub fn reset(&mut self) {
        self.slots = [0.0; 4];
        self.counter = 0;
    }
}

/// Peak-hold filter windowed by wall-clock duration, for metering
#[derive(Debug, Clone)]
pub struct PeakHold {
    follower: RoundRobinPeak,
}

impl PeakHold {
    pub fn new(sample_rate: u32, window_sec: f32) -> Self {
        let period = (sample_rate as f32 * window_sec.max(0.001)) as usize;
        Self {
            follower: RoundRobinPeak::new(period),
        }
    }

    #[inline]
    pub fn process(&mut self, sample: f32) {
        self.follower.process(sample);
    }

    pub fn process_block(&mut self, samples: &[f32]) {
        for &s in samples {
            self.follower.process(s);
        }
    }

    /// Highest level within the window
    pub fn peak(&self) -> f32 {
        self.follower.peak()
    }

    /// Level every part of the window reached (minimum of maximums)
    pub fn floor(&self) -> f32 {
        self.follower.floor()
    }

    pub fn reset(&mut self) {
        self.follower.reset();
    }
}

// ============================================================================
// FADES AND SMOOTHING
// ============================================================================

/// Exponential fade envelope
///
/// Fade-outs multiply the gain by a constant factor each sample so the gain
/// reaches [`params::FADE_FLOOR`] before the fade length elapses and never
/// crosses zero. Fade-ins rise from a low start level and stop at unity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeEnvelope {
    gain: f32,
    multiplier: f32,
}

impl FadeEnvelope {
    /// ln(1e-7): one decade below the completion floor
    const FADE_OUT_DEPTH: f32 = -16.118_096;

    /// Constant unity gain, used to drain a buffer without fading
    pub fn unity() -> Self {
        Self {
            gain: 1.0,
            multiplier: 1.0,
        }
    }

    pub fn fade_out(sample_rate: u32, seconds: f32) -> Self {
        let samples = seconds * sample_rate as f32;
        let multiplier = if samples < 1.0 {
            0.0
        } else {
            (Self::FADE_OUT_DEPTH / samples).exp()
        };
        Self {
            gain: 1.0,
            multiplier,
        }
    }

    pub fn fade_in(sample_rate: u32, seconds: f32, start_gain: f32) -> Self {
        let start = start_gain.clamp(params::FADE_FLOOR, 1.0);
        let samples = seconds * sample_rate as f32;
        if samples < 1.0 || start >= 1.0 {
            return Self::unity();
        }
        Self {
            gain: start,
            multiplier: (-start.ln() / samples).exp(),
        }
    }

    /// Build from a per-sample multiplier, starting at unity
    pub fn from_multiplier(multiplier: f32) -> Self {
        Self {
            gain: 1.0,
            multiplier: multiplier.max(0.0),
        }
    }

    pub fn multiplier(&self) -> f32 {
        self.multiplier
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Return the gain for the current sample and advance
    #[inline]
    pub fn next_gain(&mut self) -> f32 {
        let g = self.gain;
        self.gain = (self.gain * self.multiplier).min(1.0);
        g
    }

    /// A falling envelope is finished once inaudible; a rising one at unity
    pub fn is_finished(&self) -> bool {
        if self.multiplier < 1.0 {
            self.gain < params::FADE_FLOOR
        } else {
            self.gain >= 1.0
        }
    }
}

/// Control value that moves toward its target by a bounded step per tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothed {
    current: f32,
    target: f32,
    step: f32,
}

impl Smoothed {
    pub fn new(value: f32, step: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: step.abs(),
        }
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    pub fn set_step(&mut self, step: f32) {
        self.step = step.abs();
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.current
    }

    /// Advance one control tick
    #[inline]
    pub fn tick(&mut self) -> f32 {
        let delta = (self.target - self.current).clamp(-self.step, self.step);
        self.current += delta;
        self.current
    }

    /// Jump straight to the target
    pub fn snap(&mut self) {
        self.current = self.target;
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }
}

// ============================================================================
// TESTS
// ============================================================================
