//! Microphone automatic gain control
//!
//! Each engine runs two lanes of stage-1 filtering (subsonic highpass,
//! detail boost, optional phase rotation, lookahead delay). Stage 2 looks
//! at the undelayed signal, follows its envelope with round-robin peak
//! followers and steers one shared gain so the delayed output stays under
//! the limit. Lane 1 only carries audio while the engine hosts a paired
//! partner microphone.

use crate::domain::control::{parse_bool, parse_f32, parse_usize, ControlError};
use crate::domain::dsp::{db_to_gain, gain_to_db, RoundRobinPeak};
use crate::domain::rc_filter::{RcCoeffs, RcFilter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::warn;

pub type Result<T> = std::result::Result<T, ControlError>;

/// Parameter constraints
pub mod params {
    pub const MAX_HP_STAGES: usize = 4;
    pub const ROTATOR_STAGES: usize = 4;
    /// Cutoffs of the allpass phase rotator chain
    pub const ROTATOR_CUTOFFS: [f32; 4] = [150.0, 300.0, 600.0, 1200.0];
    /// Crossover of the de-esser sidechain split
    pub const DEESS_CROSSOVER: f32 = 4000.0;
    /// De-esser engages above this high/low ratio and releases below the other
    pub const DEESS_ENGAGE: f32 = 4.0 / 3.0;
    pub const DEESS_RELEASE: f32 = 3.0 / 4.0;
    /// Gate release threshold sits this far above the engage threshold
    pub const GATE_HYSTERESIS_DB: f32 = 2.0;
    /// Mic open level under which ducking relaxes
    pub const DUCK_OPEN_LEVEL: f32 = 0.5;
    /// Frames between meter publications
    pub const METER_INTERVAL: u32 = 100;

    pub const RATIO_MIN: f32 = 1.0;
    pub const RATIO_MAX: f32 = 30.0;
    pub const GAIN_DB_MIN: f32 = -20.0;
    pub const GAIN_DB_MAX: f32 = 30.0;
    pub const LOOKAHEAD_MAX: f32 = 0.1;
    pub const DETAIL_MULT_MAX: f32 = 9.0;

    pub const EPSILON: f32 = 1e-9;
}

/// User-facing AGC settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgcSettings {
    /// Input gain (dB)
    pub gain_db: f32,
    /// Output ceiling (dB)
    pub limit_db: f32,
    /// Maximum gain applied to quiet input (linear)
    pub ratio: f32,
    pub ng_threshold_db: f32,
    pub ng_gain_db: f32,
    pub duck_enabled: bool,
    pub duck_floor_db: f32,
    pub duck_hold_sec: f32,
    pub duck_attack_sec: f32,
    pub duck_release_sec: f32,
    pub ds_bias: f32,
    pub ds_gain_db: f32,
    pub hp_cutoff: f32,
    pub hp_stages: usize,
    pub hf_multiplier: f32,
    pub hf_cutoff: f32,
    pub lf_multiplier: f32,
    pub lf_cutoff: f32,
    pub phase_rotate: bool,
    /// Only read at construction
    pub lookahead_sec: f32,
}

impl Default for AgcSettings {
    fn default() -> Self {
        Self {
            gain_db: 0.0,
            limit_db: -3.0,
            ratio: 3.0,
            ng_threshold_db: -30.0,
            ng_gain_db: -6.0,
            duck_enabled: false,
            duck_floor_db: -18.0,
            duck_hold_sec: 0.5,
            duck_attack_sec: 0.05,
            duck_release_sec: 1.0,
            ds_bias: 0.35,
            ds_gain_db: -6.0,
            hp_cutoff: 100.0,
            hp_stages: 2,
            hf_multiplier: 0.0,
            hf_cutoff: 2000.0,
            lf_multiplier: 0.0,
            lf_cutoff: 150.0,
            phase_rotate: false,
            lookahead_sec: 0.01161,
        }
    }
}

/// One typed AGC control change
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgcParam {
    Gain(f32),
    Limit(f32),
    Ratio(f32),
    NgThreshold(f32),
    NgGain(f32),
    DuckEnable(bool),
    DuckFloor(f32),
    DuckHold(f32),
    DuckAttack(f32),
    DuckRelease(f32),
    DsBias(f32),
    DsGain(f32),
    HpCutoff(f32),
    HpStages(usize),
    HfMulti(f32),
    HfCutoff(f32),
    LfMulti(f32),
    LfCutoff(f32),
    PhaseRotate(bool),
}

impl AgcParam {
    pub const KEYS: [&'static str; 19] = [
        "gain",
        "limit",
        "ratio",
        "ngthresh",
        "nggain",
        "duckenable",
        "duckfloor",
        "duckhold",
        "duckattack",
        "duckrelease",
        "ds_bias",
        "ds_gain",
        "hpcutoff",
        "hpstages",
        "hfmulti",
        "hfcutoff",
        "lfmulti",
        "lfcutoff",
        "phaserotate",
    ];

    /// Parse a `key`/`value` pair; malformed values fall back to the key's default
    pub fn parse(key: &str, value: &str) -> Result<Self> {
        let d = AgcSettings::default();
        let param = match key {
            "gain" => Self::Gain(parse_f32(key, value, d.gain_db)),
            "limit" => Self::Limit(parse_f32(key, value, d.limit_db)),
            "ratio" => Self::Ratio(parse_f32(key, value, d.ratio)),
            "ngthresh" => Self::NgThreshold(parse_f32(key, value, d.ng_threshold_db)),
            "nggain" => Self::NgGain(parse_f32(key, value, d.ng_gain_db)),
            "duckenable" => Self::DuckEnable(parse_bool(key, value, d.duck_enabled)),
            "duckfloor" => Self::DuckFloor(parse_f32(key, value, d.duck_floor_db)),
            "duckhold" => Self::DuckHold(parse_f32(key, value, d.duck_hold_sec)),
            "duckattack" => Self::DuckAttack(parse_f32(key, value, d.duck_attack_sec)),
            "duckrelease" => Self::DuckRelease(parse_f32(key, value, d.duck_release_sec)),
            "ds_bias" => Self::DsBias(parse_f32(key, value, d.ds_bias)),
            "ds_gain" => Self::DsGain(parse_f32(key, value, d.ds_gain_db)),
            "hpcutoff" => Self::HpCutoff(parse_f32(key, value, d.hp_cutoff)),
            "hpstages" => Self::HpStages(parse_usize(key, value, d.hp_stages)),
            "hfmulti" => Self::HfMulti(parse_f32(key, value, d.hf_multiplier)),
            "hfcutoff" => Self::HfCutoff(parse_f32(key, value, d.hf_cutoff)),
            "lfmulti" => Self::LfMulti(parse_f32(key, value, d.lf_multiplier)),
            "lfcutoff" => Self::LfCutoff(parse_f32(key, value, d.lf_cutoff)),
            "phaserotate" => Self::PhaseRotate(parse_bool(key, value, d.phase_rotate)),
            _ => return Err(ControlError::UnknownKey(key.to_string())),
        };
        Ok(param)
    }

    /// Write the change into a settings value
    pub fn apply_to(self, s: &mut AgcSettings) {
        match self {
            Self::Gain(v) => s.gain_db = v,
            Self::Limit(v) => s.limit_db = v,
            Self::Ratio(v) => s.ratio = v,
            Self::NgThreshold(v) => s.ng_threshold_db = v,
            Self::NgGain(v) => s.ng_gain_db = v,
            Self::DuckEnable(v) => s.duck_enabled = v,
            Self::DuckFloor(v) => s.duck_floor_db = v,
            Self::DuckHold(v) => s.duck_hold_sec = v,
            Self::DuckAttack(v) => s.duck_attack_sec = v,
            Self::DuckRelease(v) => s.duck_release_sec = v,
            Self::DsBias(v) => s.ds_bias = v,
            Self::DsGain(v) => s.ds_gain_db = v,
            Self::HpCutoff(v) => s.hp_cutoff = v,
            Self::HpStages(v) => s.hp_stages = v,
            Self::HfMulti(v) => s.hf_multiplier = v,
            Self::HfCutoff(v) => s.hf_cutoff = v,
            Self::LfMulti(v) => s.lf_multiplier = v,
            Self::LfCutoff(v) => s.lf_cutoff = v,
            Self::PhaseRotate(v) => s.phase_rotate = v,
        }
    }
}

/// Two-threshold switch that does not chatter around a single level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hysteresis {
    on: f32,
    off: f32,
    falling: bool,
    engaged: bool,
}

impl Hysteresis {
    /// Engages when the value drops below `on`, releases once it rises above `off`
    pub fn falling(on: f32, off: f32) -> Self {
        Self {
            on,
            off: off.max(on),
            falling: true,
            engaged: false,
        }
    }

    /// Engages when the value rises above `on`, releases once it drops below `off`
    pub fn rising(on: f32, off: f32) -> Self {
        Self {
            on,
            off: off.min(on),
            falling: false,
            engaged: false,
        }
    }

    /// Move the thresholds without disturbing the current state
    pub fn set_thresholds(&mut self, on: f32, off: f32) {
        self.on = on;
        self.off = if self.falling { off.max(on) } else { off.min(on) };
    }

    #[inline]
    pub fn update(&mut self, value: f32) -> bool {
        if self.falling {
            if !self.engaged && value < self.on {
                self.engaged = true;
            } else if self.engaged && value > self.off {
                self.engaged = false;
            }
        } else if !self.engaged && value > self.on {
            self.engaged = true;
        } else if self.engaged && value < self.off {
            self.engaged = false;
        }
        self.engaged
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    pub fn reset(&mut self) {
        self.engaged = false;
    }
}

/// Levels published by the engine for the meters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgcLevels {
    /// Gain relative to the ratio ceiling; 0 dB while nothing is held back
    pub signal_cap_db: f32,
    pub deess_db: f32,
    pub gate_db: f32,
    pub peak_db: f32,
    pub ducking: f32,
}

/// Lock-free meter cells shared with the control side
#[derive(Debug, Default)]
pub struct AgcMeters {
    signal_cap: AtomicU32,
    deess: AtomicU32,
    gate: AtomicU32,
    peak: AtomicU32,
    ducking: AtomicU32,
}

impl AgcMeters {
    fn store(&self, levels: AgcLevels) {
        self.signal_cap.store(levels.signal_cap_db.to_bits(), Ordering::Relaxed);
        self.deess.store(levels.deess_db.to_bits(), Ordering::Relaxed);
        self.gate.store(levels.gate_db.to_bits(), Ordering::Relaxed);
        self.peak.store(levels.peak_db.to_bits(), Ordering::Relaxed);
        self.ducking.store(levels.ducking.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AgcLevels {
        AgcLevels {
            signal_cap_db: f32::from_bits(self.signal_cap.load(Ordering::Relaxed)),
            deess_db: f32::from_bits(self.deess.load(Ordering::Relaxed)),
            gate_db: f32::from_bits(self.gate.load(Ordering::Relaxed)),
            peak_db: f32::from_bits(self.peak.load(Ordering::Relaxed)),
            ducking: f32::from_bits(self.ducking.load(Ordering::Relaxed)),
        }
    }
}

/// Stage-1 filter chain and lookahead delay for one input
#[derive(Debug, Clone)]
struct Lane {
    highpass: [RcFilter; params::MAX_HP_STAGES],
    hf_detail: RcFilter,
    lf_detail: RcFilter,
    rotator: [RcFilter; params::ROTATOR_STAGES],
    sidechain: RcFilter,
    delay: Vec<f32>,
}

impl Lane {
    fn new(delay_len: usize) -> Self {
        let flat = RcCoeffs::butterworth(1000.0, 44100);
        Self {
            highpass: std::array::from_fn(|_| RcFilter::new(flat)),
            hf_detail: RcFilter::new(flat),
            lf_detail: RcFilter::new(flat),
            rotator: std::array::from_fn(|_| RcFilter::new(flat)),
            sidechain: RcFilter::new(flat),
            delay: vec![0.0; delay_len],
        }
    }

    fn configure(&mut self, s: &AgcSettings, sample_rate: u32) {
        let hp = RcCoeffs::butterworth(s.hp_cutoff, sample_rate);
        for stage in self.highpass.iter_mut() {
            stage.set_coeffs(hp);
        }
        self.hf_detail
            .set_coeffs(RcCoeffs::butterworth(s.hf_cutoff, sample_rate));
        self.lf_detail
            .set_coeffs(RcCoeffs::butterworth(s.lf_cutoff, sample_rate));
        for (stage, cutoff) in self.rotator.iter_mut().zip(params::ROTATOR_CUTOFFS) {
            stage.set_coeffs(RcCoeffs::butterworth(cutoff, sample_rate));
        }
        self.sidechain
            .set_coeffs(RcCoeffs::butterworth(params::DEESS_CROSSOVER, sample_rate));
    }

    /// Undelayed stage-1 output
    #[inline]
    fn filter(&mut self, x: f32, t: &Tuning) -> f32 {
        let mut s = x;
        for stage in self.highpass[..t.hp_stages].iter_mut() {
            s = stage.two_pole(s).highpass;
        }
        let treble = self.hf_detail.highpass(s);
        let bass = self.lf_detail.lowpass(s);
        s += treble * t.hf_multiplier + bass * t.lf_multiplier;
        if t.phase_rotate {
            for stage in self.rotator.iter_mut() {
                s = stage.allpass(s);
            }
        }
        s
    }

    /// Write into the lookahead ring and return the sample it displaces
    #[inline]
    fn delay(&mut self, x: f32, pos: usize) -> f32 {
        match self.delay.get_mut(pos) {
            Some(slot) => std::mem::replace(slot, x),
            None => x,
        }
    }

    fn reset(&mut self) {
        for f in self.highpass.iter_mut().chain(self.rotator.iter_mut()) {
            f.reset();
        }
        self.hf_detail.reset();
        self.lf_detail.reset();
        self.sidechain.reset();
        self.delay.fill(0.0);
    }
}

/// Settings resolved to linear values and per-frame steps
#[derive(Debug, Clone, Copy)]
struct Tuning {
    input_gain: f32,
    limit: f32,
    ratio: f32,
    ng_gain: f32,
    ds_bias: f32,
    ds_gain: f32,
    hp_stages: usize,
    hf_multiplier: f32,
    lf_multiplier: f32,
    phase_rotate: bool,
    gain_interval: f32,
}

/// Ducking factor follower
#[derive(Debug, Clone, Copy)]
struct Ducker {
    enabled: bool,
    factor: f32,
    floor: f32,
    hold_frames: u32,
    hold: u32,
    attack_step: f32,
    release_step: f32,
}

impl Ducker {
    fn configure(&mut self, s: &AgcSettings, sample_rate: u32) {
        let sr = sample_rate as f32;
        self.enabled = s.duck_enabled;
        self.floor = db_to_gain(s.duck_floor_db.min(0.0));
        self.hold_frames = (s.duck_hold_sec.max(0.0) * sr) as u32;
        self.attack_step = 1.0 / (s.duck_attack_sec.max(0.001) * sr);
        self.release_step = 1.0 / (s.duck_release_sec.max(0.001) * sr);
    }

    #[inline]
    fn update(&mut self, level: f32, host_open: bool) {
        if !self.enabled || !host_open {
            self.factor = (self.factor + self.release_step).min(1.0);
            self.hold = 0;
            return;
        }
        let target = (1.0 - level).clamp(self.floor, 1.0);
        if target < self.factor {
            self.factor = (self.factor - self.attack_step).max(target);
            self.hold = self.hold_frames;
        } else if self.hold > 0 {
            self.hold -= 1;
        } else {
            self.factor = (self.factor + self.release_step).min(target);
        }
    }
}

/// Lookahead automatic gain control with gate, de-esser and ducking
#[derive(Debug, Clone)]
pub struct AgcEngine {
    sample_rate: u32,
    settings: AgcSettings,
    tuning: Tuning,
    lanes: [Lane; 2],
    linked: bool,
    delay_len: usize,
    write_pos: usize,
    general: RoundRobinPeak,
    deess_high: RoundRobinPeak,
    deess_low: RoundRobinPeak,
    envelope: f32,
    gate: Hysteresis,
    deesser: Hysteresis,
    raw_gain: f32,
    gain: f32,
    ducker: Ducker,
    meters: Arc<AgcMeters>,
    meter_countdown: u32,
    meter_peak: f32,
}

impl AgcEngine {
    pub fn new(sample_rate: u32, settings: AgcSettings) -> Self {
        let lookahead = settings.lookahead_sec.clamp(0.0, params::LOOKAHEAD_MAX);
        let delay_len = (sample_rate as f32 * lookahead).round() as usize;
        let period = (delay_len * 2).max(4);

        let mut engine = Self {
            sample_rate,
            settings,
            tuning: Tuning {
                input_gain: 1.0,
                limit: 1.0,
                ratio: 1.0,
                ng_gain: 1.0,
                ds_bias: 0.0,
                ds_gain: 1.0,
                hp_stages: 1,
                hf_multiplier: 0.0,
                lf_multiplier: 0.0,
                phase_rotate: false,
                gain_interval: 1.0,
            },
            lanes: [Lane::new(delay_len), Lane::new(delay_len)],
            linked: false,
            delay_len,
            write_pos: 0,
            general: RoundRobinPeak::new(period),
            deess_high: RoundRobinPeak::new(period),
            deess_low: RoundRobinPeak::new(period),
            envelope: 0.0,
            gate: Hysteresis::falling(0.0, 0.0),
            deesser: Hysteresis::rising(params::DEESS_ENGAGE, params::DEESS_RELEASE),
            raw_gain: 1.0,
            gain: 1.0,
            ducker: Ducker {
                enabled: false,
                factor: 1.0,
                floor: 0.0,
                hold_frames: 0,
                hold: 0,
                attack_step: 0.0,
                release_step: 0.0,
            },
            meters: Arc::new(AgcMeters::default()),
            meter_countdown: params::METER_INTERVAL,
            meter_peak: 0.0,
        };
        engine.settings.lookahead_sec = lookahead;
        engine.configure();
        engine
    }

    /// Recompute coefficients and linear values from the settings
    fn configure(&mut self) {
        let s = &mut self.settings;
        s.gain_db = s.gain_db.clamp(params::GAIN_DB_MIN, params::GAIN_DB_MAX);
        s.limit_db = s.limit_db.min(0.0);
        s.ratio = s.ratio.clamp(params::RATIO_MIN, params::RATIO_MAX);
        s.ng_gain_db = s.ng_gain_db.min(0.0);
        s.ds_bias = s.ds_bias.max(0.0);
        s.ds_gain_db = s.ds_gain_db.min(0.0);
        s.hp_stages = s.hp_stages.clamp(1, params::MAX_HP_STAGES);
        s.hf_multiplier = s.hf_multiplier.clamp(0.0, params::DETAIL_MULT_MAX);
        s.lf_multiplier = s.lf_multiplier.clamp(0.0, params::DETAIL_MULT_MAX);
        let s = *s;

        self.tuning = Tuning {
            input_gain: db_to_gain(s.gain_db),
            limit: db_to_gain(s.limit_db),
            ratio: s.ratio,
            ng_gain: db_to_gain(s.ng_gain_db),
            ds_bias: s.ds_bias,
            ds_gain: db_to_gain(s.ds_gain_db),
            hp_stages: s.hp_stages,
            hf_multiplier: s.hf_multiplier,
            lf_multiplier: s.lf_multiplier,
            phase_rotate: s.phase_rotate,
            gain_interval: s.ratio / self.delay_len.max(1) as f32,
        };

        let on = db_to_gain(s.ng_threshold_db);
        self.gate
            .set_thresholds(on, on * db_to_gain(params::GATE_HYSTERESIS_DB));
        self.ducker.configure(&s, self.sample_rate);
        for lane in self.lanes.iter_mut() {
            lane.configure(&s, self.sample_rate);
        }
    }

    pub fn settings(&self) -> AgcSettings {
        self.settings
    }

    /// Replace all settings; the lookahead length is fixed at construction
    pub fn set_settings(&mut self, settings: AgcSettings) {
        let lookahead = self.settings.lookahead_sec;
        self.settings = AgcSettings {
            lookahead_sec: lookahead,
            ..settings
        };
        self.configure();
    }

    /// Apply one typed change
    pub fn apply(&mut self, param: AgcParam) {
        param.apply_to(&mut self.settings);
        self.configure();
    }

    /// Apply a textual change; unknown keys are logged and rejected
    pub fn set_parameter(&mut self, key: &str, value: &str) -> Result<()> {
        match AgcParam::parse(key, value) {
            Ok(param) => {
                self.apply(param);
                Ok(())
            }
            Err(err) => {
                warn!(key, value, "Ignoring AGC control message: {}", err);
                Err(err)
            }
        }
    }

    /// Route a second input through lane 1; changing it resets all state
    pub fn set_linked(&mut self, linked: bool) {
        if self.linked != linked {
            self.linked = linked;
            self.reset();
        }
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn reset(&mut self) {
        for lane in self.lanes.iter_mut() {
            lane.reset();
        }
        self.write_pos = 0;
        self.general.reset();
        self.deess_high.reset();
        self.deess_low.reset();
        self.envelope = 0.0;
        self.gate.reset();
        self.deesser.reset();
        self.raw_gain = 1.0;
        self.gain = 1.0;
        self.ducker.factor = 1.0;
        self.ducker.hold = 0;
        self.meter_peak = 0.0;
    }

    /// Process a mono frame on lane 0 with the host fully open
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.process_frame(input, 0.0, 1.0).0
    }

    /// Process one frame. `open_level` is the host microphone's open
    /// envelope; ducking relaxes while it is mostly closed.
    pub fn process_frame(&mut self, lane0: f32, lane1: f32, open_level: f32) -> (f32, f32) {
        let t = self.tuning;

        let s0 = self.lanes[0].filter(lane0 * t.input_gain, &t);
        let s1 = if self.linked {
            self.lanes[1].filter(lane1 * t.input_gain, &t)
        } else {
            0.0
        };

        // sidechain split on the undelayed signal
        let split0 = self.lanes[0].sidechain.two_pole(s0);
        let (high, low) = if self.linked {
            let split1 = self.lanes[1].sidechain.two_pole(s1);
            (
                split0.highpass.abs().max(split1.highpass.abs()),
                split0.lowpass.abs().max(split1.lowpass.abs()),
            )
        } else {
            (split0.highpass, split0.lowpass)
        };

        self.envelope = self.general.process(s0.abs().max(s1.abs()));
        let high_env = self.deess_high.process(high);
        let low_env = self.deess_low.process(low);

        self.raw_gain = (t.limit / (self.envelope + params::EPSILON)).min(t.ratio);
        let mut target = self.raw_gain;
        if self.gate.update(self.envelope) {
            target *= t.ng_gain;
        }
        if self
            .deesser
            .update(high_env * t.ds_bias / (low_env + params::EPSILON))
        {
            target *= t.ds_gain;
        }

        let step = (target - self.gain).clamp(-t.gain_interval, t.gain_interval);
        self.gain += step;

        self.ducker
            .update(self.gain * self.envelope, open_level >= params::DUCK_OPEN_LEVEL);

        let pos = self.write_pos;
        let d0 = self.lanes[0].delay(s0, pos);
        let d1 = if self.linked {
            self.lanes[1].delay(s1, pos)
        } else {
            0.0
        };
        if self.delay_len > 0 {
            self.write_pos = (pos + 1) % self.delay_len;
        }

        let out = (d0 * self.gain, d1 * self.gain);
        self.meter(out.0.abs().max(out.1.abs()));
        out
    }

    #[inline]
    fn meter(&mut self, level: f32) {
        self.meter_peak = self.meter_peak.max(level);
        self.meter_countdown -= 1;
        if self.meter_countdown > 0 {
            return;
        }
        self.meter_countdown = params::METER_INTERVAL;

        let t = &self.tuning;
        self.meters.store(AgcLevels {
            signal_cap_db: gain_to_db((self.raw_gain / t.ratio).min(1.0)),
            deess_db: if self.deesser.is_engaged() {
                gain_to_db(t.ds_gain)
            } else {
                0.0
            },
            gate_db: if self.gate.is_engaged() {
                gain_to_db(t.ng_gain)
            } else {
                0.0
            },
            peak_db: gain_to_db(self.meter_peak),
            ducking: self.ducker.factor,
        });
        self.meter_peak = 0.0;
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Largest per-frame change of the running gain
    pub fn gain_interval_amount(&self) -> f32 {
        self.tuning.gain_interval
    }

    pub fn ducking_factor(&self) -> f32 {
        self.ducker.factor
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    pub fn lookahead_frames(&self) -> usize {
        self.delay_len
    }

    pub fn is_gated(&self) -> bool {
        self.gate.is_engaged()
    }

    pub fn is_deessing(&self) -> bool {
        self.deesser.is_engaged()
    }

    pub fn meters(&self) -> Arc<AgcMeters> {
        Arc::clone(&self.meters)
    }
}
