//! Microphone units
//!
//! A unit conditions one physical input (gain, polarity, pan), optionally
//! runs it through its own AGC and gates it with an open/close envelope.
//! Two adjacent units (`id` and `id ^ 1`) can be paired into one stereo
//! microphone; the lower id hosts the AGC and feeds the partner through
//! lane 1 so both sides share one gain.

use crate::domain::agc::{AgcEngine, AgcLevels, AgcMeters, AgcParam, AgcSettings};
use crate::domain::control::{parse_bool, parse_f32, ControlError};
use crate::domain::dsp::{db_to_gain, gain_to_db, time_coeff};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub type Result<T> = std::result::Result<T, ControlError>;

/// Open/close envelope times in seconds
const OPEN_ATTACK_SEC: f32 = 0.040;
const CLOSE_RELEASE_SEC: f32 = 0.150;
const ENVELOPE_SNAP: f32 = 1e-5;
const METER_INTERVAL: u32 = 100;

/// Processing mode of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicMode {
    Off,
    /// Gain and pan only
    Simple,
    /// Full AGC chain
    Processed,
    /// Stereo pair with the partner unit
    Paired,
}

impl MicMode {
    pub fn from_control(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" | "off" => Some(Self::Off),
            "1" | "simple" => Some(Self::Simple),
            "2" | "processed" | "complex" => Some(Self::Processed),
            "3" | "paired" | "stereo" => Some(Self::Paired),
            _ => None,
        }
    }
}

/// Which buses the unit feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicRole {
    /// Broadcast microphone bus
    Mic,
    Aux,
    Both,
}

impl MicRole {
    pub fn from_control(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" | "mic" => Some(Self::Mic),
            "1" | "aux" => Some(Self::Aux),
            "2" | "both" => Some(Self::Both),
            _ => None,
        }
    }

    pub fn feeds_mic_bus(self) -> bool {
        matches!(self, Self::Mic | Self::Both)
    }

    pub fn feeds_aux_bus(self) -> bool {
        matches!(self, Self::Aux | Self::Both)
    }
}

/// Persistent settings of one unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicSettings {
    pub mode: MicMode,
    pub role: MicRole,
    pub gain_db: f32,
    /// 0 is hard left, 1 hard right
    pub pan: f32,
    pub pan_active: bool,
    pub invert: bool,
    pub in_dj_mix: bool,
    pub paired_invert: bool,
    pub paired_gain_db: f32,
    pub agc: AgcSettings,
}

impl Default for MicSettings {
    fn default() -> Self {
        Self {
            mode: MicMode::Simple,
            role: MicRole::Mic,
            gain_db: 0.0,
            pan: 0.5,
            pan_active: false,
            invert: false,
            in_dj_mix: true,
            paired_invert: false,
            paired_gain_db: 0.0,
            agc: AgcSettings::default(),
        }
    }
}

/// One typed microphone control change
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MicParam {
    Mode(MicMode),
    Pan(f32),
    PanActive(bool),
    Open(bool),
    Invert(bool),
    InDjMix(bool),
    PairedInvert(bool),
    PairedGain(f32),
    Gain(f32),
    Role(MicRole),
    Agc(AgcParam),
}

impl MicParam {
    /// Parse a `key`/`value` pair; keys the unit does not own go to the AGC
    pub fn parse(key: &str, value: &str) -> Result<Self> {
        let d = MicSettings::default();
        let param = match key {
            "mode" => Self::Mode(MicMode::from_control(value).unwrap_or_else(|| {
                warn!(key, value, "Malformed mic mode, using default");
                d.mode
            })),
            "role" => Self::Role(MicRole::from_control(value).unwrap_or_else(|| {
                warn!(key, value, "Malformed mic role, using default");
                d.role
            })),
            "pan" => Self::Pan(parse_f32(key, value, d.pan)),
            "pan_active" => Self::PanActive(parse_bool(key, value, d.pan_active)),
            "open" => Self::Open(parse_bool(key, value, false)),
            "invert" => Self::Invert(parse_bool(key, value, d.invert)),
            "indjmix" => Self::InDjMix(parse_bool(key, value, d.in_dj_mix)),
            "pairedinvert" => Self::PairedInvert(parse_bool(key, value, d.paired_invert)),
            "pairedgain" => Self::PairedGain(parse_f32(key, value, d.paired_gain_db)),
            "gain" => Self::Gain(parse_f32(key, value, d.gain_db)),
            _ => Self::Agc(AgcParam::parse(key, value)?),
        };
        Ok(param)
    }
}

/// Per-unit signals for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MicFrame {
    /// Conditioned input gated by the open envelope
    pub unprocessed: f32,
    /// As above, silent unless the unit is in the DJ mix
    pub unprocessed_dj: f32,
    /// Processed stereo regardless of the open state
    pub processed: (f32, f32),
    /// Processed stereo gated by the open envelope
    pub processed_muted: (f32, f32),
    pub mic_bus: (f32, f32),
    pub aux_bus: (f32, f32),
}

/// Sum of all units for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MicMix {
    pub mic: (f32, f32),
    pub aux: (f32, f32),
    /// Processed mics in the DJ mix, open or not, for private talkback
    pub dj: (f32, f32),
    /// Smallest ducking factor over the units running an AGC
    pub ducking: f32,
    /// A broadcast microphone is open
    pub broadcast_open: bool,
}

impl Default for MicMix {
    fn default() -> Self {
        Self {
            mic: (0.0, 0.0),
            aux: (0.0, 0.0),
            dj: (0.0, 0.0),
            ducking: 1.0,
            broadcast_open: false,
        }
    }
}

/// Meter snapshot for one unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MicLevels {
    pub open: bool,
    pub peak_db: f32,
    pub agc: AgcLevels,
}

/// Lock-free meter cells of one unit
#[derive(Debug, Default)]
pub struct MicMeters {
    open: AtomicBool,
    peak: AtomicU32,
    agc: Arc<AgcMeters>,
}

impl MicMeters {
    pub fn snapshot(&self) -> MicLevels {
        MicLevels {
            open: self.open.load(Ordering::Relaxed),
            peak_db: f32::from_bits(self.peak.load(Ordering::Relaxed)),
            agc: self.agc.snapshot(),
        }
    }
}

/// Pairing relation of a unit for the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    Solo,
    Host(usize),
    Guest(usize),
}

/// One microphone channel
#[derive(Debug, Clone)]
pub struct MicUnit {
    id: usize,
    settings: MicSettings,
    agc: AgcEngine,
    open: bool,
    envelope: f32,
    /// Distance of the envelope from its current target
    envelope_gap: f32,
    /// Target the gap is measured against
    envelope_open: bool,
    attack_coeff: f32,
    release_coeff: f32,
    gain: f32,
    pan: (f32, f32),
    meters: Arc<MicMeters>,
    meter_countdown: u32,
    meter_peak: f32,
}

impl MicUnit {
    pub fn new(id: usize, sample_rate: u32, settings: MicSettings) -> Self {
        let sr = sample_rate as f32;
        let agc = AgcEngine::new(sample_rate, settings.agc);
        let meters = Arc::new(MicMeters {
            agc: agc.meters(),
            ..MicMeters::default()
        });
        let mut unit = Self {
            id,
            settings,
            agc,
            open: false,
            envelope: 0.0,
            envelope_gap: 0.0,
            envelope_open: false,
            attack_coeff: time_coeff(OPEN_ATTACK_SEC, sr),
            release_coeff: time_coeff(CLOSE_RELEASE_SEC, sr),
            gain: 1.0,
            pan: (1.0, 1.0),
            meters,
            meter_countdown: METER_INTERVAL,
            meter_peak: 0.0,
        };
        unit.configure();
        unit
    }

    fn configure(&mut self) {
        let s = &mut self.settings;
        s.pan = s.pan.clamp(0.0, 1.0);
        let sign = if s.invert { -1.0 } else { 1.0 };
        self.gain = db_to_gain(s.gain_db) * sign;

        let position = if s.pan_active { s.pan } else { 0.5 };
        let angle = position * std::f32::consts::FRAC_PI_2;
        self.pan = (angle.cos(), angle.sin());
    }

    /// Apply a change that does not affect pairing
    fn apply(&mut self, param: MicParam) {
        let s = &mut self.settings;
        match param {
            MicParam::Mode(mode) => s.mode = mode,
            MicParam::Pan(v) => s.pan = v,
            MicParam::PanActive(v) => s.pan_active = v,
            MicParam::Open(v) => self.open = v,
            MicParam::Invert(v) => s.invert = v,
            MicParam::InDjMix(v) => s.in_dj_mix = v,
            MicParam::PairedInvert(v) => s.paired_invert = v,
            MicParam::PairedGain(v) => s.paired_gain_db = v,
            MicParam::Gain(v) => s.gain_db = v,
            MicParam::Role(v) => s.role = v,
            MicParam::Agc(p) => {
                self.agc.apply(p);
                s.agc = self.agc.settings();
            }
        }
        self.configure();
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn partner_id(&self) -> usize {
        self.id ^ 1
    }

    pub fn mode(&self) -> MicMode {
        self.settings.mode
    }

    pub fn settings(&self) -> MicSettings {
        self.settings
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Current open envelope, 0 closed to 1 open
    pub fn open_level(&self) -> f32 {
        self.envelope
    }

    pub fn agc(&self) -> &AgcEngine {
        &self.agc
    }

    pub fn meters(&self) -> Arc<MicMeters> {
        Arc::clone(&self.meters)
    }

    /// Input after gain and polarity
    #[inline]
    fn condition(&self, x: f32) -> f32 {
        x * self.gain
    }

    /// Feed to the host's lane 1 when this unit is a paired guest
    #[inline]
    fn paired_feed(&self, x: f32, host: &MicSettings) -> f32 {
        let sign = if host.paired_invert { -1.0 } else { 1.0 };
        self.condition(x) * db_to_gain(host.paired_gain_db) * sign
    }

    #[inline]
    fn advance_envelope(&mut self) -> f32 {
        if self.open != self.envelope_open {
            self.envelope_open = self.open;
            self.envelope_gap = if self.open {
                1.0 - self.envelope
            } else {
                self.envelope
            };
        }
        // the gap decays on its own so the envelope lands exactly on target
        let coeff = if self.open {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope_gap *= coeff;
        if self.envelope_gap < ENVELOPE_SNAP {
            self.envelope_gap = 0.0;
        }
        self.envelope = if self.open {
            1.0 - self.envelope_gap
        } else {
            self.envelope_gap
        };
        self.envelope
    }

    #[inline]
    fn meter(&mut self, level: f32) {
        self.meter_peak = self.meter_peak.max(level.abs());
        self.meter_countdown -= 1;
        if self.meter_countdown == 0 {
            self.meter_countdown = METER_INTERVAL;
            self.meters.open.store(self.open, Ordering::Relaxed);
            self.meters
                .peak
                .store(gain_to_db(self.meter_peak).to_bits(), Ordering::Relaxed);
            self.meter_peak = 0.0;
        }
    }

    /// Build the frame from an unprocessed sample and the processed stereo pair
    #[inline]
    fn frame(&self, unprocessed: f32, processed: (f32, f32)) -> MicFrame {
        let env = self.envelope;
        let unp = unprocessed * env;
        let muted = (processed.0 * env, processed.1 * env);
        let role = self.settings.role;
        MicFrame {
            unprocessed: unp,
            unprocessed_dj: if self.settings.in_dj_mix { unp } else { 0.0 },
            processed,
            processed_muted: muted,
            mic_bus: if role.feeds_mic_bus() { muted } else { (0.0, 0.0) },
            aux_bus: if role.feeds_aux_bus() { muted } else { (0.0, 0.0) },
        }
    }
}

/// All microphone units of a session, addressed by id
#[derive(Debug, Clone)]
pub struct MicTable {
    units: Vec<MicUnit>,
    frames: Vec<MicFrame>,
    guest_out: Vec<f32>,
}

impl MicTable {
    pub fn new(sample_rate: u32, settings: &[MicSettings]) -> Self {
        let units: Vec<MicUnit> = settings
            .iter()
            .enumerate()
            .map(|(id, s)| MicUnit::new(id, sample_rate, *s))
            .collect();
        let count = units.len();
        let mut table = Self {
            units,
            frames: vec![MicFrame::default(); count],
            guest_out: vec![0.0; count],
        };
        table.relink();
        table
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit(&self, id: usize) -> Option<&MicUnit> {
        self.units.get(id)
    }

    pub fn units(&self) -> &[MicUnit] {
        &self.units
    }

    /// Frames produced by the last call to [`MicTable::process_frame`]
    pub fn frames(&self) -> &[MicFrame] {
        &self.frames
    }

    /// Pairing of `id` given the current modes of it and its partner
    pub fn pairing(&self, id: usize) -> Pairing {
        let Some(unit) = self.units.get(id) else {
            return Pairing::Solo;
        };
        if unit.mode() != MicMode::Paired {
            return Pairing::Solo;
        }
        let partner = unit.partner_id();
        match self.units.get(partner) {
            Some(p) if p.mode() == MicMode::Paired => {
                if id < partner {
                    Pairing::Host(partner)
                } else {
                    Pairing::Guest(partner)
                }
            }
            _ => Pairing::Solo,
        }
    }

    /// Id of the unit whose AGC processes `id`
    pub fn host_of(&self, id: usize) -> usize {
        match self.pairing(id) {
            Pairing::Guest(host) => host,
            _ => id,
        }
    }

    fn relink(&mut self) {
        for id in 0..self.units.len() {
            let hosting = matches!(self.pairing(id), Pairing::Host(_));
            self.units[id].agc.set_linked(hosting);
        }
    }

    /// Apply a typed change to one unit
    pub fn apply(&mut self, id: usize, param: MicParam) -> Result<()> {
        let unit = self
            .units
            .get_mut(id)
            .ok_or(ControlError::UnknownUnit(id))?;
        unit.apply(param);
        if let MicParam::Mode(_) = param {
            self.relink();
        }
        Ok(())
    }

    /// Parse and apply a textual change
    pub fn set_parameter(&mut self, id: usize, key: &str, value: &str) -> Result<()> {
        if id >= self.units.len() {
            return Err(ControlError::UnknownUnit(id));
        }
        let param = match MicParam::parse(key, value) {
            Ok(param) => param,
            Err(err) => {
                warn!(unit = id, key, value, "Ignoring mic control message: {}", err);
                return Err(err);
            }
        };
        debug!(unit = id, ?param, "Mic parameter");
        self.apply(id, param)
    }

    /// Process one frame; `inputs[id]` is the raw sample of unit `id`
    /// (missing inputs read as silence)
    pub fn process_frame(&mut self, inputs: &[f32]) -> MicMix {
        let mut mix = MicMix::default();

        for id in 0..self.units.len() {
            let x = inputs.get(id).copied().unwrap_or(0.0);
            let pairing = self.pairing(id);

            let partner_feed = match pairing {
                Pairing::Host(p) => {
                    let host_settings = self.units[id].settings;
                    let px = inputs.get(p).copied().unwrap_or(0.0);
                    self.units[p].paired_feed(px, &host_settings)
                }
                _ => 0.0,
            };

            let unit = &mut self.units[id];
            let env = unit.advance_envelope();
            let conditioned = unit.condition(x);
            unit.meter(conditioned);

            let (mono, stereo) = match (unit.mode(), pairing) {
                (MicMode::Off, _) => (0.0, None),
                (_, Pairing::Host(p)) => {
                    let (l, r) = unit.agc.process_frame(conditioned, partner_feed, env);
                    self.guest_out[p] = r;
                    mix.ducking = mix.ducking.min(unit.agc.ducking_factor());
                    (conditioned, Some((l, 0.0)))
                }
                (_, Pairing::Guest(_)) => (conditioned, Some((0.0, self.guest_out[id]))),
                (MicMode::Simple, Pairing::Solo) => {
                    (conditioned, Some((conditioned * unit.pan.0, conditioned * unit.pan.1)))
                }
                (_, Pairing::Solo) => {
                    let (y, _) = unit.agc.process_frame(conditioned, 0.0, env);
                    mix.ducking = mix.ducking.min(unit.agc.ducking_factor());
                    (conditioned, Some((y * unit.pan.0, y * unit.pan.1)))
                }
            };

            let frame = match stereo {
                Some(processed) => unit.frame(mono, processed),
                None => MicFrame::default(),
            };

            if unit.mode() != MicMode::Off && unit.open && unit.settings.role.feeds_mic_bus() {
                mix.broadcast_open = true;
            }
            mix.mic.0 += frame.mic_bus.0;
            mix.mic.1 += frame.mic_bus.1;
            mix.aux.0 += frame.aux_bus.0;
            mix.aux.1 += frame.aux_bus.1;
            if unit.settings.in_dj_mix {
                mix.dj.0 += frame.processed.0;
                mix.dj.1 += frame.processed.1;
            }
            self.frames[id] = frame;
        }

        mix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 44100;

    fn settings(mode: MicMode) -> MicSettings {
        MicSettings {
            mode,
            ..MicSettings::default()
        }
    }

    fn run(table: &mut MicTable, inputs: &[f32], frames: usize) -> MicMix {
        let mut mix = MicMix::default();
        for _ in 0..frames {
            mix = table.process_frame(inputs);
        }
        mix
    }

    #[test]
    fn test_parse_mic_and_agc_keys() {
        assert_eq!(
            MicParam::parse("mode", "3"),
            Ok(MicParam::Mode(MicMode::Paired))
        );
        assert_eq!(MicParam::parse("role", "aux"), Ok(MicParam::Role(MicRole::Aux)));
        assert_eq!(MicParam::parse("gain", "-6"), Ok(MicParam::Gain(-6.0)));
        assert_eq!(
            MicParam::parse("ratio", "4"),
            Ok(MicParam::Agc(AgcParam::Ratio(4.0)))
        );
        assert!(matches!(
            MicParam::parse("sparkle", "1"),
            Err(ControlError::UnknownKey(_))
        ));
        assert_eq!(
            MicParam::parse("mode", "loud"),
            Ok(MicParam::Mode(MicMode::Simple))
        );
    }

    #[test]
    fn test_unknown_unit() {
        let mut table = MicTable::new(SAMPLE_RATE, &[settings(MicMode::Simple)]);
        assert_eq!(
            table.set_parameter(3, "open", "1"),
            Err(ControlError::UnknownUnit(3))
        );
    }

    #[test]
    fn test_closed_mic_is_silent() {
        let mut table = MicTable::new(SAMPLE_RATE, &[settings(MicMode::Simple)]);
        let mix = run(&mut table, &[0.5], 100);
        assert_eq!(mix.mic, (0.0, 0.0));
        assert!(!mix.broadcast_open);
        // unmuted processed signal still flows for monitoring
        let frame = table.frames()[0];
        assert!(frame.processed.0 > 0.0);
    }

    #[test]
    fn test_open_envelope_timing() {
        let mut table = MicTable::new(SAMPLE_RATE, &[settings(MicMode::Simple)]);
        table.set_parameter(0, "open", "1").unwrap();

        // one attack time constant reaches about 63%
        run(&mut table, &[1.0], (SAMPLE_RATE as f32 * OPEN_ATTACK_SEC) as usize);
        let level = table.unit(0).unwrap().open_level();
        assert!((level - 0.632).abs() < 0.02, "level {level}");

        run(&mut table, &[1.0], SAMPLE_RATE as usize);
        assert_eq!(table.unit(0).unwrap().open_level(), 1.0);

        table.set_parameter(0, "open", "0").unwrap();
        run(&mut table, &[1.0], (SAMPLE_RATE as f32 * CLOSE_RELEASE_SEC) as usize);
        let level = table.unit(0).unwrap().open_level();
        assert!((level - 0.368).abs() < 0.02, "level {level}");

        // reopening part way down resumes from the current level
        table.set_parameter(0, "open", "1").unwrap();
        run(&mut table, &[1.0], 1);
        let reopened = table.unit(0).unwrap().open_level();
        assert!(reopened > level && reopened < level + 0.01, "level {reopened}");

        run(&mut table, &[1.0], 10 * SAMPLE_RATE as usize);
        assert_eq!(table.unit(0).unwrap().open_level(), 1.0);
        table.set_parameter(0, "open", "0").unwrap();
        run(&mut table, &[1.0], 10 * SAMPLE_RATE as usize);
        assert_eq!(table.unit(0).unwrap().open_level(), 0.0);
    }

    #[test]
    fn test_equal_power_pan() {
        let mut table = MicTable::new(SAMPLE_RATE, &[settings(MicMode::Simple)]);
        table.set_parameter(0, "open", "1").unwrap();

        let mix = run(&mut table, &[1.0], SAMPLE_RATE as usize);
        let centre = std::f32::consts::FRAC_1_SQRT_2;
        assert!((mix.mic.0 - centre).abs() < 1e-4);
        assert!((mix.mic.1 - centre).abs() < 1e-4);

        // pan is ignored until it is activated
        table.set_parameter(0, "pan", "0").unwrap();
        let mix = run(&mut table, &[1.0], 10);
        assert!((mix.mic.0 - centre).abs() < 1e-4);

        table.set_parameter(0, "pan_active", "1").unwrap();
        let mix = run(&mut table, &[1.0], 10);
        assert!((mix.mic.0 - 1.0).abs() < 1e-4);
        assert!(mix.mic.1.abs() < 1e-4);
    }

    #[test]
    fn test_roles_route_buses() {
        let mic = settings(MicMode::Simple);
        let aux = MicSettings {
            role: MicRole::Aux,
            ..mic
        };
        let mut table = MicTable::new(SAMPLE_RATE, &[mic, aux]);
        table.set_parameter(0, "open", "1").unwrap();
        table.set_parameter(1, "open", "1").unwrap();

        let mix = run(&mut table, &[1.0, 0.0], SAMPLE_RATE as usize);
        assert!(mix.mic.0 > 0.7 && mix.aux.0 == 0.0);
        assert!(mix.broadcast_open);

        let mix = run(&mut table, &[0.0, 1.0], 10);
        assert!(mix.aux.0 > 0.7 && mix.mic.0 == 0.0);
    }

    #[test]
    fn test_invert_and_dj_mix() {
        let mut table = MicTable::new(SAMPLE_RATE, &[settings(MicMode::Simple)]);
        table.set_parameter(0, "open", "1").unwrap();
        table.set_parameter(0, "invert", "1").unwrap();
        let mix = run(&mut table, &[0.5], SAMPLE_RATE as usize);
        assert!(mix.mic.0 < 0.0);
        assert!(table.frames()[0].unprocessed_dj < 0.0);

        table.set_parameter(0, "indjmix", "0").unwrap();
        let mix = run(&mut table, &[0.5], 10);
        assert_eq!(mix.dj, (0.0, 0.0));
        assert_eq!(table.frames()[0].unprocessed_dj, 0.0);
    }

    #[test]
    fn test_pairing_roles() {
        let paired = settings(MicMode::Paired);
        let mut table = MicTable::new(SAMPLE_RATE, &[paired, paired, paired]);
        assert_eq!(table.pairing(0), Pairing::Host(1));
        assert_eq!(table.pairing(1), Pairing::Guest(0));
        assert_eq!(table.host_of(1), 0);
        // unit 2 has no partner and runs on its own
        assert_eq!(table.pairing(2), Pairing::Solo);
        assert!(table.unit(0).unwrap().agc().is_linked());
        assert!(!table.unit(1).unwrap().agc().is_linked());

        table.set_parameter(1, "mode", "processed").unwrap();
        assert_eq!(table.pairing(0), Pairing::Solo);
        assert!(!table.unit(0).unwrap().agc().is_linked());
    }

    #[test]
    fn test_paired_units_share_gain() {
        let paired = settings(MicMode::Paired);
        let mut table = MicTable::new(SAMPLE_RATE, &[paired, paired]);
        table.set_parameter(0, "open", "1").unwrap();
        table.set_parameter(1, "open", "1").unwrap();

        for i in 0..SAMPLE_RATE as usize {
            let x = (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / SAMPLE_RATE as f32).sin();
            table.process_frame(&[x, x * 0.5]);
        }
        let host = table.frames()[0];
        let guest = table.frames()[1];
        // host hard left, partner hard right
        assert_eq!(host.processed.1, 0.0);
        assert_eq!(guest.processed.0, 0.0);
        assert!((guest.processed.1 - host.processed.0 * 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_leaving_pair_resets_host_agc() {
        let paired = settings(MicMode::Paired);
        let mut table = MicTable::new(SAMPLE_RATE, &[paired, paired]);
        table.set_parameter(0, "open", "1").unwrap();
        for i in 0..4410 {
            let x = 0.9 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / SAMPLE_RATE as f32).sin();
            table.process_frame(&[x, x]);
        }
        assert!(table.unit(0).unwrap().agc().gain() < 1.0);

        table.set_parameter(1, "mode", "off").unwrap();
        assert_eq!(table.unit(0).unwrap().agc().gain(), 1.0);
    }

    #[test]
    fn test_ducking_reported_from_processed_mics() {
        let mut s = settings(MicMode::Processed);
        s.agc.duck_enabled = true;
        let mut table = MicTable::new(SAMPLE_RATE, &[s, settings(MicMode::Simple)]);
        table.set_parameter(0, "open", "1").unwrap();

        let mut mix = MicMix::default();
        for i in 0..SAMPLE_RATE as usize {
            let x = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SAMPLE_RATE as f32).sin();
            mix = table.process_frame(&[x, 0.0]);
        }
        assert!(mix.ducking < 0.5);
        assert!(mix.broadcast_open);
    }

    #[test]
    fn test_meters_snapshot() {
        let mut table = MicTable::new(SAMPLE_RATE, &[settings(MicMode::Simple)]);
        let meters = table.unit(0).unwrap().meters();
        table.set_parameter(0, "open", "1").unwrap();
        run(&mut table, &[0.5], 200);
        let levels = meters.snapshot();
        assert!(levels.open);
        assert!((levels.peak_db - gain_to_db(0.5)).abs() < 0.01);
    }
}
