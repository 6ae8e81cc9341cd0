//! Control side of the mixing bus
//!
//! Plain scalar controls are atomics the callback reads every block.
//! Anything structured travels as a [`MixerCommand`] over a bounded
//! channel the callback drains without blocking.

use super::crossfade::CrossfadeCurve;
use super::routing::MixMode;
use super::stats::{BusMeters, MixerStats};
use super::PlayerRole;
use crate::domain::control::ControlError;
use crate::domain::dsp::{gain_to_db, NormalizerSettings};
use crate::domain::mic::{MicMeters, MicParam};
use crossbeam::channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Depth of the command queue
pub const COMMAND_QUEUE_DEPTH: usize = 256;

/// Structured change applied by the callback at the start of a block
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MixerCommand {
    SetMode(MixMode),
    SetCrossfadeCurve(CrossfadeCurve),
    SetCrossfadeTime(f32),
    SetNormalizer(NormalizerSettings),
    SetStreamLimit(f32),
    SetMonitorLimit(f32),
    SetCallLimit(f32),
    Mic { unit: usize, param: MicParam },
}

/// f32 stored as bits
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Scalar controls of one player slot
#[derive(Debug)]
pub struct PlayerControls {
    pub volume: AtomicF32,
    pub muted: AtomicBool,
    pub dj_listen: AtomicBool,
}

impl Default for PlayerControls {
    fn default() -> Self {
        Self {
            volume: AtomicF32::new(1.0),
            muted: AtomicBool::new(false),
            dj_listen: AtomicBool::new(false),
        }
    }
}

/// Scalar controls shared with the callback
#[derive(Debug)]
pub struct MixerControls {
    pub crossfade: AtomicF32,
    pub dj_volume: AtomicF32,
    pub headroom_db: AtomicF32,
    pub mixback: AtomicF32,
    pub fx_loop: AtomicBool,
    pub alarm: AtomicBool,
    pub players: Vec<PlayerControls>,
}

impl MixerControls {
    pub fn new(player_count: usize) -> Self {
        Self {
            crossfade: AtomicF32::new(0.5),
            dj_volume: AtomicF32::new(1.0),
            headroom_db: AtomicF32::new(0.0),
            mixback: AtomicF32::new(1.0),
            fx_loop: AtomicBool::new(false),
            alarm: AtomicBool::new(false),
            players: (0..player_count).map(|_| PlayerControls::default()).collect(),
        }
    }
}

/// Handle the control thread uses to steer a running bus
#[derive(Debug, Clone)]
pub struct MixerHandle {
    controls: Arc<MixerControls>,
    commands: Sender<MixerCommand>,
    meters: Arc<BusMeters>,
    mic_meters: Vec<Arc<MicMeters>>,
    roles: Vec<PlayerRole>,
}

impl MixerHandle {
    pub(crate) fn new(
        controls: Arc<MixerControls>,
        commands: Sender<MixerCommand>,
        meters: Arc<BusMeters>,
        mic_meters: Vec<Arc<MicMeters>>,
        roles: Vec<PlayerRole>,
    ) -> Self {
        Self {
            controls,
            commands,
            meters,
            mic_meters,
            roles,
        }
    }

    /// Player roles in slot order
    pub fn player_roles(&self) -> &[PlayerRole] {
        &self.roles
    }

    pub fn mic_count(&self) -> usize {
        self.mic_meters.len()
    }

    pub(crate) fn send(&self, command: MixerCommand) -> Result<(), ControlError> {
        self.commands.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => {
                warn!(?command, "Mixer command queue full");
                ControlError::QueueFull
            }
            TrySendError::Disconnected(_) => ControlError::Disconnected,
        })
    }

    fn player(&self, role: PlayerRole) -> Result<&PlayerControls, ControlError> {
        self.roles
            .iter()
            .position(|&r| r == role)
            .and_then(|slot| self.controls.players.get(slot))
            .ok_or(ControlError::UnknownUnit(role.slot()))
    }

    pub fn set_mode(&self, mode: MixMode) -> Result<(), ControlError> {
        debug!(?mode, "Mix mode");
        self.send(MixerCommand::SetMode(mode))
    }

    /// Fader target, 0 fully left to 1 fully right
    pub fn set_crossfade(&self, position: f32) {
        self.controls.crossfade.store(position.clamp(0.0, 1.0));
    }

    pub fn set_crossfade_curve(&self, curve: CrossfadeCurve) -> Result<(), ControlError> {
        self.send(MixerCommand::SetCrossfadeCurve(curve))
    }

    pub fn set_crossfade_time(&self, seconds: f32) -> Result<(), ControlError> {
        self.send(MixerCommand::SetCrossfadeTime(seconds))
    }

    pub fn set_player_volume(&self, role: PlayerRole, volume: f32) -> Result<(), ControlError> {
        self.player(role)?.volume.store(volume.clamp(0.0, 1.0));
        Ok(())
    }

    pub fn set_player_muted(&self, role: PlayerRole, muted: bool) -> Result<(), ControlError> {
        self.player(role)?.muted.store(muted, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_dj_listen(&self, role: PlayerRole, listen: bool) -> Result<(), ControlError> {
        self.player(role)?.dj_listen.store(listen, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_dj_volume(&self, volume: f32) {
        self.controls.dj_volume.store(volume.clamp(0.0, 1.0));
    }

    /// Stream attenuation while a broadcast mic is open
    pub fn set_headroom_db(&self, db: f32) {
        self.controls.headroom_db.store(db.clamp(0.0, 32.0));
    }

    pub fn set_mixback(&self, level: f32) {
        self.controls.mixback.store(level.clamp(0.0, 1.0));
    }

    pub fn set_fx_loop(&self, enabled: bool) {
        self.controls.fx_loop.store(enabled, Ordering::Relaxed);
    }

    pub fn arm_alarm(&self) {
        self.controls.alarm.store(true, Ordering::Release);
    }

    pub fn is_alarm_armed(&self) -> bool {
        self.controls.alarm.load(Ordering::Acquire)
    }

    pub fn set_normalizer(&self, settings: NormalizerSettings) -> Result<(), ControlError> {
        self.send(MixerCommand::SetNormalizer(settings))
    }

    pub fn set_stream_limit_db(&self, db: f32) -> Result<(), ControlError> {
        self.send(MixerCommand::SetStreamLimit(db))
    }

    pub fn set_monitor_limit_db(&self, db: f32) -> Result<(), ControlError> {
        self.send(MixerCommand::SetMonitorLimit(db))
    }

    pub fn set_call_limit_db(&self, db: f32) -> Result<(), ControlError> {
        self.send(MixerCommand::SetCallLimit(db))
    }

    /// Parse a mic control message here and queue the typed change
    pub fn set_mic_parameter(&self, unit: usize, key: &str, value: &str) -> Result<(), ControlError> {
        if unit >= self.mic_meters.len() {
            warn!(unit, key, "Mic control for a unit that does not exist");
            return Err(ControlError::UnknownUnit(unit));
        }
        let param = match MicParam::parse(key, value) {
            Ok(param) => param,
            Err(err) => {
                warn!(unit, key, value, "Ignoring mic control message: {}", err);
                return Err(err);
            }
        };
        self.send(MixerCommand::Mic { unit, param })
    }

    /// Meter snapshot; bus levels reset on read
    pub fn stats(&self) -> MixerStats {
        MixerStats {
            stream: self.meters.stream.take(),
            monitor: self.meters.monitor.take(),
            call_send: self.meters.call_send.take(),
            ducking: self.meters.ducking(),
            normalizer_gain_db: gain_to_db(self.meters.normalizer_gain()),
            alarm_armed: self.is_alarm_armed(),
            mics: self.mic_meters.iter().map(|m| m.snapshot()).collect(),
        }
    }
}
