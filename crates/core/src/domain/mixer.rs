//! Mixing bus and its control surface
//!
//! The bus is the periodic callback of the engine: it pulls every player,
//! runs the microphone units, routes the result according to the operating
//! mode and applies the output dynamics. Control changes reach it through
//! atomics and a bounded command queue owned by [`MixerHandle`].

pub mod alarm;
pub mod bus;
pub mod command;
pub mod crossfade;
pub mod routing;
pub mod stats;

pub use bus::MixingBus;
pub use command::{MixerCommand, MixerHandle};
pub use crossfade::{CrossfadeCurve, Crossfader};
pub use routing::MixMode;
pub use stats::{BusLevels, MixerStats};

use crate::domain::dsp::NormalizerSettings;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Samples between control ticks
pub const CONTROL_INTERVAL: usize = 100;

/// Which player a slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerRole {
    Left,
    Right,
    /// Background bed between items
    Interlude,
    /// Jingle and effect slots
    Effect(usize),
}

impl PlayerRole {
    /// Position of the role in the bus's player table
    pub fn slot(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
            Self::Interlude => 2,
            Self::Effect(n) => 3 + n,
        }
    }

    /// All roles of a session with `effect_slots` effect players
    pub fn all(effect_slots: usize) -> Vec<PlayerRole> {
        let mut roles = vec![Self::Left, Self::Right, Self::Interlude];
        roles.extend((0..effect_slots).map(Self::Effect));
        roles
    }

    /// Whether the role goes through the crossfader
    pub fn is_deck(self) -> bool {
        matches!(self, Self::Left | Self::Right)
    }
}

impl fmt::Display for PlayerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
            Self::Interlude => write!(f, "interlude"),
            Self::Effect(n) => write!(f, "effect_{}", n + 1),
        }
    }
}

/// Startup settings of the bus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerSettings {
    pub mode: MixMode,
    pub crossfade_curve: CrossfadeCurve,
    /// Full sweep time of the crossfader
    pub crossfade_time_sec: f32,
    /// Stream attenuation while a broadcast mic is open
    pub headroom_db: f32,
    /// Stream level in the DJ monitor
    pub mixback: f32,
    pub dj_volume: f32,
    pub stream_limit_db: f32,
    pub monitor_limit_db: f32,
    pub call_limit_db: f32,
    pub effect_slots: usize,
    pub normalizer: NormalizerSettings,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            mode: MixMode::Full,
            crossfade_curve: CrossfadeCurve::LinearKnee,
            crossfade_time_sec: 0.05,
            headroom_db: 0.0,
            mixback: 1.0,
            dj_volume: 1.0,
            stream_limit_db: -0.5,
            monitor_limit_db: -0.5,
            call_limit_db: -3.0,
            effect_slots: 4,
            normalizer: NormalizerSettings::default(),
        }
    }
}
