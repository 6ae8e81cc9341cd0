//! Domain entities and signal-processing rules

pub mod agc;
pub mod audio;
pub mod config;
pub mod control;
pub mod dsp;
pub mod mic;
pub mod mixer;
pub mod rc_filter;

// Re-export specific items to avoid ambiguous glob imports
pub use agc::{AgcEngine, AgcMeters, AgcParam, AgcSettings, Hysteresis};
pub use audio::{AudioError, BlockSource, Port, SampleRate, StreamConfig};
pub use config::{ConfigError, ConfigManager, ConfigWatcher, EngineConfig, PresetManager};
pub use control::ControlError;
pub use dsp::{db_to_gain, gain_to_db, DbTables, FadeEnvelope, Limiter, Normalizer, PeakHold};
pub use mic::{MicFrame, MicMix, MicMode, MicParam, MicRole, MicTable, MicUnit};
pub use mixer::{
    CrossfadeCurve, MixMode, MixerCommand, MixerHandle, MixerStats, MixingBus, PlayerRole,
};
pub use rc_filter::{RcCoeffs, RcFilter};
