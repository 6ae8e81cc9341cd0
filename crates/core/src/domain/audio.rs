//! Audio host abstractions and domain models
//!
//! The host audio server is treated as a capability provider: it exposes a
//! fixed set of named unidirectional ports and calls the mixing bus once per
//! period. Concrete backends live in the `infra` crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Requested audio device was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Error in audio stream creation or processing
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Invalid configuration for the engine or a device
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Input/Output error at the OS level
    #[error("OS error: {0}")]
    OsError(String),

    /// Device does not support the requested configuration
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz44100,
    Hz48000,
    Hz96000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz96000 => 96000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            96000 => SampleRate::Hz96000,
            hz => SampleRate::Custom(hz),
        }
    }

    pub fn as_f32(&self) -> f32 {
        self.hz() as f32
    }
}

/// Host stream parameters the engine is built against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub sample_rate: SampleRate,
    /// Largest period the host will ever hand to the mixing bus
    pub max_block: usize,
}

impl StreamConfig {
    pub fn new(sample_rate: u32, max_block: usize) -> Result<Self> {
        if sample_rate < 8000 {
            return Err(AudioError::InvalidConfiguration(format!(
                "sample rate {sample_rate} Hz is too low"
            )));
        }
        if max_block == 0 {
            return Err(AudioError::InvalidConfiguration(
                "max block must be at least one frame".to_string(),
            ));
        }
        Ok(Self {
            sample_rate: SampleRate::from_hz(sample_rate),
            max_block,
        })
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz44100,
            max_block: 1024,
        }
    }
}

/// Named host ports. Inputs feed the bus, outputs are produced by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Port {
    MonitorOut,
    StreamOut,
    CallSend,
    CallReceive,
    FxSend,
    FxReceive,
    MicIn(usize),
}

impl Port {
    pub fn is_input(&self) -> bool {
        matches!(self, Port::CallReceive | Port::FxReceive | Port::MicIn(_))
    }

    /// Number of channels carried by the port
    pub fn channels(&self) -> usize {
        match self {
            Port::MicIn(_) => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::MonitorOut => write!(f, "dj_out"),
            Port::StreamOut => write!(f, "str_out"),
            Port::CallSend => write!(f, "voip_send"),
            Port::CallReceive => write!(f, "voip_return"),
            Port::FxSend => write!(f, "fx_send"),
            Port::FxReceive => write!(f, "fx_return"),
            Port::MicIn(n) => write!(f, "mic_in_{}", n + 1),
        }
    }
}

/// A stereo source pulled once per period by the mixing bus
///
/// Implementations must not block, lock or allocate. When less audio is
/// available than requested the remainder of both slices is zero-filled.
pub trait BlockSource: Send {
    /// Fill `left` and `right` (same length) and return the number of frames
    /// that carried real content.
    fn read_block(&mut self, left: &mut [f32], right: &mut [f32]) -> usize;
}
