//! Threads and host I/O around the mixing domain
//!
//! - [`lockfree_buffer`]: single-producer single-consumer rings
//! - [`decoder`]: decoder contract, registry and built-in decoders
//! - [`resample`]: rubato-based rate and speed conversion
//! - [`player`]: decode thread plus realtime reader per player slot
//! - [`engine`]: session wiring a mixing bus to its players
//! - [`cpal_backend`]: default output/input devices through CPAL

pub mod cpal_backend;
pub mod decoder;
pub mod engine;
pub mod lockfree_buffer;
pub mod player;
pub mod resample;

pub use cpal_backend::{default_output_device, CpalHost, DeviceSummary};
pub use decoder::{
    DecodeError, DecodeSink, DecodeStatus, Decoder, DecoderFactory, DecoderKind,
    DecoderRegistry, TrackMetadata,
};
pub use engine::{MixerSession, SessionError, SessionStats};
pub use lockfree_buffer::{ring_buffer, Consumer, Producer};
pub use player::{
    FadeMode, PlayRequest, PlayerReader, PlayerStats, PlayerTransport, TransportError,
    TransportState,
};
pub use resample::{ResampleQuality, SpeedConverter};
