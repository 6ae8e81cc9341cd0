//! Operating modes as declarative routing tables
//!
//! Every mode is a fixed list of `(source, destination, gain)` edges. The
//! bus evaluates the list in order, so edges reading the stream come after
//! every edge that writes it.

use serde::{Deserialize, Serialize};

/// Fixed attenuation of the stream mix sent to a private caller
pub const PRIVATE_CALL_LEVEL_DB: f32 = -12.0;

/// Operator-selected routing topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixMode {
    /// Ducked, mic-mixed, crossfaded players on stream and monitor
    #[default]
    Full,
    /// Caller on air with the microphones
    PublicCall,
    /// Off-air conversation; the caller hears the stream quietly
    PrivateCallMicClosed,
    /// Off-air caller while the microphones are live
    PrivateCallMicOpen,
    /// Left and right players only
    Simple,
}

impl MixMode {
    pub fn from_control(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" | "full" => Some(Self::Full),
            "1" | "public_call" => Some(Self::PublicCall),
            "2" | "private_call_mic_closed" => Some(Self::PrivateCallMicClosed),
            "3" | "private_call_mic_open" => Some(Self::PrivateCallMicOpen),
            "4" | "simple" => Some(Self::Simple),
            _ => None,
        }
    }

    pub fn edges(self) -> &'static [Edge] {
        match self {
            Self::Full => FULL,
            Self::PublicCall => PUBLIC_CALL,
            Self::PrivateCallMicClosed => PRIVATE_CALL_MIC_CLOSED,
            Self::PrivateCallMicOpen => PRIVATE_CALL_MIC_OPEN,
            Self::Simple => SIMPLE,
        }
    }

    /// Whether the mode applies the ducking factor anywhere
    pub fn ducks(self) -> bool {
        self.edges().iter().any(|e| e.gain == EdgeGain::Duck)
    }

    /// Whether the microphones are processed at all
    pub fn uses_mics(self) -> bool {
        self != Self::Simple
    }

    pub fn uses_call_send(self) -> bool {
        self.edges().iter().any(|e| e.dest == Dest::CallSend)
    }
}

/// Signal feeding an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// All players, left/right decks through the crossfader
    Players,
    /// Left and right decks at their own volume, no crossfader
    DecksDirect,
    /// Open broadcast microphones
    Mics,
    /// Open aux inputs
    Aux,
    CallReceive,
    /// Players the DJ is previewing
    DjPreview,
    /// Microphones the DJ talks through, open or not
    DjMics,
    /// The stream mix as accumulated so far
    Stream,
}

/// Output an edge adds into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dest {
    Stream = 0,
    Monitor = 1,
    CallSend = 2,
}

/// Gain applied along an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeGain {
    Unity,
    Duck,
    PrivateLevel,
    Mixback,
    DjVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub source: Source,
    pub dest: Dest,
    pub gain: EdgeGain,
}

const fn edge(source: Source, dest: Dest, gain: EdgeGain) -> Edge {
    Edge { source, dest, gain }
}

use Dest::{CallSend, Monitor, Stream as StreamOut};
use EdgeGain::{DjVolume, Duck, Mixback, PrivateLevel, Unity};

const FULL: &[Edge] = &[
    edge(Source::Players, StreamOut, Duck),
    edge(Source::Mics, StreamOut, Unity),
    edge(Source::Aux, StreamOut, Unity),
    edge(Source::Stream, Monitor, Mixback),
    edge(Source::DjPreview, Monitor, DjVolume),
];

const PUBLIC_CALL: &[Edge] = &[
    edge(Source::Players, StreamOut, Unity),
    edge(Source::Mics, StreamOut, Unity),
    edge(Source::Aux, StreamOut, Unity),
    edge(Source::CallReceive, StreamOut, Unity),
    edge(Source::Mics, CallSend, Unity),
    edge(Source::Stream, Monitor, Mixback),
    edge(Source::DjPreview, Monitor, DjVolume),
];

const PRIVATE_CALL_MIC_CLOSED: &[Edge] = &[
    edge(Source::Players, StreamOut, Unity),
    edge(Source::Mics, StreamOut, Unity),
    edge(Source::Aux, StreamOut, Unity),
    edge(Source::Stream, CallSend, PrivateLevel),
    edge(Source::Stream, Monitor, Mixback),
    edge(Source::CallReceive, Monitor, Unity),
    edge(Source::DjPreview, Monitor, DjVolume),
];

const PRIVATE_CALL_MIC_OPEN: &[Edge] = &[
    edge(Source::Players, StreamOut, Duck),
    edge(Source::Mics, StreamOut, Unity),
    edge(Source::Aux, StreamOut, Unity),
    edge(Source::Stream, CallSend, Unity),
    edge(Source::Stream, Monitor, Mixback),
    edge(Source::CallReceive, Monitor, Unity),
    edge(Source::DjPreview, Monitor, DjVolume),
];

const SIMPLE: &[Edge] = &[
    edge(Source::DecksDirect, StreamOut, Unity),
    edge(Source::DecksDirect, Monitor, Unity),
];

/// Per-frame values of every edge source
#[derive(Debug, Clone, Copy, Default)]
pub struct Sources {
    pub players: (f32, f32),
    pub decks_direct: (f32, f32),
    pub mics: (f32, f32),
    pub aux: (f32, f32),
    pub call_receive: (f32, f32),
    pub dj_preview: (f32, f32),
    pub dj_mics: (f32, f32),
}

/// Per-frame values of every edge gain
#[derive(Debug, Clone, Copy)]
pub struct Gains {
    pub duck: f32,
    /// Linear form of [`PRIVATE_CALL_LEVEL_DB`]
    pub private_level: f32,
    pub mixback: f32,
    pub dj_volume: f32,
}

/// Stereo results of one frame, indexed by [`Dest`]
pub type Outputs = [(f32, f32); 3];

/// Evaluate `edges` for one frame
#[inline]
pub fn route(edges: &[Edge], sources: &Sources, gains: &Gains) -> Outputs {
    let mut out: Outputs = [(0.0, 0.0); 3];

    for e in edges {
        let (l, r) = match e.source {
            Source::Players => sources.players,
            Source::DecksDirect => sources.decks_direct,
            Source::Mics => sources.mics,
            Source::Aux => sources.aux,
            Source::CallReceive => sources.call_receive,
            Source::DjPreview => sources.dj_preview,
            Source::DjMics => sources.dj_mics,
            Source::Stream => out[Dest::Stream as usize],
        };
        let g = match e.gain {
            EdgeGain::Unity => 1.0,
            EdgeGain::Duck => gains.duck,
            EdgeGain::PrivateLevel => gains.private_level,
            EdgeGain::Mixback => gains.mixback,
            EdgeGain::DjVolume => gains.dj_volume,
        };
        let dest = &mut out[e.dest as usize];
        dest.0 += l * g;
        dest.1 += r * g;
    }
    out
}
