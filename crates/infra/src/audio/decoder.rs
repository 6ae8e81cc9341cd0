//! Decoder contract and registry
//!
//! Format decoders live outside the engine. They are opened by a
//! [`DecoderFactory`] and push PCM through a [`DecodeSink`], which converts
//! sample formats, demultiplexes channels, applies track gain, fade-in and
//! dither, and converts to the host rate. The transport moves the sink's
//! output into its ring buffer.
//!
//! Two decoders ship with the engine: [`SignalDecoder`] for test and
//! diagnostic signals, and [`RawPcmDecoder`] for headerless 16-bit files.

use super::resample::{RateConverter, ResampleQuality};
use onair_core::domain::dsp::FadeEnvelope;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Stereo frame as stored in the transport's rings
pub type Frame = [f32; 2];

/// Frames a decoder should aim to produce per step
pub const DECODE_BLOCK: usize = 2048;

/// Fade-in start level when seeking or fading in, -60 dB
pub const FADE_IN_START: f32 = 0.001;
pub const FADE_IN_SECONDS: f32 = 0.1;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported source: {0}")]
    Unsupported(String),

    #[error("Corrupt stream: {0}")]
    Corrupt(String),
}

/// Closed set of decoder families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    Vorbis,
    Flac,
    Speex,
    Opus,
    Mp3,
    Pcm,
    Signal,
}

impl DecoderKind {
    /// Guess the family from a `signal:` prefix or the file extension
    pub fn sniff(path: &str) -> Option<Self> {
        if path.starts_with("signal:") {
            return Some(Self::Signal);
        }
        let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "ogg" | "oga" => Some(Self::Vorbis),
            "flac" => Some(Self::Flac),
            "spx" => Some(Self::Speex),
            "opus" => Some(Self::Opus),
            "mp3" | "mp2" => Some(Self::Mp3),
            "raw" | "pcm" => Some(Self::Pcm),
            _ => None,
        }
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vorbis => "vorbis",
            Self::Flac => "flac",
            Self::Speex => "speex",
            Self::Opus => "opus",
            Self::Mp3 => "mp3",
            Self::Pcm => "pcm",
            Self::Signal => "signal",
        };
        f.write_str(name)
    }
}

/// Outcome of one decode step
#[derive(Debug)]
pub enum DecodeStatus {
    Continue,
    EndOfStream,
    Error(DecodeError),
}

/// Track metadata a decoder may report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
}

/// One open source
pub trait Decoder: Send {
    /// Read headers and declare the format with [`DecodeSink::set_format`]
    fn init(&mut self, sink: &mut DecodeSink) -> Result<(), DecodeError>;

    /// Push at most about [`DECODE_BLOCK`] frames
    fn decode_step(&mut self, sink: &mut DecodeSink) -> DecodeStatus;

    /// Release decoder resources
    fn eject(&mut self) {}
}

/// Opens sources of one family
pub trait DecoderFactory: Send + Sync {
    fn kind(&self) -> DecoderKind;

    /// `None` when this factory does not accept the source
    fn open(&self, path: &str, seek_seconds: f32) -> Option<Box<dyn Decoder>>;
}

/// Ordered set of factories; the first that accepts a source wins
#[derive(Default)]
pub struct DecoderRegistry {
    factories: Vec<Box<dyn DecoderFactory>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the signal and raw PCM decoders
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SignalFactory));
        registry.register(Box::new(RawPcmFactory::default()));
        registry
    }

    pub fn register(&mut self, factory: Box<dyn DecoderFactory>) {
        debug!(kind = %factory.kind(), "Decoder registered");
        self.factories.push(factory);
    }

    pub fn kinds(&self) -> Vec<DecoderKind> {
        self.factories.iter().map(|f| f.kind()).collect()
    }

    /// Open `path` with the first matching factory whose decoder initialises
    pub fn open(
        &self,
        path: &str,
        seek_seconds: f32,
        sink: &mut DecodeSink,
    ) -> Option<(DecoderKind, Box<dyn Decoder>)> {
        let Some(kind) = DecoderKind::sniff(path) else {
            debug!(path, "No decoder family for source");
            return None;
        };
        for factory in self.factories.iter().filter(|f| f.kind() == kind) {
            let Some(mut decoder) = factory.open(path, seek_seconds) else {
                continue;
            };
            match decoder.init(sink) {
                Ok(()) => return Some((kind, decoder)),
                Err(e) => {
                    warn!(path, %kind, error = %e, "Decoder rejected source");
                    decoder.eject();
                }
            }
        }
        None
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Conversion stage between a decoder and the transport's ring
pub struct DecodeSink {
    host_rate: u32,
    source_rate: u32,
    channels: usize,
    gain: f32,
    fade_in: FadeEnvelope,
    dither: bool,
    rng: SmallRng,
    quality: ResampleQuality,
    converter: Option<RateConverter>,
    staged: Vec<Frame>,
    pending: Vec<Frame>,
    /// Frames still allowed by the item's size limit
    remaining: Option<u64>,
    metadata: Option<TrackMetadata>,
    eject_requested: bool,
}

impl DecodeSink {
    pub fn new(host_rate: u32) -> Self {
        Self {
            host_rate,
            source_rate: host_rate,
            channels: 2,
            gain: 1.0,
            fade_in: FadeEnvelope::unity(),
            dither: false,
            rng: SmallRng::from_entropy(),
            quality: ResampleQuality::default(),
            converter: None,
            staged: Vec::with_capacity(DECODE_BLOCK),
            pending: Vec::with_capacity(DECODE_BLOCK * 2),
            remaining: None,
            metadata: None,
            eject_requested: false,
        }
    }

    /// Prepare for a new item
    pub(crate) fn begin(
        &mut self,
        gain: f32,
        fade_in: FadeEnvelope,
        size_seconds: Option<f32>,
        quality: ResampleQuality,
    ) {
        self.source_rate = self.host_rate;
        self.channels = 2;
        self.gain = gain;
        self.fade_in = fade_in;
        self.quality = quality;
        self.converter = None;
        self.staged.clear();
        self.pending.clear();
        self.remaining = size_seconds
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(|s| (s as f64 * self.host_rate as f64) as u64);
        self.eject_requested = false;
    }

    pub(crate) fn set_dither(&mut self, dither: bool) {
        self.dither = dither;
    }

    pub fn host_rate(&self) -> u32 {
        self.host_rate
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Declare the source format; a rate other than the host's enables
    /// conversion
    pub fn set_format(&mut self, sample_rate: u32, channels: usize) -> Result<(), DecodeError> {
        if sample_rate == 0 || channels == 0 {
            return Err(DecodeError::Unsupported(format!(
                "{channels} channels at {sample_rate} Hz"
            )));
        }
        self.source_rate = sample_rate;
        self.channels = channels;
        self.converter = if sample_rate == self.host_rate {
            None
        } else {
            Some(
                RateConverter::new(sample_rate, self.host_rate, self.quality)
                    .map_err(|e| DecodeError::Unsupported(e.to_string()))?,
            )
        };
        Ok(())
    }

    /// Interleaved signed 16-bit samples
    pub fn push_i16(&mut self, interleaved: &[i16]) {
        let channels = self.channels;
        for frame in interleaved.chunks_exact(channels) {
            let l = frame[0] as f32 / 32768.0;
            let r = frame.get(1).map_or(l, |&s| s as f32 / 32768.0);
            self.stage(l, r);
        }
        self.convert();
    }

    /// Interleaved float samples
    pub fn push_f32(&mut self, interleaved: &[f32]) {
        let channels = self.channels;
        for frame in interleaved.chunks_exact(channels) {
            let l = frame[0];
            let r = frame.get(1).copied().unwrap_or(l);
            self.stage(l, r);
        }
        self.convert();
    }

    /// One slice per channel
    pub fn push_planar(&mut self, planes: &[&[f32]]) {
        let Some(first) = planes.first() else {
            return;
        };
        let second = planes.get(1).unwrap_or(first);
        for (&l, &r) in first.iter().zip(second.iter()) {
            self.stage(l, r);
        }
        self.convert();
    }

    pub fn set_metadata(&mut self, metadata: TrackMetadata) {
        self.metadata = Some(metadata);
    }

    /// End the current item after this step
    pub fn request_eject(&mut self) {
        self.eject_requested = true;
    }

    #[inline]
    fn stage(&mut self, l: f32, r: f32) {
        let g = self.gain * self.fade_in.next_gain();
        let (mut l, mut r) = (l * g, r * g);
        if self.dither {
            // triangular noise of one 16-bit step
            const LSB: f32 = 1.0 / 32768.0;
            l += (self.rng.gen::<f32>() - self.rng.gen::<f32>()) * LSB;
            r += (self.rng.gen::<f32>() - self.rng.gen::<f32>()) * LSB;
        }
        self.staged.push([l, r]);
    }

    fn convert(&mut self) {
        let before = self.pending.len();
        match self.converter.as_mut() {
            Some(converter) => {
                if let Err(e) = converter.process(&self.staged, &mut self.pending) {
                    warn!(error = %e, "Sample rate conversion failed");
                    self.eject_requested = true;
                }
            }
            None => self.pending.extend_from_slice(&self.staged),
        }
        self.staged.clear();
        self.apply_size_limit(before);
    }

    /// Count frames appended after `before` against the size limit
    fn apply_size_limit(&mut self, before: usize) {
        if let Some(remaining) = self.remaining.as_mut() {
            let added = (self.pending.len() - before) as u64;
            if added >= *remaining {
                self.pending.truncate(before + *remaining as usize);
                *remaining = 0;
                self.eject_requested = true;
            } else {
                *remaining -= added;
            }
        }
    }

    /// Convert the converter's tail at end of stream
    pub(crate) fn finish(&mut self) {
        let before = self.pending.len();
        if let Some(converter) = self.converter.as_mut() {
            if let Err(e) = converter.flush(&mut self.pending) {
                warn!(error = %e, "Sample rate conversion flush failed");
            }
            self.apply_size_limit(before);
        }
    }

    /// Drop converted frames that never reached the ring
    pub(crate) fn discard_pending(&mut self) {
        self.staged.clear();
        self.pending.clear();
    }

    pub(crate) fn pending(&self) -> &[Frame] {
        &self.pending
    }

    /// Forget the first `n` pending frames once they reached the ring
    pub(crate) fn consume(&mut self, n: usize) {
        self.pending.drain(..n.min(self.pending.len()));
    }

    pub(crate) fn take_metadata(&mut self) -> Option<TrackMetadata> {
        self.metadata.take()
    }

    pub(crate) fn eject_requested(&self) -> bool {
        self.eject_requested
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then_some(v)
    })
}

/// Built-in signal shapes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Silence,
    Sine { freq: f32, amplitude: f32 },
}

/// Generator for `signal:silence?seconds=N` and
/// `signal:sine?freq=F&seconds=N[&amp=A][&rate=R]`
#[derive(Debug)]
pub struct SignalDecoder {
    signal: Signal,
    seconds: Option<f32>,
    rate: Option<u32>,
    skip_seconds: f32,
    position: u64,
    total: Option<u64>,
    active_rate: u32,
    scratch: Vec<f32>,
}

impl SignalDecoder {
    pub fn parse(path: &str, seek_seconds: f32) -> Option<Self> {
        let spec = path.strip_prefix("signal:")?;
        let (shape, query) = spec.split_once('?').unwrap_or((spec, ""));
        let number = |key: &str| query_param(query, key).and_then(|v| v.parse::<f32>().ok());

        let signal = match shape {
            "silence" => Signal::Silence,
            "sine" => Signal::Sine {
                freq: number("freq").unwrap_or(1000.0),
                amplitude: number("amp").unwrap_or(0.5).clamp(0.0, 1.0),
            },
            _ => return None,
        };
        Some(Self {
            signal,
            seconds: number("seconds").filter(|s| *s >= 0.0),
            rate: number("rate").map(|r| r as u32).filter(|r| *r > 0),
            skip_seconds: seek_seconds.max(0.0),
            position: 0,
            total: None,
            active_rate: 0,
            scratch: Vec::with_capacity(DECODE_BLOCK),
        })
    }
}

impl Decoder for SignalDecoder {
    fn init(&mut self, sink: &mut DecodeSink) -> Result<(), DecodeError> {
        let rate = self.rate.unwrap_or_else(|| sink.host_rate());
        sink.set_format(rate, 1)?;
        self.active_rate = rate;
        self.position = (self.skip_seconds as f64 * rate as f64) as u64;
        self.total = self.seconds.map(|s| (s as f64 * rate as f64) as u64);
        Ok(())
    }

    fn decode_step(&mut self, sink: &mut DecodeSink) -> DecodeStatus {
        let left = self
            .total
            .map_or(DECODE_BLOCK as u64, |t| t.saturating_sub(self.position));
        let n = left.min(DECODE_BLOCK as u64) as usize;
        if n == 0 {
            return DecodeStatus::EndOfStream;
        }

        self.scratch.clear();
        match self.signal {
            Signal::Silence => self.scratch.resize(n, 0.0),
            Signal::Sine { freq, amplitude } => {
                let step = std::f64::consts::TAU * freq as f64 / self.active_rate as f64;
                let start = self.position;
                self.scratch.extend(
                    (0..n as u64)
                        .map(|i| amplitude * (((start + i) as f64 * step).sin() as f32)),
                );
            }
        }
        sink.push_f32(&self.scratch);
        self.position += n as u64;
        DecodeStatus::Continue
    }
}

#[derive(Debug)]
pub struct SignalFactory;

impl DecoderFactory for SignalFactory {
    fn kind(&self) -> DecoderKind {
        DecoderKind::Signal
    }

    fn open(&self, path: &str, seek_seconds: f32) -> Option<Box<dyn Decoder>> {
        SignalDecoder::parse(path, seek_seconds).map(|d| Box::new(d) as Box<dyn Decoder>)
    }
}

/// Headerless little-endian 16-bit interleaved PCM
pub struct RawPcmDecoder {
    path: String,
    rate: Option<u32>,
    channels: usize,
    seek_seconds: f32,
    reader: Option<BufReader<File>>,
    bytes: Vec<u8>,
    samples: Vec<i16>,
}

impl RawPcmDecoder {
    pub fn new(path: &str, rate: Option<u32>, channels: usize, seek_seconds: f32) -> Self {
        Self {
            path: path.to_string(),
            rate,
            channels: channels.max(1),
            seek_seconds: seek_seconds.max(0.0),
            reader: None,
            bytes: Vec::new(),
            samples: Vec::new(),
        }
    }
}

impl Decoder for RawPcmDecoder {
    fn init(&mut self, sink: &mut DecodeSink) -> Result<(), DecodeError> {
        let rate = self.rate.unwrap_or_else(|| sink.host_rate());
        sink.set_format(rate, self.channels)?;

        let mut reader = BufReader::new(File::open(&self.path)?);
        let frame_bytes = 2 * self.channels as u64;
        let offset = (self.seek_seconds as f64 * rate as f64) as u64 * frame_bytes;
        if offset > 0 {
            reader.seek(SeekFrom::Start(offset))?;
        }
        self.bytes = vec![0; DECODE_BLOCK * frame_bytes as usize];
        self.samples = Vec::with_capacity(DECODE_BLOCK * self.channels);
        self.reader = Some(reader);
        Ok(())
    }

    fn decode_step(&mut self, sink: &mut DecodeSink) -> DecodeStatus {
        let Some(reader) = self.reader.as_mut() else {
            return DecodeStatus::EndOfStream;
        };
        let mut filled = 0;
        while filled < self.bytes.len() {
            match reader.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return DecodeStatus::Error(e.into()),
            }
        }
        let usable = filled - filled % (2 * self.channels);
        if usable == 0 {
            return DecodeStatus::EndOfStream;
        }

        self.samples.clear();
        self.samples.extend(
            self.bytes[..usable]
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );
        sink.push_i16(&self.samples);
        DecodeStatus::Continue
    }

    fn eject(&mut self) {
        self.reader = None;
    }
}

/// Opens `.raw`/`.pcm` files with a fixed channel count
#[derive(Debug, Clone)]
pub struct RawPcmFactory {
    pub channels: usize,
    /// `None` means the host rate
    pub rate: Option<u32>,
}

impl Default for RawPcmFactory {
    fn default() -> Self {
        Self {
            channels: 2,
            rate: None,
        }
    }
}

impl DecoderFactory for RawPcmFactory {
    fn kind(&self) -> DecoderKind {
        DecoderKind::Pcm
    }

    fn open(&self, path: &str, seek_seconds: f32) -> Option<Box<dyn Decoder>> {
        Path::new(path).is_file().then(|| {
            Box::new(RawPcmDecoder::new(path, self.rate, self.channels, seek_seconds))
                as Box<dyn Decoder>
        })
    }
}
