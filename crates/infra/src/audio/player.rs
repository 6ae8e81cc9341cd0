//! Player transport
//!
//! A player owns a decode thread and two pairs of stereo ring buffers. The
//! decode thread writes into the *active* pair; the realtime reader plays
//! the active pair and, after an eject, fades out the other one. Stopping
//! playback swaps the roles of the two pairs so fresh content never waits
//! behind a fade.
//!
//! Control calls (`play`, `eject`, ...) are synchronous: the command goes
//! over a single-slot channel and the caller blocks on the decode thread's
//! acknowledgement. The reader never blocks, locks or allocates.

use super::decoder::{
    DecodeSink, DecodeStatus, Decoder, DecoderKind, DecoderRegistry, Frame, TrackMetadata,
    DECODE_BLOCK, FADE_IN_SECONDS, FADE_IN_START,
};
use super::lockfree_buffer::{ring_buffer, Consumer, Producer};
use super::resample::{clamp_speed, ResampleFailure, ResampleQuality, SpeedConverter};
use crossbeam::channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use onair_core::domain::audio::BlockSource;
use onair_core::domain::dsp::params::FADE_FLOOR;
use onair_core::domain::dsp::{db_to_gain, FadeEnvelope};
use onair_core::domain::mixer::command::AtomicF32;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Ring space the decode thread waits for before the next step
const MIN_FREE: usize = DECODE_BLOCK;

/// Decode thread nap while the ring is full
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// Reader scratch size; longer blocks are processed in pieces
const SCRATCH_FRAMES: usize = 1024;

/// Peak above which a block counts as signal
const SIGNAL_THRESHOLD: f32 = 1e-4;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No decoder accepted {0}")]
    NoDecoder(String),

    #[error("Decode thread is gone")]
    ThreadGone,

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Resampler: {0}")]
    Resample(#[from] ResampleFailure),
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Stopped,
    Initiating,
    Playing,
    Ejecting,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initiating,
            2 => Self::Playing,
            3 => Self::Ejecting,
            _ => Self::Stopped,
        }
    }
}

/// What happens to audio still buffered when playback stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeMode {
    /// Discard immediately
    None,
    #[default]
    Short,
    Long,
}

impl FadeMode {
    pub fn seconds(self) -> f32 {
        match self {
            Self::None => 0.0,
            Self::Short => 5.0,
            Self::Long => 10.0,
        }
    }

    pub fn from_control(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" | "none" => Some(Self::None),
            "1" | "short" => Some(Self::Short),
            "2" | "long" => Some(Self::Long),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::None,
            2 => Self::Long,
            _ => Self::Short,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Short => 1,
            Self::Long => 2,
        }
    }
}

fn quality_from_u8(value: u8) -> ResampleQuality {
    match value {
        0 => ResampleQuality::Linear,
        2 => ResampleQuality::Sinc,
        _ => ResampleQuality::Cubic,
    }
}

fn quality_as_u8(quality: ResampleQuality) -> u8 {
    match quality {
        ResampleQuality::Linear => 0,
        ResampleQuality::Cubic => 1,
        ResampleQuality::Sinc => 2,
    }
}

/// One item to play
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayRequest {
    pub path: String,
    pub seek_seconds: f32,
    /// Stop after this much output
    pub size_seconds: Option<f32>,
    pub gain_db: f32,
    /// The new context id is above this
    pub context_hint: u32,
    pub fade_in: bool,
}

impl PlayRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn seek(mut self, seconds: f32) -> Self {
        self.seek_seconds = seconds;
        self
    }

    pub fn size(mut self, seconds: f32) -> Self {
        self.size_seconds = Some(seconds);
        self
    }

    pub fn gain_db(mut self, db: f32) -> Self {
        self.gain_db = db;
        self
    }

    pub fn context_hint(mut self, hint: u32) -> Self {
        self.context_hint = hint;
        self
    }

    pub fn fade_in(mut self) -> Self {
        self.fade_in = true;
        self
    }
}

/// Snapshot of one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub name: String,
    pub state: TransportState,
    pub context_id: u32,
    pub elapsed_ms: u64,
    pub playing: bool,
    pub paused: bool,
    pub signal_present: bool,
    pub silence_seconds: f32,
    pub metadata_pending: bool,
    pub buffered_seconds: f32,
    pub decoded_seconds: f32,
    pub speed: f32,
}

/// Smallest odd id above both `current` and `hint`
pub fn next_odd(current: u32, hint: u32) -> u32 {
    let base = current.max(hint);
    if base % 2 == 0 {
        base.wrapping_add(1)
    } else {
        base.wrapping_add(2)
    }
}

fn next_even(current: u32) -> u32 {
    if current % 2 == 1 {
        current.wrapping_add(1)
    } else {
        current
    }
}

/// State both sides of the transport see
struct Shared {
    /// Bumped on every buffer swap; the low bit selects the active pair
    swap_seq: AtomicUsize,
    /// Producer position of each pair when it stopped being active
    fade_end: [AtomicUsize; 2],
    fade_multiplier: AtomicF32,
    paused: AtomicBool,
    dither: AtomicBool,
    speed: AtomicF32,
    fade_mode: AtomicU8,
    quality: AtomicU8,
    state: AtomicU8,
    context_id: AtomicU32,
    elapsed_frames: AtomicU64,
    decoded_frames: AtomicU64,
    buffered_frames: AtomicUsize,
    signal_present: AtomicBool,
    silence_frames: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            swap_seq: AtomicUsize::new(0),
            fade_end: [AtomicUsize::new(0), AtomicUsize::new(0)],
            fade_multiplier: AtomicF32::new(0.0),
            paused: AtomicBool::new(false),
            dither: AtomicBool::new(false),
            speed: AtomicF32::new(1.0),
            fade_mode: AtomicU8::new(FadeMode::default().as_u8()),
            quality: AtomicU8::new(quality_as_u8(ResampleQuality::default())),
            state: AtomicU8::new(TransportState::Stopped as u8),
            context_id: AtomicU32::new(0),
            elapsed_frames: AtomicU64::new(0),
            decoded_frames: AtomicU64::new(0),
            buffered_frames: AtomicUsize::new(0),
            signal_present: AtomicBool::new(false),
            silence_frames: AtomicU64::new(0),
        }
    }

    fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

enum Command {
    Play {
        items: Vec<PlayRequest>,
        looping: bool,
        flush: bool,
    },
    Eject,
    Shutdown,
}

#[derive(Debug)]
enum Ack {
    Started(u32),
    Failed(String),
    Stopped(u32),
}

/// Control half of a player
pub struct PlayerTransport {
    name: String,
    sample_rate: u32,
    shared: Arc<Shared>,
    control: Mutex<()>,
    commands: Sender<Command>,
    acks: Receiver<Ack>,
    converters: Sender<SpeedConverter>,
    retired: Receiver<SpeedConverter>,
    metadata: Receiver<TrackMetadata>,
    thread: Option<JoinHandle<()>>,
}

impl PlayerTransport {
    /// Allocate the rings, spawn the decode thread and hand back the
    /// realtime reader
    pub fn create(
        name: &str,
        sample_rate: u32,
        buffer_seconds: f32,
        decoders: Arc<DecoderRegistry>,
    ) -> Result<(PlayerTransport, PlayerReader)> {
        let capacity = (sample_rate as f64 * buffer_seconds as f64).ceil();
        if sample_rate == 0 || !capacity.is_finite() || capacity < 1.0 {
            return Err(TransportError::Allocation(format!(
                "{buffer_seconds} s at {sample_rate} Hz"
            )));
        }
        let capacity = capacity as usize;

        let (p0, c0) = ring_buffer::<Frame>(capacity);
        let (p1, c1) = ring_buffer::<Frame>(capacity);
        let ring_seconds = p0.capacity() as f32 / sample_rate as f32;

        let shared = Arc::new(Shared::new());
        let (command_tx, command_rx) = bounded(1);
        let (ack_tx, ack_rx) = bounded(1);
        let (converter_tx, converter_rx) = bounded(1);
        let (retire_tx, retire_rx) = bounded(4);
        let (metadata_tx, metadata_rx) = unbounded();

        let converter = SpeedConverter::new(ResampleQuality::default())?;

        let worker = DecodeThread {
            name: name.to_string(),
            sample_rate,
            fade_limit_seconds: buffer_seconds.min(ring_seconds),
            shared: Arc::clone(&shared),
            registry: decoders,
            producers: [p0, p1],
            sink: DecodeSink::new(sample_rate),
            session: None,
            commands: command_rx,
            acks: ack_tx,
            metadata: metadata_tx,
        };
        let thread = std::thread::Builder::new()
            .name(format!("player-{name}"))
            .spawn(move || worker.run())
            .map_err(|e| TransportError::Allocation(e.to_string()))?;

        info!(
            player = name,
            sample_rate,
            ring_frames = capacity,
            "Player transport created"
        );

        let transport = PlayerTransport {
            name: name.to_string(),
            sample_rate,
            shared: Arc::clone(&shared),
            control: Mutex::new(()),
            commands: command_tx,
            acks: ack_rx,
            converters: converter_tx,
            retired: retire_rx,
            metadata: metadata_rx,
            thread: Some(thread),
        };
        let reader = PlayerReader {
            shared,
            consumers: [c0, c1],
            seen_seq: 0,
            fade: None,
            scratch: vec![[0.0; 2]; SCRATCH_FRAMES],
            converter,
            converters: converter_rx,
            retire: retire_tx,
            sample_rate,
        };
        Ok((transport, reader))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn request(&self, command: Command) -> Result<Ack> {
        let _guard = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        self.commands
            .send(command)
            .map_err(|_| TransportError::ThreadGone)?;
        self.acks.recv().map_err(|_| TransportError::ThreadGone)
    }

    fn started(ack: Ack) -> Result<u32> {
        match ack {
            Ack::Started(id) => Ok(id),
            Ack::Failed(path) => Err(TransportError::NoDecoder(path)),
            Ack::Stopped(_) => Err(TransportError::ThreadGone),
        }
    }

    /// Stop what is playing and start `request`; returns the new odd
    /// context id
    pub fn play(&self, request: PlayRequest) -> Result<u32> {
        self.play_many(vec![request], false)
    }

    /// Play a sequence, skipping items no decoder accepts
    pub fn play_many(&self, playlist: Vec<PlayRequest>, looping: bool) -> Result<u32> {
        Self::started(self.request(Command::Play {
            items: playlist,
            looping,
            flush: true,
        })?)
    }

    /// Start `request` behind what is already buffered
    pub fn play_no_flush(&self, request: PlayRequest) -> Result<u32> {
        Self::started(self.request(Command::Play {
            items: vec![request],
            looping: false,
            flush: false,
        })?)
    }

    /// Stop playback; returns the new even context id
    pub fn eject(&self) -> Result<u32> {
        match self.request(Command::Eject)? {
            Ack::Stopped(id) => Ok(id),
            _ => Err(TransportError::ThreadGone),
        }
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    pub fn unpause(&self) {
        self.shared.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Applies from the next decode step
    pub fn set_dither(&self, enabled: bool) {
        self.shared.dither.store(enabled, Ordering::Relaxed);
    }

    /// Clamped to 0.5..=2.0
    pub fn set_playback_speed(&self, speed: f32) {
        let speed = clamp_speed(speed);
        debug!(player = %self.name, speed, "Playback speed");
        self.shared.speed.store(speed);
    }

    pub fn set_fade_mode(&self, mode: FadeMode) {
        self.shared.fade_mode.store(mode.as_u8(), Ordering::Relaxed);
    }

    pub fn fade_mode(&self) -> FadeMode {
        FadeMode::from_u8(self.shared.fade_mode.load(Ordering::Relaxed))
    }

    /// Used by the next decode-side conversion and, right away, by the
    /// speed converter
    pub fn set_resample_quality(&self, quality: ResampleQuality) -> Result<()> {
        self.shared
            .quality
            .store(quality_as_u8(quality), Ordering::Relaxed);

        // converters the reader swapped out are freed here
        while self.retired.try_recv().is_ok() {}

        let converter = SpeedConverter::new(quality)?;
        match self.converters.try_send(converter) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(player = %self.name, "Previous quality change still pending");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(TransportError::ThreadGone),
        }
    }

    pub fn resample_quality(&self) -> ResampleQuality {
        quality_from_u8(self.shared.quality.load(Ordering::Relaxed))
    }

    pub fn context_id(&self) -> u32 {
        self.shared.context_id.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TransportState {
        self.shared.state()
    }

    pub fn stats(&self) -> PlayerStats {
        let sr = self.sample_rate as f32;
        let state = self.state();
        let paused = self.is_paused();
        PlayerStats {
            name: self.name.clone(),
            state,
            context_id: self.context_id(),
            elapsed_ms: self.shared.elapsed_frames.load(Ordering::Relaxed) * 1000
                / self.sample_rate as u64,
            playing: state == TransportState::Playing && !paused,
            paused,
            signal_present: self.shared.signal_present.load(Ordering::Relaxed),
            silence_seconds: self.shared.silence_frames.load(Ordering::Relaxed) as f32 / sr,
            metadata_pending: !self.metadata.is_empty(),
            buffered_seconds: self.shared.buffered_frames.load(Ordering::Relaxed) as f32 / sr,
            decoded_seconds: self.shared.decoded_frames.load(Ordering::Relaxed) as f32 / sr,
            speed: self.shared.speed.load(),
        }
    }

    /// Latest metadata reported since the last call
    pub fn take_metadata(&self) -> Option<TrackMetadata> {
        self.metadata.try_iter().last()
    }

    /// Ask the decode thread to stop, wait for it and join
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        if let Err(e) = self.request(Command::Shutdown) {
            debug!(player = %self.name, error = %e, "Decode thread already stopped");
        }
        thread.join().map_err(|_| TransportError::ThreadGone)?;
        info!(player = %self.name, "Player transport shut down");
        Ok(())
    }
}

impl Drop for PlayerTransport {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(player = %self.name, error = %e, "Player shutdown failed");
        }
    }
}

struct Session {
    decoder: Box<dyn Decoder>,
    kind: DecoderKind,
    playlist: Vec<PlayRequest>,
    index: usize,
    looping: bool,
    finished: bool,
}

struct DecodeThread {
    name: String,
    sample_rate: u32,
    fade_limit_seconds: f32,
    shared: Arc<Shared>,
    registry: Arc<DecoderRegistry>,
    producers: [Producer<Frame>; 2],
    sink: DecodeSink,
    session: Option<Session>,
    commands: Receiver<Command>,
    acks: Sender<Ack>,
    metadata: Sender<TrackMetadata>,
}

impl DecodeThread {
    fn run(mut self) {
        debug!(player = %self.name, "Decode thread started");
        loop {
            let command = if self.session.is_none() {
                match self.commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => Some(Command::Shutdown),
                }
            } else {
                match self.commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => Some(Command::Shutdown),
                }
            };

            let command = match command {
                Some(command) => command,
                None if self.pump() => continue,
                None => match self.commands.recv_timeout(IDLE_WAIT) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => Command::Shutdown,
                },
            };

            if !self.handle(command) {
                break;
            }
        }
        debug!(player = %self.name, "Decode thread stopped");
    }

    /// Returns false once the thread should exit
    fn handle(&mut self, command: Command) -> bool {
        let (ack, keep_running) = match command {
            Command::Play {
                items,
                looping,
                flush,
            } => (self.start(items, looping, flush), true),
            Command::Eject => (Ack::Stopped(self.stop()), true),
            Command::Shutdown => {
                self.close_session();
                self.shared.set_state(TransportState::Stopped);
                (Ack::Stopped(self.shared.context_id.load(Ordering::Acquire)), false)
            }
        };
        // the control side may be gone during teardown
        let _ = self.acks.send(ack);
        keep_running
    }

    fn active(&self) -> usize {
        self.shared.swap_seq.load(Ordering::Relaxed) & 1
    }

    fn active_has_content(&self) -> bool {
        let producer = &self.producers[self.active()];
        producer.free_len() < producer.capacity()
    }

    fn fade_multiplier(&self) -> f32 {
        let mode = FadeMode::from_u8(self.shared.fade_mode.load(Ordering::Relaxed));
        let seconds = mode.seconds().min(self.fade_limit_seconds);
        FadeEnvelope::fade_out(self.sample_rate, seconds).multiplier()
    }

    /// Hand the active pair to the reader's fade and activate the other
    fn swap(&mut self, multiplier: f32) {
        let old = self.active();
        let new = 1 - old;
        // an unfinished fade on the new pair is dropped
        self.producers[new].discard();
        self.shared.fade_end[old].store(self.producers[old].written(), Ordering::Relaxed);
        self.shared.fade_multiplier.store(multiplier);
        self.shared.swap_seq.fetch_add(1, Ordering::Release);
        debug!(player = %self.name, from = old, to = new, multiplier, "Buffer swap");
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.decoder.eject();
        }
        self.sink.discard_pending();
    }

    fn start(&mut self, items: Vec<PlayRequest>, looping: bool, flush: bool) -> Ack {
        let was_paused = self.shared.paused.swap(false, Ordering::AcqRel);
        self.shared.set_state(TransportState::Initiating);
        self.close_session();

        if flush && self.active_has_content() {
            let multiplier = if was_paused { 0.0 } else { self.fade_multiplier() };
            self.swap(multiplier);
        }

        for index in 0..items.len() {
            let Some((kind, decoder)) = self.open_item(&items[index]) else {
                continue;
            };
            let current = self.shared.context_id.load(Ordering::Acquire);
            let id = next_odd(current, items[index].context_hint);
            info!(
                player = %self.name,
                path = %items[index].path,
                %kind,
                context_id = id,
                "Playback started"
            );
            self.session = Some(Session {
                decoder,
                kind,
                playlist: items,
                index,
                looping,
                finished: false,
            });
            self.shared.elapsed_frames.store(0, Ordering::Relaxed);
            self.shared.context_id.store(id, Ordering::Release);
            self.shared.set_state(TransportState::Playing);
            return Ack::Started(id);
        }

        let id = next_even(self.shared.context_id.load(Ordering::Acquire));
        self.shared.context_id.store(id, Ordering::Release);
        self.shared.set_state(TransportState::Stopped);
        let path = items
            .iter()
            .map(|item| item.path.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        warn!(player = %self.name, %path, "No decoder accepted the request");
        Ack::Failed(path)
    }

    fn stop(&mut self) -> u32 {
        let was_paused = self.shared.paused.swap(false, Ordering::AcqRel);
        self.shared.set_state(TransportState::Ejecting);
        self.close_session();

        if self.active_has_content() {
            let multiplier = if was_paused { 0.0 } else { self.fade_multiplier() };
            self.swap(multiplier);
        }

        let id = next_even(self.shared.context_id.load(Ordering::Acquire));
        self.shared.context_id.store(id, Ordering::Release);
        self.shared.set_state(TransportState::Stopped);
        info!(player = %self.name, context_id = id, "Playback stopped");
        id
    }

    fn open_item(&mut self, item: &PlayRequest) -> Option<(DecoderKind, Box<dyn Decoder>)> {
        let fade_in = if item.seek_seconds > 0.0 || item.fade_in {
            FadeEnvelope::fade_in(self.sample_rate, FADE_IN_SECONDS, FADE_IN_START)
        } else {
            FadeEnvelope::unity()
        };
        let quality = quality_from_u8(self.shared.quality.load(Ordering::Relaxed));
        self.sink
            .begin(db_to_gain(item.gain_db), fade_in, item.size_seconds, quality);
        self.sink
            .set_dither(self.shared.dither.load(Ordering::Relaxed));
        self.registry
            .open(&item.path, item.seek_seconds, &mut self.sink)
    }

    /// Move decoded audio toward the ring. Returns false when the ring is
    /// full and the thread should wait.
    fn pump(&mut self) -> bool {
        let active = self.active();
        if !self.sink.pending().is_empty() {
            let written = self.producers[active].write(self.sink.pending());
            self.sink.consume(written);
            self.shared
                .decoded_frames
                .fetch_add(written as u64, Ordering::Relaxed);
            if !self.sink.pending().is_empty() {
                return false;
            }
        }

        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.finished {
            self.advance();
            return true;
        }
        if self.producers[active].free_len() < MIN_FREE {
            return false;
        }

        self.sink
            .set_dither(self.shared.dither.load(Ordering::Relaxed));
        match session.decoder.decode_step(&mut self.sink) {
            DecodeStatus::Continue => {
                if self.sink.eject_requested() {
                    session.finished = true;
                }
            }
            DecodeStatus::EndOfStream => {
                self.sink.finish();
                session.finished = true;
            }
            DecodeStatus::Error(e) => {
                warn!(player = %self.name, kind = %session.kind, error = %e, "Decode error");
                self.sink.finish();
                session.finished = true;
            }
        }
        if let Some(metadata) = self.sink.take_metadata() {
            let _ = self.metadata.send(metadata);
        }
        true
    }

    /// Next playlist item into the same buffer, or drain what is left
    fn advance(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.decoder.eject();

        let count = session.playlist.len();
        for step in 1..=count {
            let next = session.index + step;
            if next >= count && !session.looping {
                break;
            }
            let index = next % count;
            let Some((kind, decoder)) = self.open_item(&session.playlist[index]) else {
                continue;
            };
            let id = self
                .shared
                .context_id
                .load(Ordering::Acquire)
                .wrapping_add(2);
            info!(
                player = %self.name,
                path = %session.playlist[index].path,
                %kind,
                context_id = id,
                "Playlist advanced"
            );
            session.decoder = decoder;
            session.kind = kind;
            session.index = index;
            session.finished = false;
            self.session = Some(session);
            self.shared.context_id.store(id, Ordering::Release);
            return;
        }

        // buffered audio plays out at unity; the reader settles the state
        let id = next_even(self.shared.context_id.load(Ordering::Acquire));
        self.shared.context_id.store(id, Ordering::Release);
        self.shared.set_state(TransportState::Ejecting);
        info!(player = %self.name, context_id = id, "Playlist finished, draining");
    }
}

struct Fade {
    pair: usize,
    envelope: FadeEnvelope,
    limit: usize,
}

/// Realtime half of a player
pub struct PlayerReader {
    shared: Arc<Shared>,
    consumers: [Consumer<Frame>; 2],
    seen_seq: usize,
    fade: Option<Fade>,
    scratch: Vec<Frame>,
    converter: SpeedConverter,
    converters: Receiver<SpeedConverter>,
    retire: Sender<SpeedConverter>,
    sample_rate: u32,
}

impl PlayerReader {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_fading(&self) -> bool {
        self.fade.is_some()
    }

    fn poll_control(&mut self) {
        let seq = self.shared.swap_seq.load(Ordering::Acquire);
        if seq != self.seen_seq {
            self.seen_seq = seq;
            let pair = 1 - (seq & 1);
            let limit = self.shared.fade_end[pair].load(Ordering::Relaxed);
            let multiplier = self.shared.fade_multiplier.load();
            if multiplier > 0.0 {
                self.fade = Some(Fade {
                    pair,
                    envelope: FadeEnvelope::from_multiplier(multiplier),
                    limit,
                });
            } else {
                self.consumers[pair].skip_to(limit);
                self.fade = None;
            }
            self.converter.reset();
        }

        if let Ok(converter) = self.converters.try_recv() {
            let old = std::mem::replace(&mut self.converter, converter);
            // dropped on the control thread
            let _ = self.retire.try_send(old);
        }
    }

    /// Active pair into `left`/`right`; returns (content frames, input frames)
    fn render_active(&mut self, left: &mut [f32], right: &mut [f32]) -> (usize, usize) {
        if self.shared.paused.load(Ordering::Acquire) {
            left.fill(0.0);
            right.fill(0.0);
            return (0, 0);
        }

        let consumer = &mut self.consumers[self.seen_seq & 1];
        let speed = self.shared.speed.load();
        if speed == 1.0 {
            let n = left.len();
            let scratch = &mut self.scratch[..n];
            let got = consumer.read(scratch);
            for ((l, r), frame) in left.iter_mut().zip(right.iter_mut()).zip(scratch.iter()) {
                *l = frame[0];
                *r = frame[1];
            }
            (got, got)
        } else {
            if self.converter.speed() != speed {
                self.converter.set_speed(speed);
            }
            let (consumed, produced) = self.converter.render(left, right, |buf| consumer.read(buf));
            (produced, consumed)
        }
    }

    /// Add the fading pair; returns the frames it contributed
    fn mix_fade(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        let Some(fade) = self.fade.as_mut() else {
            return 0;
        };
        let n = left.len();
        let scratch = &mut self.scratch[..n];
        let got = self.consumers[fade.pair].read_until(fade.limit, scratch);
        for (i, frame) in scratch[..got].iter().enumerate() {
            let g = fade.envelope.next_gain();
            left[i] += frame[0] * g;
            right[i] += frame[1] * g;
        }

        if got < n || fade.envelope.gain() < FADE_FLOOR {
            let (pair, limit) = (fade.pair, fade.limit);
            self.consumers[pair].skip_to(limit);
            self.fade = None;
        }
        got
    }

    fn update_meters(&self, left: &[f32], right: &[f32], input_frames: usize) {
        let frames = left.len();
        let peak = left
            .iter()
            .chain(right.iter())
            .fold(0.0f32, |m, &s| m.max(s.abs()));
        if peak > SIGNAL_THRESHOLD {
            self.shared.signal_present.store(true, Ordering::Relaxed);
            self.shared.silence_frames.store(0, Ordering::Relaxed);
        } else {
            self.shared.signal_present.store(false, Ordering::Relaxed);
            self.shared
                .silence_frames
                .fetch_add(frames as u64, Ordering::Relaxed);
        }
        self.shared
            .elapsed_frames
            .fetch_add(input_frames as u64, Ordering::Relaxed);

        let buffered = self.consumers[self.seen_seq & 1].len();
        self.shared
            .buffered_frames
            .store(buffered, Ordering::Relaxed);
        if buffered == 0 && self.fade.is_none() {
            let _ = self.shared.state.compare_exchange(
                TransportState::Ejecting as u8,
                TransportState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }
    }
}

impl BlockSource for PlayerReader {
    fn read_block(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        let frames = left.len().min(right.len());
        let (left, right) = (&mut left[..frames], &mut right[..frames]);
        self.poll_control();

        let mut content = 0;
        let mut input = 0;
        let mut offset = 0;
        while offset < frames {
            let n = (frames - offset).min(SCRATCH_FRAMES);
            let l = &mut left[offset..offset + n];
            let r = &mut right[offset..offset + n];
            let (active, consumed) = self.render_active(l, r);
            let faded = self.mix_fade(l, r);
            content += active.max(faded);
            input += consumed;
            offset += n;
        }

        self.update_meters(left, right, input);
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::{DecodeError, DecoderFactory};
    use std::time::Instant;

    const SR: u32 = 8000;

    fn transport(buffer_seconds: f32) -> (PlayerTransport, PlayerReader) {
        PlayerTransport::create(
            "test",
            SR,
            buffer_seconds,
            Arc::new(DecoderRegistry::with_builtin()),
        )
        .unwrap()
    }

    fn sine(amp: f32) -> PlayRequest {
        PlayRequest::new(format!("signal:sine?freq=100&seconds=60&amp={amp}"))
    }

    fn pull(reader: &mut PlayerReader, frames: usize) -> Vec<Frame> {
        let mut out = Vec::with_capacity(frames);
        let mut left = [0.0; 256];
        let mut right = [0.0; 256];
        while out.len() < frames {
            let n = (frames - out.len()).min(256);
            reader.read_block(&mut left[..n], &mut right[..n]);
            out.extend(left[..n].iter().zip(right[..n].iter()).map(|(&l, &r)| [l, r]));
        }
        out
    }

    fn peak(frames: &[Frame]) -> f32 {
        frames
            .iter()
            .fold(0.0f32, |m, f| m.max(f[0].abs()).max(f[1].abs()))
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn wait_decoded(transport: &PlayerTransport, seconds: f32) {
        wait_for(|| transport.stats().decoded_seconds >= seconds);
    }

    #[test]
    fn test_next_odd() {
        assert_eq!(next_odd(0, 0), 1);
        assert_eq!(next_odd(1, 0), 3);
        assert_eq!(next_odd(2, 0), 3);
        assert_eq!(next_odd(2, 7), 9);
        assert_eq!(next_odd(4, 3), 5);
        assert_eq!(next_even(3), 4);
        assert_eq!(next_even(4), 4);
    }

    #[test]
    fn test_fade_mode_from_control() {
        assert_eq!(FadeMode::from_control("none"), Some(FadeMode::None));
        assert_eq!(FadeMode::from_control("2"), Some(FadeMode::Long));
        assert_eq!(FadeMode::from_control("slow"), None);
        assert_eq!(FadeMode::Short.seconds(), 5.0);
    }

    #[test]
    fn test_invalid_buffer_rejected() {
        let registry = Arc::new(DecoderRegistry::with_builtin());
        assert!(matches!(
            PlayerTransport::create("bad", SR, 0.0, registry),
            Err(TransportError::Allocation(_))
        ));
    }

    #[test]
    fn test_context_ids_odd_while_playing() {
        let (transport, mut reader) = transport(1.0);
        let id = transport
            .play(PlayRequest::new("signal:silence?seconds=10"))
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(transport.state(), TransportState::Playing);
        pull(&mut reader, 512);

        assert_eq!(transport.eject().unwrap(), 2);
        assert_eq!(transport.state(), TransportState::Stopped);

        let id = transport
            .play(PlayRequest::new("signal:silence?seconds=10").context_hint(10))
            .unwrap();
        assert_eq!(id, 11);
        assert_eq!(transport.play(PlayRequest::new("signal:silence")).unwrap(), 13);
    }

    #[test]
    fn test_no_decoder_leaves_stopped() {
        let (transport, _reader) = transport(1.0);
        transport.play(sine(0.5)).unwrap();
        let err = transport.play(PlayRequest::new("missing.ogg")).unwrap_err();
        assert!(matches!(err, TransportError::NoDecoder(ref p) if p == "missing.ogg"));
        assert_eq!(transport.state(), TransportState::Stopped);
        assert_eq!(transport.context_id(), 2);
    }

    #[test]
    fn test_reads_after_fade_are_zero() {
        let (transport, mut reader) = transport(1.0);
        transport.set_fade_mode(FadeMode::Short);
        transport.play(sine(0.5)).unwrap();
        wait_decoded(&transport, 0.5);
        assert!(peak(&pull(&mut reader, 800)) > 0.4);

        transport.eject().unwrap();
        let fading = pull(&mut reader, 400);
        assert!(peak(&fading) > 0.1);
        assert!(reader.is_fading());

        // fade length is clamped to the one second buffer
        let rest = pull(&mut reader, 2 * SR as usize);
        assert!(!reader.is_fading());
        assert!(rest[SR as usize..].iter().all(|f| *f == [0.0, 0.0]));
        assert!(fading.iter().chain(rest.iter()).all(|f| f[0].abs() <= 0.5));
    }

    #[test]
    fn test_fade_mode_none_discards() {
        let (transport, mut reader) = transport(1.0);
        transport.set_fade_mode(FadeMode::None);
        transport.play(sine(0.5)).unwrap();
        wait_decoded(&transport, 0.5);
        transport.eject().unwrap();
        assert_eq!(peak(&pull(&mut reader, 1024)), 0.0);
    }

    #[test]
    fn test_reentrant_swap_never_replays_stale_audio() {
        let (transport, mut reader) = transport(1.0);
        transport.set_fade_mode(FadeMode::Long);

        transport.play(sine(0.9)).unwrap();
        wait_decoded(&transport, 0.5);
        pull(&mut reader, 256);
        transport.eject().unwrap();
        pull(&mut reader, 256);
        assert!(reader.is_fading());

        let decoded = transport.stats().decoded_seconds;
        transport.play(sine(0.1)).unwrap();
        wait_decoded(&transport, decoded + 0.5);
        transport.eject().unwrap();

        let after = pull(&mut reader, 2 * SR as usize);
        assert!(peak(&after) <= 0.1 + 1e-3, "stale audio replayed: {}", peak(&after));
    }

    #[test]
    fn test_play_no_flush_keeps_draining_fade() {
        let (transport, mut reader) = transport(1.0);
        transport.set_fade_mode(FadeMode::Long);

        transport.play(sine(0.9)).unwrap();
        wait_decoded(&transport, 0.5);
        transport.eject().unwrap();

        let decoded = transport.stats().decoded_seconds;
        let id = transport.play_no_flush(sine(0.05)).unwrap();
        assert_eq!(id, 3);
        wait_decoded(&transport, decoded + 0.5);

        // the fade is still audible above the new source
        let start = pull(&mut reader, 200);
        assert!(peak(&start) > 0.5);
        assert!(reader.is_fading());

        pull(&mut reader, SR as usize);
        assert!(!reader.is_fading());

        let decoded = transport.stats().decoded_seconds;
        wait_decoded(&transport, decoded + 0.5);
        let tail = pull(&mut reader, 1000);
        assert!(peak(&tail) <= 0.05 + 1e-3);
        assert!(peak(&tail) > 0.04);
    }

    #[test]
    fn test_pause_and_paused_eject() {
        let (transport, mut reader) = transport(1.0);
        transport.play(sine(0.5)).unwrap();
        wait_decoded(&transport, 0.5);

        transport.pause();
        let mut left = [1.0; 128];
        let mut right = [1.0; 128];
        assert_eq!(reader.read_block(&mut left, &mut right), 0);
        assert!(left.iter().all(|&s| s == 0.0));
        assert!(!transport.stats().playing);

        transport.unpause();
        assert_eq!(reader.read_block(&mut left, &mut right), 128);

        transport.pause();
        transport.eject().unwrap();
        assert!(!transport.is_paused());
        assert_eq!(peak(&pull(&mut reader, 1024)), 0.0);
    }

    #[test]
    fn test_seek_fades_in_and_gain_applies() {
        let (transport, mut reader) = transport(1.0);
        transport.play(sine(0.5).seek(1.0).gain_db(-6.0)).unwrap();
        wait_decoded(&transport, 0.5);
        let frames = pull(&mut reader, 2000);
        assert!(peak(&frames[..16]) < 0.01);
        let settled = peak(&frames[1000..]);
        assert!((settled - 0.25).abs() < 0.01, "peak {settled}");
    }

    #[test]
    fn test_playlist_advances_by_two_then_drains() {
        let (transport, mut reader) = transport(1.0);
        let missing = PlayRequest::new("missing.flac");
        let short = PlayRequest::new("signal:sine?freq=100&seconds=0.05");
        let id = transport
            .play_many(vec![missing, short.clone(), short], false)
            .unwrap();
        assert_eq!(id, 1);

        wait_for(|| transport.context_id() == 4);
        assert_eq!(transport.state(), TransportState::Ejecting);

        let frames = pull(&mut reader, 1600);
        assert!(peak(&frames[..700]) > 0.4);
        assert_eq!(peak(&frames[900..]), 0.0);
        assert_eq!(transport.state(), TransportState::Stopped);
    }

    #[test]
    fn test_size_limit_ends_item() {
        let (transport, mut reader) = transport(1.0);
        transport.play(sine(0.5).size(0.1)).unwrap();
        wait_for(|| transport.context_id() == 2);
        let frames = pull(&mut reader, 1600);
        assert!(peak(&frames[..700]) > 0.4);
        assert_eq!(peak(&frames[800..]), 0.0);
    }

    #[test]
    fn test_speed_consumes_faster() {
        let (transport, mut reader) = transport(4.0);
        transport.set_playback_speed(3.0);
        assert_eq!(transport.stats().speed, 2.0);

        transport.play(sine(0.5)).unwrap();
        wait_decoded(&transport, 2.0);
        let frames = pull(&mut reader, SR as usize / 2);
        assert!(peak(&frames[SR as usize / 4..]) > 0.3);
        let elapsed = transport.stats().elapsed_ms;
        assert!((850..=1150).contains(&elapsed), "elapsed {elapsed} ms");
    }

    #[test]
    fn test_quality_change_swaps_converter() {
        let (transport, mut reader) = transport(1.0);
        transport.set_resample_quality(ResampleQuality::Sinc).unwrap();
        assert_eq!(transport.resample_quality(), ResampleQuality::Sinc);
        pull(&mut reader, 256);
        assert_eq!(reader.converter.quality(), ResampleQuality::Sinc);

        transport.set_resample_quality(ResampleQuality::Linear).unwrap();
        pull(&mut reader, 256);
        assert_eq!(reader.converter.quality(), ResampleQuality::Linear);
    }

    struct Tagged;

    struct TaggedDecoder {
        left: usize,
    }

    impl Decoder for TaggedDecoder {
        fn init(&mut self, sink: &mut DecodeSink) -> std::result::Result<(), DecodeError> {
            sink.set_format(SR, 2)?;
            sink.set_metadata(TrackMetadata {
                artist: Some("Band".into()),
                title: Some("Song".into()),
                album: None,
            });
            Ok(())
        }

        fn decode_step(&mut self, sink: &mut DecodeSink) -> DecodeStatus {
            if self.left == 0 {
                return DecodeStatus::EndOfStream;
            }
            self.left -= 1;
            sink.push_i16(&[0; 512]);
            DecodeStatus::Continue
        }
    }

    impl DecoderFactory for Tagged {
        fn kind(&self) -> DecoderKind {
            DecoderKind::Opus
        }

        fn open(&self, _path: &str, _seek: f32) -> Option<Box<dyn Decoder>> {
            Some(Box::new(TaggedDecoder { left: 4 }))
        }
    }

    #[test]
    fn test_external_decoder_metadata() {
        let mut registry = DecoderRegistry::with_builtin();
        registry.register(Box::new(Tagged));
        let (transport, _reader) =
            PlayerTransport::create("meta", SR, 1.0, Arc::new(registry)).unwrap();

        transport.play(PlayRequest::new("show.opus")).unwrap();
        wait_for(|| transport.stats().metadata_pending);
        let metadata = transport.take_metadata().unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Song"));
        assert!(transport.take_metadata().is_none());
    }

    #[test]
    fn test_shutdown_is_final() {
        let (mut transport, _reader) = transport(1.0);
        transport.play(sine(0.5)).unwrap();
        transport.shutdown().unwrap();
        assert!(matches!(
            transport.play(sine(0.5)),
            Err(TransportError::ThreadGone)
        ));
        transport.shutdown().unwrap();
    }
}
