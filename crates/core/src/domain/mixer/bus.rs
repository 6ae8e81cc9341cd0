//! The realtime mixing bus
//!
//! One [`MixingBus::process_block`] call produces a period of every output
//! port. It never blocks, locks or allocates: scratch and port buffers are
//! sized up front for the largest host period, and longer periods are
//! rendered in chunks.

use super::alarm::Alarm;
use super::command::{MixerCommand, MixerControls, MixerHandle, COMMAND_QUEUE_DEPTH};
use super::crossfade::Crossfader;
use super::routing::{self, Dest, Gains, MixMode, Sources};
use super::stats::BusMeters;
use super::{MixerSettings, PlayerRole, CONTROL_INTERVAL};
use crate::domain::audio::{AudioError, BlockSource, Port, StreamConfig};
use crate::domain::dsp::{db_to_gain, Limiter, Normalizer, Smoothed};
use crate::domain::mic::{MicMix, MicSettings, MicTable};
use crossbeam::channel::{bounded, Receiver};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// Largest change of a smoothed gain per control tick
const GAIN_STEP: f32 = 0.02;

type Result<T> = std::result::Result<T, AudioError>;

struct PlayerSlot {
    role: PlayerRole,
    source: Option<Box<dyn BlockSource>>,
    left: Vec<f32>,
    right: Vec<f32>,
    gain: Smoothed,
    /// Gain through the crossfader for this tick
    mixed: f32,
    dj_listen: bool,
}

impl std::fmt::Debug for PlayerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSlot")
            .field("role", &self.role)
            .field("attached", &self.source.is_some())
            .field("gain", &self.gain.value())
            .finish()
    }
}

/// Buffers behind the named host ports
#[derive(Debug)]
struct PortBuffers {
    monitor: [Vec<f32>; 2],
    stream: [Vec<f32>; 2],
    call_send: [Vec<f32>; 2],
    fx_send: [Vec<f32>; 2],
    call_receive: [Vec<f32>; 2],
    fx_receive: [Vec<f32>; 2],
    mics: Vec<Vec<f32>>,
}

impl PortBuffers {
    fn new(block: usize, mics: usize) -> Self {
        let pair = || [vec![0.0; block], vec![0.0; block]];
        Self {
            monitor: pair(),
            stream: pair(),
            call_send: pair(),
            fx_send: pair(),
            call_receive: pair(),
            fx_receive: pair(),
            mics: (0..mics).map(|_| vec![0.0; block]).collect(),
        }
    }

    fn get(&self, port: Port, channel: usize) -> Option<&Vec<f32>> {
        match port {
            Port::MonitorOut => self.monitor.get(channel),
            Port::StreamOut => self.stream.get(channel),
            Port::CallSend => self.call_send.get(channel),
            Port::FxSend => self.fx_send.get(channel),
            Port::CallReceive => self.call_receive.get(channel),
            Port::FxReceive => self.fx_receive.get(channel),
            Port::MicIn(n) if channel == 0 => self.mics.get(n),
            Port::MicIn(_) => None,
        }
    }

    fn get_mut(&mut self, port: Port, channel: usize) -> Option<&mut Vec<f32>> {
        match port {
            Port::MonitorOut => self.monitor.get_mut(channel),
            Port::StreamOut => self.stream.get_mut(channel),
            Port::CallSend => self.call_send.get_mut(channel),
            Port::FxSend => self.fx_send.get_mut(channel),
            Port::CallReceive => self.call_receive.get_mut(channel),
            Port::FxReceive => self.fx_receive.get_mut(channel),
            Port::MicIn(n) if channel == 0 => self.mics.get_mut(n),
            Port::MicIn(_) => None,
        }
    }
}

/// Session state of the mixing callback
#[derive(Debug)]
pub struct MixingBus {
    sample_rate: u32,
    max_block: usize,
    mode: MixMode,
    controls: Arc<MixerControls>,
    commands: Receiver<MixerCommand>,
    meters: Arc<BusMeters>,
    players: Vec<PlayerSlot>,
    mics: MicTable,
    mic_frame: Vec<f32>,
    crossfader: Crossfader,
    dj_volume: Smoothed,
    mixback: Smoothed,
    ceiling: Smoothed,
    private_level: f32,
    deck_level: f32,
    ducking: f32,
    broadcast_open: bool,
    fx_loop: bool,
    normalizer: Normalizer,
    stream_limiter: Limiter,
    monitor_limiter: Limiter,
    call_limiter: Limiter,
    alarm: Alarm,
    ports: PortBuffers,
    tick: usize,
}

impl MixingBus {
    /// Build a bus and the handle that controls it
    pub fn new(
        stream: StreamConfig,
        settings: &MixerSettings,
        mics: &[MicSettings],
    ) -> (Self, MixerHandle) {
        let sample_rate = stream.sample_rate.hz();
        let max_block = stream.max_block;
        let roles = PlayerRole::all(settings.effect_slots);

        let controls = Arc::new(MixerControls::new(roles.len()));
        controls.dj_volume.store(settings.dj_volume.clamp(0.0, 1.0));
        controls.mixback.store(settings.mixback.clamp(0.0, 1.0));
        controls.headroom_db.store(settings.headroom_db.max(0.0));

        let (tx, rx) = bounded(COMMAND_QUEUE_DEPTH);
        let meters = Arc::new(BusMeters::new());
        let mic_table = MicTable::new(sample_rate, mics);
        let mic_meters = mic_table.units().iter().map(|u| u.meters()).collect();

        let players = roles
            .iter()
            .map(|&role| PlayerSlot {
                role,
                source: None,
                left: vec![0.0; max_block],
                right: vec![0.0; max_block],
                gain: Smoothed::new(1.0, GAIN_STEP),
                mixed: 1.0,
                dj_listen: false,
            })
            .collect();

        let mut crossfader = Crossfader::new(settings.crossfade_curve, 0.5);
        crossfader.set_time(settings.crossfade_time_sec, ticks_per_second(sample_rate));

        let limiter = |db: f32| Limiter::new(sample_rate, db_to_gain(db.min(0.0)));

        let bus = Self {
            sample_rate,
            max_block,
            mode: settings.mode,
            controls: Arc::clone(&controls),
            commands: rx,
            meters: Arc::clone(&meters),
            players,
            mic_frame: vec![0.0; mic_table.len()],
            ports: PortBuffers::new(max_block, mic_table.len()),
            mics: mic_table,
            crossfader,
            dj_volume: Smoothed::new(settings.dj_volume.clamp(0.0, 1.0), GAIN_STEP),
            mixback: Smoothed::new(settings.mixback.clamp(0.0, 1.0), GAIN_STEP),
            ceiling: Smoothed::new(1.0, GAIN_STEP),
            private_level: db_to_gain(routing::PRIVATE_CALL_LEVEL_DB),
            deck_level: 1.0,
            ducking: 1.0,
            broadcast_open: false,
            fx_loop: false,
            normalizer: Normalizer::new(sample_rate, settings.normalizer),
            stream_limiter: limiter(settings.stream_limit_db),
            monitor_limiter: limiter(settings.monitor_limit_db),
            call_limiter: limiter(settings.call_limit_db),
            alarm: Alarm::new(sample_rate),
            tick: 0,
        };

        info!(
            sample_rate,
            max_block,
            players = roles.len(),
            mics = mics.len(),
            mode = ?settings.mode,
            "Mixing bus created"
        );

        let handle = MixerHandle::new(controls, tx, meters, mic_meters, roles);
        (bus, handle)
    }

    /// Connect the reader of a player to its slot
    pub fn attach_player(&mut self, role: PlayerRole, source: Box<dyn BlockSource>) -> Result<()> {
        let slot = self
            .players
            .iter_mut()
            .find(|s| s.role == role)
            .ok_or_else(|| {
                AudioError::InvalidConfiguration(format!("no player slot for role {role}"))
            })?;
        slot.source = Some(source);
        debug!(%role, "Player attached");
        Ok(())
    }

    /// Resize every scratch and port buffer. Not for the realtime thread.
    pub fn set_max_block(&mut self, max_block: usize) {
        let max_block = max_block.max(1);
        for slot in self.players.iter_mut() {
            slot.left.resize(max_block, 0.0);
            slot.right.resize(max_block, 0.0);
        }
        self.ports = PortBuffers::new(max_block, self.mics.len());
        self.max_block = max_block;
        debug!(max_block, "Mixing bus scratch resized");
    }

    pub fn max_block(&self) -> usize {
        self.max_block
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn mode(&self) -> MixMode {
        self.mode
    }

    pub fn mics(&self) -> &MicTable {
        &self.mics
    }

    /// Ducking factor applied to the players in the last frame
    pub fn ducking_factor(&self) -> f32 {
        self.ducking
    }

    /// Writable buffer of an input port, `max_block` samples long
    pub fn input_mut(&mut self, port: Port, channel: usize) -> Option<&mut [f32]> {
        if !port.is_input() {
            return None;
        }
        self.ports.get_mut(port, channel).map(|b| b.as_mut_slice())
    }

    /// Buffer of an output port, valid for the frames of the last block
    pub fn output(&self, port: Port, channel: usize) -> Option<&[f32]> {
        if port.is_input() {
            return None;
        }
        self.ports.get(port, channel).map(|b| b.as_slice())
    }

    fn apply(&mut self, command: MixerCommand) {
        match command {
            MixerCommand::SetMode(mode) => self.mode = mode,
            MixerCommand::SetCrossfadeCurve(curve) => self.crossfader.set_curve(curve),
            MixerCommand::SetCrossfadeTime(seconds) => self
                .crossfader
                .set_time(seconds, ticks_per_second(self.sample_rate)),
            MixerCommand::SetNormalizer(settings) => {
                self.normalizer.set_settings(settings, self.sample_rate)
            }
            MixerCommand::SetStreamLimit(db) => {
                self.stream_limiter.set_threshold(db_to_gain(db.min(0.0)))
            }
            MixerCommand::SetMonitorLimit(db) => {
                self.monitor_limiter.set_threshold(db_to_gain(db.min(0.0)))
            }
            MixerCommand::SetCallLimit(db) => {
                self.call_limiter.set_threshold(db_to_gain(db.min(0.0)))
            }
            MixerCommand::Mic { unit, param } => {
                if let Err(e) = self.mics.apply(unit, param) {
                    debug!(unit, error = %e, "Mic command dropped");
                }
            }
        }
    }

    /// Pick up atomics and advance smoothed values by one step
    fn control_tick(&mut self) {
        let controls = &self.controls;
        self.crossfader.set_target(controls.crossfade.load());
        let (xf_left, xf_right) = self.crossfader.tick();

        let mut deck_level = 0.0f32;
        for (slot, ctl) in self.players.iter_mut().zip(controls.players.iter()) {
            let target = if ctl.muted.load(Ordering::Relaxed) {
                0.0
            } else {
                ctl.volume.load()
            };
            slot.gain.set_target(target);
            let gain = slot.gain.tick();
            slot.mixed = match slot.role {
                PlayerRole::Left => gain * xf_left,
                PlayerRole::Right => gain * xf_right,
                _ => gain,
            };
            slot.dj_listen = ctl.dj_listen.load(Ordering::Relaxed);
            if slot.role.is_deck() {
                deck_level = deck_level.max(gain);
            }
        }
        self.deck_level = deck_level;

        self.dj_volume.set_target(controls.dj_volume.load());
        self.dj_volume.tick();
        self.mixback.set_target(controls.mixback.load());
        self.mixback.tick();

        let ceiling = if self.broadcast_open {
            db_to_gain(-controls.headroom_db.load())
        } else {
            1.0
        };
        self.ceiling.set_target(ceiling);
        self.ceiling.tick();

        self.fx_loop = controls.fx_loop.load(Ordering::Relaxed);
    }

    /// Produce `frames` frames (at most `max_block`) of every output port
    /// from the input ports and the players. Returns the frames produced.
    pub fn process_block(&mut self, frames: usize) -> usize {
        let n = frames.min(self.max_block);

        for _ in 0..COMMAND_QUEUE_DEPTH {
            match self.commands.try_recv() {
                Ok(command) => self.apply(command),
                Err(_) => break,
            }
        }

        for slot in self.players.iter_mut() {
            let (left, right) = (&mut slot.left[..n], &mut slot.right[..n]);
            match slot.source.as_mut() {
                Some(source) => {
                    source.read_block(left, right);
                }
                None => {
                    left.fill(0.0);
                    right.fill(0.0);
                }
            }
        }

        let edges = self.mode.edges();
        let uses_mics = self.mode.uses_mics();
        let ducks = self.mode.ducks();
        let call_active = self.mode.uses_call_send();

        for i in 0..n {
            if self.tick == 0 {
                self.control_tick();
                self.tick = CONTROL_INTERVAL;
            }
            self.tick -= 1;

            let mix = if uses_mics {
                for (m, port) in self.mic_frame.iter_mut().zip(self.ports.mics.iter()) {
                    *m = port[i];
                }
                self.mics.process_frame(&self.mic_frame)
            } else {
                MicMix::default()
            };
            self.broadcast_open = mix.broadcast_open;

            let mut sources = Sources {
                mics: mix.mic,
                aux: mix.aux,
                dj_mics: mix.dj,
                call_receive: (self.ports.call_receive[0][i], self.ports.call_receive[1][i]),
                ..Sources::default()
            };
            for slot in &self.players {
                let (l, r) = (slot.left[i], slot.right[i]);
                let direct = slot.gain.value();
                sources.players.0 += l * slot.mixed;
                sources.players.1 += r * slot.mixed;
                if slot.role.is_deck() {
                    sources.decks_direct.0 += l * direct;
                    sources.decks_direct.1 += r * direct;
                }
                if slot.dj_listen {
                    sources.dj_preview.0 += l;
                    sources.dj_preview.1 += r;
                }
            }

            self.ducking = if ducks {
                (1.0 - (1.0 - mix.ducking) * self.deck_level).min(self.ceiling.value())
            } else {
                1.0
            };
            let gains = Gains {
                duck: self.ducking,
                private_level: self.private_level,
                mixback: self.mixback.value(),
                dj_volume: self.dj_volume.value(),
            };

            let out = routing::route(edges, &sources, &gains);
            let stream = out[Dest::Stream as usize];
            let monitor = out[Dest::Monitor as usize];
            let call = out[Dest::CallSend as usize];

            let (sl, sr) = self.normalizer.process(stream.0, stream.1);
            let (sl, sr) = self.stream_limiter.process(sl, sr);
            self.ports.fx_send[0][i] = sl;
            self.ports.fx_send[1][i] = sr;
            let (sl, sr) = if self.fx_loop {
                (self.ports.fx_receive[0][i], self.ports.fx_receive[1][i])
            } else {
                (sl, sr)
            };
            self.ports.stream[0][i] = sl;
            self.ports.stream[1][i] = sr;

            let (ml, mr) = self.monitor_limiter.process(monitor.0, monitor.1);
            self.ports.monitor[0][i] = ml;
            self.ports.monitor[1][i] = mr;

            let (cl, cr) = if call_active {
                self.call_limiter.process(call.0, call.1)
            } else {
                (0.0, 0.0)
            };
            self.ports.call_send[0][i] = cl;
            self.ports.call_send[1][i] = cr;
        }

        let [monitor_l, monitor_r] = &mut self.ports.monitor;
        self.alarm
            .overlay(&self.controls.alarm, &mut monitor_l[..n], &mut monitor_r[..n]);

        let ports = &self.ports;
        self.meters
            .stream
            .accumulate(&ports.stream[0][..n], &ports.stream[1][..n]);
        self.meters
            .monitor
            .accumulate(&ports.monitor[0][..n], &ports.monitor[1][..n]);
        if call_active {
            self.meters
                .call_send
                .accumulate(&ports.call_send[0][..n], &ports.call_send[1][..n]);
        }
        self.meters.set_ducking(self.ducking);
        self.meters.set_normalizer_gain(self.normalizer.gain());

        n
    }

    /// Render an output port into an interleaved host buffer of any length.
    ///
    /// `feed` fills each input port channel for the chunk about to be
    /// processed. Mono hosts get the average of both channels; channels
    /// past the second are silent.
    pub fn render_interleaved<F>(
        &mut self,
        port: Port,
        out: &mut [f32],
        channels: usize,
        mut feed: F,
    ) -> usize
    where
        F: FnMut(Port, usize, &mut [f32]),
    {
        let channels = channels.max(1);
        let total = out.len() / channels;
        let mut done = 0;

        while done < total {
            let len = (total - done).min(self.max_block);

            for ch in 0..2 {
                for input in [Port::CallReceive, Port::FxReceive] {
                    if let Some(buf) = self.ports.get_mut(input, ch) {
                        feed(input, ch, &mut buf[..len]);
                    }
                }
            }
            for (n, buf) in self.ports.mics.iter_mut().enumerate() {
                feed(Port::MicIn(n), 0, &mut buf[..len]);
            }

            self.process_block(len);

            let (left, right) = match (self.ports.get(port, 0), self.ports.get(port, 1)) {
                (Some(l), Some(r)) => (l, r),
                _ => return done,
            };
            let dest = &mut out[done * channels..(done + len) * channels];
            for (f, frame) in dest.chunks_exact_mut(channels).enumerate() {
                if channels == 1 {
                    frame[0] = 0.5 * (left[f] + right[f]);
                } else {
                    frame[0] = left[f];
                    frame[1] = right[f];
                    frame[2..].fill(0.0);
                }
            }
            done += len;
        }
        done
    }
}

fn ticks_per_second(sample_rate: u32) -> f32 {
    sample_rate as f32 / CONTROL_INTERVAL as f32
}
