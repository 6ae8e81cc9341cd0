//! Mixer session
//!
//! Wires one [`MixingBus`] to a [`PlayerTransport`] per player slot. The
//! session keeps the control halves; the bus (holding every player reader)
//! is taken by whatever drives the periodic callback.

use super::decoder::DecoderRegistry;
use super::player::{FadeMode, PlayerStats, PlayerTransport, TransportError};
use super::resample::ResampleQuality;
use onair_core::domain::audio::AudioError;
use onair_core::domain::config::{ConfigError, EngineConfig};
use onair_core::domain::control::{parse_bool, parse_f32, ControlError};
use onair_core::domain::mixer::{MixerHandle, MixerStats, MixingBus, PlayerRole};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Audio: {0}")]
    Audio(#[from] AudioError),

    #[error("Player: {0}")]
    Transport(#[from] TransportError),

    #[error("Control: {0}")]
    Control(#[from] ControlError),

    #[error("No player in slot {0}")]
    UnknownPlayer(PlayerRole),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Pull snapshot of the whole session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub mixer: MixerStats,
    pub players: Vec<(PlayerRole, PlayerStats)>,
}

pub struct MixerSession {
    config: EngineConfig,
    bus: Option<MixingBus>,
    handle: MixerHandle,
    players: Vec<(PlayerRole, PlayerTransport)>,
}

impl MixerSession {
    /// Build the bus and every player from a validated configuration
    pub fn init(config: &EngineConfig, decoders: DecoderRegistry) -> Result<Self> {
        config.validate()?;
        let stream = config.stream_config()?;
        let sample_rate = stream.sample_rate.hz();
        let (mut bus, handle) = MixingBus::new(stream, &config.mixer, &config.mic_settings());

        let registry = Arc::new(decoders);
        let mut players = Vec::new();
        for role in PlayerRole::all(config.mixer.effect_slots) {
            let (transport, reader) = PlayerTransport::create(
                &role.to_string(),
                sample_rate,
                config.app.player_buffer_seconds,
                Arc::clone(&registry),
            )?;
            bus.attach_player(role, Box::new(reader))?;
            players.push((role, transport));
        }

        info!(
            sample_rate,
            players = players.len(),
            mics = config.mics.len(),
            mode = ?config.mixer.mode,
            "Mixer session ready"
        );

        Ok(Self {
            config: config.clone(),
            bus: Some(bus),
            handle,
            players,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Hand the bus to the thread running the callback
    pub fn take_bus(&mut self) -> Option<MixingBus> {
        self.bus.take()
    }

    /// Bus access for offline rendering
    pub fn bus_mut(&mut self) -> Option<&mut MixingBus> {
        self.bus.as_mut()
    }

    pub fn handle(&self) -> &MixerHandle {
        &self.handle
    }

    pub fn player(&self, role: PlayerRole) -> Result<&PlayerTransport> {
        self.players
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, p)| p)
            .ok_or(SessionError::UnknownPlayer(role))
    }

    pub fn players(&self) -> impl Iterator<Item = (PlayerRole, &PlayerTransport)> {
        self.players.iter().map(|(role, p)| (*role, p))
    }

    pub fn set_mic_parameter(&self, unit: usize, key: &str, value: &str) -> Result<()> {
        Ok(self.handle.set_mic_parameter(unit, key, value)?)
    }

    /// String control of one player. Malformed values fall back to defaults.
    pub fn set_player_parameter(&self, role: PlayerRole, key: &str, value: &str) -> Result<()> {
        let player = self.player(role)?;
        match key {
            "dither" => player.set_dither(parse_bool(key, value, false)),
            "playback_speed" => player.set_playback_speed(parse_f32(key, value, 1.0)),
            "pause" => {
                if parse_bool(key, value, false) {
                    player.pause();
                } else {
                    player.unpause();
                }
            }
            "fade_mode" => player.set_fade_mode(FadeMode::from_control(value).unwrap_or_else(|| {
                warn!(key, value, "Unknown fade mode, using default");
                FadeMode::default()
            })),
            "resample_quality" => {
                let quality = ResampleQuality::from_control(value).unwrap_or_else(|| {
                    warn!(key, value, "Unknown resample quality, using default");
                    ResampleQuality::default()
                });
                player.set_resample_quality(quality)?;
            }
            _ => return Err(ControlError::UnknownKey(key.to_string()).into()),
        }
        Ok(())
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            mixer: self.handle.stats(),
            players: self
                .players
                .iter()
                .map(|(role, p)| (*role, p.stats()))
                .collect(),
        }
    }

    /// Stop every decode thread
    pub fn shutdown(mut self) -> Result<()> {
        let mut first_error = None;
        for (role, player) in self.players.iter_mut() {
            if let Err(e) = player.shutdown() {
                warn!(player = %role, error = %e, "Player did not stop cleanly");
                first_error.get_or_insert(e);
            }
        }
        info!("Mixer session shut down");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
