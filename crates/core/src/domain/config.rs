//! Configuration management for the engine
//!
//! This module provides:
//! - `EngineConfig` with its `[app]`, `[mixer]` and `[[mics]]` sections
//! - AGC presets stored as individual TOML files
//! - Hot-reload notifications via a file system watcher

use crate::domain::agc::AgcSettings;
use crate::domain::audio::StreamConfig;
use crate::domain::mic::{MicMode, MicRole, MicSettings};
use crate::domain::mixer::MixerSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Most microphone units a session can host
pub const MAX_MICS: usize = 4;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sample_rate: u32,

    /// Largest host period in frames
    pub max_block: usize,

    /// Ring buffer length of every player
    pub player_buffer_seconds: f32,

    /// AGC lookahead applied to every mic
    pub lookahead_sec: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            max_block: 1024,
            player_buffer_seconds: 10.0,
            lookahead_sec: 0.01161,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub app: AppConfig,
    pub mixer: MixerSettings,
    pub mics: Vec<MicSettings>,
}

impl EngineConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!(mics = config.mics.len(), "Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Two microphones: a processed presenter mic and a plain aux input
    pub fn factory_default() -> Self {
        let presenter = MicSettings {
            mode: MicMode::Processed,
            role: MicRole::Mic,
            agc: AgcSettings {
                duck_enabled: true,
                ..AgcSettings::default()
            },
            ..MicSettings::default()
        };
        let aux = MicSettings {
            mode: MicMode::Simple,
            role: MicRole::Aux,
            in_dj_mix: false,
            ..MicSettings::default()
        };

        Self {
            app: AppConfig::default(),
            mixer: MixerSettings::default(),
            mics: vec![presenter, aux],
        }
    }

    /// Reject values the engine cannot be built from
    pub fn validate(&self) -> Result<()> {
        self.stream_config()?;
        if !(self.app.player_buffer_seconds.is_finite() && self.app.player_buffer_seconds > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "player buffer of {} s",
                self.app.player_buffer_seconds
            )));
        }
        if !(0.0..=crate::domain::agc::params::LOOKAHEAD_MAX).contains(&self.app.lookahead_sec) {
            return Err(ConfigError::Invalid(format!(
                "lookahead of {} s",
                self.app.lookahead_sec
            )));
        }
        if self.mics.len() > MAX_MICS {
            return Err(ConfigError::Invalid(format!(
                "{} mics configured, at most {MAX_MICS} supported",
                self.mics.len()
            )));
        }
        Ok(())
    }

    pub fn stream_config(&self) -> Result<StreamConfig> {
        StreamConfig::new(self.app.sample_rate, self.app.max_block)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Mic settings with the session lookahead filled in
    pub fn mic_settings(&self) -> Vec<MicSettings> {
        self.mics
            .iter()
            .map(|mic| {
                let mut mic = *mic;
                mic.agc.lookahead_sec = self.app.lookahead_sec;
                mic
            })
            .collect()
    }
}

/// File system watcher for hot-reload
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
    config_tx: broadcast::Sender<PathBuf>,
}

impl ConfigWatcher {
    /// Create a new config watcher
    pub async fn new(preset_dir: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (config_tx, _config_rx) = broadcast::channel(32);

        fs::create_dir_all(&preset_dir).await?;

        let tx_clone = config_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                return;
            };
            if !matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_)
            ) {
                return;
            }
            for path in event.paths {
                if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                    // no subscribers is not an error
                    if tx_clone.receiver_count() > 0 {
                        if let Err(e) = tx_clone.send(path) {
                            error!("Failed to send config change event: {}", e);
                        }
                    }
                }
            }
        })?;

        watcher.watch(&preset_dir, notify::RecursiveMode::Recursive)?;

        info!(path = %preset_dir.display(), "Config watcher started");

        Ok(Self {
            _watcher: watcher,
            config_tx,
        })
    }

    /// Subscribe to config change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.config_tx.subscribe()
    }
}

/// Named AGC presets, one TOML file each
pub struct PresetManager {
    preset_dir: PathBuf,
}

impl PresetManager {
    pub fn new(preset_dir: PathBuf) -> Self {
        Self { preset_dir }
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.preset_dir.join(format!("{name}.toml"))
    }

    /// List all available presets
    #[instrument(skip(self))]
    pub async fn list_presets(&self) -> Result<Vec<String>> {
        let mut presets = Vec::new();

        let mut entries = fs::read_dir(&self.preset_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "toml").unwrap_or(false) {
                if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                    presets.push(name.to_string());
                }
            }
        }

        presets.sort();
        debug!(count = presets.len(), "Listed presets");
        Ok(presets)
    }

    #[instrument(skip(self))]
    pub async fn load_preset(&self, name: &str) -> Result<AgcSettings> {
        let path = self.path_of(name);
        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        let contents = fs::read_to_string(&path).await?;
        let settings: AgcSettings = toml::from_str(&contents)?;
        Ok(settings)
    }

    #[instrument(skip(self, settings))]
    pub async fn save_preset(&self, name: &str, settings: &AgcSettings) -> Result<()> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!("preset name {name:?}")));
        }
        fs::create_dir_all(&self.preset_dir).await?;
        fs::write(self.path_of(name), toml::to_string_pretty(settings)?).await?;
        info!(name, "Preset saved");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_preset(&self, name: &str) -> Result<()> {
        let path = self.path_of(name);
        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        fs::remove_file(&path).await?;
        info!(name, "Preset deleted");
        Ok(())
    }

    pub async fn preset_exists(&self, name: &str) -> bool {
        self.path_of(name).exists()
    }
}

/// Owner of the main configuration file at `<config dir>/onair/config.toml`
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    /// `~/.config/onair` on Linux, `%APPDATA%\onair` on Windows
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("onair"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Directory the AGC presets live in
    pub fn preset_dir(&self) -> PathBuf {
        self.config_dir.join("presets")
    }

    /// Load configuration from file
    ///
    /// A missing file is created from the factory default. A corrupt or
    /// invalid file is copied to `config.toml.corrupt` and the factory
    /// default is returned.
    #[instrument(skip(self))]
    pub async fn load(&self) -> EngineConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = EngineConfig::factory_default();
            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }
            return config;
        }

        match EngineConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                EngineConfig::factory_default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &EngineConfig) -> Result<()> {
        config.validate()?;
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    /// Delete the config file
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        if self.config_path.exists() {
            fs::remove_file(&self.config_path).await?;
            info!(path = %self.config_path.display(), "Configuration cleared");
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
