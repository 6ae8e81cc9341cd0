//! A session built from a configuration file on disk

use onair_core::domain::config::{ConfigManager, EngineConfig};
use onair_core::domain::mic::MicMode;
use onair_core::domain::mixer::{MixMode, PlayerRole};
use onair_infra::audio::{DecoderRegistry, MixerSession, SessionError};
use tempfile::TempDir;

#[tokio::test]
async fn test_session_from_saved_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");

    let mut config = EngineConfig::factory_default();
    config.mixer.mode = MixMode::PublicCall;
    config.mixer.effect_slots = 2;
    config.mics[1].mode = MicMode::Off;
    config.save_to_file(&path).await.unwrap();

    let loaded = EngineConfig::load_from_file(&path).await.unwrap();
    assert_eq!(loaded, config);

    let session = MixerSession::init(&loaded, DecoderRegistry::with_builtin()).unwrap();
    assert_eq!(session.players().count(), PlayerRole::all(2).len());
    assert_eq!(session.config().mixer.mode, MixMode::PublicCall);
    assert_eq!(session.stats().mixer.mics.len(), 2);
    session.shutdown().unwrap();
}

#[tokio::test]
async fn test_manager_falls_back_to_factory_defaults() {
    let dir = TempDir::new().unwrap();
    let manager = ConfigManager::new(dir.path().to_path_buf());
    tokio::fs::write(manager.config_path(), "[app]\nsample_rate = \"fast\"\n")
        .await
        .unwrap();

    let config = manager.load().await;
    assert_eq!(config, EngineConfig::factory_default());
    let session = MixerSession::init(&config, DecoderRegistry::with_builtin()).unwrap();
    session.shutdown().unwrap();
}

#[test]
fn test_invalid_buffer_is_a_config_error() {
    let mut config = EngineConfig::factory_default();
    config.app.player_buffer_seconds = -1.0;
    assert!(matches!(
        MixerSession::init(&config, DecoderRegistry::with_builtin()),
        Err(SessionError::Config(_))
    ));
}
