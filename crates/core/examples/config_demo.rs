//! Example demonstrating the configuration and AGC preset system
//!
//! Run with: cargo run --package onair-core --example config_demo

use onair_core::domain::agc::AgcSettings;
use onair_core::domain::config::{EngineConfig, PresetManager};
use onair_core::domain::mixer::MixingBus;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("onair_core=debug,info")
        .init();

    println!("=== OnAir Configuration Demo ===\n");

    println!("1. Creating factory default configuration...");
    let config = EngineConfig::factory_default();
    println!("   ✓ {} mics, mode {:?}", config.mics.len(), config.mixer.mode);

    println!("\n2. Saving and reloading...");
    let config_path = "demo_config.toml";
    config.save_to_file(config_path).await?;
    let loaded = EngineConfig::load_from_file(config_path).await?;
    println!("   ✓ Round trip equal: {}", loaded == config);

    println!("\n3. Microphones:");
    for (i, mic) in loaded.mic_settings().iter().enumerate() {
        println!(
            "   {}. {:?} {:?} gain {} dB, AGC ratio {}, lookahead {} s",
            i + 1,
            mic.mode,
            mic.role,
            mic.gain_db,
            mic.agc.ratio,
            mic.agc.lookahead_sec
        );
    }

    println!("\n4. AGC presets:");
    let preset_dir = std::path::PathBuf::from("demo_presets");
    let presets = PresetManager::new(preset_dir.clone());
    presets
        .save_preset(
            "announcer",
            &AgcSettings {
                ratio: 6.0,
                duck_enabled: true,
                phase_rotate: true,
                ..AgcSettings::default()
            },
        )
        .await?;
    for name in presets.list_presets().await? {
        let agc = presets.load_preset(&name).await?;
        println!("   - {name}: ratio {}, limit {} dB", agc.ratio, agc.limit_db);
    }

    println!("\n5. Building a mixing bus from the configuration...");
    let (mut bus, handle) =
        MixingBus::new(loaded.stream_config()?, &loaded.mixer, &loaded.mic_settings());
    handle.set_mic_parameter(0, "open", "1")?;
    handle.set_mic_parameter(0, "ratio", "4")?;
    if let Err(e) = handle.set_mic_parameter(0, "sparkle", "1") {
        println!("   ✓ Rejected unknown key: {e}");
    }
    for _ in 0..100 {
        bus.process_block(bus.max_block());
    }
    println!("   ✓ Stats: {:?}", handle.stats());

    println!("\n=== Demo Complete ===");

    std::fs::remove_file(config_path)?;
    std::fs::remove_dir_all(preset_dir)?;

    Ok(())
}
