//! OnAir CLI Application

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use onair_core::domain::audio::Port;
use onair_core::domain::config::{ConfigManager, ConfigWatcher, EngineConfig};
use onair_core::domain::mixer::PlayerRole;
use onair_infra::audio::{
    default_output_device, CpalHost, DecoderRegistry, MixerSession, PlayRequest,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "onair")]
#[command(about = "A realtime broadcast mixing engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play through the default audio device
    Run {
        /// Configuration file (default: the user config directory)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Source for the left deck, e.g. `signal:sine?freq=440&seconds=30`
        #[arg(long)]
        left: Option<String>,

        /// Source for the right deck
        #[arg(long)]
        right: Option<String>,

        /// Stop after this many seconds
        #[arg(long, default_value_t = 10.0)]
        seconds: f32,

        /// Bus rendered to the device
        #[arg(long, value_enum, default_value_t = Output::Monitor)]
        output: Output,

        /// Do not open the default input device
        #[arg(long)]
        no_mic: bool,
    },

    /// Print the effective configuration
    Config {
        /// Print only the configuration file path
        #[arg(long)]
        path: bool,
    },

    /// Render a few seconds offline and print a stats snapshot as JSON
    StatsDemo {
        #[arg(long, default_value_t = 2.0)]
        seconds: f32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Output {
    Monitor,
    Stream,
}

impl From<Output> for Port {
    fn from(output: Output) -> Self {
        match output {
            Output::Monitor => Port::MonitorOut,
            Output::Stream => Port::StreamOut,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Command::Run {
            config,
            left,
            right,
            seconds,
            output,
            no_mic,
        } => run(config, left, right, seconds, output.into(), !no_mic).await,
        Command::Config { path } => print_config(path).await,
        Command::StatsDemo { seconds } => stats_demo(seconds).await,
    }
}

fn manager() -> anyhow::Result<ConfigManager> {
    Ok(ConfigManager::new(ConfigManager::default_config_dir()?))
}

async fn load_config(path: Option<PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_from_file(&path)
            .await
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(manager()?.load().await),
    }
}

async fn run(
    config_path: Option<PathBuf>,
    left: Option<String>,
    right: Option<String>,
    seconds: f32,
    port: Port,
    with_mic: bool,
) -> anyhow::Result<()> {
    info!("OnAir starting...");
    let mut config = load_config(config_path).await?;

    match default_output_device() {
        Ok(device) if device.sample_rate != config.app.sample_rate => {
            warn!(
                device = %device.name,
                configured = config.app.sample_rate,
                actual = device.sample_rate,
                "Using the device sample rate"
            );
            config.app.sample_rate = device.sample_rate;
        }
        Ok(_) => {}
        Err(e) => bail!("no usable output device: {e}"),
    }

    let mut session = MixerSession::init(&config, DecoderRegistry::with_builtin())?;
    for (role, source) in [(PlayerRole::Left, left), (PlayerRole::Right, right)] {
        if let Some(source) = source {
            let id = session.player(role)?.play(PlayRequest::new(source))?;
            debug!(player = %role, context_id = id, "Deck loaded");
        }
    }

    let bus = session.take_bus().context("bus already running")?;
    let host = CpalHost::start(bus, port, with_mic)?;
    info!(?host, "Running for {seconds} s, Ctrl+C to stop");

    let watcher = ConfigWatcher::new(manager()?.preset_dir()).await?;
    let mut preset_changes = watcher.subscribe();

    let deadline = tokio::time::sleep(Duration::from_secs_f32(seconds.max(0.0)));
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            Ok(path) = preset_changes.recv() => {
                info!(path = %path.display(), "AGC preset changed on disk");
            }
            _ = ticker.tick() => {
                let stats = session.stats();
                info!(
                    stream_peak_db = stats.mixer.stream.peak_db,
                    ducking = stats.mixer.ducking,
                    "Levels"
                );
            }
        }
    }

    drop(host);
    session.shutdown()?;
    info!("OnAir stopped");
    Ok(())
}

async fn print_config(path_only: bool) -> anyhow::Result<()> {
    let manager = manager()?;
    if path_only {
        println!("{}", manager.config_path().display());
        return Ok(());
    }
    let config = manager.load().await;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn stats_demo(seconds: f32) -> anyhow::Result<()> {
    let config = EngineConfig::factory_default();
    let mut session = MixerSession::init(&config, DecoderRegistry::with_builtin())?;
    let sample_rate = config.app.sample_rate;

    let left = session.player(PlayerRole::Left)?;
    left.play(PlayRequest::new("signal:sine?freq=440&seconds=60&amp=0.5"))?;
    session
        .player(PlayerRole::Right)?
        .play(PlayRequest::new("signal:sine?freq=660&seconds=60&amp=0.25").fade_in())?;
    session.set_mic_parameter(0, "open", "1")?;

    // decode threads fill their rings asynchronously
    let wanted = seconds.min(config.app.player_buffer_seconds) * 0.9;
    let started = Instant::now();
    while left.stats().decoded_seconds < wanted {
        if started.elapsed() > Duration::from_secs(5) {
            bail!("decoder did not fill the buffer");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let bus = session.bus_mut().context("bus already running")?;
    let block = bus.max_block();
    let total = (seconds.max(0.0) * sample_rate as f32) as usize;
    let step = std::f32::consts::TAU * 220.0 / sample_rate as f32;
    let mut rendered = 0;
    while rendered < total {
        let n = block.min(total - rendered);
        if let Some(mic) = bus.input_mut(Port::MicIn(0), 0) {
            for (i, s) in mic[..n].iter_mut().enumerate() {
                *s = 0.3 * ((rendered + i) as f32 * step).sin();
            }
        }
        rendered += bus.process_block(n);
    }

    println!("{}", serde_json::to_string_pretty(&session.stats())?);
    session.shutdown()?;
    Ok(())
}
