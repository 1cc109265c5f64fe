use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sweetspot::audio::device::AudioBackend;
use sweetspot::cli::{Cli, Commands, ConfigAction, RunArgs};
use sweetspot::config::Config;
use sweetspot::engine::Engine;
use sweetspot::sensor::link::{ReplayLink, available_ports, discover_port};
use sweetspot::telemetry::{JsonLinesSink, Telemetry};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Replay pacing, close to the controller's frame rate at 64-byte chunks.
const REPLAY_PACE: Duration = Duration::from_millis(20);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_directive());

    let config_path = cli.config.clone();
    match cli.into_command() {
        Commands::Run(args) => {
            #[cfg(feature = "cpal-audio")]
            sweetspot::audio::capture::suppress_audio_warnings();
            let config = load_config(config_path.as_deref())?;
            run(config, args).await?;
        }
        Commands::Devices => {
            #[cfg(feature = "cpal-audio")]
            sweetspot::audio::capture::suppress_audio_warnings();
            list_audio_devices(audio_backend().as_ref())?;
        }
        Commands::Ports => {
            let config = load_config(config_path.as_deref())?;
            list_serial_ports(&config);
        }
        Commands::Decode { file, protocol } => {
            let config = load_config(config_path.as_deref())?;
            decode(&config, &file, protocol)?;
        }
        Commands::Config { action } => {
            handle_config_command(action, config_path.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "sweetspot",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout carries telemetry and decode output.
fn init_tracing(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/sweetspot/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides are applied last.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "cpal-audio")]
fn audio_backend() -> Arc<dyn AudioBackend> {
    Arc::new(sweetspot::audio::capture::CpalBackend::new())
}

#[cfg(not(feature = "cpal-audio"))]
fn audio_backend() -> Arc<dyn AudioBackend> {
    tracing::warn!(target: "sweetspot::audio", "Built without audio support");
    Arc::new(sweetspot::audio::device::MockAudioBackend::new().with_no_devices())
}

#[cfg(feature = "serial")]
fn spawn_serial(engine: &Engine, port: Option<String>) -> Result<()> {
    let mut sensor = engine.config().sensor.clone();
    if port.is_some() {
        sensor.port = port;
    }
    engine.spawn_ingestion(sweetspot::sensor::link::SerialLink::from_config(&sensor))?;
    Ok(())
}

#[cfg(not(feature = "serial"))]
fn spawn_serial(_engine: &Engine, _port: Option<String>) -> Result<()> {
    bail!("built without serial support; use `run --replay FILE`")
}

async fn run(config: Config, args: RunArgs) -> Result<()> {
    tracing::info!(target: "sweetspot::general", "sweetspot {}", sweetspot::version_string());
    let engine = Arc::new(Engine::new(config, audio_backend()));

    match args.replay {
        Some(path) => {
            if !path.exists() {
                bail!("capture file not found: {}", path.display());
            }
            engine.spawn_ingestion(ReplayLink::new(path).with_pace(REPLAY_PACE))?;
        }
        None => spawn_serial(&engine, args.port)?,
    }

    if !args.no_audio {
        let starter = Arc::clone(&engine);
        // Failing to open devices leaves tracking running; SIGUSR1 retries.
        if let Err(e) = tokio::task::spawn_blocking(move || starter.start()).await? {
            tracing::error!(target: "sweetspot::general", "Audio path not started: {}", e);
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let telemetry = Telemetry::new(Arc::clone(&engine));
    let telemetry_task = tokio::spawn(async move {
        let mut sink = JsonLinesSink::stdout();
        telemetry.run(&mut sink, shutdown_rx).await
    });

    wait_for_shutdown(&engine).await;

    let _ = shutdown_tx.send(true);
    match telemetry_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => eprintln!("sweetspot: telemetry stopped: {e}"),
        Err(e) => eprintln!("sweetspot: telemetry task failed: {e}"),
    }

    tokio::task::spawn_blocking(move || engine.shutdown()).await?;
    tracing::info!(target: "sweetspot::general", "Stopped");
    Ok(())
}

/// Block until SIGINT or SIGTERM. SIGUSR1 toggles the audio path.
#[cfg(unix)]
async fn wait_for_shutdown(engine: &Arc<Engine>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigusr1 = signal(SignalKind::user_defined1()).ok();
    if sigterm.is_none() || sigusr1.is_none() {
        eprintln!("sweetspot: could not register signal handlers, Ctrl+C only");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "sweetspot::general", "Received SIGINT, shutting down");
                return;
            }
            Some(_) = recv(&mut sigterm) => {
                tracing::info!(target: "sweetspot::general", "Received SIGTERM, shutting down");
                return;
            }
            Some(_) = recv(&mut sigusr1) => {
                let engine = Arc::clone(engine);
                match tokio::task::spawn_blocking(move || engine.toggle()).await {
                    Ok(Ok(running)) => tracing::info!(
                        target: "sweetspot::general",
                        "Audio path {}",
                        if running { "running" } else { "stopped" }
                    ),
                    Ok(Err(e)) => tracing::error!(target: "sweetspot::general", "Toggle failed: {}", e),
                    Err(e) => eprintln!("sweetspot: toggle task failed: {e}"),
                }
            }
        }
    }
}

#[cfg(unix)]
async fn recv(signal: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match signal {
        Some(signal) => signal.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_engine: &Arc<Engine>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("sweetspot: could not wait for Ctrl+C: {e}");
    }
}

/// List audio devices, preferred ones highlighted.
fn list_audio_devices(backend: &dyn AudioBackend) -> Result<()> {
    let inputs = backend.input_devices()?;
    let outputs = backend.output_devices()?;

    if inputs.is_empty() && outputs.is_empty() {
        eprintln!("No audio devices found");
        std::process::exit(1);
    }

    for (title, devices) in [("Input devices:", &inputs), ("Output devices:", &outputs)] {
        println!("{}", title.bold());
        if devices.is_empty() {
            println!("  {}", "(none)".dimmed());
        }
        for (idx, device) in devices.iter().enumerate() {
            match device.strip_suffix(" [recommended]") {
                Some(name) => println!("  [{}] {} {}", idx, name, "[recommended]".green()),
                None => println!("  [{}] {}", idx, device),
            }
        }
    }
    Ok(())
}

fn list_serial_ports(config: &Config) {
    let ports = available_ports();
    let selected = config.sensor.port.clone().unwrap_or_else(discover_port);

    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
    } else {
        println!("{}", "Serial ports:".bold());
        for port in &ports {
            if *port == selected {
                println!("  {} {}", port, "[selected]".green());
            } else {
                println!("  {}", port);
            }
        }
    }
    println!("  {}  {}", "Sensor port:".dimmed(), selected);
}

fn decode(
    config: &Config,
    file: &Path,
    protocol: Option<sweetspot::sensor::protocol::ProtocolVariant>,
) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let protocol = protocol.unwrap_or(config.sensor.protocol);
    let stdout = std::io::stdout();
    let summary = sweetspot::decode::decode_capture(config, protocol, &bytes, stdout.lock())?;
    eprintln!(
        "{} readings, {} rejected frames, {} with a listener",
        summary.readings, summary.rejected, summary.detections
    );
    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            std::fs::write(&config_path, toml::to_string_pretty(&Config::default())?)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
            println!("{} {}", "Wrote".green(), config_path.display());
        }
    }
    Ok(())
}
