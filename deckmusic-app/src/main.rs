mod commands;
mod sink;

use crate::commands::{Command, HELP};
use crate::sink::{HeadlessSink, SIMULATED_STREAM_LENGTH};
use deckmusic_backend_rpc::RpcBackend;
use deckmusic_core::{
    AssetCache, AudioOutput, AudioSink, Config, CoreError, JsonFileSettingsStore, MusicBackend,
    PersistenceGateway, PlaybackController, PlayerEvent, SettingsSource, SettingsStore, Track,
};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    // Initialize logging with optional file output
    // Check config for logging.file before full config load
    let file_logging_enabled = check_file_logging_enabled();
    init_tracing(file_logging_enabled);

    let config = match Config::load_or_create() {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { path }) => {
            info!(
                "Created a configuration template at {}. Review it and start again.",
                path.display()
            );
            std::process::exit(0);
        }
        Err(CoreError::ConfigParseError(parse_error)) => {
            error!(
                "Configuration file {} has a syntax error: {parse_error}",
                Config::config_path().display()
            );
            std::process::exit(1);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    // Create shared cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    let ctrlc_token = cancel_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down gracefully...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    if let Err(e) = runtime.block_on(run(config, cancel_token)) {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(config: Config, cancel_token: CancellationToken) -> Result<(), CoreError> {
    let rpc = Arc::new(RpcBackend::new(&config.backend)?);
    let backend: Arc<dyn MusicBackend> = rpc.clone();
    let store: Arc<dyn SettingsStore> = match config.backend.settings_source {
        SettingsSource::Rpc => rpc as Arc<dyn SettingsStore>,
        SettingsSource::File => {
            let store = JsonFileSettingsStore::default_location();
            info!("Keeping settings in {}", store.path().display());
            Arc::new(store)
        }
    };

    let persistence = PersistenceGateway::new(store, config.persistence.debounce());
    let cache = AssetCache::new(Arc::clone(&backend), &config.cache);
    let output = AudioOutput::new(
        Box::new(|events| {
            Arc::new(HeadlessSink::new(events, SIMULATED_STREAM_LENGTH)) as Arc<dyn AudioSink>
        }),
        config.playback.initial_volume,
    );
    let controller = PlaybackController::new(
        output,
        cache,
        backend,
        Arc::clone(&persistence),
        &config.playback,
    );

    tokio::spawn(log_player_events(controller.events()));

    controller.restore().await;
    print_status(&controller);
    println!("Type `help` for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read command: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => execute(&controller, command).await,
            Err(message) => println!("{message}"),
        }
    }

    info!("Flushing pending settings before exit");
    if let Err(e) = persistence.flush().await {
        warn!("Failed to save settings on exit: {e}");
    }
    Ok(())
}

async fn execute(controller: &Arc<PlaybackController>, command: Command) {
    match command {
        Command::Load(path) => match read_track_list(&path).await {
            Ok(tracks) if tracks.is_empty() => println!("{} holds no tracks", path.display()),
            Ok(tracks) => {
                controller.play_timeline(&tracks, 0).await;
            }
            Err(e) => println!("Failed to load {}: {e}", path.display()),
        },
        Command::Play(track) => {
            controller.play_track(track).await;
        }
        Command::Add(track) => {
            let added = controller.enqueue(std::slice::from_ref(&track)).await;
            if added == 0 {
                println!("{track} is already queued");
            }
        }
        Command::PlayAt(index) => {
            if !controller.play_at(index).await {
                println!("No track at position {index}");
            }
        }
        Command::Remove(index) => {
            if !controller.remove_queued(index) {
                println!("Cannot remove position {index}");
            }
        }
        Command::Next => controller.next().await,
        Command::Prev => controller.prev().await,
        Command::Toggle => controller.toggle_play().await,
        Command::Stop => controller.stop(),
        Command::Clear => controller.clear_queue(),
        Command::Mode(Some(mode)) => controller.set_mode(mode),
        Command::Mode(None) => {
            let mode = controller.cycle_mode();
            println!("Mode: {}", mode.as_str());
        }
        Command::Volume(volume) => controller.set_volume(volume, true),
        Command::Quality(quality) => controller.set_preferred_quality(quality),
        Command::Seek(position) => match controller.seek(position) {
            Some(applied) => println!("Seeked to {}s", applied.as_secs()),
            None => println!("Nothing seekable is loaded"),
        },
        Command::Provider(id) => {
            if let Err(e) = controller.switch_provider(&id).await {
                println!("Could not switch to {id}: {e}");
            }
        }
        Command::Status => print_status(controller),
        Command::Reset => {
            controller.reset_all().await;
            controller.enable_settings_persistence(true);
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

async fn read_track_list(path: &Path) -> Result<Vec<Track>, CoreError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

fn print_status(controller: &PlaybackController) {
    let snapshot = controller.snapshot();
    let state = if snapshot.loading {
        "loading"
    } else if snapshot.is_playing {
        "playing"
    } else {
        "idle"
    };
    match &snapshot.current_track {
        Some(track) => println!("[{state}] {track}  {}", snapshot.progress_label()),
        None => println!("[{state}] nothing loaded"),
    }
    if let Some(err) = &snapshot.error {
        println!("  error: {err}");
    }
    println!(
        "  mode {} | volume {:.0}% | provider {}",
        snapshot.mode.as_str(),
        snapshot.volume * 100.0,
        snapshot.provider_id.as_deref().unwrap_or("-")
    );
    for (i, track) in snapshot.tracks.iter().enumerate() {
        let marker = if snapshot.cursor == Some(i) { '>' } else { ' ' };
        println!("  {marker} {i:>3}  {track}");
    }
}

/// Log all player events to the console
async fn log_player_events(mut rx: tokio::sync::broadcast::Receiver<PlayerEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match &event {
                PlayerEvent::TrackChanged { track, index } => {
                    info!("Track changed: {} (#{})", track, index);
                }
                PlayerEvent::PlaybackStarted { track } => {
                    info!("Playback started: {}", track);
                }
                PlayerEvent::PlaybackPaused { position } => {
                    info!("Playback paused at {:?}", position);
                }
                PlayerEvent::PlaybackResumed { position } => {
                    info!("Playback resumed at {:?}", position);
                }
                PlayerEvent::PlaybackStopped => {
                    info!("Playback stopped");
                }
                PlayerEvent::LyricLoaded { mid, lyric } => {
                    info!("Lyric loaded for {}: {} lines", mid, lyric.lines.len());
                }
                PlayerEvent::LyricNotFound { mid } => {
                    info!("No lyric for {}", mid);
                }
                PlayerEvent::ModeChanged { mode } => {
                    info!("Play mode: {}", mode.as_str());
                }
                PlayerEvent::QueueChanged { len, cursor } => {
                    info!("Queue: {} tracks, cursor {:?}", len, cursor);
                }
                PlayerEvent::Toast { title, body } => {
                    info!("{}: {}", title, body);
                }
                PlayerEvent::Error { error } => {
                    error!("Playback error: {}", error);
                }
            },
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                info!("Player event channel closed");
                break;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                info!("Missed {} player events", n);
            }
        }
    }
}

/// Check if file logging is enabled by reading the config file.
/// This is done before full config loading to set up tracing first.
/// Returns `false` if config doesn't exist or can't be parsed.
fn check_file_logging_enabled() -> bool {
    // Minimal structs to parse just the logging.file field
    #[derive(serde::Deserialize)]
    struct PartialConfig {
        #[serde(default)]
        logging: PartialLoggingConfig,
    }

    #[derive(serde::Deserialize, Default)]
    struct PartialLoggingConfig {
        #[serde(default)]
        file: bool,
    }

    let Ok(content) = std::fs::read_to_string(Config::config_path()) else {
        return false;
    };

    toml::from_str::<PartialConfig>(&content)
        .map(|c| c.logging.file)
        .unwrap_or(false)
}

/// Initialize tracing with console output and optional file logging
fn init_tracing(file_logging_enabled: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest_retry=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if file_logging_enabled {
        let log_path = deckmusic_core::paths::log_file_path();
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match File::create(&log_path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(file_layer)
                    .init();
                return;
            }
            Err(e) => {
                eprintln!("Failed to create log file at {}: {e}", log_path.display());
            }
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
