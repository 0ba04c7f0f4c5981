//! CameliaEQ - three-band equalizer control for CamillaDSP
//!
//! Keeps the CamillaDSP config normalized, writes band gains, switches
//! per-device profiles and reloads the engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use cameliaeq::presence::{
    filter_loopback, CommandDeviceSource, DeviceSource, PresenceCallback, PresenceEvent,
    PresenceWatcher,
};
use cameliaeq::session::{
    ControlActor, ControlHandle, EqSession, SettingsOutcome, DEFAULT_DEBOUNCE_MS,
};
use cameliaeq::{AppPaths, Gains, ReloadClient, ReloadError, Settings, SettingsStore};

/// CameliaEQ - equalizer control for CamillaDSP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the settings file (defaults to the per-user config directory)
    #[arg(short, long, env = "CAMELIAEQ_SETTINGS")]
    settings: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the output device and accept commands on stdin until Ctrl+C
    Run {
        /// Debounce window for gain changes in milliseconds
        #[arg(long, default_value_t = DEFAULT_DEBOUNCE_MS)]
        debounce_ms: u64,
    },
    /// Show the current gains and output device
    Show,
    /// Set the gain of one band (Bass, Middle or Treble)
    SetGain {
        filter: String,
        #[arg(allow_hyphen_values = true)]
        gain: f64,
    },
    /// Switch the output device, restoring its saved profile
    SelectDevice { device: String },
    /// Normalize the CamillaDSP config file in place
    Normalize,
    /// Ask CamillaDSP to reload its config
    Reload,
    /// List output devices reported by the device command
    Devices,
    /// Set the CamillaDSP config file
    SetConfig { path: PathBuf },
    /// Set the CamillaDSP websocket port
    SetPort { port: u32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = match &args.settings {
        Some(file) => AppPaths::for_settings_file(file),
        None => AppPaths::detect(),
    };

    let daemon = matches!(args.command, Command::Run { .. });
    if daemon {
        paths.ensure_directories()?;
    }
    let _log_guard = init_logging(&args.log_level, daemon.then_some(&paths))?;

    if paths.is_portable {
        info!("Running in portable mode ({})", paths.base_dir().display());
    }
    info!("Settings file: {}", paths.settings.display());

    let store = SettingsStore::new(&paths);
    let settings = store.load_or_default();
    let session = Arc::new(EqSession::new(
        settings.clone().into_shared(),
        store,
        Arc::new(ReloadClient::new()),
    ));

    match args.command {
        Command::Run { debounce_ms } => run_daemon(session, debounce_ms).await?,
        Command::Show => {
            let gains = session.load_gains().await?;
            print_status(&settings, &gains);
        }
        Command::SetGain { filter, gain } => {
            let mut gains = session.load_gains().await?;
            if !gains.set(&filter, gain) {
                anyhow::bail!("Unknown filter '{}' (expected Bass, Middle or Treble)", filter);
            }
            let outcome = session.apply_gains(&gains).await?;
            if !outcome.written {
                println!("{}", "Gain unchanged".dimmed());
            }
            print_gains(&outcome.gains);
            print_reload(&outcome.reload);
        }
        Command::SelectDevice { device } => {
            let outcome = session.select_device(&device).await?;
            let origin = if outcome.restored {
                "saved profile restored".green()
            } else {
                "new profile".yellow()
            };
            println!("Output device: {} ({})", outcome.device.bold(), origin);
            print_gains(&outcome.gains);
            print_reload(&outcome.reload);
        }
        Command::Normalize => {
            if session.normalize_file().await? {
                println!("{}", "Config normalized".green());
            } else {
                println!("{}", "Config already normalized".dimmed());
            }
        }
        Command::Reload => print_reload(&session.request_reload().await),
        Command::Devices => {
            let source = device_source(&settings).context("Cannot list output devices")?;
            let devices = tokio::task::spawn_blocking(move || source.output_devices()).await??;
            println!("\n{}", "Output devices:".bold());
            for device in filter_loopback(devices) {
                let marker = if device == settings.playback_device {
                    "*".green()
                } else {
                    " ".normal()
                };
                println!("  {} {}", marker, device);
            }
        }
        Command::SetConfig { path } => {
            let path = std::path::absolute(&path).unwrap_or(path);
            let outcome = session.set_config_path(&path).await?;
            println!("CamillaDSP config: {}", path.display().to_string().cyan());
            print_settings_outcome(&outcome);
        }
        Command::SetPort { port } => {
            let outcome = session.set_port(port).await?;
            println!("CamillaDSP port: {}", port.to_string().cyan());
            print_settings_outcome(&outcome);
        }
    }

    Ok(())
}

/// Presence watcher, control actor and a line-based command prompt on stdin
async fn run_daemon(session: Arc<EqSession>, debounce_ms: u64) -> Result<()> {
    info!("Starting CameliaEQ...");

    let (stop_tx, stop_rx) = watch::channel(false);
    let settings = session.settings().clone();

    let watcher_task = {
        let snapshot = settings.read().clone();
        match device_source(&snapshot) {
            Ok(source) => {
                let notify: PresenceCallback = Arc::new(|event: PresenceEvent| match event {
                    PresenceEvent::Disconnected { device } => {
                        println!("{} {}", "Output device disconnected:".red().bold(), device);
                    }
                    PresenceEvent::Reconnected { device, reloaded } => {
                        let status = if reloaded { "reloaded".green() } else { "reload failed".red() };
                        println!("{} {} ({})", "Output device reconnected:".green().bold(), device, status);
                    }
                });
                let watcher = PresenceWatcher::new(
                    settings.clone(),
                    source,
                    Arc::new(ReloadClient::new()),
                    notify,
                )
                .with_interval(Duration::from_millis(snapshot.poll_interval_ms.max(100)));
                Some(watcher.spawn(stop_rx))
            }
            Err(e) => {
                warn!("Presence watcher disabled: {:#}", e);
                None
            }
        }
    };

    let (control, control_task) = ControlActor::spawn(session, debounce_ms).await;

    println!(
        "{}",
        "CameliaEQ running. Commands: bass|middle|treble <dB>, reset, device <name>, reload, quit"
            .cyan()
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let (mut prompt, resume) = spawn_prompt();
    let mut prompt_open = true;

    loop {
        tokio::select! {
            input = prompt.recv(), if prompt_open => match input {
                Some(PromptInput::Line(line)) => {
                    if !handle_line(&control, line.trim()).await {
                        break;
                    }
                    let _ = resume.send(());
                }
                Some(PromptInput::Interrupted) => {
                    info!("Interrupted at the prompt");
                    break;
                }
                Some(PromptInput::Closed) | None => {
                    // No more input; keep watching until Ctrl+C
                    debug!("Prompt closed");
                    prompt_open = false;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    info!("Shutting down...");
    let _ = stop_tx.send(true);
    control.shutdown();
    if let Err(e) = control_task.await {
        warn!("Control actor ended abnormally: {}", e);
    }
    if let Some(task) = watcher_task {
        let _ = task.await;
    }

    info!("CameliaEQ shutdown complete");
    Ok(())
}

/// Input read by the prompt thread
#[derive(Debug)]
enum PromptInput {
    Line(String),
    /// Ctrl+C pressed while the editor owned the terminal
    Interrupted,
    /// End of input or an unusable terminal
    Closed,
}

/// Read prompt lines with rustyline on a dedicated thread
fn spawn_prompt() -> (mpsc::UnboundedReceiver<PromptInput>, std::sync::mpsc::Sender<()>) {
    spawn_line_reader(|| {
        let mut editor = DefaultEditor::new();
        move || {
            let editor = match &mut editor {
                Ok(editor) => editor,
                Err(e) => {
                    warn!("Command prompt unavailable: {}", e);
                    return PromptInput::Closed;
                }
            };
            match editor.readline("cameliaeq> ") {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    PromptInput::Line(line)
                }
                Err(ReadlineError::Interrupted) => PromptInput::Interrupted,
                Err(ReadlineError::Eof) => PromptInput::Closed,
                Err(e) => {
                    warn!("Failed to read command: {}", e);
                    PromptInput::Closed
                }
            }
        }
    })
}

/// Run a blocking line reader on its own thread, forwarding what it reads.
///
/// The reader is built on that thread. After each line the thread waits for
/// a resume signal, so it is never inside `readline` (with the terminal in
/// raw mode) while a command runs or the process exits. The thread is not
/// joined; dropping the resume sender ends it.
fn spawn_line_reader<F, R>(
    make_reader: F,
) -> (mpsc::UnboundedReceiver<PromptInput>, std::sync::mpsc::Sender<()>)
where
    F: FnOnce() -> R + Send + 'static,
    R: FnMut() -> PromptInput,
{
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (resume_tx, resume_rx) = std::sync::mpsc::channel::<()>();

    let spawned = std::thread::Builder::new()
        .name("prompt".to_string())
        .spawn(move || {
            let mut read = make_reader();
            loop {
                let input = read();
                let more = matches!(input, PromptInput::Line(_));
                if input_tx.send(input).is_err() || !more || resume_rx.recv().is_err() {
                    break;
                }
            }
        });

    if let Err(e) = spawned {
        warn!("Failed to start command prompt: {}", e);
    }
    (input_rx, resume_tx)
}

/// Handle one prompt line. Returns `false` to quit.
async fn handle_line(control: &ControlHandle, line: &str) -> bool {
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let result = match word.to_ascii_lowercase().as_str() {
        "" => Ok(()),
        "quit" | "exit" => return false,
        "bass" | "middle" | "treble" => match rest.parse::<f64>() {
            Ok(gain) => control.set_gain(capitalize(word), gain).await,
            Err(_) => Err(anyhow::anyhow!("Expected a gain in dB, got '{}'", rest)),
        },
        "device" if !rest.is_empty() => control.select_device(rest).await.map(|outcome| {
            println!("Output device: {}", outcome.device.bold());
            print_gains(&outcome.gains);
            print_reload(&outcome.reload);
        }),
        "reset" => control.set_gains(Gains::default()).await,
        "reload" => control.reload().await.map(|reply| {
            println!("{} {}", "Reloaded:".green(), reply);
        }),
        _ => Err(anyhow::anyhow!("Unknown command '{}'", line)),
    };

    if let Err(e) = result {
        println!("{} {:#}", "Error:".red().bold(), e);
    }
    true
}

fn capitalize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn device_source(settings: &Settings) -> Result<Arc<dyn DeviceSource>> {
    let argv = settings
        .device_command
        .as_deref()
        .context("No device_command set in the settings file")?;
    Ok(Arc::new(CommandDeviceSource::from_argv(argv)?))
}

fn print_status(settings: &Settings, gains: &Gains) {
    println!("\n{}", "=== CameliaEQ ===".bold().cyan());
    let config = settings
        .config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string());
    println!("  Config:  {}", config.yellow());
    println!("  Port:    {}", settings.port.to_string().yellow());
    println!(
        "  Device:  {}",
        settings.selected_device().unwrap_or("(none)").yellow()
    );
    println!("  Profiles: {}", settings.devices.len().to_string().green());
    for device in settings.devices.devices() {
        println!("    - {}", device);
    }
    print_gains(gains);
}

fn print_gains(gains: &Gains) {
    for (name, gain) in gains.bands() {
        println!("  {:<7} {:>+6.1} dB", name, gain);
    }
}

fn print_settings_outcome(outcome: &SettingsOutcome) {
    if outcome.devices_written {
        println!("{}", "Devices section updated".green());
    }
    print_reload(&outcome.reload);
}

fn print_reload(result: &Result<String, ReloadError>) {
    match result {
        Ok(_) => println!("{}", "CamillaDSP reloaded".green()),
        Err(e) => println!("{} {}", "CamillaDSP not reloaded:".yellow(), e),
    }
}

/// Console logging, plus a daily log file when `paths` is given.
///
/// The returned guard must stay alive for file logs to be flushed.
fn init_logging(level: &str, paths: Option<&AppPaths>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    let (file, guard) = match paths {
        Some(paths) => {
            let appender = tracing_appender::rolling::daily(&paths.logs_dir, "cameliaeq.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
