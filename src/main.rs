//! cam-sync supervisor command-line interface.
//!
//! Drives the device under test over `adb` and supervises the capture engine
//! so both fire from one trigger.

use cam_sync::actuator::BridgeDevice;
use cam_sync::config::{default_config_path, ConfigError, RigConfig};
use cam_sync::{logging, AdbBridge, DeviceBridge, ExitCode, SessionController, SessionError, SessionEvent};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// cam-sync - synchronized capture rig supervisor
#[derive(Parser, Debug)]
#[command(name = "cam-sync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List devices known to adb
    Devices,
    /// Connect to a network device
    Connect {
        /// host[:port] (default: configured address)
        address: Option<String>,
    },
    /// Disconnect one network device, or all of them
    Disconnect {
        /// host[:port]
        address: Option<String>,
    },
    /// Deliver the configured input event once
    Action,
    /// Retrieve payload files from the device into the hand-off directory
    Pull,
    /// Run a capture session
    Session {
        /// Run this many captures and stop instead of reading commands from stdin
        #[arg(long)]
        takes: Option<u32>,
    },
    /// Show the configuration path and contents
    Config,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to create runtime: {err}");
            std::process::exit(ExitCode::GeneralError.as_i32());
        }
    };

    let exit_code = runtime.block_on(run(cli));
    std::process::exit(exit_code.as_i32());
}

/// Loaded configuration and where it came from.
struct Loaded {
    path: PathBuf,
    config: RigConfig,
}

fn load_config(explicit: Option<&Path>) -> Result<Loaded, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    let config = RigConfig::load(&path)?;
    Ok(Loaded { path, config })
}

async fn run(cli: Cli) -> ExitCode {
    let Loaded { path, config } = match load_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("{err}");
            return ExitCode::InvalidArguments;
        }
    };
    let bridge = AdbBridge::new(config.adb_settings());

    match cli.command {
        Commands::Devices => list_devices(&bridge).await,
        Commands::Connect { address } => {
            let Some(address) = address.or_else(|| config.bridge.address.clone()) else {
                error!("no address given and none configured");
                return ExitCode::InvalidArguments;
            };
            report(bridge.connect(&address).await.map(|message| println!("{message}")))
        }
        Commands::Disconnect { address } => report(bridge.disconnect(address.as_deref()).await),
        Commands::Action => report(bridge.send_action().await),
        Commands::Pull => pull(bridge, config, &path).await,
        Commands::Session { takes } => session(bridge, config, &path, takes).await,
        Commands::Config => show_config(&config, &path),
    }
}

fn report<E: std::fmt::Display>(result: Result<(), E>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::Success,
        Err(err) => {
            error!("{err}");
            ExitCode::GeneralError
        }
    }
}

async fn list_devices(bridge: &AdbBridge) -> ExitCode {
    match bridge.list_devices().await {
        Ok(devices) if devices.is_empty() => {
            println!("No devices attached.");
            ExitCode::Success
        }
        Ok(devices) => {
            print_devices(&devices);
            ExitCode::Success
        }
        Err(err) => {
            error!("{err}");
            ExitCode::GeneralError
        }
    }
}

fn print_devices(devices: &[BridgeDevice]) {
    let width = devices.iter().map(|d| d.serial.len()).max().unwrap_or(6).max(6);
    println!("{:<width$}  STATE", "SERIAL");
    for device in devices {
        println!("{:<width$}  {}", device.serial, device.state);
    }
}

fn show_config(config: &RigConfig, path: &Path) -> ExitCode {
    println!("# {}", path.display());
    match serde_json::to_string_pretty(config) {
        Ok(json) => {
            println!("{json}");
            ExitCode::Success
        }
        Err(err) => {
            error!("{err}");
            ExitCode::GeneralError
        }
    }
}

fn controller(
    bridge: AdbBridge,
    config: &RigConfig,
    engine_program: PathBuf,
) -> Result<SessionController<AdbBridge>, ConfigError> {
    let settings = config.controller_settings(engine_program)?;
    Ok(SessionController::new(Arc::new(bridge), settings, config.naming.clone()))
}

/// Persist every naming advance announced since the last call.
fn persist_naming(events: &mut broadcast::Receiver<SessionEvent>, config: &mut RigConfig, path: &Path) {
    loop {
        match events.try_recv() {
            Ok(SessionEvent::SequenceAdvanced(naming)) => {
                config.naming = naming;
                if let Err(err) = config.save(path) {
                    error!("naming sequence not persisted: {err}");
                }
            }
            Ok(SessionEvent::HandedOff { destination, .. }) => println!("saved {}", destination.display()),
            Ok(SessionEvent::Retrieved(target)) => println!("retrieved {}", target.display()),
            Ok(SessionEvent::ActionFailed(reason)) => warn!("action failed: {reason}"),
            Ok(SessionEvent::StateChanged { .. }) => {}
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                warn!(missed, "session events lagged");
            }
            Err(_) => break,
        }
    }
}

fn exit_code_for(err: &SessionError) -> ExitCode {
    match err {
        SessionError::EngineExited(Some(status)) => status
            .code()
            .and_then(ExitCode::from_i32)
            .filter(|code| *code != ExitCode::Success)
            .unwrap_or(ExitCode::GeneralError),
        _ => ExitCode::GeneralError,
    }
}

async fn pull(bridge: AdbBridge, mut config: RigConfig, path: &Path) -> ExitCode {
    // No engine is spawned, so the program path is never used.
    let mut controller = match controller(bridge, &config, PathBuf::new()) {
        Ok(controller) => controller,
        Err(err) => {
            error!("{err}");
            return ExitCode::InvalidArguments;
        }
    };
    let mut events = controller.subscribe();
    let result = controller.retrieve_payload().await;
    persist_naming(&mut events, &mut config, path);
    match result {
        Ok(_) => ExitCode::Success,
        Err(err) => {
            error!("{err}");
            exit_code_for(&err)
        }
    }
}

async fn session(bridge: AdbBridge, mut config: RigConfig, path: &Path, takes: Option<u32>) -> ExitCode {
    match bridge.probe().await {
        Ok(version) => info!("{version}"),
        Err(err) => warn!("device bridge unavailable, actions will fail: {err}"),
    }

    let engine_program = match config.engine_program() {
        Ok(program) => program,
        Err(err) => {
            error!("{err}");
            return ExitCode::GeneralError;
        }
    };
    let mut controller = match controller(bridge, &config, engine_program) {
        Ok(controller) => controller,
        Err(err) => {
            error!("{err}");
            return ExitCode::InvalidArguments;
        }
    };
    let mut events = controller.subscribe();

    if let Err(err) = controller.start_engine().await {
        error!("{err}");
        if let Err(stop_err) = controller.stop().await {
            error!("{stop_err}");
        }
        return exit_code_for(&err);
    }
    if let Some(negotiated) = controller.negotiated() {
        println!(
            "engine ready: {}x{} @ {:.2} fps {}",
            negotiated.width, negotiated.height, negotiated.fps, negotiated.fourcc
        );
    }

    let result = match takes {
        Some(takes) => run_takes(&mut controller, takes, &mut events, &mut config, path).await,
        None => interactive(&mut controller, &mut events, &mut config, path).await,
    };

    let stopped = controller.stop().await;
    persist_naming(&mut events, &mut config, path);
    match (result, stopped) {
        (Ok(()), Ok(_)) => ExitCode::Success,
        (Err(err), _) | (Ok(()), Err(err)) => {
            error!("{err}");
            exit_code_for(&err)
        }
    }
}

async fn run_takes(
    controller: &mut SessionController<AdbBridge>,
    takes: u32,
    events: &mut broadcast::Receiver<SessionEvent>,
    config: &mut RigConfig,
    path: &Path,
) -> Result<(), SessionError> {
    for take in 1..=takes {
        info!(take, of = takes, "capture");
        let result = controller.capture_once().await;
        persist_naming(events, config, path);
        if result?.is_none() {
            warn!(take, "capture produced no recording");
        }
    }
    Ok(())
}

/// Operator command read from stdin during an interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperatorCommand {
    Start,
    Pull,
    Status,
    Stop,
}

impl OperatorCommand {
    fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" | "s" => Some(Self::Start),
            "pull" | "p" => Some(Self::Pull),
            "status" => Some(Self::Status),
            "stop" | "quit" | "q" => Some(Self::Stop),
            _ => None,
        }
    }
}

async fn interactive(
    controller: &mut SessionController<AdbBridge>,
    events: &mut broadcast::Receiver<SessionEvent>,
    config: &mut RigConfig,
    path: &Path,
) -> Result<(), SessionError> {
    println!("commands: start, pull, status, stop");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("operator input closed");
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                match OperatorCommand::parse(&line) {
                    Some(OperatorCommand::Start) => match controller.capture_once().await {
                        Ok(_) => {}
                        Err(err @ (SessionError::NotReady(_) | SessionError::Handoff { .. } | SessionError::Naming(_))) => {
                            warn!("{err}");
                        }
                        Err(err) => return Err(err),
                    },
                    Some(OperatorCommand::Pull) => {
                        if let Err(err) = controller.retrieve_payload().await {
                            warn!("{err}");
                        }
                    }
                    Some(OperatorCommand::Status) => print_status(controller),
                    Some(OperatorCommand::Stop) => return Ok(()),
                    None => warn!(command = line.trim(), "unknown command"),
                }
            }
            Some(message) = controller.recv_message() => {
                controller.apply(message).await?;
            }
        }
        persist_naming(events, config, path);
    }
}

fn print_status(controller: &SessionController<AdbBridge>) {
    println!("status: {} ({})", controller.status(), controller.state());
    println!("next name: {}", controller.naming().stem());
    if let Some(report) = controller.record().and_then(|record| record.last_report()) {
        println!(
            "last pass: {} frames, {} dropped, {:.3}s at {:.2} fps",
            report.frames, report.dropped, report.elapsed, report.fps
        );
    }
}
