//! Capture engine process.
//!
//! Reads command tokens from stdin, writes protocol status lines to stdout
//! and logs to stderr. Spawned and supervised by `cam-sync session`.

use cam_sync::engine::{CaptureEngine, EngineError, EngineSettings};
use cam_sync::protocol::StatusWriter;
use cam_sync::writer::{resolve_ffmpeg, FfmpegWriter};
use cam_sync::{logging, CaptureConfig, Exposure, ExposureMode, ExitCode, FourCC, V4L2Device};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// cam-sync capture engine
#[derive(Parser, Debug)]
#[command(name = "cam-sync-engine")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// V4L2 device index (/dev/video<N>)
    #[arg(long, default_value_t = 0)]
    device: u32,

    /// Requested width in pixels
    #[arg(long, default_value_t = 360)]
    width: u32,

    /// Requested height in pixels
    #[arg(long, default_value_t = 320)]
    height: u32,

    /// Requested frames per second
    #[arg(long, default_value_t = 240)]
    fps: u32,

    /// First pixel-format hint: MJPG, YUYV or RGB3
    #[arg(long, default_value = "MJPG")]
    pixel_format: FourCC,

    /// Exposure mode: auto or manual
    #[arg(long, default_value = "manual")]
    exposure: ExposureMode,

    /// Exposure value for manual mode
    #[arg(long, default_value_t = -8, allow_hyphen_values = true)]
    exposure_value: i64,

    /// Length of one capture pass in seconds
    #[arg(long, default_value = "5", value_parser = parse_seconds)]
    duration: Duration,

    /// Directory for recordings
    #[arg(long, default_value = "videos")]
    output_dir: PathBuf,

    /// Recording file name prefix
    #[arg(long, default_value = "Cam240")]
    prefix: String,

    /// mmap buffers per stream
    #[arg(long, default_value_t = 4)]
    buffers: u32,

    /// ffmpeg binary (default: PATH, then the ffmpeg-sidecar location)
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|err| format!("{value:?}: {err}"))?;
    if secs <= 0.0 {
        return Err(format!("{value:?}: must be positive"));
    }
    Duration::try_from_secs_f64(secs).map_err(|err| format!("{value:?}: {err}"))
}

impl Args {
    fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            width: self.width,
            height: self.height,
            fps: self.fps,
            pixel_format: self.pixel_format,
            exposure: Exposure {
                mode: self.exposure,
                value: Some(self.exposure_value),
            },
        }
    }

    fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            duration: self.duration,
            output_dir: self.output_dir.clone(),
            file_prefix: self.prefix.clone(),
            buffer_count: self.buffers.max(1),
        }
    }
}

fn main() {
    let args = Args::parse();
    logging::init(args.verbose, args.quiet);
    std::process::exit(run(&args).as_i32());
}

fn run(args: &Args) -> ExitCode {
    let ffmpeg = resolve_ffmpeg(args.ffmpeg.as_deref());
    info!(device = args.device, ffmpeg = %ffmpeg.display(), "engine starting");

    let device = match V4L2Device::open(args.device) {
        Ok(device) => device,
        Err(err) => {
            let err = EngineError::CameraUnavailable(err);
            error!("{err}");
            return err.exit_code();
        }
    };

    let mut engine = CaptureEngine::configure(
        device,
        &args.capture_config(),
        FfmpegWriter::new(ffmpeg),
        args.engine_settings(),
    );
    let mut status = StatusWriter::new(io::stdout().lock());

    match engine.run(io::stdin().lock(), &mut status) {
        Ok(()) => ExitCode::Success,
        Err(err) => {
            error!("{err}");
            err.exit_code()
        }
    }
}
