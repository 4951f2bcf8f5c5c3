//! Output file writer.
//!
//! A pass is committed in one piece: frames are validated first, then piped
//! into a single ffmpeg process. Any failure removes the partial file, so a
//! pass yields either a complete file or nothing.

use crate::negotiation::NegotiatedConfig;
use crate::traits::{FourCC, Frame};
use ffmpeg_sidecar::command::FfmpegCommand;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, warn};

/// JPEG start-of-image marker.
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Error type for writing a capture pass.
#[derive(Debug, Error)]
pub enum WriterError {
    /// The negotiated pixel format has no encoder mapping.
    #[error("No encoder input for pixel format {0}")]
    UnsupportedFormat(FourCC),
    /// A buffered frame does not match the negotiated format.
    #[error("Frame {index} is malformed: {reason}")]
    MalformedFrame {
        /// Position in the buffer.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },
    /// The encoder process could not be started.
    #[error("Failed to start encoder {program}: {source}")]
    Spawn {
        /// Encoder binary.
        program: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Writing frames to the encoder failed.
    #[error("Encoder pipe failed: {0}")]
    Pipe(std::io::Error),
    /// The encoder exited unsuccessfully.
    #[error("Encoder failed ({status}): {message}")]
    Encoder {
        /// Exit status as reported by the OS.
        status: String,
        /// Last diagnostic line from the encoder.
        message: String,
    },
    /// I/O error around the output file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sink for one complete capture pass.
pub trait VideoWriter {
    /// Encode `frames` into `path` using the negotiated parameters.
    ///
    /// Returns the number of frames committed. On error no file is left at
    /// `path`.
    fn write_pass(&mut self, path: &Path, config: &NegotiatedConfig, frames: Vec<Frame>) -> Result<u64, WriterError>;
}

/// Row layout of raw frames: packed row length and row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowLayout {
    row: usize,
    rows: usize,
}

impl RowLayout {
    fn of(config: &NegotiatedConfig) -> Option<Self> {
        let row = config.format().row_len()?;
        let rows = usize::try_from(config.height).ok()?;
        Some(Self { row, rows })
    }

    /// Bytes per line in a payload of `len` bytes. Drivers may pad lines.
    fn stride(self, len: usize) -> Option<usize> {
        if self.rows == 0 || len % self.rows != 0 {
            return None;
        }
        let stride = len / self.rows;
        (stride >= self.row).then_some(stride)
    }
}

/// Check every frame against the negotiated format before encoding starts.
///
/// Raw frames must hold `height` lines of at least `width x bpp` bytes each.
pub fn validate_frames(config: &NegotiatedConfig, frames: &[Frame]) -> Result<(), WriterError> {
    let layout = RowLayout::of(config);
    let compressed = config.fourcc == FourCC::MJPG;
    if layout.is_none() && !compressed {
        return Err(WriterError::UnsupportedFormat(config.fourcc));
    }

    for (index, frame) in frames.iter().enumerate() {
        let payload = frame.payload();
        match layout {
            Some(layout) if layout.stride(payload.len()).is_none() => {
                return Err(WriterError::MalformedFrame {
                    index,
                    reason: format!(
                        "{} bytes, expected {} lines of at least {} bytes",
                        payload.len(),
                        layout.rows,
                        layout.row
                    ),
                });
            }
            None if !payload.starts_with(&JPEG_SOI) => {
                return Err(WriterError::MalformedFrame {
                    index,
                    reason: "missing JPEG start-of-image marker".to_owned(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

/// Write one frame, dropping line padding from raw payloads.
fn write_frame<W: Write>(out: &mut W, payload: &[u8], layout: Option<RowLayout>) -> std::io::Result<()> {
    let Some((layout, stride)) = layout.and_then(|l| l.stride(payload.len()).map(|s| (l, s))) else {
        return out.write_all(payload);
    };
    if stride == layout.row {
        return out.write_all(payload);
    }
    for line in payload.chunks_exact(stride) {
        out.write_all(line.get(..layout.row).unwrap_or(line))?;
    }
    Ok(())
}

/// ffmpeg input options describing the piped frames.
pub fn input_args(config: &NegotiatedConfig) -> Result<Vec<String>, WriterError> {
    let rate = config.fps.to_string();
    let size = format!("{}x{}", config.width, config.height);
    let args: Vec<&str> = match config.fourcc {
        FourCC::YUYV => vec!["-f", "rawvideo", "-pix_fmt", "yuyv422", "-s", &size, "-r", &rate],
        FourCC::RGB3 => vec!["-f", "rawvideo", "-pix_fmt", "rgb24", "-s", &size, "-r", &rate],
        FourCC::MJPG => vec!["-f", "mjpeg", "-framerate", &rate],
        other => return Err(WriterError::UnsupportedFormat(other)),
    };
    Ok(args.into_iter().map(str::to_owned).collect())
}

/// ffmpeg output options: MPEG-4 Part 2, one output frame per input frame.
const OUTPUT_ARGS: [&str; 9] = [
    "-an",
    "-c:v",
    "mpeg4",
    "-q:v",
    "2",
    "-pix_fmt",
    "yuv420p",
    "-fps_mode",
    "passthrough",
];

/// Resolve the ffmpeg binary: explicit path, then `PATH`, then next to our executable.
#[must_use]
pub fn resolve_ffmpeg(configured: Option<&Path>) -> PathBuf {
    configured.map_or_else(
        || which::which("ffmpeg").unwrap_or_else(|_| ffmpeg_sidecar::paths::ffmpeg_path()),
        Path::to_path_buf,
    )
}

fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed partial output"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), "could not remove partial output: {err}"),
    }
}

/// Drain encoder stderr into the log, keeping the last line for error reports.
fn drain_stderr(stderr: std::process::ChildStderr) -> JoinHandle<Option<String>> {
    std::thread::spawn(move || {
        let mut last = None;
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            debug!(target: "cam_sync::ffmpeg", "{line}");
            if !line.trim().is_empty() {
                last = Some(line);
            }
        }
        last
    })
}

/// Writer that pipes frames into an ffmpeg process.
#[derive(Debug, Clone)]
pub struct FfmpegWriter {
    program: PathBuf,
}

impl FfmpegWriter {
    /// Writer using the given ffmpeg binary.
    #[must_use]
    pub const fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// The ffmpeg binary in use.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn encode(&self, path: &Path, config: &NegotiatedConfig, frames: &[Frame]) -> Result<u64, WriterError> {
        let mut command = FfmpegCommand::new_with_path(&self.program);
        command
            .args(["-hide_banner", "-loglevel", "error"])
            .args(input_args(config)?)
            .args(["-i", "-"])
            .args(OUTPUT_ARGS)
            .args(["-y"])
            .arg(path.to_string_lossy().to_string());

        let inner = command.as_inner_mut();
        inner.stdin(Stdio::piped());
        inner.stdout(Stdio::null());
        inner.stderr(Stdio::piped());

        let mut child = inner.spawn().map_err(|source| WriterError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let stderr = child.stderr.take().map(drain_stderr);

        let piped = child.stdin.take().map_or_else(
            || Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "encoder stdin unavailable")),
            |mut stdin| {
                let layout = RowLayout::of(config);
                for frame in frames {
                    write_frame(&mut stdin, frame.payload(), layout)?;
                }
                stdin.flush()
            },
        );

        let status = child.wait()?;
        let last_line = stderr.and_then(|handle| handle.join().ok().flatten());

        if !status.success() {
            return Err(WriterError::Encoder {
                status: status.to_string(),
                message: last_line.unwrap_or_else(|| "no diagnostics".to_owned()),
            });
        }
        piped.map_err(WriterError::Pipe)?;

        Ok(frames.len() as u64)
    }
}

impl VideoWriter for FfmpegWriter {
    fn write_pass(&mut self, path: &Path, config: &NegotiatedConfig, frames: Vec<Frame>) -> Result<u64, WriterError> {
        validate_frames(config, &frames)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        debug!(
            path = %path.display(),
            frames = frames.len(),
            "encoding {}x{} @ {} fps {}",
            config.width,
            config.height,
            config.fps,
            config.fourcc
        );

        let result = self.encode(path, config, &frames);
        if result.is_err() {
            remove_partial(path);
        }
        result
    }
}
