//! Capture engine: owns one camera and records fixed-duration passes on command.
//!
//! ```text
//! STARTING -> CONFIGURED -> READY <-> CAPTURING
//!                             |           |
//!                             +-----------+--> SHUTTING_DOWN -> TERMINATED
//! ```
//!
//! The acquisition loop is synchronous on purpose: nothing is written to disk
//! and nothing yields to a scheduler between two frame reads.

use crate::exit_codes::ExitCode;
use crate::negotiation::{negotiate, CaptureConfig, NegotiatedConfig};
use crate::pass::{achieved_fps, frame_budget, sequence_gaps, FrameBuffer, PassSummary};
use crate::protocol::{EngineCommand, StatusEvent, StatusWriter};
use crate::traits::{CameraDevice, CameraError, CaptureStream};
use crate::writer::VideoWriter;
use chrono::Local;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Opening the camera.
    Starting,
    /// Camera configured, readiness not yet announced.
    Configured,
    /// Waiting for commands.
    Ready,
    /// Running a capture pass.
    Capturing,
    /// Releasing the camera.
    ShuttingDown,
    /// Camera released.
    Terminated,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "STARTING",
            Self::Configured => "CONFIGURED",
            Self::Ready => "READY",
            Self::Capturing => "CAPTURING",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Error type for the engine process.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The camera could not be opened.
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(#[source] CameraError),
    /// Status could not be written to the supervisor.
    #[error("Status channel broken: {0}")]
    StatusChannel(#[source] io::Error),
    /// Commands could not be read.
    #[error("Command channel failed: {0}")]
    CommandChannel(#[source] io::Error),
}

impl EngineError {
    /// Process exit code for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::CameraUnavailable(_) => ExitCode::CameraUnavailable,
            Self::StatusChannel(_) => ExitCode::StatusChannelBroken,
            Self::CommandChannel(_) => ExitCode::GeneralError,
        }
    }
}

/// Per-process settings that are not camera parameters.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Length of one capture pass.
    pub duration: Duration,
    /// Directory for output files.
    pub output_dir: PathBuf,
    /// Output file name prefix.
    pub file_prefix: String,
    /// Number of mmap buffers per stream.
    pub buffer_count: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            output_dir: PathBuf::from("videos"),
            file_prefix: "Cam240".to_owned(),
            buffer_count: 4,
        }
    }
}

/// Timestamped output path inside `dir` that does not exist yet.
pub fn output_path(dir: &Path, prefix: &str) -> PathBuf {
    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let base = format!("{prefix}_{stamp}");
    let mut candidate = dir.join(format!("{base}.mp4"));
    let mut counter = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("{base}_{counter}.mp4"));
        counter += 1;
    }
    candidate
}

/// The capture engine.
pub struct CaptureEngine<D: CameraDevice, W: VideoWriter> {
    device: D,
    writer: W,
    settings: EngineSettings,
    negotiated: NegotiatedConfig,
    state: EngineState,
    passes: u64,
}

impl<D: CameraDevice, W: VideoWriter> CaptureEngine<D, W> {
    /// Configure an opened camera. `STARTING -> CONFIGURED`.
    pub fn configure(mut device: D, request: &CaptureConfig, writer: W, settings: EngineSettings) -> Self {
        debug!(state = %EngineState::Starting, card = %device.capabilities().card, "configuring camera");
        let negotiated = negotiate(&mut device, request);
        info!(
            state = %EngineState::Configured,
            "camera configured: {}x{} @ {:.2} fps {}, exposure {}",
            negotiated.width,
            negotiated.height,
            negotiated.fps,
            negotiated.fourcc,
            negotiated.exposure.mode.as_str()
        );
        Self {
            device,
            writer,
            settings,
            negotiated,
            state: EngineState::Configured,
            passes: 0,
        }
    }

    /// Parameters every output file is encoded with.
    pub const fn negotiated(&self) -> &NegotiatedConfig {
        &self.negotiated
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Completed capture passes.
    pub const fn passes(&self) -> u64 {
        self.passes
    }

    /// The camera.
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// The output writer.
    pub const fn writer(&self) -> &W {
        &self.writer
    }

    fn transition(&mut self, next: EngineState) {
        debug!(from = %self.state, to = %next, "engine state");
        self.state = next;
    }

    /// Serve commands from `input` until a quit token or end of input.
    ///
    /// Announces the negotiated parameters and readiness first. Commands
    /// written before readiness are already queued in `input` and are not lost.
    /// The camera is released on every exit path.
    pub fn run<R: BufRead, O: Write>(&mut self, input: R, status: &mut StatusWriter<O>) -> Result<(), EngineError> {
        let result = self.serve(input, status);
        self.shutdown();
        result
    }

    fn serve<R: BufRead, O: Write>(&mut self, input: R, status: &mut StatusWriter<O>) -> Result<(), EngineError> {
        status
            .emit(&StatusEvent::Init(self.negotiated.clone()))
            .map_err(EngineError::StatusChannel)?;
        self.announce_ready(status)?;

        for line in input.lines() {
            let line = line.map_err(EngineError::CommandChannel)?;
            match EngineCommand::parse(&line) {
                None => {}
                Some(EngineCommand::Record) => {
                    self.capture_pass(status)?;
                    self.announce_ready(status)?;
                }
                Some(EngineCommand::Quit) => {
                    info!("quit requested");
                    return Ok(());
                }
                Some(EngineCommand::Unknown(token)) => {
                    warn!(%token, "ignoring unknown command");
                }
            }
        }

        info!("command channel closed");
        Ok(())
    }

    fn announce_ready<O: Write>(&mut self, status: &mut StatusWriter<O>) -> Result<(), EngineError> {
        self.transition(EngineState::Ready);
        status.emit(&StatusEvent::Ready).map_err(EngineError::StatusChannel)
    }

    /// Run one bounded capture pass and commit it. `READY -> CAPTURING`.
    ///
    /// The state is left at `CAPTURING`; the caller re-announces readiness.
    pub fn capture_pass<O: Write>(&mut self, status: &mut StatusWriter<O>) -> Result<PassSummary, EngineError> {
        self.transition(EngineState::Capturing);

        let budget = frame_budget(self.settings.duration, self.negotiated.fps);
        let mut buffer = FrameBuffer::with_budget(budget);
        let mut dropped = 0u64;
        info!(budget, duration = ?self.settings.duration, "capture started");

        let started = Instant::now();
        match self.device.create_stream(self.settings.buffer_count) {
            Ok(mut stream) => {
                for index in 0..budget {
                    match stream.next_frame() {
                        Ok(frame) => buffer.push(frame),
                        Err(err) => {
                            dropped += 1;
                            debug!(index, "frame dropped: {err}");
                            status
                                .emit(&StatusEvent::Dropped { index })
                                .map_err(EngineError::StatusChannel)?;
                        }
                    }
                }
            }
            Err(err) => {
                error!("could not start capture stream: {err}");
                for index in 0..budget {
                    dropped += 1;
                    status
                        .emit(&StatusEvent::Dropped { index })
                        .map_err(EngineError::StatusChannel)?;
                }
            }
        }
        let elapsed = started.elapsed();

        let frames = buffer.len() as u64;
        let summary = PassSummary {
            budget,
            frames,
            dropped,
            sequence_gaps: sequence_gaps(buffer.frames()),
            elapsed,
            achieved_fps: achieved_fps(frames, elapsed),
        };
        if summary.sequence_gaps > 0 {
            warn!(gaps = summary.sequence_gaps, "driver skipped frames between reads");
        }

        self.commit(buffer, status)?;

        info!(
            frames = summary.frames,
            dropped = summary.dropped,
            "capture finished in {:.3}s at {:.2} fps",
            summary.elapsed.as_secs_f64(),
            summary.achieved_fps
        );
        status
            .emit(&StatusEvent::Summary {
                frames: summary.frames,
                dropped: summary.dropped,
                elapsed: summary.elapsed.as_secs_f64(),
                fps: summary.achieved_fps,
            })
            .map_err(EngineError::StatusChannel)?;

        self.passes += 1;
        Ok(summary)
    }

    /// Write the whole buffer, or report that there was nothing to write.
    fn commit<O: Write>(&mut self, buffer: FrameBuffer, status: &mut StatusWriter<O>) -> Result<(), EngineError> {
        if buffer.is_empty() {
            warn!("nothing captured, no file written");
            return status.emit(&StatusEvent::Empty).map_err(EngineError::StatusChannel);
        }

        let path = output_path(&self.settings.output_dir, &self.settings.file_prefix);
        status
            .emit(&StatusEvent::Saving(path.clone()))
            .map_err(EngineError::StatusChannel)?;

        let event = match self.writer.write_pass(&path, &self.negotiated, buffer.into_frames()) {
            Ok(written) => {
                info!(path = %path.display(), frames = written, "saved");
                StatusEvent::Saved(path)
            }
            Err(err) => {
                error!(path = %path.display(), "save failed: {err}");
                StatusEvent::SaveFailed(err.to_string())
            }
        };
        status.emit(&event).map_err(EngineError::StatusChannel)
    }

    /// Release the camera. `SHUTTING_DOWN -> TERMINATED`. Idempotent.
    pub fn shutdown(&mut self) {
        if self.state == EngineState::Terminated {
            return;
        }
        self.transition(EngineState::ShuttingDown);
        self.device.close();
        self.transition(EngineState::Terminated);
        info!(passes = self.passes, "engine terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;
    use crate::traits::{Exposure, ExposureMode, FourCC, Frame};
    use crate::writer::WriterError;
    use std::io::Cursor;

    /// Writer that records what it was asked to write.
    #[derive(Default)]
    struct RecordingWriter {
        passes: Vec<(PathBuf, NegotiatedConfig, usize)>,
        fail: bool,
    }

    impl VideoWriter for RecordingWriter {
        fn write_pass(&mut self, path: &Path, config: &NegotiatedConfig, frames: Vec<Frame>) -> Result<u64, WriterError> {
            if self.fail {
                return Err(WriterError::Encoder {
                    status: "exit status: 1".to_owned(),
                    message: "simulated".to_owned(),
                });
            }
            std::fs::write(path, frames.len().to_string())?;
            self.passes.push((path.to_path_buf(), config.clone(), frames.len()));
            Ok(frames.len() as u64)
        }
    }

    fn request(width: u32, height: u32, fps: u32) -> CaptureConfig {
        CaptureConfig {
            width,
            height,
            fps,
            pixel_format: FourCC::YUYV,
            exposure: Exposure {
                mode: ExposureMode::Manual,
                value: Some(-8),
            },
        }
    }

    fn settings(dir: &Path, duration: Duration) -> EngineSettings {
        EngineSettings {
            duration,
            output_dir: dir.to_path_buf(),
            file_prefix: "Cam240".to_owned(),
            buffer_count: 4,
        }
    }

    fn run_engine(
        device: MockDevice,
        writer: RecordingWriter,
        req: &CaptureConfig,
        settings: EngineSettings,
        input: &str,
    ) -> (CaptureEngine<MockDevice, RecordingWriter>, Vec<StatusEvent>) {
        let mut engine = CaptureEngine::configure(device, req, writer, settings);
        let mut status = StatusWriter::new(Vec::new());
        engine
            .run(Cursor::new(input.to_owned()), &mut status)
            .expect("engine should run to completion");
        let text = String::from_utf8(status.into_inner()).expect("status is utf8");
        let events = text
            .lines()
            .map(|line| StatusEvent::parse(line).expect("engine emits only protocol lines"))
            .collect();
        (engine, events)
    }

    fn kinds(events: &[StatusEvent]) -> Vec<&'static str> {
        events.iter().map(StatusEvent::kind).collect()
    }

    #[test]
    fn test_announces_init_then_ready_and_exits_on_eof() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, events) = run_engine(
            MockDevice::new(),
            RecordingWriter::default(),
            &request(64, 48, 30),
            settings(dir.path(), Duration::from_millis(100)),
            "",
        );

        assert_eq!(kinds(&events), ["INIT", "READY"]);
        assert_eq!(engine.state(), EngineState::Terminated);
        assert_eq!(engine.device().close_calls(), 1);
    }

    #[test]
    fn test_record_writes_budgeted_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, events) = run_engine(
            MockDevice::new(),
            RecordingWriter::default(),
            &request(64, 48, 30),
            settings(dir.path(), Duration::from_secs(1)),
            "record\nquit\n",
        );

        assert_eq!(kinds(&events), ["INIT", "READY", "SAVING", "SAVED", "SUMMARY", "READY"]);
        assert_eq!(engine.writer().passes.len(), 1);
        assert_eq!(engine.writer().passes[0].2, 30);
        assert!(matches!(
            events[4],
            StatusEvent::Summary { frames: 30, dropped: 0, .. }
        ));
    }

    #[test]
    fn test_dropped_reads_do_not_abort_the_pass() {
        let dir = tempfile::tempdir().expect("tempdir");
        let device = MockDevice::new()
            .with_max_fps(240.0)
            .with_failing_reads([10, 500, 1199]);
        let (engine, events) = run_engine(
            device,
            RecordingWriter::default(),
            &request(64, 48, 240),
            settings(dir.path(), Duration::from_secs(5)),
            "record\n",
        );

        let dropped: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                StatusEvent::Dropped { index } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(dropped, [10, 500, 1199]);
        assert_eq!(engine.writer().passes[0].2, 1197);
        assert!(events.iter().any(|event| matches!(
            event,
            StatusEvent::Summary { frames: 1197, dropped: 3, .. }
        )));
    }

    #[test]
    fn test_encodes_with_negotiated_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let device = MockDevice::new().with_max_resolution(352, 288).with_max_fps(30.0);
        let (engine, events) = run_engine(
            device,
            RecordingWriter::default(),
            &request(640, 400, 240),
            settings(dir.path(), Duration::from_secs(1)),
            "record\n",
        );

        let (_, config, frames) = &engine.writer().passes[0];
        assert_eq!((config.width, config.height), (352, 288));
        assert!((config.fps - 30.0).abs() < f64::EPSILON);
        assert_eq!(*frames, 30);

        let saving = events.iter().position(|e| matches!(e, StatusEvent::Saving(_)));
        let saved = events.iter().position(|e| matches!(e, StatusEvent::Saved(_)));
        assert!(saving.is_some());
        assert!(saving < saved);
    }

    #[test]
    fn test_failed_stream_reports_every_read_as_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, events) = run_engine(
            MockDevice::new().with_failing_streams(),
            RecordingWriter::default(),
            &request(64, 48, 30),
            settings(dir.path(), Duration::from_millis(100)),
            "record\n",
        );

        assert_eq!(
            kinds(&events),
            ["INIT", "READY", "DROPPED", "DROPPED", "DROPPED", "EMPTY", "SUMMARY", "READY"]
        );
        assert!(events.iter().any(|event| matches!(
            event,
            StatusEvent::Summary { frames: 0, dropped: 3, .. }
        )));
        assert!(engine.writer().passes.is_empty());
        assert_eq!(engine.state(), EngineState::Terminated);
    }

    #[test]
    fn test_empty_pass_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, events) = run_engine(
            MockDevice::new(),
            RecordingWriter::default(),
            &request(64, 48, 30),
            settings(dir.path(), Duration::from_millis(10)),
            "record\n",
        );

        assert_eq!(kinds(&events), ["INIT", "READY", "EMPTY", "SUMMARY", "READY"]);
        assert!(engine.writer().passes.is_empty());
    }

    #[test]
    fn test_save_failure_is_reported_and_engine_stays_ready() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = RecordingWriter {
            fail: true,
            ..RecordingWriter::default()
        };
        let (engine, events) = run_engine(
            MockDevice::new(),
            writer,
            &request(64, 48, 30),
            settings(dir.path(), Duration::from_millis(100)),
            "record\nrecord\nq\n",
        );

        assert_eq!(
            kinds(&events),
            ["INIT", "READY", "SAVING", "SAVE_FAILED", "SUMMARY", "READY", "SAVING", "SAVE_FAILED", "SUMMARY", "READY"]
        );
        assert_eq!(engine.passes(), 2);
    }

    #[test]
    fn test_repeated_records_use_fresh_streams_and_distinct_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, events) = run_engine(
            MockDevice::new(),
            RecordingWriter::default(),
            &request(64, 48, 30),
            settings(dir.path(), Duration::from_millis(100)),
            "record\n\nrecord\nrecord\n",
        );

        let passes = &engine.writer().passes;
        assert_eq!(passes.len(), 3);
        assert_ne!(passes[0].0, passes[1].0);
        assert_ne!(passes[1].0, passes[2].0);
        assert_eq!(engine.device().streams_created(), 3);
        assert_eq!(events.iter().filter(|e| **e == StatusEvent::Ready).count(), 4);
    }

    #[test]
    fn test_unknown_tokens_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (engine, events) = run_engine(
            MockDevice::new(),
            RecordingWriter::default(),
            &request(64, 48, 30),
            settings(dir.path(), Duration::from_millis(100)),
            "snapshot\nhelp\nquit\nrecord\n",
        );

        assert_eq!(kinds(&events), ["INIT", "READY"]);
        assert_eq!(engine.passes(), 0);
        assert_eq!(engine.device().streams_created(), 0);
    }

    #[test]
    fn test_init_reports_negotiated_parameters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let device = MockDevice::new().with_max_resolution(352, 288).with_max_fps(30.0);
        let (_, events) = run_engine(
            device,
            RecordingWriter::default(),
            &request(640, 400, 240),
            settings(dir.path(), Duration::from_secs(1)),
            "",
        );

        let StatusEvent::Init(config) = &events[0] else {
            unreachable!("first event is INIT");
        };
        assert_eq!((config.width, config.height), (352, 288));
        assert_eq!(config.exposure.mode, ExposureMode::Manual);
    }

    #[test]
    fn test_output_path_never_collides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = output_path(dir.path(), "Cam240");
        std::fs::write(&first, b"x").expect("write");
        let second = output_path(dir.path(), "Cam240");

        assert_ne!(first, second);
        let name = first.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("Cam240_"));
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn test_exit_codes_per_failure() {
        assert_eq!(
            EngineError::CameraUnavailable(CameraError::DeviceOpenFailed("/dev/video0".to_owned())).exit_code(),
            ExitCode::CameraUnavailable
        );
        assert_eq!(
            EngineError::StatusChannel(io::Error::from(io::ErrorKind::BrokenPipe)).exit_code(),
            ExitCode::StatusChannelBroken
        );
    }
}
