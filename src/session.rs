//! Session state machine, driven by engine status events.
//!
//! ```text
//! IDLE -> ENGINE_STARTING -> ENGINE_READY -> TRIGGERING -> CAPTURE_IN_PROGRESS
//!                                 ^                               |
//!                                 +-------- CAPTURE_DONE <--------+
//!
//! any state -> ENGINE_STOPPED
//! ```
//!
//! [`SessionRecord`] holds no process handles, so every transition can be
//! exercised without spawning anything.

use crate::negotiation::NegotiatedConfig;
use crate::protocol::StatusEvent;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Controller-side session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No engine process.
    Idle,
    /// Engine spawned, readiness not yet seen.
    EngineStarting,
    /// Engine accepts a capture command.
    EngineReady,
    /// Actuator dispatched, capture command being written.
    Triggering,
    /// Capture command delivered, waiting for the engine's result.
    CaptureInProgress,
    /// Engine reported the pass result.
    CaptureDone,
    /// Engine process is gone.
    EngineStopped,
}

impl SessionState {
    /// The coarse status shown to the operator.
    #[must_use]
    pub const fn operator_status(self) -> OperatorStatus {
        match self {
            Self::EngineReady => OperatorStatus::Ready,
            Self::Triggering | Self::CaptureInProgress | Self::CaptureDone => OperatorStatus::InProgress,
            Self::EngineStopped => OperatorStatus::Stopped,
            Self::Idle | Self::EngineStarting => OperatorStatus::NotReady,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::EngineStarting => "ENGINE_STARTING",
            Self::EngineReady => "ENGINE_READY",
            Self::Triggering => "TRIGGERING",
            Self::CaptureInProgress => "CAPTURE_IN_PROGRESS",
            Self::CaptureDone => "CAPTURE_DONE",
            Self::EngineStopped => "ENGINE_STOPPED",
        };
        f.write_str(name)
    }
}

/// What the operator surface shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorStatus {
    /// A capture can be started.
    Ready,
    /// Engine not available yet.
    NotReady,
    /// A capture is running.
    InProgress,
    /// Engine stopped.
    Stopped,
}

impl fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::NotReady => "not ready",
            Self::InProgress => "in progress",
            Self::Stopped => "stopped",
        })
    }
}

/// Statistics of the last pass as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassReport {
    /// Frames captured.
    pub frames: u64,
    /// Failed reads.
    pub dropped: u64,
    /// Acquisition loop duration in seconds.
    pub elapsed: f64,
    /// Achieved frames per second.
    pub fps: f64,
}

/// Follow-up the controller must perform after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    /// Nothing to do.
    None,
    /// A finished file is waiting to be handed off.
    HandOff(PathBuf),
}

/// Session state without process handles.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    state: SessionState,
    negotiated: Option<NegotiatedConfig>,
    pending_output: Option<PathBuf>,
    last_output: Option<PathBuf>,
    last_handed_off: Option<PathBuf>,
    pass_handoff: Option<PathBuf>,
    dropped_in_pass: u64,
    last_report: Option<PassReport>,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            negotiated: None,
            pending_output: None,
            last_output: None,
            last_handed_off: None,
            pass_handoff: None,
            dropped_in_pass: 0,
            last_report: None,
        }
    }
}

impl SessionRecord {
    /// Record for a freshly spawned engine.
    #[must_use]
    pub fn starting() -> Self {
        let mut record = Self::default();
        record.transition(SessionState::EngineStarting);
        record
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Parameters the engine negotiated, once announced.
    #[must_use]
    pub const fn negotiated(&self) -> Option<&NegotiatedConfig> {
        self.negotiated.as_ref()
    }

    /// Engine path announced for the pass being written.
    #[must_use]
    pub fn pending_output(&self) -> Option<&Path> {
        self.pending_output.as_deref()
    }

    /// Most recent completed engine output.
    #[must_use]
    pub fn last_output(&self) -> Option<&Path> {
        self.last_output.as_deref()
    }

    /// Hand-off destination of the current or last pass.
    #[must_use]
    pub fn pass_handoff(&self) -> Option<&Path> {
        self.pass_handoff.as_deref()
    }

    /// Failed reads reported during the current pass.
    #[must_use]
    pub const fn dropped_in_pass(&self) -> u64 {
        self.dropped_in_pass
    }

    /// Statistics of the last pass.
    #[must_use]
    pub const fn last_report(&self) -> Option<PassReport> {
        self.last_report
    }

    /// Move to `next`, logging the transition. Returns the previous state.
    pub fn transition(&mut self, next: SessionState) -> SessionState {
        let previous = self.state;
        if previous != next {
            info!(from = %previous, to = %next, "session state");
            self.state = next;
        }
        previous
    }

    /// Reset per-pass bookkeeping when a capture command goes out.
    pub fn begin_pass(&mut self) {
        self.pending_output = None;
        self.pass_handoff = None;
        self.dropped_in_pass = 0;
    }

    /// Remember that `source` was relocated to `destination`.
    pub fn mark_handed_off(&mut self, source: &Path, destination: &Path) {
        self.last_handed_off = Some(source.to_path_buf());
        self.pass_handoff = Some(destination.to_path_buf());
    }

    /// Fold one engine status event into the record.
    pub fn apply(&mut self, event: &StatusEvent) -> Followup {
        if self.state == SessionState::EngineStopped {
            debug!(kind = event.kind(), "status after stop ignored");
            return Followup::None;
        }

        match event {
            StatusEvent::Init(config) => {
                info!(
                    "engine negotiated {}x{} @ {:.2} fps {}",
                    config.width, config.height, config.fps, config.fourcc
                );
                self.negotiated = Some(config.clone());
            }
            StatusEvent::Ready => {
                self.transition(SessionState::EngineReady);
            }
            StatusEvent::Dropped { index } => {
                self.dropped_in_pass += 1;
                debug!(index, "engine dropped a frame");
            }
            StatusEvent::Saving(path) => {
                debug!(path = %path.display(), "engine saving");
                self.pending_output = Some(path.clone());
                if self.state != SessionState::CaptureInProgress {
                    self.transition(SessionState::CaptureInProgress);
                }
            }
            StatusEvent::Saved(path) => {
                self.transition(SessionState::CaptureDone);
                self.pending_output = None;
                self.last_output = Some(path.clone());
                if self.last_handed_off.as_deref() == Some(path.as_path()) {
                    warn!(path = %path.display(), "duplicate save report ignored");
                } else {
                    return Followup::HandOff(path.clone());
                }
            }
            StatusEvent::Empty => {
                warn!("engine captured nothing");
                self.transition(SessionState::CaptureDone);
            }
            StatusEvent::SaveFailed(reason) => {
                error!("engine failed to save: {reason}");
                self.pending_output = None;
                self.transition(SessionState::CaptureDone);
            }
            StatusEvent::Summary {
                frames,
                dropped,
                elapsed,
                fps,
            } => {
                info!(frames, dropped, "pass took {elapsed:.3}s at {fps:.2} fps");
                self.last_report = Some(PassReport {
                    frames: *frames,
                    dropped: *dropped,
                    elapsed: *elapsed,
                    fps: *fps,
                });
            }
        }
        Followup::None
    }
}
