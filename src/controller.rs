//! Session controller: supervises one capture engine process.
//!
//! The controller is the only writer of session state. A reader task parses
//! the engine's stdout and forwards status events over a channel; the owner
//! of the controller pulls them with [`SessionController::recv_message`] and
//! folds them in with [`SessionController::apply`], so ordering on the wire is
//! the ordering applied.

use crate::actuator::{ActuatorError, DeviceBridge};
use crate::exit_codes::ExitCode;
use crate::naming::{NamingError, NamingSequence};
use crate::negotiation::NegotiatedConfig;
use crate::protocol::{ProtocolError, StatusEvent, QUIT_TOKEN, RECORD_TOKEN};
use crate::session::{Followup, OperatorStatus, SessionRecord, SessionState};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long to wait for the stdout reader after the engine is gone.
const READER_DRAIN: Duration = Duration::from_secs(1);

/// Error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An engine is already running.
    #[error("Engine already running ({0})")]
    AlreadyRunning(SessionState),
    /// The operation needs a ready engine.
    #[error("Engine not ready ({0})")]
    NotReady(SessionState),
    /// The engine process could not be started.
    #[error("Failed to start engine {program}: {source}")]
    Spawn {
        /// Engine binary.
        program: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// No readiness announcement within the bound. The engine may still
    /// become ready; it is not reaped.
    #[error("Engine not ready after {0:?}")]
    ReadinessTimeout(Duration),
    /// No pass result within the bound.
    #[error("No capture result after {0:?}")]
    CaptureTimeout(Duration),
    /// The engine process went away.
    #[error("Engine exited ({})", describe_exit(*.0))]
    EngineExited(Option<ExitStatus>),
    /// Writing to the engine failed; treated as engine death.
    #[error("Engine command channel broken: {0}")]
    ChannelBroken(#[source] std::io::Error),
    /// A finished recording could not be relocated.
    #[error("Hand-off of {source_path} to {destination} failed: {reason}")]
    Handoff {
        /// Engine output.
        source_path: PathBuf,
        /// Intended destination.
        destination: PathBuf,
        /// What went wrong.
        reason: String,
    },
    /// Naming sequence error.
    #[error(transparent)]
    Naming(#[from] NamingError),
    /// Device bridge error.
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    match status {
        None => "status unknown".to_owned(),
        Some(status) => match status.code().and_then(ExitCode::from_i32) {
            Some(code) => format!("{status}: {code}"),
            None => status.to_string(),
        },
    }
}

/// Notifications for the operator surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session state changed.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
    /// A recording was relocated into the hand-off directory.
    HandedOff {
        /// Engine output path.
        source: PathBuf,
        /// Hand-off path.
        destination: PathBuf,
    },
    /// Files were retrieved from the device.
    Retrieved(PathBuf),
    /// The naming sequence moved on; persist it.
    SequenceAdvanced(NamingSequence),
    /// The external action failed.
    ActionFailed(String),
}

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Engine binary.
    pub engine_program: PathBuf,
    /// Engine arguments.
    pub engine_args: Vec<String>,
    /// Readiness watchdog bound.
    pub ready_timeout: Duration,
    /// Wait per stop escalation step.
    pub stop_grace: Duration,
    /// Configured pass length; extends the first stop step mid-capture.
    pub capture_duration: Duration,
    /// Extra time allowed for a pass to be written before its result is due.
    pub save_timeout: Duration,
    /// Hand-off directory.
    pub handoff_dir: PathBuf,
    /// Directory on the device holding payload files.
    pub remote_payload_dir: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            engine_program: PathBuf::from("cam-sync-engine"),
            engine_args: Vec::new(),
            ready_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(5),
            capture_duration: Duration::from_secs(5),
            save_timeout: Duration::from_secs(30),
            handoff_dir: PathBuf::from("handoff"),
            remote_payload_dir: "/sdcard/Download/MagicMirror/".to_owned(),
        }
    }
}

/// Output of the stdout reader task.
#[derive(Debug)]
pub enum EngineMessage {
    /// One status line.
    Status(StatusEvent),
    /// The engine closed its stdout.
    OutputClosed,
}

/// Result of a synchronized trigger.
#[derive(Debug)]
pub struct TriggerReport {
    /// Time from dispatching the action to flushing the capture command.
    pub skew: Duration,
    /// The in-flight action.
    pub action: JoinHandle<Result<(), ActuatorError>>,
}

/// Escalation steps of the stop sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopStep {
    Quit,
    Terminate,
    Kill,
}

impl StopStep {
    const ALL: [Self; 3] = [Self::Quit, Self::Terminate, Self::Kill];

    const fn name(self) -> &'static str {
        match self {
            Self::Quit => "quit token",
            Self::Terminate => "terminate signal",
            Self::Kill => "kill",
        }
    }
}

/// A running engine and what is known about it.
struct Session {
    child: Child,
    stdin: Option<ChildStdin>,
    messages: mpsc::UnboundedReceiver<EngineMessage>,
    reader: JoinHandle<()>,
    stderr: Option<JoinHandle<()>>,
    record: SessionRecord,
}

/// Session controller.
pub struct SessionController<B: DeviceBridge + 'static> {
    bridge: Arc<B>,
    settings: ControllerSettings,
    naming: NamingSequence,
    session: Option<Session>,
    last_state: SessionState,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl<B: DeviceBridge + 'static> SessionController<B> {
    /// Create a controller. No engine is started.
    pub fn new(bridge: Arc<B>, settings: ControllerSettings, naming: NamingSequence) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            bridge,
            settings,
            naming,
            session: None,
            last_state: SessionState::Idle,
            event_tx,
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn broadcast(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(self.last_state, |session| session.record.state())
    }

    /// Coarse status for the operator.
    pub fn status(&self) -> OperatorStatus {
        self.state().operator_status()
    }

    /// Naming triple for the next hand-off.
    pub const fn naming(&self) -> &NamingSequence {
        &self.naming
    }

    /// The device bridge.
    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    /// Parameters the running engine negotiated.
    pub fn negotiated(&self) -> Option<&NegotiatedConfig> {
        self.session.as_ref().and_then(|s| s.record.negotiated())
    }

    /// Session record of the running engine.
    pub fn record(&self) -> Option<&SessionRecord> {
        self.session.as_ref().map(|s| &s.record)
    }

    /// Process id of the running engine.
    pub fn engine_pid(&self) -> Option<u32> {
        self.session.as_ref().and_then(|s| s.child.id())
    }

    fn set_state(&mut self, next: SessionState) {
        let from = match self.session.as_mut() {
            Some(session) => session.record.transition(next),
            None => {
                let from = self.last_state;
                if from != next {
                    info!(%from, to = %next, "session state");
                }
                from
            }
        };
        self.last_state = next;
        if from != next {
            self.broadcast(SessionEvent::StateChanged { from, to: next });
        }
    }

    /// Spawn the engine and wait for its readiness announcement.
    pub async fn start_engine(&mut self) -> Result<(), SessionError> {
        if let Some(session) = &self.session {
            return Err(SessionError::AlreadyRunning(session.record.state()));
        }

        info!(program = %self.settings.engine_program.display(), "starting engine");
        let mut child = Command::new(&self.settings.engine_program)
            .args(&self.settings.engine_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: self.settings.engine_program.clone(),
                source,
            })?;

        let (tx, messages) = mpsc::unbounded_channel();
        let reader = child.stdout.take().map_or_else(
            || tokio::spawn(async {}),
            |stdout| tokio::spawn(read_status(stdout, tx)),
        );
        let stderr = child.stderr.take().map(|stderr| tokio::spawn(forward_stderr(stderr)));
        let stdin = child.stdin.take();

        self.session = Some(Session {
            child,
            stdin,
            messages,
            reader,
            stderr,
            record: SessionRecord::default(),
        });
        self.set_state(SessionState::EngineStarting);

        self.wait_ready(self.settings.ready_timeout).await
    }

    /// Apply engine messages until the engine is ready or `timeout` passes.
    ///
    /// A timeout leaves the engine running; it may still become ready, and
    /// [`stop`](Self::stop) reaps it.
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<(), SessionError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.state() {
                SessionState::EngineReady => return Ok(()),
                SessionState::Idle | SessionState::EngineStopped => {
                    return Err(SessionError::EngineExited(None));
                }
                _ => {}
            }
            match tokio::time::timeout_at(deadline, self.recv_message()).await {
                Ok(Some(message)) => self.apply(message).await?,
                Ok(None) => return Err(SessionError::EngineExited(None)),
                Err(_) => {
                    warn!(?timeout, state = %self.state(), "engine readiness watchdog fired");
                    return Err(SessionError::ReadinessTimeout(timeout));
                }
            }
        }
    }

    /// Next message from the engine. Cancel-safe; `None` without an engine.
    pub async fn recv_message(&mut self) -> Option<EngineMessage> {
        match self.session.as_mut() {
            Some(session) => session.messages.recv().await,
            None => None,
        }
    }

    /// Fold one engine message into the session.
    pub async fn apply(&mut self, message: EngineMessage) -> Result<(), SessionError> {
        match message {
            EngineMessage::Status(event) => {
                let Some(session) = self.session.as_mut() else {
                    return Ok(());
                };
                let before = session.record.state();
                let followup = session.record.apply(&event);
                let after = session.record.state();
                self.last_state = after;
                if before != after {
                    self.broadcast(SessionEvent::StateChanged { from: before, to: after });
                }
                match followup {
                    Followup::HandOff(path) => self.hand_off(&path).await.map(|_| ()),
                    Followup::None => Ok(()),
                }
            }
            EngineMessage::OutputClosed => {
                warn!("engine closed its output");
                let status = self.stop().await?;
                Err(SessionError::EngineExited(status))
            }
        }
    }

    /// Fire the external action and the capture command back to back.
    ///
    /// Rejected without side effects unless the engine is ready. The action is
    /// not awaited; its failure is logged and broadcast but does not affect
    /// the capture. A broken command channel stops the engine.
    pub async fn trigger(&mut self) -> Result<TriggerReport, SessionError> {
        let state = self.state();
        if state != SessionState::EngineReady {
            warn!(%state, "trigger rejected");
            return Err(SessionError::NotReady(state));
        }

        self.set_state(SessionState::Triggering);
        if let Some(session) = self.session.as_mut() {
            session.record.begin_pass();
        }

        let bridge = Arc::clone(&self.bridge);
        let events = self.event_tx.clone();
        let dispatched = Instant::now();
        let action = tokio::spawn(async move {
            let result = bridge.send_action().await;
            match &result {
                Ok(()) => debug!(after = ?dispatched.elapsed(), "action delivered"),
                Err(err) => {
                    error!("action failed: {err}");
                    let _ = events.send(SessionEvent::ActionFailed(err.to_string()));
                }
            }
            result
        });

        if let Err(err) = self.write_command(RECORD_TOKEN).await {
            error!("capture command not delivered: {err}");
            self.stop().await?;
            return Err(SessionError::ChannelBroken(err));
        }
        let skew = dispatched.elapsed();

        self.set_state(SessionState::CaptureInProgress);
        info!(?skew, "trigger issued");
        Ok(TriggerReport { skew, action })
    }

    async fn write_command(&mut self, token: &str) -> std::io::Result<()> {
        let stdin = self
            .session
            .as_mut()
            .and_then(|session| session.stdin.as_mut())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "engine stdin closed"))?;
        stdin.write_all(format!("{token}\n").as_bytes()).await?;
        stdin.flush().await
    }

    /// Apply engine messages until the pass triggered last has finished and
    /// the engine is ready again. Returns the hand-off path, if any.
    pub async fn wait_capture(&mut self, timeout: Duration) -> Result<Option<PathBuf>, SessionError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut finished = false;
        loop {
            match self.state() {
                SessionState::CaptureDone => finished = true,
                SessionState::EngineReady if finished => {
                    return Ok(self.record().and_then(|r| r.pass_handoff()).map(Path::to_path_buf));
                }
                SessionState::EngineReady => return Err(SessionError::NotReady(SessionState::EngineReady)),
                SessionState::Idle | SessionState::EngineStopped => {
                    return Err(SessionError::EngineExited(None));
                }
                SessionState::EngineStarting | SessionState::Triggering | SessionState::CaptureInProgress => {}
            }
            match tokio::time::timeout_at(deadline, self.recv_message()).await {
                Ok(Some(message)) => self.apply(message).await?,
                Ok(None) => return Err(SessionError::EngineExited(None)),
                Err(_) => return Err(SessionError::CaptureTimeout(timeout)),
            }
        }
    }

    /// Upper bound for one pass to be captured and written.
    pub fn capture_timeout(&self) -> Duration {
        self.settings.capture_duration + self.settings.save_timeout
    }

    /// Trigger one capture and wait for its result.
    pub async fn capture_once(&mut self) -> Result<Option<PathBuf>, SessionError> {
        let report = self.trigger().await?;
        let handed_off = self.wait_capture(self.capture_timeout()).await?;
        match report.action.await {
            Ok(Err(err)) => warn!("capture finished but the action failed: {err}"),
            Err(err) => warn!("action task failed: {err}"),
            Ok(Ok(())) => {}
        }
        Ok(handed_off)
    }

    /// Ask the engine to quit and close its input. No-op once closed.
    pub async fn send_quit(&mut self) {
        let Some(mut stdin) = self.session.as_mut().and_then(|s| s.stdin.take()) else {
            debug!("engine input already closed");
            return;
        };
        let sent = async {
            stdin.write_all(format!("{QUIT_TOKEN}\n").as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(err) = sent {
            debug!("quit token not delivered: {err}");
        }
    }

    /// Stop the engine, escalating from quit token to terminate to kill.
    ///
    /// Idempotent. Status lines still in flight are applied before the session
    /// is closed, so a pass that finishes during shutdown is still handed off.
    pub async fn stop(&mut self) -> Result<Option<ExitStatus>, SessionError> {
        if self.session.is_none() {
            debug!("no engine to stop");
            return Ok(None);
        }

        let mut first_grace = self.settings.stop_grace;
        if self.state() == SessionState::CaptureInProgress {
            first_grace += self.settings.capture_duration;
        }

        let mut exit = None;
        for step in StopStep::ALL {
            let grace = if step == StopStep::Quit { first_grace } else { self.settings.stop_grace };
            match step {
                StopStep::Quit => self.send_quit().await,
                StopStep::Terminate => self.terminate(),
                StopStep::Kill => {
                    if let Some(session) = self.session.as_mut() {
                        if let Err(err) = session.child.start_kill() {
                            error!("kill failed: {err}");
                        }
                    }
                }
            }
            info!(step = step.name(), ?grace, "stopping engine");

            let Some(session) = self.session.as_mut() else { break };
            match tokio::time::timeout(grace, session.child.wait()).await {
                Ok(Ok(status)) => {
                    info!(%status, "engine exited");
                    exit = Some(status);
                    break;
                }
                Ok(Err(err)) => {
                    error!("waiting for engine failed: {err}");
                    break;
                }
                Err(_) => warn!(step = step.name(), "engine still running after {grace:?}"),
            }
        }
        if exit.is_none() {
            error!("engine did not confirm exit; leaving it to the OS");
        }

        self.drain_messages().await;
        if let Some(session) = self.session.take() {
            if let Some(stderr) = session.stderr {
                stderr.abort();
            }
            self.last_state = session.record.state();
        }
        self.set_state(SessionState::EngineStopped);
        Ok(exit)
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        let Some(pid) = self.engine_pid() else { return };
        let Ok(pid) = libc::pid_t::try_from(pid) else { return };
        #[allow(unsafe_code)]
        // SAFETY: plain kill(2) on a pid we spawned and have not reaped.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            error!("terminate failed: {}", std::io::Error::last_os_error());
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if let Err(err) = session.child.start_kill() {
                error!("terminate failed: {err}");
            }
        }
    }

    /// Apply whatever the reader forwarded before the engine went away.
    async fn drain_messages(&mut self) {
        let reader_done = match self.session.as_mut() {
            Some(session) => tokio::time::timeout(READER_DRAIN, &mut session.reader).await.is_ok(),
            None => return,
        };
        if !reader_done {
            warn!("engine output still open after exit");
            if let Some(session) = self.session.as_mut() {
                session.reader.abort();
            }
        }

        loop {
            let message = match self.session.as_mut().map(|s| s.messages.try_recv()) {
                Some(Ok(message)) => message,
                _ => break,
            };
            if let EngineMessage::Status(event) = message {
                let Some(session) = self.session.as_mut() else { break };
                if let Followup::HandOff(path) = session.record.apply(&event) {
                    if let Err(err) = self.hand_off(&path).await {
                        error!("{err}");
                    }
                }
            }
        }
    }

    /// Relocate a finished recording under the next sequence name.
    async fn hand_off(&mut self, source: &Path) -> Result<PathBuf, SessionError> {
        if !self.naming.can_advance() {
            return Err(NamingError::Exhausted(self.naming.sequence).into());
        }
        let ext = source.extension().and_then(OsStr::to_str).unwrap_or("mp4");
        let destination = self.settings.handoff_dir.join(self.naming.file_name(ext));
        let failed = |reason: String| SessionError::Handoff {
            source_path: source.to_path_buf(),
            destination: destination.clone(),
            reason,
        };

        if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            return Err(failed("destination exists".to_owned()));
        }
        tokio::fs::create_dir_all(&self.settings.handoff_dir)
            .await
            .map_err(|err| failed(err.to_string()))?;
        relocate(source, &destination).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                failed("destination exists".to_owned())
            } else {
                failed(err.to_string())
            }
        })?;

        if let Some(session) = self.session.as_mut() {
            session.record.mark_handed_off(source, &destination);
        }
        self.naming.advance()?;
        info!(
            source = %source.display(),
            destination = %destination.display(),
            next = self.naming.sequence,
            "recording handed off"
        );
        self.broadcast(SessionEvent::HandedOff {
            source: source.to_path_buf(),
            destination: destination.clone(),
        });
        self.broadcast(SessionEvent::SequenceAdvanced(self.naming.clone()));
        Ok(destination)
    }

    /// Pull the payload directory from the device into the hand-off area.
    ///
    /// Advances the naming sequence once on success; on failure the sequence
    /// is untouched and the empty target directory is removed.
    pub async fn retrieve_payload(&mut self) -> Result<PathBuf, SessionError> {
        if !self.naming.can_advance() {
            return Err(NamingError::Exhausted(self.naming.sequence).into());
        }
        let remote = self.settings.remote_payload_dir.clone();
        let target = self.settings.handoff_dir.join(self.naming.stem());
        tokio::fs::create_dir_all(&target).await?;

        let pulled = async {
            let entries = self.bridge.list_remote(&remote).await?;
            info!(count = entries.len(), %remote, "payload files on device");
            for entry in &entries {
                debug!("  {entry}");
            }
            self.bridge.pull(&remote, &target).await
        }
        .await;

        if let Err(err) = pulled {
            if let Err(cleanup) = tokio::fs::remove_dir(&target).await {
                debug!("target directory kept: {cleanup}");
            }
            error!("payload retrieval failed: {err}");
            return Err(err.into());
        }

        self.naming.advance()?;
        info!(target = %target.display(), next = self.naming.sequence, "payload retrieved");
        self.broadcast(SessionEvent::Retrieved(target.clone()));
        self.broadcast(SessionEvent::SequenceAdvanced(self.naming.clone()));
        Ok(target)
    }
}

/// Move `source` to `destination` without ever replacing an existing file.
///
/// Same filesystem: hard link, then unlink the source. Otherwise the file is
/// copied to a staging name next to `destination` and linked into place, so
/// `destination` only ever holds a complete recording. Once `destination`
/// exists, a source that cannot be removed is logged and left behind.
async fn relocate(source: &Path, destination: &Path) -> std::io::Result<()> {
    match tokio::fs::hard_link(source, destination).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Err(err),
        Err(err) => {
            debug!("link failed ({err}), copying instead");
            copy_into_place(source, destination).await?;
        }
    }
    if let Err(err) = tokio::fs::remove_file(source).await {
        warn!(source = %source.display(), "recording handed off but not removed: {err}");
    }
    Ok(())
}

/// Staging name for a copy in progress, hidden next to `destination`.
fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map_or_else(|| "handoff".into(), |name| name.to_string_lossy());
    destination.with_file_name(format!(".{name}.partial"))
}

/// Copy `source` to a staging file and commit it as `destination`.
async fn copy_into_place(source: &Path, destination: &Path) -> std::io::Result<()> {
    let staging = staging_path(destination);
    let committed: std::io::Result<()> = async {
        tokio::fs::copy(source, &staging).await?;
        commit(&staging, destination).await
    }
    .await;
    if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
        if cleanup.kind() != std::io::ErrorKind::NotFound {
            warn!(staging = %staging.display(), "staging file left behind: {cleanup}");
        }
    }
    committed
}

/// Link `staging` in as `destination`; refuses to replace an existing file.
async fn commit(staging: &Path, destination: &Path) -> std::io::Result<()> {
    match tokio::fs::hard_link(staging, destination).await {
        Err(err) if err.kind() != std::io::ErrorKind::AlreadyExists => {
            // No hard links on this filesystem.
            debug!("link failed ({err}), renaming instead");
            if tokio::fs::try_exists(destination).await? {
                return Err(std::io::ErrorKind::AlreadyExists.into());
            }
            tokio::fs::rename(staging, destination).await
        }
        result => result,
    }
}

/// Forward every tagged stdout line; report end of output once.
async fn read_status(stdout: tokio::process::ChildStdout, tx: mpsc::UnboundedSender<EngineMessage>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match StatusEvent::parse(&line) {
                Ok(event) => {
                    if tx.send(EngineMessage::Status(event)).is_err() {
                        return;
                    }
                }
                Err(ProtocolError::Untagged) => debug!(target: "cam_sync::engine", "{line}"),
                Err(err) => warn!("ignoring engine line {line:?}: {err}"),
            },
            Ok(None) => break,
            Err(err) => {
                warn!("engine output unreadable: {err}");
                break;
            }
        }
    }
    let _ = tx.send(EngineMessage::OutputClosed);
}

/// Re-log the engine's own log output.
async fn forward_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "cam_sync::engine", "{line}");
    }
}
