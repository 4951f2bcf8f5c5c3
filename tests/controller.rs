//! Session controller tests against `sh` scripts standing in for the engine.

#![cfg(unix)]

use cam_sync::actuator::{ActuatorError, BridgeDevice, DeviceBridge};
use cam_sync::controller::{ControllerSettings, SessionController, SessionError, SessionEvent};
use cam_sync::naming::NamingSequence;
use cam_sync::session::{OperatorStatus, SessionState};
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Announces readiness, then answers every `record` with a saved file in `$1`.
/// `$2` is an optional delay between SAVING and SAVED.
const FAKE_ENGINE: &str = r#"
out="$1"
echo 'fake engine starting'
echo 'CAMSYNC/1 INIT width=352 height=288 fps=30 fourcc=YUYV exposure=manual exposure_value=-8'
echo 'CAMSYNC/1 READY'
n=0
while read -r cmd; do
  case "$cmd" in
    record)
      n=$((n + 1))
      f="$out/Cam240_$n.mp4"
      echo 'CAMSYNC/1 DROPPED index=7'
      echo "CAMSYNC/1 SAVING $f"
      sleep "${2:-0}"
      printf 'pass %s' "$n" > "$f"
      echo "CAMSYNC/1 SAVED $f"
      echo 'CAMSYNC/1 SUMMARY frames=149 dropped=1 elapsed=5.000 fps=29.80'
      echo 'CAMSYNC/1 READY'
      ;;
    quit) exit 0 ;;
  esac
done
"#;

/// Ready, but its command input is closed.
const DEAF_ENGINE: &str = r"
exec 0<&-
echo 'CAMSYNC/1 INIT width=352 height=288 fps=30 fourcc=YUYV exposure=manual exposure_value=-8'
echo 'CAMSYNC/1 READY'
exec sleep 5
";

#[derive(Default)]
struct FakeBridge {
    actions: AtomicU32,
    pulls: AtomicU32,
    fail_pull: bool,
    fail_action: bool,
    /// Hang this long in `send_action`, then report a timeout.
    action_delay: Duration,
}

impl DeviceBridge for FakeBridge {
    async fn probe(&self) -> Result<String, ActuatorError> {
        Ok("fake bridge".to_owned())
    }

    async fn send_action(&self) -> Result<(), ActuatorError> {
        self.actions.fetch_add(1, Ordering::SeqCst);
        if !self.action_delay.is_zero() {
            tokio::time::sleep(self.action_delay).await;
            return Err(ActuatorError::Timeout {
                command: "adb shell input text s".to_owned(),
                after: self.action_delay,
            });
        }
        if self.fail_action {
            return Err(ActuatorError::Failed {
                command: "adb shell input text s".to_owned(),
                status: "exit status: 1".to_owned(),
                stderr: "error: no devices/emulators found".to_owned(),
            });
        }
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<BridgeDevice>, ActuatorError> {
        Ok(Vec::new())
    }

    async fn connect(&self, address: &str) -> Result<String, ActuatorError> {
        Ok(format!("connected to {address}"))
    }

    async fn disconnect(&self, _address: Option<&str>) -> Result<(), ActuatorError> {
        Ok(())
    }

    async fn list_remote(&self, _remote: &str) -> Result<Vec<String>, ActuatorError> {
        Ok(vec!["result.json".to_owned()])
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<(), ActuatorError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pull {
            return Err(ActuatorError::Failed {
                command: format!("adb pull {remote}"),
                status: "exit status: 1".to_owned(),
                stderr: "device offline".to_owned(),
            });
        }
        fs::write(local.join("result.json"), "{}")?;
        Ok(())
    }
}

fn settings(root: &Path, script: &str, args: &[&str]) -> ControllerSettings {
    let mut engine_args = vec!["-c".to_owned(), script.to_owned(), "fake-engine".to_owned()];
    engine_args.extend(args.iter().map(|arg| (*arg).to_owned()));
    ControllerSettings {
        engine_program: PathBuf::from("/bin/sh"),
        engine_args,
        ready_timeout: Duration::from_secs(5),
        stop_grace: Duration::from_millis(300),
        capture_duration: Duration::from_millis(100),
        save_timeout: Duration::from_secs(5),
        handoff_dir: root.join("handoff"),
        remote_payload_dir: "/sdcard/Download/MagicMirror/".to_owned(),
    }
}

/// Settings running [`FAKE_ENGINE`] with output in `<root>/videos`.
fn fake_settings(root: &Path, delay: &str) -> ControllerSettings {
    let videos = root.join("videos");
    fs::create_dir_all(&videos).expect("videos dir");
    let videos = videos.to_str().expect("utf-8 temp path").to_owned();
    settings(root, FAKE_ENGINE, &[&videos, delay])
}

fn fake_controller(root: &Path, delay: &str) -> SessionController<FakeBridge> {
    SessionController::new(
        Arc::new(FakeBridge::default()),
        fake_settings(root, delay),
        NamingSequence::default(),
    )
}

fn action_failures(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, SessionEvent::ActionFailed(_)))
        .count()
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

#[tokio::test]
async fn test_captures_are_handed_off_in_sequence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut controller = fake_controller(dir.path(), "0");
    let mut events = controller.subscribe();

    controller.start_engine().await.expect("engine ready");
    assert_eq!(controller.status(), OperatorStatus::Ready);
    assert_eq!(controller.negotiated().map(|c| (c.width, c.height)), Some((352, 288)));

    let mut handed_off = Vec::new();
    for _ in 0..3 {
        let path = controller.capture_once().await.expect("capture");
        handed_off.push(path.expect("recording handed off"));
    }

    let names: Vec<_> = handed_off
        .iter()
        .map(|path| path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_owned())
        .collect();
    assert_eq!(names, ["Rig_0000000-take.mp4", "Rig_0000001-take.mp4", "Rig_0000002-take.mp4"]);
    assert_eq!(fs::read_to_string(&handed_off[2]).expect("read"), "pass 3");
    assert!(!dir.path().join("videos").join("Cam240_1.mp4").exists());
    assert_eq!(controller.naming().sequence, 3);
    assert_eq!(controller.bridge().actions.load(Ordering::SeqCst), 3);

    let record = controller.record().expect("running session");
    assert_eq!(record.dropped_in_pass(), 1);
    assert_eq!(record.last_report().map(|r| r.frames), Some(149));

    let status = controller.stop().await.expect("stop");
    assert!(status.is_some_and(|s| s.success()));
    assert_eq!(controller.state(), SessionState::EngineStopped);

    let sequences: Vec<u32> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::SequenceAdvanced(naming) => Some(naming.sequence),
            _ => None,
        })
        .collect();
    assert_eq!(sequences, [1, 2, 3]);
}

#[tokio::test]
async fn test_trigger_requires_ready_engine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut controller = fake_controller(dir.path(), "0.3");

    assert!(matches!(
        controller.trigger().await,
        Err(SessionError::NotReady(SessionState::Idle))
    ));

    controller.start_engine().await.expect("engine ready");
    assert!(matches!(
        controller.start_engine().await,
        Err(SessionError::AlreadyRunning(SessionState::EngineReady))
    ));

    let report = controller.trigger().await.expect("first trigger");
    assert!(report.skew < Duration::from_secs(1));
    assert!(matches!(
        controller.trigger().await,
        Err(SessionError::NotReady(SessionState::CaptureInProgress))
    ));

    report.action.await.expect("action task").expect("action");
    assert_eq!(controller.bridge().actions.load(Ordering::SeqCst), 1);

    let timeout = controller.capture_timeout();
    let handed_off = controller.wait_capture(timeout).await.expect("capture result");
    assert!(handed_off.is_some());
    assert_eq!(controller.naming().sequence, 1);

    controller.stop().await.expect("stop");
}

#[tokio::test]
async fn test_failed_action_does_not_block_capture() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bridge = FakeBridge {
        fail_action: true,
        ..FakeBridge::default()
    };
    let mut controller = SessionController::new(Arc::new(bridge), fake_settings(dir.path(), "0"), NamingSequence::default());
    let mut events = controller.subscribe();

    controller.start_engine().await.expect("engine ready");
    let handed_off = controller.capture_once().await.expect("capture");

    assert_eq!(handed_off, Some(dir.path().join("handoff").join("Rig_0000000-take.mp4")));
    assert_eq!(controller.naming().sequence, 1);
    assert_eq!(controller.bridge().actions.load(Ordering::SeqCst), 1);
    assert_eq!(controller.status(), OperatorStatus::Ready);
    assert_eq!(action_failures(&drain(&mut events)), 1);

    controller.stop().await.expect("stop");
}

#[tokio::test]
async fn test_trigger_does_not_wait_for_hanging_action() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bridge = FakeBridge {
        action_delay: Duration::from_secs(3),
        ..FakeBridge::default()
    };
    let mut controller = SessionController::new(Arc::new(bridge), fake_settings(dir.path(), "0"), NamingSequence::default());
    let mut events = controller.subscribe();
    controller.start_engine().await.expect("engine ready");

    let started = std::time::Instant::now();
    let report = controller.trigger().await.expect("trigger");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(report.skew < Duration::from_secs(1));

    let timeout = controller.capture_timeout();
    let handed_off = controller.wait_capture(timeout).await.expect("capture result");
    assert!(handed_off.is_some());
    assert_eq!(controller.naming().sequence, 1);
    assert!(!report.action.is_finished(), "capture finished before the action gave up");

    let outcome = report.action.await.expect("action task");
    assert!(matches!(outcome, Err(ActuatorError::Timeout { .. })));
    assert_eq!(action_failures(&drain(&mut events)), 1);

    controller.stop().await.expect("stop");
}

#[tokio::test]
async fn test_readiness_watchdog_then_terminate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings(dir.path(), "exec sleep 60", &[]);
    settings.ready_timeout = Duration::from_millis(300);
    let mut controller = SessionController::new(Arc::new(FakeBridge::default()), settings, NamingSequence::default());

    assert!(matches!(
        controller.start_engine().await,
        Err(SessionError::ReadinessTimeout(_))
    ));
    assert_eq!(controller.state(), SessionState::EngineStarting);
    assert_eq!(controller.status(), OperatorStatus::NotReady);
    assert!(controller.engine_pid().is_some());

    let status = controller.stop().await.expect("stop").expect("exit observed");
    assert_eq!(status.signal(), Some(libc::SIGTERM));
    assert_eq!(controller.state(), SessionState::EngineStopped);
    assert!(controller.engine_pid().is_none());
}

#[tokio::test]
async fn test_engine_ignoring_terminate_is_killed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = "trap '' TERM; echo 'CAMSYNC/1 READY'; while :; do sleep 1; done";
    let mut controller = SessionController::new(
        Arc::new(FakeBridge::default()),
        settings(dir.path(), script, &[]),
        NamingSequence::default(),
    );

    controller.start_engine().await.expect("engine ready");
    let status = controller.stop().await.expect("stop").expect("exit observed");
    assert_eq!(status.signal(), Some(libc::SIGKILL));
}

#[tokio::test]
async fn test_broken_command_channel_stops_engine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut controller = SessionController::new(
        Arc::new(FakeBridge::default()),
        settings(dir.path(), DEAF_ENGINE, &[]),
        NamingSequence::default(),
    );

    controller.start_engine().await.expect("engine ready");
    assert!(matches!(controller.trigger().await, Err(SessionError::ChannelBroken(_))));
    assert_eq!(controller.state(), SessionState::EngineStopped);
    assert_eq!(controller.naming().sequence, 0);
}

#[tokio::test]
async fn test_engine_exit_code_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut controller = SessionController::new(
        Arc::new(FakeBridge::default()),
        settings(dir.path(), "echo 'no camera' >&2; exit 3", &[]),
        NamingSequence::default(),
    );

    let err = controller.start_engine().await.expect_err("engine exits");
    let SessionError::EngineExited(Some(status)) = &err else {
        unreachable!("unexpected error: {err}");
    };
    assert_eq!(status.code(), Some(3));
    assert!(err.to_string().contains("camera unavailable"));
    assert_eq!(controller.state(), SessionState::EngineStopped);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut controller = fake_controller(dir.path(), "0");

    assert!(controller.stop().await.expect("stop without engine").is_none());
    controller.start_engine().await.expect("engine ready");
    controller.send_quit().await;
    controller.send_quit().await;

    let status = controller.stop().await.expect("stop");
    assert!(status.is_some_and(|s| s.success()));
    assert!(controller.stop().await.expect("second stop").is_none());
    assert_eq!(controller.status(), OperatorStatus::Stopped);
}

#[tokio::test]
async fn test_pass_in_flight_is_finished_during_stop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = fake_settings(dir.path(), "0.4");
    settings.capture_duration = Duration::from_secs(3);
    let mut controller = SessionController::new(Arc::new(FakeBridge::default()), settings, NamingSequence::default());

    controller.start_engine().await.expect("engine ready");
    let report = controller.trigger().await.expect("trigger");
    assert_eq!(controller.state(), SessionState::CaptureInProgress);

    let status = controller.stop().await.expect("stop");
    assert!(status.is_some_and(|s| s.success()));
    report.action.await.expect("action task").expect("action");

    assert!(dir.path().join("handoff").join("Rig_0000000-take.mp4").exists());
    assert_eq!(controller.naming().sequence, 1);
}

#[tokio::test]
async fn test_existing_destination_blocks_handoff() {
    let dir = tempfile::tempdir().expect("tempdir");
    let handoff = dir.path().join("handoff");
    fs::create_dir_all(&handoff).expect("handoff dir");
    fs::write(handoff.join("Rig_0000000-take.mp4"), "older take").expect("write");
    let mut controller = fake_controller(dir.path(), "0");

    controller.start_engine().await.expect("engine ready");
    assert!(matches!(
        controller.capture_once().await,
        Err(SessionError::Handoff { .. })
    ));
    assert_eq!(controller.naming().sequence, 0);
    assert!(dir.path().join("videos").join("Cam240_1.mp4").exists());
    assert_eq!(
        fs::read_to_string(handoff.join("Rig_0000000-take.mp4")).expect("read"),
        "older take"
    );

    controller.stop().await.expect("stop");
}

#[tokio::test]
async fn test_retrieve_payload_advances_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut controller = SessionController::new(
        Arc::new(FakeBridge::default()),
        settings(dir.path(), "exit 0", &[]),
        NamingSequence::new("Tap", 41, "rig").expect("naming"),
    );
    let mut events = controller.subscribe();

    let target = controller.retrieve_payload().await.expect("retrieve");
    assert_eq!(target, dir.path().join("handoff").join("Tap_0000041-rig"));
    assert!(target.join("result.json").exists());
    assert_eq!(controller.naming().sequence, 42);
    assert!(drain(&mut events).contains(&SessionEvent::Retrieved(target)));
}

#[tokio::test]
async fn test_failed_retrieval_leaves_sequence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bridge = FakeBridge {
        fail_pull: true,
        ..FakeBridge::default()
    };
    let mut controller = SessionController::new(
        Arc::new(bridge),
        settings(dir.path(), "exit 0", &[]),
        NamingSequence::default(),
    );

    assert!(matches!(
        controller.retrieve_payload().await,
        Err(SessionError::Actuator(ActuatorError::Failed { .. }))
    ));
    assert_eq!(controller.naming().sequence, 0);
    assert_eq!(controller.bridge().pulls.load(Ordering::SeqCst), 1);
    assert!(!dir.path().join("handoff").join("Rig_0000000-take").exists());
}
