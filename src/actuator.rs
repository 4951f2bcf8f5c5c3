//! External actuator client: drives the device under test through `adb`.
//!
//! Every call is one short-lived invocation of the bridge tool with a bounded
//! timeout. Nothing here retries; that is the caller's decision.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Error type for device-bridge calls.
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// The bridge tool could not be started.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Bridge binary.
        program: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The call did not finish in time; the tool was killed.
    #[error("{command} timed out after {after:?}")]
    Timeout {
        /// Command line that timed out.
        command: String,
        /// Configured bound.
        after: Duration,
    },
    /// The tool exited unsuccessfully.
    #[error("{command} failed ({status}): {stderr}")]
    Failed {
        /// Command line that failed.
        command: String,
        /// Exit status.
        status: String,
        /// Diagnostic output.
        stderr: String,
    },
    /// The tool exited zero but reported a failure.
    #[error("{command}: {message}")]
    Rejected {
        /// Command line that was rejected.
        command: String,
        /// The tool's own message.
        message: String,
    },
    /// I/O error while waiting for the tool.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One entry of the bridge's device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeDevice {
    /// Serial number or `host:port`.
    pub serial: String,
    /// Connection state as reported (`device`, `offline`, `unauthorized`, ...).
    pub state: String,
}

impl BridgeDevice {
    /// Whether the device accepts commands.
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

/// Channel to the external device under test.
pub trait DeviceBridge: Send + Sync {
    /// Check that the bridge tool runs; returns its version line.
    fn probe(&self) -> impl Future<Output = Result<String, ActuatorError>> + Send;

    /// Deliver the configured input event once.
    fn send_action(&self) -> impl Future<Output = Result<(), ActuatorError>> + Send;

    /// Devices known to the bridge.
    fn list_devices(&self) -> impl Future<Output = Result<Vec<BridgeDevice>, ActuatorError>> + Send;

    /// Connect to a network device at `address` (`host[:port]`).
    fn connect(&self, address: &str) -> impl Future<Output = Result<String, ActuatorError>> + Send;

    /// Disconnect one network device, or all of them.
    fn disconnect(&self, address: Option<&str>) -> impl Future<Output = Result<(), ActuatorError>> + Send;

    /// Entries of a directory on the device.
    fn list_remote(&self, remote: &str) -> impl Future<Output = Result<Vec<String>, ActuatorError>> + Send;

    /// Copy `remote` from the device into the local directory `local`.
    fn pull(&self, remote: &str, local: &Path) -> impl Future<Output = Result<(), ActuatorError>> + Send;
}

/// Settings for [`AdbBridge`].
#[derive(Debug, Clone)]
pub struct AdbSettings {
    /// `adb` binary.
    pub program: PathBuf,
    /// Target device serial (`-s`), if more than one is attached.
    pub serial: Option<String>,
    /// Shell command delivered by `send_action`, e.g. `input text s`.
    pub action: String,
    /// Bound for action, list, connect and probe calls.
    pub command_timeout: Duration,
    /// Bound for remote directory listings.
    pub list_timeout: Duration,
    /// Bound for file retrieval.
    pub pull_timeout: Duration,
}

impl Default for AdbSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("adb"),
            serial: None,
            action: "input text s".to_owned(),
            command_timeout: Duration::from_secs(10),
            list_timeout: Duration::from_secs(15),
            pull_timeout: Duration::from_secs(30),
        }
    }
}

/// [`DeviceBridge`] over the `adb` command-line tool.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    settings: AdbSettings,
}

impl AdbBridge {
    /// Bridge with the given settings.
    pub const fn new(settings: AdbSettings) -> Self {
        Self { settings }
    }

    /// Active settings.
    pub const fn settings(&self) -> &AdbSettings {
        &self.settings
    }

    /// Run `adb` with `args`, optionally scoped to the configured device.
    async fn run(&self, targeted: bool, args: &[&str], timeout: Duration) -> Result<Output, ActuatorError> {
        let mut command = Command::new(&self.settings.program);
        if let (true, Some(serial)) = (targeted, self.settings.serial.as_deref()) {
            command.args(["-s", serial]);
        }
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let command_line = format!("adb {}", args.join(" "));
        debug!(command = %command_line, "running bridge command");

        let child = command.spawn().map_err(|source| ActuatorError::Spawn {
            program: self.settings.program.clone(),
            source,
        })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ActuatorError::Timeout {
                command: command_line.clone(),
                after: timeout,
            })??;

        if output.status.success() {
            Ok(output)
        } else {
            Err(ActuatorError::Failed {
                command: command_line,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }
}

/// Parse `adb devices` output.
pub fn parse_devices(stdout: &str) -> Vec<BridgeDevice> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(BridgeDevice {
                serial: parts.next()?.to_owned(),
                state: parts.next()?.to_owned(),
            })
        })
        .collect()
}

/// `adb connect` exits zero on failure; success is only visible in its output.
pub fn connect_succeeded(stdout: &str) -> bool {
    let text = stdout.to_ascii_lowercase();
    (text.contains("connected to") && !text.contains("cannot") && !text.contains("failed"))
        || text.contains("already connected")
}

fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

impl DeviceBridge for AdbBridge {
    async fn probe(&self) -> Result<String, ActuatorError> {
        let output = self.run(false, &["version"], self.settings.command_timeout).await?;
        Ok(stdout_text(&output).lines().next().unwrap_or_default().to_owned())
    }

    async fn send_action(&self) -> Result<(), ActuatorError> {
        let mut args = vec!["shell"];
        args.extend(self.settings.action.split_whitespace());
        self.run(true, &args, self.settings.command_timeout).await?;
        debug!(action = %self.settings.action, "action delivered");
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<BridgeDevice>, ActuatorError> {
        let output = self.run(false, &["devices"], self.settings.command_timeout).await?;
        Ok(parse_devices(&stdout_text(&output)))
    }

    async fn connect(&self, address: &str) -> Result<String, ActuatorError> {
        let output = self.run(false, &["connect", address], self.settings.command_timeout).await?;
        let message = stdout_text(&output);
        if connect_succeeded(&message) {
            info!(%address, "{message}");
            Ok(message)
        } else {
            Err(ActuatorError::Rejected {
                command: format!("adb connect {address}"),
                message,
            })
        }
    }

    async fn disconnect(&self, address: Option<&str>) -> Result<(), ActuatorError> {
        let mut args = vec!["disconnect"];
        args.extend(address);
        let output = self.run(false, &args, self.settings.command_timeout).await?;
        info!("{}", stdout_text(&output));
        Ok(())
    }

    async fn list_remote(&self, remote: &str) -> Result<Vec<String>, ActuatorError> {
        let output = self.run(true, &["shell", "ls", remote], self.settings.list_timeout).await?;
        Ok(stdout_text(&output)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<(), ActuatorError> {
        let local = local.to_string_lossy();
        let output = self.run(true, &["pull", remote, local.as_ref()], self.settings.pull_timeout).await?;
        debug!("{}", stdout_text(&output));
        Ok(())
    }
}
