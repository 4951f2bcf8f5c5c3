//! Rig configuration.
//!
//! Stored as JSON in the platform config directory:
//! - Linux: `~/.config/cam-sync/config.json`
//! - macOS: `~/Library/Application Support/cam-sync/config.json`
//! - Windows: `%APPDATA%\cam-sync\config.json`
//!
//! Every field has a default, so older or partial files keep loading.

use crate::actuator::AdbSettings;
use crate::controller::ControllerSettings;
use crate::naming::NamingSequence;
use crate::negotiation::CaptureConfig;
use crate::traits::{CameraError, Exposure, ExposureMode, FourCC};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Engine binary name.
#[cfg(windows)]
pub const ENGINE_BINARY: &str = "cam-sync-engine.exe";
/// Engine binary name.
#[cfg(not(windows))]
pub const ENGINE_BINARY: &str = "cam-sync-engine";

/// Error type for configuration handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No platform config directory could be determined.
    #[error("Could not determine config directory")]
    NoConfigDir,
    /// The file exists but could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Config file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid configuration.
    #[error("Failed to parse {path}: {source}")]
    Parse {
        /// Config file.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// The file could not be written.
    #[error("Failed to write {path}: {source}")]
    Write {
        /// Config file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Serialization failed.
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    /// A value is out of range or unparseable.
    #[error("Invalid {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// The engine binary could not be located.
    #[error("{0} not found next to this program or in PATH")]
    EngineNotFound(&'static str),
}

/// Camera and pass settings handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureSettings {
    /// V4L2 device index (`/dev/video<N>`).
    pub device: u32,
    /// Requested width.
    pub width: u32,
    /// Requested height.
    pub height: u32,
    /// Requested frame rate.
    pub fps: u32,
    /// First pixel-format hint (`MJPG`, `YUYV`, `RGB3`).
    pub pixel_format: String,
    /// Exposure mode.
    pub exposure_mode: ExposureMode,
    /// Exposure value for manual mode.
    pub exposure_value: i64,
    /// Pass length in seconds.
    pub duration_secs: f64,
    /// Engine output directory.
    pub output_dir: PathBuf,
    /// Engine output file prefix.
    pub file_prefix: String,
    /// mmap buffers per stream.
    pub buffer_count: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: 0,
            width: 360,
            height: 320,
            fps: 240,
            pixel_format: "MJPG".to_owned(),
            exposure_mode: ExposureMode::Manual,
            exposure_value: -8,
            duration_secs: 5.0,
            output_dir: PathBuf::from("videos"),
            file_prefix: "Cam240".to_owned(),
            buffer_count: 4,
        }
    }
}

/// Engine process settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine binary; located automatically if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
    /// ffmpeg binary; located automatically if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg: Option<PathBuf>,
    /// Readiness watchdog in seconds.
    pub ready_timeout_secs: u64,
    /// Wait per stop escalation step in seconds.
    pub stop_grace_secs: u64,
    /// Time allowed to write a pass in seconds.
    pub save_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: None,
            ffmpeg: None,
            ready_timeout_secs: 10,
            stop_grace_secs: 5,
            save_timeout_secs: 30,
        }
    }
}

/// Device bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// `adb` binary.
    pub program: PathBuf,
    /// Target device serial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Default network address for `connect`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Shell command sent as the synchronized action.
    pub action: String,
    /// Payload directory on the device.
    pub remote_payload_dir: String,
    /// Bound for short calls in seconds.
    pub command_timeout_secs: u64,
    /// Bound for remote listings in seconds.
    pub list_timeout_secs: u64,
    /// Bound for retrieval in seconds.
    pub pull_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("adb"),
            serial: None,
            address: None,
            action: "input text s".to_owned(),
            remote_payload_dir: "/sdcard/Download/MagicMirror/".to_owned(),
            command_timeout_secs: 10,
            list_timeout_secs: 15,
            pull_timeout_secs: 30,
        }
    }
}

/// Hand-off settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HandoffConfig {
    /// Where finished recordings and payloads are filed.
    pub directory: PathBuf,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("handoff"),
        }
    }
}

/// Complete rig configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RigConfig {
    /// Camera and pass settings.
    #[serde(default)]
    pub capture: CaptureSettings,
    /// Engine process settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Device bridge settings.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Hand-off settings.
    #[serde(default)]
    pub handoff: HandoffConfig,
    /// Naming triple, persisted after every advance.
    #[serde(default)]
    pub naming: NamingSequence,
}

/// Default config file location.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let dirs = ProjectDirs::from("", "", "cam-sync").ok_or(ConfigError::NoConfigDir)?;
    Ok(dirs.config_dir().join("config.json"))
}

impl RigConfig {
    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Save to `path`, creating the directory.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(write_err)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Pass length.
    pub fn capture_duration(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.capture.duration_secs).map_err(|err| ConfigError::Invalid {
            field: "capture.duration_secs",
            reason: err.to_string(),
        })
    }

    /// Camera request for the engine.
    pub fn capture_config(&self) -> Result<CaptureConfig, ConfigError> {
        let pixel_format: FourCC = self
            .capture
            .pixel_format
            .parse()
            .map_err(|err: CameraError| ConfigError::Invalid {
                field: "capture.pixel_format",
                reason: err.to_string(),
            })?;
        Ok(CaptureConfig {
            width: self.capture.width,
            height: self.capture.height,
            fps: self.capture.fps,
            pixel_format,
            exposure: Exposure {
                mode: self.capture.exposure_mode,
                value: Some(self.capture.exposure_value),
            },
        })
    }

    /// Command line for the engine process.
    pub fn engine_args(&self) -> Vec<String> {
        let capture = &self.capture;
        let mut args = vec![
            "--device".to_owned(),
            capture.device.to_string(),
            "--width".to_owned(),
            capture.width.to_string(),
            "--height".to_owned(),
            capture.height.to_string(),
            "--fps".to_owned(),
            capture.fps.to_string(),
            "--pixel-format".to_owned(),
            capture.pixel_format.clone(),
            "--exposure".to_owned(),
            capture.exposure_mode.as_str().to_owned(),
            format!("--exposure-value={}", capture.exposure_value),
            "--duration".to_owned(),
            capture.duration_secs.to_string(),
            "--output-dir".to_owned(),
            capture.output_dir.to_string_lossy().into_owned(),
            "--prefix".to_owned(),
            capture.file_prefix.clone(),
            "--buffers".to_owned(),
            capture.buffer_count.to_string(),
        ];
        if let Some(ffmpeg) = &self.engine.ffmpeg {
            args.push("--ffmpeg".to_owned());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }
        args
    }

    /// Locate the engine: configured path, next to this executable, then `PATH`.
    pub fn engine_program(&self) -> Result<PathBuf, ConfigError> {
        if let Some(program) = &self.engine.program {
            return Ok(program.clone());
        }
        if let Some(sibling) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(ENGINE_BINARY)))
            .filter(|path| path.exists())
        {
            return Ok(sibling);
        }
        which::which(ENGINE_BINARY).map_err(|_| ConfigError::EngineNotFound(ENGINE_BINARY))
    }

    /// Settings for the session controller.
    pub fn controller_settings(&self, engine_program: PathBuf) -> Result<ControllerSettings, ConfigError> {
        Ok(ControllerSettings {
            engine_program,
            engine_args: self.engine_args(),
            ready_timeout: Duration::from_secs(self.engine.ready_timeout_secs),
            stop_grace: Duration::from_secs(self.engine.stop_grace_secs),
            capture_duration: self.capture_duration()?,
            save_timeout: Duration::from_secs(self.engine.save_timeout_secs),
            handoff_dir: self.handoff.directory.clone(),
            remote_payload_dir: self.bridge.remote_payload_dir.clone(),
        })
    }

    /// Settings for the `adb` bridge.
    pub fn adb_settings(&self) -> AdbSettings {
        AdbSettings {
            program: self.bridge.program.clone(),
            serial: self.bridge.serial.clone(),
            action: self.bridge.action.clone(),
            command_timeout: Duration::from_secs(self.bridge.command_timeout_secs),
            list_timeout: Duration::from_secs(self.bridge.list_timeout_secs),
            pull_timeout: Duration::from_secs(self.bridge.pull_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_rig() {
        let config = RigConfig::default();
        assert_eq!((config.capture.width, config.capture.height, config.capture.fps), (360, 320, 240));
        assert_eq!(config.capture.exposure_mode, ExposureMode::Manual);
        assert_eq!(config.capture.exposure_value, -8);
        assert_eq!(config.bridge.action, "input text s");
        assert_eq!(config.engine.ready_timeout_secs, 10);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RigConfig::load(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(config, RigConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"capture": {"fps": 60}, "naming": {"prefix": "P", "sequence": 41, "suffix": "s"}}"#,
        )
        .expect("write");

        let config = RigConfig::load(&path).expect("load");
        assert_eq!(config.capture.fps, 60);
        assert_eq!(config.capture.width, 360);
        assert_eq!(config.naming.file_name("mp4"), "P_0000041-s.mp4");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");
        let mut config = RigConfig::default();
        config.naming.sequence = 12;
        config.bridge.serial = Some("emulator-5554".to_owned());
        config.save(&path).expect("save");

        assert_eq!(RigConfig::load(&path).expect("load"), config);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").expect("write");
        assert!(matches!(RigConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_capture_config_validates_pixel_format() {
        let mut config = RigConfig::default();
        assert_eq!(config.capture_config().expect("valid").pixel_format, FourCC::MJPG);
        config.capture.pixel_format = "MOTIONJPEG".to_owned();
        assert!(matches!(
            config.capture_config(),
            Err(ConfigError::Invalid { field: "capture.pixel_format", .. })
        ));
    }

    #[test]
    fn test_negative_duration_is_rejected() {
        let mut config = RigConfig::default();
        config.capture.duration_secs = -1.0;
        assert!(config.capture_duration().is_err());
    }

    #[test]
    fn test_engine_args_carry_request() {
        let args = RigConfig::default().engine_args();
        let joined = args.join(" ");
        assert!(joined.contains("--width 360 --height 320 --fps 240"));
        assert!(joined.contains("--exposure manual --exposure-value=-8"));
        assert!(joined.contains("--prefix Cam240"));
    }
}
