//! cam-sync: synchronized camera capture for a test rig.
//!
//! Two processes cooperate. The capture engine ([`engine`]) owns the camera,
//! records fixed-length passes on command and encodes them to video files.
//! The supervisor ([`controller`]) spawns the engine, fires an external
//! action on the device under test ([`actuator`]) together with the capture
//! command, and files finished recordings under sequence-numbered names
//! ([`naming`]). The two talk over a line protocol ([`protocol`]) on the
//! engine's stdin and stdout.
//!
//! Camera access sits behind the [`CameraDevice`] trait so the engine runs
//! against a mock device in tests and V4L2 hardware in production.

pub mod actuator;
pub mod config;
pub mod controller;
pub mod device;
pub mod engine;
pub mod exit_codes;
pub mod logging;
pub mod naming;
pub mod negotiation;
pub mod pass;
pub mod protocol;
pub mod session;
pub mod traits;
pub mod writer;

#[cfg(test)]
pub mod mock;

pub use actuator::{AdbBridge, AdbSettings, DeviceBridge};
pub use controller::{ControllerSettings, SessionController, SessionError, SessionEvent};
pub use device::V4L2Device;
pub use engine::{CaptureEngine, EngineError, EngineSettings};
pub use exit_codes::ExitCode;
pub use naming::NamingSequence;
pub use negotiation::{CaptureConfig, NegotiatedConfig};
pub use traits::{
    CameraDevice, CaptureStream, DeviceCapabilities, Exposure, ExposureMode, Format, FourCC, Frame, FrameMetadata,
};
pub use writer::{FfmpegWriter, VideoWriter};
