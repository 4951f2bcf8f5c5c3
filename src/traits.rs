//! Core traits and types for the camera Frame Source abstraction.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");

    /// Bytes per pixel for packed formats, `None` for compressed ones.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> Option<u32> {
        match self.0 {
            [b'Y', b'U', b'Y', b'V'] => Some(2),
            [b'R', b'G', b'B', b'3'] => Some(3),
            _ => None,
        }
    }

    /// The hint tried when the device does not honor this one.
    ///
    /// Compressed streams usually reach higher resolutions and frame rates on
    /// USB cameras, raw streams are the universal fallback.
    #[must_use]
    pub const fn alternate(self) -> Self {
        match self.0 {
            [b'M', b'J', b'P', b'G'] => Self::YUYV,
            _ => Self::MJPG,
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl FromStr for FourCC {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 4] = s
            .trim()
            .to_ascii_uppercase()
            .as_bytes()
            .try_into()
            .map_err(|_| CameraError::InvalidFourCC(s.to_owned()))?;
        Ok(Self(bytes))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride), zero for compressed formats.
    pub stride: u32,
    /// Total frame size in bytes (upper bound for compressed formats).
    pub size: u32,
}

impl Format {
    /// Create a new format specification.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let (stride, size) = match fourcc.bytes_per_pixel() {
            Some(bpp) => {
                let stride = width.saturating_mul(bpp);
                (stride, stride.saturating_mul(height))
            }
            None => (0, width.saturating_mul(height).saturating_mul(2)),
        };
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }

    /// Packed byte length of one row, for uncompressed formats.
    #[must_use]
    pub fn row_len(&self) -> Option<usize> {
        let bpp = usize::try_from(self.fourcc.bytes_per_pixel()?).ok()?;
        usize::try_from(self.width).ok()?.checked_mul(bpp)
    }

    /// Exact byte length of one unpadded frame, for uncompressed formats.
    /// `None` when the size does not fit in memory.
    #[must_use]
    pub fn frame_len(&self) -> Option<usize> {
        self.row_len()?.checked_mul(usize::try_from(self.height).ok()?)
    }
}

/// Auto-exposure selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureMode {
    /// Device picks exposure continuously.
    Auto,
    /// Exposure locked to an explicit value.
    Manual,
}

impl ExposureMode {
    /// Protocol/config representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for ExposureMode {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(CameraError::InvalidExposureMode(other.to_owned())),
        }
    }
}

/// Exposure state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exposure {
    /// Auto or manual.
    pub mode: ExposureMode,
    /// Absolute exposure value, if the device exposes one.
    pub value: Option<i64>,
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// The meaningful part of the buffer (`bytes_used` clamps the mapped length).
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let used = (self.metadata.bytes_used as usize).min(self.data.len());
        self.data.get(..used).unwrap_or(self.data.as_slice())
    }
}

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// A control or parameter could not be applied.
    #[error("Failed to apply {what}: {reason}")]
    ConfigureFailed {
        /// Which setting was rejected.
        what: &'static str,
        /// Driver message.
        reason: String,
    },
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// A single frame could not be read.
    #[error("Frame lost: {0}")]
    FrameLost(String),
    /// The device has been closed.
    #[error("Device is closed")]
    Closed,
    /// Unparseable pixel format string.
    #[error("Invalid pixel format: {0:?}")]
    InvalidFourCC(String),
    /// Unparseable exposure mode string.
    #[error("Invalid exposure mode: {0:?}")]
    InvalidExposureMode(String),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over camera device operations.
pub trait CameraDevice {
    /// The stream type returned by `create_stream`.
    type Stream<'a>: CaptureStream
    where
        Self: 'a;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Get current format.
    fn format(&self) -> Result<Format>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Get the current frame rate.
    fn frame_rate(&self) -> Result<f64>;

    /// Request a frame rate. Returns the rate the driver settled on.
    fn set_frame_rate(&mut self, fps: u32) -> Result<f64>;

    /// Get the current exposure state.
    fn exposure(&self) -> Result<Exposure>;

    /// Request an exposure mode and value.
    fn set_exposure(&mut self, exposure: Exposure) -> Result<()>;

    /// Create a capture stream with the specified number of buffers.
    fn create_stream(&mut self, buffer_count: u32) -> Result<Self::Stream<'_>>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);
}

/// Abstraction over capture stream operations.
pub trait CaptureStream {
    /// Capture the next frame from the stream.
    ///
    /// A failure here is per-frame; the stream stays usable.
    fn next_frame(&mut self) -> Result<Frame>;
}
