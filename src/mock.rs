//! Mock device implementation for testing without hardware.

use crate::traits::{
    CameraDevice, CameraError, CaptureStream, DeviceCapabilities, Exposure, ExposureMode, Format,
    FourCC, Frame, FrameMetadata, Result,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Mock device for testing without hardware.
///
/// The mock behaves like a picky UVC camera: requests above its limits are
/// clamped, and individual read attempts can be scripted to fail.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    format: Format,
    fps: f64,
    exposure: Exposure,
    frame_count: u32,
    read_attempts: u64,
    max_resolution: (u32, u32),
    format_limits: HashMap<FourCC, (u32, u32)>,
    max_fps: f64,
    failing_reads: HashSet<u64>,
    failing_streams: bool,
    streams_created: u32,
    closed: bool,
    close_calls: u32,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(640, 480, FourCC::YUYV),
            fps: 30.0,
            exposure: Exposure {
                mode: ExposureMode::Auto,
                value: Some(156),
            },
            frame_count: 0,
            read_attempts: 0,
            max_resolution: (u32::MAX, u32::MAX),
            format_limits: HashMap::new(),
            max_fps: f64::MAX,
            failing_reads: HashSet::new(),
            failing_streams: false,
            streams_created: 0,
            closed: false,
            close_calls: 0,
        }
    }

    /// Clamp every requested resolution to at most `width`x`height`.
    #[must_use]
    pub fn with_max_resolution(mut self, width: u32, height: u32) -> Self {
        self.max_resolution = (width, height);
        self
    }

    /// Clamp requested resolutions for one pixel format only.
    #[must_use]
    pub fn with_format_limit(mut self, fourcc: FourCC, width: u32, height: u32) -> Self {
        self.format_limits.insert(fourcc, (width, height));
        self
    }

    /// Clamp requested frame rates.
    #[must_use]
    pub fn with_max_fps(mut self, fps: f64) -> Self {
        self.max_fps = fps;
        self
    }

    /// Make the given read attempts (0-based, counted across streams) fail.
    #[must_use]
    pub fn with_failing_reads(mut self, attempts: impl IntoIterator<Item = u64>) -> Self {
        self.failing_reads.extend(attempts);
        self
    }

    /// Make every `create_stream` call fail.
    #[must_use]
    pub fn with_failing_streams(mut self) -> Self {
        self.failing_streams = true;
        self
    }

    /// Number of capture streams opened so far.
    pub const fn streams_created(&self) -> u32 {
        self.streams_created
    }

    /// Number of times `close` was called.
    pub const fn close_calls(&self) -> u32 {
        self.close_calls
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(CameraError::Closed)
        } else {
            Ok(())
        }
    }
}

impl CameraDevice for MockDevice {
    type Stream<'a> = MockStream<'a>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Result<Format> {
        self.ensure_open()?;
        Ok(self.format.clone())
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        self.ensure_open()?;
        let (max_w, max_h) = self
            .format_limits
            .get(&format.fourcc)
            .copied()
            .unwrap_or(self.max_resolution);
        let width = format.width.min(max_w).min(self.max_resolution.0);
        let height = format.height.min(max_h).min(self.max_resolution.1);
        self.format = Format::new(width, height, format.fourcc);
        Ok(self.format.clone())
    }

    fn frame_rate(&self) -> Result<f64> {
        self.ensure_open()?;
        Ok(self.fps)
    }

    fn set_frame_rate(&mut self, fps: u32) -> Result<f64> {
        self.ensure_open()?;
        self.fps = f64::from(fps).min(self.max_fps);
        Ok(self.fps)
    }

    fn exposure(&self) -> Result<Exposure> {
        self.ensure_open()?;
        Ok(self.exposure)
    }

    fn set_exposure(&mut self, exposure: Exposure) -> Result<()> {
        self.ensure_open()?;
        self.exposure = Exposure {
            mode: exposure.mode,
            value: exposure.value.or(self.exposure.value),
        };
        Ok(())
    }

    fn create_stream(&mut self, _buffer_count: u32) -> Result<Self::Stream<'_>> {
        self.ensure_open()?;
        if self.failing_streams {
            return Err(CameraError::StreamError("scripted stream failure".to_owned()));
        }
        self.streams_created += 1;
        Ok(MockStream { device: self })
    }

    fn close(&mut self) {
        self.close_calls += 1;
        self.closed = true;
    }
}

/// Mock capture stream for testing.
pub struct MockStream<'a> {
    device: &'a mut MockDevice,
}

impl CaptureStream for MockStream<'_> {
    fn next_frame(&mut self) -> Result<Frame> {
        let attempt = self.device.read_attempts;
        self.device.read_attempts += 1;
        if self.device.failing_reads.contains(&attempt) {
            return Err(CameraError::FrameLost(format!("scripted failure at read {attempt}")));
        }

        let size = self.device.format.size;
        let seq = self.device.frame_count;
        self.device.frame_count += 1;

        #[allow(clippy::cast_possible_truncation)]
        let fill = seq as u8;
        Ok(Frame {
            data: vec![fill; size as usize],
            metadata: FrameMetadata {
                sequence: seq,
                timestamp: Duration::from_millis(u64::from(seq) * 33), // ~30fps
                bytes_used: size,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_mock_device_clamps_format() {
        let mut device = MockDevice::new().with_max_resolution(352, 288);
        let actual = device
            .set_format(&Format::new(640, 400, FourCC::YUYV))
            .expect("set_format should succeed");
        assert_eq!((actual.width, actual.height), (352, 288));
    }

    #[test]
    fn test_mock_device_per_format_limit() {
        let mut device = MockDevice::new().with_format_limit(FourCC::MJPG, 320, 240);
        let mjpg = device
            .set_format(&Format::new(640, 480, FourCC::MJPG))
            .expect("set_format should succeed");
        assert_eq!((mjpg.width, mjpg.height), (320, 240));

        let yuyv = device
            .set_format(&Format::new(640, 480, FourCC::YUYV))
            .expect("set_format should succeed");
        assert_eq!((yuyv.width, yuyv.height), (640, 480));
    }

    #[test]
    fn test_mock_stream_scripted_failures() {
        let mut device = MockDevice::new().with_failing_reads([1]);
        let mut stream = device.create_stream(4).expect("create_stream should succeed");

        let frame1 = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame1.metadata.sequence, 0);
        assert!(!frame1.data.is_empty());

        assert!(matches!(stream.next_frame(), Err(CameraError::FrameLost(_))));

        let frame2 = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame2.metadata.sequence, 1);
    }

    #[test]
    fn test_mock_close_is_idempotent() {
        let mut device = MockDevice::new();
        device.close();
        device.close();
        assert_eq!(device.close_calls(), 2);
        assert!(matches!(device.format(), Err(CameraError::Closed)));
    }
}
