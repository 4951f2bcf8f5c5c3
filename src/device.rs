//! V4L2 device implementation using the v4l crate.

use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    CameraDevice, CameraError, CaptureStream, DeviceCapabilities, Exposure, ExposureMode, Format,
    FourCC, Frame, FrameMetadata, Result,
};
use std::time::Duration;
use tracing::debug;

/// `V4L2_CID_EXPOSURE_AUTO`
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
/// `V4L2_CID_EXPOSURE_ABSOLUTE`
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

/// Upper bound for a single dequeue before the read counts as lost.
const FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Option<Device>,
    capabilities: DeviceCapabilities,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(format!("/dev/video{index}: {err}")))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        if !capabilities.can_capture {
            return Err(CameraError::DeviceOpenFailed(format!(
                "/dev/video{index} ({}) cannot capture video",
                capabilities.card
            )));
        }

        Ok(Self {
            device: Some(device),
            capabilities,
        })
    }

    fn handle(&self) -> Result<&Device> {
        self.device.as_ref().ok_or(CameraError::Closed)
    }

    fn integer_control(&self, id: u32) -> Result<Option<i64>> {
        let control = self
            .handle()?
            .control(id)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        Ok(match control.value {
            Value::Integer(value) => Some(value),
            _ => None,
        })
    }

    fn set_integer_control(&self, id: u32, value: i64, what: &'static str) -> Result<()> {
        self.handle()?
            .set_control(Control {
                id,
                value: Value::Integer(value),
            })
            .map_err(|err| CameraError::ConfigureFailed {
                what,
                reason: err.to_string(),
            })
    }
}

fn to_format(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    }
}

fn interval_to_fps(params: &Parameters) -> f64 {
    let interval = params.interval;
    if interval.numerator == 0 {
        0.0
    } else {
        f64::from(interval.denominator) / f64::from(interval.numerator)
    }
}

impl CameraDevice for V4L2Device {
    type Stream<'a> = V4L2Stream<'a>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Result<Format> {
        let fmt = self
            .handle()?
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(to_format(&fmt))
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let device = self.handle()?;
        let mut fmt = device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = device
            .set_format(&fmt)
            .map_err(|err| CameraError::ConfigureFailed {
                what: "format",
                reason: err.to_string(),
            })?;

        Ok(to_format(&fmt))
    }

    fn frame_rate(&self) -> Result<f64> {
        let params = self
            .handle()?
            .params()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        Ok(interval_to_fps(&params))
    }

    fn set_frame_rate(&mut self, fps: u32) -> Result<f64> {
        let params = self
            .handle()?
            .set_params(&Parameters::with_fps(fps))
            .map_err(|err| CameraError::ConfigureFailed {
                what: "frame rate",
                reason: err.to_string(),
            })?;
        Ok(interval_to_fps(&params))
    }

    fn exposure(&self) -> Result<Exposure> {
        let mode = match self.integer_control(CID_EXPOSURE_AUTO)? {
            Some(EXPOSURE_MANUAL) => ExposureMode::Manual,
            _ => ExposureMode::Auto,
        };
        // Not every camera exposes an absolute exposure control.
        let value = self.integer_control(CID_EXPOSURE_ABSOLUTE).unwrap_or(None);
        Ok(Exposure { mode, value })
    }

    fn set_exposure(&mut self, exposure: Exposure) -> Result<()> {
        match exposure.mode {
            ExposureMode::Manual => {
                self.set_integer_control(CID_EXPOSURE_AUTO, EXPOSURE_MANUAL, "exposure mode")?;
                if let Some(value) = exposure.value {
                    self.set_integer_control(CID_EXPOSURE_ABSOLUTE, value, "exposure value")?;
                }
            }
            ExposureMode::Auto => {
                // UVC cameras usually only offer aperture priority as "auto".
                if self
                    .set_integer_control(
                        CID_EXPOSURE_AUTO,
                        EXPOSURE_APERTURE_PRIORITY,
                        "exposure mode",
                    )
                    .is_err()
                {
                    self.set_integer_control(CID_EXPOSURE_AUTO, 0, "exposure mode")?;
                }
            }
        }
        Ok(())
    }

    fn create_stream(&mut self, buffer_count: u32) -> Result<Self::Stream<'_>> {
        let mut stream = Stream::with_buffers(self.handle()?, Type::VideoCapture, buffer_count)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        stream.set_timeout(FRAME_TIMEOUT);

        Ok(V4L2Stream { stream })
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            debug!(card = %self.capabilities.card, "camera released");
        }
    }
}

impl Drop for V4L2Device {
    fn drop(&mut self) {
        self.close();
    }
}

/// V4L2 capture stream wrapping mmap-based streaming.
pub struct V4L2Stream<'a> {
    stream: Stream<'a>,
}

impl CaptureStream for V4L2Stream<'_> {
    fn next_frame(&mut self) -> Result<Frame> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|err| CameraError::FrameLost(err.to_string()))?;

        // Safe conversions: V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        Ok(Frame {
            data: buf.to_vec(),
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        })
    }
}
