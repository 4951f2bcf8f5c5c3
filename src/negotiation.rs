//! Best-effort camera configuration.
//!
//! Cameras silently substitute what they can do for what was asked. The
//! engine therefore never trusts a request: it applies it, then reads back
//! what the driver settled on and encodes with those values only.

use crate::traits::{CameraDevice, Exposure, Format, FourCC};
use tracing::{info, warn};

/// What the operator asked the camera for. Fixed for the engine's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Requested width in pixels.
    pub width: u32,
    /// Requested height in pixels.
    pub height: u32,
    /// Requested frames per second.
    pub fps: u32,
    /// First pixel-format hint to try.
    pub pixel_format: FourCC,
    /// Requested exposure.
    pub exposure: Exposure,
}

/// What the camera actually reports after configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedConfig {
    /// Negotiated width in pixels.
    pub width: u32,
    /// Negotiated height in pixels.
    pub height: u32,
    /// Negotiated frames per second.
    pub fps: f64,
    /// Negotiated pixel format.
    pub fourcc: FourCC,
    /// Exposure as read back from the device.
    pub exposure: Exposure,
}

impl NegotiatedConfig {
    /// The negotiated frame format.
    #[must_use]
    pub const fn format(&self) -> Format {
        Format::new(self.width, self.height, self.fourcc)
    }

    /// Whether the device honored the requested resolution.
    #[must_use]
    pub const fn matches_resolution(&self, request: &CaptureConfig) -> bool {
        self.width == request.width && self.height == request.height
    }
}

fn apply_format<D: CameraDevice>(device: &mut D, request: &CaptureConfig, fourcc: FourCC) -> Option<Format> {
    let wanted = Format::new(request.width, request.height, fourcc);
    match device.set_format(&wanted) {
        Ok(actual) => Some(actual),
        Err(err) => {
            warn!(%fourcc, "format request rejected: {err}");
            None
        }
    }
}

const fn honors_resolution(format: Option<&Format>, request: &CaptureConfig) -> bool {
    match format {
        Some(format) => format.width == request.width && format.height == request.height,
        None => false,
    }
}

/// Apply `request` to `device` and return what the device actually settled on.
///
/// Never fails. If the first pixel-format hint does not yield the requested
/// resolution, the alternate hint is tried once and its outcome is accepted
/// as final. Every value is re-read from the device afterwards; values the
/// device refuses to report fall back to the last known value.
pub fn negotiate<D: CameraDevice>(device: &mut D, request: &CaptureConfig) -> NegotiatedConfig {
    let mut applied = apply_format(device, request, request.pixel_format);

    if !honors_resolution(applied.as_ref(), request) {
        let alternate = request.pixel_format.alternate();
        info!(
            requested = %request.pixel_format,
            %alternate,
            "resolution {}x{} not honored, retrying with alternate pixel format",
            request.width,
            request.height
        );
        applied = apply_format(device, request, alternate).or(applied);
    }

    // Frame interval is reset by format changes on most drivers, so it goes second.
    let applied_fps = match device.set_frame_rate(request.fps) {
        Ok(fps) => Some(fps),
        Err(err) => {
            warn!(fps = request.fps, "frame rate request rejected: {err}");
            None
        }
    };

    if let Err(err) = device.set_exposure(request.exposure) {
        warn!(mode = request.exposure.mode.as_str(), "exposure request rejected: {err}");
    }

    let format = match device.format() {
        Ok(format) => format,
        Err(err) => {
            warn!("could not read back format: {err}");
            applied.unwrap_or_else(|| Format::new(request.width, request.height, request.pixel_format))
        }
    };

    let fps = match device.frame_rate() {
        Ok(fps) => fps,
        Err(err) => {
            warn!("could not read back frame rate: {err}");
            applied_fps.unwrap_or_else(|| f64::from(request.fps))
        }
    };

    let exposure = device.exposure().unwrap_or_else(|err| {
        warn!("could not read back exposure: {err}");
        request.exposure
    });

    let negotiated = NegotiatedConfig {
        width: format.width,
        height: format.height,
        fps,
        fourcc: format.fourcc,
        exposure,
    };

    if !negotiated.matches_resolution(request) || (fps - f64::from(request.fps)).abs() > f64::EPSILON {
        warn!(
            "device negotiated {}x{} @ {:.2} fps {} instead of {}x{} @ {} fps",
            negotiated.width,
            negotiated.height,
            negotiated.fps,
            negotiated.fourcc,
            request.width,
            request.height,
            request.fps
        );
    }

    negotiated
}
