//! Frame Buffer and per-pass arithmetic.

use crate::traits::Frame;
use std::time::Duration;

/// Number of read attempts for one pass: `floor(duration × fps)`.
///
/// Non-finite or non-positive products yield zero.
#[must_use]
pub fn frame_budget(duration: Duration, fps: f64) -> u64 {
    let frames = duration.as_secs_f64() * fps;
    if frames.is_finite() && frames > 0.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            frames.floor() as u64
        }
    } else {
        0
    }
}

/// Frames per second actually achieved; zero when no time elapsed.
#[must_use]
pub fn achieved_fps(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        #[allow(clippy::cast_precision_loss)]
        {
            frames as f64 / secs
        }
    } else {
        0.0
    }
}

/// Frames the driver skipped between consecutive buffered frames.
///
/// V4L2 sequence numbers increase by one per frame the sensor produced, so
/// a jump means the kernel queue overflowed while we were not dequeuing.
#[must_use]
pub fn sequence_gaps(frames: &[Frame]) -> u64 {
    frames
        .windows(2)
        .filter_map(|pair| match pair {
            [prev, curr] => {
                let expected = prev.metadata.sequence.wrapping_add(1);
                (curr.metadata.sequence > expected)
                    .then(|| u64::from(curr.metadata.sequence - expected))
            }
            _ => None,
        })
        .sum()
}

/// In-memory frames of one capture pass.
///
/// Filled for the whole pass and handed to the writer in one piece; it is
/// never flushed part-way.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    frames: Vec<Frame>,
}

impl FrameBuffer {
    /// Empty buffer with room for `budget` frames so the acquisition loop
    /// does not reallocate.
    #[must_use]
    pub fn with_budget(budget: u64) -> Self {
        let capacity = usize::try_from(budget).unwrap_or(usize::MAX);
        Self {
            frames: Vec::with_capacity(capacity),
        }
    }

    /// Append one frame.
    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Number of buffered frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Borrow the buffered frames.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Drain the whole buffer.
    #[must_use]
    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

/// Outcome of one capture pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassSummary {
    /// Read attempts made (the frame budget).
    pub budget: u64,
    /// Frames captured into the buffer.
    pub frames: u64,
    /// Read attempts that failed.
    pub dropped: u64,
    /// Frames the driver skipped between captured frames.
    pub sequence_gaps: u64,
    /// Wall-clock duration of the acquisition loop.
    pub elapsed: Duration,
    /// `frames / elapsed`.
    pub achieved_fps: f64,
}
