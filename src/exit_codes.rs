//! Exit codes of the capture engine process.
//!
//! The supervisor reads these back from the child's exit status to tell a
//! missing camera apart from other start-up failures.

/// Exit codes for the engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Graceful shutdown
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Invalid command-line arguments
    InvalidArguments = 2,
    /// The camera could not be opened
    CameraUnavailable = 3,
    /// Status output could not be written
    StatusChannelBroken = 4,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Map a raw process exit code back, if it is one of ours.
    #[must_use]
    pub const fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::GeneralError),
            2 => Some(Self::InvalidArguments),
            3 => Some(Self::CameraUnavailable),
            4 => Some(Self::StatusChannelBroken),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::GeneralError => write!(f, "general error"),
            Self::InvalidArguments => write!(f, "invalid arguments"),
            Self::CameraUnavailable => write!(f, "camera unavailable"),
            Self::StatusChannelBroken => write!(f, "status channel broken"),
        }
    }
}
