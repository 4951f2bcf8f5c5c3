//! Line protocol between the capture engine and its supervisor.
//!
//! Commands travel down the engine's stdin, one token per line. Status
//! travels up its stdout as tagged lines:
//!
//! ```text
//! CAMSYNC/1 <KIND> [payload]
//! ```
//!
//! Anything on stdout without the tag is not part of the protocol and is
//! ignored by the reader.

use crate::negotiation::NegotiatedConfig;
use crate::traits::{Exposure, ExposureMode, FourCC};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Tag prefixed to every status line.
pub const TAG: &str = "CAMSYNC/1";

/// Canonical capture token.
pub const RECORD_TOKEN: &str = "record";
/// Canonical shutdown token.
pub const QUIT_TOKEN: &str = "quit";

/// A command received on the engine's input channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Run one capture pass.
    Record,
    /// Shut down gracefully.
    Quit,
    /// Unrecognised token, acknowledged and ignored.
    Unknown(String),
}

impl EngineCommand {
    /// Parse one input line. Blank lines carry no command.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let token = line.trim();
        if token.is_empty() {
            return None;
        }
        Some(match token.to_ascii_lowercase().as_str() {
            "record" | "s" => Self::Record,
            "quit" | "q" => Self::Quit,
            _ => Self::Unknown(token.to_owned()),
        })
    }
}

/// Why a stdout line could not be read as a status event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line does not carry the protocol tag.
    #[error("untagged line")]
    Untagged,
    /// Tagged, but with a kind this build does not know.
    #[error("unknown status kind {0:?}")]
    UnknownKind(String),
    /// Known kind with an unreadable payload.
    #[error("malformed {kind} payload: {reason}")]
    Malformed {
        /// Status kind.
        kind: &'static str,
        /// What could not be read.
        reason: String,
    },
}

/// A status line emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Camera configured; carries the negotiated parameters.
    Init(NegotiatedConfig),
    /// One read attempt failed.
    Dropped {
        /// Zero-based read attempt within the pass.
        index: u64,
    },
    /// Commands may be sent.
    Ready,
    /// The pass is about to be written to this path.
    Saving(PathBuf),
    /// The pass was written to this path.
    Saved(PathBuf),
    /// Nothing was captured; no file written.
    Empty,
    /// Writing failed; no file was left behind.
    SaveFailed(String),
    /// Per-pass statistics.
    Summary {
        /// Frames captured.
        frames: u64,
        /// Failed reads.
        dropped: u64,
        /// Acquisition loop duration in seconds.
        elapsed: f64,
        /// Achieved frames per second.
        fps: f64,
    },
}

impl StatusEvent {
    /// The protocol kind keyword.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Init(_) => "INIT",
            Self::Dropped { .. } => "DROPPED",
            Self::Ready => "READY",
            Self::Saving(_) => "SAVING",
            Self::Saved(_) => "SAVED",
            Self::Empty => "EMPTY",
            Self::SaveFailed(_) => "SAVE_FAILED",
            Self::Summary { .. } => "SUMMARY",
        }
    }

    /// Parse one stdout line.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let rest = line
            .trim_end()
            .strip_prefix(TAG)
            .and_then(|rest| rest.strip_prefix(' '))
            .ok_or(ProtocolError::Untagged)?;
        let (kind, payload) = rest.split_once(' ').unwrap_or((rest, ""));

        match kind {
            "INIT" => parse_init(payload).map(Self::Init),
            "DROPPED" => {
                let fields = Fields::parse("DROPPED", payload);
                Ok(Self::Dropped {
                    index: fields.get("index")?,
                })
            }
            "READY" => Ok(Self::Ready),
            "SAVING" => non_empty("SAVING", payload).map(|p| Self::Saving(PathBuf::from(p))),
            "SAVED" => non_empty("SAVED", payload).map(|p| Self::Saved(PathBuf::from(p))),
            "EMPTY" => Ok(Self::Empty),
            "SAVE_FAILED" => Ok(Self::SaveFailed(payload.to_owned())),
            "SUMMARY" => {
                let fields = Fields::parse("SUMMARY", payload);
                Ok(Self::Summary {
                    frames: fields.get("frames")?,
                    dropped: fields.get("dropped")?,
                    elapsed: fields.get("elapsed")?,
                    fps: fields.get("fps")?,
                })
            }
            other => Err(ProtocolError::UnknownKind(other.to_owned())),
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TAG} {}", self.kind())?;
        match self {
            Self::Init(config) => {
                let value = config
                    .exposure
                    .value
                    .map_or_else(|| "-".to_owned(), |v| v.to_string());
                write!(
                    f,
                    " width={} height={} fps={} fourcc={} exposure={} exposure_value={value}",
                    config.width,
                    config.height,
                    config.fps,
                    config.fourcc,
                    config.exposure.mode.as_str()
                )
            }
            Self::Dropped { index } => write!(f, " index={index}"),
            Self::Saving(path) | Self::Saved(path) => write!(f, " {}", path.display()),
            Self::SaveFailed(reason) => write!(f, " {}", reason.replace('\n', " ")),
            Self::Summary {
                frames,
                dropped,
                elapsed,
                fps,
            } => write!(f, " frames={frames} dropped={dropped} elapsed={elapsed:.3} fps={fps:.2}"),
            Self::Ready | Self::Empty => Ok(()),
        }
    }
}

fn non_empty<'a>(kind: &'static str, payload: &'a str) -> Result<&'a str, ProtocolError> {
    if payload.is_empty() {
        Err(ProtocolError::Malformed {
            kind,
            reason: "missing path".to_owned(),
        })
    } else {
        Ok(payload)
    }
}

/// `key=value` pairs of a payload.
struct Fields<'a> {
    kind: &'static str,
    values: HashMap<&'a str, &'a str>,
}

impl<'a> Fields<'a> {
    fn parse(kind: &'static str, payload: &'a str) -> Self {
        let values = payload
            .split_whitespace()
            .filter_map(|pair| pair.split_once('='))
            .collect();
        Self { kind, values }
    }

    fn raw(&self, key: &str) -> Result<&'a str, ProtocolError> {
        self.values
            .get(key)
            .copied()
            .ok_or_else(|| ProtocolError::Malformed {
                kind: self.kind,
                reason: format!("missing {key}"),
            })
    }

    fn get<T: FromStr>(&self, key: &str) -> Result<T, ProtocolError> {
        let raw = self.raw(key)?;
        raw.parse().map_err(|_| ProtocolError::Malformed {
            kind: self.kind,
            reason: format!("bad {key}={raw}"),
        })
    }
}

fn parse_init(payload: &str) -> Result<NegotiatedConfig, ProtocolError> {
    let fields = Fields::parse("INIT", payload);
    let mode: ExposureMode = fields.get("exposure")?;
    let value = match fields.raw("exposure_value")? {
        "-" => None,
        _ => Some(fields.get("exposure_value")?),
    };
    let fourcc: FourCC = fields.get("fourcc")?;
    Ok(NegotiatedConfig {
        width: fields.get("width")?,
        height: fields.get("height")?,
        fps: fields.get("fps")?,
        fourcc,
        exposure: Exposure { mode, value },
    })
}

/// Emits status lines, flushing each one so the reader sees it immediately.
pub struct StatusWriter<W: Write> {
    out: W,
}

impl<W: Write> StatusWriter<W> {
    /// Wrap an output channel.
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    /// Write one status line.
    pub fn emit(&mut self, event: &StatusEvent) -> io::Result<()> {
        writeln!(self.out, "{event}")?;
        self.out.flush()
    }

    /// Unwrap the output channel.
    pub fn into_inner(self) -> W {
        self.out
    }
}
