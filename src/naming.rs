//! Sequence-numbered file naming for handed-off recordings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest number that fits the 7-digit field.
pub const MAX_SEQUENCE: u32 = 9_999_999;

/// Error type for naming operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    /// The counter would no longer fit in seven digits.
    #[error("Sequence exhausted at {0}")]
    Exhausted(u32),
    /// The counter is already out of range.
    #[error("Sequence {0} does not fit in seven digits")]
    OutOfRange(u32),
}

/// `{prefix}_{sequence:07}-{suffix}` naming triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingSequence {
    /// Leading part of every name.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Next number to hand out.
    #[serde(default)]
    pub sequence: u32,
    /// Trailing part of every name.
    #[serde(default = "default_suffix")]
    pub suffix: String,
}

fn default_prefix() -> String {
    "Rig".to_owned()
}

fn default_suffix() -> String {
    "take".to_owned()
}

impl Default for NamingSequence {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            sequence: 0,
            suffix: default_suffix(),
        }
    }
}

impl NamingSequence {
    /// Build a sequence, rejecting counters beyond seven digits.
    pub fn new(prefix: &str, sequence: u32, suffix: &str) -> Result<Self, NamingError> {
        if sequence > MAX_SEQUENCE {
            return Err(NamingError::OutOfRange(sequence));
        }
        Ok(Self {
            prefix: prefix.to_owned(),
            sequence,
            suffix: suffix.to_owned(),
        })
    }

    /// Current name without extension.
    #[must_use]
    pub fn stem(&self) -> String {
        format!("{}_{:07}-{}", self.prefix, self.sequence, self.suffix)
    }

    /// Current name with `ext` (without the dot).
    #[must_use]
    pub fn file_name(&self, ext: &str) -> String {
        if ext.is_empty() {
            self.stem()
        } else {
            format!("{}.{ext}", self.stem())
        }
    }

    /// Whether another name can still be handed out after the current one.
    #[must_use]
    pub const fn can_advance(&self) -> bool {
        self.sequence < MAX_SEQUENCE
    }

    /// Step to the next number and return it.
    pub fn advance(&mut self) -> Result<u32, NamingError> {
        if self.sequence >= MAX_SEQUENCE {
            return Err(NamingError::Exhausted(self.sequence));
        }
        self.sequence += 1;
        Ok(self.sequence)
    }
}
