//! External audio tool contract.
//!
//! # Responsibility
//! - Define the seam through which cell merges combine two recordings.
//! - Classify tool failures so callers can degrade instead of aborting.
//!
//! # Invariants
//! - Core never runs the tool itself; implementations live with the host.
//! - Audio failures never roll back text/metadata changes.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Audio tool failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioToolError {
    /// Tool is not installed or not configured.
    Unavailable(String),
    /// Tool ran and failed.
    Failed(String),
}

impl Display for AudioToolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "audio tool unavailable: {message}"),
            Self::Failed(message) => write!(f, "audio tool failed: {message}"),
        }
    }
}

impl Error for AudioToolError {}

/// Concatenates two recordings into `destination`.
///
/// Paths are the attachments' project-relative urls; resolving them against
/// a project root is the implementation's job.
pub trait AudioConcatenator {
    fn concat(&self, first: &Path, second: &Path, destination: &Path)
        -> Result<(), AudioToolError>;
}

/// Stand-in used when no tool is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAudioTool;

impl AudioConcatenator for NoAudioTool {
    fn concat(&self, _: &Path, _: &Path, _: &Path) -> Result<(), AudioToolError> {
        Err(AudioToolError::Unavailable(
            "no audio tool configured".to_string(),
        ))
    }
}

/// Audio half of a cell merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AudioMergeStatus {
    /// At most one of the cells had usable audio.
    NotNeeded,
    /// Combined recording attached to and selected on the previous cell.
    Merged { attachment_id: String },
    /// Tool unavailable; text merge completed without audio.
    Skipped { reason: String },
    /// Tool failed; text merge completed without audio.
    Failed { reason: String },
}

impl From<AudioToolError> for AudioMergeStatus {
    fn from(value: AudioToolError) -> Self {
        match value {
            AudioToolError::Unavailable(reason) => Self::Skipped { reason },
            AudioToolError::Failed(reason) => Self::Failed { reason },
        }
    }
}
