//! Error types
//!
//! [`ErrorKind`] is the fixed set of failures a session can end in.
//! [`Error`] and [`FastbootError`] carry the underlying cause.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session-level failure classification shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Unclassified failure, including a manifest that could not be loaded
    Unknown,
    UnrecognizedDevice,
    /// Device detached before recognition completed
    LostConnection,
    DownloadFailed,
    UnpackFailed,
    ChecksumMismatch,
    /// Invalid current slot or any command failure while flashing
    FlashFailed,
    EraseFailed,
    RequirementsNotMet,
}

impl ErrorKind {
    /// Short status line for the presentation layer
    pub fn status(self) -> &'static str {
        match self {
            ErrorKind::Unknown => "Something went wrong",
            ErrorKind::UnrecognizedDevice => "Unrecognized device",
            ErrorKind::LostConnection => "Lost connection",
            ErrorKind::DownloadFailed => "Download failed",
            ErrorKind::UnpackFailed => "Unpack failed",
            ErrorKind::ChecksumMismatch => "Download mismatch",
            ErrorKind::FlashFailed => "Flash failed",
            ErrorKind::EraseFailed => "Erase failed",
            ErrorKind::RequirementsNotMet => "Requirements not met",
        }
    }

    /// Longer description of what went wrong and what to try
    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::Unknown => {
                "An unknown error occurred. Unplug your device and wait for 20s. Restart and try again."
            }
            ErrorKind::UnrecognizedDevice => {
                "The device connected is not the expected device. Check the cable and try again."
            }
            ErrorKind::LostConnection => {
                "The connection to your device was lost. Unplug your device and try again."
            }
            ErrorKind::DownloadFailed => {
                "The system image could not be downloaded. Check your internet connection and try again."
            }
            ErrorKind::UnpackFailed => {
                "The system image could not be unpacked. Free up disk space and try again."
            }
            ErrorKind::ChecksumMismatch => {
                "The system image is corrupted. Clear the image cache and try again."
            }
            ErrorKind::FlashFailed => {
                "Ensure your device is connected directly with a working cable, then try again."
            }
            ErrorKind::EraseFailed => {
                "The device could not be erased. Reconnect your device and try again."
            }
            ErrorKind::RequirementsNotMet => {
                "This system is missing USB access, background workers or persistent storage."
            }
        }
    }
}

/// Failures reported by a fastboot transport
#[derive(Debug, Error)]
pub enum FastbootError {
    #[error("Device disconnected")]
    Disconnected,

    #[error("Command '{command}' failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Internal errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("Requirement not met: {0}")]
    RequirementsNotMet(&'static str),

    #[error("Manifest contains no images")]
    EmptyManifest,

    #[error("Failed to parse manifest: {0}")]
    ManifestFormat(#[from] serde_json::Error),

    #[error("Manifest request failed with status: {0}")]
    ManifestStatus(reqwest::StatusCode),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Session is already running")]
    AlreadyRunning,

    #[error("Invalid slot: '{0}'")]
    InvalidSlot(String),

    #[error(transparent)]
    Fastboot(#[from] FastbootError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorKind::UnrecognizedDevice).unwrap();
        assert_eq!(json, "\"UNRECOGNIZED_DEVICE\"");
        let kind: ErrorKind = serde_json::from_str("\"CHECKSUM_MISMATCH\"").unwrap();
        assert_eq!(kind, ErrorKind::ChecksumMismatch);
    }

    #[test]
    fn test_fastboot_error_messages() {
        let err = FastbootError::Command {
            command: "erase:userdata".to_string(),
            reason: "partition locked".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command 'erase:userdata' failed: partition locked"
        );
        assert_eq!(
            Error::from(FastbootError::Disconnected).to_string(),
            "Device disconnected"
        );
    }
}
