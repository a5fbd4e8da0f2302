//! Error types for spl-meter-core.

use std::time::Duration;
use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// HID backend failure (initialization, enumeration).
    #[error("HID error: {0}")]
    Hid(String),

    /// No device matched the vendor/product pair and serial filter.
    #[error("device not found: {0}")]
    NotFound(String),

    /// More than one device matched; a serial number is needed to pick one.
    #[error("found {count} matching devices, specify a serial number to select one")]
    AmbiguousMatch { count: usize },

    /// The selected device could not be opened.
    #[error("failed to open device {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    /// Writing a report failed or wrote the wrong number of bytes.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Reading a report failed at the transport level.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// No complete report arrived within the timeout.
    #[error("timed out after {0:?} waiting for a full report")]
    Timeout(Duration),

    /// A capture exchange failed for a reason other than a timeout.
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// The device did not accept or acknowledge a configuration packet.
    #[error("configuration rejected: {0}")]
    ConfigRejected(String),

    /// Capture was requested on a session that has not been configured.
    #[error("session is not configured")]
    NotConfigured,

    /// Value out of the accepted range.
    #[error("value out of range: {field} = {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    /// Malformed report or label.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a polling loop may continue after this error.
    ///
    /// Only a capture timeout is recoverable; everything else ends the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
