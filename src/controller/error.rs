//! Error types for the controller pipeline.

use thiserror::Error;

/// A raw report that cannot be decoded (`MalformedReport`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("Report too short: {len} bytes, expected at least {expected}")]
    TooShort { len: usize, expected: usize },

    #[error("Report header mismatch at byte {offset}: expected 0x{expected:02x}, found 0x{found:02x}")]
    BadHeader { offset: usize, expected: u8, found: u8 },
}

/// Failure while reading from an open source (`SourceReadError`).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source disconnected: {0}")]
    Disconnected(String),
}

/// Failure reported by a subscriber during dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors that terminate or prevent the ingestion loop.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A required source could not be opened during initialization.
    #[error("Device unavailable: {path}: {source}")]
    DeviceUnavailable {
        path: String,
        #[source]
        source: SourceError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),
}
