//! Error types for the serial line channel, configuration and upload flows

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result alias for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Failures raised by [`SerialLineChannel`](crate::serial::SerialLineChannel)
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The device could not be opened (missing, busy, permission denied)
    #[error("failed to open serial port {device}: {source}")]
    Connection {
        device: String,
        #[source]
        source: serialport::Error,
    },

    /// The peer never sent its ready line
    #[error("no handshake from {device} within {timeout:?}")]
    HandshakeTimeout { device: String, timeout: Duration },

    /// Writing to the port failed, or the channel is already closed
    #[error("failed to write to {device}: {source}")]
    Write {
        device: String,
        #[source]
        source: io::Error,
    },

    /// Reading from the port failed for a reason other than a timeout
    #[error("failed to read from {device}: {source}")]
    Read {
        device: String,
        #[source]
        source: io::Error,
    },

    /// Payload contains the line delimiter or ends in a carriage return
    #[error("payload contains a newline or ends in '\\r': {0:?}")]
    InvalidPayload(String),

    /// The peer sent more than the line limit without a delimiter
    #[error("line from {device} exceeds {limit} bytes without a newline")]
    LineTooLong { device: String, limit: usize },

    #[error("invalid channel state: {0}")]
    InvalidState(&'static str),

    #[error("serial channel is closed")]
    Closed,

    /// A pending read was aborted through a [`CancelToken`](crate::serial::CancelToken)
    #[error("operation cancelled")]
    Cancelled,
}

impl ChannelError {
    /// True for errors raised by the cancellation token rather than the port
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChannelError::Cancelled)
    }
}

/// Configuration loading and validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Firmware upload failures
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no [upload] section in configuration")]
    NotConfigured,

    #[error("failed to start upload tool {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("upload tool exited with {status}")]
    ToolFailed { status: std::process::ExitStatus },

    #[error("upload tool did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("{device} not ready within {timeout:?} after upload")]
    PortNotReady { device: String, timeout: Duration },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}
