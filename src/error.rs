use std::time::Duration;
use thiserror::Error;

/// Failures while establishing a gateway connection.
///
/// Always recoverable: the connection manager logs them and schedules another attempt.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Serial device could not be opened or configured.
    #[error("link error: {0}")]
    Link(String),

    /// TCP peer actively refused the connection.
    #[error("connection refused by {0}")]
    Refused(String),

    /// The transport did not report success or failure in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Any other IO failure during connection setup.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by a bound connection while handing a payload to the gateway.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link is gone (writer task ended or connection closed).
    #[error("gateway link closed")]
    Closed,

    /// No acknowledgment arrived within the configured window.
    #[error("no acknowledgment within {0:?}")]
    AckTimeout(Duration),

    /// Gateway answered with a negative acknowledgment.
    #[error("gateway rejected command: {0}")]
    Rejected(String),

    /// Payload could not be encoded for the wire.
    #[error("cannot encode command: {0}")]
    Encode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to the caller of a device command.
#[derive(Debug, Error)]
pub enum SendError {
    /// No connection is currently bound (disconnected or reconnecting).
    #[error("send failed: no gateway connection")]
    NotConnected,

    #[error("send failed: {0}")]
    Transport(#[from] TransportError),

    /// The logical command is not understood by this device.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),
}

/// Errors while decoding a gateway line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("line too short: {0}")]
    Truncated(String),

    #[error("unexpected node prefix {0:?}")]
    UnknownNode(String),

    #[error("malformed device id {0:?}")]
    BadDeviceId(String),
}
