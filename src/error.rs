//! Error types for the latency harness and its WebSocket client transport.
//!
//! Per-client connect failures and trigger failures are distinct variants so a
//! caller can tell a lost client apart from a rejected round.

use thiserror::Error;

use crate::harness::RoundPhase;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while connecting clients, triggering updates or
/// persisting reports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in text frame.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Server sent a masked frame.
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Invalid or reserved opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Connection has been closed.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Invalid WebSocket opening handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake response headers exceed the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes read so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Unexpected Socket.IO / Engine.IO packet.
    #[error("Socket.IO error: {0}")]
    SocketIo(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Endpoint URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// TLS failure, or `wss://` requested without TLS support compiled in.
    #[error("TLS error: {0}")]
    Tls(String),

    /// An operation did not complete in time.
    #[error("Timed out after {millis} ms: {operation}")]
    Timeout {
        /// What was being waited for.
        operation: &'static str,
        /// Configured limit.
        millis: u64,
    },

    /// The trigger endpoint answered with a non-success status.
    #[error("Trigger rejected: HTTP {status}: {body}")]
    TriggerRejected {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The trigger request failed before a response was received.
    #[error("Trigger transport error: {0}")]
    TriggerTransport(String),

    /// No client acknowledged its connection, so no round can be triggered.
    #[error("No clients connected")]
    NoClientsConnected,

    /// Operation is not valid in the current round phase.
    #[error("Cannot {operation} while round is {phase}")]
    InvalidPhase {
        /// Phase the harness was in.
        phase: RoundPhase,
        /// Rejected operation.
        operation: &'static str,
    },

    /// Report could not be serialized, parsed or written.
    #[error("Report error: {0}")]
    Report(String),
}

impl Error {
    /// Whether this error ends a round without a propagation wait.
    #[must_use]
    pub const fn is_trigger_failure(&self) -> bool {
        matches!(
            self,
            Error::TriggerRejected { .. } | Error::TriggerTransport(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::TriggerTransport(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Report(err.to_string())
    }
}
