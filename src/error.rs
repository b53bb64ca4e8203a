//! Error types for the library.

use std::fmt;

/// Errors reported by endpoints, peers and defragmenters.
#[derive(Debug, Clone)]
pub enum NetError {
    /// Connect, accept, bind or name-resolution failure.
    Connection(String),
    /// Stream or datagram I/O failure.
    Io(String),
    /// TLS handshake or certificate failure.
    Tls(String),
    /// A defragmenter raised an error the engine could not classify.
    Protocol(String),
    /// A receive cycle exceeded the configured connection timeout.
    Timeout,
    /// The operation was cancelled through a [`CancelToken`](crate::CancelToken).
    Cancelled,
    /// A buffer view was constructed with an out-of-range window.
    InvalidBuffer(String),
    /// The send queue was completed before the item could be enqueued.
    QueueClosed,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "Connection error: {msg}"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::Tls(msg) => write!(f, "TLS error: {msg}"),
            Self::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            Self::Timeout => write!(f, "Receive timed out"),
            Self::Cancelled => write!(f, "Operation was cancelled"),
            Self::InvalidBuffer(msg) => write!(f, "Invalid buffer view: {msg}"),
            Self::QueueClosed => write!(f, "Send queue is closed"),
        }
    }
}

impl std::error::Error for NetError {}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// A specialized Result type for network operations.
pub type Result<T> = std::result::Result<T, NetError>;
