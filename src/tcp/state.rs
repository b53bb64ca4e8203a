//! State enums for TCP endpoints and the close-reason taxonomy.

/// Current state of a TCP client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TcpClientState {
    /// Not connected to any server.
    #[default]
    Disconnected,
    /// Resolving and connecting.
    Connecting,
    /// Connected; the peer is live.
    Connected,
    /// The engine is tearing down.
    Closing,
}

impl std::fmt::Display for TcpClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Closing => write!(f, "Closing"),
        }
    }
}

/// Current state of a TCP server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TcpServerState {
    /// Server is not running.
    #[default]
    Stopped,
    /// Server is starting up.
    Starting,
    /// Server is listening for connections.
    Listening,
    /// Server is shutting down.
    Stopping,
}

impl std::fmt::Display for TcpServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Starting => write!(f, "Starting"),
            Self::Listening => write!(f, "Listening"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

/// The classified cause of a peer's termination.
///
/// Latched exactly once per peer; the first writer wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CloseReason {
    /// No classification was possible.
    #[default]
    Unknown,
    /// The remote endpoint closed the stream.
    RemoteShutdown,
    /// This endpoint disconnected or was stopped.
    LocalShutdown,
    /// A receive cycle exceeded the configured connection timeout.
    Timeout,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::RemoteShutdown => write!(f, "RemoteShutdown"),
            Self::LocalShutdown => write!(f, "LocalShutdown"),
            Self::Timeout => write!(f, "Timeout"),
        }
    }
}
