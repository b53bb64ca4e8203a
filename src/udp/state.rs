//! State enum for UDP endpoints.

/// Current state of a UDP endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum UdpEndpointState {
    /// Not bound to a socket.
    #[default]
    Unbound,
    /// Binding (and, for clients, resolving/connecting).
    Binding,
    /// Bound and processing datagrams.
    Bound,
    /// The endpoint has shut down.
    Closed,
}

impl std::fmt::Display for UdpEndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbound => write!(f, "Unbound"),
            Self::Binding => write!(f, "Binding"),
            Self::Bound => write!(f, "Bound"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}
