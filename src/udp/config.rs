//! Configuration and value types for UDP endpoints.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;

/// Callback applied to the socket right after binding.
pub type UdpSocketConfigurator = Arc<dyn Fn(&UdpSocket) + Send + Sync>;

/// Selector over the resolved address list for a UDP client; returning
/// `None` falls back to the first address.
pub type AddressSelector = Arc<dyn Fn(&[SocketAddr]) -> Option<SocketAddr> + Send + Sync>;

/// Configuration for a UDP client (connected socket).
#[derive(Clone)]
pub struct UdpClientConfig {
    /// The host to send to.
    pub host: String,
    /// The port to send to.
    pub port: u16,
    /// Send-queue capacity. `None` means unbounded.
    pub max_send_queue: Option<usize>,
    /// Receive buffer size in bytes.
    pub recv_buffer_size: usize,
    /// Callback invoked on the socket after binding.
    pub configure_socket: Option<UdpSocketConfigurator>,
    /// Selector over the resolved addresses.
    pub select_address: Option<AddressSelector>,
}

impl UdpClientConfig {
    /// Create a new client configuration.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            max_send_queue: None,
            recv_buffer_size: 65535,
            configure_socket: None,
            select_address: None,
        }
    }

    /// Bound the send queue to `capacity` items.
    pub fn max_send_queue(mut self, capacity: usize) -> Self {
        self.max_send_queue = Some(capacity);
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Set a callback applied to the socket after binding.
    pub fn configure_socket<F>(mut self, f: F) -> Self
    where
        F: Fn(&UdpSocket) + Send + Sync + 'static,
    {
        self.configure_socket = Some(Arc::new(f));
        self
    }

    /// Set a selector over the resolved address list.
    pub fn select_address<F>(mut self, f: F) -> Self
    where
        F: Fn(&[SocketAddr]) -> Option<SocketAddr> + Send + Sync + 'static,
    {
        self.select_address = Some(Arc::new(f));
        self
    }

    /// Get the target address string (host:port).
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for UdpClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpClientConfig")
            .field("address", &self.address())
            .field("max_send_queue", &self.max_send_queue)
            .field("recv_buffer_size", &self.recv_buffer_size)
            .finish()
    }
}

/// Configuration for a UDP server (bound socket).
#[derive(Clone)]
pub struct UdpServerConfig {
    /// The address to bind to.
    pub bind_address: String,
    /// The port to bind to. Use 0 for an OS-assigned port.
    pub port: u16,
    /// Send-queue capacity. `None` means unbounded.
    pub max_send_queue: Option<usize>,
    /// Receive buffer size in bytes.
    pub recv_buffer_size: usize,
    /// Callback invoked on the socket after binding.
    pub configure_socket: Option<UdpSocketConfigurator>,
    /// Multicast configuration; groups are joined after bind and left
    /// during teardown.
    pub multicast: MulticastConfig,
}

impl UdpServerConfig {
    /// Create a new server configuration.
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            max_send_queue: None,
            recv_buffer_size: 65535,
            configure_socket: None,
            multicast: MulticastConfig::default(),
        }
    }

    /// Bound the send queue to `capacity` items.
    pub fn max_send_queue(mut self, capacity: usize) -> Self {
        self.max_send_queue = Some(capacity);
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Set a callback applied to the socket after binding.
    pub fn configure_socket<F>(mut self, f: F) -> Self
    where
        F: Fn(&UdpSocket) + Send + Sync + 'static,
    {
        self.configure_socket = Some(Arc::new(f));
        self
    }

    /// Set multicast configuration.
    pub fn multicast_config(mut self, config: MulticastConfig) -> Self {
        self.multicast = config;
        self
    }

    /// Get the bind address string (address:port).
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl std::fmt::Debug for UdpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpServerConfig")
            .field("bind_addr", &self.bind_addr())
            .field("max_send_queue", &self.max_send_queue)
            .field("multicast_groups", &self.multicast.groups.len())
            .finish()
    }
}

/// Configuration for multicast membership.
#[derive(Clone, Debug, Default)]
pub struct MulticastConfig {
    /// Groups to join after bind. Each entry is (multicast_addr,
    /// interface_addr); `None` interface means INADDR_ANY.
    pub groups: Vec<(Ipv4Addr, Option<Ipv4Addr>)>,
    /// Whether to receive own multicast messages.
    pub loopback: bool,
    /// TTL for multicast packets; 0 leaves the OS default.
    pub ttl: u32,
}

impl MulticastConfig {
    /// Create a new empty multicast configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a multicast group to join.
    pub fn join_group(mut self, multicast_addr: Ipv4Addr) -> Self {
        self.groups.push((multicast_addr, None));
        self
    }

    /// Add a multicast group with a specific interface.
    pub fn join_group_on(mut self, multicast_addr: Ipv4Addr, interface: Ipv4Addr) -> Self {
        self.groups.push((multicast_addr, Some(interface)));
        self
    }

    /// Enable or disable multicast loopback.
    pub fn loopback(mut self, enabled: bool) -> Self {
        self.loopback = enabled;
        self
    }

    /// Set the multicast TTL.
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A received datagram with its source address.
#[derive(Clone, Debug)]
pub struct Datagram {
    /// The datagram payload.
    pub data: Bytes,
    /// The source address of the datagram.
    pub source: SocketAddr,
}

impl Datagram {
    /// Create a new datagram.
    pub fn new(data: impl Into<Bytes>, source: SocketAddr) -> Self {
        Self {
            data: data.into(),
            source,
        }
    }
}

/// The end-to-end outcome of one queued datagram send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// The whole datagram was handed to the socket.
    Sent,
    /// A short write: only this many bytes were sent.
    Partial(usize),
    /// The item was cancelled before it reached the socket.
    Cancelled,
    /// The socket reported an error.
    Failed,
}

impl std::fmt::Display for SendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "Sent"),
            Self::Partial(n) => write!(f, "Partial({n})"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}
