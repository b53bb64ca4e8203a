//! Configuration types for TCP client and server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::defrag::{
    Defragmenter, DefragmenterFactory, LengthPrefixedDefragmenter, DEFAULT_MAX_FRAME_LEN,
};
use crate::tls::{ServerTlsConfig, TlsConfig};

/// Callback applied to a freshly connected or accepted socket, before
/// any TLS wrapping.
pub type SocketConfigurator = Arc<dyn Fn(&TcpStream) + Send + Sync>;

/// Callback applied to the server's listener right after binding.
pub type ListenerConfigurator = Arc<dyn Fn(&TcpListener) + Send + Sync>;

/// Filter over the resolved address list; connecting proceeds through
/// the returned addresses in order. An empty result falls back to a
/// direct host:port connect.
pub type AddressFilter = Arc<dyn Fn(Vec<SocketAddr>) -> Vec<SocketAddr> + Send + Sync>;

fn default_defragmenter() -> DefragmenterFactory {
    Arc::new(|| {
        Box::new(LengthPrefixedDefragmenter::u32_le(DEFAULT_MAX_FRAME_LEN))
            as Box<dyn Defragmenter>
    })
}

/// Configuration for a TCP client.
#[derive(Clone)]
pub struct TcpClientConfig {
    /// The host to connect to.
    pub host: String,
    /// The port to connect to.
    pub port: u16,
    /// Dial timeout. `None` disables it.
    pub connect_timeout: Option<Duration>,
    /// Per-receive-cycle timeout: the connection is closed with reason
    /// `Timeout` if no frame activity completes a cycle within this
    /// duration. `None` disables it.
    pub connection_timeout: Option<Duration>,
    /// Send-queue capacity. `None` means unbounded.
    pub max_send_queue: Option<usize>,
    /// Enable TCP_NODELAY (disable Nagle's algorithm).
    pub no_delay: bool,
    /// Callback invoked on the connected socket before any TLS wrap.
    pub configure_socket: Option<SocketConfigurator>,
    /// Filter over resolved addresses.
    pub filter_addresses: Option<AddressFilter>,
    /// TLS configuration. `None` keeps the connection in plaintext.
    pub tls: Option<TlsConfig>,
    /// Factory for the peer's initial frame defragmenter.
    pub defragmenter: DefragmenterFactory,
}

impl TcpClientConfig {
    /// Create a new client configuration.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Some(Duration::from_secs(30)),
            connection_timeout: None,
            max_send_queue: None,
            no_delay: false,
            configure_socket: None,
            filter_addresses: None,
            tls: None,
            defragmenter: default_defragmenter(),
        }
    }

    /// Set the dial timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Disable the dial timeout.
    pub fn no_connect_timeout(mut self) -> Self {
        self.connect_timeout = None;
        self
    }

    /// Set the per-receive-cycle timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Bound the send queue to `capacity` items.
    pub fn max_send_queue(mut self, capacity: usize) -> Self {
        self.max_send_queue = Some(capacity);
        self
    }

    /// Enable TCP_NODELAY.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    /// Set a callback applied to the socket after connect.
    pub fn configure_socket<F>(mut self, f: F) -> Self
    where
        F: Fn(&TcpStream) + Send + Sync + 'static,
    {
        self.configure_socket = Some(Arc::new(f));
        self
    }

    /// Set a filter over the resolved address list.
    pub fn filter_addresses<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<SocketAddr>) -> Vec<SocketAddr> + Send + Sync + 'static,
    {
        self.filter_addresses = Some(Arc::new(f));
        self
    }

    /// Enable TLS with the given configuration.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set the factory for the peer's initial defragmenter.
    pub fn defragmenter(mut self, factory: DefragmenterFactory) -> Self {
        self.defragmenter = factory;
        self
    }

    /// Get the address string (host:port).
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for TcpClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClientConfig")
            .field("address", &self.address())
            .field("connect_timeout", &self.connect_timeout)
            .field("connection_timeout", &self.connection_timeout)
            .field("max_send_queue", &self.max_send_queue)
            .field("no_delay", &self.no_delay)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Configuration for a TCP server.
#[derive(Clone)]
pub struct TcpServerConfig {
    /// The address to bind to.
    pub bind_address: String,
    /// The port to listen on. Use 0 for an OS-assigned port.
    pub port: u16,
    /// Per-receive-cycle timeout for every accepted peer.
    pub connection_timeout: Option<Duration>,
    /// Send-queue capacity per peer. `None` means unbounded.
    pub max_send_queue_per_peer: Option<usize>,
    /// Enable TCP_NODELAY on accepted connections.
    pub no_delay: bool,
    /// Callback invoked on accepted sockets before any TLS wrap.
    pub configure_socket: Option<SocketConfigurator>,
    /// Callback invoked on the listener after binding.
    pub configure_listener: Option<ListenerConfigurator>,
    /// TLS configuration. `None` keeps connections in plaintext.
    pub tls: Option<ServerTlsConfig>,
    /// Factory for each peer's initial frame defragmenter.
    pub defragmenter: DefragmenterFactory,
}

impl TcpServerConfig {
    /// Create a new server configuration.
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            connection_timeout: None,
            max_send_queue_per_peer: None,
            no_delay: false,
            configure_socket: None,
            configure_listener: None,
            tls: None,
            defragmenter: default_defragmenter(),
        }
    }

    /// Set the per-receive-cycle timeout for accepted peers.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Bound each peer's send queue to `capacity` items.
    pub fn max_send_queue_per_peer(mut self, capacity: usize) -> Self {
        self.max_send_queue_per_peer = Some(capacity);
        self
    }

    /// Enable TCP_NODELAY for accepted connections.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    /// Set a callback applied to each accepted socket.
    pub fn configure_socket<F>(mut self, f: F) -> Self
    where
        F: Fn(&TcpStream) + Send + Sync + 'static,
    {
        self.configure_socket = Some(Arc::new(f));
        self
    }

    /// Set a callback applied to the listener after binding.
    pub fn configure_listener<F>(mut self, f: F) -> Self
    where
        F: Fn(&TcpListener) + Send + Sync + 'static,
    {
        self.configure_listener = Some(Arc::new(f));
        self
    }

    /// Enable TLS with the given configuration.
    pub fn tls(mut self, tls: ServerTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set the factory for each peer's initial defragmenter.
    pub fn defragmenter(mut self, factory: DefragmenterFactory) -> Self {
        self.defragmenter = factory;
        self
    }

    /// Get the bind address string (address:port).
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl std::fmt::Debug for TcpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServerConfig")
            .field("bind_addr", &self.bind_addr())
            .field("connection_timeout", &self.connection_timeout)
            .field("max_send_queue_per_peer", &self.max_send_queue_per_peer)
            .field("no_delay", &self.no_delay)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}
