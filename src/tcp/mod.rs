//! TCP client and server endpoints with framed message delivery.
//!
//! Both endpoints share the same post-connect pipeline: an optional TLS
//! handshake, a bounded strictly-ordered send queue feeding a single
//! writer, and a receive loop that reassembles frames through the
//! configured [`Defragmenter`](crate::defrag::Defragmenter).
//!
//! # Client example
//!
//! ```ignore
//! use seine::tcp::{TcpClient, TcpClientConfig};
//! use seine::CancelToken;
//!
//! let config = TcpClientConfig::new("127.0.0.1", 8080).no_delay(true);
//! let client = TcpClient::new(config);
//!
//! client.connected.connect(|peer| {
//!     println!("connected to {}", peer.remote_addr());
//! });
//! client.frame_arrived.connect(|(_, frame)| {
//!     println!("frame: {} bytes", frame.len());
//! });
//!
//! let cancel = CancelToken::new();
//! client.start(&cancel);
//! ```
//!
//! # Server example
//!
//! ```ignore
//! use seine::tcp::{TcpServer, TcpServerConfig};
//! use seine::CancelToken;
//!
//! let server = TcpServer::new(TcpServerConfig::new("0.0.0.0", 8080));
//!
//! server.connected.connect(|peer| {
//!     println!("new peer {}", peer.remote_addr());
//! });
//!
//! let cancel = CancelToken::new();
//! server.start(&cancel);
//! ```

mod client;
mod config;
mod peer;
mod server;
mod state;
mod stream;

pub use client::TcpClient;
pub use config::{
    AddressFilter, ListenerConfigurator, SocketConfigurator, TcpClientConfig, TcpServerConfig,
};
pub use peer::{PeerId, RemotePeer};
pub use server::TcpServer;
pub use state::{CloseReason, TcpClientState, TcpServerState};
