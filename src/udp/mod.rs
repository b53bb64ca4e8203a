//! UDP client and server endpoints.
//!
//! Datagram endpoints are one-to-one with socket calls; the library adds
//! no framing and no reliability on top of UDP. Outgoing datagrams flow
//! through a bounded ordered send queue, and `send` resolves to the true
//! end-to-end [`SendStatus`] of the write.
//!
//! # Client example
//!
//! ```ignore
//! use seine::udp::{UdpClient, UdpClientConfig};
//! use seine::CancelToken;
//!
//! let client = UdpClient::new(UdpClientConfig::new("127.0.0.1", 5000));
//!
//! client.ready.connect(|target| {
//!     println!("ready, sending to {}", target);
//! });
//! client.datagram_received.connect(|datagram| {
//!     println!("{} bytes from {}", datagram.data.len(), datagram.source);
//! });
//!
//! let cancel = CancelToken::new();
//! client.start(&cancel);
//! ```
//!
//! # Multicast example
//!
//! ```ignore
//! use seine::udp::{MulticastConfig, UdpServer, UdpServerConfig};
//!
//! let group = "239.255.0.1".parse().unwrap();
//! let config = UdpServerConfig::new("0.0.0.0", 5000)
//!     .multicast_config(MulticastConfig::new().join_group(group).loopback(true));
//! let server = UdpServer::new(config);
//! ```

mod client;
mod config;
mod endpoint;
mod server;
mod state;

pub use client::UdpClient;
pub use config::{
    AddressSelector, Datagram, MulticastConfig, SendStatus, UdpClientConfig, UdpServerConfig,
    UdpSocketConfigurator,
};
pub use server::UdpServer;
pub use state::UdpEndpointState;
