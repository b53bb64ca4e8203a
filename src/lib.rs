#![warn(missing_docs)]

//! # seine
//!
//! Asynchronous TCP/UDP endpoints with pluggable framing, bounded
//! ordered send queues, signal-based events and cooperative
//! cancellation.
//!
//! The library provides reusable client and server endpoints for custom
//! binary protocols:
//!
//! - **TCP**: accept/connect, optional TLS, a framed receive loop driven
//!   by a pluggable [`Defragmenter`](defrag::Defragmenter), a strictly
//!   ordered bounded send queue per peer, and graceful teardown with a
//!   classified [`CloseReason`](tcp::CloseReason).
//! - **UDP**: connected-client and bound-server datagram endpoints with
//!   per-packet queueing and end-to-end completion signalling.
//!
//! Events are delivered through [`Signal`] fields on each endpoint;
//! every suspending operation observes a [`CancelToken`].
//!
//! # Echo client, length-prefixed frames
//!
//! ```ignore
//! use seine::tcp::{TcpClient, TcpClientConfig};
//! use seine::CancelToken;
//!
//! // Frames carry a 4-byte little-endian total length by default.
//! let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", 8080));
//!
//! client.connected.connect(|peer| {
//!     // 8 = 4-byte header + "ping"
//!     let _ = peer.post(&[8u8, 0, 0, 0, b'p', b'i', b'n', b'g']);
//! });
//! client.frame_arrived.connect(|(_, frame)| {
//!     println!("reply: {:?}", &frame[4..]);
//! });
//!
//! let cancel = CancelToken::new();
//! client.start(&cancel);
//! ```
//!
//! # Custom framing
//!
//! Applications supply framing by implementing
//! [`Defragmenter`](defrag::Defragmenter), or by configuring the
//! built-in [`LengthPrefixedDefragmenter`](defrag::LengthPrefixedDefragmenter)
//! or [`MixedDefragmenter`](defrag::MixedDefragmenter). A peer's
//! protocol can be switched mid-connection with
//! [`RemotePeer::switch_protocol`](tcp::RemotePeer::switch_protocol).

mod buffer;
mod cancel;
mod error;
mod signal;

pub mod defrag;
pub mod queue;
pub mod tcp;
pub mod tls;
pub mod udp;

pub use buffer::BufferView;
pub use cancel::CancelToken;
pub use error::{NetError, Result};
pub use signal::{ConnectionGuard, Signal, SlotId};
