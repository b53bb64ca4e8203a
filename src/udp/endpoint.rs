//! Internals shared by the UDP client and server: the send worker and
//! the receive loop.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

use super::config::{Datagram, SendStatus};
use crate::buffer::BufferView;
use crate::cancel::CancelToken;
use crate::error::NetError;
use crate::queue::SendQueue;
use crate::signal::Signal;

/// One enqueued outgoing datagram.
pub(crate) struct OutgoingDatagram {
    /// Explicit destination; `None` uses the connected target.
    pub target: Option<SocketAddr>,
    pub view: BufferView,
    pub cancel: CancelToken,
    pub completion: Option<oneshot::Sender<SendStatus>>,
}

fn resolve(completion: Option<oneshot::Sender<SendStatus>>, status: SendStatus) {
    if let Some(tx) = completion {
        let _ = tx.send(status);
    }
}

/// Spawn the single send worker over `socket`.
///
/// Each item is written as one datagram. The completion promise is
/// resolved on every path, including errors, so `send` callers never
/// hang on a failed write.
pub(crate) fn spawn_send_worker(
    socket: Arc<UdpSocket>,
    capacity: Option<usize>,
    send_error: Signal<(usize, Option<NetError>)>,
) -> SendQueue<OutgoingDatagram> {
    SendQueue::spawn(capacity, move |item: OutgoingDatagram| {
        let socket = socket.clone();
        let send_error = send_error.clone();
        async move {
            if item.cancel.is_cancelled() {
                resolve(item.completion, SendStatus::Cancelled);
                return;
            }

            let payload = item.view.as_slice();
            let result = match item.target {
                Some(target) => socket.send_to(payload, target).await,
                None => socket.send(payload).await,
            };

            match result {
                Ok(sent) if sent == payload.len() => {
                    resolve(item.completion, SendStatus::Sent);
                }
                Ok(sent) => {
                    send_error.emit((sent, None));
                    resolve(item.completion, SendStatus::Partial(sent));
                }
                Err(e) => {
                    tracing::warn!(target: "seine::udp", error = %e, "datagram send failed");
                    send_error.emit((0, Some(NetError::Io(e.to_string()))));
                    resolve(item.completion, SendStatus::Failed);
                }
            }
        }
    })
}

/// Receive datagrams until `cancel` fires, emitting each through
/// `datagram_received`. Receive errors are reported and the loop
/// continues.
pub(crate) async fn receive_loop(
    socket: &UdpSocket,
    recv_buffer_size: usize,
    cancel: &CancelToken,
    datagram_received: &Signal<Datagram>,
    error: &Signal<NetError>,
) {
    let mut buffer = vec![0u8; recv_buffer_size];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buffer) => match result {
                Ok((len, source)) => {
                    datagram_received.emit(Datagram {
                        data: Bytes::copy_from_slice(&buffer[..len]),
                        source,
                    });
                }
                Err(e) => {
                    error.emit(NetError::Io(e.to_string()));
                }
            }
        }
    }
}
