//! Remote peers: one live TCP connection and its receive/teardown loop.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};

use super::state::CloseReason;
use super::stream::MaybeTlsStream;
use crate::buffer::BufferView;
use crate::cancel::CancelToken;
use crate::defrag::{Defragmenter, DefragmenterFactory, ReadOutcome};
use crate::error::{NetError, Result};
use crate::queue::SendQueue;
use crate::signal::Signal;

/// Unique identifier for a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerId(u64);

impl PeerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// One enqueued outgoing buffer.
pub(crate) struct OutgoingFrame {
    view: BufferView,
    peer_cancel: CancelToken,
    caller_cancel: Option<CancelToken>,
}

impl OutgoingFrame {
    fn is_cancelled(&self) -> bool {
        self.peer_cancel.is_cancelled()
            || self
                .caller_cancel
                .as_ref()
                .is_some_and(|token| token.is_cancelled())
    }
}

/// A live TCP connection.
///
/// Created by the client engine after connecting, or by the server
/// engine for every accepted socket. Outgoing buffers go through a
/// strictly ordered send queue with a single writer; incoming bytes are
/// reassembled into frames by the peer's current defragmenter.
///
/// # Signals
///
/// - [`frame_arrived`](Self::frame_arrived): a frame was reassembled
/// - [`closed`](Self::closed): the connection ended, with its close reason
/// - [`error`](Self::error): a transport error on this peer
pub struct RemotePeer {
    id: PeerId,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    queue: SendQueue<OutgoingFrame>,
    cancel: CancelToken,
    close_reason: Arc<OnceLock<CloseReason>>,
    pending_defrag: Mutex<Option<DefragmenterFactory>>,
    attachment: Mutex<Option<Box<dyn Any + Send>>>,
    connected: AtomicBool,

    /// Signal emitted when a frame is reassembled from the stream.
    pub frame_arrived: Signal<Bytes>,
    /// Signal emitted exactly once when the connection ends.
    pub closed: Signal<CloseReason>,
    /// Signal emitted on a transport error affecting this peer.
    pub error: Signal<NetError>,
}

impl RemotePeer {
    /// Build a peer over the write half of an established stream.
    ///
    /// The send-queue worker captures only the write half, the error
    /// signal and cancellation state, never the peer itself.
    pub(crate) fn new(
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        write_half: WriteHalf<MaybeTlsStream>,
        max_send_queue: Option<usize>,
        engine_cancel: &CancelToken,
    ) -> Arc<Self> {
        let cancel = engine_cancel.child();
        let close_reason: Arc<OnceLock<CloseReason>> = Arc::new(OnceLock::new());
        let error = Signal::new();

        let writer = Arc::new(tokio::sync::Mutex::new(write_half));
        let worker_error = error.clone();
        let worker_reason = close_reason.clone();
        let worker_cancel = cancel.clone();

        let queue = SendQueue::spawn(max_send_queue, move |item: OutgoingFrame| {
            let writer = writer.clone();
            let errors = worker_error.clone();
            let reason = worker_reason.clone();
            let token = worker_cancel.clone();
            async move {
                if item.is_cancelled() {
                    return;
                }
                let mut writer = writer.lock().await;
                let result = match writer.write_all(item.view.as_slice()).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    errors.emit(NetError::Io(e.to_string()));
                    let _ = reason.set(CloseReason::Unknown);
                    token.cancel();
                }
            }
        });

        Arc::new(Self {
            id: PeerId::new(),
            remote_addr,
            local_addr,
            queue,
            cancel,
            close_reason,
            pending_defrag: Mutex::new(None),
            attachment: Mutex::new(None),
            connected: AtomicBool::new(true),
            frame_arrived: Signal::new(),
            closed: Signal::new(),
            error,
        })
    }

    /// The unique peer id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// The remote endpoint's address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The local address of the connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the connection is still live.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Enqueue a buffer without waiting.
    ///
    /// Returns `false` when the send queue is at capacity or the peer is
    /// closed. Buffers accepted here are written to the stream strictly
    /// in acceptance order.
    pub fn post(&self, data: impl Into<BufferView>) -> bool {
        self.queue.try_post(OutgoingFrame {
            view: data.into(),
            peer_cancel: self.cancel.clone(),
            caller_cancel: None,
        })
    }

    /// Enqueue a buffer, waiting for queue capacity.
    ///
    /// Returns `Ok(true)` once enqueued, or `Ok(false)` if the peer shut
    /// down before a slot opened.
    pub async fn send(&self, data: impl Into<BufferView>) -> Result<bool> {
        let item = OutgoingFrame {
            view: data.into(),
            peer_cancel: self.cancel.clone(),
            caller_cancel: None,
        };
        self.queue.send(item, None, &self.cancel).await
    }

    /// Enqueue a buffer, waiting for queue capacity, with a caller
    /// cancellation token.
    ///
    /// Fails with [`NetError::Cancelled`] if `cancel` fires while the
    /// peer is still live; a peer shutting down yields a benign
    /// `Ok(false)` instead.
    pub async fn send_with_cancel(
        &self,
        data: impl Into<BufferView>,
        cancel: &CancelToken,
    ) -> Result<bool> {
        let item = OutgoingFrame {
            view: data.into(),
            peer_cancel: self.cancel.clone(),
            caller_cancel: Some(cancel.clone()),
        };
        self.queue.send(item, Some(cancel), &self.cancel).await
    }

    /// Close the connection, recording `reason` as its close reason.
    ///
    /// Only the first recorded reason survives; repeated calls are
    /// harmless. The receive loop observes the cancellation and unwinds,
    /// emitting [`closed`](Self::closed) exactly once.
    pub fn disconnect(&self, reason: CloseReason) {
        let _ = self.close_reason.set(reason);
        self.cancel.cancel();
    }

    /// Replace the peer's defragmenter with one produced by `factory`.
    ///
    /// Takes effect at the start of the next receive cycle; a read
    /// already in progress is not interrupted. Leftover bytes buffered
    /// by the previous defragmenter are discarded at the switch.
    pub fn switch_protocol(&self, factory: DefragmenterFactory) {
        *self.pending_defrag.lock() = Some(factory);
    }

    /// Attach an opaque resource to this peer. It is dropped when the
    /// peer is torn down. Any previous attachment is returned.
    pub fn attach(&self, resource: Box<dyn Any + Send>) -> Option<Box<dyn Any + Send>> {
        self.attachment.lock().replace(resource)
    }

    /// Remove and return the attachment, if any.
    pub fn take_attachment(&self) -> Option<Box<dyn Any + Send>> {
        self.attachment.lock().take()
    }

    /// The close reason latched so far; `Unknown` while still open.
    pub fn close_reason(&self) -> CloseReason {
        self.close_reason.get().copied().unwrap_or_default()
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn latch_close_reason(&self, reason: CloseReason) {
        let _ = self.close_reason.set(reason);
    }

    fn take_pending_defragmenter(&self) -> Option<DefragmenterFactory> {
        self.pending_defrag.lock().take()
    }
}

impl std::fmt::Debug for RemotePeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePeer")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Engine-level signal handles shared with each connection task.
#[derive(Clone)]
pub(crate) struct EngineEvents {
    pub connected: Signal<Arc<RemotePeer>>,
    pub connection_closed: Signal<(PeerId, CloseReason)>,
    pub frame_arrived: Signal<(PeerId, Bytes)>,
    pub unhandled_error: Signal<NetError>,
}

/// Per-connection settings shared by the client and server engines.
#[derive(Clone)]
pub(crate) struct ConnectionSettings {
    pub connection_timeout: Option<Duration>,
    pub max_send_queue: Option<usize>,
    pub defragmenter: DefragmenterFactory,
}

/// The post-connect path shared by client and server: construct the
/// peer, run the receive loop, tear down.
///
/// Returns the peer id and the close reason it terminated with. The
/// close reason is always latched before any `closed` signal fires.
pub(crate) async fn run_connection(
    stream: MaybeTlsStream,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    settings: ConnectionSettings,
    events: EngineEvents,
    engine_cancel: &CancelToken,
    on_connected: impl FnOnce(&Arc<RemotePeer>),
) -> (PeerId, CloseReason) {
    let (mut read_half, write_half) = tokio::io::split(stream);

    let peer = RemotePeer::new(
        remote_addr,
        local_addr,
        write_half,
        settings.max_send_queue,
        engine_cancel,
    );

    tracing::debug!(target: "seine::tcp", peer = %peer.id(), remote = %remote_addr, "connection established");
    on_connected(&peer);
    events.connected.emit(peer.clone());

    let defrag = (settings.defragmenter)();
    receive_loop(
        &peer,
        &mut read_half,
        defrag,
        settings.connection_timeout,
        &events,
    )
    .await;

    let reason = peer.close_reason();
    peer.connected.store(false, Ordering::SeqCst);

    tracing::debug!(target: "seine::tcp", peer = %peer.id(), %reason, "connection closed");
    peer.closed.emit(reason);
    events.connection_closed.emit((peer.id(), reason));

    peer.queue.complete();
    drop(peer.take_attachment());
    drop(read_half);

    (peer.id(), reason)
}

/// Drive the peer's defragmenter until the stream closes, a timeout
/// elapses, cancellation fires, or the defragmenter errors.
///
/// Every exit path latches a close reason; a reason already latched by
/// `disconnect` wins.
async fn receive_loop(
    peer: &Arc<RemotePeer>,
    read_half: &mut ReadHalf<MaybeTlsStream>,
    mut defrag: Box<dyn Defragmenter>,
    timeout: Option<Duration>,
    events: &EngineEvents,
) {
    let mut carry = BytesMut::with_capacity(8 * 1024);

    loop {
        if peer.cancel_token().is_cancelled() {
            peer.latch_close_reason(CloseReason::LocalShutdown);
            return;
        }

        // A protocol switch takes effect here, never mid-read.
        if let Some(factory) = peer.take_pending_defragmenter() {
            defrag = factory();
            carry.clear();
        }

        let read = defrag.read_frame(read_half, &mut carry, peer.cancel_token());
        let outcome = match timeout {
            Some(duration) => match tokio::time::timeout(duration, read).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    peer.latch_close_reason(CloseReason::Timeout);
                    return;
                }
            },
            None => read.await,
        };

        match outcome {
            Ok(ReadOutcome::Frame(frame)) => {
                let mut panicked = peer.frame_arrived.emit(frame.clone());
                panicked += events.frame_arrived.emit((peer.id(), frame));
                if panicked > 0 {
                    events.unhandled_error.emit(NetError::Protocol(format!(
                        "{panicked} frame handler(s) panicked"
                    )));
                }
            }
            Ok(ReadOutcome::Dropped) => {
                carry.clear();
            }
            Ok(ReadOutcome::StreamClosed) => {
                peer.latch_close_reason(CloseReason::RemoteShutdown);
                return;
            }
            Err(NetError::Cancelled) => {
                peer.latch_close_reason(CloseReason::LocalShutdown);
                return;
            }
            Err(err @ NetError::Io(_)) => {
                peer.error.emit(err);
                peer.latch_close_reason(CloseReason::Unknown);
                return;
            }
            Err(err) => {
                let wrapped = match err {
                    NetError::Protocol(_) => err,
                    other => NetError::Protocol(other.to_string()),
                };
                events.unhandled_error.emit(wrapped);
                peer.latch_close_reason(CloseReason::Unknown);
                return;
            }
        }
    }
}
