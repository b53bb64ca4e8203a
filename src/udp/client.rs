//! UDP client endpoint (connected socket).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

use super::config::{Datagram, SendStatus, UdpClientConfig};
use super::endpoint::{receive_loop, spawn_send_worker, OutgoingDatagram};
use super::state::UdpEndpointState;
use crate::buffer::BufferView;
use crate::cancel::CancelToken;
use crate::error::{NetError, Result};
use crate::queue::SendQueue;
use crate::signal::Signal;

struct UdpClientInner {
    state: UdpEndpointState,
    local_addr: Option<SocketAddr>,
    target: Option<SocketAddr>,
}

/// A UDP client over a connected socket.
///
/// The client resolves its target, connects the socket to the selected
/// address, and then exchanges datagrams one-to-one with socket calls;
/// the library adds no framing or reliability on top of UDP. Outgoing
/// datagrams flow through a bounded ordered send queue;
/// [`send`](Self::send) resolves to the true end-to-end [`SendStatus`]
/// of the write.
///
/// # Signals
///
/// - [`started`](Self::started) / [`stopped`](Self::stopped): engine lifecycle
/// - [`ready`](Self::ready): the socket is connected to the target
/// - [`datagram_received`](Self::datagram_received): a datagram arrived
/// - [`send_error`](Self::send_error): a short or failed send, as
///   `(bytes_sent, error)`
/// - [`error`](Self::error): resolution, bind or receive errors
pub struct UdpClient {
    config: UdpClientConfig,
    inner: Arc<Mutex<UdpClientInner>>,
    engine_cancel: Mutex<Option<CancelToken>>,
    queue: Arc<Mutex<Option<SendQueue<OutgoingDatagram>>>>,
    is_running: Arc<AtomicBool>,

    /// Signal emitted when the engine starts.
    pub started: Signal<()>,
    /// Signal emitted when the engine stops, after teardown.
    pub stopped: Signal<()>,
    /// Signal emitted once the socket is connected, with the target address.
    pub ready: Signal<SocketAddr>,
    /// Signal emitted on resolution, bind or receive errors.
    pub error: Signal<NetError>,
    /// Signal emitted when a datagram arrives.
    pub datagram_received: Signal<Datagram>,
    /// Signal emitted on a short or failed send: `(bytes_sent, error)`.
    pub send_error: Signal<(usize, Option<NetError>)>,
}

impl UdpClient {
    /// Create a new UDP client with the given configuration.
    pub fn new(config: UdpClientConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(UdpClientInner {
                state: UdpEndpointState::Unbound,
                local_addr: None,
                target: None,
            })),
            engine_cancel: Mutex::new(None),
            queue: Arc::new(Mutex::new(None)),
            is_running: Arc::new(AtomicBool::new(false)),
            started: Signal::new(),
            stopped: Signal::new(),
            ready: Signal::new(),
            error: Signal::new(),
            datagram_received: Signal::new(),
            send_error: Signal::new(),
        }
    }

    /// Get the current endpoint state.
    pub fn state(&self) -> UdpEndpointState {
        self.inner.lock().state
    }

    /// Whether the socket is connected and processing datagrams.
    pub fn is_ready(&self) -> bool {
        self.inner.lock().state == UdpEndpointState::Bound
    }

    /// The local address after binding.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().local_addr
    }

    /// The connected target address, once resolved.
    pub fn target_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().target
    }

    /// Start the engine. Must be called within a tokio runtime.
    ///
    /// A no-op if already running.
    pub fn start(&self, cancel: &CancelToken) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let engine = cancel.child();
        *self.engine_cancel.lock() = Some(engine.clone());

        let config = self.config.clone();
        let inner = self.inner.clone();
        let queue_slot = self.queue.clone();
        let is_running = self.is_running.clone();

        let started = self.started.clone();
        let stopped = self.stopped.clone();
        let ready = self.ready.clone();
        let error = self.error.clone();
        let datagram_received = self.datagram_received.clone();
        let send_error = self.send_error.clone();

        tokio::spawn(async move {
            inner.lock().state = UdpEndpointState::Binding;
            tracing::info!(target: "seine::udp", address = %config.address(), "udp client starting");
            started.emit(());

            Self::run(
                &config,
                &inner,
                &queue_slot,
                &engine,
                &ready,
                &error,
                &datagram_received,
                &send_error,
            )
            .await;

            if let Some(queue) = queue_slot.lock().take() {
                queue.complete();
            }
            {
                let mut guard = inner.lock();
                guard.state = UdpEndpointState::Closed;
                guard.local_addr = None;
                guard.target = None;
            }
            is_running.store(false, Ordering::SeqCst);
            stopped.emit(());
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        config: &UdpClientConfig,
        inner: &Arc<Mutex<UdpClientInner>>,
        queue_slot: &Arc<Mutex<Option<SendQueue<OutgoingDatagram>>>>,
        engine: &CancelToken,
        ready: &Signal<SocketAddr>,
        error: &Signal<NetError>,
        datagram_received: &Signal<Datagram>,
        send_error: &Signal<(usize, Option<NetError>)>,
    ) {
        let resolved: Vec<SocketAddr> = tokio::select! {
            _ = engine.cancelled() => return,
            res = tokio::net::lookup_host((config.host.as_str(), config.port)) => match res {
                Ok(addrs) => addrs.collect(),
                Err(e) => {
                    error.emit(NetError::Connection(format!(
                        "Failed to resolve {}: {}",
                        config.host, e
                    )));
                    return;
                }
            }
        };

        let target = match &config.select_address {
            Some(select) => select(&resolved).or_else(|| resolved.first().copied()),
            None => resolved.first().copied(),
        };
        let target = match target {
            Some(addr) => addr,
            None => {
                error.emit(NetError::Connection(format!(
                    "{} resolved to no addresses",
                    config.host
                )));
                return;
            }
        };

        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = match UdpSocket::bind(bind_addr).await {
            Ok(socket) => socket,
            Err(e) => {
                error.emit(NetError::Connection(format!("Failed to bind: {}", e)));
                return;
            }
        };

        if let Some(configure) = &config.configure_socket {
            configure(&socket);
        }

        if let Err(e) = socket.connect(target).await {
            error.emit(NetError::Connection(format!(
                "Failed to connect to {}: {}",
                target, e
            )));
            return;
        }

        let local_addr = socket.local_addr().ok();
        let socket = Arc::new(socket);

        *queue_slot.lock() = Some(spawn_send_worker(
            socket.clone(),
            config.max_send_queue,
            send_error.clone(),
        ));

        {
            let mut guard = inner.lock();
            guard.state = UdpEndpointState::Bound;
            guard.local_addr = local_addr;
            guard.target = Some(target);
        }
        tracing::debug!(target: "seine::udp", %target, "udp client ready");
        ready.emit(target);

        receive_loop(
            &socket,
            config.recv_buffer_size,
            engine,
            datagram_received,
            error,
        )
        .await;
    }

    /// Stop the engine.
    pub fn stop(&self) {
        if let Some(token) = self.engine_cancel.lock().as_ref() {
            token.cancel();
        }
    }

    /// Enqueue a datagram without waiting.
    ///
    /// Returns `false` when not ready or the queue refused the item.
    pub fn post(&self, data: impl Into<BufferView>) -> bool {
        let queue = match &*self.queue.lock() {
            Some(queue) => queue.clone(),
            None => return false,
        };
        let engine = match &*self.engine_cancel.lock() {
            Some(token) => token.clone(),
            None => return false,
        };
        queue.try_post(OutgoingDatagram {
            target: None,
            view: data.into(),
            cancel: engine,
            completion: None,
        })
    }

    /// Enqueue a datagram and await its end-to-end send status.
    ///
    /// Fails with [`NetError::QueueClosed`] if the endpoint is not
    /// running.
    pub async fn send(&self, data: impl Into<BufferView>) -> Result<SendStatus> {
        self.send_inner(data.into(), None).await
    }

    /// Like [`send`](Self::send), with a caller cancellation token.
    pub async fn send_with_cancel(
        &self,
        data: impl Into<BufferView>,
        cancel: &CancelToken,
    ) -> Result<SendStatus> {
        self.send_inner(data.into(), Some(cancel)).await
    }

    async fn send_inner(
        &self,
        view: BufferView,
        cancel: Option<&CancelToken>,
    ) -> Result<SendStatus> {
        let queue = match &*self.queue.lock() {
            Some(queue) => queue.clone(),
            None => return Err(NetError::QueueClosed),
        };
        let engine = match &*self.engine_cancel.lock() {
            Some(token) => token.clone(),
            None => return Err(NetError::QueueClosed),
        };

        let (tx, rx) = oneshot::channel();
        let item = OutgoingDatagram {
            target: None,
            view,
            cancel: cancel.cloned().unwrap_or_else(|| engine.clone()),
            completion: Some(tx),
        };

        if !queue.send(item, cancel, &engine).await? {
            return Ok(SendStatus::Cancelled);
        }
        Ok(rx.await.unwrap_or(SendStatus::Cancelled))
    }

    /// Get the host this client is configured to send to.
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Get the port this client is configured to send to.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Get the full target address (host:port).
    pub fn address(&self) -> String {
        self.config.address()
    }
}

impl std::fmt::Debug for UdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpClient")
            .field("address", &self.config.address())
            .field("state", &self.state())
            .finish()
    }
}
