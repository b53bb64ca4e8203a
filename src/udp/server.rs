//! UDP server endpoint (bound socket).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

use super::config::{Datagram, SendStatus, UdpServerConfig};
use super::endpoint::{receive_loop, spawn_send_worker, OutgoingDatagram};
use super::state::UdpEndpointState;
use crate::buffer::BufferView;
use crate::cancel::CancelToken;
use crate::error::{NetError, Result};
use crate::queue::SendQueue;
use crate::signal::Signal;

struct UdpServerInner {
    state: UdpEndpointState,
    local_addr: Option<SocketAddr>,
}

/// A UDP server over a bound socket.
///
/// Receives datagrams from any source and sends to explicit targets
/// through a bounded ordered send queue. Optionally joins multicast
/// groups after binding, leaving them during teardown.
///
/// # Signals
///
/// - [`started`](Self::started) / [`stopped`](Self::stopped): engine lifecycle
/// - [`datagram_received`](Self::datagram_received): a datagram arrived
/// - [`send_error`](Self::send_error): a short or failed send
/// - [`error`](Self::error): bind or receive errors
///
/// # Example
///
/// ```ignore
/// let server = UdpServer::new(UdpServerConfig::new("0.0.0.0", 5000));
///
/// server.datagram_received.connect(|datagram| {
///     println!("{} bytes from {}", datagram.data.len(), datagram.source);
/// });
///
/// let cancel = CancelToken::new();
/// server.start(&cancel);
/// ```
pub struct UdpServer {
    config: UdpServerConfig,
    inner: Arc<Mutex<UdpServerInner>>,
    engine_cancel: Mutex<Option<CancelToken>>,
    queue: Arc<Mutex<Option<SendQueue<OutgoingDatagram>>>>,
    is_running: Arc<AtomicBool>,

    /// Signal emitted when the socket is bound and processing.
    pub started: Signal<()>,
    /// Signal emitted when the engine stops, after teardown.
    pub stopped: Signal<()>,
    /// Signal emitted on bind or receive errors.
    pub error: Signal<NetError>,
    /// Signal emitted when a datagram arrives.
    pub datagram_received: Signal<Datagram>,
    /// Signal emitted on a short or failed send: `(bytes_sent, error)`.
    pub send_error: Signal<(usize, Option<NetError>)>,
}

impl UdpServer {
    /// Create a new UDP server with the given configuration.
    pub fn new(config: UdpServerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(UdpServerInner {
                state: UdpEndpointState::Unbound,
                local_addr: None,
            })),
            engine_cancel: Mutex::new(None),
            queue: Arc::new(Mutex::new(None)),
            is_running: Arc::new(AtomicBool::new(false)),
            started: Signal::new(),
            stopped: Signal::new(),
            error: Signal::new(),
            datagram_received: Signal::new(),
            send_error: Signal::new(),
        }
    }

    /// Get the current endpoint state.
    pub fn state(&self) -> UdpEndpointState {
        self.inner.lock().state
    }

    /// Whether the socket is bound and processing datagrams.
    pub fn is_bound(&self) -> bool {
        self.inner.lock().state == UdpEndpointState::Bound
    }

    /// The bound address after start; useful with port-0 binds.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().local_addr
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
        let error = self.error.clone();
        let datagram_received = self.datagram_received.clone();
        let send_error = self.send_error.clone();

        tokio::spawn(async move {
            inner.lock().state = UdpEndpointState::Binding;

            Self::run(
                &config,
                &inner,
                &queue_slot,
                &engine,
                &started,
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
            }
            is_running.store(false, Ordering::SeqCst);
            stopped.emit(());
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        config: &UdpServerConfig,
        inner: &Arc<Mutex<UdpServerInner>>,
        queue_slot: &Arc<Mutex<Option<SendQueue<OutgoingDatagram>>>>,
        engine: &CancelToken,
        started: &Signal<()>,
        error: &Signal<NetError>,
        datagram_received: &Signal<Datagram>,
        send_error: &Signal<(usize, Option<NetError>)>,
    ) {
        let socket = match UdpSocket::bind(config.bind_addr()).await {
            Ok(socket) => socket,
            Err(e) => {
                error.emit(NetError::Connection(format!("Failed to bind: {}", e)));
                return;
            }
        };

        if let Some(configure) = &config.configure_socket {
            configure(&socket);
        }

        Self::apply_multicast(&socket, config, error);

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
        }
        tracing::info!(target: "seine::udp", addr = %config.bind_addr(), "udp server started");
        started.emit(());

        receive_loop(
            &socket,
            config.recv_buffer_size,
            engine,
            datagram_received,
            error,
        )
        .await;

        // Teardown: leave whatever groups we joined.
        for (group, interface) in &config.multicast.groups {
            let iface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
            if let Err(e) = socket.leave_multicast_v4(*group, iface) {
                error.emit(NetError::Io(format!(
                    "Failed to leave multicast group {}: {}",
                    group, e
                )));
            }
        }
    }

    fn apply_multicast(socket: &UdpSocket, config: &UdpServerConfig, error: &Signal<NetError>) {
        let multicast = &config.multicast;

        if multicast.ttl > 0 {
            if let Err(e) = socket.set_multicast_ttl_v4(multicast.ttl) {
                error.emit(NetError::Io(format!("Failed to set multicast TTL: {}", e)));
            }
        }
        if let Err(e) = socket.set_multicast_loop_v4(multicast.loopback) {
            error.emit(NetError::Io(format!(
                "Failed to set multicast loopback: {}",
                e
            )));
        }
        for (group, interface) in &multicast.groups {
            let iface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
            if let Err(e) = socket.join_multicast_v4(*group, iface) {
                error.emit(NetError::Io(format!(
                    "Failed to join multicast group {}: {}",
                    group, e
                )));
            }
        }
    }

    /// Stop the engine.
    pub fn stop(&self) {
        if let Some(token) = self.engine_cancel.lock().as_ref() {
            token.cancel();
        }
    }

    /// Enqueue a datagram to `target` without waiting.
    ///
    /// Returns `false` when not bound or the queue refused the item.
    pub fn post_to(&self, target: SocketAddr, data: impl Into<BufferView>) -> bool {
        let queue = match &*self.queue.lock() {
            Some(queue) => queue.clone(),
            None => return false,
        };
        let engine = match &*self.engine_cancel.lock() {
            Some(token) => token.clone(),
            None => return false,
        };
        queue.try_post(OutgoingDatagram {
            target: Some(target),
            view: data.into(),
            cancel: engine,
            completion: None,
        })
    }

    /// Enqueue a datagram to `target` and await its end-to-end status.
    ///
    /// Fails with [`NetError::QueueClosed`] if the endpoint is not
    /// running.
    pub async fn send_to(
        &self,
        target: SocketAddr,
        data: impl Into<BufferView>,
    ) -> Result<SendStatus> {
        self.send_inner(target, data.into(), None).await
    }

    /// Like [`send_to`](Self::send_to), with a caller cancellation token.
    pub async fn send_to_with_cancel(
        &self,
        target: SocketAddr,
        data: impl Into<BufferView>,
        cancel: &CancelToken,
    ) -> Result<SendStatus> {
        self.send_inner(target, data.into(), Some(cancel)).await
    }

    async fn send_inner(
        &self,
        target: SocketAddr,
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
            target: Some(target),
            view,
            cancel: cancel.cloned().unwrap_or_else(|| engine.clone()),
            completion: Some(tx),
        };

        if !queue.send(item, cancel, &engine).await? {
            return Ok(SendStatus::Cancelled);
        }
        Ok(rx.await.unwrap_or(SendStatus::Cancelled))
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> String {
        self.config.bind_addr()
    }
}

impl std::fmt::Debug for UdpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpServer")
            .field("bind_addr", &self.config.bind_addr())
            .field("state", &self.state())
            .finish()
    }
}
