//! TCP server engine.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

use super::config::TcpServerConfig;
use super::peer::{run_connection, ConnectionSettings, EngineEvents, PeerId, RemotePeer};
use super::state::{CloseReason, TcpServerState};
use super::stream::MaybeTlsStream;
use crate::buffer::BufferView;
use crate::cancel::CancelToken;
use crate::error::NetError;
use crate::signal::Signal;

struct TcpServerInner {
    state: TcpServerState,
    peers: HashMap<PeerId, Arc<RemotePeer>>,
    local_addr: Option<SocketAddr>,
}

/// A TCP server with signal-based event delivery.
///
/// The server accepts connections and runs each accepted peer through
/// the same post-connect path as the client: optional TLS handshake,
/// ordered send queue, framed receive loop, classified teardown.
///
/// # Signals
///
/// - [`started`](Self::started) / [`stopped`](Self::stopped): engine lifecycle
/// - [`connected`](Self::connected): a new peer is live
/// - [`frame_arrived`](Self::frame_arrived): a frame arrived on some peer
/// - [`connection_closed`](Self::connection_closed): a peer ended, with reason
/// - [`error`](Self::error): bind/accept/TLS errors
/// - [`unhandled_error`](Self::unhandled_error): unclassified defragmenter errors
///
/// # Example
///
/// ```ignore
/// let server = TcpServer::new(TcpServerConfig::new("127.0.0.1", 0));
///
/// server.connected.connect(|peer| {
///     println!("new peer {}", peer.remote_addr());
///     let peer = peer.clone();
///     peer.clone().frame_arrived.connect(move |frame| {
///         let _ = peer.post(frame.clone());
///     });
/// });
///
/// let cancel = CancelToken::new();
/// server.start(&cancel);
/// ```
pub struct TcpServer {
    config: TcpServerConfig,
    inner: Arc<Mutex<TcpServerInner>>,
    engine_cancel: Mutex<Option<CancelToken>>,
    is_running: Arc<AtomicBool>,

    /// Signal emitted when the server starts listening.
    pub started: Signal<()>,
    /// Signal emitted when the server stops, after every peer is down.
    pub stopped: Signal<()>,
    /// Signal emitted on bind, accept or TLS errors.
    pub error: Signal<NetError>,
    /// Signal emitted when a new peer is established.
    pub connected: Signal<Arc<RemotePeer>>,
    /// Signal emitted when a peer closes, with its close reason.
    pub connection_closed: Signal<(PeerId, CloseReason)>,
    /// Signal emitted when a frame is reassembled on any peer.
    pub frame_arrived: Signal<(PeerId, Bytes)>,
    /// Signal emitted when a defragmenter raises an unclassified error.
    pub unhandled_error: Signal<NetError>,
}

impl TcpServer {
    /// Create a new TCP server with the given configuration.
    pub fn new(config: TcpServerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(TcpServerInner {
                state: TcpServerState::Stopped,
                peers: HashMap::new(),
                local_addr: None,
            })),
            engine_cancel: Mutex::new(None),
            is_running: Arc::new(AtomicBool::new(false)),
            started: Signal::new(),
            stopped: Signal::new(),
            error: Signal::new(),
            connected: Signal::new(),
            connection_closed: Signal::new(),
            frame_arrived: Signal::new(),
            unhandled_error: Signal::new(),
        }
    }

    /// Get the current server state.
    pub fn state(&self) -> TcpServerState {
        self.inner.lock().state
    }

    /// Check if the server is listening.
    pub fn is_listening(&self) -> bool {
        self.inner.lock().state == TcpServerState::Listening
    }

    /// Number of live peers.
    pub fn peer_count(&self) -> usize {
        self.inner.lock().peers.len()
    }

    /// Ids of all live peers.
    pub fn peers(&self) -> Vec<PeerId> {
        self.inner.lock().peers.keys().copied().collect()
    }

    /// Look up a live peer by id.
    pub fn get_peer(&self, id: PeerId) -> Option<Arc<RemotePeer>> {
        self.inner.lock().peers.get(&id).cloned()
    }

    /// The bound address after start; useful with port-0 binds.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().local_addr
    }

    /// Start the engine. Must be called within a tokio runtime.
    ///
    /// The engine derives a child of `cancel`; cancelling it (or calling
    /// [`stop`](Self::stop)) closes every peer and stops the listener.
    /// A no-op if already running.
    pub fn start(&self, cancel: &CancelToken) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let engine = cancel.child();
        *self.engine_cancel.lock() = Some(engine.clone());

        let config = self.config.clone();
        let inner = self.inner.clone();
        let is_running = self.is_running.clone();

        let started = self.started.clone();
        let stopped = self.stopped.clone();
        let error = self.error.clone();
        let events = EngineEvents {
            connected: self.connected.clone(),
            connection_closed: self.connection_closed.clone(),
            frame_arrived: self.frame_arrived.clone(),
            unhandled_error: self.unhandled_error.clone(),
        };

        inner.lock().state = TcpServerState::Starting;

        tokio::spawn(async move {
            let stop_early = |state: &Arc<Mutex<TcpServerInner>>| {
                state.lock().state = TcpServerState::Stopped;
            };

            let listener = match TcpListener::bind(config.bind_addr()).await {
                Ok(listener) => listener,
                Err(e) => {
                    error.emit(NetError::Connection(format!("Failed to bind: {}", e)));
                    stop_early(&inner);
                    is_running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            if let Some(configure) = &config.configure_listener {
                configure(&listener);
            }

            let local_addr = match listener.local_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    error.emit(NetError::Connection(format!(
                        "Failed to get local address: {}",
                        e
                    )));
                    stop_early(&inner);
                    is_running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let acceptor = match &config.tls {
                Some(tls) => match tls.build_server_config() {
                    Ok(server_config) => Some(TlsAcceptor::from(server_config)),
                    Err(e) => {
                        error.emit(e);
                        stop_early(&inner);
                        is_running.store(false, Ordering::SeqCst);
                        return;
                    }
                },
                None => None,
            };

            {
                let mut guard = inner.lock();
                guard.state = TcpServerState::Listening;
                guard.local_addr = Some(local_addr);
            }
            tracing::info!(target: "seine::tcp", %local_addr, "server listening");
            started.emit(());

            let settings = ConnectionSettings {
                connection_timeout: config.connection_timeout,
                max_send_queue: config.max_send_queue_per_peer,
                defragmenter: config.defragmenter.clone(),
            };

            let mut connections: JoinSet<()> = JoinSet::new();

            loop {
                tokio::select! {
                    _ = engine.cancelled() => break,

                    // Reap finished connection tasks as the server runs.
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}

                    result = listener.accept() => match result {
                        Ok((stream, remote_addr)) => {
                            if config.no_delay {
                                if let Err(e) = stream.set_nodelay(true) {
                                    tracing::warn!(target: "seine::tcp", error = %e, "failed to set TCP_NODELAY");
                                }
                            }
                            if let Some(configure) = &config.configure_socket {
                                configure(&stream);
                            }

                            let acceptor = acceptor.clone();
                            let settings = settings.clone();
                            let events = events.clone();
                            let error = error.clone();
                            let engine = engine.clone();
                            let inner = inner.clone();

                            connections.spawn(async move {
                                let stream = match acceptor {
                                    Some(acceptor) => {
                                        let handshake = acceptor.accept(stream);
                                        tokio::select! {
                                            _ = engine.cancelled() => return,
                                            res = handshake => match res {
                                                Ok(tls_stream) => MaybeTlsStream::ServerTls(Box::new(tls_stream)),
                                                Err(e) => {
                                                    error.emit(NetError::Tls(format!(
                                                        "TLS handshake failed: {}", e
                                                    )));
                                                    return;
                                                }
                                            }
                                        }
                                    }
                                    None => MaybeTlsStream::Plain(stream),
                                };

                                let registry = inner.clone();
                                let (peer_id, _reason) = run_connection(
                                    stream,
                                    remote_addr,
                                    local_addr,
                                    settings,
                                    events,
                                    &engine,
                                    move |peer| {
                                        registry.lock().peers.insert(peer.id(), peer.clone());
                                    },
                                )
                                .await;
                                inner.lock().peers.remove(&peer_id);
                            });
                        }
                        Err(e) => {
                            error.emit(NetError::Connection(format!("Accept error: {}", e)));
                        }
                    }
                }
            }

            // Shutdown: close every peer, then wait for their tasks so
            // `stopped` fires after the last peer event.
            inner.lock().state = TcpServerState::Stopping;
            let peers: Vec<Arc<RemotePeer>> = inner.lock().peers.values().cloned().collect();
            for peer in peers {
                peer.disconnect(CloseReason::LocalShutdown);
            }
            while connections.join_next().await.is_some() {}
            inner.lock().peers.clear();

            {
                let mut guard = inner.lock();
                guard.state = TcpServerState::Stopped;
                guard.local_addr = None;
            }
            is_running.store(false, Ordering::SeqCst);
            tracing::info!(target: "seine::tcp", "server stopped");
            stopped.emit(());
        });
    }

    /// Stop the server; peers close with reason `LocalShutdown`.
    pub fn stop(&self) {
        if let Some(token) = self.engine_cancel.lock().as_ref() {
            token.cancel();
        }
    }

    /// Post a buffer to every live peer.
    pub fn broadcast(&self, data: impl Into<BufferView>) {
        let view = data.into();
        let peers: Vec<Arc<RemotePeer>> = self.inner.lock().peers.values().cloned().collect();
        for peer in peers {
            let _ = peer.post(view.clone());
        }
    }

    /// Post a buffer to a specific peer. Returns `false` if the peer is
    /// gone or its queue refused the item.
    pub fn send_to(&self, id: PeerId, data: impl Into<BufferView>) -> bool {
        match self.get_peer(id) {
            Some(peer) => peer.post(data),
            None => false,
        }
    }

    /// Disconnect a specific peer with the given reason.
    pub fn disconnect_peer(&self, id: PeerId, reason: CloseReason) -> bool {
        match self.get_peer(id) {
            Some(peer) => {
                peer.disconnect(reason);
                true
            }
            None => false,
        }
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> String {
        self.config.bind_addr()
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("bind_addr", &self.config.bind_addr())
            .field("state", &self.state())
            .field("peers", &self.peer_count())
            .finish()
    }
}
