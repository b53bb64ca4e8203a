//! TCP client engine.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::config::TcpClientConfig;
use super::peer::{run_connection, ConnectionSettings, EngineEvents, PeerId, RemotePeer};
use super::state::{CloseReason, TcpClientState};
use super::stream::MaybeTlsStream;
use crate::buffer::BufferView;
use crate::cancel::CancelToken;
use crate::error::{NetError, Result};
use crate::signal::Signal;

struct TcpClientInner {
    state: TcpClientState,
    peer: Option<Arc<RemotePeer>>,
}

/// A TCP client with signal-based event delivery.
///
/// The client resolves its target, connects (optionally through TLS),
/// and runs a single peer until the stream closes, a timeout elapses, or
/// cancellation fires. There is no reconnection: the engine runs once
/// per [`start`](Self::start).
///
/// # Signals
///
/// - [`started`](Self::started) / [`stopped`](Self::stopped): engine lifecycle
/// - [`connected`](Self::connected): the peer is live
/// - [`frame_arrived`](Self::frame_arrived): a frame arrived on the peer
/// - [`connection_closed`](Self::connection_closed): the peer ended, with reason
/// - [`error`](Self::error): resolution/connect/TLS/transport errors
/// - [`unhandled_error`](Self::unhandled_error): unclassified defragmenter errors
///
/// # Example
///
/// ```ignore
/// let config = TcpClientConfig::new("127.0.0.1", 8080).no_delay(true);
/// let client = TcpClient::new(config);
///
/// client.frame_arrived.connect(|(_, frame)| {
///     println!("frame: {} bytes", frame.len());
/// });
///
/// let cancel = CancelToken::new();
/// client.start(&cancel);
/// ```
pub struct TcpClient {
    config: TcpClientConfig,
    inner: Arc<Mutex<TcpClientInner>>,
    engine_cancel: Mutex<Option<CancelToken>>,
    is_running: Arc<AtomicBool>,

    /// Signal emitted when the engine starts.
    pub started: Signal<()>,
    /// Signal emitted when the engine stops, after teardown.
    pub stopped: Signal<()>,
    /// Signal emitted on resolution, connect, TLS or transport errors.
    pub error: Signal<NetError>,
    /// Signal emitted when the connection is established.
    pub connected: Signal<Arc<RemotePeer>>,
    /// Signal emitted when the connection closes, with its close reason.
    pub connection_closed: Signal<(PeerId, CloseReason)>,
    /// Signal emitted when a frame is reassembled.
    pub frame_arrived: Signal<(PeerId, Bytes)>,
    /// Signal emitted when a defragmenter raises an unclassified error.
    pub unhandled_error: Signal<NetError>,
}

impl TcpClient {
    /// Create a new TCP client with the given configuration.
    pub fn new(config: TcpClientConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(TcpClientInner {
                state: TcpClientState::Disconnected,
                peer: None,
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

    /// Get the current client state.
    pub fn state(&self) -> TcpClientState {
        self.inner.lock().state
    }

    /// Check if the client is connected.
    pub fn is_connected(&self) -> bool {
        self.inner.lock().state == TcpClientState::Connected
    }

    /// The live peer, if connected.
    pub fn peer(&self) -> Option<Arc<RemotePeer>> {
        self.inner.lock().peer.clone()
    }

    /// Start the engine. Must be called within a tokio runtime.
    ///
    /// The engine derives a child of `cancel`, so cancelling the given
    /// token (or calling [`stop`](Self::stop)) shuts the client down.
    /// A no-op if the engine is already running.
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

        tokio::spawn(async move {
            inner.lock().state = TcpClientState::Connecting;
            tracing::info!(target: "seine::tcp", address = %config.address(), "client starting");
            started.emit(());

            match Self::establish(&config, &engine).await {
                Ok(Some((stream, remote_addr, local_addr))) => {
                    let settings = ConnectionSettings {
                        connection_timeout: config.connection_timeout,
                        max_send_queue: config.max_send_queue,
                        defragmenter: config.defragmenter.clone(),
                    };
                    let inner_for_peer = inner.clone();
                    run_connection(
                        stream,
                        remote_addr,
                        local_addr,
                        settings,
                        events,
                        &engine,
                        |peer| {
                            let mut guard = inner_for_peer.lock();
                            guard.state = TcpClientState::Connected;
                            guard.peer = Some(peer.clone());
                        },
                    )
                    .await;
                }
                Ok(None) => {
                    tracing::debug!(target: "seine::tcp", "client start cancelled");
                }
                Err(e) => {
                    tracing::warn!(target: "seine::tcp", error = %e, "client failed to connect");
                    error.emit(e);
                }
            }

            {
                let mut guard = inner.lock();
                guard.state = TcpClientState::Disconnected;
                guard.peer = None;
            }
            is_running.store(false, Ordering::SeqCst);
            stopped.emit(());
        });
    }

    /// Resolve, connect and (optionally) complete the TLS handshake.
    ///
    /// `Ok(None)` means the engine token fired along the way.
    async fn establish(
        config: &TcpClientConfig,
        engine: &CancelToken,
    ) -> Result<Option<(MaybeTlsStream, SocketAddr, SocketAddr)>> {
        let resolved: Vec<SocketAddr> = tokio::select! {
            _ = engine.cancelled() => return Ok(None),
            res = tokio::net::lookup_host((config.host.as_str(), config.port)) => res
                .map_err(|e| {
                    NetError::Connection(format!("Failed to resolve {}: {}", config.host, e))
                })?
                .collect(),
        };

        let filtered = match &config.filter_addresses {
            Some(filter) => filter(resolved),
            None => resolved,
        };

        let stream = tokio::select! {
            _ = engine.cancelled() => return Ok(None),
            res = Self::connect_any(config, filtered) => res?,
        };

        if config.no_delay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!(target: "seine::tcp", error = %e, "failed to set TCP_NODELAY");
            }
        }
        if let Some(configure) = &config.configure_socket {
            configure(&stream);
        }

        let local_addr = stream.local_addr().map_err(NetError::from)?;
        let remote_addr = stream.peer_addr().map_err(NetError::from)?;

        let stream = match &config.tls {
            Some(tls) => {
                let connector = TlsConnector::from(tls.build_client_config()?);
                let server_name = ServerName::try_from(config.host.clone()).map_err(|e| {
                    NetError::Tls(format!("Invalid server name '{}': {}", config.host, e))
                })?;

                let tls_stream = tokio::select! {
                    _ = engine.cancelled() => return Ok(None),
                    res = connector.connect(server_name, stream) => res
                        .map_err(|e| NetError::Tls(format!("TLS handshake failed: {}", e)))?,
                };
                MaybeTlsStream::ClientTls(Box::new(tls_stream))
            }
            None => MaybeTlsStream::Plain(stream),
        };

        Ok(Some((stream, remote_addr, local_addr)))
    }

    /// Dial the filtered addresses in order; an empty list falls back to
    /// a direct host:port connect.
    async fn connect_any(config: &TcpClientConfig, addrs: Vec<SocketAddr>) -> Result<TcpStream> {
        let address = config.address();
        let dial = async move {
            if addrs.is_empty() {
                return TcpStream::connect(address.as_str()).await;
            }
            let mut last_err = None;
            for addr in addrs {
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no usable address")
            }))
        };

        match config.connect_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, dial).await {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => Err(NetError::Connection(e.to_string())),
                Err(_) => Err(NetError::Timeout),
            },
            None => dial.await.map_err(|e| NetError::Connection(e.to_string())),
        }
    }

    /// Stop the engine. The peer (if any) closes with reason
    /// `LocalShutdown`.
    ///
    /// The state reads `Closing` while the engine unwinds, then
    /// `Disconnected` once teardown completes.
    pub fn stop(&self) {
        if let Some(token) = self.engine_cancel.lock().as_ref() {
            {
                let mut guard = self.inner.lock();
                if guard.state != TcpClientState::Disconnected {
                    guard.state = TcpClientState::Closing;
                }
            }
            token.cancel();
        }
    }

    /// Enqueue a buffer on the live peer without waiting.
    ///
    /// Returns `false` when not connected or the queue refused the item.
    pub fn post(&self, data: impl Into<BufferView>) -> bool {
        match self.peer() {
            Some(peer) => peer.post(data),
            None => false,
        }
    }

    /// Enqueue a buffer on the live peer, waiting for queue capacity.
    pub async fn send(&self, data: impl Into<BufferView>) -> Result<bool> {
        match self.peer() {
            Some(peer) => peer.send(data).await,
            None => Ok(false),
        }
    }

    /// Like [`send`](Self::send), with a caller cancellation token.
    pub async fn send_with_cancel(
        &self,
        data: impl Into<BufferView>,
        cancel: &CancelToken,
    ) -> Result<bool> {
        match self.peer() {
            Some(peer) => peer.send_with_cancel(data, cancel).await,
            None => Ok(false),
        }
    }

    /// Get the host this client is configured to connect to.
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Get the port this client is configured to connect to.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Get the full address (host:port) this client connects to.
    pub fn address(&self) -> String {
        self.config.address()
    }
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient")
            .field("address", &self.config.address())
            .field("state", &self.state())
            .finish()
    }
}
