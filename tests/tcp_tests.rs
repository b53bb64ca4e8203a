//! Tests for TCP client and server endpoints.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use seine::defrag::{Defragmenter, DefragmenterFactory, LengthPrefixedDefragmenter};
use seine::tcp::{
    CloseReason, RemotePeer, TcpClient, TcpClientConfig, TcpClientState, TcpServer,
    TcpServerConfig, TcpServerState,
};
use seine::CancelToken;

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Encode a payload with a 4-byte little-endian total-length header.
fn encode(payload: &[u8]) -> Vec<u8> {
    let total = (payload.len() + 4) as u32;
    let mut frame = total.to_le_bytes().to_vec();
    frame.extend_from_slice(payload);
    frame
}

async fn start_server(server: &TcpServer, cancel: &CancelToken) -> u16 {
    server.start(cancel);
    assert!(wait_until(|| server.is_listening()).await);
    server.local_addr().expect("server local address").port()
}

#[test]
fn client_config_builder() {
    let config = TcpClientConfig::new("localhost", 8080)
        .no_delay(true)
        .connect_timeout(Duration::from_secs(5))
        .connection_timeout(Duration::from_millis(250))
        .max_send_queue(8);

    assert_eq!(config.host, "localhost");
    assert_eq!(config.port, 8080);
    assert_eq!(config.address(), "localhost:8080");
    assert!(config.no_delay);
    assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
    assert_eq!(config.connection_timeout, Some(Duration::from_millis(250)));
    assert_eq!(config.max_send_queue, Some(8));
}

#[test]
fn server_config_builder() {
    let config = TcpServerConfig::new("0.0.0.0", 9000)
        .no_delay(true)
        .max_send_queue_per_peer(4)
        .connection_timeout(Duration::from_secs(1));

    assert_eq!(config.bind_address, "0.0.0.0");
    assert_eq!(config.port, 9000);
    assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    assert!(config.no_delay);
    assert_eq!(config.max_send_queue_per_peer, Some(4));
    assert_eq!(config.connection_timeout, Some(Duration::from_secs(1)));
}

#[test]
fn client_initial_state() {
    let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", 8080));

    assert_eq!(client.state(), TcpClientState::Disconnected);
    assert!(!client.is_connected());
    assert!(client.peer().is_none());
    assert_eq!(client.host(), "127.0.0.1");
    assert_eq!(client.port(), 8080);
    assert_eq!(client.address(), "127.0.0.1:8080");
}

#[test]
fn server_initial_state() {
    let server = TcpServer::new(TcpServerConfig::new("127.0.0.1", 0));

    assert_eq!(server.state(), TcpServerState::Stopped);
    assert!(!server.is_listening());
    assert_eq!(server.peer_count(), 0);
    assert!(server.peers().is_empty());
    assert!(server.local_addr().is_none());
}

#[test]
fn post_before_connect_returns_false() {
    let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", 8080));
    assert!(!client.post(b"data".as_slice()));
}

#[test]
fn state_display() {
    assert_eq!(TcpClientState::Disconnected.to_string(), "Disconnected");
    assert_eq!(TcpClientState::Connecting.to_string(), "Connecting");
    assert_eq!(TcpClientState::Connected.to_string(), "Connected");
    assert_eq!(TcpClientState::Closing.to_string(), "Closing");
    assert_eq!(TcpServerState::Stopped.to_string(), "Stopped");
    assert_eq!(TcpServerState::Listening.to_string(), "Listening");
    assert_eq!(CloseReason::RemoteShutdown.to_string(), "RemoteShutdown");
    assert_eq!(CloseReason::Timeout.to_string(), "Timeout");
    assert_eq!(CloseReason::default(), CloseReason::Unknown);
}

#[tokio::test]
async fn echo_round_trip() {
    let cancel = CancelToken::new();
    let server = TcpServer::new(TcpServerConfig::new("127.0.0.1", 0).no_delay(true));

    // Reply to "ping" frames with "pong".
    server.connected.connect(|peer| {
        let responder = peer.clone();
        peer.frame_arrived.connect(move |frame| {
            if &frame[4..] == b"ping" {
                let _ = responder.post(encode(b"pong"));
            }
        });
    });

    let port = start_server(&server, &cancel).await;

    let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", port).no_delay(true));
    let frames: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));

    let frames_clone = frames.clone();
    client.frame_arrived.connect(move |(_, frame)| {
        frames_clone.lock().push(frame.clone());
    });
    client.connected.connect(|peer| {
        let _ = peer.post(encode(b"ping"));
    });

    client.start(&cancel);
    assert!(wait_until(|| !frames.lock().is_empty()).await);

    let received = frames.lock().clone();
    assert_eq!(
        &received[0][..],
        &[0x08, 0x00, 0x00, 0x00, b'p', b'o', b'n', b'g']
    );

    client.stop();
    server.stop();
}

#[tokio::test]
async fn two_frames_coalesced_into_one_write_arrive_separately() {
    let cancel = CancelToken::new();
    let server = TcpServer::new(TcpServerConfig::new("127.0.0.1", 0).no_delay(true));

    server.connected.connect(|peer| {
        let mut coalesced = encode(b"a");
        coalesced.extend_from_slice(&encode(b"b"));
        let _ = peer.post(coalesced);
    });

    let port = start_server(&server, &cancel).await;

    let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", port));
    let frames: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
    let frames_clone = frames.clone();
    client.frame_arrived.connect(move |(_, frame)| {
        frames_clone.lock().push(frame.clone());
    });

    client.start(&cancel);
    assert!(wait_until(|| frames.lock().len() == 2).await);

    let received = frames.lock().clone();
    assert_eq!(&received[0][..], &encode(b"a")[..]);
    assert_eq!(&received[1][..], &encode(b"b")[..]);

    client.stop();
    server.stop();
}

#[tokio::test]
async fn header_split_across_writes_yields_one_frame() {
    let cancel = CancelToken::new();
    let server = TcpServer::new(TcpServerConfig::new("127.0.0.1", 0).no_delay(true));

    server.connected.connect(|peer| {
        let peer = peer.clone();
        tokio::spawn(async move {
            let _ = peer.post(&[0x05u8]);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = peer.post(&[0x00u8, 0x00, 0x00, b'x']);
        });
    });

    let port = start_server(&server, &cancel).await;

    let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", port));
    let frames: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
    let frames_clone = frames.clone();
    client.frame_arrived.connect(move |(_, frame)| {
        frames_clone.lock().push(frame.clone());
    });

    client.start(&cancel);
    assert!(wait_until(|| !frames.lock().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let received = frames.lock().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(&received[0][..], &[0x05, 0x00, 0x00, 0x00, b'x']);

    client.stop();
    server.stop();
}

#[tokio::test]
async fn idle_connection_times_out_with_timeout_reason() {
    let cancel = CancelToken::new();
    let server = TcpServer::new(TcpServerConfig::new("127.0.0.1", 0));
    let port = start_server(&server, &cancel).await;

    let client = TcpClient::new(
        TcpClientConfig::new("127.0.0.1", port).connection_timeout(Duration::from_millis(50)),
    );

    let reasons: Arc<Mutex<Vec<CloseReason>>> = Arc::new(Mutex::new(Vec::new()));
    let reasons_clone = reasons.clone();
    client.connection_closed.connect(move |(_, reason)| {
        reasons_clone.lock().push(*reason);
    });

    client.start(&cancel);
    assert!(wait_until(|| !reasons.lock().is_empty()).await);

    assert_eq!(&*reasons.lock(), &[CloseReason::Timeout]);

    server.stop();
}

#[tokio::test]
async fn switch_protocol_discards_leftovers_and_parses_with_new_defragmenter() {
    let cancel = CancelToken::new();
    let server = TcpServer::new(TcpServerConfig::new("127.0.0.1", 0).no_delay(true));

    // First frame plus two garbage bytes in a single write; once the
    // client acknowledges, reply in the 2-byte-header protocol.
    server.connected.connect(|peer| {
        let responder = peer.clone();
        peer.frame_arrived.connect(move |_frame| {
            let _ = responder.post(&[0x07u8, 0x00, b'h', b'e', b'l', b'l', b'o']);
        });

        let mut first = encode(b"A");
        first.extend_from_slice(&[0xFF, 0xFF]);
        let _ = peer.post(first);
    });

    let port = start_server(&server, &cancel).await;

    let second_protocol: DefragmenterFactory = Arc::new(|| {
        Box::new(LengthPrefixedDefragmenter::new(
            2,
            |header| u16::from_le_bytes([header[0], header[1]]) as usize,
            1024,
        )) as Box<dyn Defragmenter>
    });

    let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", port).no_delay(true));
    let frames: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));

    let frames_clone = frames.clone();
    client.connected.connect(move |peer| {
        let peer = peer.clone();
        let frames = frames_clone.clone();
        let second_protocol = second_protocol.clone();
        let switched = AtomicBool::new(false);
        peer.clone().frame_arrived.connect(move |frame| {
            frames.lock().push(frame.clone());
            if !switched.swap(true, Ordering::SeqCst) {
                peer.switch_protocol(second_protocol.clone());
                let _ = peer.post(encode(b"go"));
            }
        });
    });

    client.start(&cancel);
    assert!(wait_until(|| frames.lock().len() >= 2).await);

    let received = frames.lock().clone();
    assert_eq!(&received[0][..], &encode(b"A")[..]);
    assert_eq!(&received[1][..], &[0x07, 0x00, b'h', b'e', b'l', b'l', b'o']);

    client.stop();
    server.stop();
}

#[tokio::test]
async fn disconnect_twice_emits_one_close_with_first_reason() {
    let cancel = CancelToken::new();
    let server = TcpServer::new(TcpServerConfig::new("127.0.0.1", 0));

    let server_peer: Arc<Mutex<Option<Arc<RemotePeer>>>> = Arc::new(Mutex::new(None));
    let server_peer_clone = server_peer.clone();
    server.connected.connect(move |peer| {
        *server_peer_clone.lock() = Some(peer.clone());
    });

    let reasons: Arc<Mutex<Vec<CloseReason>>> = Arc::new(Mutex::new(Vec::new()));
    let reasons_clone = reasons.clone();
    server.connection_closed.connect(move |(_, reason)| {
        reasons_clone.lock().push(*reason);
    });

    let port = start_server(&server, &cancel).await;

    let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", port));
    client.start(&cancel);

    assert!(wait_until(|| server_peer.lock().is_some()).await);
    let peer = server_peer.lock().clone().unwrap();

    peer.disconnect(CloseReason::Timeout);
    peer.disconnect(CloseReason::LocalShutdown);

    assert!(wait_until(|| !reasons.lock().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(&*reasons.lock(), &[CloseReason::Timeout]);
    assert_eq!(peer.close_reason(), CloseReason::Timeout);

    client.stop();
    server.stop();
}

#[tokio::test]
async fn remote_close_is_classified_as_remote_shutdown() {
    let cancel = CancelToken::new();
    let server = TcpServer::new(TcpServerConfig::new("127.0.0.1", 0));

    let reasons: Arc<Mutex<Vec<CloseReason>>> = Arc::new(Mutex::new(Vec::new()));
    let reasons_clone = reasons.clone();
    server.connection_closed.connect(move |(_, reason)| {
        reasons_clone.lock().push(*reason);
    });

    let port = start_server(&server, &cancel).await;

    let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", port));
    client.start(&cancel);
    assert!(wait_until(|| client.is_connected()).await);

    client.stop();

    assert!(wait_until(|| !reasons.lock().is_empty()).await);
    assert_eq!(&*reasons.lock(), &[CloseReason::RemoteShutdown]);

    server.stop();
}

#[tokio::test]
async fn server_started_precedes_peer_events_which_precede_stopped() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancelToken::new();
    let server = TcpServer::new(TcpServerConfig::new("127.0.0.1", 0));

    let log_started = log.clone();
    server.started.connect(move |()| log_started.lock().push("started"));
    let log_connected = log.clone();
    server
        .connected
        .connect(move |_| log_connected.lock().push("connected"));
    let log_closed = log.clone();
    server
        .connection_closed
        .connect(move |_| log_closed.lock().push("connection_closed"));
    let log_stopped = log.clone();
    server.stopped.connect(move |()| log_stopped.lock().push("stopped"));

    let port = start_server(&server, &cancel).await;

    let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", port));
    client.start(&cancel);
    assert!(wait_until(|| client.is_connected()).await);

    server.stop();
    assert!(wait_until(|| log.lock().last() == Some(&"stopped")).await);

    assert_eq!(
        &*log.lock(),
        &["started", "connected", "connection_closed", "stopped"]
    );

    client.stop();
}

#[tokio::test]
async fn multiple_clients_are_tracked_and_broadcast_reaches_all() {
    let cancel = CancelToken::new();
    let server = TcpServer::new(TcpServerConfig::new("127.0.0.1", 0).no_delay(true));

    let connections = Arc::new(AtomicUsize::new(0));
    let connections_clone = connections.clone();
    server.connected.connect(move |_peer| {
        connections_clone.fetch_add(1, Ordering::SeqCst);
    });

    let port = start_server(&server, &cancel).await;

    let mut clients = Vec::new();
    let mut collectors: Vec<Arc<Mutex<Vec<Bytes>>>> = Vec::new();
    for _ in 0..3 {
        let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", port));
        let frames: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
        let frames_clone = frames.clone();
        client.frame_arrived.connect(move |(_, frame)| {
            frames_clone.lock().push(frame.clone());
        });
        client.start(&cancel);
        clients.push(client);
        collectors.push(frames);
    }

    assert!(wait_until(|| clients.iter().all(|c| c.is_connected())).await);
    assert_eq!(connections.load(Ordering::SeqCst), 3);
    assert_eq!(server.peer_count(), 3);

    server.broadcast(encode(b"all"));
    assert!(wait_until(|| collectors.iter().all(|c| !c.lock().is_empty())).await);
    for collector in &collectors {
        assert_eq!(&collector.lock()[0][..], &encode(b"all")[..]);
    }

    for client in &clients {
        client.stop();
    }
    server.stop();
    assert!(wait_until(|| server.state() == TcpServerState::Stopped).await);
    assert_eq!(server.peer_count(), 0);
}

#[tokio::test]
async fn connect_to_refused_port_emits_error_then_stopped() {
    // Grab a port that nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let cancel = CancelToken::new();
    let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", port));

    let errored = Arc::new(AtomicBool::new(false));
    let stopped = Arc::new(AtomicBool::new(false));

    let errored_clone = errored.clone();
    client.error.connect(move |_| {
        errored_clone.store(true, Ordering::SeqCst);
    });
    let stopped_clone = stopped.clone();
    client.stopped.connect(move |()| {
        stopped_clone.store(true, Ordering::SeqCst);
    });

    client.start(&cancel);
    assert!(wait_until(|| stopped.load(Ordering::SeqCst)).await);
    assert!(errored.load(Ordering::SeqCst));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn engine_cancellation_closes_peer_with_local_shutdown() {
    let cancel = CancelToken::new();
    let server = TcpServer::new(TcpServerConfig::new("127.0.0.1", 0));
    let port = start_server(&server, &cancel).await;

    let client_cancel = CancelToken::new();
    let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", port));

    let reasons: Arc<Mutex<Vec<CloseReason>>> = Arc::new(Mutex::new(Vec::new()));
    let reasons_clone = reasons.clone();
    client.connection_closed.connect(move |(_, reason)| {
        reasons_clone.lock().push(*reason);
    });

    client.start(&client_cancel);
    assert!(wait_until(|| client.is_connected()).await);

    // Cancelling the external token shuts the engine down.
    client_cancel.cancel();
    assert!(wait_until(|| !reasons.lock().is_empty()).await);
    assert_eq!(&*reasons.lock(), &[CloseReason::LocalShutdown]);

    server.stop();
}
