//! Tests for the socket listener.

use std::net::TcpStream;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use tcpmux_config::SocketEndpoint;

use super::listener::SocketListener;
use super::{ConnectionHandler, CountingHandler, ListenerError};

#[fixture]
fn tcp_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", 0)
}

#[fixture]
fn socket_dir() -> TempDir {
    tempfile::tempdir().expect("temp dir")
}

fn unix_endpoint(dir: &TempDir) -> (Utf8PathBuf, SocketEndpoint) {
    let path = Utf8PathBuf::from_path_buf(dir.path().join("tcpmuxd.7000")).expect("utf8 path");
    let endpoint = SocketEndpoint::unix(path.clone());
    (path, endpoint)
}

fn wait_for_count(count: &AtomicUsize, expected: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if count.load(Ordering::SeqCst) >= expected {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[rstest]
fn tcp_listener_accepts_connections(tcp_endpoint: SocketEndpoint) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let addr = listener
        .local_addr()
        .expect("listener should report local address");
    let (count, handler) = CountingHandler::new();
    let dyn_handler: Arc<dyn ConnectionHandler> = handler.clone();
    let handle = listener.start(dyn_handler).expect("start listener");

    TcpStream::connect(addr).expect("connect first client");
    TcpStream::connect(addr).expect("connect second client");

    assert!(wait_for_count(&count, 2), "expected two connections");
    assert_eq!(handler.kinds(), vec!["tcp", "tcp"]);
    handle.shutdown();
    handle.join().expect("join listener");
}

#[rstest]
fn unreachable_host_is_reported_as_a_bind_failure() {
    let endpoint = SocketEndpoint::tcp("192.0.2.1", 0);
    let error = SocketListener::bind(&endpoint).expect_err("address not local");
    assert!(matches!(error, ListenerError::BindTcp { .. }));
    assert!(
        error
            .to_string()
            .starts_with("cannot bind to local network interface")
    );
}

#[rstest]
fn unix_listener_accepts_connections(socket_dir: TempDir) {
    let (path, endpoint) = unix_endpoint(&socket_dir);
    let listener = SocketListener::bind(&endpoint).expect("bind unix listener");
    assert!(listener.local_addr().is_none());
    let (count, handler) = CountingHandler::new();
    let dyn_handler: Arc<dyn ConnectionHandler> = handler.clone();
    let handle = listener.start(dyn_handler).expect("start listener");

    UnixStream::connect(&path).expect("connect unix client");

    assert!(wait_for_count(&count, 1), "expected one connection");
    assert_eq!(handler.kinds(), vec!["unix"]);
    handle.shutdown();
    handle.join().expect("join listener");
}

#[rstest]
fn unix_listener_cleans_stale_socket_files(socket_dir: TempDir) {
    let (path, endpoint) = unix_endpoint(&socket_dir);
    {
        let _stale = UnixListener::bind(&path).expect("bind stale listener");
    }
    assert!(path.exists(), "stale socket should remain");

    let listener = SocketListener::bind(&endpoint).expect("bind new listener");
    let (_, handler) = CountingHandler::new();
    let handle = listener.start(handler).expect("start listener");

    UnixStream::connect(&path).expect("connect unix client");

    handle.shutdown();
    handle.join().expect("join listener");
    assert!(
        !path.exists(),
        "listener should remove unix socket on shutdown"
    );
}

#[rstest]
fn unix_listener_rejects_in_use_socket(socket_dir: TempDir) {
    let (path, endpoint) = unix_endpoint(&socket_dir);
    let _existing = UnixListener::bind(&path).expect("bind existing listener");

    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, ListenerError::UnixInUse { .. }));
    assert!(path.exists(), "the live socket must be left alone");
}

#[rstest]
fn unix_listener_refuses_to_replace_regular_files(socket_dir: TempDir) {
    let (path, endpoint) = unix_endpoint(&socket_dir);
    std::fs::write(&path, b"not a socket").expect("write file");

    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, ListenerError::UnixNotSocket { .. }));
    assert!(error.to_string().starts_with("cannot bind to file"));
}

#[rstest]
#[case::wildcard_tcp(None)]
#[case::unix(Some("tcpmuxd.7001"))]
fn shutdown_unblocks_idle_listeners(socket_dir: TempDir, #[case] socket_name: Option<&str>) {
    let endpoint = match socket_name {
        Some(file) => SocketEndpoint::unix(
            Utf8PathBuf::from_path_buf(socket_dir.path().join(file)).expect("utf8 path"),
        ),
        None => SocketEndpoint::tcp("0.0.0.0", 0),
    };
    let listener = SocketListener::bind(&endpoint).expect("bind listener");
    let (count, handler) = CountingHandler::new();
    let handle = listener.start(handler).expect("start listener");

    let started = Instant::now();
    handle.shutdown();
    handle.join().expect("join listener");

    assert!(
        started.elapsed() < Duration::from_millis(500),
        "idle listener took {:?} to stop",
        started.elapsed()
    );
    assert_eq!(count.load(Ordering::SeqCst), 0, "the wake-up is not a client");
}
