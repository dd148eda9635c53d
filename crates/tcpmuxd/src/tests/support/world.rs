//! Scenario world driving a real multiplexer through the client helpers.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use tempfile::TempDir;

use tcpmux_config::Config;
use tcpmux_protocol::client::{ClientError, Registration, request_service};

use crate::daemon::{Daemon, DaemonHandle};

use super::RecordingHealthReporter;

const WAIT_LIMIT: Duration = Duration::from_secs(2);

/// Shared state for multiplexer scenarios.
pub(crate) struct MuxWorld {
    socket_dir: TempDir,
    pub(crate) reporter: Arc<RecordingHealthReporter>,
    daemon: Option<DaemonHandle>,
    registration_path: Option<Utf8PathBuf>,
    public_addr: Option<SocketAddr>,
    registrations: HashMap<String, Registration>,
    pub(crate) registration_error: Option<ClientError>,
    pub(crate) request: Option<Result<TcpStream, ClientError>>,
}

impl MuxWorld {
    pub(crate) fn new() -> Self {
        Self {
            socket_dir: tempfile::tempdir().expect("temp dir"),
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemon: None,
            registration_path: None,
            public_addr: None,
            registrations: HashMap::new(),
            registration_error: None,
            request: None,
        }
    }

    fn config(&self) -> Config {
        Config {
            port: 0,
            bind_host: "127.0.0.1".to_owned(),
            socket_dir: Utf8PathBuf::from_path_buf(self.socket_dir.path().to_path_buf())
                .expect("utf8 socket dir"),
            announce_timeout_ms: 2_000,
            ..Config::default()
        }
    }

    pub(crate) fn start(&mut self) {
        let reporter = Arc::clone(&self.reporter);
        let handle = Daemon::bind(&self.config(), reporter)
            .and_then(Daemon::start)
            .expect("start multiplexer");
        self.public_addr = handle.public_addr();
        self.registration_path = Some(handle.registration_path().to_owned());
        self.daemon = Some(handle);
    }

    pub(crate) fn register(&mut self, name: &str) {
        let path = self.registration_path().clone();
        match Registration::register(path, name) {
            Ok(registration) => {
                self.registrations.insert(name.to_lowercase(), registration);
            }
            Err(error) => self.registration_error = Some(error),
        }
    }

    pub(crate) fn request(&mut self, name: &str) {
        let addr = self.public_addr.expect("public address");
        self.request = Some(request_service(addr, name));
    }

    pub(crate) fn drop_registration(&mut self, name: &str) {
        self.registrations.remove(name);
        let daemon = self.daemon.as_ref().expect("multiplexer running");
        assert!(
            wait_until(|| daemon.service_count() == 0),
            "registry should forget '{name}'"
        );
    }

    pub(crate) fn shut_down(&mut self) {
        let daemon = self.daemon.take().expect("multiplexer running");
        daemon.join().expect("clean shutdown");
    }

    /// Accepts the forwarded connection on `name` and checks that bytes flow
    /// both ways between it and the requesting client.
    pub(crate) fn exchange(&mut self, name: &str) {
        let mut client = match self.request.take().expect("a request was made") {
            Ok(stream) => stream,
            Err(error) => panic!("request failed: {error}"),
        };
        let registration = self.registrations.get(name).expect("registered service");
        let mut served = registration
            .accept()
            .expect("receive forwarded connection")
            .expect("daemon still running");

        client.write_all(b"ping").expect("client write");
        let mut buffer = [0_u8; 4];
        served.read_exact(&mut buffer).expect("service read");
        assert_eq!(&buffer, b"ping");

        served.write_all(b"pong").expect("service write");
        client.read_exact(&mut buffer).expect("client read");
        assert_eq!(&buffer, b"pong");
    }

    pub(crate) fn registration_closed(&self, name: &str) -> bool {
        let registration = self.registrations.get(name).expect("registered service");
        matches!(registration.accept(), Ok(None))
    }

    pub(crate) fn registration_path(&self) -> &Utf8PathBuf {
        self.registration_path.as_ref().expect("multiplexer started")
    }
}

impl Drop for MuxWorld {
    fn drop(&mut self) {
        self.registrations.clear();
        if let Some(daemon) = self.daemon.take() {
            let _ = daemon.join();
        }
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_LIMIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}
