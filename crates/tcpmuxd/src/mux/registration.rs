//! Handler for local processes arriving on the registration socket.

use std::io::{self, Read};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use tcpmux_protocol::{Reply, ServiceName};
use tcpmux_protocol::transfer::ConnectionTransfer;

use crate::health::{DeregisterReason, HealthReporter, Side};
use crate::registry::{Registry, RegistryError, RegistrationToken, ServiceRegistration};
use crate::transport::{ConnectionHandler, ConnectionStream};

use super::{MUX_TARGET, read_service_name, reject};

/// Claims the announced name for the connecting process and forwards every
/// matched public connection to it until either side goes away.
pub(crate) struct RegistrationHandler {
    registry: Registry,
    reporter: Arc<dyn HealthReporter>,
    transfer: Arc<dyn ConnectionTransfer>,
    announce_timeout: Option<Duration>,
}

impl RegistrationHandler {
    pub(crate) fn new(
        registry: Registry,
        reporter: Arc<dyn HealthReporter>,
        transfer: Arc<dyn ConnectionTransfer>,
        announce_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            reporter,
            transfer,
            announce_timeout,
        }
    }

    fn claim(&self, channel: &mut UnixStream, name: ServiceName) -> Option<ServiceRegistration> {
        match self.registry.register(name) {
            Ok(registration) => Some(registration),
            Err(RegistryError::AlreadyExists { name }) => {
                debug!(target: MUX_TARGET, service = %name, "service name already taken");
                reject(channel, Reply::AlreadyExists, Side::Registration, self.reporter.as_ref());
                None
            }
            Err(RegistryError::Closed) => {
                debug!(target: MUX_TARGET, "registry closed; dropping registrant");
                None
            }
        }
    }

    fn deregister(&self, registration: &ServiceRegistration, reason: DeregisterReason) {
        if registration.release() {
            self.reporter.service_deregistered(registration.name(), reason);
        }
    }

    fn forward(&self, registration: &ServiceRegistration, channel: &UnixStream) {
        while let Some(pending) = registration.next_connection() {
            let peer = pending.peer();
            match self.transfer.send(channel, pending.into_stream()) {
                Ok(()) => self
                    .reporter
                    .connection_handed_off(registration.name(), peer),
                Err(error) => {
                    warn!(
                        target: MUX_TARGET,
                        service = %registration.name(),
                        peer = ?peer,
                        error = %error,
                        "failed to forward connection to registrant"
                    );
                    self.deregister(registration, DeregisterReason::TransferFailed);
                    return;
                }
            }
        }
    }
}

impl ConnectionHandler for RegistrationHandler {
    fn handle(&self, mut stream: ConnectionStream) {
        let Some(name) = read_service_name(
            &mut stream,
            self.announce_timeout,
            Side::Registration,
            self.reporter.as_ref(),
        ) else {
            return;
        };
        let ConnectionStream::Unix(mut channel) = stream else {
            warn!(target: MUX_TARGET, "registration listener produced a non-Unix stream");
            return;
        };

        let Some(registration) = self.claim(&mut channel, name) else {
            return;
        };
        self.reporter.service_registered(registration.name());

        if let Err(error) = Reply::Accepted.send(&mut channel) {
            warn!(
                target: MUX_TARGET,
                service = %registration.name(),
                error = %error,
                "failed to confirm registration"
            );
            self.deregister(&registration, DeregisterReason::ReplyFailed);
            return;
        }

        let watcher = match channel
            .set_read_timeout(None)
            .and_then(|()| channel.try_clone())
        {
            Ok(reader) => {
                let token = registration.token();
                let reporter = Arc::clone(&self.reporter);
                thread::spawn(move || watch_registrant(reader, &token, reporter.as_ref()))
            }
            Err(error) => {
                warn!(
                    target: MUX_TARGET,
                    service = %registration.name(),
                    error = %error,
                    "failed to watch registrant channel"
                );
                self.deregister(&registration, DeregisterReason::TransferFailed);
                return;
            }
        };

        self.forward(&registration, &channel);
        drop(registration);

        // Wakes the watcher if the registrant is still connected.
        if let Err(error) = channel.shutdown(Shutdown::Both)
            && error.kind() != io::ErrorKind::NotConnected
        {
            debug!(target: MUX_TARGET, error = %error, "failed to shut down registrant channel");
        }
        if watcher.join().is_err() {
            warn!(target: MUX_TARGET, "registrant watcher panicked");
        }
    }
}

/// Blocks until the registrant closes its end, then frees the name.
///
/// Registrants never write after announcing, so any bytes that do arrive are
/// discarded.
fn watch_registrant(mut channel: UnixStream, token: &RegistrationToken, reporter: &dyn HealthReporter) {
    let mut discard = [0_u8; 64];
    loop {
        match channel.read(&mut discard) {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => {
                debug!(
                    target: MUX_TARGET,
                    service = %token.name(),
                    error = %error,
                    "registrant channel failed"
                );
                break;
            }
        }
    }
    if token.release() {
        reporter.service_deregistered(token.name(), DeregisterReason::RegistrantDisconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::RecordingHealthReporter;
    use rstest::{fixture, rstest};
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::time::Instant;
    use tcpmux_protocol::transfer::ScmRightsTransfer;

    struct Harness {
        registry: Registry,
        reporter: Arc<RecordingHealthReporter>,
        handler: Arc<RegistrationHandler>,
    }

    #[fixture]
    fn harness() -> Harness {
        let registry = Registry::new();
        let reporter = Arc::new(RecordingHealthReporter::default());
        let handler = Arc::new(RegistrationHandler::new(
            registry.clone(),
            reporter.clone(),
            Arc::new(ScmRightsTransfer),
            Some(Duration::from_secs(2)),
        ));
        Harness {
            registry,
            reporter,
            handler,
        }
    }

    fn register(harness: &Harness, name: &[u8]) -> (UnixStream, Vec<u8>, thread::JoinHandle<()>) {
        let (server, mut registrant) = UnixStream::pair().expect("socket pair");
        let handler = Arc::clone(&harness.handler);
        let worker = thread::spawn(move || handler.handle(ConnectionStream::Unix(server)));
        registrant.write_all(name).expect("announce");
        registrant.write_all(b"\r\n").expect("terminate");
        let reply = tcpmux_protocol::read_line(&mut registrant, 64).expect("reply line");
        (registrant, reply, worker)
    }

    fn name(raw: &str) -> ServiceName {
        ServiceName::parse(raw.as_bytes()).expect("valid name")
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[rstest]
    fn registration_forwards_connections(harness: Harness) {
        let (registrant, reply, worker) = register(&harness, b"Echo");
        assert_eq!(reply, b"+");
        let service = harness.registry.lookup(&name("echo")).expect("registered");

        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let mut client = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (accepted, caller) = listener.accept().expect("accept");
        service
            .hand_off(crate::registry::PendingConnection::new(accepted), |_| Ok(()))
            .expect("hand off");

        let mut forwarded = ScmRightsTransfer
            .receive(&registrant)
            .expect("receive")
            .expect("connection");
        client.write_all(b"hi").expect("write");
        let mut buffer = [0_u8; 2];
        forwarded.read_exact(&mut buffer).expect("read");
        assert_eq!(&buffer, b"hi");

        drop(service);
        drop(registrant);
        worker.join().expect("join handler");
        assert!(harness.registry.is_empty());
        assert_eq!(harness.reporter.handed_off(), vec![(name("echo"), Some(caller))]);
        assert_eq!(
            harness.reporter.deregistrations(),
            vec![(name("echo"), DeregisterReason::RegistrantDisconnected)]
        );
    }

    #[rstest]
    fn failed_forwarding_releases_the_name(harness: Harness) {
        let (registrant, reply, worker) = register(&harness, b"gone");
        assert_eq!(reply, b"+");
        registrant
            .shutdown(Shutdown::Read)
            .expect("stop receiving forwarded connections");
        let service = harness.registry.lookup(&name("gone")).expect("registered");

        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let mut client = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (accepted, _) = listener.accept().expect("accept");
        service
            .hand_off(crate::registry::PendingConnection::new(accepted), |_| Ok(()))
            .expect("queue connection");
        drop(service);
        worker.join().expect("join handler");

        assert!(harness.registry.is_empty());
        assert!(harness.reporter.handed_off().is_empty());
        assert_eq!(
            harness.reporter.deregistrations(),
            vec![(name("gone"), DeregisterReason::TransferFailed)]
        );
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set read timeout");
        let mut leftover = Vec::new();
        client.read_to_end(&mut leftover).expect("read until close");
        assert!(leftover.is_empty());
        drop(registrant);
    }

    #[rstest]
    fn duplicate_names_are_refused(harness: Harness) {
        let (_first, reply, _worker) = register(&harness, b"svc");
        assert_eq!(reply, b"+");

        let (_second, reply, worker) = register(&harness, b"SVC");
        assert_eq!(reply, b"-Service already exists");
        worker.join().expect("join rejected handler");
        assert_eq!(
            harness.reporter.rejections(),
            vec![(Side::Registration, Reply::AlreadyExists)]
        );
    }

    #[rstest]
    fn departed_registrants_are_removed_without_traffic(harness: Harness) {
        let (registrant, _, worker) = register(&harness, b"brief");
        assert!(harness.registry.contains(&name("brief")));

        drop(registrant);
        assert!(
            wait_until(|| harness.registry.is_empty()),
            "service should be deregistered once the registrant leaves"
        );
        worker.join().expect("join handler");
    }

    #[rstest]
    fn closed_registry_drops_registrants_silently(harness: Harness) {
        harness.registry.close();
        let (server, mut registrant) = UnixStream::pair().expect("socket pair");
        let handler = Arc::clone(&harness.handler);
        let worker = thread::spawn(move || handler.handle(ConnectionStream::Unix(server)));
        registrant.write_all(b"late\r\n").expect("announce");

        let mut reply = Vec::new();
        registrant.read_to_end(&mut reply).expect("read until close");
        worker.join().expect("join handler");
        assert!(reply.is_empty());
    }
}
