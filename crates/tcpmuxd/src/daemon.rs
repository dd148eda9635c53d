//! Binds both listening sockets and runs the multiplexer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use tracing::info;

use tcpmux_config::Config;
use tcpmux_protocol::transfer::{ConnectionTransfer, ScmRightsTransfer};

use crate::health::{DeregisterReason, HealthReporter};
use crate::mux::{PublicHandler, RegistrationHandler};
use crate::process::LaunchError;
use crate::registry::Registry;
use crate::transport::{ListenerHandle, SocketListener};

const DAEMON_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::daemon");

/// Multiplexer whose sockets are bound but not yet accepting.
pub struct Daemon {
    public: SocketListener,
    registration: SocketListener,
    registration_path: Utf8PathBuf,
    registry: Registry,
    reporter: Arc<dyn HealthReporter>,
    transfer: Arc<dyn ConnectionTransfer>,
    announce_timeout: Option<Duration>,
}

impl Daemon {
    /// Binds the public port and then the registration socket.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the socket directory cannot be prepared or
    /// either socket cannot be bound. A registration socket already served by
    /// a live process counts as a bind failure; a stale one is replaced.
    pub fn bind(config: &Config, reporter: Arc<dyn HealthReporter>) -> Result<Self, LaunchError> {
        let registration_endpoint = config.registration_endpoint();
        registration_endpoint.prepare_filesystem()?;

        let public = SocketListener::bind(&config.public_endpoint())?;
        let registration = SocketListener::bind(&registration_endpoint)?;

        Ok(Self {
            public,
            registration,
            registration_path: config.registration_path(),
            registry: Registry::new(),
            reporter,
            transfer: Arc::new(ScmRightsTransfer),
            announce_timeout: config.announce_timeout(),
        })
    }

    /// Address the public listener is bound to.
    #[must_use]
    pub const fn public_addr(&self) -> Option<SocketAddr> {
        self.public.local_addr()
    }

    /// Starts both accept loops.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when either listener cannot be started. A
    /// listener that did start is stopped again.
    pub fn start(self) -> Result<DaemonHandle, LaunchError> {
        let public_addr = self.public_addr();
        let Self {
            public,
            registration,
            registration_path,
            registry,
            reporter,
            transfer,
            announce_timeout,
        } = self;

        let public_endpoint = public.endpoint().clone();
        let registration_endpoint = registration.endpoint().clone();

        let public_handler = Arc::new(PublicHandler::new(
            registry.clone(),
            Arc::clone(&reporter),
            announce_timeout,
        ));
        let registration_handler = Arc::new(RegistrationHandler::new(
            registry.clone(),
            Arc::clone(&reporter),
            transfer,
            announce_timeout,
        ));

        let public = public.start(public_handler)?;
        reporter.listener_ready(&public_endpoint);
        let registration = registration.start(registration_handler)?;
        reporter.listener_ready(&registration_endpoint);

        info!(
            target: DAEMON_TARGET,
            public = ?public_addr,
            registration = %registration_path,
            "multiplexer ready"
        );
        Ok(DaemonHandle {
            public,
            registration,
            public_addr,
            registration_path,
            registry,
            reporter,
        })
    }
}

/// Running multiplexer.
///
/// Dropping the handle stops both accept loops without waiting for them and
/// leaves registered services in place.
pub struct DaemonHandle {
    public: ListenerHandle,
    registration: ListenerHandle,
    public_addr: Option<SocketAddr>,
    registration_path: Utf8PathBuf,
    registry: Registry,
    reporter: Arc<dyn HealthReporter>,
}

impl DaemonHandle {
    /// Address the public listener is bound to.
    #[must_use]
    pub const fn public_addr(&self) -> Option<SocketAddr> {
        self.public_addr
    }

    /// Path of the registration socket.
    #[must_use]
    pub fn registration_path(&self) -> &camino::Utf8Path {
        &self.registration_path
    }

    /// Number of services currently registered.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.registry.len()
    }

    /// Asks both accept loops to stop.
    pub fn shutdown(&self) {
        self.public.shutdown();
        self.registration.shutdown();
    }

    /// Stops accepting, waits for both accept loops, then removes every
    /// registered service.
    ///
    /// Removing the services ends their forwarding loops once in-flight
    /// hand-offs finish, which closes every registrant channel.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when an accept loop panicked. Services are
    /// removed regardless.
    pub fn join(self) -> Result<(), LaunchError> {
        self.shutdown();
        let Self {
            public,
            registration,
            registry,
            reporter,
            ..
        } = self;
        let public = public.join();
        let registration = registration.join();

        for name in registry.close() {
            reporter.service_deregistered(&name, DeregisterReason::Shutdown);
        }
        info!(target: DAEMON_TARGET, "multiplexer stopped");
        public?;
        registration?;
        Ok(())
    }
}
