//! The `tcpmuxd` service multiplexer.
//!
//! One public TCP port fronts any number of local services. A local process
//! claims a name by announcing it on the registration socket
//! (`<socket_dir>/tcpmuxd.<port>`); a remote client reaches that process by
//! announcing the same name on the public port. After the `+` reply the
//! daemon hands the client's connection to the registrant as a file
//! descriptor and steps out of the data path entirely.
//!
//! Each accepted connection runs on its own thread. Registered names live in
//! a shared registry; a registrant keeps its name until its registration
//! channel closes, a forward fails, or the daemon shuts down. Lifecycle events
//! flow through a [`HealthReporter`], which logs them with `tracing` by
//! default.

#[cfg(not(unix))]
compile_error!("tcpmuxd requires a Unix platform for connection transfer");

mod daemon;
mod health;
mod mux;
mod process;
mod registry;
mod telemetry;
mod transport;

pub use daemon::{Daemon, DaemonHandle};
pub use health::{DeregisterReason, HealthReporter, Side, StructuredHealthReporter};
pub use process::{
    LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon, run_daemon_with,
};
pub use registry::{
    HandoffError, PendingConnection, RegistrationToken, Registry, RegistryError, Service,
    ServiceRegistration,
};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
