//! Supervises daemon launch sequencing.

use std::sync::Arc;

use tracing::info;

use tcpmux_config::Config;

use crate::daemon::Daemon;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::telemetry;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Runs the multiplexer until a termination signal arrives.
///
/// # Errors
///
/// Returns [`LaunchError`] when telemetry cannot be installed, either socket
/// cannot be bound, or signal handlers cannot be registered.
pub fn run_daemon(config: &Config) -> Result<(), LaunchError> {
    let reporter = Arc::new(StructuredHealthReporter::new());
    run_daemon_with(config, reporter, &SystemShutdownSignal::new())
}

/// Runs the multiplexer with injected collaborators.
///
/// # Errors
///
/// See [`run_daemon`].
pub fn run_daemon_with<S>(
    config: &Config,
    reporter: Arc<dyn HealthReporter>,
    shutdown: &S,
) -> Result<(), LaunchError>
where
    S: ShutdownSignal + ?Sized,
{
    telemetry::initialise(config)?;
    info!(
        target: PROCESS_TARGET,
        port = config.port,
        bind_host = %config.bind_host,
        socket_dir = %config.socket_dir,
        "starting multiplexer"
    );

    let handle = Daemon::bind(config, reporter)?.start()?;
    let waited = shutdown.wait();
    info!(
        target: PROCESS_TARGET,
        public = ?handle.public_addr(),
        registration = %handle.registration_path(),
        services = handle.service_count(),
        "stopping listeners"
    );
    handle.join()?;
    waited?;
    info!(
        target: PROCESS_TARGET,
        "shutdown sequence completed"
    );
    Ok(())
}
