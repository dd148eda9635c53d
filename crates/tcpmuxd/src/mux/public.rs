//! Handler for clients arriving on the public TCP port.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use tcpmux_protocol::Reply;

use crate::health::{HealthReporter, Side};
use crate::registry::{HandoffError, PendingConnection, Registry};
use crate::transport::{ConnectionHandler, ConnectionStream};

use super::{MUX_TARGET, read_service_name, reject};

/// Resolves a public client's requested service and queues the connection
/// for that service's registrant.
pub(crate) struct PublicHandler {
    registry: Registry,
    reporter: Arc<dyn HealthReporter>,
    announce_timeout: Option<Duration>,
}

impl PublicHandler {
    pub(crate) fn new(
        registry: Registry,
        reporter: Arc<dyn HealthReporter>,
        announce_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            reporter,
            announce_timeout,
        }
    }
}

impl ConnectionHandler for PublicHandler {
    fn handle(&self, mut stream: ConnectionStream) {
        let Some(name) = read_service_name(
            &mut stream,
            self.announce_timeout,
            Side::Public,
            self.reporter.as_ref(),
        ) else {
            return;
        };
        let ConnectionStream::Tcp(mut connection) = stream else {
            warn!(target: MUX_TARGET, "public listener produced a non-TCP stream");
            return;
        };

        let Some(service) = self.registry.lookup(&name) else {
            debug!(target: MUX_TARGET, service = %name, "requested service not found");
            reject(&mut connection, Reply::NotFound, Side::Public, self.reporter.as_ref());
            return;
        };

        // The registrant inherits the socket as-is, including any timeout.
        if let Err(error) = connection.set_read_timeout(None) {
            warn!(
                target: MUX_TARGET,
                service = %name,
                error = %error,
                "failed to clear announcement timeout"
            );
            return;
        }

        let pending = PendingConnection::new(connection);
        let peer = pending.peer();
        match service.hand_off(pending, |stream| Reply::Accepted.send(stream)) {
            Ok(()) => debug!(
                target: MUX_TARGET,
                service = %name,
                peer = ?peer,
                "connection queued for registrant"
            ),
            Err(HandoffError::Reply { source }) => debug!(
                target: MUX_TARGET,
                service = %name,
                peer = ?peer,
                error = %source,
                "client left before the hand-off was confirmed"
            ),
            Err(HandoffError::ServiceGone) => debug!(
                target: MUX_TARGET,
                service = %name,
                peer = ?peer,
                "service went away before taking the connection"
            ),
        }
    }
}
