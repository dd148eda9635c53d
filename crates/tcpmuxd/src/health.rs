//! Structured health reporting for multiplexer lifecycle events.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tcpmux_config::SocketEndpoint;
use tcpmux_protocol::{Reply, ServiceName};

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Which listening channel a peer arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// A remote client on the public TCP port.
    Public,
    /// A local process on the registration socket.
    Registration,
}

impl fmt::Display for Side {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Public => "public",
            Self::Registration => "registration",
        })
    }
}

/// Why a service left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeregisterReason {
    /// The registrant closed its channel.
    RegistrantDisconnected,
    /// Forwarding a connection to the registrant failed.
    TransferFailed,
    /// The `+` reply could not be delivered to the registrant.
    ReplyFailed,
    /// The daemon is shutting down.
    Shutdown,
}

impl fmt::Display for DeregisterReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::RegistrantDisconnected => "registrant_disconnected",
            Self::TransferFailed => "transfer_failed",
            Self::ReplyFailed => "reply_failed",
            Self::Shutdown => "shutdown",
        })
    }
}

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked once a listener is accepting connections.
    fn listener_ready(&self, endpoint: &SocketEndpoint);

    /// Invoked after a registrant claims a name.
    fn service_registered(&self, name: &ServiceName);

    /// Invoked when a service leaves the registry.
    fn service_deregistered(&self, name: &ServiceName, reason: DeregisterReason);

    /// Invoked after a public connection reaches its registrant.
    fn connection_handed_off(&self, name: &ServiceName, peer: Option<SocketAddr>);

    /// Invoked when an announcement is answered with a failure reply.
    fn announcement_rejected(&self, side: Side, reply: Reply);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        (**self).listener_ready(endpoint);
    }

    fn service_registered(&self, name: &ServiceName) {
        (**self).service_registered(name);
    }

    fn service_deregistered(&self, name: &ServiceName, reason: DeregisterReason) {
        (**self).service_deregistered(name, reason);
    }

    fn connection_handed_off(&self, name: &ServiceName, peer: Option<SocketAddr>) {
        (**self).connection_handed_off(name, peer);
    }

    fn announcement_rejected(&self, side: Side, reply: Reply) {
        (**self).announcement_rejected(side, reply);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_ready",
            endpoint = %endpoint,
            "listener accepting connections"
        );
    }

    fn service_registered(&self, name: &ServiceName) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_registered",
            service = %name,
            "service registered"
        );
    }

    fn service_deregistered(&self, name: &ServiceName, reason: DeregisterReason) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_deregistered",
            service = %name,
            reason = %reason,
            "service deregistered"
        );
    }

    fn connection_handed_off(&self, name: &ServiceName, peer: Option<SocketAddr>) {
        tracing::debug!(
            target: HEALTH_TARGET,
            event = "connection_handed_off",
            service = %name,
            peer = ?peer,
            "connection handed to registrant"
        );
    }

    fn announcement_rejected(&self, side: Side, reply: Reply) {
        tracing::debug!(
            target: HEALTH_TARGET,
            event = "announcement_rejected",
            side = %side,
            reply = %reply,
            "announcement rejected"
        );
    }
}
