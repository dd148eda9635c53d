//! Test double for [`HealthReporter`] that records structured events for assertions.

use std::net::SocketAddr;
use std::sync::Mutex;

use tcpmux_config::SocketEndpoint;
use tcpmux_protocol::{Reply, ServiceName};

use crate::health::{DeregisterReason, HealthReporter, Side};

/// Structured health events tracked during tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HealthEvent {
    ListenerReady(SocketEndpoint),
    Registered(ServiceName),
    Deregistered(ServiceName, DeregisterReason),
    HandedOff(ServiceName, Option<SocketAddr>),
    Rejected(Side, Reply),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub(crate) struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    pub(crate) fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    pub(crate) fn listeners(&self) -> Vec<SocketEndpoint> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::ListenerReady(endpoint) => Some(endpoint),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn registrations(&self) -> Vec<ServiceName> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::Registered(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn deregistrations(&self) -> Vec<(ServiceName, DeregisterReason)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::Deregistered(name, reason) => Some((name, reason)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn handed_off(&self) -> Vec<(ServiceName, Option<SocketAddr>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::HandedOff(name, peer) => Some((name, peer)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn rejections(&self) -> Vec<(Side, Reply)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::Rejected(side, reply) => Some((side, reply)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        self.record(HealthEvent::ListenerReady(endpoint.clone()));
    }

    fn service_registered(&self, name: &ServiceName) {
        self.record(HealthEvent::Registered(name.clone()));
    }

    fn service_deregistered(&self, name: &ServiceName, reason: DeregisterReason) {
        self.record(HealthEvent::Deregistered(name.clone(), reason));
    }

    fn connection_handed_off(&self, name: &ServiceName, peer: Option<SocketAddr>) {
        self.record(HealthEvent::HandedOff(name.clone(), peer));
    }

    fn announcement_rejected(&self, side: Side, reply: Reply) {
        self.record(HealthEvent::Rejected(side, reply));
    }
}
