//! Registry of locally running services.
//!
//! Each registered name owns a rendezvous queue. Public handlers push accepted
//! connections into it and the registrant's forwarding loop pulls them out, so
//! a connection is only ever owned by one side of the queue at a time. All
//! map operations run under a single mutex.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use tcpmux_protocol::ServiceName;

/// An accepted public connection awaiting delivery to a registrant.
#[derive(Debug)]
pub struct PendingConnection {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl PendingConnection {
    /// Wraps an accepted stream.
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self { stream, peer }
    }

    /// Remote address of the public client, when known.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Mutable access to the stream, used to write the `+` reply.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Releases the stream for transfer.
    #[must_use]
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

/// Errors raised by registry mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Another registrant already holds the name.
    #[error("service '{name}' already exists")]
    AlreadyExists {
        /// Canonical name that collided.
        name: ServiceName,
    },
    /// The registry was closed for shutdown.
    #[error("registry is closed")]
    Closed,
}

/// Errors raised while handing a connection to a service.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// The `+` reply could not be written to the public client.
    #[error("failed to confirm hand-off to client: {source}")]
    Reply {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The registrant went away before taking the connection.
    #[error("service is no longer accepting connections")]
    ServiceGone,
}

type RegistrationId = u64;

#[derive(Debug)]
struct ServiceEntry {
    id: RegistrationId,
    queue: SyncSender<PendingConnection>,
    handoff: Arc<Mutex<()>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    services: HashMap<ServiceName, ServiceEntry>,
    next_id: RegistrationId,
    closed: bool,
}

/// Process-wide map from canonical name to service queue.
///
/// Cloning yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    state: Arc<Mutex<RegistryState>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the service registered under `name`.
    #[must_use]
    pub fn lookup(&self, name: &ServiceName) -> Option<Service> {
        let state = self.lock();
        state.services.get(name).map(|entry| Service {
            name: name.clone(),
            queue: entry.queue.clone(),
            handoff: Arc::clone(&entry.handoff),
        })
    }

    /// Claims `name`, returning the receiving end of its queue.
    ///
    /// The entry is removed again when the returned registration is dropped.
    pub fn register(&self, name: ServiceName) -> Result<ServiceRegistration, RegistryError> {
        let mut state = self.lock();
        if state.closed {
            return Err(RegistryError::Closed);
        }
        if state.services.contains_key(&name) {
            return Err(RegistryError::AlreadyExists { name });
        }
        let id = state.next_id;
        state.next_id += 1;
        let (queue, receiver) = sync_channel(0);
        state.services.insert(
            name.clone(),
            ServiceEntry {
                id,
                queue,
                handoff: Arc::new(Mutex::new(())),
            },
        );
        Ok(ServiceRegistration {
            token: RegistrationToken {
                registry: self.clone(),
                name,
                id,
            },
            receiver,
        })
    }

    /// Removes the entry for `name`, returning whether one existed.
    pub fn deregister(&self, name: &ServiceName) -> bool {
        self.lock().services.remove(name).is_some()
    }

    /// Removes every entry and refuses further registrations.
    ///
    /// Returns the names that were removed.
    pub fn close(&self) -> Vec<ServiceName> {
        let mut state = self.lock();
        state.closed = true;
        state.services.drain().map(|(name, _)| name).collect()
    }

    /// Returns true when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &ServiceName) -> bool {
        self.lock().services.contains_key(name)
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().services.len()
    }

    /// Returns true when no service is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().services.is_empty()
    }

    fn release(&self, name: &ServiceName, id: RegistrationId) -> bool {
        let mut state = self.lock();
        match state.services.get(name) {
            Some(entry) if entry.id == id => state.services.remove(name).is_some(),
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sending side of a registered service, obtained through [`Registry::lookup`].
#[derive(Debug, Clone)]
pub struct Service {
    name: ServiceName,
    queue: SyncSender<PendingConnection>,
    handoff: Arc<Mutex<()>>,
}

impl Service {
    /// Canonical name of the service.
    #[must_use]
    pub const fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Confirms the hand-off to the client and enqueues the connection.
    ///
    /// `confirm` writes the success reply. It runs under the service's hand-off
    /// lock together with the enqueue, so connections reach the registrant in
    /// the order their clients were confirmed. The call blocks until the
    /// registrant's forwarding loop takes the connection.
    pub fn hand_off<F>(&self, mut connection: PendingConnection, confirm: F) -> Result<(), HandoffError>
    where
        F: FnOnce(&mut TcpStream) -> io::Result<()>,
    {
        let _order = self.handoff.lock().unwrap_or_else(PoisonError::into_inner);
        confirm(connection.stream_mut()).map_err(|source| HandoffError::Reply { source })?;
        self.queue
            .send(connection)
            .map_err(|_| HandoffError::ServiceGone)
    }
}

/// Receiving side of a registered service.
///
/// Dropping the registration removes the service from the registry and
/// closes any connection still waiting to be handed over.
#[derive(Debug)]
pub struct ServiceRegistration {
    token: RegistrationToken,
    receiver: Receiver<PendingConnection>,
}

impl ServiceRegistration {
    /// Canonical name of the service.
    #[must_use]
    pub const fn name(&self) -> &ServiceName {
        &self.token.name
    }

    /// Blocks until the next connection arrives.
    ///
    /// Returns `None` once the service has been removed from the registry and
    /// no hand-off is still in flight.
    pub fn next_connection(&self) -> Option<PendingConnection> {
        self.receiver.recv().ok()
    }

    /// Returns a handle that can remove this registration from another thread.
    #[must_use]
    pub fn token(&self) -> RegistrationToken {
        self.token.clone()
    }

    /// Removes this registration from the registry.
    ///
    /// Returns true when this call removed it.
    pub fn release(&self) -> bool {
        self.token.release()
    }
}

impl Drop for ServiceRegistration {
    fn drop(&mut self) {
        self.token.release();
    }
}

/// Identifies one registration so it can be removed without touching a later
/// registration of the same name.
#[derive(Debug, Clone)]
pub struct RegistrationToken {
    registry: Registry,
    name: ServiceName,
    id: RegistrationId,
}

impl RegistrationToken {
    /// Canonical name of the service.
    #[must_use]
    pub const fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Removes the registration if it is still present.
    ///
    /// Returns true when this call removed it.
    pub fn release(&self) -> bool {
        self.registry.release(&self.name, self.id)
    }
}
