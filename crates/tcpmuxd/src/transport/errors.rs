//! Error types for socket listener operations.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced while binding or running a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The public host name could not be resolved.
    #[error("cannot resolve local network address {host}:{port}: {source}")]
    Resolve {
        /// Host that failed to resolve.
        host: String,
        /// Requested port.
        port: u16,
        /// Resolver error.
        #[source]
        source: io::Error,
    },
    /// Resolution succeeded but produced no addresses.
    #[error("cannot resolve local network address {host}:{port}: no addresses found")]
    ResolveEmpty {
        /// Host that resolved to nothing.
        host: String,
        /// Requested port.
        port: u16,
    },
    /// The public TCP listener could not be bound.
    #[error("cannot bind to local network interface {addr}: {source}")]
    BindTcp {
        /// Address the bind was attempted on.
        addr: SocketAddr,
        /// Operating system error.
        #[source]
        source: io::Error,
    },
    /// The bound TCP address could not be read back.
    #[error("cannot bind to local network interface: failed to read bound address: {source}")]
    LocalAddr {
        /// Operating system error.
        #[source]
        source: io::Error,
    },
    /// The registration socket could not be bound.
    #[error("cannot bind to file {path}: {source}")]
    BindUnix {
        /// Socket path.
        path: String,
        /// Operating system error.
        #[source]
        source: io::Error,
    },
    /// Another process is already serving the registration socket.
    #[error("cannot bind to file {path}: another multiplexer is listening on it")]
    UnixInUse {
        /// Socket path.
        path: String,
    },
    /// Something other than a socket occupies the registration path.
    #[error("cannot bind to file {path}: path exists and is not a socket")]
    UnixNotSocket {
        /// Occupied path.
        path: String,
    },
    /// The existing registration path could not be inspected.
    #[error("cannot bind to file {path}: failed to read metadata: {source}")]
    UnixMetadata {
        /// Socket path.
        path: String,
        /// Operating system error.
        #[source]
        source: io::Error,
    },
    /// Probing an existing socket failed for a reason other than staleness.
    #[error("cannot bind to file {path}: failed to probe existing socket: {source}")]
    UnixConnect {
        /// Socket path.
        path: String,
        /// Operating system error.
        #[source]
        source: io::Error,
    },
    /// A stale socket file could not be removed.
    #[error("cannot bind to file {path}: failed to remove stale socket: {source}")]
    UnixCleanup {
        /// Socket path.
        path: String,
        /// Operating system error.
        #[source]
        source: io::Error,
    },
    /// The accept loop thread could not be started.
    #[error("failed to start accept loop: {source}")]
    Spawn {
        /// Operating system error.
        #[source]
        source: io::Error,
    },
    /// The accept loop panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}
