//! Client helpers for registrants and public callers.
//!
//! A service process calls [`Registration::register`] to claim a name and then
//! pulls forwarded connections with [`Registration::accept`]. A remote caller
//! uses [`request_service`] to reach a registered service through the public
//! port.

use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::Path;

use thiserror::Error;

use crate::line::{LineError, read_line};
use crate::name::{NameError, ServiceName};
use crate::reply::{Reply, ReplyParseError};
use crate::transfer::{ConnectionTransfer, ScmRightsTransfer, TransferError};

// Longest reply line the daemon sends, terminator excluded.
const MAX_REPLY_LEN: usize = 64;

/// Errors raised by the client helpers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The requested name cannot be announced.
    #[error("invalid service name: {source}")]
    InvalidName {
        /// Validation failure.
        #[source]
        source: NameError,
    },
    /// Connecting to the daemon failed.
    #[error("failed to connect to tcpmuxd: {source}")]
    Connect {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// Sending the announcement failed.
    #[error("failed to send announcement: {source}")]
    Io {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// Reading the reply line failed.
    #[error("failed to read reply: {source}")]
    Announce {
        /// Underlying line reader error.
        #[source]
        source: LineError,
    },
    /// The daemon rejected the announcement.
    #[error("tcpmuxd rejected the announcement: {reply}")]
    Rejected {
        /// The failure reply.
        reply: Reply,
    },
    /// The daemon answered with a line the client does not understand.
    #[error(transparent)]
    UnexpectedReply(#[from] ReplyParseError),
}

impl ClientError {
    /// Returns the failure reply when the daemon rejected the announcement.
    #[must_use]
    pub const fn rejection(&self) -> Option<Reply> {
        match self {
            Self::Rejected { reply } => Some(*reply),
            _ => None,
        }
    }
}

/// A registered service waiting for forwarded connections.
#[derive(Debug)]
pub struct Registration {
    name: ServiceName,
    channel: UnixStream,
}

impl Registration {
    /// Connects to the registration socket at `path` and claims `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the name is invalid, the socket cannot be
    /// reached, or the daemon rejects the registration.
    pub fn register(path: impl AsRef<Path>, name: &str) -> Result<Self, ClientError> {
        let name = parse_name(name)?;
        let mut channel =
            UnixStream::connect(path).map_err(|source| ClientError::Connect { source })?;
        announce(&mut channel, &name)?;
        Ok(Self { name, channel })
    }

    /// Canonical name held by this registration.
    #[must_use]
    pub const fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Blocks until the daemon forwards the next connection.
    ///
    /// Returns `Ok(None)` once the daemon has closed the registration.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] when the registration channel fails.
    pub fn accept(&self) -> Result<Option<TcpStream>, TransferError> {
        ScmRightsTransfer.receive(&self.channel)
    }

    /// Iterates over forwarded connections until the daemon closes the
    /// registration or the channel fails.
    pub fn incoming(&self) -> impl Iterator<Item = Result<TcpStream, TransferError>> + '_ {
        std::iter::from_fn(|| self.accept().transpose())
    }
}

/// Connects to the public port at `addr` and asks for `name`.
///
/// On success the returned stream is positioned right after the `+\r\n`
/// reply and talks directly to the registrant.
///
/// # Errors
///
/// Returns [`ClientError`] when the connection fails or the daemon answers
/// with a failure reply.
pub fn request_service<A>(addr: A, name: &str) -> Result<TcpStream, ClientError>
where
    A: ToSocketAddrs,
{
    let name = parse_name(name)?;
    let mut stream = TcpStream::connect(addr).map_err(|source| ClientError::Connect { source })?;
    announce(&mut stream, &name)?;
    Ok(stream)
}

fn parse_name(name: &str) -> Result<ServiceName, ClientError> {
    ServiceName::parse(name.as_bytes()).map_err(|source| ClientError::InvalidName { source })
}

fn announce<S>(stream: &mut S, name: &ServiceName) -> Result<(), ClientError>
where
    S: io::Read + Write,
{
    stream
        .write_all(&name.announcement())
        .and_then(|()| stream.flush())
        .map_err(|source| ClientError::Io { source })?;
    let line = read_line(stream, MAX_REPLY_LEN).map_err(|source| ClientError::Announce { source })?;
    match Reply::parse(&line)? {
        Reply::Accepted => Ok(()),
        reply => Err(ClientError::Rejected { reply }),
    }
}
