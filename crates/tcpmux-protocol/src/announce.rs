//! Announcement handling shared by the public and registration sides.

use std::io::Read;

use thiserror::Error;

use crate::line::{LineError, read_line};
use crate::name::{MAX_NAME_LEN, NameError, ServiceName};
use crate::reply::Reply;

/// Errors raised while reading an announcement line.
#[derive(Debug, Error)]
pub enum AnnounceError {
    /// The name exceeded [`MAX_NAME_LEN`] bytes.
    #[error("service name too long")]
    TooLong,
    /// The name contained an out-of-range byte.
    #[error("service name contains invalid character: {source}")]
    InvalidCharacter {
        /// Details of the rejected byte.
        #[source]
        source: NameError,
    },
    /// The peer disconnected or the read failed before the terminator.
    #[error("failed to read service name: {source}")]
    Read {
        /// Underlying line reader error.
        #[source]
        source: LineError,
    },
}

impl AnnounceError {
    /// Returns the reply owed to the peer, or `None` when the connection
    /// should simply be closed.
    #[must_use]
    pub const fn reply(&self) -> Option<Reply> {
        match self {
            Self::TooLong => Some(Reply::NameTooLong),
            Self::InvalidCharacter { .. } => Some(Reply::InvalidCharacter),
            Self::Read { .. } => None,
        }
    }
}

impl From<LineError> for AnnounceError {
    fn from(source: LineError) -> Self {
        match source {
            LineError::TooLong { .. } => Self::TooLong,
            LineError::Read { .. } => Self::Read { source },
        }
    }
}

impl From<NameError> for AnnounceError {
    fn from(source: NameError) -> Self {
        Self::InvalidCharacter { source }
    }
}

/// Reads and validates a `<service-name>\r\n` announcement.
///
/// # Errors
///
/// Returns [`AnnounceError`] when the line is too long, contains an invalid
/// byte, or cannot be read.
pub fn read_announcement<R>(reader: &mut R) -> Result<ServiceName, AnnounceError>
where
    R: Read + ?Sized,
{
    let raw = read_line(reader, MAX_NAME_LEN)?;
    Ok(ServiceName::parse(&raw)?)
}
