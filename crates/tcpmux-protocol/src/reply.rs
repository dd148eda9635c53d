//! Reply lines sent by the daemon after an announcement.

use std::fmt;
use std::io::{self, Write};

use thiserror::Error;

/// Outcome of an announcement as reported to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reply {
    /// The announcement succeeded.
    Accepted,
    /// The name exceeded [`crate::MAX_NAME_LEN`] bytes.
    NameTooLong,
    /// The name contained a byte outside the printable ASCII range.
    InvalidCharacter,
    /// No registrant holds the requested name.
    NotFound,
    /// Another registrant already holds the name.
    AlreadyExists,
}

impl Reply {
    /// Returns the full reply line, terminator included.
    #[must_use]
    pub const fn line(self) -> &'static [u8] {
        match self {
            Self::Accepted => b"+\r\n",
            Self::NameTooLong => b"-Service name too long\r\n",
            Self::InvalidCharacter => b"-Service name contains invalid character\r\n",
            Self::NotFound => b"-Service not found\r\n",
            Self::AlreadyExists => b"-Service already exists\r\n",
        }
    }

    /// Returns the failure reason, or `None` for [`Reply::Accepted`].
    #[must_use]
    pub const fn reason(self) -> Option<&'static str> {
        match self {
            Self::Accepted => None,
            Self::NameTooLong => Some("Service name too long"),
            Self::InvalidCharacter => Some("Service name contains invalid character"),
            Self::NotFound => Some("Service not found"),
            Self::AlreadyExists => Some("Service already exists"),
        }
    }

    /// Returns true for [`Reply::Accepted`].
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Classifies a reply line with the terminator already stripped.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyParseError`] when the line is not one of the known
    /// replies.
    pub fn parse(line: &[u8]) -> Result<Self, ReplyParseError> {
        let known = [
            Self::Accepted,
            Self::NameTooLong,
            Self::InvalidCharacter,
            Self::NotFound,
            Self::AlreadyExists,
        ];
        known
            .into_iter()
            .find(|reply| reply.line().strip_suffix(b"\r\n") == Some(line))
            .ok_or_else(|| ReplyParseError {
                line: String::from_utf8_lossy(line).into_owned(),
            })
    }

    /// Writes the reply line and flushes the writer.
    ///
    /// # Errors
    ///
    /// Propagates any write or flush failure.
    pub fn send<W>(self, writer: &mut W) -> io::Result<()>
    where
        W: Write + ?Sized,
    {
        writer.write_all(self.line())?;
        writer.flush()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(formatter, "-{reason}"),
            None => formatter.write_str("+"),
        }
    }
}

/// Raised when a reply line is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised reply line '{line}'")]
pub struct ReplyParseError {
    /// The offending line, lossily decoded.
    pub line: String,
}
