//! Unbuffered CRLF line reader.
//!
//! Bytes are pulled from the source one at a time so nothing past the
//! terminator is consumed. Whatever the peer sends after `\r\n` stays in the
//! socket's receive buffer and travels with the connection when it is handed
//! off.

use std::io::{self, Read};

use thiserror::Error;

const TERMINATOR: &[u8; 2] = b"\r\n";

/// Errors raised while reading a CRLF-terminated line.
#[derive(Debug, Error)]
pub enum LineError {
    /// No terminator arrived within the permitted number of bytes.
    #[error("line exceeds {limit} bytes before the terminator")]
    TooLong {
        /// Maximum number of bytes allowed before `\r\n`.
        limit: usize,
    },
    /// The stream failed or ended before a terminator arrived.
    #[error("failed to read line: {source}")]
    Read {
        /// Underlying IO error; end-of-stream surfaces as `UnexpectedEof`.
        #[source]
        source: io::Error,
    },
}

/// Reads one line terminated by `\r\n`, allowing at most `limit` bytes before
/// the terminator.
///
/// The returned bytes exclude the terminator. No normalisation is applied.
///
/// # Errors
///
/// Returns [`LineError::TooLong`] when `limit + 2` bytes arrive without a
/// terminator, and [`LineError::Read`] when the source fails or reaches
/// end-of-stream first.
pub fn read_line<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>, LineError>
where
    R: Read + ?Sized,
{
    let budget = limit.saturating_add(TERMINATOR.len());
    let mut line = Vec::with_capacity(budget.min(512));
    while line.len() < budget {
        line.push(read_byte(reader)?);
        if line.ends_with(TERMINATOR) {
            line.truncate(line.len() - TERMINATOR.len());
            return Ok(line);
        }
    }
    Err(LineError::TooLong { limit })
}

fn read_byte<R>(reader: &mut R) -> Result<u8, LineError>
where
    R: Read + ?Sized,
{
    let mut byte = [0_u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => {
                return Err(LineError::Read {
                    source: io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream ended before line terminator",
                    ),
                });
            }
            Ok(_) => {
                let [value] = byte;
                return Ok(value);
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(LineError::Read { source }),
        }
    }
}
