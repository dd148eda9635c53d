//! Protocol handlers for the public and registration listeners.
//!
//! Both sides open with the same announcement line, so reading and rejecting
//! it lives here. What happens after a valid name differs: the public side
//! looks the name up and queues the connection, the registration side claims
//! the name and forwards queued connections until the registrant goes away.

mod public;
mod registration;

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use tcpmux_protocol::{Reply, ServiceName, read_announcement};

use crate::health::{HealthReporter, Side};
use crate::transport::ConnectionStream;

pub(crate) use self::public::PublicHandler;
pub(crate) use self::registration::RegistrationHandler;

const MUX_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::mux");

/// Reads the peer's announcement; `timeout` bounds the whole line.
///
/// Framing errors are answered before returning `None`; a peer that
/// disconnects or stalls is dropped without a reply.
fn read_service_name(
    stream: &mut ConnectionStream,
    timeout: Option<Duration>,
    side: Side,
    reporter: &dyn HealthReporter,
) -> Option<ServiceName> {
    let outcome = match timeout.and_then(|limit| Instant::now().checked_add(limit)) {
        Some(expires) => read_announcement(&mut Deadline {
            stream: &mut *stream,
            expires,
        }),
        None => {
            if let Err(error) = stream.set_read_timeout(None) {
                warn!(
                    target: MUX_TARGET,
                    %side,
                    error = %error,
                    "failed to clear announcement timeout"
                );
                return None;
            }
            read_announcement(stream)
        }
    };
    match outcome {
        Ok(name) => Some(name),
        Err(error) => {
            match error.reply() {
                Some(reply) => reject(stream, reply, side, reporter),
                None => debug!(
                    target: MUX_TARGET,
                    %side,
                    error = %error,
                    "peer left before announcing a service"
                ),
            }
            None
        }
    }
}

/// Reader that shrinks the socket timeout to whatever is left before
/// `expires`, so a peer trickling bytes cannot stretch the announcement.
struct Deadline<'a> {
    stream: &'a mut ConnectionStream,
    expires: Instant,
}

impl Read for Deadline<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.expires.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "announcement deadline passed",
            ));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        self.stream.read(buf)
    }
}

/// Sends a failure reply; the caller closes the connection by dropping it.
fn reject<W>(stream: &mut W, reply: Reply, side: Side, reporter: &dyn HealthReporter)
where
    W: Write + ?Sized,
{
    reporter.announcement_rejected(side, reply);
    if let Err(error) = reply.send(stream) {
        debug!(
            target: MUX_TARGET,
            %side,
            %reply,
            error = %error,
            "failed to deliver rejection"
        );
    }
}
