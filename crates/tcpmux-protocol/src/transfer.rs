//! Moving an accepted TCP connection into another process.
//!
//! A forwarded connection travels over the registration socket as a single
//! message: one payload byte plus the connection's descriptor as `SCM_RIGHTS`
//! ancillary data. The payload byte carries no meaning; it exists because
//! ancillary data cannot be sent on its own.

use std::io::{self, IoSlice, IoSliceMut};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::cmsg_space;
use nix::errno::Errno;
use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};
use thiserror::Error;

/// Payload byte accompanying every forwarded descriptor.
pub const HANDOFF_PAYLOAD: u8 = 0x55;

/// Errors raised while forwarding or receiving a connection.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Sending the hand-off message failed.
    #[error("failed to forward connection: {source}")]
    Send {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The hand-off message was only partially written.
    #[error("forwarded {sent} payload bytes instead of 1")]
    ShortSend {
        /// Number of payload bytes the kernel accepted.
        sent: usize,
    },
    /// Receiving a hand-off message failed.
    #[error("failed to receive forwarded connection: {source}")]
    Receive {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// A hand-off message arrived without a descriptor.
    #[error("hand-off message carried no connection")]
    MissingHandle,
}

/// Moves connection ownership across a process boundary.
///
/// Implementations must consume the connection on `send`: once the call
/// returns, successfully or not, the sending process holds no handle to it.
pub trait ConnectionTransfer: Send + Sync {
    /// Forwards `connection` to the process on the other end of `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] when the channel rejects the message. The
    /// connection is closed in that case.
    fn send(&self, channel: &UnixStream, connection: TcpStream) -> Result<(), TransferError>;

    /// Waits for the next forwarded connection on `channel`.
    ///
    /// Returns `Ok(None)` when the sender closed the channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] when the channel fails or a message arrives
    /// without a connection.
    fn receive(&self, channel: &UnixStream) -> Result<Option<TcpStream>, TransferError>;
}

/// [`ConnectionTransfer`] backed by `SCM_RIGHTS` on Unix domain sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScmRightsTransfer;

impl ConnectionTransfer for ScmRightsTransfer {
    fn send(&self, channel: &UnixStream, connection: TcpStream) -> Result<(), TransferError> {
        let payload = [HANDOFF_PAYLOAD];
        let iov = [IoSlice::new(&payload)];
        let fds = [connection.as_raw_fd()];
        let cmsgs = [ControlMessage::ScmRights(&fds)];
        let sent = loop {
            match sendmsg::<()>(channel.as_raw_fd(), &iov, &cmsgs, send_flags(), None) {
                Ok(sent) => break sent,
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    return Err(TransferError::Send {
                        source: io::Error::from(errno),
                    });
                }
            }
        };
        if sent != payload.len() {
            return Err(TransferError::ShortSend { sent });
        }
        // The receiver now holds its own descriptor; ours closes here.
        drop(connection);
        Ok(())
    }

    fn receive(&self, channel: &UnixStream) -> Result<Option<TcpStream>, TransferError> {
        let mut payload = [0_u8; 1];
        let mut iov = [IoSliceMut::new(&mut payload)];
        let mut space = cmsg_space!([RawFd; 1]);
        let (bytes, mut handles) = loop {
            match recvmsg::<()>(channel.as_raw_fd(), &mut iov, Some(&mut space), recv_flags()) {
                Ok(message) => {
                    let handles = message
                        .cmsgs()
                        .filter_map(|cmsg| match cmsg {
                            ControlMessageOwned::ScmRights(fds) => Some(fds),
                            _ => None,
                        })
                        .flatten()
                        // SAFETY: SCM_RIGHTS installs fresh descriptors owned by this process.
                        .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
                        .collect::<Vec<_>>();
                    break (message.bytes, handles);
                }
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    return Err(TransferError::Receive {
                        source: io::Error::from(errno),
                    });
                }
            }
        };

        if handles.is_empty() {
            return if bytes == 0 {
                Ok(None)
            } else {
                Err(TransferError::MissingHandle)
            };
        }
        // Surplus descriptors close when `handles` drops.
        let connection = handles.swap_remove(0);
        Ok(Some(TcpStream::from(connection)))
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn send_flags() -> MsgFlags {
    MsgFlags::MSG_NOSIGNAL
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn send_flags() -> MsgFlags {
    MsgFlags::empty()
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn recv_flags() -> MsgFlags {
    MsgFlags::MSG_CMSG_CLOEXEC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn recv_flags() -> MsgFlags {
    MsgFlags::empty()
}
