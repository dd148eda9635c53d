//! Wire protocol spoken by `tcpmuxd`.
//!
//! Both sides of the multiplexer open with the same announcement: a single
//! `<service-name>\r\n` line. Public clients send it over the public TCP port to
//! ask for a service; local registrants send it over the registration socket to
//! claim one. The daemon answers with one reply line, `+\r\n` on success or
//! `-<reason>\r\n` on failure.
//!
//! After a successful registration the daemon forwards matched public
//! connections to the registrant as ancillary data on the registration socket,
//! one message per connection. [`transfer`] implements both halves of that
//! hand-off and [`client`] wraps them for programs that want to register a
//! service or reach one through the public port.

#[cfg(not(unix))]
compile_error!("tcpmux-protocol requires a Unix platform for connection transfer");

mod announce;
pub mod client;
mod line;
mod name;
mod reply;
pub mod transfer;

pub use announce::{AnnounceError, read_announcement};
pub use line::{LineError, read_line};
pub use name::{MAX_NAME_LEN, NameError, ServiceName};
pub use reply::{Reply, ReplyParseError};
