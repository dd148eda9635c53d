//! Configuration for the `tcpmuxd` service multiplexer.
//!
//! The daemon takes a single optional positional argument, the public TCP
//! port, plus a handful of long options that tune logging, the registration
//! socket location, and the announcement timeout. The port also keys the
//! registration socket name so several multiplexers can share a host.

mod defaults;
mod logging;
mod socket;

use std::ffi::OsString;
use std::io;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use clap::error::ErrorKind;
use thiserror::Error;

pub use defaults::{
    DEFAULT_ANNOUNCE_TIMEOUT_MS, DEFAULT_BIND_HOST, DEFAULT_LOG_FILTER, DEFAULT_PORT,
    DEFAULT_SOCKET_DIR, REGISTRATION_SOCKET_PREFIX, default_announce_timeout, default_log_filter,
    default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketPreparationError};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(
    name = "tcpmuxd",
    version,
    about = "Hands incoming TCP connections to local services by name"
)]
pub struct Config {
    /// Public TCP port; also names the registration socket.
    #[arg(value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Host the public listener binds to.
    #[arg(long, value_name = "HOST", default_value = DEFAULT_BIND_HOST)]
    pub bind_host: String,

    /// Directory holding the registration socket.
    #[arg(long, value_name = "DIR", default_value = DEFAULT_SOCKET_DIR)]
    pub socket_dir: Utf8PathBuf,

    /// Milliseconds a peer may take to send its service name (0 waits forever).
    #[arg(long, value_name = "MILLIS", default_value_t = DEFAULT_ANNOUNCE_TIMEOUT_MS)]
    pub announce_timeout_ms: u64,

    /// Log filter expression, for example `info` or `tcpmuxd=debug`.
    #[arg(long, value_name = "FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,

    /// Log output format: compact, pretty or json.
    #[arg(long, value_name = "FORMAT", default_value_t = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_host: DEFAULT_BIND_HOST.to_owned(),
            socket_dir: Utf8PathBuf::from(DEFAULT_SOCKET_DIR),
            announce_timeout_ms: DEFAULT_ANNOUNCE_TIMEOUT_MS,
            log_filter: default_log_filter().to_owned(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Parses the process command line.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_iter(std::env::args_os())
    }

    /// Parses an explicit argument list; the first item is the program name.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args).map_err(|source| ConfigError::Cli { source })
    }

    /// Endpoint of the public TCP listener.
    #[must_use]
    pub fn public_endpoint(&self) -> SocketEndpoint {
        SocketEndpoint::tcp(self.bind_host.clone(), self.port)
    }

    /// Path of the registration socket, `<socket_dir>/tcpmuxd.<port>`.
    #[must_use]
    pub fn registration_path(&self) -> Utf8PathBuf {
        self.socket_dir
            .join(format!("{REGISTRATION_SOCKET_PREFIX}.{}", self.port))
    }

    /// Endpoint of the registration listener.
    #[must_use]
    pub fn registration_endpoint(&self) -> SocketEndpoint {
        SocketEndpoint::unix(self.registration_path())
    }

    /// Bound on reading an announcement line, if any.
    #[must_use]
    pub const fn announce_timeout(&self) -> Option<Duration> {
        if self.announce_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.announce_timeout_ms))
        }
    }

    /// Log filter expression handed to the tracing subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

/// Errors raised while parsing the command line.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The arguments were rejected, or help/version output was requested.
    #[error("{source}")]
    Cli {
        /// Underlying clap error, which carries the rendered message.
        #[source]
        source: clap::Error,
    },
}

impl ConfigError {
    /// Returns true when the "error" is a help or version request.
    #[must_use]
    pub fn is_informational(&self) -> bool {
        let Self::Cli { source } = self;
        matches!(
            source.kind(),
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
        )
    }

    /// Renders the message the way clap would: help and version text to
    /// stdout, usage errors to stderr.
    pub fn print(&self) -> io::Result<()> {
        let Self::Cli { source } = self;
        source.print()
    }
}
