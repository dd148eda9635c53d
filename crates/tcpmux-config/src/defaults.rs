use std::time::Duration;

/// Public TCP port used when none is given on the command line.
pub const DEFAULT_PORT: u16 = 1;

/// Host the public listener binds when `--bind-host` is absent.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Directory holding the registration socket.
pub const DEFAULT_SOCKET_DIR: &str = "/tmp";

/// File name prefix of the registration socket; the port number follows.
pub const REGISTRATION_SOCKET_PREFIX: &str = "tcpmuxd";

/// Milliseconds a peer may take to send its announcement line.
pub const DEFAULT_ANNOUNCE_TIMEOUT_MS: u64 = 10_000;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the daemon.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the daemon.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}

/// Default bound on reading an announcement line.
#[must_use]
pub const fn default_announce_timeout() -> Duration {
    Duration::from_millis(DEFAULT_ANNOUNCE_TIMEOUT_MS)
}
