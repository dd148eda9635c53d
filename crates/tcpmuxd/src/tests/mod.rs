//! Test suites for the multiplexer daemon.

pub(crate) mod support;
