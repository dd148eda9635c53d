//! Shared fixtures for the daemon test suites.

mod reporter;
mod world;

pub(crate) use reporter::{HealthEvent, RecordingHealthReporter};
pub(crate) use world::MuxWorld;
