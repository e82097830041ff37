//! Shared fixtures for the broker test suites.

mod config_loader;
mod fifo;
mod reporter;
mod terminator;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use fifo::{FakePeer, POLL_INTERVAL, PeerDir, WAIT_TIMEOUT};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use terminator::RecordingTerminator;

/// Outcome type for fallible BDD steps.
pub type StepResult = Result<(), String>;

/// Splits a space separated list of peer ids taken from a step.
pub fn parse_ids(list: &str) -> Result<Vec<u32>, String> {
    list.split_whitespace()
        .map(|raw| {
            raw.parse::<u32>()
                .map_err(|error| format!("bad peer id {raw:?}: {error}"))
        })
        .collect()
}
