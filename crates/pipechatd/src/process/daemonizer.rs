//! Detaches the broker from its controlling terminal.

use std::ffi::OsStr;

use daemonize_me::Daemon;
use thiserror::Error;
use tracing::info;

use pipechat_config::RuntimePaths;

use super::PROCESS_TARGET;

/// Abstraction over daemonisation strategies.
pub trait Daemonizer: Send + Sync {
    /// Detaches the process into the background.
    fn daemonize(&self, paths: &RuntimePaths) -> Result<(), DaemonizeError>;
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// System-level daemonisation failed.
    #[error("{0}")]
    System(#[from] daemonize_me::DaemonError),
}

/// Daemoniser that delegates to `daemonize-me`, running from the FIFO
/// directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDaemonizer;

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, paths: &RuntimePaths) -> Result<(), DaemonizeError> {
        info!(
            target: PROCESS_TARGET,
            fifo_dir = %paths.runtime_dir().display(),
            "detaching broker into the background"
        );
        Daemon::new()
            .work_dir(paths.runtime_dir())
            .name(OsStr::new(env!("CARGO_PKG_NAME")))
            .start()?;
        info!(target: PROCESS_TARGET, pid = std::process::id(), "broker detached");
        Ok(())
    }
}
