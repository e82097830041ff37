//! Delivers the termination signal to an offending peer process.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use pipechat_config::TerminationSignal;
use thiserror::Error;

use crate::broker::PeerId;

/// Capability to terminate a peer process.
pub trait Terminator: Send {
    /// Sends `signal` to `target`. Failure is reported, never retried.
    fn terminate(&self, target: PeerId, signal: TerminationSignal) -> Result<(), TerminateError>;
}

/// Raised when a termination request could not be delivered.
#[derive(Debug, Error)]
#[error("failed to signal peer {target}: {source}")]
pub struct TerminateError {
    /// Peer that was targeted.
    pub target: PeerId,
    /// Underlying OS error, typically `ESRCH` for a peer that already exited.
    #[source]
    pub source: Errno,
}

/// Terminator backed by `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalTerminator;

impl Terminator for SignalTerminator {
    fn terminate(&self, target: PeerId, signal: TerminationSignal) -> Result<(), TerminateError> {
        kill(target.as_pid(), to_signal(signal)).map_err(|source| TerminateError { target, source })
    }
}

fn to_signal(signal: TerminationSignal) -> Signal {
    match signal {
        TerminationSignal::Term => Signal::SIGTERM,
        TerminationSignal::Kill => Signal::SIGKILL,
    }
}
