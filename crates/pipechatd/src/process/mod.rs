//! Process supervision: singleton lock, daemonisation and shutdown.

pub(crate) mod daemonizer;
mod errors;
mod files;
mod guard;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use daemonizer::{DaemonizeError, Daemonizer, SystemDaemonizer};
pub use errors::LaunchError;
pub use launch::{LaunchMode, run_daemon};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
pub(crate) const FOREGROUND_ENV_VAR: &str = "PIPECHAT_FOREGROUND";
