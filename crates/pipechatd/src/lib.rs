//! Broker daemon for the pipechat FIFO chat relay.
//!
//! Chat clients never talk to each other directly. Each one creates a pair of
//! named pipes, announces its process id on the well-known registration FIFO
//! and from then on exchanges newline-terminated lines with the broker:
//!
//! - free text is relayed to every other connected peer as `<pid>: <text>`;
//! - `salir`/`quit` disconnects;
//! - `reportar <pid>`/`report <pid>` files a report with the moderation
//!   worker, which terminates a peer once its reports exceed the configured
//!   threshold;
//! - `clonar`/`clone` is answered with a hint, since duplication happens on
//!   the client side.
//!
//! A single multiplexer thread owns the registry and waits on every
//! descriptor with `poll(2)`. The moderation worker runs on its own thread
//! and only exchanges peer ids with the broker through two pipes.
//!
//! [`run_daemon`] wires everything together: configuration and telemetry
//! bootstrap, a singleton lock with pid and health files, optional
//! daemonisation, and an orderly shutdown on `SIGTERM`, `SIGINT`, `SIGQUIT`
//! or `SIGHUP`.

mod bootstrap;
mod broker;
mod health;
mod moderation;
mod process;
mod telemetry;

pub use bootstrap::{BootstrapError, ConfigLoader, Daemon, SystemConfigLoader, bootstrap_with};
pub use broker::{BrokerError, ChannelError, PeerId, PeerIdParseError};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use moderation::{
    ModerationError, ModerationSettings, SignalTerminator, TerminateError, Terminator,
};
pub use process::{
    DaemonizeError, Daemonizer, LaunchError, LaunchMode, ShutdownError, ShutdownSignal,
    SystemDaemonizer, SystemShutdownSignal, run_daemon,
};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
