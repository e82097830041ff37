//! Error types for FIFO channels and the multiplexer.

use std::io;

use camino::Utf8PathBuf;
use nix::errno::Errno;
use thiserror::Error;

/// Errors raised while creating or opening a named pipe.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// `mkfifo` failed.
    #[error("failed to create fifo {path}: {source}")]
    Create {
        /// FIFO that could not be created.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Removing a stale node before `mkfifo` failed.
    #[error("failed to remove stale fifo {path}: {source}")]
    RemoveStale {
        /// Path of the stale node.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Opening the FIFO failed.
    #[error("failed to open fifo {path}: {source}")]
    Open {
        /// FIFO that could not be opened.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Nobody opened the read end of an outbound FIFO in time.
    #[error("no reader attached to {path} after {attempts} attempts")]
    NoReader {
        /// Outbound FIFO path.
        path: Utf8PathBuf,
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Errors surfaced while binding or running the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The registration FIFO could not be prepared.
    #[error("failed to prepare registration fifo: {source}")]
    Registration {
        /// Underlying channel error.
        #[source]
        source: ChannelError,
    },
    /// The readiness wait failed with an unrecoverable error.
    #[error("readiness wait failed: {source}")]
    Poll {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Spawning the multiplexer thread failed.
    #[error("failed to spawn multiplexer thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The multiplexer thread panicked.
    #[error("multiplexer thread panicked")]
    ThreadPanic,
}
