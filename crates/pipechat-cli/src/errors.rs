//! Error types for the client runtime.

use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use nix::errno::Errno;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to prepare fifo directory: {0}")]
    FifoDirectory(#[from] pipechat_config::FifoDirError),
    #[error("failed to create fifo '{path}': {source}")]
    CreateFifo { path: Utf8PathBuf, source: Errno },
    #[error("failed to open fifo '{path}': {source}")]
    OpenFifo { path: Utf8PathBuf, source: io::Error },
    #[error("no broker is listening on '{path}' after {attempts} attempts")]
    BrokerUnavailable { path: Utf8PathBuf, attempts: u32 },
    #[error("failed to announce to the broker: {0}")]
    Announce(io::Error),
    #[error("failed to send a line to the broker: {0}")]
    Send(io::Error),
    #[error("failed to read standard input: {0}")]
    ReadInput(io::Error),
    #[error("failed to start a copy of the client: {0}")]
    Clone(io::Error),
    #[error("the broker relay thread panicked")]
    ReaderPanic,
}
