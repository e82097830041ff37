//! FIFO naming shared by the broker and its peers.
//!
//! Every path the relay touches lives directly inside the configured FIFO
//! directory: one well-known registration FIFO plus a channel pair per peer,
//! keyed by the peer's process identifier.

use std::fs::DirBuilder;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// File name of the rendezvous FIFO peers announce themselves on.
pub const REGISTRATION_FIFO_NAME: &str = "chat_register.fifo";

/// Derives FIFO paths below a single directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPaths {
    dir: Utf8PathBuf,
}

impl ChannelPaths {
    /// Binds the helper to `dir`.
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding every FIFO.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        self.dir.as_path()
    }

    /// Registration FIFO read by the broker.
    #[must_use]
    pub fn registration(&self) -> Utf8PathBuf {
        self.dir.join(REGISTRATION_FIFO_NAME)
    }

    /// FIFO carrying bytes from peer `pid` to the broker.
    #[must_use]
    pub fn client_to_server(&self, pid: u32) -> Utf8PathBuf {
        self.dir.join(format!("chat_{pid}_cs.fifo"))
    }

    /// FIFO carrying bytes from the broker to peer `pid`.
    #[must_use]
    pub fn server_to_client(&self, pid: u32) -> Utf8PathBuf {
        self.dir.join(format!("chat_{pid}_sc.fifo"))
    }
}

/// Errors raised when preparing the FIFO directory.
#[derive(Debug, Error)]
pub enum FifoDirError {
    /// Failed to create the directory.
    #[error("failed to create fifo directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn prepare_directory(dir: &Utf8Path) -> Result<(), FifoDirError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    if let Err(source) = builder.create(dir.as_std_path())
        && source.kind() != std::io::ErrorKind::AlreadyExists
    {
        return Err(FifoDirError::CreateDirectory {
            path: dir.to_path_buf(),
            source,
        });
    }

    Ok(())
}
