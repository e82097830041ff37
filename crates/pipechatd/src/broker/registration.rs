//! The well-known FIFO new peers announce themselves on.

use std::os::fd::{AsFd, BorrowedFd};

use camino::Utf8Path;
use pipechat_config::ChannelPaths;
use tracing::{debug, info, warn};

use super::BROKER_TARGET;
use super::channel::{InboundChannel, ReadOutcome, create_fifo, remove_fifo};
use super::errors::BrokerError;
use super::line_buffer::LineBuffer;
use super::protocol::PeerId;

const MAX_REGISTRATION_LINE: usize = 32;

/// Read side of the registration FIFO.
///
/// The FIFO is created on construction and unlinked on drop. Whenever every
/// writer has gone away the descriptor is replaced, so the rendezvous outlives
/// any single peer.
#[derive(Debug)]
pub(crate) struct RegistrationChannel {
    inbound: InboundChannel,
    buffer: LineBuffer,
}

impl RegistrationChannel {
    /// Creates and opens the registration FIFO inside the channel directory.
    pub(crate) fn create(paths: &ChannelPaths) -> Result<Self, BrokerError> {
        let path = paths.registration();
        create_fifo(&path).map_err(|source| BrokerError::Registration { source })?;
        let inbound =
            InboundChannel::open(&path).map_err(|source| BrokerError::Registration { source })?;
        info!(target: BROKER_TARGET, path = %path, "registration fifo ready");
        Ok(Self {
            inbound,
            buffer: LineBuffer::new(MAX_REGISTRATION_LINE),
        })
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        self.inbound.path()
    }

    /// Reads once and returns every announced peer id.
    ///
    /// Malformed announcements are logged and skipped. Only a failure to
    /// reopen the FIFO is reported as an error.
    pub(crate) fn receive(&mut self) -> Result<Vec<PeerId>, BrokerError> {
        let outcome = match self.inbound.read_into(&mut self.buffer) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(target: BROKER_TARGET, error = %error, "registration read failed");
                ReadOutcome::Closed
            }
        };

        let mut lines = self.buffer.drain_lines();
        if outcome == ReadOutcome::Closed {
            lines.extend(self.buffer.take_remainder());
            self.reopen()?;
        }

        Ok(lines.iter().filter_map(|line| parse_announcement(line)).collect())
    }

    fn reopen(&mut self) -> Result<(), BrokerError> {
        debug!(target: BROKER_TARGET, "registration writers gone; reopening");
        if self.inbound.reopen().is_ok() {
            return Ok(());
        }
        // The node itself disappeared; recreate it.
        let path = self.inbound.path().to_path_buf();
        warn!(target: BROKER_TARGET, path = %path, "recreating registration fifo");
        create_fifo(&path).map_err(|source| BrokerError::Registration { source })?;
        self.inbound
            .reopen()
            .map_err(|source| BrokerError::Registration { source })
    }
}

fn parse_announcement(line: &str) -> Option<PeerId> {
    let text = line.trim();
    if text.is_empty() {
        return None;
    }
    match text.parse() {
        Ok(id) => Some(id),
        Err(error) => {
            debug!(
                target: BROKER_TARGET,
                announcement = %text,
                error = %error,
                "ignoring malformed registration"
            );
            None
        }
    }
}

impl AsFd for RegistrationChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inbound.as_fd()
    }
}

impl Drop for RegistrationChannel {
    fn drop(&mut self) {
        remove_fifo(self.inbound.path());
    }
}
