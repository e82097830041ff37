//! Report tallying and forced termination, isolated on its own thread.
//!
//! The broker and the worker share no memory. Reports travel broker→worker
//! and termination notices worker→broker over two anonymous pipes, each line
//! carrying a single peer id. The worker exits once the broker closes the
//! report pipe.
//!
//! The broker's ends are non-blocking. A full report pipe drops the report
//! rather than stalling the multiplexer, and notices are drained on every
//! wake-up, so the worker's blocking notice writes always make progress.

use std::io::{self, BufReader, PipeReader, PipeWriter, Read};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::thread;

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use thiserror::Error;
use tracing::{debug, warn};

use pipechat_config::{Config, NoticePolicy, TerminationSignal};

use crate::broker::PeerId;

mod tally;
mod terminator;
mod worker;

pub use terminator::{SignalTerminator, TerminateError, Terminator};
use worker::ModerationWorker;

pub(crate) const MODERATION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::moderation");

const WORKER_THREAD_NAME: &str = "pipechat-moderation";
const NOTICE_CHUNK: usize = 256;

/// Tunables for the moderation worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModerationSettings {
    /// Reports tolerated before the target is terminated.
    pub threshold: u32,
    /// Distinct targets tracked at once.
    pub tally_capacity: usize,
    /// Whether notices repeat past the threshold.
    pub policy: NoticePolicy,
    /// Signal sent to the target.
    pub signal: TerminationSignal,
}

impl ModerationSettings {
    /// Extracts the moderation tunables from the shared configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.report_threshold,
            tally_capacity: config.tally_capacity,
            policy: config.notice_policy,
            signal: config.termination_signal,
        }
    }
}

/// Errors raised while starting or stopping the moderation worker.
#[derive(Debug, Error)]
pub enum ModerationError {
    /// Creating one of the worker pipes failed.
    #[error("failed to create moderation pipe: {source}")]
    Pipe {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Switching a broker-side pipe end to non-blocking mode failed.
    #[error("failed to configure moderation pipe: {source}")]
    Configure {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Spawning the worker thread failed.
    #[error("failed to spawn moderation worker: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The worker thread panicked.
    #[error("moderation worker panicked")]
    ThreadPanic,
}

/// Broker-side ends of a running worker.
#[derive(Debug)]
pub(crate) struct ModerationChannels {
    pub(crate) reports: PipeWriter,
    pub(crate) notices: NoticeReceiver,
    pub(crate) worker: WorkerHandle,
}

/// Starts the worker thread and returns the broker's ends of its pipes.
pub(crate) fn spawn<T>(
    settings: ModerationSettings,
    terminator: T,
) -> Result<ModerationChannels, ModerationError>
where
    T: Terminator + 'static,
{
    let (report_reader, report_writer) =
        io::pipe().map_err(|source| ModerationError::Pipe { source })?;
    let (notice_reader, notice_writer) =
        io::pipe().map_err(|source| ModerationError::Pipe { source })?;
    for end in [report_writer.as_raw_fd(), notice_reader.as_raw_fd()] {
        set_nonblocking(&end, true).map_err(|source| ModerationError::Configure { source })?;
    }

    let worker = ModerationWorker::new(settings, terminator);
    let handle = thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_owned())
        .spawn(move || worker.run(BufReader::new(report_reader), notice_writer))
        .map_err(|source| ModerationError::Spawn { source })?;

    Ok(ModerationChannels {
        reports: report_writer,
        notices: NoticeReceiver::new(notice_reader),
        worker: WorkerHandle {
            handle: Some(handle),
        },
    })
}

/// Read end of the termination notice pipe.
#[derive(Debug)]
pub(crate) struct NoticeReceiver {
    reader: PipeReader,
    pending: Vec<u8>,
    open: bool,
}

impl NoticeReceiver {
    fn new(reader: PipeReader) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            open: true,
        }
    }

    /// Descriptor to wait on, or `None` once the worker has gone away.
    pub(crate) fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.open.then(|| self.reader.as_fd())
    }

    /// Reads every notice available after readiness.
    ///
    /// Reading stops at `WouldBlock`, so a burst from the worker is consumed
    /// in a single wake-up.
    pub(crate) fn receive(&mut self) -> Vec<PeerId> {
        let mut chunk = [0_u8; NOTICE_CHUNK];
        while self.open {
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.open = false;
                    warn!(target: MODERATION_TARGET, "moderation worker closed its notice channel");
                }
                Ok(read) => self.pending.extend_from_slice(chunk.get(..read).unwrap_or_default()),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => {
                    self.open = false;
                    warn!(target: MODERATION_TARGET, error = %error, "notice read failed");
                }
            }
        }

        let mut targets = Vec::new();
        while let Some(position) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=position).collect();
            let text = String::from_utf8_lossy(&line);
            match text.trim().parse() {
                Ok(target) => targets.push(target),
                Err(error) => {
                    debug!(target: MODERATION_TARGET, error = %error, "ignoring malformed notice");
                }
            }
        }
        targets
    }

    /// Reads and discards notices until the worker closes its end.
    ///
    /// Used at shutdown, after the report pipe is closed, so a worker blocked
    /// on a full notice pipe can finish and be joined.
    pub(crate) fn discard_until_closed(&mut self) {
        if !self.open {
            return;
        }
        if let Err(error) = set_nonblocking(&self.reader, false) {
            warn!(target: MODERATION_TARGET, error = %error, "notice channel stays non-blocking");
            return;
        }
        let mut chunk = [0_u8; NOTICE_CHUNK];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(_) => {}
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    warn!(target: MODERATION_TARGET, error = %error, "notice read failed");
                    break;
                }
            }
        }
        self.open = false;
        self.pending.clear();
    }
}

/// Sets or clears `O_NONBLOCK` on a pipe end, keeping its other flags.
fn set_nonblocking(fd: &impl AsRawFd, enabled: bool) -> Result<(), Errno> {
    let bits = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_truncate(bits);
    flags.set(OFlag::O_NONBLOCK, enabled);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags)).map(drop)
}

/// Join handle for the worker thread.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    handle: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Waits for the worker; it exits once every report writer is dropped.
    pub(crate) fn join(mut self) -> Result<(), ModerationError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ModerationError::ThreadPanic),
            None => Ok(()),
        }
    }
}
