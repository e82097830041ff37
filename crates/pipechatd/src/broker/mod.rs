//! FIFO chat broker: peer registry, readiness loop and line relay.
//!
//! A single multiplexer thread owns every peer descriptor. It waits on the
//! registration FIFO, each peer's inbound FIFO and the moderation notice
//! pipe, then admits, relays or expels peers. Nothing else touches the
//! registry, so no locking is involved.

use std::io::PipeWriter;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use pipechat_config::Config;

use crate::moderation::{ModerationChannels, NoticeReceiver, WorkerHandle};

mod channel;
mod errors;
mod line_buffer;
mod multiplexer;
mod protocol;
mod registration;
mod registry;
mod relay;

pub use errors::{BrokerError, ChannelError};
pub use protocol::{PeerId, PeerIdParseError};
pub(crate) use registration::RegistrationChannel;

#[cfg(test)]
pub(crate) use self::channel::{ConnectPolicy, create_fifo};
#[cfg(test)]
pub(crate) use self::registry::Registry;
#[cfg(test)]
pub(crate) use self::relay::Relay;

pub(crate) const BROKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::broker");

const MULTIPLEXER_THREAD_NAME: &str = "pipechat-broker";

/// Everything the multiplexer thread owns.
#[derive(Debug)]
pub(crate) struct Broker {
    registration: RegistrationChannel,
    relay: relay::Relay<PipeWriter>,
    notices: NoticeReceiver,
    worker: WorkerHandle,
    poll_timeout_ms: u16,
}

impl Broker {
    /// Assembles a broker around an open registration FIFO and a running
    /// moderation worker.
    pub(crate) fn new(
        config: &Config,
        registration: RegistrationChannel,
        moderation: ModerationChannels,
    ) -> Self {
        let registry = registry::Registry::new(
            config.channel_paths(),
            config.max_peers,
            channel::ConnectPolicy::from_config(config),
            config.max_line_bytes,
        );
        let ModerationChannels {
            reports,
            notices,
            worker,
        } = moderation;
        Self {
            registration,
            relay: relay::Relay::new(registry, reports),
            notices,
            worker,
            poll_timeout_ms: config.poll_timeout_ms,
        }
    }

    pub(crate) fn registration_path(&self) -> &Utf8Path {
        self.registration.path()
    }

    /// Runs the multiplexer on a dedicated thread.
    pub(crate) fn start(self) -> Result<BrokerHandle, BrokerError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let registration = self.registration_path().to_path_buf();
        let handle = thread::Builder::new()
            .name(MULTIPLEXER_THREAD_NAME.to_owned())
            .spawn(move || {
                let mut broker = self;
                let result = multiplexer::run(&mut broker, &shutdown_flag);
                broker.close();
                result
            })
            .map_err(|source| BrokerError::Spawn { source })?;
        Ok(BrokerHandle {
            shutdown,
            registration,
            handle: Some(handle),
        })
    }

    /// Disconnects every peer, stops the worker and unlinks the
    /// registration FIFO.
    fn close(self) {
        let Self {
            registration,
            relay,
            mut notices,
            worker,
            ..
        } = self;
        let reports = relay.close();
        drop(reports);
        notices.discard_until_closed();
        if let Err(error) = worker.join() {
            warn!(target: BROKER_TARGET, error = %error, "moderation worker did not stop cleanly");
        }
        drop(registration);
    }
}

/// Handle to the multiplexer thread.
#[derive(Debug)]
pub(crate) struct BrokerHandle {
    shutdown: Arc<AtomicBool>,
    registration: Utf8PathBuf,
    handle: Option<thread::JoinHandle<Result<(), BrokerError>>>,
}

impl BrokerHandle {
    /// Asks the loop to stop at its next wake-up.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub(crate) fn registration_path(&self) -> &Utf8Path {
        self.registration.as_path()
    }

    /// Waits for the loop and its cleanup to finish.
    pub(crate) fn join(mut self) -> Result<(), BrokerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| BrokerError::ThreadPanic)?,
            None => Ok(()),
        }
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
