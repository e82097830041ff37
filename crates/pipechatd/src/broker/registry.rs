//! Table of active peers and their channel pairs.
//!
//! The registry owns every peer descriptor. Removing a peer closes both of its
//! channels and unlinks its FIFOs, so a stale entry can never be written to.

use std::collections::BTreeMap;
use std::io;

use pipechat_config::ChannelPaths;
use tracing::debug;

use super::BROKER_TARGET;
use super::channel::{ConnectPolicy, InboundChannel, OutboundChannel, ReadOutcome, remove_fifo};
use super::errors::ChannelError;
use super::line_buffer::LineBuffer;
use super::protocol::PeerId;

/// A registered peer.
#[derive(Debug)]
pub(crate) struct Peer {
    id: PeerId,
    inbound: InboundChannel,
    outbound: OutboundChannel,
    buffer: LineBuffer,
}

impl Peer {
    pub(crate) fn id(&self) -> PeerId {
        self.id
    }

    pub(crate) fn inbound(&self) -> &InboundChannel {
        &self.inbound
    }

    pub(crate) fn send_line(&mut self, text: &str) -> io::Result<()> {
        self.outbound.send_line(text)
    }

    /// Reads once and returns the outcome with every complete line received.
    pub(crate) fn receive(&mut self) -> io::Result<(ReadOutcome, Vec<String>)> {
        let outcome = self.inbound.read_into(&mut self.buffer)?;
        let mut lines = self.buffer.drain_lines();
        if outcome == ReadOutcome::Closed {
            lines.extend(self.buffer.take_remainder());
        }
        Ok((outcome, lines))
    }
}

/// Result of a registration attempt.
#[derive(Debug)]
pub(crate) enum RegisterOutcome {
    /// The peer was admitted.
    Registered,
    /// A peer with the same id is already active; nothing changed.
    AlreadyPresent,
    /// The registry is full; the peer was not admitted.
    CapacityExceeded,
    /// One of the peer's FIFOs could not be opened.
    OpenFailed(ChannelError),
}

/// Active peers keyed by id.
#[derive(Debug)]
pub(crate) struct Registry {
    peers: BTreeMap<PeerId, Peer>,
    capacity: usize,
    paths: ChannelPaths,
    policy: ConnectPolicy,
    max_line: usize,
}

impl Registry {
    pub(crate) fn new(
        paths: ChannelPaths,
        capacity: usize,
        policy: ConnectPolicy,
        max_line: usize,
    ) -> Self {
        Self {
            peers: BTreeMap::new(),
            capacity,
            paths,
            policy,
            max_line,
        }
    }

    /// Opens the peer's channel pair and records it.
    ///
    /// The inbound side is opened first so the peer can attach its writer as
    /// soon as the broker is waiting on the outbound side.
    pub(crate) fn register(&mut self, id: PeerId) -> RegisterOutcome {
        if self.peers.contains_key(&id) {
            return RegisterOutcome::AlreadyPresent;
        }
        if self.peers.len() >= self.capacity {
            return RegisterOutcome::CapacityExceeded;
        }

        let inbound_path = self.paths.client_to_server(id.as_u32());
        let inbound = match InboundChannel::open(&inbound_path) {
            Ok(channel) => channel,
            Err(error) => return RegisterOutcome::OpenFailed(error),
        };
        let outbound_path = self.paths.server_to_client(id.as_u32());
        let outbound = match OutboundChannel::connect(&outbound_path, self.policy) {
            Ok(channel) => channel,
            Err(error) => return RegisterOutcome::OpenFailed(error),
        };

        self.peers.insert(
            id,
            Peer {
                id,
                inbound,
                outbound,
                buffer: LineBuffer::new(self.max_line),
            },
        );
        debug!(target: BROKER_TARGET, peer = %id, active = self.peers.len(), "peer registered");
        RegisterOutcome::Registered
    }

    /// Drops the peer, closing its channels and unlinking its FIFOs.
    ///
    /// Returns `false` when `id` was not registered.
    pub(crate) fn remove(&mut self, id: PeerId) -> bool {
        let Some(peer) = self.peers.remove(&id) else {
            return false;
        };
        drop(peer);
        remove_fifo(&self.paths.client_to_server(id.as_u32()));
        remove_fifo(&self.paths.server_to_client(id.as_u32()));
        debug!(target: BROKER_TARGET, peer = %id, active = self.peers.len(), "peer removed");
        true
    }

    /// Removes every peer.
    pub(crate) fn clear(&mut self) {
        for id in self.ids() {
            self.remove(id);
        }
    }

    pub(crate) fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub(crate) fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.peers.len()
    }

    /// Snapshot of the active ids in ascending order.
    pub(crate) fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub(crate) fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Visits every peer that was active when the walk began and is still
    /// active when its turn comes.
    ///
    /// The callback may remove any peer, including the one being visited.
    pub(crate) fn for_each_active<F>(&mut self, mut visit: F)
    where
        F: FnMut(&mut Self, PeerId),
    {
        for id in self.ids() {
            if self.contains(id) {
                visit(self, id);
            }
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.clear();
    }
}
