//! Applies peer lines to the registry: chat relay, commands and departures.
//!
//! [`Relay`] is driven by the multiplexer but has no I/O loop of its own, so
//! behaviour tests can call it directly against real FIFOs.

use std::collections::VecDeque;
use std::io::{self, Write};

use tracing::{debug, info, warn};

use super::BROKER_TARGET;
use super::channel::ReadOutcome;
use super::protocol::{Command, Departure, Notice, PeerId, chat_line};
use super::registry::{RegisterOutcome, Registry};

/// Whether the sender of a line is still connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Departed,
}

/// Routes lines between peers and towards the moderation worker.
///
/// `W` is the write end of the report channel.
#[derive(Debug)]
pub(crate) struct Relay<W> {
    registry: Registry,
    reports: W,
    reports_open: bool,
}

impl<W: Write> Relay<W> {
    pub(crate) fn new(registry: Registry, reports: W) -> Self {
        Self {
            registry,
            reports,
            reports_open: true,
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    #[cfg(test)]
    pub(crate) fn reports(&self) -> &W {
        &self.reports
    }

    /// Registers `id`, greets it and announces it to everybody else.
    pub(crate) fn admit(&mut self, id: PeerId) {
        match self.registry.register(id) {
            RegisterOutcome::Registered => {
                info!(
                    target: BROKER_TARGET,
                    peer = %id,
                    active = self.registry.len(),
                    "peer joined"
                );
                self.send_to(id, Notice::Welcome);
                if self.registry.contains(id) {
                    self.broadcast(Some(id), Notice::Joined(id).to_string());
                }
            }
            RegisterOutcome::AlreadyPresent => {
                debug!(target: BROKER_TARGET, peer = %id, "duplicate registration ignored");
            }
            RegisterOutcome::CapacityExceeded => {
                warn!(
                    target: BROKER_TARGET,
                    peer = %id,
                    active = self.registry.len(),
                    "registry full; registration dropped"
                );
            }
            RegisterOutcome::OpenFailed(error) => {
                warn!(
                    target: BROKER_TARGET,
                    peer = %id,
                    error = %error,
                    "could not attach peer channels; registration dropped"
                );
            }
        }
    }

    /// Reads once from a ready peer and dispatches the complete lines.
    pub(crate) fn service(&mut self, id: PeerId) {
        let Some(peer) = self.registry.get_mut(id) else {
            return;
        };
        let (outcome, lines) = match peer.receive() {
            Ok(received) => received,
            Err(error) => {
                warn!(target: BROKER_TARGET, peer = %id, error = %error, "peer read failed");
                self.depart(id, Departure::Closed);
                return;
            }
        };

        for line in &lines {
            if self.dispatch(id, line) == Flow::Departed {
                return;
            }
        }
        if outcome == ReadOutcome::Closed {
            self.depart(id, Departure::Closed);
        }
    }

    /// Interprets one line from `sender`.
    pub(crate) fn dispatch(&mut self, sender: PeerId, line: &str) -> Flow {
        if !self.registry.contains(sender) {
            return Flow::Departed;
        }
        match Command::parse(line) {
            Command::Quit => {
                self.depart(sender, Departure::Quit);
            }
            Command::Report(target) => {
                self.forward_report(sender, target);
            }
            Command::MalformedReport => {
                debug!(target: BROKER_TARGET, peer = %sender, "malformed report ignored");
            }
            Command::Clone => {
                self.send_to(sender, Notice::CloneHint);
            }
            Command::Chat(text) => {
                self.broadcast(Some(sender), chat_line(sender, text));
            }
        }
        if self.registry.contains(sender) {
            Flow::Continue
        } else {
            Flow::Departed
        }
    }

    /// Removes a peer named by a termination notice.
    pub(crate) fn expel(&mut self, target: PeerId) {
        if self.registry.contains(target) {
            info!(target: BROKER_TARGET, peer = %target, "peer expelled by moderation");
            self.depart(target, Departure::Moderated);
        } else {
            debug!(
                target: BROKER_TARGET,
                peer = %target,
                "termination notice for inactive peer ignored"
            );
        }
    }

    /// Removes `id` and tells the remaining peers.
    fn depart(&mut self, id: PeerId, reason: Departure) {
        if self.registry.remove(id) {
            info!(
                target: BROKER_TARGET,
                peer = %id,
                reason = ?reason,
                active = self.registry.len(),
                "peer left"
            );
            self.broadcast(None, Notice::Left(id, reason).to_string());
        }
    }

    fn send_to(&mut self, id: PeerId, notice: Notice) {
        let Some(peer) = self.registry.get_mut(id) else {
            return;
        };
        if let Err(error) = peer.send_line(&notice.to_string()) {
            warn!(target: BROKER_TARGET, peer = %id, error = %error, "write to peer failed");
            self.depart(id, Departure::Closed);
        }
    }

    /// Delivers `line` to every active peer except `exclude`.
    ///
    /// A recipient whose write fails is evicted, and its departure notice is
    /// queued behind the current delivery instead of recursing.
    fn broadcast(&mut self, exclude: Option<PeerId>, line: String) {
        let mut pending = VecDeque::from([(exclude, line)]);
        while let Some((skip, text)) = pending.pop_front() {
            let mut evicted = Vec::new();
            self.registry.for_each_active(|registry, id| {
                if Some(id) == skip {
                    return;
                }
                let Some(peer) = registry.get_mut(id) else {
                    return;
                };
                if let Err(error) = peer.send_line(&text) {
                    warn!(
                        target: BROKER_TARGET,
                        peer = %id,
                        error = %error,
                        "broadcast write failed; evicting recipient"
                    );
                    registry.remove(id);
                    evicted.push(id);
                }
            });
            pending.extend(
                evicted
                    .into_iter()
                    .map(|id| (None, Notice::Left(id, Departure::Closed).to_string())),
            );
        }
    }

    fn forward_report(&mut self, sender: PeerId, target: PeerId) {
        if self.reports_open {
            match self.write_report(target) {
                Ok(()) => {
                    debug!(
                        target: BROKER_TARGET,
                        reporter = %sender,
                        reported = %target,
                        "report forwarded"
                    );
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    warn!(
                        target: BROKER_TARGET,
                        reporter = %sender,
                        reported = %target,
                        "moderation worker is behind; report dropped"
                    );
                }
                Err(error) => {
                    self.reports_open = false;
                    warn!(
                        target: BROKER_TARGET,
                        error = %error,
                        "moderation worker unreachable; reports are no longer forwarded"
                    );
                }
            }
        }
        self.send_to(sender, Notice::ReportReceived(target));
    }

    /// Writes the report in one call.
    ///
    /// The line is shorter than `PIPE_BUF`, so a non-blocking pipe either
    /// takes all of it or fails with `WouldBlock`.
    fn write_report(&mut self, target: PeerId) -> io::Result<()> {
        let line = format!("{target}\n");
        loop {
            match self.reports.write(line.as_bytes()) {
                Ok(written) if written == line.len() => return Ok(()),
                Ok(_) => return Err(io::ErrorKind::WriteZero.into()),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
    }

    /// Disconnects every peer and hands back the report writer.
    pub(crate) fn close(mut self) -> W {
        self.registry.clear();
        self.reports
    }
}
