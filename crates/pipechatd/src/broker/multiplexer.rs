//! The readiness loop driving the broker.

use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, poll};
use tracing::{debug, info};

use super::protocol::PeerId;
use super::{BROKER_TARGET, Broker, BrokerError};

/// Descriptors that reported readiness in one wait.
#[derive(Debug, Default)]
struct Readiness {
    registration: bool,
    notices: bool,
    peers: Vec<PeerId>,
}

/// Loops until `shutdown` is raised or the wait fails irrecoverably.
pub(super) fn run(broker: &mut Broker, shutdown: &AtomicBool) -> Result<(), BrokerError> {
    info!(
        target: BROKER_TARGET,
        registration = %broker.registration_path(),
        "multiplexer running"
    );
    while !shutdown.load(Ordering::SeqCst) {
        let ready = match wait(broker) {
            Ok(ready) => ready,
            Err(Errno::EINTR) => continue,
            Err(source) => return Err(BrokerError::Poll { source }),
        };
        handle(broker, ready)?;
    }
    info!(
        target: BROKER_TARGET,
        active = broker.relay.registry().len(),
        "multiplexer stopping"
    );
    Ok(())
}

fn wait(broker: &Broker) -> Result<Readiness, Errno> {
    let registry = broker.relay.registry();
    let notice_fd = broker.notices.poll_fd();

    let mut fds = Vec::with_capacity(registry.len() + 2);
    fds.push(PollFd::new(broker.registration.as_fd(), PollFlags::POLLIN));
    if let Some(fd) = notice_fd {
        fds.push(PollFd::new(fd, PollFlags::POLLIN));
    }
    let mut ids = Vec::with_capacity(registry.len());
    for peer in registry.peers() {
        ids.push(peer.id());
        fds.push(PollFd::new(peer.inbound().as_fd(), PollFlags::POLLIN));
    }

    if poll(&mut fds, broker.poll_timeout_ms)? == 0 {
        return Ok(Readiness::default());
    }

    let mut flags = fds.iter().map(is_ready);
    let registration = flags.next().unwrap_or(false);
    let notices = notice_fd.is_some() && flags.next().unwrap_or(false);
    let peers = ids
        .into_iter()
        .zip(flags)
        .filter_map(|(id, ready)| ready.then_some(id))
        .collect();
    Ok(Readiness {
        registration,
        notices,
        peers,
    })
}

/// Hang-ups and errors count as readiness so the following read can observe
/// end-of-file or the failure.
fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|events| {
        events.intersects(
            PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL,
        )
    })
}

fn handle(broker: &mut Broker, ready: Readiness) -> Result<(), BrokerError> {
    if ready.registration {
        for id in broker.registration.receive()? {
            broker.relay.admit(id);
        }
    }
    if ready.notices {
        for target in broker.notices.receive() {
            broker.relay.expel(target);
        }
    }
    for id in ready.peers {
        if broker.relay.registry().contains(id) {
            broker.relay.service(id);
        } else {
            debug!(target: BROKER_TARGET, peer = %id, "skipping peer removed earlier this cycle");
        }
    }
    Ok(())
}
