//! Behavioural tests driving the relay directly against real FIFOs.

use std::cell::RefCell;
use std::collections::BTreeMap;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::broker::{PeerId, Registry, Relay};
use crate::tests::support::{FakePeer, PeerDir, StepResult, parse_ids};

const CAPACITY: usize = 8;
const MAX_LINE: usize = 256;

struct RelayWorld {
    peers: BTreeMap<u32, FakePeer>,
    inbox: BTreeMap<u32, Vec<String>>,
    relay: Relay<Vec<u8>>,
    dir: PeerDir,
}

impl RelayWorld {
    fn new() -> Self {
        let dir = PeerDir::new();
        let registry = Registry::new(dir.paths(), CAPACITY, dir.policy(), MAX_LINE);
        Self {
            peers: BTreeMap::new(),
            inbox: BTreeMap::new(),
            relay: Relay::new(registry, Vec::new()),
            dir,
        }
    }

    fn join(&mut self, raw: u32) {
        let mut peer = FakePeer::prepare(&self.dir, raw);
        self.relay.admit(peer.id());
        peer.attach();
        self.peers.insert(raw, peer);
    }

    fn peer(&mut self, raw: u32) -> Result<&mut FakePeer, String> {
        self.peers
            .get_mut(&raw)
            .ok_or_else(|| format!("peer {raw} was never connected"))
    }

    /// Moves newly received lines into the peer's inbox.
    fn collect(&mut self, raw: u32) -> Result<&mut Vec<String>, String> {
        let lines = self.peer(raw)?.take_lines();
        let inbox = self.inbox.entry(raw).or_default();
        inbox.extend(lines);
        Ok(inbox)
    }

    fn send(&mut self, raw: u32, payload: &str) -> StepResult {
        self.peer(raw)?.write(payload);
        self.relay.service(peer_id(raw)?);
        Ok(())
    }
}

fn peer_id(raw: u32) -> Result<PeerId, String> {
    PeerId::new(raw).ok_or_else(|| format!("{raw} is not a valid peer id"))
}

#[fixture]
fn world() -> RefCell<RelayWorld> {
    RefCell::new(RelayWorld::new())
}

#[given("peers \"{ids}\" are connected")]
fn given_connected(world: &RefCell<RelayWorld>, ids: String) -> StepResult {
    let ids = parse_ids(&ids)?;
    let mut world = world.borrow_mut();
    for raw in &ids {
        world.join(*raw);
    }
    for raw in ids {
        world.peer(raw)?.clear();
    }
    Ok(())
}

#[given("peer {id} stops reading")]
fn given_stops_reading(world: &RefCell<RelayWorld>, id: u32) -> StepResult {
    world.borrow_mut().peer(id)?.stop_reading();
    Ok(())
}

#[when("peer {id} joins")]
fn when_joins(world: &RefCell<RelayWorld>, id: u32) {
    world.borrow_mut().join(id);
}

#[when("peer {id} sends \"{text}\"")]
fn when_sends(world: &RefCell<RelayWorld>, id: u32, text: String) -> StepResult {
    world.borrow_mut().send(id, &format!("{text}\n"))
}

#[when("peer {id} sends \"{text}\" terminated by CRLF")]
fn when_sends_crlf(world: &RefCell<RelayWorld>, id: u32, text: String) -> StepResult {
    world.borrow_mut().send(id, &format!("{text}\r\n"))
}

#[when("peer {id} writes the fragment \"{text}\"")]
fn when_writes_fragment(world: &RefCell<RelayWorld>, id: u32, text: String) -> StepResult {
    world.borrow_mut().send(id, &text)
}

#[when("peer {id} hangs up")]
fn when_hangs_up(world: &RefCell<RelayWorld>, id: u32) -> StepResult {
    let mut world = world.borrow_mut();
    world.peer(id)?.hang_up();
    world.relay.service(peer_id(id)?);
    Ok(())
}

#[when("peer {id} is admitted again")]
fn when_admitted_again(world: &RefCell<RelayWorld>, id: u32) -> StepResult {
    world.borrow_mut().relay.admit(peer_id(id)?);
    Ok(())
}

#[when("moderation expels peer {id}")]
fn when_expelled(world: &RefCell<RelayWorld>, id: u32) -> StepResult {
    world.borrow_mut().relay.expel(peer_id(id)?);
    Ok(())
}

#[then("peer {id} receives \"{text}\"")]
fn then_receives(world: &RefCell<RelayWorld>, id: u32, text: String) -> StepResult {
    let mut world = world.borrow_mut();
    let inbox = world.collect(id)?;
    match inbox.iter().position(|line| *line == text) {
        Some(index) => {
            inbox.remove(index);
            Ok(())
        }
        None => Err(format!("peer {id} did not receive {text:?}; got {inbox:?}")),
    }
}

#[then("peer {id} received nothing else")]
fn then_nothing_else(world: &RefCell<RelayWorld>, id: u32) -> StepResult {
    let mut world = world.borrow_mut();
    let inbox = world.collect(id)?;
    if inbox.is_empty() {
        Ok(())
    } else {
        Err(format!("peer {id} received unexpected lines {inbox:?}"))
    }
}

#[then("every line peer {id} received ends in a single newline")]
fn then_single_newlines(world: &RefCell<RelayWorld>, id: u32) -> StepResult {
    let mut world = world.borrow_mut();
    let transcript = world.peer(id)?.transcript().to_owned();
    if transcript.is_empty() || !transcript.ends_with('\n') {
        return Err(format!("peer {id} holds an unterminated transcript {transcript:?}"));
    }
    if transcript.contains('\r') || transcript.contains("\n\n") {
        return Err(format!("peer {id} saw stray line endings in {transcript:?}"));
    }
    Ok(())
}

#[then("peer {id} is no longer registered")]
fn then_not_registered(world: &RefCell<RelayWorld>, id: u32) -> StepResult {
    let registered = world.borrow().relay.registry().contains(peer_id(id)?);
    if registered {
        return Err(format!("peer {id} is still registered"));
    }
    Ok(())
}

#[then("peer {id} sees its channel closed")]
fn then_channel_closed(world: &RefCell<RelayWorld>, id: u32) -> StepResult {
    if world.borrow_mut().peer(id)?.saw_close() {
        Ok(())
    } else {
        Err(format!("peer {id} still has a broker writer attached"))
    }
}

#[then("moderation received the report line \"{line}\"")]
fn then_report_forwarded(world: &RefCell<RelayWorld>, line: String) {
    let world = world.borrow();
    let reports = String::from_utf8_lossy(world.relay.reports());
    assert_eq!(reports, format!("{line}\n"));
}

#[then("moderation received no report")]
fn then_no_report(world: &RefCell<RelayWorld>) {
    assert!(world.borrow().relay.reports().is_empty());
}

#[then("{count} peer is registered")]
fn then_one_registered(world: &RefCell<RelayWorld>, count: usize) {
    assert_eq!(world.borrow().relay.registry().len(), count);
}

#[then("{count} peers are registered")]
fn then_many_registered(world: &RefCell<RelayWorld>, count: usize) {
    assert_eq!(world.borrow().relay.registry().len(), count);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "A newcomer is greeted and announced"
)]
fn newcomer_is_greeted(world: RefCell<RelayWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "Chat lines reach every peer except the sender"
)]
fn chat_skips_sender(world: RefCell<RelayWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "Quitting removes the peer and tells the others"
)]
fn quitting_announces_departure(world: RefCell<RelayWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "Hanging up counts as leaving"
)]
fn hang_up_is_departure(world: RefCell<RelayWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "A recipient that stopped reading is evicted during a broadcast"
)]
fn broken_recipient_is_evicted(world: RefCell<RelayWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "Fragments are held until the line is complete"
)]
fn fragments_wait_for_newline(world: RefCell<RelayWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "Carriage returns are dropped from relayed lines"
)]
fn carriage_returns_are_dropped(world: RefCell<RelayWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "Asking the broker to clone yields a hint"
)]
fn clone_request_gets_hint(world: RefCell<RelayWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "Reports are forwarded to moderation and acknowledged"
)]
fn reports_are_forwarded(world: RefCell<RelayWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "Malformed reports are ignored"
)]
fn malformed_reports_are_ignored(world: RefCell<RelayWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "Moderation expels a connected peer"
)]
fn moderation_expels_peer(world: RefCell<RelayWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "Expelling an inactive peer changes nothing"
)]
fn expelling_inactive_peer_is_noop(world: RefCell<RelayWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/relay.feature",
    name = "A repeated announcement keeps a single registration"
)]
fn duplicate_admission_is_ignored(world: RefCell<RelayWorld>) {
    drop(world);
}
