//! Terminator double that records targets instead of signalling them.

use std::sync::{Arc, Mutex};

use pipechat_config::TerminationSignal;

use crate::broker::PeerId;
use crate::moderation::{TerminateError, Terminator};

#[derive(Debug, Clone, Default)]
pub struct RecordingTerminator {
    calls: Arc<Mutex<Vec<(PeerId, TerminationSignal)>>>,
}

impl RecordingTerminator {
    pub fn targets(&self) -> Vec<PeerId> {
        self.calls
            .lock()
            .expect("terminator mutex poisoned")
            .iter()
            .map(|(target, _)| *target)
            .collect()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, target: PeerId, signal: TerminationSignal) -> Result<(), TerminateError> {
        self.calls
            .lock()
            .expect("terminator mutex poisoned")
            .push((target, signal));
        Ok(())
    }
}
