//! Bounded report counts per target.

use std::collections::HashMap;

use crate::broker::PeerId;

/// Result of recording one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TallyOutcome {
    /// The target's count after this report.
    Counted(u32),
    /// The target is new and the tally is full; the report was dropped.
    CapacityExceeded,
}

#[derive(Debug, Default)]
struct TallyEntry {
    count: u32,
    noticed: bool,
}

/// Report counts for at most `capacity` distinct targets.
///
/// Entries are never evicted, so counts only grow.
#[derive(Debug)]
pub(crate) struct ReportTally {
    entries: HashMap<PeerId, TallyEntry>,
    capacity: usize,
}

impl ReportTally {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    pub(crate) fn record(&mut self, target: PeerId) -> TallyOutcome {
        if !self.entries.contains_key(&target) && self.entries.len() >= self.capacity {
            return TallyOutcome::CapacityExceeded;
        }
        let entry = self.entries.entry(target).or_default();
        entry.count = entry.count.saturating_add(1);
        TallyOutcome::Counted(entry.count)
    }

    /// Marks `target` as announced; `true` only the first time.
    pub(crate) fn claim_notice(&mut self, target: PeerId) -> bool {
        self.entries
            .get_mut(&target)
            .is_some_and(|entry| !std::mem::replace(&mut entry.noticed, true))
    }

    #[cfg(test)]
    pub(crate) fn count(&self, target: PeerId) -> u32 {
        self.entries.get(&target).map_or(0, |entry| entry.count)
    }
}
