//! Report processing loop run on the moderation thread.

use std::io::{BufRead, Write};

use tracing::{debug, info, warn};

use pipechat_config::NoticePolicy;

use super::tally::{ReportTally, TallyOutcome};
use super::terminator::Terminator;
use super::{MODERATION_TARGET, ModerationSettings};
use crate::broker::PeerId;

/// Owns the tally and turns report lines into termination notices.
pub(crate) struct ModerationWorker<T> {
    tally: ReportTally,
    settings: ModerationSettings,
    terminator: T,
}

impl<T: Terminator> ModerationWorker<T> {
    pub(crate) fn new(settings: ModerationSettings, terminator: T) -> Self {
        Self {
            tally: ReportTally::new(settings.tally_capacity),
            settings,
            terminator,
        }
    }

    /// Counts one report and returns the target when a notice is due.
    pub(crate) fn handle_report(&mut self, target: PeerId) -> Option<PeerId> {
        let count = match self.tally.record(target) {
            TallyOutcome::Counted(count) => count,
            TallyOutcome::CapacityExceeded => {
                warn!(
                    target: MODERATION_TARGET,
                    reported = %target,
                    capacity = self.settings.tally_capacity,
                    "report tally full; report dropped"
                );
                return None;
            }
        };
        if count <= self.settings.threshold {
            debug!(target: MODERATION_TARGET, reported = %target, count, "report counted");
            return None;
        }

        let announce = match self.settings.policy {
            NoticePolicy::Once => self.tally.claim_notice(target),
            NoticePolicy::EveryReport => true,
        };
        if !announce {
            debug!(
                target: MODERATION_TARGET,
                reported = %target,
                count,
                "target already terminated"
            );
            return None;
        }

        match self.terminator.terminate(target, self.settings.signal) {
            Ok(()) => info!(
                target: MODERATION_TARGET,
                reported = %target,
                count,
                signal = %self.settings.signal,
                "report threshold exceeded; peer terminated"
            ),
            Err(error) => warn!(
                target: MODERATION_TARGET,
                reported = %target,
                count,
                error = %error,
                "termination request failed"
            ),
        }
        Some(target)
    }

    /// Processes report lines until the report channel closes or the notice
    /// channel breaks.
    pub(crate) fn run<R, W>(mut self, reports: R, mut notices: W)
    where
        R: BufRead,
        W: Write,
    {
        info!(target: MODERATION_TARGET, "moderation worker running");
        for line in reports.lines() {
            let line = match line {
                Ok(line) => line,
                Err(error) => {
                    warn!(target: MODERATION_TARGET, error = %error, "report channel failed");
                    break;
                }
            };
            let Ok(target) = line.trim().parse::<PeerId>() else {
                debug!(target: MODERATION_TARGET, line = %line, "ignoring malformed report");
                continue;
            };
            let Some(expelled) = self.handle_report(target) else {
                continue;
            };
            if let Err(error) = writeln!(notices, "{expelled}").and_then(|()| notices.flush()) {
                warn!(target: MODERATION_TARGET, error = %error, "notice channel closed");
                break;
            }
        }
        info!(target: MODERATION_TARGET, "moderation worker stopped");
    }

    #[cfg(test)]
    pub(crate) fn reports_for(&self, target: PeerId) -> u32 {
        self.tally.count(target)
    }
}
