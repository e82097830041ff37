//! Test double for [`HealthReporter`] that records lifecycle events.

use std::sync::Mutex;

use camino::Utf8Path;

use pipechat_config::Config;

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;
use crate::moderation::ModerationSettings;

/// Lifecycle events observed during a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ModerationStarted { threshold: u32 },
    BrokerReady { max_peers: usize },
    BrokerStopped,
}

#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn moderation_started(&self, settings: &ModerationSettings) {
        self.record(HealthEvent::ModerationStarted {
            threshold: settings.threshold,
        });
    }

    fn broker_ready(&self, _registration: &Utf8Path, max_peers: usize) {
        self.record(HealthEvent::BrokerReady { max_peers });
    }

    fn broker_stopped(&self) {
        self.record(HealthEvent::BrokerStopped);
    }
}
