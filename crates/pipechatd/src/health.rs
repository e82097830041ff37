//! Structured health reporting for broker lifecycle events.

use std::sync::Arc;

use camino::Utf8Path;

use pipechat_config::Config;

use crate::bootstrap::BootstrapError;
use crate::moderation::ModerationSettings;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the moderation worker thread is running.
    fn moderation_started(&self, settings: &ModerationSettings);

    /// Invoked once the multiplexer accepts registrations.
    fn broker_ready(&self, registration: &Utf8Path, max_peers: usize);

    /// Invoked after the multiplexer and the moderation worker have stopped.
    fn broker_stopped(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn moderation_started(&self, settings: &ModerationSettings) {
        (**self).moderation_started(settings);
    }

    fn broker_ready(&self, registration: &Utf8Path, max_peers: usize) {
        (**self).broker_ready(registration, max_peers);
    }

    fn broker_stopped(&self) {
        (**self).broker_stopped();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting broker bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            fifo_dir = %config.fifo_dir(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "broker bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "broker bootstrap failed"
        );
    }

    fn moderation_started(&self, settings: &ModerationSettings) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "moderation_started",
            threshold = settings.threshold,
            tally_capacity = settings.tally_capacity,
            policy = %settings.policy,
            signal = %settings.signal,
            "moderation worker started"
        );
    }

    fn broker_ready(&self, registration: &Utf8Path, max_peers: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "broker_ready",
            registration = %registration,
            max_peers,
            "broker accepting registrations"
        );
    }

    fn broker_stopped(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "broker_stopped",
            "broker and moderation worker stopped"
        );
    }
}
