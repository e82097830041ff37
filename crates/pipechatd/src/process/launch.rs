//! Supervises broker launch sequencing and shutdown.

use std::env;
use std::sync::Arc;

use tracing::info;

use pipechat_config::RuntimePaths;

use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::broker::{Broker, RegistrationChannel};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::moderation::{self, ModerationSettings, SignalTerminator, Terminator};

use super::daemonizer::{Daemonizer, SystemDaemonizer};
use super::errors::LaunchError;
use super::guard::{HealthState, ProcessGuard};
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{FOREGROUND_ENV_VAR, PROCESS_TARGET};

/// Launch mode for the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; primarily used for debugging and tests.
    Foreground,
}

impl LaunchMode {
    fn detect() -> Self {
        if env::var_os(FOREGROUND_ENV_VAR).is_some() {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

/// Process-level collaborators needed to control the broker lifecycle.
pub(crate) struct ProcessControl<D, S> {
    pub(crate) mode: LaunchMode,
    pub(crate) daemonizer: D,
    pub(crate) shutdown: S,
}

/// Service dependencies required to construct the broker runtime.
pub(crate) struct ServiceDeps<L, T> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) terminator: T,
}

/// Collaborators required to launch the broker.
pub(crate) struct LaunchPlan<L, D, S, T> {
    pub(crate) process: ProcessControl<D, S>,
    pub(crate) services: ServiceDeps<L, T>,
}

/// Runs the broker using the production collaborators.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        process: ProcessControl {
            mode: LaunchMode::detect(),
            daemonizer: SystemDaemonizer,
            shutdown: SystemShutdownSignal,
        },
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredHealthReporter::new()),
            terminator: SignalTerminator,
        },
    };
    run_daemon_with(plan)
}

/// Runs the broker with injected collaborators.
///
/// Threads are only spawned after daemonisation, since forking keeps the
/// calling thread alone.
pub(crate) fn run_daemon_with<L, D, S, T>(plan: LaunchPlan<L, D, S, T>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    D: Daemonizer,
    S: ShutdownSignal,
    T: Terminator + 'static,
{
    let LaunchPlan { process, services } = plan;
    let ProcessControl {
        mode,
        daemonizer,
        shutdown,
    } = process;
    let ServiceDeps {
        loader,
        reporter,
        terminator,
    } = services;

    let daemon = bootstrap_with(&loader, Arc::clone(&reporter))?;
    let config = daemon.config();
    info!(target: PROCESS_TARGET, ?mode, "starting broker runtime");

    let runtime_paths = RuntimePaths::from_config(config)?;
    let mut guard = ProcessGuard::acquire(runtime_paths)?;
    if matches!(mode, LaunchMode::Background) {
        daemonizer.daemonize(guard.paths())?;
    }
    guard.write_pid(std::process::id())?;
    guard.write_health(HealthState::Starting)?;

    let registration = RegistrationChannel::create(&config.channel_paths())?;
    let settings = ModerationSettings::from_config(config);
    let channels = moderation::spawn(settings, terminator)?;
    reporter.moderation_started(&settings);

    let broker = Broker::new(config, registration, channels);
    let handle = broker.start()?;
    reporter.broker_ready(handle.registration_path(), config.max_peers);
    guard.write_health(HealthState::Ready)?;

    shutdown.wait()?;
    guard.write_health(HealthState::Stopping)?;
    handle.shutdown();
    handle.join()?;
    reporter.broker_stopped();
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}
