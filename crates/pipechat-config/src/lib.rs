//! Shared configuration for the pipechat broker and client.
//!
//! Both binaries load the same [`Config`] so they agree on where the
//! registration FIFO and the per-peer channel pairs live. Values are layered
//! by `ortho_config`: built-in defaults, then a TOML file (`--config-path` or
//! `PIPECHAT_CONFIG_PATH`), then `PIPECHAT_*` environment variables, then
//! command-line flags. Loading goes through the [`OrthoConfig`] trait, so
//! callers bring it into scope and use `Config::load()` or
//! `Config::load_from_iter(args)`.

use camino::{Utf8Path, Utf8PathBuf};
pub use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod channels;
mod defaults;
mod options;
mod runtime;

pub use channels::{ChannelPaths, FifoDirError, REGISTRATION_FIFO_NAME};
pub use defaults::{
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_BACKOFF_MS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_LINE_BYTES, DEFAULT_MAX_PEERS, DEFAULT_POLL_TIMEOUT_MS, DEFAULT_REPORT_THRESHOLD,
    DEFAULT_TALLY_CAPACITY, DEFAULT_WRITE_ATTEMPTS, default_fifo_dir, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use options::{
    LogFormat, LogFormatParseError, NoticePolicy, TerminationSignal, TerminationSignalParseError,
};
pub use runtime::{RuntimePaths, RuntimePathsError};

/// Resolved configuration shared by `pipechatd` and `pipechat`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PIPECHAT")]
pub struct Config {
    /// Directory holding the registration FIFO, peer FIFOs and runtime files.
    #[ortho_config(default = defaults::default_fifo_dir())]
    pub fifo_dir: Utf8PathBuf,
    /// Maximum number of concurrently registered peers.
    #[ortho_config(default = DEFAULT_MAX_PEERS)]
    pub max_peers: usize,
    /// Longest line accepted from a peer before it is flushed unterminated.
    #[ortho_config(default = DEFAULT_MAX_LINE_BYTES)]
    pub max_line_bytes: usize,
    /// Attempts made to open a peer's outbound FIFO before giving up.
    #[ortho_config(default = DEFAULT_CONNECT_ATTEMPTS)]
    pub connect_attempts: u32,
    /// Delay between outbound open attempts, in milliseconds.
    #[ortho_config(default = DEFAULT_CONNECT_BACKOFF_MS)]
    pub connect_backoff_ms: u64,
    /// Attempts made to finish a write to a full peer pipe.
    #[ortho_config(default = DEFAULT_WRITE_ATTEMPTS)]
    pub write_attempts: u32,
    /// Housekeeping timeout of the readiness wait, in milliseconds.
    #[ortho_config(default = DEFAULT_POLL_TIMEOUT_MS)]
    pub poll_timeout_ms: u16,
    /// Reports a target may accumulate before it is terminated.
    #[ortho_config(default = DEFAULT_REPORT_THRESHOLD)]
    pub report_threshold: u32,
    /// Number of distinct report targets the moderation worker tracks.
    #[ortho_config(default = DEFAULT_TALLY_CAPACITY)]
    pub tally_capacity: usize,
    /// Whether termination notices repeat after the threshold is crossed.
    #[ortho_config(default = NoticePolicy::Once)]
    pub notice_policy: NoticePolicy,
    /// Signal delivered to a peer that crossed the report threshold.
    #[ortho_config(default = TerminationSignal::Term)]
    pub termination_signal: TerminationSignal,
    /// `tracing` filter expression applied by the daemon.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format of daemon logs.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fifo_dir: default_fifo_dir(),
            max_peers: DEFAULT_MAX_PEERS,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff_ms: DEFAULT_CONNECT_BACKOFF_MS,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            report_threshold: DEFAULT_REPORT_THRESHOLD,
            tally_capacity: DEFAULT_TALLY_CAPACITY,
            notice_policy: NoticePolicy::default(),
            termination_signal: TerminationSignal::default(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Directory holding every FIFO used by the relay.
    #[must_use]
    pub fn fifo_dir(&self) -> &Utf8Path {
        self.fifo_dir.as_path()
    }

    /// Path helper bound to the configured FIFO directory.
    #[must_use]
    pub fn channel_paths(&self) -> ChannelPaths {
        ChannelPaths::new(self.fifo_dir.clone())
    }

    /// Creates the FIFO directory with owner-only permissions.
    pub fn prepare_fifo_dir(&self) -> Result<(), FifoDirError> {
        channels::prepare_directory(self.fifo_dir())
    }

    /// Filter expression used to initialise telemetry.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Format used for daemon log output.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
