use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::options::LogFormat;

/// Default cap on concurrently registered peers.
pub const DEFAULT_MAX_PEERS: usize = 50;

/// Default upper bound on a single inbound line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024;

/// Default number of attempts to open a peer's outbound FIFO (~1s in total).
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 100;

/// Default delay between outbound open attempts.
pub const DEFAULT_CONNECT_BACKOFF_MS: u64 = 10;

/// Default number of attempts to drain a write into a full pipe.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 50;

/// Default housekeeping timeout for the readiness wait.
pub const DEFAULT_POLL_TIMEOUT_MS: u16 = 1000;

/// Reports tolerated before a target is terminated.
pub const DEFAULT_REPORT_THRESHOLD: u32 = 10;

/// Distinct report targets tracked by the moderation worker.
pub const DEFAULT_TALLY_CAPACITY: usize = 256;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the daemon.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the daemon.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Computes the default FIFO directory shared by broker and clients.
///
/// Prefers `$XDG_RUNTIME_DIR/pipechat`; otherwise falls back to a per-user
/// namespace under the system temporary directory.
pub fn default_fifo_dir() -> Utf8PathBuf {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("pipechat");
    if apply_namespace {
        base.push(user_namespace());
    }
    base
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(not(unix))]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    None
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn user_namespace() -> String {
    "shared".to_owned()
}
