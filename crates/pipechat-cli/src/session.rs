//! The client's FIFO pair and its announcement to the broker.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::libc;
use nix::poll::{PollFd, PollFlags, poll};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use pipechat_config::Config;

use crate::AppError;

/// How long the relay thread waits before rechecking its stop flag.
const PUMP_INTERVAL_MS: u16 = 100;
const PUMP_CHUNK: usize = 512;

/// Bounded retry used while the broker is not listening yet.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            attempts: config.connect_attempts.max(1),
            backoff: Duration::from_millis(config.connect_backoff_ms),
        }
    }
}

/// Paths of the peer's FIFOs, unlinked when dropped.
#[derive(Debug)]
struct FifoPair {
    to_broker: Utf8PathBuf,
    from_broker: Utf8PathBuf,
}

impl FifoPair {
    fn create(config: &Config, id: u32) -> Result<Self, AppError> {
        let paths = config.channel_paths();
        let pair = Self {
            to_broker: paths.client_to_server(id),
            from_broker: paths.server_to_client(id),
        };
        make_fifo(&pair.to_broker)?;
        make_fifo(&pair.from_broker)?;
        Ok(pair)
    }
}

impl Drop for FifoPair {
    fn drop(&mut self) {
        drop(fs::remove_file(&self.to_broker));
        drop(fs::remove_file(&self.from_broker));
    }
}

/// Why the relay thread stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpEnd {
    /// The client asked it to stop.
    Stopped,
    /// The broker closed the channel.
    BrokerClosed,
}

/// A client registered with the broker.
#[derive(Debug)]
pub(crate) struct Session {
    id: u32,
    inbound: File,
    outbound: File,
    _fifos: FifoPair,
}

impl Session {
    /// Creates the FIFO pair, announces `id` and waits for the broker to
    /// attach.
    ///
    /// The broker→client end is opened before announcing so the broker's
    /// writer finds a reader.
    pub(crate) fn connect(config: &Config, id: u32) -> Result<Self, AppError> {
        config.prepare_fifo_dir()?;
        let policy = RetryPolicy::from_config(config);
        let fifos = FifoPair::create(config, id)?;
        let inbound = open_fifo(&fifos.from_broker, false)?;

        let registration = config.channel_paths().registration();
        let mut announcer = open_with_retry(&registration, policy)?;
        writeln!(announcer, "{id}").map_err(AppError::Announce)?;
        drop(announcer);

        let outbound = open_with_retry(&fifos.to_broker, policy)?;
        fcntl(outbound.as_raw_fd(), FcntlArg::F_SETFL(OFlag::empty())).map_err(|errno| {
            AppError::OpenFifo {
                path: fifos.to_broker.clone(),
                source: io::Error::from(errno),
            }
        })?;

        Ok(Self {
            id,
            inbound,
            outbound,
            _fifos: fifos,
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Splits the session into its read and write halves.
    pub(crate) fn channels(&mut self) -> (&File, &mut File) {
        (&self.inbound, &mut self.outbound)
    }
}

/// Sends one newline-terminated line to the broker.
pub(crate) fn send_line(outbound: &mut File, text: &str) -> Result<(), AppError> {
    let mut line = String::with_capacity(text.len() + 1);
    line.push_str(text.trim_end_matches(['\r', '\n']));
    line.push('\n');
    outbound.write_all(line.as_bytes()).map_err(AppError::Send)
}

/// Copies broker output to `out` until `stop` is raised or the broker
/// closes the channel.
pub(crate) fn pump<W: Write>(
    inbound: &File,
    out: &mut W,
    stop: &AtomicBool,
) -> io::Result<PumpEnd> {
    let mut reader = inbound;
    let mut chunk = [0_u8; PUMP_CHUNK];
    while !stop.load(Ordering::SeqCst) {
        let mut fds = [PollFd::new(inbound.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PUMP_INTERVAL_MS) {
            Ok(0) | Err(Errno::EINTR) => continue,
            Ok(_) => {}
            Err(errno) => return Err(io::Error::from(errno)),
        }
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(PumpEnd::BrokerClosed),
            Ok(read) => {
                out.write_all(chunk.get(..read).unwrap_or_default())?;
                out.flush()?;
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(error) => return Err(error),
        }
    }
    Ok(PumpEnd::Stopped)
}

fn make_fifo(path: &Utf8Path) -> Result<(), AppError> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(AppError::OpenFifo {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    mkfifo(path.as_std_path(), Mode::S_IRUSR | Mode::S_IWUSR).map_err(|source| {
        AppError::CreateFifo {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn open_fifo(path: &Utf8Path, write: bool) -> Result<File, AppError> {
    OpenOptions::new()
        .read(!write)
        .write(write)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|source| AppError::OpenFifo {
            path: path.to_path_buf(),
            source,
        })
}

/// Opens the write end of `path`, retrying while nobody reads it.
fn open_with_retry(path: &Utf8Path, policy: RetryPolicy) -> Result<File, AppError> {
    for attempt in 1..=policy.attempts {
        match open_fifo(path, true) {
            Ok(file) => return Ok(file),
            Err(AppError::OpenFifo { source, .. }) if is_not_listening(&source) => {
                if attempt < policy.attempts {
                    thread::sleep(policy.backoff);
                }
            }
            Err(error) => return Err(error),
        }
    }
    Err(AppError::BrokerUnavailable {
        path: path.to_path_buf(),
        attempts: policy.attempts,
    })
}

fn is_not_listening(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::NotFound || error.raw_os_error() == Some(libc::ENXIO)
}
