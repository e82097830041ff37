//! Named-pipe endpoints used by the broker.
//!
//! Every descriptor is opened non-blocking. Reads are driven by the
//! multiplexer's readiness wait, and writes give up after a bounded number of
//! attempts so that one stalled peer cannot wedge the relay.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::libc;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tracing::{debug, warn};

use pipechat_config::Config;

use super::BROKER_TARGET;
use super::errors::ChannelError;
use super::line_buffer::LineBuffer;
use super::protocol::terminate_line;

const READ_CHUNK: usize = 4096;
const WRITE_BACKOFF: Duration = Duration::from_millis(1);

/// Creates a FIFO at `path`, replacing whatever stale node is there.
pub(crate) fn create_fifo(path: &Utf8Path) -> Result<(), ChannelError> {
    match fs::remove_file(path) {
        Ok(()) => debug!(target: BROKER_TARGET, path = %path, "removed stale fifo"),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ChannelError::RemoveStale {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    mkfifo(path.as_std_path(), Mode::S_IRUSR | Mode::S_IWUSR).map_err(|source| {
        ChannelError::Create {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Unlinks a FIFO, tolerating one that is already gone.
pub(crate) fn remove_fifo(path: &Utf8Path) {
    if let Err(error) = fs::remove_file(path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: BROKER_TARGET,
            path = %path,
            error = %error,
            "failed to remove fifo"
        );
    }
}

/// Result of one non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// Bytes were appended to the line buffer.
    Data(usize),
    /// Every writer has closed its end.
    Closed,
    /// Nothing to read right now.
    Idle,
}

/// Read end of a FIFO.
#[derive(Debug)]
pub(crate) struct InboundChannel {
    path: Utf8PathBuf,
    file: File,
}

impl InboundChannel {
    /// Opens the read end without waiting for a writer.
    pub(crate) fn open(path: &Utf8Path) -> Result<Self, ChannelError> {
        let file = open_read_end(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        self.path.as_path()
    }

    /// Performs a single read, appending whatever arrived to `buffer`.
    pub(crate) fn read_into(&mut self, buffer: &mut LineBuffer) -> io::Result<ReadOutcome> {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            match self.file.read(&mut chunk) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(read) => {
                    buffer.extend(chunk.get(..read).unwrap_or_default());
                    return Ok(ReadOutcome::Data(read));
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::Idle);
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Replaces the descriptor with a fresh one so a hung-up FIFO stops
    /// reporting readiness.
    pub(crate) fn reopen(&mut self) -> Result<(), ChannelError> {
        self.file = open_read_end(&self.path)?;
        Ok(())
    }
}

impl AsFd for InboundChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

fn open_read_end(path: &Utf8Path) -> Result<File, ChannelError> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|source| ChannelError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Retry budget for attaching to a peer's outbound FIFO and for writing to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConnectPolicy {
    pub(crate) attempts: u32,
    pub(crate) backoff: Duration,
    pub(crate) write_attempts: u32,
}

impl ConnectPolicy {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            attempts: config.connect_attempts.max(1),
            backoff: Duration::from_millis(config.connect_backoff_ms),
            write_attempts: config.write_attempts.max(1),
        }
    }
}

/// Write end of a peer's FIFO.
#[derive(Debug)]
pub(crate) struct OutboundChannel {
    file: File,
    write_attempts: u32,
}

impl OutboundChannel {
    /// Opens the write end, retrying while the peer has not yet opened its
    /// read end.
    pub(crate) fn connect(path: &Utf8Path, policy: ConnectPolicy) -> Result<Self, ChannelError> {
        let mut options = OpenOptions::new();
        options.write(true).custom_flags(libc::O_NONBLOCK);
        for attempt in 1..=policy.attempts {
            match options.open(path) {
                Ok(file) => {
                    return Ok(Self {
                        file,
                        write_attempts: policy.write_attempts,
                    });
                }
                Err(error) if reader_missing(&error) => {
                    if attempt < policy.attempts {
                        thread::sleep(policy.backoff);
                    }
                }
                Err(source) => {
                    return Err(ChannelError::Open {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
        Err(ChannelError::NoReader {
            path: path.to_path_buf(),
            attempts: policy.attempts,
        })
    }

    /// Writes `text` with exactly one trailing newline.
    pub(crate) fn send_line(&mut self, text: &str) -> io::Result<()> {
        let line = terminate_line(text);
        let mut remaining = line.as_bytes();
        let mut stalls = 0_u32;
        while !remaining.is_empty() {
            match self.file.write(remaining) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(written) => {
                    remaining = remaining.get(written..).unwrap_or_default();
                    stalls = 0;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    stalls += 1;
                    if stalls >= self.write_attempts {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "peer fifo stayed full",
                        ));
                    }
                    thread::sleep(WRITE_BACKOFF);
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }
}

/// `ENXIO` means no reader yet; `ENOENT` means the peer has not created the
/// FIFO yet.
fn reader_missing(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::NotFound || error.raw_os_error() == Some(Errno::ENXIO as i32)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path).expect("utf8 temp path")
    }

    fn quick_policy() -> ConnectPolicy {
        ConnectPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
            write_attempts: 3,
        }
    }

    #[test]
    fn connect_gives_up_without_a_reader() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = utf8(dir.path().join("lonely.fifo"));
        create_fifo(&path).expect("fifo created");

        let error = OutboundChannel::connect(&path, quick_policy()).expect_err("no reader");
        assert!(matches!(error, ChannelError::NoReader { attempts: 3, .. }));
    }

    #[test]
    fn send_line_normalises_terminators() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = utf8(dir.path().join("out.fifo"));
        create_fifo(&path).expect("fifo created");
        let mut reader = open_read_end(&path).expect("reader opened");

        let mut outbound = OutboundChannel::connect(&path, quick_policy()).expect("connected");
        outbound.send_line("hello\r\n").expect("first write");
        outbound.send_line("again").expect("second write");

        let mut received = String::new();
        let mut chunk = [0_u8; 64];
        let read = reader.read(&mut chunk).expect("read succeeds");
        received.push_str(std::str::from_utf8(&chunk[..read]).expect("utf8"));
        assert_eq!(received, "hello\nagain\n");
    }

    #[test]
    fn send_line_fails_once_the_reader_is_gone() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = utf8(dir.path().join("gone.fifo"));
        create_fifo(&path).expect("fifo created");
        let reader = open_read_end(&path).expect("reader opened");
        let mut outbound = OutboundChannel::connect(&path, quick_policy()).expect("connected");
        drop(reader);

        let error = outbound.send_line("anyone?").expect_err("broken pipe");
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn inbound_reports_close_after_writer_leaves() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = utf8(dir.path().join("in.fifo"));
        create_fifo(&path).expect("fifo created");
        let mut inbound = InboundChannel::open(&path).expect("inbound opened");
        let mut writer = OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("writer opened");
        let mut buffer = LineBuffer::new(64);

        assert_eq!(inbound.read_into(&mut buffer).expect("read"), ReadOutcome::Idle);
        writer.write_all(b"ping\n").expect("write");
        assert_eq!(
            inbound.read_into(&mut buffer).expect("read"),
            ReadOutcome::Data(5)
        );
        assert_eq!(buffer.next_line().as_deref(), Some("ping"));
        drop(writer);
        assert_eq!(
            inbound.read_into(&mut buffer).expect("read"),
            ReadOutcome::Closed
        );
        inbound.reopen().expect("reopen succeeds");
    }

    #[test]
    fn create_fifo_replaces_stale_nodes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = utf8(dir.path().join("stale.fifo"));
        fs::write(&path, b"not a fifo").expect("stale file");
        create_fifo(&path).expect("fifo replaces file");
        let metadata = fs::metadata(&path).expect("metadata");
        use std::os::unix::fs::FileTypeExt;
        assert!(metadata.file_type().is_fifo());
        remove_fifo(&path);
        assert!(!path.exists());
        remove_fifo(&path);
    }
}
