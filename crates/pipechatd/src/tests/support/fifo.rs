//! Real FIFOs in a temporary directory, driven from the peer side.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use nix::libc;
use pipechat_config::{ChannelPaths, Config};
use tempfile::TempDir;

use crate::broker::{ConnectPolicy, PeerId, create_fifo};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(3);
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Budget for pushing a whole flood through to the broker.
const FLOOD_TIMEOUT: Duration = Duration::from_secs(15);
const FLOOD_BATCH_LINES: usize = 64;

/// Temporary FIFO directory shared by a broker and its fake peers.
pub struct PeerDir {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl PeerDir {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temporary fifo directory");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp path");
        Self { _dir: dir, root }
    }

    pub fn paths(&self) -> ChannelPaths {
        ChannelPaths::new(self.root.clone())
    }

    /// Short retry budgets so failing scenarios finish quickly.
    pub fn policy(&self) -> ConnectPolicy {
        ConnectPolicy {
            attempts: 20,
            backoff: Duration::from_millis(5),
            write_attempts: 5,
        }
    }

    pub fn config(&self) -> Config {
        Config {
            fifo_dir: self.root.clone(),
            connect_attempts: 20,
            connect_backoff_ms: 5,
            write_attempts: 5,
            poll_timeout_ms: 50,
            log_filter: "warn".to_owned(),
            ..Config::default()
        }
    }
}

/// Peer side of a channel pair, standing in for a chat client.
pub struct FakePeer {
    id: PeerId,
    paths: ChannelPaths,
    from_broker: Option<File>,
    to_broker: Option<File>,
    transcript: String,
    closed: bool,
}

impl FakePeer {
    /// Creates both FIFOs and opens the read end of the broker→peer one.
    pub fn prepare(dir: &PeerDir, raw: u32) -> Self {
        let id = PeerId::new(raw).expect("valid peer id");
        let paths = dir.paths();
        create_fifo(&paths.client_to_server(raw)).expect("client to server fifo");
        create_fifo(&paths.server_to_client(raw)).expect("server to client fifo");
        let from_broker = open_nonblocking(&paths.server_to_client(raw), false)
            .expect("open broker to peer fifo");
        Self {
            id,
            paths,
            from_broker: Some(from_broker),
            to_broker: None,
            transcript: String::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Writes the peer id to the registration FIFO.
    pub fn announce(&self) {
        let path = self.paths.registration();
        let mut registration =
            retry(|| open_nonblocking(&path, true)).expect("registration fifo has a reader");
        writeln!(registration, "{}", self.id).expect("announcement written");
    }

    /// Opens the write end of the peer→broker FIFO once the broker listens.
    pub fn attach(&mut self) {
        if self.to_broker.is_some() {
            return;
        }
        let path = self.paths.client_to_server(self.id.as_u32());
        let writer = retry(|| open_nonblocking(&path, true)).expect("broker reads our fifo");
        self.to_broker = Some(writer);
    }

    /// Writes raw bytes towards the broker.
    pub fn write(&mut self, payload: &str) {
        self.attach();
        self.to_broker
            .as_mut()
            .expect("writer attached")
            .write_all(payload.as_bytes())
            .expect("payload written");
    }

    /// Sends `text` as one newline-terminated line.
    pub fn send(&mut self, text: &str) {
        self.write(&format!("{text}\n"));
    }

    /// Sends `text` as a line `total` times as fast as the broker reads it.
    ///
    /// Broker output is discarded between writes so acknowledgements never
    /// back up. Returns the number of lines sent before the broker closed the
    /// channel, or an error when the broker stops reading altogether.
    pub fn flood(&mut self, text: &str, total: usize) -> Result<usize, String> {
        self.attach();
        let line = format!("{text}\n");
        let batch = line.repeat(FLOOD_BATCH_LINES);
        let goal = line.len() * total;
        let deadline = Instant::now() + FLOOD_TIMEOUT;
        let mut written = 0;
        while written < goal {
            if Instant::now() >= deadline {
                return Err(format!(
                    "broker stopped reading after {} lines",
                    written / line.len()
                ));
            }
            let start = written % batch.len();
            let end = batch.len().min(start + (goal - written));
            let writer = self
                .to_broker
                .as_mut()
                .ok_or_else(|| "writer detached".to_owned())?;
            match writer.write(&batch.as_bytes()[start..end]) {
                Ok(sent) => written += sent,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(1));
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if error.kind() == io::ErrorKind::BrokenPipe => break,
                Err(error) => return Err(format!("flood write failed: {error}")),
            }
            self.clear();
        }
        Ok(written / line.len())
    }

    /// Closes the peer→broker FIFO.
    pub fn hang_up(&mut self) {
        self.to_broker = None;
    }

    /// Closes the broker→peer FIFO so writes towards this peer fail.
    pub fn stop_reading(&mut self) {
        self.from_broker = None;
    }

    /// Pulls whatever the broker has written so far.
    pub fn drain(&mut self) {
        let Some(reader) = self.from_broker.as_mut() else {
            return;
        };
        let mut chunk = [0_u8; 1024];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => {
                    self.closed = true;
                    return;
                }
                Ok(read) => self
                    .transcript
                    .push_str(&String::from_utf8_lossy(&chunk[..read])),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => panic!("peer read failed: {error}"),
            }
        }
    }

    /// Raw bytes received so far.
    pub fn transcript(&mut self) -> &str {
        self.drain();
        &self.transcript
    }

    /// Complete lines received so far.
    pub fn lines(&mut self) -> Vec<String> {
        self.drain();
        match self.transcript.rfind('\n') {
            Some(end) => self.transcript[..end]
                .split('\n')
                .map(str::to_owned)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Removes and returns the complete lines received so far, keeping any
    /// trailing fragment.
    pub fn take_lines(&mut self) -> Vec<String> {
        self.drain();
        let Some(end) = self.transcript.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.transcript.split_off(end + 1);
        let complete = std::mem::replace(&mut self.transcript, rest);
        complete[..end].split('\n').map(str::to_owned).collect()
    }

    /// Forgets everything received so far.
    pub fn clear(&mut self) {
        self.drain();
        self.transcript.clear();
    }

    /// Whether the broker closed its end after we started reading.
    pub fn saw_close(&mut self) -> bool {
        self.drain();
        self.closed
    }

    /// Waits until `expected` arrives as a whole line.
    pub fn wait_for_line(&mut self, expected: &str) -> Result<(), String> {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if self.lines().iter().any(|line| line == expected) {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err(format!(
            "peer {} never received {expected:?}; transcript: {:?}",
            self.id, self.transcript
        ))
    }

    /// Waits until `expected` has arrived `count` times.
    pub fn wait_for_repeats(&mut self, expected: &str, count: usize) -> Result<(), String> {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if self.count_of(expected) >= count {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        let seen = self.count_of(expected);
        Err(format!(
            "peer {} saw {expected:?} {seen} times, wanted {count}",
            self.id
        ))
    }

    pub fn count_of(&mut self, expected: &str) -> usize {
        self.lines().iter().filter(|line| *line == expected).count()
    }
}

impl Drop for FakePeer {
    fn drop(&mut self) {
        drop(fs::remove_file(self.paths.client_to_server(self.id.as_u32())));
        drop(fs::remove_file(self.paths.server_to_client(self.id.as_u32())));
    }
}

fn open_nonblocking(path: &Utf8Path, write: bool) -> io::Result<File> {
    OpenOptions::new()
        .read(!write)
        .write(write)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// Retries `open` while the other side has not attached yet.
fn retry<F>(mut open: F) -> io::Result<File>
where
    F: FnMut() -> io::Result<File>,
{
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        match open() {
            Ok(file) => return Ok(file),
            Err(error) if Instant::now() >= deadline => return Err(error),
            Err(_) => thread::sleep(POLL_INTERVAL),
        }
    }
}
