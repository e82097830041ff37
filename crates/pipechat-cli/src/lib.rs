//! Line client for the pipechat broker.
//!
//! The client creates its own FIFO pair, announces itself on the broker's
//! registration FIFO and then relays standard input to the broker while a
//! second thread copies broker output to standard output. `salir` leaves the
//! chat and `clonar` starts another copy of the client next to this one.

use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::process::{Command, ExitCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::{env, io, thread};

use clap::Parser;

mod config;
mod errors;
mod session;

use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
pub(crate) use errors::AppError;
use session::{PumpEnd, Session, pump, send_line};

/// Command-line flags handled by the client itself.
#[derive(Debug, Parser)]
#[command(
    name = "pipechat",
    version,
    about = "Chat through the pipechat FIFO broker",
    after_help = "Configuration flags such as --fifo-dir are shared with pipechatd."
)]
struct Cli {
    /// Suppress local status messages on standard error.
    #[arg(short, long)]
    quiet: bool,
}

/// What a line typed by the user asks the client to do.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    /// Send the line, then leave.
    Leave(&'a str),
    /// Start another copy of the client.
    Clone,
    /// Forward the line unchanged.
    Forward(&'a str),
}

impl<'a> Input<'a> {
    fn classify(line: &'a str) -> Self {
        match line.trim() {
            "salir" | "quit" => Self::Leave(line),
            "clonar" | "clone" => Self::Clone,
            _ => Self::Forward(line),
        }
    }
}

/// Starts copies of the client for `clonar`.
pub(crate) trait CloneLauncher {
    /// Launches a copy with `args` and returns its process id.
    fn launch(&self, args: &[OsString]) -> io::Result<u32>;
}

/// Re-executes the current binary with inherited standard streams.
struct ExecutableLauncher;

impl CloneLauncher for ExecutableLauncher {
    fn launch(&self, args: &[OsString]) -> io::Result<u32> {
        let child = Command::new(env::current_exe()?).args(args).spawn()?;
        Ok(child.id())
    }
}

/// Collaborators and identity used by one client run.
struct Client<'a, L, C> {
    loader: &'a L,
    launcher: &'a C,
    id: u32,
}

/// Runs the client with the given arguments and standard streams.
#[must_use]
pub fn run<I, R, W, E>(args: I, stdin: R, stdout: W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write + Send,
    E: Write,
{
    let client = Client {
        loader: &OrthoConfigLoader,
        launcher: &ExecutableLauncher,
        id: std::process::id(),
    };
    client.run(args, stdin, stdout, stderr)
}

impl<L, C> Client<'_, L, C>
where
    L: ConfigLoader,
    C: CloneLauncher,
{
    fn run<I, R, W, E>(&self, args: I, stdin: R, stdout: W, stderr: &mut E) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
        R: BufRead,
        W: Write + Send,
        E: Write,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        match self.chat(&args, stdin, stdout, stderr) {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                drop(writeln!(stderr, "pipechat: {error}"));
                ExitCode::FAILURE
            }
        }
    }

    fn chat<R, W, E>(
        &self,
        args: &[OsString],
        stdin: R,
        mut stdout: W,
        stderr: &mut E,
    ) -> Result<(), AppError>
    where
        R: BufRead,
        W: Write + Send,
        E: Write,
    {
        let split = split_config_arguments(args);
        let cli = match Cli::try_parse_from(&split.cli_arguments) {
            Ok(cli) => cli,
            // `--help` and `--version` are answers, not failures.
            Err(error) if !error.use_stderr() => {
                drop(write!(stdout, "{error}"));
                return Ok(());
            }
            Err(error) => return Err(AppError::CliUsage(error)),
        };
        let config = self.loader.load(&split.config_arguments)?;
        let mut session = Session::connect(&config, self.id)?;
        let mut status = Status {
            out: stderr,
            quiet: cli.quiet,
        };
        status.say(&format!(
            "Cliente {} listo. Comandos: reportar <pid>, clonar, salir",
            session.id()
        ));

        let clone_args = args.get(1..).unwrap_or_default();
        let (inbound, outbound) = session.channels();
        let stop = AtomicBool::new(false);
        let closed = AtomicBool::new(false);
        thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let end = pump(inbound, &mut stdout, &stop);
                if matches!(end, Ok(PumpEnd::BrokerClosed) | Err(_)) {
                    closed.store(true, Ordering::SeqCst);
                }
                end
            });

            let typed = self.forward_input(stdin, outbound, clone_args, &closed, &mut status);
            stop.store(true, Ordering::SeqCst);
            let pumped = reader.join().map_err(|_| AppError::ReaderPanic)?;
            if closed.load(Ordering::SeqCst) {
                status.say("El servidor cerró la conexión.");
            }
            if let Err(error) = pumped {
                status.say(&format!("lectura del servidor fallida: {error}"));
            }
            typed
        })
    }

    /// Reads lines from `stdin` until the user leaves, input ends or the
    /// broker goes away.
    fn forward_input<R, E>(
        &self,
        stdin: R,
        outbound: &mut std::fs::File,
        clone_args: &[OsString],
        closed: &AtomicBool,
        status: &mut Status<'_, E>,
    ) -> Result<(), AppError>
    where
        R: BufRead,
        E: Write,
    {
        for line in stdin.lines() {
            let line = line.map_err(AppError::ReadInput)?;
            if closed.load(Ordering::SeqCst) {
                return Ok(());
            }
            match Input::classify(&line) {
                Input::Leave(text) => return send_line(outbound, text),
                Input::Clone => {
                    let pid = self.launcher.launch(clone_args).map_err(AppError::Clone)?;
                    status.say(&format!("Cliente duplicado como {pid}."));
                }
                Input::Forward(text) => send_line(outbound, text)?,
            }
        }
        if closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        // End of input leaves the chat like an explicit `salir`.
        send_line(outbound, "salir")
    }
}

/// Local status messages, written to standard error unless `--quiet`.
struct Status<'a, E> {
    out: &'a mut E,
    quiet: bool,
}

impl<E: Write> Status<'_, E> {
    fn say(&mut self, message: &str) {
        if !self.quiet {
            drop(writeln!(self.out, "[pipechat] {message}"));
        }
    }
}
