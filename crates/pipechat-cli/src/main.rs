//! Entry point for the `pipechat` line client.
//!
//! Delegates to [`pipechat_cli::run`], which joins the broker and relays
//! standard input and output until the user leaves.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let stdin = io::stdin().lock();
    let stdout = io::stdout();
    let mut stderr = io::stderr().lock();
    pipechat_cli::run(std::env::args_os(), stdin, stdout, &mut stderr)
}
