//! `pipechatd` entrypoint.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match pipechatd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = io::stderr().lock();
            // Nothing left to report to if stderr itself is gone.
            drop(writeln!(stderr, "pipechatd: {error}"));
            ExitCode::FAILURE
        }
    }
}
