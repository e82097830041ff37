//! Splits configuration flags from client flags and loads [`Config`].

use std::ffi::{OsStr, OsString};

use pipechat_config::{Config, OrthoConfig};

use crate::AppError;

/// Flags understood by the shared configuration loader.
///
/// Keep in sync with the fields of `pipechat_config::Config` that the
/// client reads.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--fifo-dir",
    "--connect-attempts",
    "--connect-backoff-ms",
    "--max-line-bytes",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the arguments selected by
    /// [`split_config_arguments`].
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

/// Arguments destined for the configuration loader and for clap.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) cli_arguments: Vec<OsString>,
}

/// Routes every recognised configuration flag, and its value, to the loader.
/// Both halves keep the program name first.
pub(crate) fn split_config_arguments(args: &[OsString]) -> ArgumentSplit {
    let mut config_arguments = Vec::new();
    let mut cli_arguments = Vec::new();
    let mut iter = args.iter();
    if let Some(program) = iter.next() {
        config_arguments.push(program.clone());
        cli_arguments.push(program.clone());
    }
    while let Some(argument) = iter.next() {
        match config_flag(argument) {
            Some(needs_value) => {
                config_arguments.push(argument.clone());
                if needs_value && let Some(value) = iter.next() {
                    config_arguments.push(value.clone());
                }
            }
            None => cli_arguments.push(argument.clone()),
        }
    }
    ArgumentSplit {
        config_arguments,
        cli_arguments,
    }
}

/// Returns whether a recognised flag still needs a separate value.
fn config_flag(argument: &OsStr) -> Option<bool> {
    let text = argument.to_string_lossy();
    let (flag, inline) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    CONFIG_CLI_FLAGS.contains(&flag).then_some(!inline)
}
