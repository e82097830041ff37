//! Enumerated configuration values parsed from files, env and flags.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// How often the moderation worker announces a terminated target.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum NoticePolicy {
    /// Terminate and announce a target the first time it crosses the
    /// threshold; later reports only grow the tally.
    #[default]
    Once,
    /// Terminate and announce again on every report past the threshold.
    EveryReport,
}

/// Signal sent to a peer process that crossed the report threshold.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TerminationSignal {
    /// `SIGTERM`: lets the peer unlink its FIFOs before exiting.
    #[default]
    Term,
    /// `SIGKILL`: cannot be caught or ignored.
    Kill,
}

/// Errors encountered while parsing a [`TerminationSignal`] from text.
pub type TerminationSignalParseError = strum::ParseError;
