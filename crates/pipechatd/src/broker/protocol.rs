//! Line vocabulary spoken between the broker and its peers.
//!
//! Peers send newline-terminated text. A handful of keywords are commands;
//! everything else is chat relayed to the other peers. Messages originated by
//! the broker itself carry the `[Servidor]` prefix.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use nix::unistd::Pid;
use thiserror::Error;

const QUIT_KEYWORDS: [&str; 2] = ["salir", "quit"];
const REPORT_KEYWORDS: [&str; 2] = ["reportar", "report"];
const CLONE_KEYWORDS: [&str; 2] = ["clonar", "clone"];
const SERVER_PREFIX: &str = "[Servidor]";

/// Process identifier of a registered peer.
///
/// Always positive and representable as a `pid_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(i32);

impl PeerId {
    /// Wraps `raw` when it is a plausible process identifier.
    #[must_use]
    pub fn new(raw: u32) -> Option<Self> {
        i32::try_from(raw).ok().filter(|pid| *pid > 0).map(Self)
    }

    /// Identifier as used in FIFO names.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0.unsigned_abs()
    }

    /// Identifier as a signal target.
    #[must_use]
    pub fn as_pid(self) -> Pid {
        Pid::from_raw(self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised when text does not name a peer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerIdParseError {
    /// The text was not a decimal integer.
    #[error("peer id is not a number: {0}")]
    NotANumber(#[from] ParseIntError),
    /// The number was zero or too large to be a process identifier.
    #[error("peer id {0} is out of range")]
    OutOfRange(u64),
}

impl FromStr for PeerId {
    type Err = PeerIdParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let raw: u64 = text.trim().parse()?;
        u32::try_from(raw)
            .ok()
            .and_then(Self::new)
            .ok_or(PeerIdParseError::OutOfRange(raw))
    }
}

/// Interpretation of one inbound peer line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command<'a> {
    /// The peer is leaving.
    Quit,
    /// The peer reports `target` to moderation.
    Report(PeerId),
    /// A report whose target could not be parsed; dropped without reply.
    MalformedReport,
    /// The peer asked the broker to clone it; the client handles this itself.
    Clone,
    /// Chat text relayed verbatim.
    Chat(&'a str),
}

impl<'a> Command<'a> {
    /// Classifies a line with its terminator already removed.
    pub(crate) fn parse(line: &'a str) -> Self {
        let text = line.trim_start();
        let mut words = text.split_whitespace();
        let Some(keyword) = words.next() else {
            return Self::Chat(text);
        };

        if REPORT_KEYWORDS.contains(&keyword) {
            return match (words.next(), words.next()) {
                (Some(target), None) => parse_report_target(target)
                    .map_or(Self::MalformedReport, Self::Report),
                _ => Self::MalformedReport,
            };
        }

        let bare = text.trim_end();
        if QUIT_KEYWORDS.contains(&bare) {
            Self::Quit
        } else if CLONE_KEYWORDS.contains(&bare) {
            Self::Clone
        } else {
            Self::Chat(text)
        }
    }
}

/// Accepts `123` as well as the bracketed `<123>` form.
fn parse_report_target(token: &str) -> Option<PeerId> {
    let inner = token
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(token);
    inner.parse().ok()
}

/// Why a peer left the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Departure {
    /// The peer sent a quit command.
    Quit,
    /// The peer closed its inbound channel or could not be written to.
    Closed,
    /// The moderation worker terminated the peer.
    Moderated,
}

/// Messages originated by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notice {
    /// Greeting sent only to a newly admitted peer.
    Welcome,
    /// Broadcast when a peer is admitted.
    Joined(PeerId),
    /// Broadcast when a peer leaves.
    Left(PeerId, Departure),
    /// Sent to a reporter once its report was forwarded.
    ReportReceived(PeerId),
    /// Sent to a peer that typed the clone command.
    CloneHint,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Welcome => write!(
                f,
                "{SERVER_PREFIX} Bienvenido al chat. Comandos: 'reportar <pid>' para reportar, \
                 'clonar' para duplicar el cliente, 'salir' para desconectar."
            ),
            Self::Joined(id) => write!(f, "{SERVER_PREFIX} {id} se unió al chat"),
            Self::Left(id, Departure::Quit) => write!(f, "{SERVER_PREFIX} {id} se desconectó"),
            Self::Left(id, Departure::Closed) => write!(f, "{SERVER_PREFIX} {id} salió del chat"),
            Self::Left(id, Departure::Moderated) => {
                write!(f, "{SERVER_PREFIX} {id} fue expulsado por moderación")
            }
            Self::ReportReceived(target) => {
                write!(f, "{SERVER_PREFIX} reporte recibido contra {target}")
            }
            Self::CloneHint => write!(
                f,
                "{SERVER_PREFIX} Usa 'clonar' en el cliente para duplicarlo."
            ),
        }
    }
}

/// Chat line as seen by the other peers.
pub(crate) fn chat_line(sender: PeerId, text: &str) -> String {
    format!("{sender}: {text}")
}

/// Ensures `text` ends in exactly one `\n`.
///
/// Trailing `\r` and `\n` characters are collapsed so that a peer never sees
/// doubled or missing terminators.
pub(crate) fn terminate_line(text: &str) -> String {
    let mut line = text.trim_end_matches(['\r', '\n']).to_owned();
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn peer(raw: u32) -> PeerId {
        PeerId::new(raw).expect("valid peer id")
    }

    #[rstest]
    #[case("salir", Command::Quit)]
    #[case("  quit  ", Command::Quit)]
    #[case("clonar", Command::Clone)]
    #[case("clone", Command::Clone)]
    #[case("reportar 4242", Command::Report(peer(4242)))]
    #[case("report <17>", Command::Report(peer(17)))]
    #[case("reportar", Command::MalformedReport)]
    #[case("reportar abc", Command::MalformedReport)]
    #[case("reportar 0", Command::MalformedReport)]
    #[case("reportar 12 13", Command::MalformedReport)]
    #[case("reportar 99999999999", Command::MalformedReport)]
    #[case("salir ahora", Command::Chat("salir ahora"))]
    #[case("   hola", Command::Chat("hola"))]
    #[case("", Command::Chat(""))]
    fn classifies_lines(#[case] line: &str, #[case] expected: Command<'_>) {
        assert_eq!(Command::parse(line), expected);
    }

    #[rstest]
    #[case("hello", "hello\n")]
    #[case("hello\n", "hello\n")]
    #[case("hello\r\n", "hello\n")]
    #[case("hello\n\n\n", "hello\n")]
    #[case("", "\n")]
    fn terminates_lines_once(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(terminate_line(input), expected);
    }

    #[test]
    fn rejects_ids_beyond_pid_range() {
        assert_eq!(PeerId::new(0), None);
        assert_eq!(PeerId::new(u32::MAX), None);
        assert!("2147483648".parse::<PeerId>().is_err());
        assert_eq!("2147483647".parse::<PeerId>().ok(), PeerId::new(2_147_483_647));
    }

    #[test]
    fn notices_carry_the_server_prefix() {
        let id = peer(31);
        assert_eq!(Notice::Joined(id).to_string(), "[Servidor] 31 se unió al chat");
        assert_eq!(
            Notice::Left(id, Departure::Quit).to_string(),
            "[Servidor] 31 se desconectó"
        );
        assert_eq!(
            Notice::ReportReceived(id).to_string(),
            "[Servidor] reporte recibido contra 31"
        );
        assert_eq!(chat_line(id, "hola"), "31: hola");
    }
}
