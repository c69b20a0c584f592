//! Error taxonomy and exit-code mapping.
//!
//! One variant per error kind in the spec's §7 table. No `thiserror` — a
//! plain enum with a hand-rolled `Display`, same as the teacher's `ExecError`.

use std::fmt;

/// A terminal error kind, each mapping one-to-one to a process exit code.
#[derive(Debug, Clone)]
pub enum UdialError {
    /// Malformed or conflicting CLI arguments.
    InvalidArg(String),
    /// Internal error not attributable to the modem or link (bug, I/O failure
    /// unrelated to the serial line, etc).
    Internal(String),
    /// Torn down because a termination signal was observed.
    Signaled,
    /// Discovery produced no modem matching the filter / profile requirement.
    NoModem(String),
    /// An AT transaction failed with a non-OK terminator or timed out.
    Modem(String),
    /// SIM is in an error state (not ready, not PIN, not PUK).
    Sim(String),
    /// PIN/PUK unlock failed, or was refused due to a remembered failure.
    Unlock(String),
    /// The link daemon could not be dialed.
    Dial(String),
    /// The link daemon reported a PPP authentication failure.
    Auth(String),
    /// The link daemon reported a PPP failure other than authentication.
    Ppp(String),
    /// The link daemon reported a network-layer failure.
    Network(String),
}

impl UdialError {
    /// Exit code mapping from spec §6.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            UdialError::InvalidArg(_) => 1,
            UdialError::Internal(_) => 2,
            UdialError::Signaled => 3,
            UdialError::NoModem(_) => 4,
            UdialError::Modem(_) => 5,
            UdialError::Sim(_) => 6,
            UdialError::Unlock(_) => 7,
            UdialError::Dial(_) => 8,
            UdialError::Auth(_) => 9,
            UdialError::Ppp(_) => 10,
            UdialError::Network(_) => 11,
        }
    }

    /// Short machine-readable kind name, as written to `udiald_error_code`.
    #[must_use]
    pub fn code_name(&self) -> &'static str {
        match self {
            UdialError::InvalidArg(_) => "INVALID-ARG",
            UdialError::Internal(_) => "INTERNAL",
            UdialError::Signaled => "SIGNALED",
            UdialError::NoModem(_) => "NO-MODEM",
            UdialError::Modem(_) => "MODEM",
            UdialError::Sim(_) => "SIM",
            UdialError::Unlock(_) => "UNLOCK",
            UdialError::Dial(_) => "DIAL",
            UdialError::Auth(_) => "AUTH",
            UdialError::Ppp(_) => "PPP",
            UdialError::Network(_) => "NETWORK",
        }
    }

    /// Override this error's kind to `Signaled` if the session observed a
    /// termination signal (not SIGCHLD) at the moment of surfacing, per
    /// spec §7. Callers pass `signal::is_termination_signaled()`, not
    /// `signal::is_signaled()`.
    #[must_use]
    pub fn overridden_by_signal(self, signaled: bool) -> Self {
        if signaled {
            UdialError::Signaled
        } else {
            self
        }
    }
}

impl fmt::Display for UdialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UdialError::InvalidArg(m) => write!(f, "invalid argument: {m}"),
            UdialError::Internal(m) => write!(f, "internal error: {m}"),
            UdialError::Signaled => write!(f, "terminated by signal"),
            UdialError::NoModem(m) => write!(f, "no usable modem: {m}"),
            UdialError::Modem(m) => write!(f, "modem error: {m}"),
            UdialError::Sim(m) => write!(f, "SIM error: {m}"),
            UdialError::Unlock(m) => write!(f, "unlock failed: {m}"),
            UdialError::Dial(m) => write!(f, "dial failed: {m}"),
            UdialError::Auth(m) => write!(f, "PPP auth failed: {m}"),
            UdialError::Ppp(m) => write!(f, "PPP failed: {m}"),
            UdialError::Network(m) => write!(f, "network error: {m}"),
        }
    }
}

impl std::error::Error for UdialError {}

pub type UdialResult<T> = Result<T, UdialError>;

/// Characters forbidden in user-supplied values that get interpolated into
/// AT commands or link-daemon config lines (spec §9): PIN, PUK, username,
/// password. A quote, CR, or LF could break out of a quoted AT argument; a
/// `;` could chain a second AT command or pppd directive.
pub const FORBIDDEN_CHARS: &[char] = &['"', '\r', '\n', ';'];

/// The first forbidden character in `s`, if any.
#[must_use]
pub fn first_forbidden_char(s: &str) -> Option<char> {
    FORBIDDEN_CHARS.iter().copied().find(|c| s.contains(*c))
}
