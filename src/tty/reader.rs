//! Line-oriented, timeout-bounded AT response reader.
//!
//! Generalizes the teacher's `execute_at`/`response_is_complete` cadence
//! (`server/src/modem.rs`) from "read until OK/ERROR" to the full terminator
//! set in spec §4.1, plus unsolicited (`^`-prefixed) line filtering and
//! result-line capture. Bytes are read one at a time, matching the spec's
//! "avoid over-reading past the terminator" rationale.

use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd;

/// Reserve one slot as sentinel; effective commit capacity is one less.
const MAX_LINES: usize = 64;
/// Bounded payload buffer across all committed lines of one response.
const MAX_BUF: usize = 4096;

/// Final-response classification (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Ok,
    Connect,
    Error,
    CmeError,
    NoDialtone,
    Busy,
    NoCarrier,
    CommandNotSupport,
}

const TERMINATORS: &[(&str, Terminator)] = &[
    ("OK", Terminator::Ok),
    ("CONNECT", Terminator::Connect),
    ("ERROR", Terminator::Error),
    ("+CME ERROR", Terminator::CmeError),
    ("NO DIALTONE", Terminator::NoDialtone),
    ("BUSY", Terminator::Busy),
    ("NO CARRIER", Terminator::NoCarrier),
    ("COMMAND NOT SUPPORT", Terminator::CommandNotSupport),
];

/// Failure causes for [`read_response`] — the `errno`-style outcomes of §4.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtyReadError {
    /// No terminator arrived within the caller's timeout.
    Timeout,
    /// The line array or byte buffer was exhausted before a terminator.
    Range,
    /// A non-recoverable I/O error from `poll`/`read`.
    Io(String),
}

impl std::fmt::Display for TtyReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TtyReadError::Timeout => write!(f, "ETIMEDOUT"),
            TtyReadError::Range => write!(f, "ERANGE"),
            TtyReadError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

/// The filled-in response: committed lines plus the optional result line.
#[derive(Debug, Clone, Default)]
pub struct TtyReadBuffer {
    lines: Vec<String>,
    result_line: Option<usize>,
}

impl TtyReadBuffer {
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// The first committed line that has the caller's prefix as a proper
    /// prefix, if any.
    #[must_use]
    pub fn result_line(&self) -> Option<&str> {
        self.result_line.map(|i| self.lines[i].as_str())
    }

    /// Re-serialize all lines as a quoted, comma-separated string for
    /// logging: `"l1", "l2"` — no trailing separator. Idempotent.
    #[must_use]
    pub fn flatten(&self) -> String {
        self.lines
            .iter()
            .map(|l| format!("{l:?}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

enum FeedOutcome {
    Continue,
    Terminator(Terminator),
}

/// Pure tokenizer state, separated from fd/poll plumbing so the reader
/// invariants in spec §8 are directly unit-testable.
struct Tokenizer {
    buf: Vec<u8>,
    lines: Vec<String>,
    result_line: Option<usize>,
    prefix: Option<String>,
    cur_line_start: usize,
    /// True immediately after a committed/discarded line or at stream start;
    /// makes the "don't advance on a second consecutive CR/LF byte" behavior
    /// explicit instead of relying on a `rxed = 0` trick.
    at_line_start: bool,
}

impl Tokenizer {
    fn new(prefix: Option<&str>) -> Self {
        Self {
            buf: Vec::with_capacity(256),
            lines: Vec::new(),
            result_line: None,
            prefix: prefix.map(str::to_string),
            cur_line_start: 0,
            at_line_start: true,
        }
    }

    fn feed_byte(&mut self, b: u8) -> Result<FeedOutcome, TtyReadError> {
        if b == b'\r' || b == b'\n' {
            if self.at_line_start {
                // Consecutive CR/LF: collapse, don't advance, nothing to commit.
                return Ok(FeedOutcome::Continue);
            }
            let line_bytes = &self.buf[self.cur_line_start..];
            let line = String::from_utf8_lossy(line_bytes).into_owned();
            self.at_line_start = true;

            if line.starts_with('^') {
                // Unsolicited notification: rewind, don't count.
                self.buf.truncate(self.cur_line_start);
                return Ok(FeedOutcome::Continue);
            }

            if self.lines.len() + 1 >= MAX_LINES {
                return Err(TtyReadError::Range);
            }
            self.lines.push(line.clone());
            self.cur_line_start = self.buf.len();

            if self.result_line.is_none() {
                if let Some(ref prefix) = self.prefix {
                    if line.starts_with(prefix.as_str()) {
                        self.result_line = Some(self.lines.len() - 1);
                    }
                }
            }

            for (code, tag) in TERMINATORS {
                if line.starts_with(code) {
                    return Ok(FeedOutcome::Terminator(*tag));
                }
            }
            return Ok(FeedOutcome::Continue);
        }

        if self.buf.len() >= MAX_BUF {
            return Err(TtyReadError::Range);
        }
        self.buf.push(b);
        self.at_line_start = false;
        Ok(FeedOutcome::Continue)
    }

    fn into_buffer(self) -> TtyReadBuffer {
        TtyReadBuffer {
            lines: self.lines,
            result_line: self.result_line,
        }
    }
}

/// Read a full AT response from `fd`, classifying it by terminator.
///
/// `fd` must be open and non-blocking (spec §4.2). Polls with the remaining
/// timeout between read attempts; `EAGAIN`/`EWOULDBLOCK` is recoverable.
pub fn read_response(
    fd: RawFd,
    prefix: Option<&str>,
    timeout: Duration,
) -> Result<(TtyReadBuffer, Terminator), TtyReadError> {
    let mut tok = Tokenizer::new(prefix);
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TtyReadError::Timeout);
        }

        let borrowed: BorrowedFd = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut fds = [PollFd::new(borrowed.as_fd(), PollFlags::POLLIN)];
        let timeout_ms = u16::try_from(remaining.as_millis().min(u128::from(u16::MAX)))
            .unwrap_or(u16::MAX);
        match poll(&mut fds, PollTimeout::from(timeout_ms)) {
            Ok(0) => continue, // nothing ready; loop re-checks the deadline
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(TtyReadError::Io(e.to_string())),
        }

        let mut byte = [0u8; 1];
        match unistd::read(fd, &mut byte) {
            Ok(0) => continue,
            Ok(_) => match tok.feed_byte(byte[0])? {
                FeedOutcome::Continue => {}
                FeedOutcome::Terminator(t) => return Ok((tok.into_buffer(), t)),
            },
            Err(Errno::EAGAIN) => continue,
            Err(e) => return Err(TtyReadError::Io(e.to_string())),
        }
    }
}

/// Build a [`TtyReadBuffer`] directly from already-split lines, bypassing
/// the tokenizer. Used by other modules' tests to script fake responses
/// without a real fd.
#[cfg(test)]
pub(crate) fn build_test_buffer(lines: Vec<String>, result_line: Option<usize>) -> TtyReadBuffer {
    TtyReadBuffer { lines, result_line }
}

/// Feed a complete byte stream through the tokenizer without any fd/poll
/// involvement — used by tests to pin down the reader invariants directly.
#[cfg(test)]
fn tokenize_all(data: &[u8], prefix: Option<&str>) -> Result<(TtyReadBuffer, Terminator), TtyReadError> {
    let mut tok = Tokenizer::new(prefix);
    for &b in data {
        match tok.feed_byte(b)? {
            FeedOutcome::Continue => {}
            FeedOutcome::Terminator(t) => return Ok((tok.into_buffer(), t)),
        }
    }
    Err(TtyReadError::Timeout)
}
