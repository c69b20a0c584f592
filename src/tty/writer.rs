//! Raw serial setup and command transmission.
//!
//! Adapted from the teacher's `configure_termios` (`server/src/modem.rs`),
//! but opened non-blocking with timeout enforced by the reader's `poll`
//! (spec §4.2) rather than the teacher's VMIN/VTIME idle-read timeout.

use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::io::RawFd;

use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, SetArg, SpecialCharacterIndices};
use nix::unistd;

/// Open and configure `device` as a raw 8-N-1 serial control line.
///
/// Non-blocking, no controlling-terminal semantics. Read mode is one-byte
/// minimum with no inter-character timer — the reader enforces its own
/// timeout via `poll`.
pub fn configure_serial(device: &str) -> Result<OwnedFd, String> {
    let fd = fcntl::open(
        device,
        OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK,
        Mode::empty(),
    )
    .map_err(|e| format!("open {device}: {e}"))?;

    let borrowed = fd.as_fd();
    let mut tio = termios::tcgetattr(borrowed).map_err(|e| format!("tcgetattr: {e}"))?;

    // Enable receiver, 8-bit characters, ignore parity errors on input,
    // disable canonical mode / echo / echo-erase / signal generation.
    tio.control_flags |= termios::ControlFlags::CREAD | termios::ControlFlags::CLOCAL;
    tio.control_flags.remove(termios::ControlFlags::CSIZE);
    tio.control_flags |= termios::ControlFlags::CS8;
    tio.input_flags |= termios::InputFlags::IGNPAR;
    tio.local_flags.remove(
        termios::LocalFlags::ICANON
            | termios::LocalFlags::ECHO
            | termios::LocalFlags::ECHOE
            | termios::LocalFlags::ISIG,
    );

    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    termios::tcsetattr(borrowed, SetArg::TCSANOW, &tio).map_err(|e| format!("tcsetattr: {e}"))?;
    termios::tcflush(borrowed, termios::FlushArg::TCIOFLUSH)
        .map_err(|e| format!("tcflush: {e}"))?;

    Ok(fd)
}

/// Transmit a fully-formed AT command. The caller supplies the trailing CR.
/// Fails if the write is short (spec §4.2).
pub fn write_command(fd: RawFd, command: &str) -> Result<(), String> {
    let bytes = command.as_bytes();
    let written = unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, bytes)
        .map_err(|e| format!("write: {e}"))?;
    if written != bytes.len() {
        return Err(format!(
            "short write: wrote {written} of {} bytes",
            bytes.len()
        ));
    }
    Ok(())
}
