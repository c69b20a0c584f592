//! Async-signal-safe lifecycle handlers (spec §4.7).
//!
//! Two handlers share a single atomic flag. The **safe cleanup handler**
//! closes the control fd and sets the flag; it's installed during setup,
//! before the link child exists. Once the child has started, the **catch
//! handler** (which only records the first signal number) replaces it for
//! the same signals plus SIGCHLD. Adapted from the teacher's signal
//! forwarding in `server/src/supervisor.rs` (which uses tokio signal streams)
//! down to raw `sigaction` with an `extern "C"` handler, since nothing in
//! this single-threaded model may touch a signal-unsafe runtime from signal
//! context.
//!
//! SIGCHLD shares the flag so the supervise loop wakes on either a
//! termination signal or the link child dying, but it must not count as a
//! "we were torn down by a signal" for exit-code purposes (spec §8 scenario
//! 6: a child that exits on its own must surface its own classified error,
//! not `SIGNALED`). `is_signaled` answers the loop-wake question;
//! `is_termination_signaled` answers the exit-code-override question.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, AtomicI32 as AtomicFd, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// Set once, never cleared (spec §3 invariant). `0` = not signaled.
static SIGNALED: AtomicI32 = AtomicI32::new(0);
/// The control fd to close from signal context, or `-1` if none/closed.
static CONTROL_FD: AtomicFd = AtomicFd::new(-1);

/// True once any tracked signal has been observed.
#[must_use]
pub fn is_signaled() -> bool {
    SIGNALED.load(Ordering::Relaxed) != 0
}

/// The first signal number observed, if any.
#[must_use]
pub fn signaled_number() -> Option<i32> {
    let v = SIGNALED.load(Ordering::Relaxed);
    if v == 0 {
        None
    } else {
        Some(v)
    }
}

/// True only if the first observed signal was a termination request
/// (SIGINT/SIGTERM/SIGHUP), not SIGCHLD. Drives the §7 signal-override in
/// `UdialError::overridden_by_signal` — a link child that exits on its own
/// must not be misreported as torn down by a signal.
#[must_use]
pub fn is_termination_signaled() -> bool {
    matches!(
        signaled_number(),
        Some(s) if s == libc::SIGINT || s == libc::SIGTERM || s == libc::SIGHUP
    )
}

/// Register the control fd so the safe cleanup handler can close it.
/// Pass `-1` to clear (e.g. once the fd is closed through the normal path).
/// Returns the previous value, so a caller clearing the slot can tell whether
/// the safe cleanup handler got to it first.
pub fn set_control_fd(fd: RawFd) -> RawFd {
    CONTROL_FD.swap(fd, Ordering::Relaxed)
}

extern "C" fn safe_cleanup_handler(signum: libc::c_int) {
    let fd = CONTROL_FD.swap(-1, Ordering::Relaxed);
    if fd >= 0 {
        unsafe {
            libc::close(fd);
        }
    }
    // Only the first observed signal is kept (spec: "never cleared").
    let _ = SIGNALED.compare_exchange(0, signum, Ordering::Relaxed, Ordering::Relaxed);
}

extern "C" fn catch_handler(signum: libc::c_int) {
    let _ = SIGNALED.compare_exchange(0, signum, Ordering::Relaxed, Ordering::Relaxed);
}

fn install(handler: extern "C" fn(libc::c_int), signals: &[Signal]) {
    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for &sig in signals {
        unsafe {
            let _ = signal::sigaction(sig, &action);
        }
    }
}

/// Install the safe cleanup handler for SIGINT/SIGTERM/SIGHUP, and ignore
/// SIGPIPE process-wide. Called once during setup, before the link child
/// starts.
pub fn install_safe_cleanup() {
    install(
        safe_cleanup_handler,
        &[Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP],
    );
    unsafe {
        let _ = signal::signal(Signal::SIGPIPE, SigHandler::SigIgn);
    }
}

/// Replace the safe cleanup handler with the catch handler for
/// SIGINT/SIGTERM/SIGHUP plus SIGCHLD, once the link child has started.
pub fn install_catch_handler() {
    install(
        catch_handler,
        &[
            Signal::SIGINT,
            Signal::SIGTERM,
            Signal::SIGHUP,
            Signal::SIGCHLD,
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests share process-global statics; serialize them.
    static LOCK: Mutex<()> = Mutex::new(());

    fn reset() {
        SIGNALED.store(0, Ordering::Relaxed);
        CONTROL_FD.store(-1, Ordering::Relaxed);
    }

    #[test]
    fn signaled_flag_starts_clear_and_latches_first_value() {
        let _guard = LOCK.lock().unwrap();
        reset();
        assert!(!is_signaled());
        safe_cleanup_handler(libc::SIGTERM);
        assert!(is_signaled());
        assert_eq!(signaled_number(), Some(libc::SIGTERM));
        // A second, different signal must not overwrite the first.
        catch_handler(libc::SIGINT);
        assert_eq!(signaled_number(), Some(libc::SIGTERM));
        reset();
    }

    #[test]
    fn sigchld_alone_is_signaled_but_not_termination_signaled() {
        let _guard = LOCK.lock().unwrap();
        reset();
        catch_handler(libc::SIGCHLD);
        assert!(is_signaled());
        assert!(!is_termination_signaled());
        reset();
    }

    #[test]
    fn termination_signal_sets_both_flags() {
        let _guard = LOCK.lock().unwrap();
        reset();
        catch_handler(libc::SIGTERM);
        assert!(is_signaled());
        assert!(is_termination_signaled());
        reset();
    }

    #[test]
    fn safe_cleanup_handler_closes_registered_fd_and_clears_it() {
        let _guard = LOCK.lock().unwrap();
        reset();
        let (r, w) = nix::unistd::pipe().unwrap();
        let fd = std::os::fd::AsRawFd::as_raw_fd(&r);
        set_control_fd(fd);
        std::mem::forget(r); // ownership now tracked manually for this test
        safe_cleanup_handler(libc::SIGTERM);
        assert_eq!(CONTROL_FD.load(Ordering::Relaxed), -1);
        // fd is now closed; writing to the other end eventually yields EPIPE,
        // but asserting that needs a second read attempt which would block —
        // a real close is exercised in session.rs's integration-style tests.
        drop(w);
        reset();
    }
}
