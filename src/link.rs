//! Link-daemon configuration emission and child process supervision.
//!
//! The link daemon (an external point-to-point protocol process, e.g.
//! `pppd`) is configured via a temp file and re-invokes this binary in dial
//! mode as its `connect` script. Spawn/reap idiom is adapted from the
//! teacher's `spawn_shell_pgroup`/`exec_command` (`server/src/shell/process.rs`)
//! from `tokio::process` to `std::process::Command` + `nix::sys::wait`, since
//! this component runs in the single-threaded model of spec §5.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::config_store::ConfigStore;
use crate::error::first_forbidden_char;

const BAUD_RATE: u32 = 460_800;
const LINK_NAME: &str = "udiald";
const IP_PARAM_NAME: &str = "udiald";

/// Default path to the external link daemon binary.
pub const DEFAULT_LINK_DAEMON: &str = "/usr/sbin/pppd";

/// Resolve the link daemon path: `--link-daemon` CLI flag, else
/// `UDIALD_LINK_DAEMON` env var, else the compiled default (spec §10.2
/// bootstrap precedence).
#[must_use]
pub fn resolve_link_daemon_path(cli_flag: Option<&str>) -> String {
    if let Some(p) = cli_flag {
        return p.to_string();
    }
    if let Ok(p) = std::env::var("UDIALD_LINK_DAEMON") {
        return p;
    }
    DEFAULT_LINK_DAEMON.to_string()
}

/// Forwarded integer option with its documented default (spec §6 table).
struct IntOption {
    key: &'static str,
    default: i64,
    /// Only emitted when the resolved value satisfies this predicate.
    emit_if: fn(i64) -> bool,
}

const FORWARDED_INTS: &[IntOption] = &[
    IntOption { key: "defaultroute", default: 1, emit_if: |_| true },
    IntOption { key: "replacedefaultroute", default: 0, emit_if: |_| true },
    IntOption { key: "usepeerdns", default: 1, emit_if: |_| true },
    IntOption { key: "persist", default: 1, emit_if: |_| true },
    IntOption { key: "unit", default: -1, emit_if: |v| v > 0 },
    IntOption { key: "maxfail", default: 1, emit_if: |v| v >= 0 },
    IntOption { key: "holdoff", default: 0, emit_if: |v| v >= 0 },
    IntOption { key: "noremoteip", default: 1, emit_if: |_| true },
];

/// Build the path for the link-daemon config file: unique per network name
/// and parent PID.
fn config_file_path(network_name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("udiald-{network_name}-{}.conf", std::process::id()));
    path
}

/// Write the link-daemon configuration file described in spec §4.6.
///
/// Owner-only permissions, exclusive-create (refuses to overwrite).
pub fn write_link_config(
    store: &dyn ConfigStore,
    network_name: &str,
    data_tty: &str,
    self_exe: &str,
) -> Result<PathBuf, String> {
    let path = config_file_path(network_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&path)
        .map_err(|e| format!("create {}: {e}", path.display()))?;

    let mut body = String::new();
    body.push_str(data_tty);
    body.push('\n');
    body.push_str(&BAUD_RATE.to_string());
    body.push('\n');
    for flag in ["crtscts", "lock", "noauth", "noipdefault", "novj", "nodetach"] {
        body.push_str(flag);
        body.push('\n');
    }

    if let Some(ifname) = store.get("udiald", network_name, "ifname") {
        body.push_str(&format!("ifname {ifname}\n"));
    }

    body.push_str(&format!(
        "connect \"{self_exe} --dial --network-name {network_name}\"\n"
    ));
    body.push_str(&format!("linkname {LINK_NAME}\n"));
    body.push_str(&format!("ipparam {IP_PARAM_NAME}\n"));

    if let Some(user) = store.get("udiald", network_name, "udiald_user") {
        if let Some(bad) = first_forbidden_char(&user) {
            return Err(format!("udiald_user contains forbidden character {bad:?}"));
        }
        body.push_str(&format!("user {user}\n"));
    }
    if let Some(pass) = store.get("udiald", network_name, "udiald_pass") {
        if let Some(bad) = first_forbidden_char(&pass) {
            return Err(format!("udiald_pass contains forbidden character {bad:?}"));
        }
        body.push_str(&format!("password {pass}\n"));
    }
    if let Some(mtu) = store.get("udiald", network_name, "udiald_mtu") {
        body.push_str(&format!("mtu {mtu}\nmru {mtu}\n"));
    }

    for opt in FORWARDED_INTS {
        let value = store
            .get("udiald", network_name, opt.key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(opt.default);
        if (opt.emit_if)(value) {
            body.push_str(&format!("{} {value}\n", opt.key));
        }
    }

    for extra in store.get_list("udiald", network_name, "udiald_pppdopt") {
        body.push_str(&extra);
        body.push('\n');
    }

    file.write_all(body.as_bytes())
        .map_err(|e| format!("write {}: {e}", path.display()))?;

    Ok(path)
}

/// A running link-daemon child process.
pub struct LinkChild {
    child: Child,
}

impl LinkChild {
    /// Fork/exec the link daemon with argv `[daemon, "file", config_path]`.
    pub fn spawn(daemon_path: &str, config_path: &PathBuf) -> Result<Self, String> {
        let child = Command::new(daemon_path)
            .arg("file")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("spawn {daemon_path}: {e}"))?;
        Ok(Self { child })
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Attempt a non-blocking reap; if the child hasn't exited, send SIGTERM
    /// and reap blocking (spec §4.5 terminate phase).
    pub fn terminate_and_reap(mut self) -> Result<ChildExit, String> {
        let pid = Pid::from_raw(i32::try_from(self.child.id()).map_err(|e| e.to_string())?);

        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                let _ = signal::kill(pid, Signal::SIGTERM);
                match waitpid(pid, None) {
                    Ok(status) => Ok(ChildExit::from_wait_status(status)),
                    Err(e) => Err(format!("waitpid: {e}")),
                }
            }
            Ok(status) => Ok(ChildExit::from_wait_status(status)),
            Err(_) => {
                // Already reaped elsewhere (e.g. by the catch handler's
                // SIGCHLD bookkeeping) — fall back to std's own wait.
                let status = self.child.wait().map_err(|e| e.to_string())?;
                Ok(ChildExit {
                    code: status.code(),
                    signaled: false,
                })
            }
        }
    }
}

/// Normalized child exit outcome.
#[derive(Debug, Clone, Copy)]
pub struct ChildExit {
    pub code: Option<i32>,
    pub signaled: bool,
}

impl ChildExit {
    fn from_wait_status(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => ChildExit {
                code: Some(code),
                signaled: false,
            },
            WaitStatus::Signaled(_, _, _) => ChildExit {
                code: None,
                signaled: true,
            },
            _ => ChildExit {
                code: None,
                signaled: false,
            },
        }
    }
}

/// Translate the link daemon's exit status through spec §6's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Modem,
    Dial,
    Network,
    Auth,
    Signaled,
    Ppp,
}

#[must_use]
pub fn classify_exit(exit: ChildExit) -> LinkOutcome {
    if exit.signaled {
        return LinkOutcome::Signaled;
    }
    match exit.code {
        Some(7 | 16) => LinkOutcome::Modem,
        Some(8) => LinkOutcome::Dial,
        Some(0 | 15) => LinkOutcome::Network,
        Some(19) => LinkOutcome::Auth,
        Some(5) => LinkOutcome::Signaled,
        _ => LinkOutcome::Ppp,
    }
}

/// Remove the config file after the child has exited.
pub fn cleanup_config(path: &PathBuf) {
    let _ = fs::remove_file(path);
}

#[allow(dead_code)]
fn assert_owner_only(path: &PathBuf) -> bool {
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o777 == 0o600)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::MemConfigStore;

    #[test]
    fn classifies_known_link_exit_codes() {
        let exit = |code| ChildExit { code: Some(code), signaled: false };
        assert_eq!(classify_exit(exit(7)), LinkOutcome::Modem);
        assert_eq!(classify_exit(exit(16)), LinkOutcome::Modem);
        assert_eq!(classify_exit(exit(8)), LinkOutcome::Dial);
        assert_eq!(classify_exit(exit(0)), LinkOutcome::Network);
        assert_eq!(classify_exit(exit(15)), LinkOutcome::Network);
        assert_eq!(classify_exit(exit(19)), LinkOutcome::Auth);
        assert_eq!(classify_exit(exit(5)), LinkOutcome::Signaled);
        assert_eq!(classify_exit(exit(99)), LinkOutcome::Ppp);
    }

    #[test]
    fn wifsignaled_child_is_always_signaled() {
        let exit = ChildExit { code: None, signaled: true };
        assert_eq!(classify_exit(exit), LinkOutcome::Signaled);
    }

    #[test]
    fn writes_config_with_expected_body_and_refuses_overwrite() {
        let mut store = MemConfigStore::new();
        store.seed("wan", "udiald_mtu", "1400");

        let _ = fs::remove_file(config_file_path("wan-test-unique"));
        let path = write_link_config(&store, "wan-test-unique", "/dev/ttyUSB0", "/usr/sbin/udiald").unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("/dev/ttyUSB0\n460800\n"));
        assert!(body.contains("crtscts"));
        assert!(body.contains("connect \"/usr/sbin/udiald --dial --network-name wan-test-unique\""));
        assert!(body.contains("mtu 1400"));
        assert!(body.contains("defaultroute 1"));

        assert!(assert_owner_only(&path));
        assert!(write_link_config(&store, "wan-test-unique", "/dev/ttyUSB0", "/usr/sbin/udiald").is_err());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn resolve_link_daemon_prefers_cli_flag() {
        assert_eq!(resolve_link_daemon_path(Some("/opt/pppd")), "/opt/pppd");
    }

    #[test]
    fn write_config_rejects_forbidden_characters_in_user_and_pass() {
        let mut store = MemConfigStore::new();
        store.seed("wan-bad-user", "udiald_user", "bob;rm -rf /");
        let _ = fs::remove_file(config_file_path("wan-bad-user"));
        assert!(write_link_config(&store, "wan-bad-user", "/dev/ttyUSB0", "/usr/sbin/udiald").is_err());

        let mut store = MemConfigStore::new();
        store.seed("wan-bad-pass", "udiald_pass", "hunter\"2");
        let _ = fs::remove_file(config_file_path("wan-bad-pass"));
        assert!(write_link_config(&store, "wan-bad-pass", "/dev/ttyUSB0", "/usr/sbin/udiald").is_err());
    }
}
