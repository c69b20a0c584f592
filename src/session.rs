//! Session state machine: identify → SIM → unlock → capability → mode →
//! dial → supervise → terminate (spec §4.5), plus the error taxonomy from
//! §7.
//!
//! AT transactions are issued through the [`AtChannel`] trait so the state
//! machine is testable against a scripted fake, the way the teacher's
//! `Modem` (`server/src/modem.rs`) is a thin `command()`-oriented handle over
//! the real fd — here generalized to the full terminator set instead of
//! "OK or ERROR".

use std::os::unix::io::RawFd;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config_store::ConfigStore;
use crate::discovery::{FilterSpec, ModemHandle};
use crate::error::{first_forbidden_char, UdialError, UdialResult};
use crate::link::{self, ChildExit, LinkChild, LinkOutcome};
use crate::profile::{ConfigProfile, ModeTag};
use crate::tty::{self, Terminator, TtyReadBuffer};

const DEFAULT_AT_TIMEOUT: Duration = Duration::from_millis(2500);
const SET_MODE_TIMEOUT: Duration = Duration::from_secs(5);
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(15);
const PIN_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// The application mode selected on the command line (spec §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Connect,
    Scan,
    Probe,
    UnlockPin,
    UnlockPuk,
    Dial,
    ListDevices,
    ListProfiles,
}

/// SIM state code (spec §4.5 check-SIM).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    Ready,
    WantsPin,
    WantsPuk,
    Error,
}

/// Abstraction over "send a command, read a response" so the state machine
/// doesn't depend on a real fd in tests.
pub trait AtChannel {
    fn send(&mut self, command: &str) -> Result<(), String>;
    fn recv(&mut self, prefix: Option<&str>, timeout: Duration) -> Result<(TtyReadBuffer, Terminator), String>;

    /// Convenience: send then receive, the unit of work spec §5 calls "one
    /// `put` followed by exactly one `get`".
    fn transact(
        &mut self,
        command: &str,
        prefix: Option<&str>,
        timeout: Duration,
    ) -> Result<(TtyReadBuffer, Terminator), String> {
        self.send(command)?;
        self.recv(prefix, timeout)
    }
}

/// Real serial-line channel over an open, configured control fd.
pub struct SerialChannel {
    fd: RawFd,
}

impl SerialChannel {
    #[must_use]
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl AtChannel for SerialChannel {
    fn send(&mut self, command: &str) -> Result<(), String> {
        tty::write_command(self.fd, &format!("{command}\r"))
    }

    fn recv(
        &mut self,
        prefix: Option<&str>,
        timeout: Duration,
    ) -> Result<(TtyReadBuffer, Terminator), String> {
        tty::reader::read_response(self.fd, prefix, timeout).map_err(|e| e.to_string())
    }
}

/// The aggregate runtime state (spec §3 `SessionState`).
pub struct Session<'a, C: AtChannel, S: ConfigStore> {
    pub app_mode: AppMode,
    pub network_name: String,
    pub handle: Option<ModemHandle>,
    pub channel: C,
    pub store: &'a mut S,
    pub sim_state: Option<SimState>,
    pub is_gsm: bool,
    pub pin_override: Option<String>,
    pub filter: FilterSpec,
    /// Profile bound at discovery time; needed by `set_mode`.
    pub profile: Option<ConfigProfile>,
}

impl<'a, C: AtChannel, S: ConfigStore> Session<'a, C, S> {
    pub fn new(
        app_mode: AppMode,
        network_name: String,
        channel: C,
        store: &'a mut S,
        filter: FilterSpec,
        pin_override: Option<String>,
    ) -> Self {
        Self {
            app_mode,
            network_name,
            handle: None,
            channel,
            store,
            sim_state: None,
            is_gsm: false,
            pin_override,
            filter,
            profile: None,
        }
    }

    fn section(&self) -> String {
        self.network_name.clone()
    }

    /// Reset phase: flush input, send ATE0, discard response.
    pub fn reset_modem(&mut self) -> UdialResult<()> {
        info!("resetting modem (ATE0)");
        // Result intentionally discarded: ATE0's response is informational.
        let _ = self
            .channel
            .transact("ATE0", None, DEFAULT_AT_TIMEOUT);
        Ok(())
    }

    /// Identify: AT+CGMI;+CGMM, require >= 3 lines, persist "mfg model".
    pub fn identify(&mut self) -> UdialResult<()> {
        info!("identifying modem");
        let (buf, term) = self
            .channel
            .transact("AT+CGMI;+CGMM", None, DEFAULT_AT_TIMEOUT)
            .map_err(UdialError::Modem)?;
        debug!(response = %buf.flatten(), "identify response");

        if term != Terminator::Ok {
            return Err(UdialError::Modem(format!("identify failed: {term:?}")));
        }
        if buf.line_count() < 3 {
            return Err(UdialError::Modem(format!(
                "expected at least 3 response lines, got {}",
                buf.line_count()
            )));
        }
        let mfg = buf.lines().first().cloned().unwrap_or_default();
        let model = buf.lines().get(1).cloned().unwrap_or_default();
        let name = format!("{mfg} {model}");
        self.store.set("udiald", &self.section(), "modem_name", &name);
        Ok(())
    }

    /// Persist the discovery-derived identity fields (spec §6 write keys
    /// `modem_driver`, `modem_id`) that have no AT-command source.
    pub fn record_discovery_identity(&mut self, handle: &ModemHandle) {
        self.store
            .set("udiald", &self.section(), "modem_driver", &handle.driver);
        self.store
            .set("udiald", &self.section(), "modem_id", &handle.device_id);
    }

    /// Persist the link daemon's pid (spec §6 write key `pid`) once spawned.
    pub fn record_link_pid(&mut self, pid: u32) {
        self.store.set("udiald", &self.section(), "pid", &pid.to_string());
    }

    /// Write `udiald_state` (spec §6 write key, values `init`/`dial`/`error`)
    /// — connect-mode only, matching `record_failure`'s existing gating.
    pub fn record_state(&mut self, value: &str) {
        if self.app_mode == AppMode::Connect {
            self.store.set("udiald", &self.section(), "udiald_state", value);
        }
    }

    /// Check SIM: AT+CPIN?, map `+CPIN: <x>` to a `SimState`.
    pub fn check_sim(&mut self) -> UdialResult<SimState> {
        info!("checking SIM state");
        let (buf, term) = self
            .channel
            .transact("AT+CPIN?", Some("+CPIN: "), DEFAULT_AT_TIMEOUT)
            .map_err(UdialError::Sim)?;

        if term != Terminator::Ok {
            self.sim_state = Some(SimState::Error);
            self.persist_sim_state(SimState::Error);
            return Err(UdialError::Sim(format!("AT+CPIN? failed: {term:?}")));
        }

        let Some(result_line) = buf.result_line() else {
            self.sim_state = Some(SimState::Error);
            self.persist_sim_state(SimState::Error);
            return Err(UdialError::Sim("no +CPIN: result line".to_string()));
        };

        let remainder = result_line.trim_start_matches("+CPIN: ").trim();
        let state = match remainder {
            "READY" => SimState::Ready,
            "SIM PIN" => SimState::WantsPin,
            "SIM PUK" => SimState::WantsPuk,
            _ => SimState::Error,
        };
        self.sim_state = Some(state);
        self.persist_sim_state(state);
        Ok(state)
    }

    fn persist_sim_state(&mut self, state: SimState) {
        let value = match state {
            SimState::Ready => "ready",
            SimState::WantsPin => "wantpin",
            SimState::WantsPuk => "wantpuk",
            SimState::Error => "error",
        };
        self.store.set("udiald", &self.section(), "sim_state", value);
    }

    /// Enter PIN: resolve source, validate, check `failed_pin`, send,
    /// persist outcome.
    pub fn enter_pin(&mut self) -> UdialResult<()> {
        let pin = self
            .pin_override
            .clone()
            .or_else(|| self.store.get("udiald", &self.section(), "udiald_pin"));

        let Some(pin) = pin else {
            return Err(UdialError::Unlock("no PIN configured".to_string()));
        };

        if let Some(bad) = first_forbidden_char(&pin) {
            return Err(UdialError::InvalidArg(format!(
                "PIN contains forbidden character {bad:?}"
            )));
        }

        if let Some(failed) = self.store.get("udiald", &self.section(), "failed_pin") {
            if failed == pin {
                return Err(UdialError::Unlock(
                    "PIN previously failed, refusing retry".to_string(),
                ));
            }
        }

        let (buf, term) = self
            .channel
            .transact(&format!("AT+CPIN=\"{pin}\""), None, DEFAULT_AT_TIMEOUT)
            .map_err(UdialError::Unlock)?;
        debug!(response = %buf.flatten(), "enter_pin response");

        if term != Terminator::Ok {
            self.store
                .set("udiald", &self.section(), "failed_pin", &pin);
            return Err(UdialError::Unlock(format!("AT+CPIN failed: {term:?}")));
        }

        self.store.set("udiald", &self.section(), "failed_pin", "");
        std::thread::sleep(PIN_SETTLE_DELAY);
        self.sim_state = Some(SimState::Ready);
        self.persist_sim_state(SimState::Ready);
        Ok(())
    }

    /// Enter PUK: only valid from `WantsPuk`. Validates both PUK and new PIN.
    pub fn enter_puk(&mut self, puk: &str, new_pin: &str) -> UdialResult<()> {
        if self.sim_state != Some(SimState::WantsPuk) {
            return Err(UdialError::Unlock(
                "PUK entry requires SIM PUK state".to_string(),
            ));
        }
        for (label, value) in [("PUK", puk), ("PIN", new_pin)] {
            if let Some(bad) = first_forbidden_char(value) {
                return Err(UdialError::InvalidArg(format!(
                    "{label} contains forbidden character {bad:?}"
                )));
            }
        }

        let (_, term) = self
            .channel
            .transact(
                &format!("AT+CPIN=\"{puk}\",\"{new_pin}\""),
                None,
                DEFAULT_AT_TIMEOUT,
            )
            .map_err(UdialError::Unlock)?;

        if term != Terminator::Ok {
            return Err(UdialError::Unlock(format!("AT+CPIN PUK reset failed: {term:?}")));
        }
        self.sim_state = Some(SimState::Ready);
        self.persist_sim_state(SimState::Ready);
        Ok(())
    }

    /// Capabilities: AT+GCAP, set `is_gsm` if the result line contains CGSM.
    pub fn check_capabilities(&mut self) -> UdialResult<()> {
        let (buf, term) = self
            .channel
            .transact("AT+GCAP", Some("+GCAP: "), DEFAULT_AT_TIMEOUT)
            .map_err(UdialError::Modem)?;

        if term != Terminator::Ok {
            return Err(UdialError::Modem(format!("AT+GCAP failed: {term:?}")));
        }
        self.is_gsm = buf
            .result_line()
            .is_some_and(|l| l.contains("CGSM"));
        self.store.set(
            "udiald",
            &self.section(),
            "modem_gsm",
            if self.is_gsm { "1" } else { "0" },
        );
        Ok(())
    }

    /// Set mode: read `udiald_mode`, look up the profile's command for that
    /// tag, skip silently if empty, else send with a 5s timeout.
    pub fn set_mode(&mut self) -> UdialResult<()> {
        let mode_name = self
            .store
            .get("udiald", &self.section(), "udiald_mode")
            .unwrap_or_else(|| "auto".to_string());
        let Some(tag) = ModeTag::parse(&mode_name) else {
            return Err(UdialError::InvalidArg(format!("unknown mode {mode_name:?}")));
        };

        let profile = self
            .profile
            .as_ref()
            .ok_or_else(|| UdialError::Internal("set_mode called with no bound profile".into()))?;

        let Some(command) = profile.modes.get(&tag) else {
            return Err(UdialError::InvalidArg(format!(
                "profile {:?} does not support mode {mode_name:?}",
                profile.name
            )));
        };

        if command.is_empty() {
            // Preserved behavior: skip the transaction but still report success.
            self.store.set("udiald", &self.section(), "modem_mode", &mode_name);
            return Ok(());
        }

        let (_, term) = self
            .channel
            .transact(command, None, SET_MODE_TIMEOUT)
            .map_err(UdialError::Modem)?;
        if term != Terminator::Ok {
            return Err(UdialError::Modem(format!("set_mode failed: {term:?}")));
        }
        self.store.set("udiald", &self.section(), "modem_mode", &mode_name);
        Ok(())
    }

    /// Supervise loop body: one iteration of `AT+COPS?;+CSQ`. Returns the
    /// parsed carrier (if changed) and rssi.
    fn supervise_iteration(
        &mut self,
        last_carrier: &Option<String>,
    ) -> UdialResult<(Option<String>, Option<i32>)> {
        let (buf, term) = self
            .channel
            .transact("AT+COPS?;+CSQ", None, DEFAULT_AT_TIMEOUT)
            .map_err(UdialError::Network)?;
        if term != Terminator::Ok {
            return Err(UdialError::Network(format!("supervise query failed: {term:?}")));
        }

        let carrier = buf.lines().first().and_then(|l| extract_quoted(l));
        let rssi = buf.lines().get(1).and_then(|l| extract_first_int(l));

        if let Some(ref c) = carrier {
            if last_carrier.as_deref() != Some(c.as_str()) {
                info!(carrier = %c, "carrier changed");
                self.store.set("udiald", &self.section(), "provider", c);
            }
        }
        if let Some(r) = rssi {
            self.store.set("udiald", &self.section(), "rssi", &r.to_string());
        }
        Ok((carrier, rssi))
    }

    /// Run the supervise loop until the signaled flag is observed. Sets
    /// `connected=1` before the first iteration's query completes, per the
    /// preserved ordering in spec §9.
    pub fn supervise(&mut self) -> UdialResult<()> {
        self.channel
            .transact("AT+COPS=3,0", None, DEFAULT_AT_TIMEOUT)
            .map_err(UdialError::Network)?;

        let mut last_carrier: Option<String> = None;
        let mut iteration: u64 = 0;
        let mut connected_set = false;

        while !crate::signal::is_signaled() {
            if !connected_set {
                self.store.set("udiald", &self.section(), "connected", "1");
                connected_set = true;
            }
            match self.supervise_iteration(&last_carrier) {
                Ok((carrier, rssi)) => {
                    if carrier.is_some() {
                        last_carrier = carrier;
                    }
                    if iteration % 4 == 0 {
                        info!(rssi = ?rssi, carrier = ?last_carrier, "signal status");
                    } else {
                        debug!(rssi = ?rssi, carrier = ?last_carrier, "signal status");
                    }
                }
                Err(e) => warn!("supervise iteration failed: {e}"),
            }
            iteration += 1;
            std::thread::sleep(SUPERVISE_INTERVAL);
        }
        Ok(())
    }

    /// Terminate: `ATH;&F`, reap the link child, translate its exit.
    pub fn terminate(&mut self, child: Option<LinkChild>) -> UdialResult<Option<LinkOutcome>> {
        let _ = self.channel.transact("ATH;&F", None, DEFAULT_AT_TIMEOUT);

        let Some(child) = child else {
            return Ok(None);
        };
        let exit: ChildExit = child.terminate_and_reap().map_err(UdialError::Internal)?;
        Ok(Some(link::classify_exit(exit)))
    }

    /// Write the terminal-failure bookkeeping (spec §7): error code/message,
    /// and `udiald_state=error` in connect mode.
    pub fn record_failure(&mut self, err: &UdialError) {
        self.store
            .set("udiald", &self.section(), "udiald_error_code", err.code_name());
        self.store
            .set("udiald", &self.section(), "udiald_error_msg", &err.to_string());
        self.record_state("error");
        let _ = self.store.commit("udiald");
    }
}

/// Default dial string for the `--dial` re-entry point: the standard GPRS/UMTS
/// PDP context dial string most 3G USB modems accept regardless of profile.
pub const DEFAULT_DIAL_COMMAND: &str = "ATD*99***1#";

/// The `--dial` re-entry point's entire job: the link daemon invokes this
/// binary as its `connect` script with the data TTY already duped onto
/// stdin/stdout, so this sends the dial string over that inherited channel
/// and exits zero only once `CONNECT` arrives — the link daemon then takes
/// the same fd over for PPP framing.
pub fn dial_over_inherited_channel<C: AtChannel>(
    channel: &mut C,
    dial_command: &str,
    timeout: Duration,
) -> UdialResult<()> {
    let (_, term) = channel
        .transact(dial_command, None, timeout)
        .map_err(UdialError::Dial)?;
    if term == Terminator::Connect {
        Ok(())
    } else {
        Err(UdialError::Dial(format!("dial did not reach CONNECT: {term:?}")))
    }
}

fn extract_quoted(line: &str) -> Option<String> {
    let start = line.find('"')? + 1;
    let end = start + line[start..].find('"')?;
    Some(line[start..end].to_string())
}

fn extract_first_int(line: &str) -> Option<i32> {
    let data = line.split(':').nth(1)?.trim();
    data.split(',').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::MemConfigStore;
    use std::collections::VecDeque;

    /// Scripted channel: each `transact` call consumes the next scripted
    /// response, regardless of the command sent (mirrors §5's strict one
    /// `put`-then-one-`get` serialization, with the script as the oracle).
    struct ScriptedChannel {
        responses: VecDeque<(Vec<&'static str>, Terminator)>,
        prefix_used: Vec<Option<String>>,
        sent: Vec<String>,
    }

    impl ScriptedChannel {
        fn new(responses: Vec<(Vec<&'static str>, Terminator)>) -> Self {
            Self {
                responses: responses.into(),
                prefix_used: Vec::new(),
                sent: Vec::new(),
            }
        }
    }

    impl AtChannel for ScriptedChannel {
        fn send(&mut self, command: &str) -> Result<(), String> {
            self.sent.push(command.to_string());
            Ok(())
        }

        fn recv(
            &mut self,
            prefix: Option<&str>,
            _timeout: Duration,
        ) -> Result<(TtyReadBuffer, Terminator), String> {
            self.prefix_used.push(prefix.map(str::to_string));
            let (lines, term) = self
                .responses
                .pop_front()
                .ok_or_else(|| "script exhausted".to_string())?;
            let mut tok_lines = Vec::new();
            let mut result_line = None;
            for l in lines {
                if let Some(p) = prefix {
                    if result_line.is_none() && l.starts_with(p) {
                        result_line = Some(tok_lines.len());
                    }
                }
                tok_lines.push(l.to_string());
            }
            let buf = TtyReadBufferTestExt::build(tok_lines, result_line);
            Ok((buf, term))
        }
    }

    // `TtyReadBuffer`'s fields are private; build one via the reader
    // module's own test-support constructor instead of reaching into it.
    struct TtyReadBufferTestExt;
    impl TtyReadBufferTestExt {
        fn build(lines: Vec<String>, result_line: Option<usize>) -> TtyReadBuffer {
            crate::tty::reader::build_test_buffer(lines, result_line)
        }
    }

    fn session_with<'a>(
        responses: Vec<(Vec<&'static str>, Terminator)>,
        store: &'a mut MemConfigStore,
    ) -> Session<'a, ScriptedChannel, MemConfigStore> {
        Session::new(
            AppMode::Connect,
            "wan".to_string(),
            ScriptedChannel::new(responses),
            store,
            FilterSpec::default(),
            None,
        )
    }

    #[test]
    fn identify_persists_name_from_first_two_lines() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(
            vec![(vec!["Huawei", "E220", "OK"], Terminator::Ok)],
            &mut store,
        );
        session.identify().unwrap();
        assert_eq!(
            session.store.get("udiald", "wan", "modem_name"),
            Some("Huawei E220".to_string())
        );
    }

    #[test]
    fn identify_fails_with_too_few_lines() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(vec![(vec!["OK"], Terminator::Ok)], &mut store);
        assert!(matches!(session.identify(), Err(UdialError::Modem(_))));
    }

    #[test]
    fn check_sim_maps_ready() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(
            vec![(vec!["+CPIN: READY", "OK"], Terminator::Ok)],
            &mut store,
        );
        assert_eq!(session.check_sim().unwrap(), SimState::Ready);
        assert_eq!(
            session.store.get("udiald", "wan", "sim_state"),
            Some("ready".to_string())
        );
    }

    #[test]
    fn check_sim_maps_wants_pin_and_wants_puk() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(
            vec![
                (vec!["+CPIN: SIM PIN", "OK"], Terminator::Ok),
                (vec!["+CPIN: SIM PUK", "OK"], Terminator::Ok),
            ],
            &mut store,
        );
        assert_eq!(session.check_sim().unwrap(), SimState::WantsPin);
        assert_eq!(session.check_sim().unwrap(), SimState::WantsPuk);
    }

    #[test]
    fn enter_pin_refuses_retry_of_failed_pin_without_sending() {
        let mut store = MemConfigStore::new();
        store.seed("wan", "failed_pin", "1234");
        let mut session = session_with(vec![], &mut store);
        session.pin_override = Some("1234".to_string());
        let err = session.enter_pin().unwrap_err();
        assert!(matches!(err, UdialError::Unlock(_)));
    }

    #[test]
    fn enter_pin_rejects_forbidden_characters() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(vec![], &mut store);
        session.pin_override = Some("12\"34".to_string());
        assert!(matches!(session.enter_pin(), Err(UdialError::InvalidArg(_))));
    }

    #[test]
    fn enter_puk_requires_wants_puk_state() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(vec![], &mut store);
        session.sim_state = Some(SimState::Ready);
        assert!(matches!(
            session.enter_puk("87654321", "9999"),
            Err(UdialError::Unlock(_))
        ));
    }

    #[test]
    fn enter_puk_succeeds_from_wants_puk() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(vec![(vec!["OK"], Terminator::Ok)], &mut store);
        session.sim_state = Some(SimState::WantsPuk);
        session.enter_puk("87654321", "9999").unwrap();
        assert_eq!(session.sim_state, Some(SimState::Ready));
        assert_eq!(
            session.store.get("udiald", "wan", "sim_state"),
            Some("ready".to_string())
        );
    }

    #[test]
    fn check_capabilities_detects_cgsm() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(
            vec![(vec!["+GCAP: +CGSM,+FCLASS,+DS", "OK"], Terminator::Ok)],
            &mut store,
        );
        session.check_capabilities().unwrap();
        assert!(session.is_gsm);
    }

    #[test]
    fn set_mode_skips_transaction_when_command_empty_but_reports_success() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(vec![], &mut store);
        session.profile = Some(ConfigProfile {
            name: "p".into(),
            vendor: None,
            device: None,
            driver: None,
            ctlidx: 0,
            datidx: 1,
            modes: [(ModeTag::Auto, String::new())].into_iter().collect(),
        });
        session.set_mode().unwrap();
        assert_eq!(
            session.store.get("udiald", "wan", "modem_mode"),
            Some("auto".to_string())
        );
    }

    #[test]
    fn set_mode_fails_for_unsupported_tag() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(vec![], &mut store);
        session.profile = Some(ConfigProfile {
            name: "p".into(),
            vendor: None,
            device: None,
            driver: None,
            ctlidx: 0,
            datidx: 1,
            modes: std::collections::BTreeMap::new(),
        });
        assert!(matches!(session.set_mode(), Err(UdialError::InvalidArg(_))));
    }

    #[test]
    fn extract_quoted_finds_first_quoted_substring() {
        assert_eq!(
            extract_quoted("+COPS: 0,0,\"ROGERS\",7"),
            Some("ROGERS".to_string())
        );
    }

    #[test]
    fn extract_first_int_reads_csq_rssi() {
        assert_eq!(extract_first_int("+CSQ: 15,99"), Some(15));
    }

    #[test]
    fn dial_succeeds_on_connect_terminator() {
        let mut channel = ScriptedChannel::new(vec![(vec!["CONNECT"], Terminator::Connect)]);
        dial_over_inherited_channel(&mut channel, DEFAULT_DIAL_COMMAND, DEFAULT_AT_TIMEOUT).unwrap();
    }

    #[test]
    fn dial_fails_on_no_carrier() {
        let mut channel = ScriptedChannel::new(vec![(vec!["NO CARRIER"], Terminator::NoCarrier)]);
        assert!(matches!(
            dial_over_inherited_channel(&mut channel, DEFAULT_DIAL_COMMAND, DEFAULT_AT_TIMEOUT),
            Err(UdialError::Dial(_))
        ));
    }

    #[test]
    fn record_discovery_identity_writes_driver_and_device_id() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(vec![], &mut store);
        let handle = ModemHandle {
            vendor: 0x12d1,
            device: 0x1001,
            driver: "option".to_string(),
            device_id: "1-1:1.0".to_string(),
            endpoints: vec![],
            control_tty: "/dev/ttyUSB0".to_string(),
            data_tty: "/dev/ttyUSB1".to_string(),
            profile_name: "Huawei K3520".to_string(),
        };
        session.record_discovery_identity(&handle);
        assert_eq!(
            session.store.get("udiald", "wan", "modem_driver"),
            Some("option".to_string())
        );
        assert_eq!(
            session.store.get("udiald", "wan", "modem_id"),
            Some("1-1:1.0".to_string())
        );
    }

    #[test]
    fn record_link_pid_writes_pid() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(vec![], &mut store);
        session.record_link_pid(4242);
        assert_eq!(
            session.store.get("udiald", "wan", "pid"),
            Some("4242".to_string())
        );
    }

    #[test]
    fn record_state_is_a_noop_outside_connect_mode() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(vec![], &mut store);
        session.app_mode = AppMode::Scan;
        session.record_state("init");
        assert_eq!(session.store.get("udiald", "wan", "udiald_state"), None);
    }

    #[test]
    fn record_failure_writes_error_keys_and_state_in_connect_mode() {
        let mut store = MemConfigStore::new();
        let mut session = session_with(vec![], &mut store);
        session.record_failure(&UdialError::Modem("timeout".to_string()));
        assert_eq!(
            session.store.get("udiald", "wan", "udiald_error_code"),
            Some("MODEM".to_string())
        );
        assert_eq!(
            session.store.get("udiald", "wan", "udiald_state"),
            Some("error".to_string())
        );
    }
}
