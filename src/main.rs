#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

//! udiald — modem control engine for UMTS/3G USB modems.
//!
//! Thin dispatch layer: parse args, pick a mode, run it, translate any
//! `UdialError` into the documented exit code. Grounded on the teacher's
//! `main.rs` subcommand dispatch, flattened from `serve`/`supervise` async
//! subcommands to this program's synchronous, mutually-exclusive app modes.

use std::os::fd::IntoRawFd;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use udiald::cli::{Cli, ListFormat};
use udiald::config_store::{self, ConfigStore, FileConfigStore};
use udiald::discovery::{self, ModemHandle};
use udiald::error::{UdialError, UdialResult};
use udiald::link::{self, LinkChild};
use udiald::profile::ProfileRegistry;
use udiald::session::{self, AppMode, SerialChannel, Session, SimState};
use udiald::{logging, signal, tty};

const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbosity_delta());

    match run(&cli) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            let e = e.overridden_by_signal(signal::is_termination_signaled());
            error!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn run(cli: &Cli) -> UdialResult<()> {
    let app_mode = cli.app_mode().map_err(UdialError::InvalidArg)?;

    if app_mode == AppMode::Dial {
        return run_dial();
    }

    let store_path = config_store::resolve_store_path(cli.config_store.as_deref());
    let mut store =
        FileConfigStore::open(&store_path).map_err(|e| UdialError::Internal(e.to_string()))?;

    if app_mode == AppMode::ListDevices {
        print_device_listing(cli.format.into());
        return Ok(());
    }
    if app_mode == AppMode::ListProfiles {
        let registry = ProfileRegistry::load(&store, &cli.network_name);
        print_profile_listing(&registry, cli.format.into());
        return Ok(());
    }

    if cli.refuse_on_prior_failure && app_mode == AppMode::Connect {
        refuse_if_prior_failure(&store, &cli.network_name)?;
    }

    let filter = cli.filter_spec().map_err(UdialError::InvalidArg)?;
    let registry = ProfileRegistry::load(&store, &cli.network_name);
    let forced_profile = cli
        .profile
        .as_deref()
        .map(|name| {
            registry
                .by_name(name)
                .cloned()
                .ok_or_else(|| UdialError::InvalidArg(format!("unknown profile {name:?}")))
        })
        .transpose()?;

    let handle: ModemHandle = discovery::discover(&registry, &filter, forced_profile.as_ref())
        .map_err(UdialError::NoModem)?;
    info!(
        modem = %handle.profile_name,
        control = %handle.control_tty,
        data = %handle.data_tty,
        "modem selected"
    );

    let bound_profile = forced_profile.or_else(|| registry.by_name(&handle.profile_name).cloned());

    // Leaked into a raw fd deliberately: ownership is tracked by the
    // process-global control-fd slot (spec §3 — "negative (closed) or open"),
    // since the signal handler may close it asynchronously from outside any
    // Rust-visible scope. An `OwnedFd`'s `Drop` would double-close in that case.
    let raw_fd = tty::configure_serial(&handle.control_tty)
        .map_err(UdialError::Modem)?
        .into_raw_fd();
    signal::install_safe_cleanup();
    signal::set_control_fd(raw_fd);

    let mut session = Session::new(
        app_mode,
        cli.network_name.clone(),
        SerialChannel::new(raw_fd),
        &mut store,
        filter,
        cli.pin.clone(),
    );
    session.profile = bound_profile;

    let result = run_session(&mut session, cli, &handle);

    if let Err(ref e) = result {
        session.record_failure(e);
    }
    // `-1` if the signal handler already closed it; closing twice on a fd
    // number the kernel hasn't yet reused is harmless.
    if signal::set_control_fd(-1) >= 0 {
        let _ = nix::unistd::close(raw_fd);
    }
    result
}

#[allow(clippy::too_many_lines)]
fn run_session(
    session: &mut Session<'_, SerialChannel, FileConfigStore>,
    cli: &Cli,
    handle: &ModemHandle,
) -> UdialResult<()> {
    session.reset_modem()?;
    session.identify()?;
    session.record_discovery_identity(handle);
    let sim_state = session.check_sim()?;

    match sim_state {
        SimState::Ready => {}
        SimState::WantsPin => match session.app_mode {
            AppMode::UnlockPin | AppMode::Connect => session.enter_pin()?,
            AppMode::Scan | AppMode::Probe => {
                warn!("SIM wants PIN; not unlocking in this mode");
            }
            _ => {}
        },
        SimState::WantsPuk => {
            if session.app_mode == AppMode::UnlockPuk {
                let values = cli
                    .unlock_puk
                    .as_ref()
                    .ok_or_else(|| UdialError::InvalidArg("--unlock-puk requires <puk> <pin>".into()))?;
                session.enter_puk(&values[0], &values[1])?;
            } else {
                return Err(UdialError::Sim("SIM requires PUK, not PIN".to_string()));
            }
        }
        SimState::Error => return Err(UdialError::Sim("SIM is in an error state".to_string())),
    }

    if matches!(session.app_mode, AppMode::UnlockPin | AppMode::UnlockPuk) {
        info!("unlock complete");
        return Ok(());
    }
    if session.app_mode == AppMode::Scan {
        info!("scan complete");
        return Ok(());
    }

    if session.app_mode == AppMode::Probe {
        if let Err(e) = session.check_capabilities() {
            warn!("capability probe failed (non-fatal in probe mode): {e}");
        } else {
            info!(gsm = session.is_gsm, "capability probe complete");
        }
        return Ok(());
    }

    session.record_state("init");
    session.check_capabilities()?;
    session.set_mode()?;

    let link_daemon = link::resolve_link_daemon_path(cli.link_daemon.as_deref());
    let self_exe = std::env::current_exe()
        .map_err(|e| UdialError::Internal(format!("resolving self exe: {e}")))?
        .to_string_lossy()
        .into_owned();
    let config_path = link::write_link_config(
        &*session.store,
        &cli.network_name,
        &handle.data_tty,
        &self_exe,
    )
    .map_err(UdialError::Dial)?;

    session.record_state("dial");
    let child = LinkChild::spawn(&link_daemon, &config_path).map_err(UdialError::Dial)?;
    info!(pid = child.pid(), "link daemon launched");
    session.record_link_pid(child.pid());
    signal::install_catch_handler();

    let supervise_result = session.supervise();
    let terminate_result = session.terminate(Some(child));
    link::cleanup_config(&config_path);

    let outcome = terminate_result?;
    supervise_result?;

    if let Some(outcome) = outcome {
        return Err(classify_to_error(outcome));
    }
    Ok(())
}

fn classify_to_error(outcome: link::LinkOutcome) -> UdialError {
    match outcome {
        link::LinkOutcome::Modem => UdialError::Modem("link daemon reported a modem error".into()),
        link::LinkOutcome::Dial => UdialError::Dial("link daemon failed to dial".into()),
        link::LinkOutcome::Network => UdialError::Network("link daemon reported a network failure".into()),
        link::LinkOutcome::Auth => UdialError::Auth("link daemon reported a PPP auth failure".into()),
        link::LinkOutcome::Signaled => UdialError::Signaled,
        link::LinkOutcome::Ppp => UdialError::Ppp("link daemon reported a PPP failure".into()),
    }
}

/// `-t`: refuse to connect without touching the TTY if the last run left a
/// suppressed PIN or a non-ready SIM state.
fn refuse_if_prior_failure(store: &dyn ConfigStore, network_name: &str) -> UdialResult<()> {
    let failed_pin = store.get("udiald", network_name, "failed_pin");
    if failed_pin.as_deref().is_some_and(|p| !p.is_empty()) {
        return Err(UdialError::Unlock(
            "refusing connect: prior run left a failed_pin".to_string(),
        ));
    }
    if let Some(state) = store.get("udiald", network_name, "sim_state") {
        if state != "ready" {
            return Err(UdialError::Unlock(format!(
                "refusing connect: prior sim_state was {state:?}"
            )));
        }
    }
    Ok(())
}

/// `--dial`: re-entry point invoked by the link daemon's `connect` script.
/// The data TTY is already duped onto stdin/stdout by the link daemon.
fn run_dial() -> UdialResult<()> {
    let mut channel = SerialChannel::new(0);
    session::dial_over_inherited_channel(&mut channel, session::DEFAULT_DIAL_COMMAND, DIAL_TIMEOUT)
}

fn print_device_listing(format: ListFormat) {
    let devices = discovery::list_devices();
    match format {
        ListFormat::Human => {
            for d in &devices {
                println!(
                    "{}  vendor={:04x} device={:04x} driver={} endpoints={}",
                    d.device_id,
                    d.vendor,
                    d.device,
                    if d.driver.is_empty() { "?" } else { &d.driver },
                    d.endpoints.join(",")
                );
            }
        }
        ListFormat::Json => {
            let body = devices
                .iter()
                .map(|d| {
                    format!(
                        "{{\"device_id\":\"{}\",\"vendor\":{},\"device\":{},\"driver\":\"{}\",\"endpoints\":[{}]}}",
                        json_escape(&d.device_id),
                        d.vendor,
                        d.device,
                        json_escape(&d.driver),
                        d.endpoints
                            .iter()
                            .map(|e| format!("\"{}\"", json_escape(e)))
                            .collect::<Vec<_>>()
                            .join(",")
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            println!("[{body}]");
        }
    }
}

fn print_profile_listing(registry: &ProfileRegistry, format: ListFormat) {
    match format {
        ListFormat::Human => {
            for p in registry.iter() {
                println!(
                    "{}  vendor={} device={} driver={} modes={}",
                    p.name,
                    p.vendor.map_or("*".to_string(), |v| format!("{v:04x}")),
                    p.device.map_or("*".to_string(), |d| format!("{d:04x}")),
                    p.driver.as_deref().unwrap_or("*"),
                    p.modes.keys().map(|m| m.name()).collect::<Vec<_>>().join(",")
                );
            }
        }
        ListFormat::Json => {
            let body = registry
                .iter()
                .map(|p| {
                    format!(
                        "{{\"name\":\"{}\",\"modes\":[{}]}}",
                        json_escape(&p.name),
                        p.modes
                            .keys()
                            .map(|m| format!("\"{}\"", m.name()))
                            .collect::<Vec<_>>()
                            .join(",")
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            println!("[{body}]");
        }
    }
}

fn json_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
