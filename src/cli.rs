//! Command-line argument parsing (spec §6).
//!
//! Mirrors the teacher's `main.rs` derive style (`Cli`/`Commands` via
//! `clap::Parser`), generalized from one `serve`/`supervise` subcommand pair
//! to a flat set of mutually-exclusive app-mode flags — this program picks
//! exactly one behavior per invocation rather than dispatching subcommands.

use clap::Parser;

use crate::discovery::FilterSpec;
use crate::session::AppMode;

/// Listing output format for `--list-devices`/`--list-profiles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    Human,
    Json,
}

/// udiald: modem control engine for UMTS/3G USB modems.
#[derive(Parser, Debug)]
#[command(name = "udiald", version, about)]
pub struct Cli {
    /// Connect (default): full identify → unlock → dial → supervise run.
    #[arg(short = 'c', long)]
    pub connect: bool,

    /// Identify + SIM-check, then exit.
    #[arg(short = 's', long)]
    pub scan: bool,

    /// Like --scan plus verbose capability probing.
    #[arg(long)]
    pub probe: bool,

    /// Scan + PIN unlock, then exit.
    #[arg(short = 'u', long = "unlock-pin")]
    pub unlock_pin: bool,

    /// Reset PIN via PUK: `--unlock-puk <puk> <pin>`.
    #[arg(short = 'U', long = "unlock-puk", num_args = 2, value_names = ["PUK", "PIN"])]
    pub unlock_puk: Option<Vec<String>>,

    /// Internal: re-entry point invoked by the link daemon's connect script.
    #[arg(short = 'd', long)]
    pub dial: bool,

    /// Enumerate USB candidates and emit a listing.
    #[arg(short = 'l', long = "list-devices")]
    pub list_devices: bool,

    /// Emit the profile registry.
    #[arg(short = 'L', long = "list-profiles")]
    pub list_profiles: bool,

    /// Network label; selects the config-store section. Default `wan`.
    #[arg(short = 'n', long = "network-name", default_value = "wan")]
    pub network_name: String,

    /// Raise the log level one step (repeatable).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Lower the log level one step (repeatable).
    #[arg(short = 'q', long, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Filter discovery by USB vendor id (hex, e.g. `12d1`).
    #[arg(short = 'V', long)]
    pub vendor: Option<String>,

    /// Filter discovery by USB product id (hex).
    #[arg(short = 'P', long)]
    pub product: Option<String>,

    /// Filter discovery by sysfs topology id (e.g. `1.2-1`).
    #[arg(short = 'D', long = "device-id")]
    pub device_id: Option<String>,

    /// Force a specific profile by name, skipping vendor/device matching.
    #[arg(short = 'p', long)]
    pub profile: Option<String>,

    /// Override the PIN read from the config store for this run.
    #[arg(long)]
    pub pin: Option<String>,

    /// Require discovery to find a candidate with a bound profile.
    #[arg(long)]
    pub usable: bool,

    /// Listing output format.
    #[arg(short = 'f', long, value_enum, default_value_t = FormatArg::Id)]
    pub format: FormatArg,

    /// Refuse to connect if the last run left a suppressed PIN or non-ready SIM.
    #[arg(short = 't')]
    pub refuse_on_prior_failure: bool,

    /// Path to the external link-daemon binary (overrides `UDIALD_LINK_DAEMON`).
    #[arg(long = "link-daemon")]
    pub link_daemon: Option<String>,

    /// Path to the config-store backing file (overrides `UDIALD_CONFIG_STORE`).
    #[arg(long = "config-store")]
    pub config_store: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FormatArg {
    Json,
    Id,
}

impl From<FormatArg> for ListFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Json => ListFormat::Json,
            FormatArg::Id => ListFormat::Human,
        }
    }
}

impl Cli {
    /// Resolve the single selected app mode from the mutually-exclusive
    /// flags. `--connect` is the default when nothing else is set.
    #[must_use]
    pub fn app_mode(&self) -> Result<AppMode, String> {
        let selected: Vec<(&str, bool)> = vec![
            ("--scan", self.scan),
            ("--probe", self.probe),
            ("--unlock-pin", self.unlock_pin),
            ("--unlock-puk", self.unlock_puk.is_some()),
            ("--dial", self.dial),
            ("--list-devices", self.list_devices),
            ("--list-profiles", self.list_profiles),
            ("--connect", self.connect),
        ];
        let chosen: Vec<&str> = selected.iter().filter(|(_, b)| *b).map(|(n, _)| *n).collect();

        match chosen.as_slice() {
            [] => Ok(AppMode::Connect),
            ["--connect"] => Ok(AppMode::Connect),
            ["--scan"] => Ok(AppMode::Scan),
            ["--probe"] => Ok(AppMode::Probe),
            ["--unlock-pin"] => Ok(AppMode::UnlockPin),
            ["--unlock-puk"] => Ok(AppMode::UnlockPuk),
            ["--dial"] => Ok(AppMode::Dial),
            ["--list-devices"] => Ok(AppMode::ListDevices),
            ["--list-profiles"] => Ok(AppMode::ListProfiles),
            _ => Err(format!(
                "mutually exclusive app-mode flags given together: {}",
                chosen.join(", ")
            )),
        }
    }

    /// Build a [`FilterSpec`] from the vendor/product/device-id/profile/usable flags.
    pub fn filter_spec(&self) -> Result<FilterSpec, String> {
        let vendor = self
            .vendor
            .as_deref()
            .map(parse_hex_u16)
            .transpose()?;
        let device = self
            .product
            .as_deref()
            .map(parse_hex_u16)
            .transpose()?;
        Ok(FilterSpec {
            vendor,
            device,
            device_id: self.device_id.clone(),
            profile_name: self.profile.clone(),
            usable: self.usable,
        })
    }

    /// Net verbosity delta: positive means more verbose, matching the
    /// teacher's `-v`/`-q` repeatable-count convention.
    #[must_use]
    pub fn verbosity_delta(&self) -> i8 {
        i8::try_from(self.verbose).unwrap_or(i8::MAX) - i8::try_from(self.quiet).unwrap_or(i8::MAX)
    }
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| format!("invalid hex value {s:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["udiald"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn defaults_to_connect_mode_with_no_flags() {
        let cli = parse(&[]);
        assert!(matches!(cli.app_mode(), Ok(AppMode::Connect)));
        assert_eq!(cli.network_name, "wan");
    }

    #[test]
    fn scan_flag_selects_scan_mode() {
        let cli = parse(&["--scan"]);
        assert!(matches!(cli.app_mode(), Ok(AppMode::Scan)));
    }

    #[test]
    fn unlock_puk_requires_two_values() {
        let cli = parse(&["--unlock-puk", "87654321", "1234"]);
        assert_eq!(
            cli.unlock_puk,
            Some(vec!["87654321".to_string(), "1234".to_string()])
        );
        assert!(matches!(cli.app_mode(), Ok(AppMode::UnlockPuk)));
    }

    #[test]
    fn conflicting_mode_flags_are_rejected() {
        let cli = parse(&["--scan", "--dial"]);
        assert!(cli.app_mode().is_err());
    }

    #[test]
    fn filter_spec_parses_hex_vendor_and_product() {
        let cli = parse(&["--vendor", "12d1", "--product", "0x1001"]);
        let filter = cli.filter_spec().unwrap();
        assert_eq!(filter.vendor, Some(0x12d1));
        assert_eq!(filter.device, Some(0x1001));
    }

    #[test]
    fn filter_spec_rejects_invalid_hex() {
        let cli = parse(&["--vendor", "not-hex"]);
        assert!(cli.filter_spec().is_err());
    }

    #[test]
    fn verbosity_delta_nets_verbose_and_quiet_counts() {
        let cli = parse(&["-v", "-v", "-q"]);
        assert_eq!(cli.verbosity_delta(), 1);
    }

    #[test]
    fn format_defaults_to_id_and_maps_to_human_listing() {
        let cli = parse(&[]);
        assert_eq!(cli.format, FormatArg::Id);
        assert_eq!(ListFormat::from(cli.format), ListFormat::Human);
    }
}
