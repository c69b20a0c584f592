//! Device/vendor/driver profile registry and matching.
//!
//! See spec §3 (`ConfigProfile`, `ProfileRegistry`) and §4.3 (matching rule).

use std::collections::BTreeMap;

use crate::config_store::ConfigStore;
use crate::discovery::ModemHandle;

/// Closed set of radio-selection directives. New values require a code
/// change, since every profile maps each tag to a literal AT command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModeTag {
    Auto,
    ForceUmts,
    ForceGprs,
    PreferUmts,
    PreferGprs,
}

impl ModeTag {
    const ALL: [ModeTag; 5] = [
        ModeTag::Auto,
        ModeTag::ForceUmts,
        ModeTag::ForceGprs,
        ModeTag::PreferUmts,
        ModeTag::PreferGprs,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ModeTag::Auto => "auto",
            ModeTag::ForceUmts => "force-umts",
            ModeTag::ForceGprs => "force-gprs",
            ModeTag::PreferUmts => "prefer-umts",
            ModeTag::PreferGprs => "prefer-gprs",
        }
    }

    /// Parse a config-file mode name. Unknown names yield `None` — the
    /// "invalid sentinel" from spec §8's round-trip property.
    #[must_use]
    pub fn parse(name: &str) -> Option<ModeTag> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}

/// A device/vendor/driver selector plus its per-mode AT command mapping.
#[derive(Debug, Clone)]
pub struct ConfigProfile {
    pub name: String,
    pub vendor: Option<u16>,
    pub device: Option<u16>,
    pub driver: Option<String>,
    /// Index into the modem's endpoint list for the control TTY.
    pub ctlidx: usize,
    /// Index into the modem's endpoint list for the data TTY.
    pub datidx: usize,
    /// Mode → AT command. A missing entry means the mode is unsupported.
    pub modes: BTreeMap<ModeTag, String>,
}

impl ConfigProfile {
    fn matches_selectors(&self, vendor: u16, device: u16, driver: &str) -> bool {
        if let Some(v) = self.vendor {
            if v != vendor {
                return false;
            }
        }
        if let Some(d) = self.device {
            if d != device {
                return false;
            }
        }
        if let Some(ref drv) = self.driver {
            if drv != driver {
                return false;
            }
        }
        true
    }
}

/// An ordered sequence of profiles; first-match wins (spec §4.3).
pub struct ProfileRegistry {
    /// User-supplied overrides, consulted first so they shadow built-ins.
    user: Vec<ConfigProfile>,
    /// Built-in table: specific (vendor+device) entries, then vendor-only,
    /// then driver-only, in that order.
    builtin: Vec<ConfigProfile>,
}

impl ProfileRegistry {
    /// Build the registry: built-in table plus any user profiles loaded from
    /// the config store.
    pub fn load(store: &dyn ConfigStore, network_name: &str) -> Self {
        Self {
            user: load_user_profiles(store, network_name),
            builtin: builtin_profiles(),
        }
    }

    /// Construct from explicit profile lists (used by tests).
    #[must_use]
    pub fn new(user: Vec<ConfigProfile>, builtin: Vec<ConfigProfile>) -> Self {
        Self { user, builtin }
    }

    /// Iterate user profiles then built-ins, in the order matching walks them.
    pub fn iter(&self) -> impl Iterator<Item = &ConfigProfile> {
        self.user.iter().chain(self.builtin.iter())
    }

    /// Find a profile by exact name (used by `--profile` force-selection and
    /// `--list-profiles`).
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&ConfigProfile> {
        self.iter().find(|p| p.name == name)
    }

    /// First profile (user list, then built-ins, in registration order) whose
    /// set selector fields all equal the candidate's.
    #[must_use]
    pub fn matching(&self, vendor: u16, device: u16, driver: &str) -> Option<&ConfigProfile> {
        self.iter()
            .find(|p| p.matches_selectors(vendor, device, driver))
    }
}

fn load_user_profiles(store: &dyn ConfigStore, network_name: &str) -> Vec<ConfigProfile> {
    // User profiles are stored as a list of "name:vendor:device:driver" under
    // `udiald_profile`; a missing field in a given slot is a wildcard.
    store
        .get_list("udiald", network_name, "udiald_profile")
        .iter()
        .filter_map(|entry| parse_user_profile(entry))
        .collect()
}

fn parse_user_profile(entry: &str) -> Option<ConfigProfile> {
    let mut parts = entry.splitn(4, ':');
    let name = parts.next()?.to_string();
    let vendor = parts.next().filter(|s| !s.is_empty()).and_then(|s| {
        u16::from_str_radix(s.trim_start_matches("0x"), 16).ok()
    });
    let device = parts.next().filter(|s| !s.is_empty()).and_then(|s| {
        u16::from_str_radix(s.trim_start_matches("0x"), 16).ok()
    });
    let driver = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    Some(ConfigProfile {
        name,
        vendor,
        device,
        driver,
        ctlidx: 0,
        datidx: 0,
        modes: BTreeMap::new(),
    })
}

/// Built-in ordered table: specific (vendor+device) first, then vendor-only,
/// then driver-only — so first-match naturally prefers specificity.
fn builtin_profiles() -> Vec<ConfigProfile> {
    use ModeTag::{Auto, ForceGprs, ForceUmts, PreferGprs, PreferUmts};

    fn modes(pairs: &[(ModeTag, &str)]) -> BTreeMap<ModeTag, String> {
        pairs.iter().map(|(k, v)| (*k, (*v).to_string())).collect()
    }

    vec![
        ConfigProfile {
            name: "Huawei K3520".to_string(),
            vendor: Some(0x12d1),
            device: Some(0x1001),
            driver: None,
            ctlidx: 2,
            datidx: 0,
            modes: modes(&[
                (Auto, "AT^SYSCFG=2,2,3FFFFFFF,2,4"),
                (ForceUmts, "AT^SYSCFG=14,2,3FFFFFFF,2,4"),
                (ForceGprs, "AT^SYSCFG=13,1,3FFFFFFF,2,4"),
                (PreferUmts, "AT^SYSCFG=2,2,3FFFFFFF,1,4"),
                (PreferGprs, "AT^SYSCFG=2,2,3FFFFFFF,2,4"),
            ]),
        },
        ConfigProfile {
            name: "Huawei K4605".to_string(),
            vendor: Some(0x12d1),
            device: Some(0x1506),
            driver: None,
            ctlidx: 2,
            datidx: 0,
            modes: modes(&[
                (Auto, "AT^SYSCFG=2,2,40000000,2,4"),
                (ForceUmts, "AT^SYSCFG=14,2,40000000,2,4"),
                (ForceGprs, "AT^SYSCFG=13,1,40000000,2,4"),
            ]),
        },
        ConfigProfile {
            name: "Huawei (generic)".to_string(),
            vendor: Some(0x12d1),
            device: None,
            driver: None,
            ctlidx: 1,
            datidx: 0,
            modes: modes(&[(Auto, "AT^SYSCFG=2,2,3FFFFFFF,2,4")]),
        },
        ConfigProfile {
            name: "Option GlobeTrotter".to_string(),
            vendor: Some(0x0af0),
            device: None,
            driver: None,
            ctlidx: 0,
            datidx: 1,
            modes: modes(&[(Auto, "AT_OPSYS=0,2"), (ForceUmts, "AT_OPSYS=2,2")]),
        },
        ConfigProfile {
            name: "option driver (generic)".to_string(),
            vendor: None,
            device: None,
            driver: Some("option".to_string()),
            ctlidx: 0,
            datidx: 1,
            modes: modes(&[(Auto, "")]),
        },
        ConfigProfile {
            name: "cdc_acm driver (generic)".to_string(),
            vendor: None,
            device: None,
            driver: Some("cdc_acm".to_string()),
            ctlidx: 0,
            datidx: 0,
            modes: modes(&[(Auto, "")]),
        },
    ]
}

/// Bind the first matching profile in `registry` to `handle`, applying
/// `ctlidx`/`datidx` to resolve the control/data TTY names.
///
/// Returns `None` if no profile matches.
#[must_use]
pub fn bind_profile<'a>(
    registry: &'a ProfileRegistry,
    vendor: u16,
    device: u16,
    driver: &str,
) -> Option<&'a ConfigProfile> {
    registry.matching(vendor, device, driver)
}

/// Resolve the two endpoint names named by a profile's indices against a
/// modem's endpoint list. Out-of-range indices are a fatal discovery error
/// (spec §4.4), reported as `None` here for the caller to turn into
/// `UdialError::NoModem`.
#[must_use]
pub fn resolve_endpoints(handle: &ModemHandle, profile: &ConfigProfile) -> Option<(String, String)> {
    let ctl = handle.endpoints.get(profile.ctlidx)?.clone();
    let dat = handle.endpoints.get(profile.datidx)?.clone();
    Some((ctl, dat))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str, vendor: Option<u16>, device: Option<u16>, driver: Option<&str>) -> ConfigProfile {
        ConfigProfile {
            name: name.to_string(),
            vendor,
            device,
            driver: driver.map(str::to_string),
            ctlidx: 0,
            datidx: 1,
            modes: BTreeMap::new(),
        }
    }

    #[test]
    fn mode_tag_round_trips() {
        for m in ModeTag::ALL {
            assert_eq!(ModeTag::parse(m.name()), Some(m));
        }
        assert_eq!(ModeTag::parse("not-a-mode"), None);
    }

    #[test]
    fn most_specific_profile_wins_when_order_lists_specific_first() {
        let builtin = vec![
            profile("specific", Some(1), Some(2), None),
            profile("vendor-only", Some(1), None, None),
            profile("driver-only", None, None, Some("option")),
        ];
        let registry = ProfileRegistry::new(vec![], builtin);
        let m = registry.matching(1, 2, "option").unwrap();
        assert_eq!(m.name, "specific");
    }

    #[test]
    fn falls_back_to_vendor_only_when_device_differs() {
        let builtin = vec![
            profile("specific", Some(1), Some(2), None),
            profile("vendor-only", Some(1), None, None),
        ];
        let registry = ProfileRegistry::new(vec![], builtin);
        let m = registry.matching(1, 99, "option").unwrap();
        assert_eq!(m.name, "vendor-only");
    }

    #[test]
    fn user_profiles_shadow_builtins() {
        let builtin = vec![profile("builtin", Some(1), Some(2), None)];
        let user = vec![profile("override", Some(1), Some(2), None)];
        let registry = ProfileRegistry::new(user, builtin);
        let m = registry.matching(1, 2, "anything").unwrap();
        assert_eq!(m.name, "override");
    }

    #[test]
    fn reordering_user_profiles_changes_selection_only_if_two_match() {
        let builtin = vec![];
        let a = profile("a", Some(1), None, None);
        let b = profile("b", Some(1), None, None);

        let registry1 = ProfileRegistry::new(vec![a.clone(), b.clone()], builtin.clone());
        let registry2 = ProfileRegistry::new(vec![b, a], builtin);
        assert_ne!(
            registry1.matching(1, 0, "x").unwrap().name,
            registry2.matching(1, 0, "x").unwrap().name
        );
    }

    #[test]
    fn reordering_with_only_one_match_is_unaffected() {
        let a = profile("a", Some(1), None, None);
        let c = profile("c", Some(2), None, None);

        let registry1 = ProfileRegistry::new(vec![a.clone(), c.clone()], vec![]);
        let registry2 = ProfileRegistry::new(vec![c, a], vec![]);
        assert_eq!(
            registry1.matching(1, 0, "x").unwrap().name,
            registry2.matching(1, 0, "x").unwrap().name
        );
    }

    #[test]
    fn no_match_returns_none() {
        let registry = ProfileRegistry::new(vec![], vec![profile("x", Some(1), None, None)]);
        assert!(registry.matching(2, 0, "y").is_none());
    }
}
