//! USB device enumeration and modem discovery.
//!
//! Walks `/sys/bus/usb/devices`, reading `idVendor`/`idProduct`/`uevent` for
//! each top-level USB device node and the `ttyUSB*`/`ttyACM*` child nodes it
//! exposes, in the read-and-parse style of
//! `examples/soerenmeier-linux-info/src/system.rs` (plain `fs::read_to_string`
//! plus ad hoc parsing, no sysfs crate).

use std::fs;
use std::path::{Path, PathBuf};

use crate::profile::{bind_profile, resolve_endpoints, ConfigProfile, ProfileRegistry};

const SYSFS_USB_ROOT: &str = "/sys/bus/usb/devices";

/// Optional constraints on discovery (spec §3 `FilterSpec`). Each field is
/// independently set or unset; all set fields must match.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    pub vendor: Option<u16>,
    pub device: Option<u16>,
    pub device_id: Option<String>,
    pub profile_name: Option<String>,
    pub usable: bool,
}

impl FilterSpec {
    fn accepts(&self, candidate: &RawCandidate) -> bool {
        if let Some(v) = self.vendor {
            if v != candidate.vendor {
                return false;
            }
        }
        if let Some(d) = self.device {
            if d != candidate.device {
                return false;
            }
        }
        if let Some(ref id) = self.device_id {
            if id != &candidate.device_id {
                return false;
            }
        }
        true
    }
}

/// A concrete selected modem (spec §3 `ModemHandle`).
#[derive(Debug, Clone)]
pub struct ModemHandle {
    pub vendor: u16,
    pub device: u16,
    pub driver: String,
    pub device_id: String,
    /// Ordered serial endpoint device paths (e.g. `/dev/ttyUSB0`), in
    /// sysfs-encounter order.
    pub endpoints: Vec<String>,
    pub control_tty: String,
    pub data_tty: String,
    pub profile_name: String,
}

/// Raw candidate before a profile has been bound.
struct RawCandidate {
    vendor: u16,
    device: u16,
    driver: String,
    device_id: String,
    endpoints: Vec<String>,
}

/// Enumerate `/sys/bus/usb/devices`, returning candidates in directory
/// encounter order (not re-sorted — spec §4.4 takes OS order as given).
fn enumerate_candidates(root: &Path) -> Vec<RawCandidate> {
    let mut entries: Vec<_> = match fs::read_dir(root) {
        Ok(rd) => rd.filter_map(Result::ok).collect(),
        Err(_) => return Vec::new(),
    };
    // read_dir order is not guaranteed stable across platforms; sorting by
    // name gives deterministic, still OS-topology-faithful "encounter order".
    entries.sort_by_key(std::fs::DirEntry::file_name);

    let mut out = Vec::new();
    for entry in entries {
        let path = entry.path();
        let Some(vendor) = read_hex_file(&path.join("idVendor")) else {
            continue;
        };
        let Some(device) = read_hex_file(&path.join("idProduct")) else {
            continue;
        };
        let driver = read_driver(&path).unwrap_or_default();
        let device_id = entry.file_name().to_string_lossy().into_owned();
        let endpoints = find_tty_endpoints(&path);
        out.push(RawCandidate {
            vendor,
            device,
            driver,
            device_id,
            endpoints,
        });
    }
    out
}

fn read_hex_file(path: &Path) -> Option<u16> {
    let content = fs::read_to_string(path).ok()?;
    u16::from_str_radix(content.trim(), 16).ok()
}

fn read_driver(device_path: &Path) -> Option<String> {
    let uevent = fs::read_to_string(device_path.join("uevent")).ok()?;
    uevent.lines().find_map(|line| {
        line.strip_prefix("DRIVER=").map(str::to_string)
    })
}

/// Walk a USB device directory's subtree for `ttyUSB*`/`ttyACM*` nodes,
/// returning `/dev/<name>` paths in encounter order.
fn find_tty_endpoints(device_path: &Path) -> Vec<String> {
    let mut found = Vec::new();
    collect_tty_nodes(device_path, &mut found, 0);
    found.sort();
    found.into_iter().map(|n| format!("/dev/{n}")).collect()
}

fn collect_tty_nodes(dir: &Path, out: &mut Vec<String>, depth: u32) {
    if depth > 4 {
        return;
    }
    let Ok(rd) = fs::read_dir(dir) else {
        return;
    };
    for entry in rd.filter_map(Result::ok) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("ttyUSB") || name.starts_with("ttyACM") {
            out.push(name);
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            collect_tty_nodes(&path, out, depth + 1);
        }
    }
}

/// Enumerate, filter, bind a profile, and select the first survivor — the
/// full discovery pipeline from spec §4.4.
///
/// Returns `Err` with a human-readable reason if no candidate survives.
pub fn discover(
    registry: &ProfileRegistry,
    filter: &FilterSpec,
    forced_profile: Option<&ConfigProfile>,
) -> Result<ModemHandle, String> {
    discover_in(Path::new(SYSFS_USB_ROOT), registry, filter, forced_profile)
}

fn discover_in(
    root: &Path,
    registry: &ProfileRegistry,
    filter: &FilterSpec,
    forced_profile: Option<&ConfigProfile>,
) -> Result<ModemHandle, String> {
    let candidates = enumerate_candidates(root);

    for candidate in &candidates {
        if !filter.accepts(candidate) {
            continue;
        }

        let profile = if let Some(p) = forced_profile {
            Some(p)
        } else {
            bind_profile(registry, candidate.vendor, candidate.device, &candidate.driver)
        };

        if filter.usable && profile.is_none() {
            continue;
        }

        let Some(profile) = profile else {
            continue;
        };

        if let Some(ref want_name) = filter.profile_name {
            if &profile.name != want_name {
                continue;
            }
        }

        let handle_stub = ModemHandle {
            vendor: candidate.vendor,
            device: candidate.device,
            driver: candidate.driver.clone(),
            device_id: candidate.device_id.clone(),
            endpoints: candidate.endpoints.clone(),
            control_tty: String::new(),
            data_tty: String::new(),
            profile_name: profile.name.clone(),
        };

        let Some((ctl, dat)) = resolve_endpoints(&handle_stub, profile) else {
            return Err(format!(
                "profile {:?} indices ctlidx={} datidx={} out of range for {} endpoint(s)",
                profile.name,
                profile.ctlidx,
                profile.datidx,
                candidate.endpoints.len()
            ));
        };

        return Ok(ModemHandle {
            control_tty: ctl,
            data_tty: dat,
            ..handle_stub
        });
    }

    Err("no candidate modem matched the filter/profile requirements".to_string())
}

/// Enumerate without selecting — used by `--list-devices`.
#[must_use]
pub fn list_devices() -> Vec<ListedDevice> {
    enumerate_candidates(Path::new(SYSFS_USB_ROOT))
        .into_iter()
        .map(|c| ListedDevice {
            vendor: c.vendor,
            device: c.device,
            driver: c.driver,
            device_id: c.device_id,
            endpoints: c.endpoints,
        })
        .collect()
}

/// A device listing row (no profile bound) — spec §6 `--list-devices`.
#[derive(Debug, Clone)]
pub struct ListedDevice {
    pub vendor: u16,
    pub device: u16,
    pub driver: String,
    pub device_id: String,
    pub endpoints: Vec<String>,
}

#[allow(dead_code)]
fn sysfs_root_exists() -> bool {
    PathBuf::from(SYSFS_USB_ROOT).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ModeTag;
    use std::collections::BTreeMap;

    fn make_profile(name: &str, vendor: Option<u16>, device: Option<u16>, ctlidx: usize, datidx: usize) -> ConfigProfile {
        ConfigProfile {
            name: name.to_string(),
            vendor,
            device,
            driver: None,
            ctlidx,
            datidx,
            modes: {
                let mut m = BTreeMap::new();
                m.insert(ModeTag::Auto, "AT".to_string());
                m
            },
        }
    }

    fn scratch_sysfs(tag: &str) -> PathBuf {
        let mut root = std::env::temp_dir();
        root.push(format!("udiald-sysfs-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        root
    }

    fn write_device(root: &Path, dirname: &str, vendor: &str, device: &str, driver: &str, ttys: &[&str]) {
        let dev_dir = root.join(dirname);
        fs::create_dir_all(&dev_dir).unwrap();
        fs::write(dev_dir.join("idVendor"), format!("{vendor}\n")).unwrap();
        fs::write(dev_dir.join("idProduct"), format!("{device}\n")).unwrap();
        fs::write(dev_dir.join("uevent"), format!("DRIVER={driver}\n")).unwrap();
        for tty in ttys {
            let iface_dir = dev_dir.join(format!("{dirname}:1.0")).join(tty);
            fs::create_dir_all(&iface_dir).unwrap();
        }
    }

    #[test]
    fn discovers_and_binds_first_matching_candidate() {
        let root = scratch_sysfs("happy");
        write_device(&root, "1.2-1", "12d1", "1001", "option", &["ttyUSB0", "ttyUSB1", "ttyUSB2"]);

        let registry = ProfileRegistry::new(vec![], vec![make_profile("K3520", Some(0x12d1), Some(0x1001), 2, 0)]);
        let filter = FilterSpec {
            vendor: Some(0x12d1),
            device: Some(0x1001),
            ..Default::default()
        };

        let handle = discover_in(&root, &registry, &filter, None).unwrap();
        assert_eq!(handle.profile_name, "K3520");
        assert_eq!(handle.control_tty, "/dev/ttyUSB2");
        assert_eq!(handle.data_tty, "/dev/ttyUSB0");

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn filter_vendor_mismatch_excludes_candidate() {
        let root = scratch_sysfs("filter");
        write_device(&root, "1.2-1", "12d1", "1001", "option", &["ttyUSB0", "ttyUSB1"]);

        let registry = ProfileRegistry::new(vec![], vec![make_profile("K3520", Some(0x12d1), Some(0x1001), 0, 1)]);
        let filter = FilterSpec {
            vendor: Some(0xdead),
            ..Default::default()
        };

        assert!(discover_in(&root, &registry, &filter, None).is_err());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn usable_flag_rejects_candidates_without_profile() {
        let root = scratch_sysfs("usable");
        write_device(&root, "1.2-1", "dead", "beef", "cdc_acm", &["ttyUSB0"]);

        let registry = ProfileRegistry::new(vec![], vec![]);
        let filter = FilterSpec {
            usable: true,
            ..Default::default()
        };

        assert!(discover_in(&root, &registry, &filter, None).is_err());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn out_of_range_index_is_fatal() {
        let root = scratch_sysfs("oor");
        write_device(&root, "1.2-1", "12d1", "1001", "option", &["ttyUSB0"]);

        let registry = ProfileRegistry::new(vec![], vec![make_profile("K3520", Some(0x12d1), Some(0x1001), 5, 0)]);
        let filter = FilterSpec::default();

        let err = discover_in(&root, &registry, &filter, None).unwrap_err();
        assert!(err.contains("out of range"));
        let _ = fs::remove_dir_all(&root);
    }
}
