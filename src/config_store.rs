//! External hierarchical key/value configuration store.
//!
//! In production this is an OpenWrt-style UCI database addressed by
//! `(package, section, option)`; this crate never assumes a specific backend
//! and only talks to it through the [`ConfigStore`] trait. [`FileConfigStore`]
//! is the reference/test backend: one TOML file, one `[section]` table per
//! network name, string keys and values throughout (list-valued keys are
//! stored as TOML arrays of strings).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Narrow interface onto the external configuration store.
///
/// All reads/writes are scoped to a single `(package, section)` pair for the
/// lifetime of a session — `section` is always the network name.
pub trait ConfigStore {
    /// Read a single string option, or `None` if unset.
    fn get(&self, package: &str, section: &str, option: &str) -> Option<String>;

    /// Read a list-valued option (UCI `list` entries), or an empty vec if unset.
    fn get_list(&self, package: &str, section: &str, option: &str) -> Vec<String>;

    /// Write a single string option. Does not persist until [`ConfigStore::commit`].
    fn set(&mut self, package: &str, section: &str, option: &str, value: &str);

    /// Flush pending writes to the backing store.
    fn commit(&mut self, package: &str) -> std::io::Result<()>;
}

/// Default path for the reference TOML-backed store.
pub const DEFAULT_STORE_PATH: &str = "/etc/config/udiald.toml";

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
struct Section {
    #[serde(flatten)]
    scalars: BTreeMap<String, String>,
    #[serde(default)]
    lists: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
struct Document {
    #[serde(flatten)]
    sections: BTreeMap<String, Section>,
}

/// TOML-file-backed [`ConfigStore`] implementation.
pub struct FileConfigStore {
    path: PathBuf,
    doc: Document,
    dirty: bool,
}

impl FileConfigStore {
    /// Open (or lazily create) the store at `path`. Missing files are treated
    /// as an empty document — first `commit` creates the file.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let doc = match fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            doc,
            dirty: false,
        })
    }

    fn section(&self, section: &str) -> Option<&Section> {
        self.doc.sections.get(section)
    }

    fn section_mut(&mut self, section: &str) -> &mut Section {
        self.doc.sections.entry(section.to_string()).or_default()
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self, _package: &str, section: &str, option: &str) -> Option<String> {
        self.section(section)?.scalars.get(option).cloned()
    }

    fn get_list(&self, _package: &str, section: &str, option: &str) -> Vec<String> {
        self.section(section)
            .and_then(|s| s.lists.get(option))
            .cloned()
            .unwrap_or_default()
    }

    fn set(&mut self, _package: &str, section: &str, option: &str, value: &str) {
        self.section_mut(section)
            .scalars
            .insert(option.to_string(), value.to_string());
        self.dirty = true;
    }

    fn commit(&mut self, _package: &str) -> std::io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = toml::to_string_pretty(&self.doc)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, serialized)?;
        self.dirty = false;
        Ok(())
    }
}

/// In-memory [`ConfigStore`] used by session/state-machine tests so they
/// don't touch the filesystem.
#[derive(Default)]
pub struct MemConfigStore {
    sections: BTreeMap<String, BTreeMap<String, String>>,
    lists: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl MemConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, section: &str, option: &str, value: &str) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(option.to_string(), value.to_string());
    }
}

impl ConfigStore for MemConfigStore {
    fn get(&self, _package: &str, section: &str, option: &str) -> Option<String> {
        self.sections.get(section)?.get(option).cloned()
    }

    fn get_list(&self, _package: &str, section: &str, option: &str) -> Vec<String> {
        self.lists
            .get(section)
            .and_then(|s| s.get(option))
            .cloned()
            .unwrap_or_default()
    }

    fn set(&mut self, _package: &str, section: &str, option: &str, value: &str) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(option.to_string(), value.to_string());
    }

    fn commit(&mut self, _package: &str) -> std::io::Result<()> {
        Ok(())
    }
}

/// Resolve the store path from `--config-store`, else `UDIALD_CONFIG_STORE`,
/// else [`DEFAULT_STORE_PATH`] — process-bootstrap precedence per SPEC_FULL §10.2.
#[must_use]
pub fn resolve_store_path(cli_flag: Option<&str>) -> PathBuf {
    if let Some(p) = cli_flag {
        return PathBuf::from(p);
    }
    if let Ok(p) = std::env::var("UDIALD_CONFIG_STORE") {
        return PathBuf::from(p);
    }
    PathBuf::from(DEFAULT_STORE_PATH)
}

#[must_use]
pub fn default_store_exists() -> bool {
    Path::new(DEFAULT_STORE_PATH).exists()
}
