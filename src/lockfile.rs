use crate::error::Result;
use crate::fsutil::{Fs, INSTALL_ORIGIN};
use crate::git::RefType;
use crate::package::{self, Package};
use crate::progress::Stage;
use crate::resolver::RangeSet;
use anyhow::Context;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// One resolved package and every directory it was installed into.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LockEntry {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<RefType>,
    #[serde(default, rename = "as", skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, rename = "location")]
    pub locations: Vec<String>,
}

/// Lock entries from the previous session, keyed by `(name, version)`.
/// Read-only once loaded.
#[derive(Debug, Default, Clone)]
pub struct LockStore {
    entries: HashMap<(String, String), LockEntry>,
}

impl LockStore {
    pub fn from_entries(entries: impl IntoIterator<Item = LockEntry>) -> Self {
        let mut map: HashMap<(String, String), LockEntry> = HashMap::new();
        for entry in entries {
            let key = (entry.name.clone(), entry.version.clone());
            match map.get_mut(&key) {
                Some(existing) => {
                    for loc in entry.locations {
                        if !existing.locations.contains(&loc) {
                            existing.locations.push(loc);
                        }
                    }
                }
                None => {
                    map.insert(key, entry);
                }
            }
        }
        Self { entries: map }
    }

    /// A missing lock file is an empty store; an unreadable one is reported
    /// and treated as empty so the session re-resolves from scratch.
    pub fn load(fs: &dyn Fs, path: &Path) -> Self {
        if !fs.exists(path).is_file {
            return Self::default();
        }
        match read(fs, path) {
            Ok(entries) => Self::from_entries(entries),
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable lock file: {e:#}");
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str, version: &str) -> Option<&LockEntry> {
        self.entries.get(&(name.to_string(), version.to_string()))
    }

    pub fn find_by_alias(&self, alias: &str) -> Option<&LockEntry> {
        self.entries.values().find(|e| e.aliases.iter().any(|a| a == alias))
    }

    /// Highest locked registry version of `name` satisfying `range`.
    pub fn best_match(&self, name: &str, range: &str) -> Option<(&LockEntry, Version)> {
        let set = RangeSet::parse(range).ok()?;
        self.entries
            .values()
            .filter(|e| e.name == name && e.git.is_none())
            .filter_map(|e| Version::parse(e.version.trim_start_matches('v')).ok().map(|v| (e, v)))
            .filter(|(_, v)| set.matches(v))
            .max_by(|a, b| a.1.cmp(&b.1))
    }

    /// Entries sorted by name then version.
    pub fn entries(&self) -> Vec<&LockEntry> {
        let mut out: Vec<&LockEntry> = self.entries.values().collect();
        out.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        out
    }
}

/// One entry per distinct installed `(name, version)` in the forest.
///
/// Packages that failed or never reached a location are left out.
pub fn collect_entries(roots: &[Arc<Package>]) -> Vec<LockEntry> {
    let mut merged: BTreeMap<(String, String), LockEntry> = BTreeMap::new();
    package::walk(roots, &mut |pkg| {
        let Some(version) = pkg.version_string() else { return };
        let locations = pkg.locations();
        if pkg.stage() != Stage::Done || locations.is_empty() {
            return;
        }
        let entry = merged.entry((pkg.name(), version.clone())).or_insert_with(|| LockEntry {
            name: pkg.name(),
            version,
            git: pkg.git_ref_type(),
            aliases: Vec::new(),
            locations: Vec::new(),
        });
        for loc in locations {
            if !entry.locations.contains(&loc) {
                entry.locations.push(loc);
            }
        }
        for alias in pkg.aliases() {
            if !entry.aliases.contains(&alias) {
                entry.aliases.push(alias);
            }
        }
    });
    merged.into_values().collect()
}

/// Overwrite the lock file with the entries of the final forest.
pub fn persist(fs: &dyn Fs, path: &Path, roots: &[Arc<Package>]) -> Result<Vec<LockEntry>> {
    let entries = collect_entries(roots);
    write(fs, &entries, path)?;
    Ok(entries)
}

pub fn read(fs: &dyn Fs, path: &Path) -> Result<Vec<LockEntry>> {
    let data = fs.read_file(path)?;
    let entries: Vec<LockEntry> =
        serde_json::from_slice(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(entries)
}

pub fn write(fs: &dyn Fs, entries: &[LockEntry], path: &Path) -> Result<()> {
    let data = serde_json::to_string_pretty(entries)?;
    if let Some(parent) = path.parent() {
        fs.mkdir(parent, Some(INSTALL_ORIGIN))?;
    }
    fs.write_file(path, data.as_bytes(), Some(INSTALL_ORIGIN))?;
    Ok(())
}
