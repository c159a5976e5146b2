//! Denylist model: typed entries and the immutable per-run [`Denylist`].

#![allow(missing_docs)]

pub mod loader;

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::Serialize;

use crate::core::config::DenylistsConfig;
use crate::core::errors::Result;

pub use loader::{LoadedList, RejectedLine, load, parse_line};

/// Which of the three flat-line lists a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenylistKind {
    Hashes,
    Filenames,
    Packages,
}

impl DenylistKind {
    pub const ALL: [Self; 3] = [Self::Hashes, Self::Filenames, Self::Packages];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hashes => "hashes",
            Self::Filenames => "filenames",
            Self::Packages => "packages",
        }
    }

    /// Field separator for this list's lines.
    #[must_use]
    pub const fn separator(self) -> char {
        match self {
            Self::Packages => ':',
            Self::Hashes | Self::Filenames => ',',
        }
    }
}

impl fmt::Display for DenylistKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed denylist row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenylistEntry {
    /// Lowercase 64-character SHA-256 hex digest.
    Hash { digest_hex: String },
    FilenamePattern { pattern: String },
    Package { name: String, version: String },
}

impl DenylistEntry {
    #[must_use]
    pub const fn kind(&self) -> DenylistKind {
        match self {
            Self::Hash { .. } => DenylistKind::Hashes,
            Self::FilenamePattern { .. } => DenylistKind::Filenames,
            Self::Package { .. } => DenylistKind::Packages,
        }
    }
}

/// A denylisted package name pinned to one exact version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PackageRef {
    pub name: String,
    pub version: String,
}

/// The three immutable indicator sets, built once before scanning.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    hashes: HashSet<String>,
    filename_patterns: Vec<String>,
    packages: Vec<PackageRef>,
}

impl Denylist {
    /// Build from already-parsed entries. Duplicates collapse; ordering of
    /// patterns and packages is the sorted entry order, so results are stable.
    pub fn from_entries(entries: impl IntoIterator<Item = DenylistEntry>) -> Self {
        let sorted: BTreeSet<DenylistEntry> = entries.into_iter().collect();
        let mut denylist = Self::default();
        for entry in sorted {
            match entry {
                DenylistEntry::Hash { digest_hex } => {
                    denylist.hashes.insert(digest_hex.to_ascii_lowercase());
                }
                DenylistEntry::FilenamePattern { pattern } => {
                    denylist.filename_patterns.push(pattern);
                }
                DenylistEntry::Package { name, version } => {
                    denylist.packages.push(PackageRef { name, version });
                }
            }
        }
        denylist
    }

    /// Load all three lists. Any list that yields zero entries is fatal.
    pub fn load(config: &DenylistsConfig) -> Result<DenylistLoad> {
        let mut entries = Vec::new();
        let mut lists = Vec::with_capacity(DenylistKind::ALL.len());
        for kind in DenylistKind::ALL {
            let path = match kind {
                DenylistKind::Hashes => &config.hashes,
                DenylistKind::Filenames => &config.filenames,
                DenylistKind::Packages => &config.packages,
            };
            let loaded = load(path, kind)?;
            entries.extend(loaded.entries.iter().cloned());
            lists.push(loaded);
        }
        Ok(DenylistLoad {
            denylist: Self::from_entries(entries),
            lists,
        })
    }

    #[must_use]
    pub fn contains_hash(&self, digest_hex: &str) -> bool {
        self.hashes.contains(&digest_hex.to_ascii_lowercase())
    }

    #[must_use]
    pub fn filename_patterns(&self) -> &[String] {
        &self.filename_patterns
    }

    #[must_use]
    pub fn packages(&self) -> &[PackageRef] {
        &self.packages
    }

    /// Unique package names, in sorted order.
    #[must_use]
    pub fn package_names(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self.packages.iter().map(|p| p.name.as_str()).collect();
        names.into_iter().collect()
    }

    #[must_use]
    pub fn hash_count(&self) -> usize {
        self.hashes.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len() + self.filename_patterns.len() + self.packages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of loading all three lists: the merged denylist plus per-file
/// details for reporting rejected lines.
#[derive(Debug, Clone)]
pub struct DenylistLoad {
    pub denylist: Denylist,
    pub lists: Vec<LoadedList>,
}

impl DenylistLoad {
    pub fn rejected(&self) -> impl Iterator<Item = &RejectedLine> {
        self.lists.iter().flat_map(|list| list.rejected.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(c: char) -> DenylistEntry {
        DenylistEntry::Hash {
            digest_hex: c.to_string().repeat(64),
        }
    }

    #[test]
    fn from_entries_splits_by_kind_and_dedupes() {
        let denylist = Denylist::from_entries([
            hash('a'),
            hash('a'),
            DenylistEntry::FilenamePattern {
                pattern: "bundle.js".to_string(),
            },
            DenylistEntry::Package {
                name: "left-pad".to_string(),
                version: "1.3.0".to_string(),
            },
            DenylistEntry::Package {
                name: "left-pad".to_string(),
                version: "1.2.0".to_string(),
            },
        ]);
        assert_eq!(denylist.hash_count(), 1);
        assert_eq!(denylist.filename_patterns(), ["bundle.js"]);
        assert_eq!(denylist.packages().len(), 2);
        assert_eq!(denylist.package_names(), vec!["left-pad"]);
        assert_eq!(denylist.len(), 4);
    }

    #[test]
    fn hash_lookup_is_case_insensitive() {
        let denylist = Denylist::from_entries([hash('a')]);
        assert!(denylist.contains_hash(&"A".repeat(64)));
        assert!(!denylist.contains_hash(&"b".repeat(64)));
    }

    #[test]
    fn kind_separators() {
        assert_eq!(DenylistKind::Packages.separator(), ':');
        assert_eq!(DenylistKind::Hashes.separator(), ',');
        assert_eq!(DenylistKind::Filenames.separator(), ',');
        assert_eq!(hash('f').kind(), DenylistKind::Hashes);
    }
}
