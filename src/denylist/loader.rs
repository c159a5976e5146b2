//! Flat-line denylist parsing.
//!
//! Each list is a UTF-8 `.txt` file with one entry per line. `#` comments
//! and blank lines are ignored. Malformed lines are collected and reported
//! rather than failing the load, but a file that yields nothing is fatal.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{DenylistEntry, DenylistKind};
use crate::core::errors::{Result, ShsError};

const SHA256_HEX_LEN: usize = 64;

/// A line that was skipped because it did not parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedLine {
    pub path: PathBuf,
    pub kind: DenylistKind,
    pub line_number: usize,
    pub reason: String,
}

/// Entries parsed from one list file.
#[derive(Debug, Clone)]
pub struct LoadedList {
    pub path: PathBuf,
    pub kind: DenylistKind,
    pub entries: BTreeSet<DenylistEntry>,
    pub rejected: Vec<RejectedLine>,
}

/// Load a single list file.
///
/// Fails with `DenylistFormat` for anything but a `.txt` file, `Io` when the
/// file cannot be read, and `DenylistEmpty` when no line parsed.
pub fn load(path: &Path, kind: DenylistKind) -> Result<LoadedList> {
    let is_text = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));
    if !is_text {
        return Err(ShsError::DenylistFormat {
            path: path.to_path_buf(),
            details: "only flat-line .txt lists are supported".to_string(),
        });
    }

    let raw = fs::read_to_string(path).map_err(|source| ShsError::io(path, source))?;
    let mut entries = BTreeSet::new();
    let mut rejected = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        match parse_line(kind, line) {
            Ok(Some(entry)) => {
                entries.insert(entry);
            }
            Ok(None) => {}
            Err(reason) => rejected.push(RejectedLine {
                path: path.to_path_buf(),
                kind,
                line_number: idx + 1,
                reason,
            }),
        }
    }

    if entries.is_empty() {
        return Err(ShsError::DenylistEmpty {
            path: path.to_path_buf(),
            kind: kind.as_str(),
        });
    }

    Ok(LoadedList {
        path: path.to_path_buf(),
        kind,
        entries,
        rejected,
    })
}

/// Parse one line. `Ok(None)` for comments and blanks, `Err(reason)` for a
/// malformed line.
pub fn parse_line(kind: DenylistKind, line: &str) -> std::result::Result<Option<DenylistEntry>, String> {
    let trimmed = line.trim().trim_start_matches('\u{feff}');
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = trimmed.split(kind.separator()).map(str::trim).collect();
    match kind {
        DenylistKind::Hashes => {
            let digest = fields[0];
            if digest.len() != SHA256_HEX_LEN || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(format!(
                    "expected a {SHA256_HEX_LEN}-character hex digest, got {digest:?}"
                ));
            }
            Ok(Some(DenylistEntry::Hash {
                digest_hex: digest.to_ascii_lowercase(),
            }))
        }
        DenylistKind::Filenames => {
            let [pattern, _description, ..] = fields.as_slice() else {
                return Err("expected `pattern,description`".to_string());
            };
            if pattern.is_empty() {
                return Err("empty filename pattern".to_string());
            }
            Ok(Some(DenylistEntry::FilenamePattern {
                pattern: (*pattern).to_string(),
            }))
        }
        DenylistKind::Packages => {
            let [name, version, ..] = fields.as_slice() else {
                return Err("expected `name:version`".to_string());
            };
            if name.is_empty() || version.is_empty() {
                return Err("package name and version must be non-empty".to_string());
            }
            Ok(Some(DenylistEntry::Package {
                name: (*name).to_string(),
                version: (*version).to_string(),
            }))
        }
    }
}
