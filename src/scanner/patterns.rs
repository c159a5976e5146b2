//! Glob-style filename patterns compiled to anchored regexes.
//!
//! `*` matches within a path component, `**/` matches zero or more leading
//! components, `?` matches one non-separator character. Everything else is
//! literal. Matching is case-insensitive.

#![allow(missing_docs)]

use std::path::Path;

use regex::Regex;

use crate::core::errors::{Result, ShsError};

/// What a pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternScope {
    /// Only the file's basename.
    Basename,
    /// The repository-relative path with `/` separators.
    RelativePath,
}

#[derive(Debug, Clone)]
pub struct FilenamePattern {
    raw: String,
    regex: Regex,
    scope: PatternScope,
}

impl FilenamePattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let normalized = pattern.replace('\\', "/");
        let scope = if normalized.contains('/') {
            PatternScope::RelativePath
        } else {
            PatternScope::Basename
        };
        let body = glob_to_regex_body(normalized.trim_start_matches('/'));
        let regex = Regex::new(&format!("(?i)^{body}$")).map_err(|err| {
            ShsError::InvalidConfig {
                details: format!("invalid filename pattern {pattern:?}: {err}"),
            }
        })?;
        Ok(Self {
            raw: pattern.to_string(),
            regex,
            scope,
        })
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub const fn scope(&self) -> PatternScope {
        self.scope
    }

    /// Test a file given its basename and repository-relative slash path.
    #[must_use]
    pub fn is_match(&self, basename: &str, relative_path: &str) -> bool {
        match self.scope {
            PatternScope::Basename => self.regex.is_match(basename),
            PatternScope::RelativePath => self.regex.is_match(relative_path),
        }
    }
}

/// All filename patterns for a run, compiled once.
#[derive(Debug, Clone, Default)]
pub struct FilenamePatternSet {
    patterns: Vec<FilenamePattern>,
}

impl FilenamePatternSet {
    /// Compile every pattern; ones that fail are returned alongside the set.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> (Self, Vec<ShsError>) {
        let mut compiled = Vec::with_capacity(patterns.len());
        let mut errors = Vec::new();
        for pattern in patterns {
            match FilenamePattern::compile(pattern.as_ref()) {
                Ok(p) => compiled.push(p),
                Err(err) => errors.push(err),
            }
        }
        (Self { patterns: compiled }, errors)
    }

    /// Patterns matching `path` (relative to `repo_root`).
    pub fn matches<'a>(
        &'a self,
        repo_root: &Path,
        path: &Path,
    ) -> impl Iterator<Item = &'a FilenamePattern> + 'a {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative = crate::core::paths::relative_slash_path(repo_root, path);
        self.patterns
            .iter()
            .filter(move |p| p.is_match(&basename, &relative))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn glob_to_regex_body(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            c => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
                i += 1;
            }
        }
    }
    out
}
