//! Path helpers: normalization for repository identity, home expansion,
//! and repository-relative display paths.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Resolve a path to an absolute, normalized path.
///
/// Existing paths are canonicalized (symlinks resolved), so the same
/// repository reached through a bind mount or a symlinked root maps to a
/// single key. Paths that cannot be canonicalized are made absolute against
/// the CWD and normalized syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Expand a leading `~/` against `$HOME`. Other paths pass through.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

/// `path` relative to `root`, rendered with `/` separators.
///
/// Falls back to the full path when `path` is not under `root`.
pub fn relative_slash_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut out = String::with_capacity(relative.as_os_str().len());
    for component in relative.components() {
        match component {
            Component::RootDir => out.push('/'),
            Component::Prefix(prefix) => out.push_str(&prefix.as_os_str().to_string_lossy()),
            other => {
                if !out.is_empty() && !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_existing_path_canonically() {
        let cwd = env::current_dir().unwrap();
        let resolved = resolve_absolute_path(Path::new("."));
        assert_eq!(resolved, std::fs::canonicalize(&cwd).unwrap());
    }

    #[test]
    fn normalizes_nonexistent_path_syntactically() {
        let input = Path::new("/nonexistent_shs_root/foo/../bar");
        assert!(std::fs::canonicalize(input).is_err());
        assert_eq!(
            resolve_absolute_path(input),
            Path::new("/nonexistent_shs_root/bar")
        );
    }

    #[test]
    fn handles_parent_at_root() {
        assert_eq!(normalize_syntactic(Path::new("/../foo")), Path::new("/foo"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_roots_resolve_to_same_key() {
        let tmp = tempfile::TempDir::new().unwrap();
        let real = tmp.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        assert_eq!(resolve_absolute_path(&real), resolve_absolute_path(&link));
    }

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home(Path::new("/etc/shs")), Path::new("/etc/shs"));
        if let Some(home) = env::var_os("HOME") {
            assert_eq!(
                expand_home(Path::new("~/.config/shs")),
                PathBuf::from(home).join(".config/shs")
            );
        }
    }

    #[test]
    fn relative_slash_path_joins_components() {
        let root = Path::new("/repos/app");
        assert_eq!(
            relative_slash_path(root, Path::new("/repos/app/.github/workflows/ci.yml")),
            ".github/workflows/ci.yml"
        );
        assert_eq!(
            relative_slash_path(root, Path::new("/elsewhere/x.js")),
            "/elsewhere/x.js"
        );
    }
}
