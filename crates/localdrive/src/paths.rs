//! Mapping of client-supplied relative paths onto the serving root.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::DriveError;

/// Resolve a client path against `root` without touching the filesystem.
///
/// A leading slash is stripped and backslashes are treated as separators.
/// Any `..` component, absolute component or embedded NUL fails with
/// [`DriveError::PathEscape`], even when the result would land inside root.
pub fn resolve_path(root: &Path, relative: &str) -> Result<PathBuf, DriveError> {
    let normalized = relative.replace('\\', "/");
    let relative = normalized.trim_start_matches('/');

    if relative.is_empty() || relative == "." {
        return Ok(root.to_path_buf());
    }

    let mut result = root.to_path_buf();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(name) => {
                if name.to_string_lossy().contains('\0') {
                    warn!("Path component contains null byte: {:?}", name);
                    return Err(DriveError::PathEscape);
                }
                result.push(name);
            }
            Component::ParentDir => {
                warn!("Path traversal attempt rejected: {:?}", relative);
                return Err(DriveError::PathEscape);
            }
            Component::CurDir => continue,
            Component::RootDir | Component::Prefix(_) => {
                warn!("Absolute path component rejected: {:?}", relative);
                return Err(DriveError::PathEscape);
            }
        }
    }

    if !result.starts_with(root) {
        return Err(DriveError::PathEscape);
    }

    Ok(result)
}

/// Resolve a client path and, when it exists, confirm its canonical form
/// (symlinks followed) is still inside root. For a path that does not exist
/// yet the nearest existing ancestor is checked instead.
pub fn resolve_and_verify_path(root: &Path, relative: &str) -> Result<PathBuf, DriveError> {
    let built = resolve_path(root, relative)?;
    let canonical_root = root.canonicalize()?;

    let mut probe = built.as_path();
    loop {
        if probe.exists() {
            let canonical = probe.canonicalize()?;
            if !canonical.starts_with(&canonical_root) {
                warn!(
                    "Symlink escape: {:?} resolved to {:?} outside {:?}",
                    built, canonical, canonical_root
                );
                return Err(DriveError::PathEscape);
            }
            break;
        }
        match probe.parent() {
            Some(parent) if parent.starts_with(root) => probe = parent,
            _ => break,
        }
    }

    Ok(built)
}

/// Validate a single entry name (new folder, rename target, upload file).
///
/// The name is returned exactly as given; surrounding whitespace is kept.
pub fn validate_name(name: &str) -> Result<&str, DriveError> {
    if name.trim().is_empty() {
        return Err(DriveError::BadRequest("Name must not be empty".to_string()));
    }

    if name.contains(['/', '\\', '\0']) {
        warn!("Rejected entry name with separators: {:?}", name);
        return Err(DriveError::PathEscape);
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => {
            warn!("Rejected entry name: {:?}", name);
            Err(DriveError::PathEscape)
        }
    }
}

/// Path of `full_path` relative to root, always `/`-separated.
pub fn relative_path(root: &Path, full_path: &Path) -> String {
    let Ok(relative) = full_path.strip_prefix(root) else {
        return String::new();
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_string_lossy().to_string());
        }
    }

    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_path_normal() {
        let root = PathBuf::from("/srv/share");
        assert_eq!(
            resolve_path(&root, "movies/clip.mp4").unwrap(),
            root.join("movies").join("clip.mp4")
        );
    }

    #[test]
    fn test_resolve_path_empty_and_dot() {
        let root = PathBuf::from("/srv/share");
        assert_eq!(resolve_path(&root, "").unwrap(), root);
        assert_eq!(resolve_path(&root, ".").unwrap(), root);
        assert_eq!(resolve_path(&root, "/").unwrap(), root);
    }

    #[test]
    fn test_resolve_path_strips_leading_slash() {
        let root = PathBuf::from("/srv/share");
        let resolved = resolve_path(&root, "/etc/passwd").unwrap();
        assert_eq!(resolved, root.join("etc").join("passwd"));
        assert!(resolved.starts_with(&root));
    }

    #[test]
    fn test_resolve_path_rejects_parent_dir() {
        let root = PathBuf::from("/srv/share");
        for path in [
            "..",
            "../etc/passwd",
            "a/../b",
            "a/b/../../..",
            "..\\windows",
            "a\\..\\..\\b",
        ] {
            assert!(
                matches!(resolve_path(&root, path), Err(DriveError::PathEscape)),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_path_rejects_null_bytes() {
        let root = PathBuf::from("/srv/share");
        assert!(matches!(
            resolve_path(&root, "file\0.txt"),
            Err(DriveError::PathEscape)
        ));
    }

    #[test]
    fn test_resolved_paths_stay_under_root() {
        let root = PathBuf::from("/srv/share");
        for path in ["a", "a/b", "./a/./b", "a//b", "x.y/z..w", "...", "a/.hidden"] {
            let resolved = resolve_path(&root, path).unwrap();
            assert!(resolved.starts_with(&root), "{path} escaped");
        }
    }

    #[test]
    fn test_resolve_and_verify_with_real_fs() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/a.txt"), "a").unwrap();

        assert!(resolve_and_verify_path(&root, "sub/a.txt").is_ok());
        assert!(resolve_and_verify_path(&root, "sub/new/deeper.txt").is_ok());
        assert!(matches!(
            resolve_and_verify_path(&root, "../outside"),
            Err(DriveError::PathEscape)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_and_verify_detects_symlink_escape() {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        symlink(outside.path(), root.join("escape")).unwrap();

        assert!(matches!(
            resolve_and_verify_path(&root, "escape/secret.txt"),
            Err(DriveError::PathEscape)
        ));
        assert!(matches!(
            resolve_and_verify_path(&root, "escape/not-yet.txt"),
            Err(DriveError::PathEscape)
        ));
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(validate_name("  spaced  ").unwrap(), "  spaced  ");
        assert_eq!(validate_name(" notes.txt").unwrap(), " notes.txt");
        assert!(matches!(validate_name(""), Err(DriveError::BadRequest(_))));
        assert!(matches!(validate_name("   "), Err(DriveError::BadRequest(_))));
        assert!(matches!(validate_name(".."), Err(DriveError::PathEscape)));
        assert!(matches!(validate_name("."), Err(DriveError::PathEscape)));
        assert!(matches!(validate_name("a/b"), Err(DriveError::PathEscape)));
        assert!(matches!(validate_name("..\\b"), Err(DriveError::PathEscape)));
    }

    #[test]
    fn test_relative_path_uses_forward_slashes() {
        let root = PathBuf::from("/srv/share");
        let full = root.join("a").join("b").join("c.txt");
        assert_eq!(relative_path(&root, &full), "a/b/c.txt");
        assert_eq!(relative_path(&root, &root), "");
        assert_eq!(relative_path(&root, Path::new("/elsewhere")), "");
    }
}
