//! Directory enumeration for the browse view.

use std::cmp::Ordering;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::Config;
use crate::error::DriveError;
use crate::paths::relative_path;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// One row of a directory listing.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Relative to the serving root, `/`-separated.
    pub path: String,
}

/// List `dir`, creating it first if it does not exist yet.
///
/// Entries come back in the order the filesystem yields them; use
/// [`sort_entries`] for a stable presentation order.
pub fn list_directory(
    config: &Config,
    root: &Path,
    dir: &Path,
) -> Result<Vec<DirectoryEntry>, DriveError> {
    if !dir.exists() {
        debug!("Creating directory on first visit: {}", dir.display());
        std::fs::create_dir_all(dir)?;
    }

    if !dir.is_dir() {
        return Err(DriveError::BadRequest(format!(
            "Not a directory: {}",
            relative_path(root, dir)
        )));
    }

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();

        if config.is_hidden(&name) {
            continue;
        }

        let entry_path = entry.path();
        let kind = if entry_path.is_dir() {
            EntryKind::Folder
        } else {
            EntryKind::File
        };

        entries.push(DirectoryEntry {
            path: relative_path(root, &entry_path),
            name,
            kind,
        });
    }

    Ok(entries)
}

/// Folders first, then case-insensitive by name.
pub fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| match (a.kind, b.kind) {
        (EntryKind::Folder, EntryKind::File) => Ordering::Less,
        (EntryKind::File, EntryKind::Folder) => Ordering::Greater,
        _ => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name)),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(entries: &[DirectoryEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_list_filters_hidden_and_server_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("notes.txt"), "n").unwrap();
        fs::write(root.join(".secret"), "s").unwrap();
        fs::write(root.join("launcher.py"), "p").unwrap();
        fs::create_dir(root.join("__pycache__")).unwrap();
        fs::create_dir(root.join("static")).unwrap();
        fs::create_dir(root.join("photos")).unwrap();

        let mut entries = list_directory(&Config::default(), root, root).unwrap();
        sort_entries(&mut entries);

        assert_eq!(names(&entries), vec!["photos", "notes.txt"]);
        assert_eq!(entries[0].kind, EntryKind::Folder);
        assert_eq!(entries[1].kind, EntryKind::File);
    }

    #[test]
    fn test_list_creates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let missing = root.join("new").join("nested");

        let entries = list_directory(&Config::default(), root, &missing).unwrap();

        assert!(entries.is_empty());
        assert!(missing.is_dir());
    }

    #[test]
    fn test_list_relative_paths() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("a").join("b")).unwrap();
        fs::write(root.join("a").join("b").join("c.txt"), "c").unwrap();

        let dir = root.join("a").join("b");
        let entries = list_directory(&Config::default(), root, &dir).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "a/b/c.txt");
    }

    #[test]
    fn test_list_rejects_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("plain.txt"), "x").unwrap();

        let result = list_directory(&Config::default(), root, &root.join("plain.txt"));
        assert!(matches!(result, Err(DriveError::BadRequest(_))));
    }

    #[test]
    fn test_sort_entries_folders_first_case_insensitive() {
        let entry = |name: &str, kind| DirectoryEntry {
            name: name.to_string(),
            kind,
            path: name.to_string(),
        };
        let mut entries = vec![
            entry("beta.txt", EntryKind::File),
            entry("Zeta", EntryKind::Folder),
            entry("Alpha.txt", EntryKind::File),
            entry("music", EntryKind::Folder),
        ];

        sort_entries(&mut entries);

        assert_eq!(
            names(&entries),
            vec!["music", "Zeta", "Alpha.txt", "beta.txt"]
        );
    }
}
