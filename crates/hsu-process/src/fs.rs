//! Filesystem collaborator.
//!
//! The execution engine never touches the filesystem directly for lookups;
//! it asks a [`FileSystem`]. Tests substitute their own implementation.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Synchronous filesystem queries needed before spawning.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// True when `path` is a regular file the current user may execute.
    fn is_executable(&self, path: &Path) -> bool;

    /// Resolve a bare program name against a `PATH`-style search path.
    ///
    /// Empty entries are skipped rather than treated as the current
    /// directory. The first executable candidate wins.
    fn resolve_on_search_path(&self, name: &str, search_path: &OsStr) -> Option<PathBuf> {
        std::env::split_paths(search_path)
            .filter(|dir| !dir.as_os_str().is_empty())
            .flat_map(|dir| candidates(&dir, name))
            .find(|candidate| self.is_executable(candidate))
    }
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    let base = dir.join(name);
    if Path::new(name).extension().is_some() {
        return vec![base];
    }
    ["exe", "com", "bat", "cmd"]
        .iter()
        .map(|ext| base.with_extension(ext))
        .collect()
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

/// [`FileSystem`] backed by the real OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    #[cfg(unix)]
    fn is_executable(&self, path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;

        match std::fs::metadata(path) {
            Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    fn is_executable(&self, path: &Path) -> bool {
        path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_resolve_finds_executable_in_order() {
        use std::os::unix::fs::PermissionsExt;

        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        // Non-executable file in the first dir must be skipped.
        let shadow = first.path().join("tool");
        std::fs::write(&shadow, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&shadow, std::fs::Permissions::from_mode(0o644)).unwrap();

        let real = second.path().join("tool");
        std::fs::write(&real, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&real, std::fs::Permissions::from_mode(0o755)).unwrap();

        let search = std::env::join_paths([first.path(), second.path()]).unwrap();
        let resolved = OsFileSystem.resolve_on_search_path("tool", &search);
        assert_eq!(resolved, Some(real));
    }

    #[test]
    fn test_resolve_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let search = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(
            OsFileSystem.resolve_on_search_path("definitely-not-here", &search),
            None
        );
    }

    #[test]
    fn test_directories_are_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(OsFileSystem.is_dir(dir.path()));
        assert!(!OsFileSystem.is_executable(dir.path()));
    }
}
