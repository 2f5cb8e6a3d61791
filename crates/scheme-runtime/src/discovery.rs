//! Plugin executable discovery.
//!
//! A plugins directory is scanned non-recursively. Every regular file with an
//! execute permission bit is a candidate; whether it really is a scheme plugin
//! is only known after bootstrapping it.

use crate::error::{RuntimeError, RuntimeResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Get the user plugins directory.
pub fn default_plugins_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "veraison", "scheme-host")
        .map(|dirs| dirs.data_dir().join("plugins"))
}

/// Whether `path` is a regular file the current user may be able to execute.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("exe"))
            .unwrap_or(false)
}

/// Discover candidate plugin executables in `dir`, sorted by path.
pub fn discover_executables(dir: &Path) -> RuntimeResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(RuntimeError::PluginNotFound(format!(
            "plugins directory {} does not exist",
            dir.display()
        )));
    }

    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Failed to read entry in {:?}: {}", dir, e);
                continue;
            }
        };

        let path = entry.path();
        if is_executable(&path) {
            debug!("Found plugin candidate: {:?}", path);
            found.push(path);
        } else {
            debug!("Skipping {:?}: not an executable file", path);
        }
    }

    found.sort();
    info!("Discovered {} plugin candidate(s) in {:?}", found.len(), dir);
    Ok(found)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn create_file(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_discover_only_executables() {
        let temp_dir = TempDir::new().unwrap();
        let b = create_file(temp_dir.path(), "scheme-b", 0o755);
        let a = create_file(temp_dir.path(), "scheme-a", 0o700);
        create_file(temp_dir.path(), "README", 0o644);
        std::fs::create_dir(temp_dir.path().join("subdir")).unwrap();

        let found = discover_executables(temp_dir.path()).unwrap();
        assert_eq!(found, vec![a, b]);
    }

    #[test]
    fn test_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let result = discover_executables(&temp_dir.path().join("nope"));
        assert!(matches!(result, Err(RuntimeError::PluginNotFound(_))));
    }

    #[test]
    fn test_is_executable() {
        let temp_dir = TempDir::new().unwrap();
        let exec = create_file(temp_dir.path(), "x", 0o755);
        let plain = create_file(temp_dir.path(), "y", 0o600);

        assert!(is_executable(&exec));
        assert!(!is_executable(&plain));
        assert!(!is_executable(temp_dir.path()));
        assert!(!is_executable(&temp_dir.path().join("missing")));
    }
}
