//! Storage configuration and path management for deskshell.
//!
//! `StorageConfig` is the single place that decides where the host keeps its
//! data. Production code uses [`StorageConfig::from_home`] which points to
//! `~/.deskshell/`; tests use [`StorageConfig::with_root`] with a temp dir.

use std::path::{Path, PathBuf};

use fs_err as fs;

use crate::error::{HostError, Result};

const ROOT_DIR_NAME: &str = ".deskshell";

/// Central configuration for all deskshell storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves the default root (`~/.deskshell`).
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(HostError::HomeDirNotFound)?;
        Ok(Self {
            root: home.join(ROOT_DIR_NAME),
        })
    }

    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Opaque key-value preferences (`serverPort`, `proxyPort`).
    pub fn preferences_file(&self) -> PathBuf {
        self.root.join("preferences.json")
    }

    /// Optional host settings overriding built-in defaults.
    pub fn settings_file(&self) -> PathBuf {
        self.root.join("host.toml")
    }

    /// Unix socket the sandboxed UI uses to reach the privileged bridge.
    pub fn bridge_socket(&self) -> PathBuf {
        self.root.join("bridge.sock")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────────

    /// Root of the offline cache store registry.
    pub fn caches_dir(&self) -> PathBuf {
        self.root.join("caches")
    }

    /// Diagnostic log directory (rolling host log).
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Ensures the root directory and standard subdirectories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.caches_dir(), self.logs_dir()] {
            fs::create_dir_all(&dir)
                .map_err(|err| HostError::io(format!("create {}", dir.display()), err))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_home_ends_with_deskshell() {
        if let Ok(config) = StorageConfig::from_home() {
            assert!(config.root().ends_with(".deskshell"));
        }
    }

    #[test]
    fn test_paths_hang_off_root() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/deskshell"));
        assert_eq!(
            config.preferences_file(),
            PathBuf::from("/tmp/deskshell/preferences.json")
        );
        assert_eq!(
            config.settings_file(),
            PathBuf::from("/tmp/deskshell/host.toml")
        );
        assert_eq!(
            config.bridge_socket(),
            PathBuf::from("/tmp/deskshell/bridge.sock")
        );
        assert_eq!(config.caches_dir(), PathBuf::from("/tmp/deskshell/caches"));
        assert_eq!(config.logs_dir(), PathBuf::from("/tmp/deskshell/logs"));
    }

    #[test]
    fn test_ensure_dirs_creates_layout() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig::with_root(temp.path().join("data"));
        config.ensure_dirs().unwrap();
        assert!(config.caches_dir().is_dir());
        assert!(config.logs_dir().is_dir());
    }
}
