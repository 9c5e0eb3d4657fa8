//! Platform path management

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Manages all application paths using the platform's base directories
#[derive(Debug, Clone)]
pub struct Paths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    /// Create a new Paths instance
    pub fn new() -> Self {
        match ProjectDirs::from("", "", "workshopsync") {
            Some(dirs) => Self {
                config_dir: dirs.config_dir().to_path_buf(),
                data_dir: dirs.data_dir().to_path_buf(),
            },
            None => {
                tracing::warn!("No home directory found, using ./.workshopsync");
                Self::with_root(Path::new(".workshopsync"))
            }
        }
    }

    /// Root every path under a single directory (portable installs, tests)
    pub fn with_root(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    // ========== Config Paths ==========

    /// Config directory: ~/.config/workshopsync/
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Main config file: ~/.config/workshopsync/config.json
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    // ========== Data Paths ==========

    /// Data directory: ~/.local/share/workshopsync/
    ///
    /// Relative paths in the config file are resolved against this directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// Default download cache: ~/.local/share/workshopsync/workshop_cache/
    pub fn default_cache_dir(&self) -> PathBuf {
        self.data_dir.join("workshop_cache")
    }

    /// Bootstrapped tool binaries: ~/.local/share/workshopsync/bin/
    pub fn bin_dir(&self) -> PathBuf {
        self.data_dir.join("bin")
    }

    // ========== Utility Methods ==========

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.data_dir())?;
        Ok(())
    }
}
