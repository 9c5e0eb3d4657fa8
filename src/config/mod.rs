//! Configuration management for workshopsync
//!
//! The config is a JSON document:
//! - Config: ~/.config/workshopsync/config.json
//! - Data:   ~/.local/share/workshopsync/ (cache, bootstrapped tools)
//!
//! Paths that live under the data directory are stored relative to it so a
//! portable install keeps working after being moved.

mod paths;

pub use paths::Paths;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Default size of the background worker pool
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Active game profile identifier (e.g., "bz98r")
    pub active_game: Option<String>,

    /// Install path per game profile id
    pub game_paths: BTreeMap<String, String>,

    /// Path to the steamcmd executable
    pub steamcmd_path: Option<String>,

    /// Root of the steamcmd download cache
    pub cache_path: Option<String>,

    /// Copy mods into the game folder instead of linking them
    pub use_physical: bool,

    /// Show extra columns and raw tool output
    pub advanced_mode: bool,

    /// Upper bound on concurrently running background tasks
    pub max_concurrent_tasks: usize,

    /// Optional timeout for workshop page requests (none by default)
    pub http_timeout_secs: Option<u64>,

    /// Additional user-defined game profiles
    pub custom_games: Vec<CustomGameConfig>,

    /// Paths configuration
    #[serde(skip)]
    pub paths: Paths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            active_game: None,
            game_paths: BTreeMap::new(),
            steamcmd_path: None,
            cache_path: None,
            use_physical: false,
            advanced_mode: false,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            http_timeout_secs: None,
            custom_games: Vec::new(),
            paths: Paths::new(),
        }
    }
}

/// User-specified game profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomGameConfig {
    /// Short identifier used on the command line
    pub id: String,
    /// Display name
    pub name: String,
    /// Steam app id the workshop items belong to
    pub app_id: u32,
    /// Game executable filename
    pub executable: String,
    /// Folder names under `steamapps/common` to probe during detection
    pub steam_dir_names: Vec<String>,
}

impl Default for CustomGameConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            app_id: 0,
            executable: String::new(),
            steam_dir_names: Vec::new(),
        }
    }
}

/// How cached mods are made visible to the game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMethod {
    Link,
    Copy,
}

impl DeploymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMethod::Link => "link",
            DeploymentMethod::Copy => "copy",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DeploymentMethod::Link => "Directory Link",
            DeploymentMethod::Copy => "Physical Copy",
        }
    }

    pub fn from_cli(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "link" | "symlink" | "junction" => Ok(DeploymentMethod::Link),
            "copy" | "physical" | "full-copy" => Ok(DeploymentMethod::Copy),
            other => bail!(
                "Invalid deployment method '{}'. Valid values: link, copy",
                other
            ),
        }
    }
}

impl Config {
    /// Deployment method derived from the physical-copy preference
    pub fn deployment_method(&self) -> DeploymentMethod {
        if self.use_physical {
            DeploymentMethod::Copy
        } else {
            DeploymentMethod::Link
        }
    }

    pub fn set_deployment_method(&mut self, method: DeploymentMethod) {
        self.use_physical = method == DeploymentMethod::Copy;
    }

    /// Resolve the download cache root (configured or default)
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_path
            .as_deref()
            .map(|p| self.resolve_path(p))
            .unwrap_or_else(|| self.paths.default_cache_dir())
    }

    pub fn set_cache_dir(&mut self, path: Option<&Path>) {
        self.cache_path = path.map(|p| self.store_path(p));
    }

    /// Resolve the configured steamcmd executable, if any
    pub fn steamcmd_path(&self) -> Option<PathBuf> {
        self.steamcmd_path.as_deref().map(|p| self.resolve_path(p))
    }

    pub fn set_steamcmd_path(&mut self, path: Option<&Path>) {
        self.steamcmd_path = path.map(|p| self.store_path(p));
    }

    /// Resolve the install directory recorded for a game
    pub fn game_path(&self, game_id: &str) -> Option<PathBuf> {
        self.game_paths
            .get(game_id)
            .map(String::as_str)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| self.resolve_path(p))
    }

    pub fn set_game_path(&mut self, game_id: &str, path: &Path) {
        let stored = self.store_path(path);
        self.game_paths.insert(game_id.to_string(), stored);
    }

    /// Paths under the data directory are kept relative to it.
    fn store_path(&self, path: &Path) -> String {
        let base = self.paths.data_dir();
        match path.strip_prefix(&base) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().into_owned(),
            _ => path.to_string_lossy().into_owned(),
        }
    }

    fn resolve_path(&self, stored: &str) -> PathBuf {
        let p = PathBuf::from(stored);
        if p.is_absolute() {
            p
        } else {
            self.paths.data_dir().join(p)
        }
    }

    /// Ensure required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        self.paths
            .ensure_dirs()
            .context("Failed to create default application directories")?;
        Ok(())
    }

    /// Load configuration from disk or create default
    pub async fn load() -> Result<Self> {
        Self::load_from(Paths::new()).await
    }

    /// Load configuration rooted at the given paths
    pub async fn load_from(paths: Paths) -> Result<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            match serde_json::from_str::<Config>(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        "Config file {} is unreadable ({}), using defaults",
                        config_path.display(),
                        e
                    );
                    Config::default()
                }
            }
        } else {
            Config::default()
        };

        config.paths = paths;
        if config.max_concurrent_tasks == 0 {
            config.max_concurrent_tasks = DEFAULT_MAX_CONCURRENT_TASKS;
        }
        Ok(config)
    }

    /// Save configuration to disk
    pub async fn save(&self) -> Result<()> {
        let config_path = self.paths.config_file();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .await
            .context("Failed to write config file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(root: &Path) -> Config {
        Config {
            paths: Paths::with_root(root),
            ..Config::default()
        }
    }

    #[test]
    fn paths_under_data_dir_are_stored_relative() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_in(tmp.path());

        let inside = config.paths.data_dir().join("bin").join("steamcmd.exe");
        config.set_steamcmd_path(Some(&inside));
        assert_eq!(
            config.steamcmd_path.as_deref(),
            Some(Path::new("bin").join("steamcmd.exe").to_str().unwrap())
        );
        assert_eq!(config.steamcmd_path(), Some(inside));

        let outside = tmp.path().join("elsewhere");
        config.set_cache_dir(Some(&outside));
        assert_eq!(config.cache_dir(), outside);
    }

    #[test]
    fn deployment_method_tracks_physical_flag() {
        let mut config = Config::default();
        assert_eq!(config.deployment_method(), DeploymentMethod::Link);
        config.set_deployment_method(DeploymentMethod::Copy);
        assert!(config.use_physical);
        assert_eq!(DeploymentMethod::from_cli("junction").unwrap(), DeploymentMethod::Link);
        assert!(DeploymentMethod::from_cli("hardlink").is_err());
    }

    #[tokio::test]
    async fn save_then_load_keeps_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_in(tmp.path());
        config.active_game = Some("bz98r".into());
        config.use_physical = true;
        config.set_game_path("bz98r", &tmp.path().join("game"));
        config.save().await.unwrap();

        let loaded = Config::load_from(Paths::with_root(tmp.path())).await.unwrap();
        assert_eq!(loaded.active_game.as_deref(), Some("bz98r"));
        assert!(loaded.use_physical);
        assert_eq!(loaded.game_path("bz98r"), Some(tmp.path().join("game")));
    }

    #[tokio::test]
    async fn corrupt_config_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::with_root(tmp.path());
        std::fs::create_dir_all(paths.config_dir()).unwrap();
        std::fs::write(paths.config_file(), "{ not json").unwrap();

        let loaded = Config::load_from(paths).await.unwrap();
        assert!(loaded.active_game.is_none());
        assert_eq!(loaded.max_concurrent_tasks, DEFAULT_MAX_CONCURRENT_TASKS);
    }
}
