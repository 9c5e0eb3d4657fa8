//! Game profiles and install detection

use crate::config::{Config, CustomGameConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Static description of a supported game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProfile {
    /// Short identifier (e.g., "bz98r")
    pub id: String,

    /// Display name
    pub name: String,

    /// Steam app id that owns the workshop items
    pub app_id: u32,

    /// Game executable filename, relative to the install directory
    pub executable: String,

    /// Folder names under `steamapps/common` that may hold the game
    pub steam_dir_names: Vec<String>,

    /// GOG product ids
    pub gog_ids: Vec<String>,

    /// Folder names used by GOG installers
    pub gog_dir_names: Vec<String>,

    /// Accent colour label for front ends
    pub theme: String,
}

impl GameProfile {
    /// Built-in profiles
    pub fn builtin() -> Vec<GameProfile> {
        vec![
            GameProfile {
                id: "bz98r".to_string(),
                name: "Battlezone 98 Redux".to_string(),
                app_id: 301650,
                executable: "battlezone98redux.exe".to_string(),
                steam_dir_names: vec!["Battlezone 98 Redux".to_string()],
                gog_ids: vec!["1454067812".to_string(), "1459427445".to_string()],
                gog_dir_names: vec!["Battlezone 98 Redux".to_string()],
                theme: "green".to_string(),
            },
            GameProfile {
                id: "bzcc".to_string(),
                name: "Battlezone Combat Commander".to_string(),
                app_id: 624970,
                executable: "battlezone2.exe".to_string(),
                steam_dir_names: vec!["BZ2R".to_string(), "Battlezone Combat Commander".to_string()],
                gog_ids: Vec::new(),
                gog_dir_names: vec!["Battlezone Combat Commander".to_string()],
                theme: "amber".to_string(),
            },
        ]
    }

    fn from_custom(custom: &CustomGameConfig) -> Option<GameProfile> {
        let id = custom.id.trim();
        if id.is_empty() || custom.app_id == 0 {
            return None;
        }
        let name = if custom.name.trim().is_empty() {
            id.to_string()
        } else {
            custom.name.trim().to_string()
        };
        Some(GameProfile {
            id: id.to_string(),
            name: name.clone(),
            app_id: custom.app_id,
            executable: custom.executable.clone(),
            steam_dir_names: if custom.steam_dir_names.is_empty() {
                vec![name.clone()]
            } else {
                custom.steam_dir_names.clone()
            },
            gog_ids: Vec::new(),
            gog_dir_names: vec![name],
            theme: "default".to_string(),
        })
    }

    /// Built-in profiles followed by valid custom ones; custom entries with a
    /// built-in id are ignored.
    pub fn all(custom: &[CustomGameConfig]) -> Vec<GameProfile> {
        let mut profiles = Self::builtin();
        for entry in custom {
            match Self::from_custom(entry) {
                Some(profile) if !profiles.iter().any(|p| p.id == profile.id) => {
                    profiles.push(profile)
                }
                Some(profile) => {
                    tracing::warn!("Ignoring custom game '{}': id already in use", profile.id)
                }
                None => tracing::warn!("Ignoring custom game with missing id or app id"),
            }
        }
        profiles
    }

    /// Find a profile by id or by a case-insensitive name fragment
    pub fn find<'a>(profiles: &'a [GameProfile], query: &str) -> Option<&'a GameProfile> {
        let q = query.trim().to_lowercase();
        profiles
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(&q))
            .or_else(|| profiles.iter().find(|p| p.name.to_lowercase().contains(&q)))
    }
}

/// A profile bound to a concrete install directory
#[derive(Debug, Clone)]
pub struct Game {
    pub profile: GameProfile,

    /// Game installation path
    pub install_path: PathBuf,
}

impl Game {
    pub fn new(profile: GameProfile, install_path: PathBuf) -> Self {
        Self {
            profile,
            install_path,
        }
    }

    /// Resolve the active game from config
    pub fn from_config(config: &Config) -> Result<Game, crate::error::ConfigError> {
        use crate::error::ConfigError;

        let id = config
            .active_game
            .as_deref()
            .ok_or(ConfigError::NoActiveGame)?;
        let profiles = GameProfile::all(&config.custom_games);
        let profile = profiles
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownGame(id.to_string()))?;
        let install_path = config
            .game_path(&profile.id)
            .ok_or_else(|| ConfigError::InstallPathUnset {
                game: profile.name.clone(),
            })?;
        Ok(Game::new(profile, install_path))
    }

    /// Directory holding deployed mods: `<install>/mods`
    pub fn mods_dir(&self) -> PathBuf {
        self.install_path.join("mods")
    }

    pub fn executable_path(&self) -> PathBuf {
        self.install_path.join(&self.profile.executable)
    }

    /// Whether the executable exists; without it the manager runs in
    /// virtual/test mode against a bare directory.
    pub fn has_executable(&self) -> bool {
        !self.profile.executable.is_empty() && self.executable_path().exists()
    }
}

/// Game detection utilities
pub struct GameDetector;

impl GameDetector {
    /// Detect installs of the given profiles in Steam libraries and GOG folders
    pub fn detect_all(profiles: &[GameProfile]) -> Vec<Game> {
        let mut games = Vec::new();
        let libraries = Self::find_steam_libraries();

        for profile in profiles {
            if let Some(game) = libraries
                .iter()
                .find_map(|lib| Self::detect_in_library(lib, profile))
            {
                games.push(game);
                continue;
            }
            if let Some(game) = Self::detect_gog_game(profile) {
                games.push(game);
            }
        }

        Self::dedupe_games(games)
    }

    fn dedupe_games(games: Vec<Game>) -> Vec<Game> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for game in games {
            let canonical = game
                .install_path
                .canonicalize()
                .unwrap_or_else(|_| game.install_path.clone());
            let key = format!("{}:{}", game.profile.id, canonical.display());
            if seen.insert(key) {
                out.push(game);
            }
        }
        out
    }

    /// Find all Steam library `steamapps` folders
    fn find_steam_libraries() -> Vec<PathBuf> {
        let mut libraries = Vec::new();

        for base in Self::steam_roots() {
            if !base.exists() {
                continue;
            }

            let steamapps = base.join("steamapps");
            if steamapps.exists() && !libraries.contains(&steamapps) {
                libraries.push(steamapps.clone());
            }

            // libraryfolders.vdf lists additional libraries
            let vdf_path = steamapps.join("libraryfolders.vdf");
            if let Ok(content) = std::fs::read_to_string(&vdf_path) {
                for lib_path in parse_library_folders(&content) {
                    let lib_path = lib_path.join("steamapps");
                    if lib_path.exists() && !libraries.contains(&lib_path) {
                        libraries.push(lib_path);
                    }
                }
            }
        }

        libraries
    }

    fn steam_roots() -> Vec<PathBuf> {
        let mut roots = Vec::new();
        if let Some(dir) = std::env::var_os("STEAM_DIR") {
            roots.push(PathBuf::from(dir));
        }
        if let Some(home) = home_dir() {
            roots.push(home.join(".steam/steam"));
            roots.push(home.join(".local/share/Steam"));
            roots.push(home.join("Library/Application Support/Steam"));
        }
        roots.push(PathBuf::from(r"C:\Program Files (x86)\Steam"));
        roots.push(PathBuf::from(r"C:\Program Files\Steam"));
        roots
    }

    fn detect_in_library(steamapps: &Path, profile: &GameProfile) -> Option<Game> {
        let common = steamapps.join("common");
        profile
            .steam_dir_names
            .iter()
            .map(|name| common.join(name))
            .find(|path| path.exists())
            .map(|path| Game::new(profile.clone(), path))
    }

    /// Probe common GOG install locations
    fn detect_gog_game(profile: &GameProfile) -> Option<Game> {
        let home = home_dir().unwrap_or_default();
        let mut candidates = Vec::new();
        for title in &profile.gog_dir_names {
            candidates.push(home.join("GOG Games").join(title));
            candidates.push(home.join("Games/GOG Games").join(title));
            candidates.push(home.join("Games").join(title));
            candidates.push(PathBuf::from(r"C:\GOG Games").join(title));
            candidates.push(PathBuf::from(r"C:\Program Files (x86)\GOG Galaxy\Games").join(title));
        }

        candidates
            .into_iter()
            .find(|path| Self::is_gog_install(path, profile))
            .map(|path| Game::new(profile.clone(), path))
    }

    /// GOG installers drop a `goggame-<product id>.info` next to the game
    fn is_gog_install(dir: &Path, profile: &GameProfile) -> bool {
        if !profile.executable.is_empty() && dir.join(&profile.executable).exists() {
            return true;
        }
        profile
            .gog_ids
            .iter()
            .any(|id| dir.join(format!("goggame-{}.info", id)).is_file())
    }
}

/// Extract `"path"` values from a Steam `libraryfolders.vdf`
fn parse_library_folders(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .filter(|line| line.contains("\"path\""))
        .filter_map(|line| line.split('"').nth(3))
        .map(|p| PathBuf::from(p.replace("\\\\", "\\")))
        .collect()
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}
