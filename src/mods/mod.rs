//! Mod reconciliation - cache contents, deployed state, and remote details

mod deploy;
pub mod probe;
pub mod scan;
pub mod staleness;

pub use deploy::*;
pub use probe::DeployedState;
pub use scan::{CacheScan, ScanError};
pub use staleness::Staleness;

use crate::config::DeploymentMethod;
use crate::error::DeployError;
use crate::games::Game;
use crate::workshop::WorkshopMetadata;
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One cached mod, reconciled with its deployed state and (once fetched)
/// its workshop details
#[derive(Debug, Clone)]
pub struct ModEntry {
    pub id: String,
    pub cache_path: PathBuf,
    /// Cache directory mtime, the local "last downloaded" date
    pub local_modified: Option<DateTime<Local>>,
    pub deployed: DeployedState,
    pub metadata: Option<WorkshopMetadata>,
    pub staleness: Staleness,
}

impl ModEntry {
    pub fn title(&self) -> String {
        self.metadata
            .as_ref()
            .map(|m| m.title.clone())
            .unwrap_or_else(|| format!("ID: {}", self.id))
    }

    pub fn is_enabled(&self) -> bool {
        self.deployed.is_present()
    }

    /// Attach fetched details and recompute staleness.
    pub fn apply_metadata(&mut self, metadata: WorkshopMetadata) {
        self.staleness = staleness::check(&metadata.last_updated, self.local_modified);
        self.metadata = Some(metadata);
    }

    pub fn local_date_label(&self) -> String {
        self.local_modified
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

/// What a delete managed to remove
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub id: String,
    pub deployment_removed: bool,
    /// Set when the deployed entry could not be removed; the cache is
    /// still deleted
    pub deployment_error: Option<String>,
    pub cache_removed: bool,
    pub cache_error: Option<String>,
}

impl DeleteReport {
    pub fn is_clean(&self) -> bool {
        self.deployment_error.is_none() && self.cache_error.is_none()
    }
}

/// Mod operations for one game and one cache root
pub struct ModManager {
    game: Game,
    cache_root: PathBuf,
    strategy: Arc<dyn DeploymentStrategy>,
}

impl ModManager {
    pub fn new(game: Game, cache_root: PathBuf, method: DeploymentMethod) -> Self {
        Self::with_strategy(game, cache_root, strategy_for(method))
    }

    pub fn with_strategy(game: Game, cache_root: PathBuf, strategy: Arc<dyn DeploymentStrategy>) -> Self {
        Self {
            game,
            cache_root,
            strategy,
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn method(&self) -> DeploymentMethod {
        self.strategy.method()
    }

    pub fn cache_path(&self, id: &str) -> PathBuf {
        scan::cache_path(&self.cache_root, self.game.profile.app_id, id)
    }

    pub fn deployed_path(&self, id: &str) -> PathBuf {
        probe::deployed_path(&self.game.mods_dir(), id)
    }

    pub fn target(&self, id: &str) -> DeployTarget {
        DeployTarget {
            id: id.to_string(),
            source: self.cache_path(id),
            dest: self.deployed_path(id),
        }
    }

    pub fn is_cached(&self, id: &str) -> bool {
        self.cache_path(id).is_dir()
    }

    /// Scan the cache and probe each entry's deployed path. Entries carry no
    /// metadata yet; a failed scan yields no entries and the scan error.
    pub fn scan(&self) -> (Vec<ModEntry>, Option<ScanError>) {
        let CacheScan { entries, error, .. } = scan::scan_cache(&self.cache_root, self.game.profile.app_id);
        let mods_dir = self.game.mods_dir();

        let entries = entries
            .into_iter()
            .map(|cached| ModEntry {
                deployed: probe::probe(&probe::deployed_path(&mods_dir, &cached.id)),
                id: cached.id,
                cache_path: cached.path,
                local_modified: cached.modified,
                metadata: None,
                staleness: Staleness::Unknown,
            })
            .collect();
        (entries, error)
    }

    pub async fn enable(&self, id: &str) -> Result<DeployOutcome, DeployError> {
        self.strategy.enable(&self.target(id)).await
    }

    pub async fn disable(&self, id: &str) -> Result<DeployOutcome, DeployError> {
        self.strategy.disable(&self.target(id)).await
    }

    /// Deploy after a download, replacing a stale copy
    pub async fn redeploy(&self, id: &str) -> Result<DeployOutcome, DeployError> {
        self.strategy.redeploy(&self.target(id)).await
    }

    /// Remove the deployed entry (link or copy) and the cache directory.
    ///
    /// A failure on the deployed side is recorded and the cache is removed
    /// anyway.
    pub async fn delete(&self, id: &str) -> DeleteReport {
        let target = self.target(id);
        let mut report = DeleteReport {
            id: id.to_string(),
            ..Default::default()
        };

        let removal = match probe::probe(&target.dest) {
            DeployedState::Absent => Ok(false),
            DeployedState::Link => deploy::remove_dir_link(&target.dest)
                .map(|_| true)
                .map_err(|e| DeployError::io("unlink", &target.dest, e)),
            DeployedState::Directory => tokio::fs::remove_dir_all(&target.dest)
                .await
                .map(|_| true)
                .map_err(|e| DeployError::io("remove copy", &target.dest, e)),
            DeployedState::Conflict => Err(DeployError::Conflict(target.dest.clone())),
        };
        match removal {
            Ok(removed) => report.deployment_removed = removed,
            Err(e) => {
                tracing::warn!("Delete {}: {}", id, e);
                report.deployment_error = Some(e.to_string());
            }
        }

        if target.source.exists() {
            match tokio::fs::remove_dir_all(&target.source).await {
                Ok(()) => report.cache_removed = true,
                Err(e) => {
                    tracing::error!("Failed to delete cache for {}: {}", id, e);
                    report.cache_error = Some(e.to_string());
                }
            }
        }

        tracing::info!(
            "Deleted {} (deployment removed: {}, cache removed: {})",
            id,
            report.deployment_removed,
            report.cache_removed
        );
        report
    }
}

/// Ids that an update should download: stale entries, or every candidate
/// when forced. `only` narrows the candidates to the given ids.
pub fn select_for_update(entries: &[ModEntry], only: Option<&[String]>, force: bool) -> Vec<String> {
    let wanted: Option<HashSet<&str>> = only.map(|ids| ids.iter().map(String::as_str).collect());

    entries
        .iter()
        .filter(|e| wanted.as_ref().map_or(true, |w| w.contains(e.id.as_str())))
        .filter(|e| force || e.staleness.needs_update())
        .map(|e| e.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::GameProfile;
    use crate::workshop::testing::meta;

    fn manager(method: DeploymentMethod) -> (tempfile::TempDir, ModManager) {
        let tmp = tempfile::tempdir().unwrap();
        let profile = GameProfile::builtin().remove(0);
        let game = Game::new(profile, tmp.path().join("game"));
        std::fs::create_dir_all(game.mods_dir()).unwrap();
        let manager = ModManager::new(game, tmp.path().join("cache"), method);
        (tmp, manager)
    }

    fn cache(manager: &ModManager, id: &str) {
        let dir = manager.cache_path(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("mod.ini"), id).unwrap();
    }

    fn entry(id: &str, staleness: Staleness) -> ModEntry {
        ModEntry {
            id: id.to_string(),
            cache_path: PathBuf::from(id),
            local_modified: None,
            deployed: DeployedState::Absent,
            metadata: None,
            staleness,
        }
    }

    #[tokio::test]
    async fn scan_reconciles_deployed_state() {
        let (_tmp, manager) = manager(DeploymentMethod::Link);
        cache(&manager, "1");
        cache(&manager, "2");
        manager.enable("2").await.unwrap();

        let (entries, error) = manager.scan();
        assert!(error.is_none());
        let states: Vec<_> = entries.iter().map(|e| (e.id.as_str(), e.deployed)).collect();
        assert_eq!(states, vec![("1", DeployedState::Absent), ("2", DeployedState::Link)]);
    }

    #[tokio::test]
    async fn delete_removes_link_and_cache() {
        let (_tmp, manager) = manager(DeploymentMethod::Link);
        cache(&manager, "7");
        manager.enable("7").await.unwrap();

        let report = manager.delete("7").await;
        assert!(report.is_clean());
        assert!(report.deployment_removed && report.cache_removed);
        assert!(!manager.deployed_path("7").exists());
        assert!(!manager.is_cached("7"));
    }

    #[tokio::test]
    async fn delete_removes_copy_and_cache() {
        let (_tmp, manager) = manager(DeploymentMethod::Copy);
        cache(&manager, "8");
        manager.enable("8").await.unwrap();
        assert_eq!(probe::probe(&manager.deployed_path("8")), DeployedState::Directory);

        let report = manager.delete("8").await;
        assert!(report.is_clean());
        assert!(!manager.deployed_path("8").exists());
        assert!(!manager.is_cached("8"));
    }

    #[tokio::test]
    async fn delete_still_clears_cache_on_conflict() {
        let (_tmp, manager) = manager(DeploymentMethod::Link);
        cache(&manager, "9");
        std::fs::write(manager.deployed_path("9"), b"junk").unwrap();

        let report = manager.delete("9").await;
        assert!(report.deployment_error.is_some());
        assert!(report.cache_removed);
        assert!(manager.deployed_path("9").is_file());
    }

    #[test]
    fn metadata_sets_staleness() {
        let mut e = entry("5", Staleness::Unknown);
        e.local_modified = Some(Local::now() - chrono::Duration::days(30));
        e.apply_metadata(meta("5", 301650, "Unknown", &[]));
        assert_eq!(e.staleness, Staleness::Unknown);
        assert_eq!(e.title(), "Mod 5");
    }

    #[test]
    fn only_stale_entries_are_selected() {
        let entries = vec![
            entry("1", Staleness::Stale),
            entry("2", Staleness::UpToDate),
            entry("3", Staleness::Unknown),
            entry("4", Staleness::Stale),
        ];
        assert_eq!(select_for_update(&entries, None, false), vec!["1", "4"]);
        assert_eq!(select_for_update(&entries, None, true), vec!["1", "2", "3", "4"]);

        let only = vec!["2".to_string(), "4".to_string()];
        assert_eq!(select_for_update(&entries, Some(&only), false), vec!["4"]);
        assert_eq!(select_for_update(&entries, Some(&only), true), vec!["2", "4"]);
    }
}
