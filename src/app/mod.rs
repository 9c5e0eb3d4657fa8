//! Application state and orchestration

mod actions;
pub mod reporter;

pub use actions::DependencyChoice;
pub use reporter::Reporter;

use crate::config::{Config, DeploymentMethod};
use crate::error::{ConfigError, FetchError, ValidationError};
use crate::games::{Game, GameProfile};
use crate::mods::{self, ModEntry, ModManager, ScanError};
use crate::queue::{BatchProcessor, BatchSummary, Event, EventSender, TaskPool};
use crate::steamcmd::{self, Downloader, SteamCmd};
use crate::workshop::{self, FetchOutcome, MetadataSource, SteamCommunityClient, WorkshopMetadata};

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Ids resolved for an install, split into what was asked for and what
/// those items require
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub game: Game,
    pub requested: Vec<String>,
    /// Required items that are not cached yet
    pub dependencies: Vec<String>,
}

/// Main application struct that orchestrates all components
pub struct App {
    /// Application configuration
    pub config: Arc<RwLock<Config>>,

    /// Sending half of the control loop's event channel
    pub events: EventSender,

    /// Bounded pool for background work
    pub pool: TaskPool,

    /// Workshop metadata source
    pub source: Arc<dyn MetadataSource>,

    /// Overrides the steamcmd lookup when set
    downloader: Option<Arc<dyn Downloader>>,
}

impl App {
    /// Create a new App instance
    pub async fn new(config: Config, events: EventSender, root: CancellationToken) -> Result<Self> {
        config.ensure_dirs().context("Failed to create directories")?;

        let timeout = config.http_timeout_secs.map(Duration::from_secs);
        let source = SteamCommunityClient::new(timeout).context("Failed to initialize workshop client")?;

        Ok(Self::with_parts(config, events, root, Arc::new(source), None))
    }

    pub fn with_parts(
        config: Config,
        events: EventSender,
        root: CancellationToken,
        source: Arc<dyn MetadataSource>,
        downloader: Option<Arc<dyn Downloader>>,
    ) -> Self {
        let pool = TaskPool::new(config.max_concurrent_tasks, events.clone(), root);
        Self {
            config: Arc::new(RwLock::new(config)),
            events,
            pool,
            source,
            downloader,
        }
    }

    pub async fn profiles(&self) -> Vec<GameProfile> {
        GameProfile::all(&self.config.read().await.custom_games)
    }

    /// Get the currently active game
    pub async fn active_game(&self) -> Result<Game, ConfigError> {
        Game::from_config(&*self.config.read().await)
    }

    /// Mod manager for the active game. Fails if the install directory is
    /// gone.
    pub async fn mod_manager(&self) -> Result<Arc<ModManager>> {
        let config = self.config.read().await;
        let game = Game::from_config(&config)?;
        if !game.install_path.is_dir() {
            return Err(ConfigError::InstallDirMissing(game.install_path.clone()).into());
        }
        Ok(Arc::new(ModManager::new(
            game,
            config.cache_dir(),
            config.deployment_method(),
        )))
    }

    /// Set the active game
    pub async fn set_active_game(&self, profile_id: &str) -> Result<()> {
        let mut config = self.config.write().await;
        config.active_game = Some(profile_id.to_string());
        config.save().await
    }

    pub async fn set_game_path(&self, profile_id: &str, path: &Path) -> Result<()> {
        let mut config = self.config.write().await;
        config.set_game_path(profile_id, path);
        config.save().await
    }

    /// Set deployment method in config
    pub async fn set_deployment_method(&self, method: DeploymentMethod) -> Result<()> {
        let mut config = self.config.write().await;
        config.set_deployment_method(method);
        config.save().await
    }

    pub async fn set_cache_dir(&self, path: Option<&Path>) -> Result<()> {
        let mut config = self.config.write().await;
        config.set_cache_dir(path);
        config.save().await
    }

    pub async fn set_steamcmd_path(&self, path: Option<&Path>) -> Result<()> {
        let mut config = self.config.write().await;
        config.set_steamcmd_path(path);
        config.save().await
    }

    pub async fn set_advanced_mode(&self, enabled: bool) -> Result<()> {
        let mut config = self.config.write().await;
        config.advanced_mode = enabled;
        config.save().await
    }

    /// Fetch metadata for several ids, one pool task each. Ids whose task
    /// was cancelled are left out.
    pub async fn fetch_many(&self, ids: &[String]) -> Vec<(String, Result<FetchOutcome, FetchError>)> {
        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let source = Arc::clone(&self.source);
                let id = id.clone();
                self.pool.spawn(move |token| async move {
                    let result = tokio::select! {
                        _ = token.cancelled() => None,
                        result = source.fetch(&id) => Some(result),
                    };
                    (id, result)
                })
            })
            .collect();

        futures::future::join_all(handles.into_iter().map(|h| h.join()))
            .await
            .into_iter()
            .flatten()
            .filter_map(|(id, result)| result.map(|r| (id, r)))
            .collect()
    }

    /// Scan the cache, probe deployments and (optionally) fetch details for
    /// every entry. A missing cache yields an empty list and a warning.
    pub async fn refresh(&self, fetch: bool) -> Result<Vec<ModEntry>> {
        let mods = self.mod_manager().await?;
        let (mut entries, error) = mods.scan();

        match error {
            Some(ScanError::Missing(path)) => {
                self.events.warn(ConfigError::CacheMissing(path).to_string());
                return Ok(entries);
            }
            Some(e) => {
                self.events.warn(format!("Cache scan: {}", e));
                return Ok(entries);
            }
            None => {}
        }
        if !fetch || entries.is_empty() {
            return Ok(entries);
        }

        let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
        let results = self.fetch_many(&ids).await;

        for (id, result) in results {
            let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
                continue;
            };
            let metadata = match result {
                Ok(outcome) => {
                    if let FetchOutcome::ParseError(reason) = &outcome {
                        tracing::debug!("Workshop page for {} unparseable: {}", id, reason);
                    }
                    outcome.into_metadata_or_placeholder(&id)
                }
                Err(e) => {
                    self.events.warn(format!("Metadata fetch failed: {}", e));
                    WorkshopMetadata::placeholder(&id)
                }
            };
            entry.apply_metadata(metadata);
            self.events.send(Event::EntryUpdated(entry.clone()));
        }

        Ok(entries)
    }

    /// Resolve, validate and expand an install request.
    ///
    /// Any item whose page names a different game aborts the whole install.
    pub async fn plan_install(&self, inputs: &[String]) -> Result<InstallPlan> {
        let mut requested = Vec::new();
        for input in inputs {
            let id = workshop::sanitize_id(input).ok_or_else(|| ValidationError::InvalidId(input.clone()))?;
            if !requested.contains(&id) {
                requested.push(id);
            }
        }

        let mods = self.mod_manager().await?;
        let game = mods.game().clone();

        for (id, result) in self.fetch_many(&requested).await {
            match result {
                Ok(FetchOutcome::Found(meta)) => {
                    workshop::validate_for_game(&meta, &game.profile)?;
                    self.events.info(format!("{}: {}", id, meta.title));
                }
                Ok(FetchOutcome::NotFound) => {
                    self.events.warn(format!("{} was not found on the workshop, trying anyway", id));
                }
                Ok(FetchOutcome::ParseError(_)) | Err(_) => {
                    self.events.warn(format!("Could not verify {} belongs to {}", id, game.profile.name));
                }
            }
        }

        let dependencies = workshop::resolve_dependencies(self.source.as_ref(), &requested)
            .await
            .into_iter()
            .filter(|dep| !mods.is_cached(dep))
            .collect();

        Ok(InstallPlan {
            game,
            requested,
            dependencies,
        })
    }

    /// Resolve the download tool, storing a newly found path in config.
    pub async fn downloader(&self) -> Result<Arc<dyn Downloader>> {
        if let Some(downloader) = &self.downloader {
            return Ok(Arc::clone(downloader));
        }

        let (configured, bin_dir) = {
            let config = self.config.read().await;
            (config.steamcmd_path(), config.paths.bin_dir())
        };
        let path = steamcmd::ensure_installed(configured.as_deref(), &bin_dir).await?;

        if configured.as_deref() != Some(path.as_path()) {
            self.set_steamcmd_path(Some(&path)).await?;
        }
        Ok(Arc::new(SteamCmd::new(path)))
    }

    /// Download and deploy a batch in one pool task.
    pub async fn run_batch(&self, ids: Vec<String>) -> Result<BatchSummary> {
        let mods = self.mod_manager().await?;
        let downloader = self.downloader().await?;
        let processor = BatchProcessor::new(mods, downloader, self.events.clone());

        self.pool
            .spawn(move |token| async move { processor.process_batch(ids, token).await })
            .join()
            .await
            .context("Batch was cancelled before it started")
    }

    /// Re-download stale mods (or all candidates with `force`) in a single
    /// batch. Returns `None` when nothing needs updating.
    pub async fn update(&self, only: Option<&[String]>, force: bool) -> Result<Option<BatchSummary>> {
        let entries = self.refresh(true).await?;
        let selected = mods::select_for_update(&entries, only, force);

        if let Some(only) = only {
            for id in only.iter().filter(|id| !entries.iter().any(|e| &e.id == *id)) {
                self.events.warn(format!("{} is not in the cache", id));
            }
        }
        if selected.is_empty() {
            self.events.info("All selected mods are up to date");
            return Ok(None);
        }

        self.events.info(format!("Updating {} mod(s)", selected.len()));
        self.run_batch(selected).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use crate::error::DownloadError;
    use crate::mods::{probe, DeployedState, Staleness};
    use crate::queue::ItemStatus;
    use crate::steamcmd::{BatchReport, DownloadEvent, DownloadRequest};
    use crate::workshop::testing::{meta, FakeSource};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedSender;

    struct Fixture {
        _tmp: tempfile::TempDir,
        app: App,
    }

    /// Records requested ids and fills the cache like the real tool
    #[derive(Default)]
    struct RecordingDownloader {
        requested: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Downloader for RecordingDownloader {
        async fn run_batch(
            &self,
            request: DownloadRequest,
            _cancel: CancellationToken,
            events: UnboundedSender<DownloadEvent>,
        ) -> Result<BatchReport, DownloadError> {
            let content = mods::scan::content_dir(&request.install_dir, request.app_id);
            let mut report = BatchReport::default();
            for id in &request.ids {
                self.requested.lock().unwrap().push(id.clone());
                std::fs::create_dir_all(content.join(id)).unwrap();
                std::fs::write(content.join(id).join("mod.ini"), "v2").unwrap();
                let _ = events.send(DownloadEvent::ItemSucceeded(id.clone()));
                report.succeeded.push(id.clone());
            }
            Ok(report)
        }
    }

    fn fixture(source: FakeSource) -> Fixture {
        fixture_with(source, None)
    }

    fn fixture_with(source: FakeSource, downloader: Option<Arc<dyn Downloader>>) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths = Paths::with_root(tmp.path());
        config.active_game = Some("bz98r".into());
        let install = tmp.path().join("game");
        std::fs::create_dir_all(&install).unwrap();
        config.set_game_path("bz98r", &install);

        let (events, _rx) = EventSender::channel();
        let app = App::with_parts(
            config,
            events,
            CancellationToken::new(),
            Arc::new(source),
            downloader,
        );
        Fixture { _tmp: tmp, app }
    }

    async fn cache(app: &App, id: &str) {
        let mods = app.mod_manager().await.unwrap();
        std::fs::create_dir_all(mods.cache_path(id)).unwrap();
    }

    #[tokio::test]
    async fn wrong_game_blocks_install() {
        let f = fixture(FakeSource::default().with(meta("50", 624970, "1 Jan, 2020", &[])));

        let err = f.app.plan_install(&["50".to_string()]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::WrongGame { found: 624970, .. })
        ));
    }

    #[tokio::test]
    async fn install_plan_lists_uncached_dependencies() {
        let f = fixture(
            FakeSource::default()
                .with(meta("1", 301650, "", &["2", "3"]))
                .with(meta("2", 301650, "", &[]))
                .with(meta("3", 301650, "", &[])),
        );
        cache(&f.app, "3").await;

        let plan = f
            .app
            .plan_install(&["https://steamcommunity.com/sharedfiles/filedetails/?id=1".to_string()])
            .await
            .unwrap();
        assert_eq!(plan.requested, vec!["1"]);
        assert_eq!(plan.dependencies, vec!["2"]);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let f = fixture(FakeSource::default());
        let err = f.app.plan_install(&["not-a-mod".to_string()]).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ValidationError>(), Some(ValidationError::InvalidId(_))));
    }

    #[tokio::test]
    async fn refresh_attaches_metadata() {
        let f = fixture(
            FakeSource::default()
                .with(meta("10", 301650, "1 Jan, 2999 @ 1:00pm", &[]))
                .with(meta("11", 301650, "1 Jan, 2000 @ 1:00pm", &[])),
        );
        cache(&f.app, "10").await;
        cache(&f.app, "11").await;
        cache(&f.app, "12").await;

        let entries = f.app.refresh(true).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].staleness, Staleness::Stale);
        assert_eq!(entries[1].staleness, Staleness::UpToDate);
        assert_eq!(entries[2].title(), "ID: 12");
        assert_eq!(entries[2].staleness, Staleness::Unknown);
        assert!(entries.iter().all(|e| e.deployed == DeployedState::Absent));
    }

    /// Item 20 has a newer workshop version than its cache, 21 does not
    async fn update_fixture() -> (Fixture, Arc<Mutex<Vec<String>>>) {
        let downloader = RecordingDownloader::default();
        let requested = Arc::clone(&downloader.requested);
        let f = fixture_with(
            FakeSource::default()
                .with(meta("20", 301650, "1 Jan, 2999 @ 1:00pm", &[]))
                .with(meta("21", 301650, "1 Jan, 2000 @ 1:00pm", &[])),
            Some(Arc::new(downloader)),
        );
        cache(&f.app, "20").await;
        cache(&f.app, "21").await;
        (f, requested)
    }

    #[tokio::test]
    async fn update_downloads_and_deploys_only_stale_mods() {
        let (f, requested) = update_fixture().await;

        let summary = f.app.update(None, false).await.unwrap().unwrap();
        assert_eq!(*requested.lock().unwrap(), vec!["20"]);
        assert_eq!(summary.status_of("20"), Some(ItemStatus::Completed));
        assert_eq!(summary.status_of("21"), None);

        let mods = f.app.mod_manager().await.unwrap();
        assert_eq!(probe::probe(&mods.deployed_path("20")), DeployedState::Link);
        assert_eq!(std::fs::read(mods.deployed_path("20").join("mod.ini")).unwrap(), b"v2");
        assert_eq!(probe::probe(&mods.deployed_path("21")), DeployedState::Absent);
    }

    #[tokio::test]
    async fn forced_update_downloads_every_cached_mod() {
        let (f, requested) = update_fixture().await;

        let summary = f.app.update(None, true).await.unwrap().unwrap();
        let mut ids = requested.lock().unwrap().clone();
        ids.sort();
        assert_eq!(ids, vec!["20", "21"]);
        assert_eq!(summary.status_of("21"), Some(ItemStatus::Completed));
    }

    #[tokio::test]
    async fn update_with_nothing_stale_skips_the_download() {
        let (f, requested) = update_fixture().await;

        let only = vec!["21".to_string()];
        assert!(f.app.update(Some(&only), false).await.unwrap().is_none());
        assert!(requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_install_dir_is_a_config_error() {
        let f = fixture(FakeSource::default());
        std::fs::remove_dir_all(f.app.active_game().await.unwrap().install_path).unwrap();

        let err = f.app.mod_manager().await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InstallDirMissing(_))
        ));
    }
}
