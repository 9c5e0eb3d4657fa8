//! CLI command action handlers

use super::App;
use crate::config::DeploymentMethod;
use crate::error::ValidationError;
use crate::games::{GameDetector, GameProfile};
use crate::mods::{DeployOutcome, DeployedState, ModEntry};
use crate::queue::{BatchSummary, ItemStatus};
use crate::steamcmd::bootstrap;
use crate::workshop::{self, FetchOutcome};
use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;

/// How `mod install` treats required items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyChoice {
    Ask,
    Include,
    Skip,
}

impl App {
    // ========== Game Commands ==========

    pub async fn cmd_game_list(&self) -> Result<()> {
        let config = self.config.read().await;
        let profiles = GameProfile::all(&config.custom_games);

        println!("Game Profiles:");
        println!("{:-<60}", "");
        for profile in &profiles {
            let marker = if config.active_game.as_deref() == Some(profile.id.as_str()) {
                " [active]"
            } else {
                ""
            };
            let path = config
                .game_path(&profile.id)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(not set)".to_string());
            println!(
                "  {} ({}, app {}){}\n    Path: {}",
                profile.name, profile.id, profile.app_id, marker, path
            );
        }
        Ok(())
    }

    pub async fn cmd_game_detect(&self) -> Result<()> {
        println!("Scanning for games...");
        let profiles = self.profiles().await;
        let games = GameDetector::detect_all(&profiles);

        if games.is_empty() {
            println!("No games found. Use 'workshopsync game set-path <id> <path>'.");
            return Ok(());
        }

        println!("Found {} game(s):", games.len());
        for game in &games {
            println!("  - {} at {}", game.profile.name, game.install_path.display());
            let known = self.config.read().await.game_path(&game.profile.id);
            if known.is_none() {
                self.set_game_path(&game.profile.id, &game.install_path).await?;
                println!("    (saved as install path)");
            }
        }
        Ok(())
    }

    pub async fn cmd_game_select(&self, query: &str) -> Result<()> {
        let profiles = self.profiles().await;
        let Some(profile) = GameProfile::find(&profiles, query) else {
            bail!("Game '{}' not found. Run 'workshopsync game list' to see profiles.", query);
        };

        self.set_active_game(&profile.id).await?;
        println!("Selected: {} ({})", profile.name, profile.id);

        if self.config.read().await.game_path(&profile.id).is_none() {
            let detected = GameDetector::detect_all(std::slice::from_ref(profile));
            match detected.first() {
                Some(game) => {
                    self.set_game_path(&profile.id, &game.install_path).await?;
                    println!("Install path detected: {}", game.install_path.display());
                }
                None => println!(
                    "Install path unknown. Set it with 'workshopsync game set-path {} <path>'.",
                    profile.id
                ),
            }
        }
        Ok(())
    }

    pub async fn cmd_game_set_path(&self, query: &str, path: &str) -> Result<()> {
        let profiles = self.profiles().await;
        let Some(profile) = GameProfile::find(&profiles, query) else {
            bail!("Game '{}' not found.", query);
        };

        let path = PathBuf::from(path.trim());
        if !path.is_dir() {
            bail!("{} is not a directory", path.display());
        }
        self.set_game_path(&profile.id, &path).await?;
        println!("{} install path set to {}", profile.name, path.display());
        Ok(())
    }

    pub async fn cmd_game_info(&self) -> Result<()> {
        let game = self.active_game().await?;

        println!("Game Information");
        println!("{:-<40}", "");
        println!("Name:         {}", game.profile.name);
        println!("ID:           {}", game.profile.id);
        println!("App ID:       {}", game.profile.app_id);
        println!("Install Path: {}", game.install_path.display());
        println!("Mods Dir:     {}", game.mods_dir().display());
        println!(
            "Executable:   {}",
            if game.has_executable() {
                game.executable_path().display().to_string()
            } else {
                "missing (virtual/test mode)".to_string()
            }
        );
        Ok(())
    }

    // ========== Mod Commands ==========

    pub async fn cmd_mod_list(&self, fetch: bool) -> Result<()> {
        let game = self.active_game().await?;
        let entries = self.refresh(fetch).await?;

        if entries.is_empty() {
            println!("No cached mods for {}.", game.profile.name);
            return Ok(());
        }

        let advanced = self.config.read().await.advanced_mode;
        println!("Cached Mods for {}:", game.profile.name);
        println!("{:-<80}", "");
        for entry in &entries {
            print_entry_row(entry, advanced);
        }

        let stale = entries.iter().filter(|e| e.staleness.needs_update()).count();
        let enabled = entries.iter().filter(|e| e.is_enabled()).count();
        println!("{:-<80}", "");
        println!("{} mod(s), {} enabled, {} with updates", entries.len(), enabled, stale);
        Ok(())
    }

    pub async fn cmd_mod_info(&self, input: &str) -> Result<()> {
        let id = workshop::sanitize_id(input).context("Not a workshop id or URL")?;
        let mods = self.mod_manager().await?;
        let (entries, _) = mods.scan();
        let mut entry = entries.into_iter().find(|e| e.id == id);

        let metadata = match self.source.fetch(&id).await {
            Ok(outcome) => outcome.into_metadata_or_placeholder(&id),
            Err(e) => {
                self.events.warn(format!("Metadata fetch failed: {}", e));
                workshop::WorkshopMetadata::placeholder(&id)
            }
        };
        if let Some(entry) = entry.as_mut() {
            entry.apply_metadata(metadata.clone());
        }

        println!("Mod Information");
        println!("{:-<60}", "");
        println!("ID:           {}", id);
        println!("Title:        {}", metadata.title);
        println!(
            "App ID:       {}",
            metadata.app_id.map(|a| a.to_string()).unwrap_or_else(|| "unknown".into())
        );
        println!("Updated:      {}", metadata.last_updated);
        if let Some(thumb) = &metadata.thumbnail_url {
            println!("Thumbnail:    {}", thumb);
        }
        println!("URL:          {}", workshop::item_url(&id));
        match &entry {
            Some(entry) => {
                println!("Cached:       {} ({})", entry.cache_path.display(), entry.local_date_label());
                println!("Deployed:     {}", entry.deployed.label());
                println!("Staleness:    {}", entry.staleness.label());
            }
            None => println!("Cached:       no"),
        }
        if !metadata.required_items.is_empty() {
            println!("Requires:     {}", metadata.required_items.join(", "));
        }
        Ok(())
    }

    pub async fn cmd_mod_install(&self, inputs: &[String], deps: DependencyChoice) -> Result<()> {
        let plan = self.plan_install(inputs).await?;
        let mut ids = plan.requested.clone();

        if !plan.dependencies.is_empty() {
            println!("Required items not yet downloaded:");
            for dep in &plan.dependencies {
                println!("  - {}", dep);
            }
            let include = match deps {
                DependencyChoice::Include => true,
                DependencyChoice::Skip => false,
                DependencyChoice::Ask => {
                    confirm(&format!("Install {} required item(s) too?", plan.dependencies.len())).await?
                }
            };
            if include {
                ids.extend(plan.dependencies.iter().cloned());
            }
        }

        println!("Installing {} mod(s) for {}...", ids.len(), plan.game.profile.name);
        let summary = self.run_batch(ids).await?;
        print_summary(&summary);
        Ok(())
    }

    pub async fn cmd_mod_enable(&self, inputs: &[String]) -> Result<()> {
        let ids = parse_ids(inputs)?;
        let mods = self.mod_manager().await?;
        for id in &ids {
            match mods.enable(id).await {
                Ok(DeployOutcome::AlreadyDeployed) => println!("{} is already enabled", id),
                Ok(_) => println!("Enabled {} ({})", id, mods.method().display_name()),
                Err(e) => self.events.error(format!("Enable {}: {}", id, e)),
            }
        }
        Ok(())
    }

    pub async fn cmd_mod_disable(&self, inputs: &[String]) -> Result<()> {
        let ids = parse_ids(inputs)?;
        let mods = self.mod_manager().await?;
        for id in &ids {
            match mods.disable(id).await {
                Ok(DeployOutcome::NotDeployed) => {
                    tracing::info!("{} was not deployed", id);
                    println!("{} is not enabled", id);
                }
                Ok(_) => println!("Disabled {}", id),
                Err(e) => self.events.error(format!("Disable {}: {}", id, e)),
            }
        }
        Ok(())
    }

    pub async fn cmd_mod_update(&self, inputs: &[String], all: bool, force: bool) -> Result<()> {
        let ids = parse_ids(inputs)?;
        if ids.is_empty() && !all {
            println!("Nothing selected. Pass mod ids or --all.");
            return Ok(());
        }

        let only = (!ids.is_empty()).then_some(ids.as_slice());
        match self.update(only, force).await? {
            Some(summary) => print_summary(&summary),
            None => println!("All selected mods are up to date."),
        }
        Ok(())
    }

    pub async fn cmd_mod_delete(&self, inputs: &[String], yes: bool) -> Result<()> {
        let ids = parse_ids(inputs)?;
        let mods = self.mod_manager().await?;

        if !yes && !confirm(&format!("Delete {} mod(s) and their cached files?", ids.len())).await? {
            println!("Cancelled.");
            return Ok(());
        }

        for id in &ids {
            let report = mods.delete(id).await;
            if let Some(e) = &report.deployment_error {
                self.events.warn(format!("{}: deployed entry left in place ({})", id, e));
            }
            if let Some(e) = &report.cache_error {
                self.events.error(format!("{}: cache not removed ({})", id, e));
            }
            if report.cache_removed || report.deployment_removed {
                println!("Deleted {}", id);
            } else if report.is_clean() {
                println!("{} was not installed", id);
            }
        }
        Ok(())
    }

    pub async fn cmd_mod_deps(&self, input: &str) -> Result<()> {
        let id = workshop::sanitize_id(input).context("Not a workshop id or URL")?;
        let mods = self.mod_manager().await?;
        let deps = workshop::resolve_dependencies(self.source.as_ref(), std::slice::from_ref(&id)).await;

        if deps.is_empty() {
            println!("{} has no required items.", id);
            return Ok(());
        }

        println!("Required items for {}:", id);
        for dep in deps {
            let title = match self.source.fetch(&dep).await {
                Ok(FetchOutcome::Found(meta)) => meta.title,
                _ => format!("ID: {}", dep),
            };
            let state = if mods.is_cached(&dep) { "cached" } else { "missing" };
            println!("  {:<12} [{}] {}", dep, state, title);
        }
        Ok(())
    }

    pub async fn cmd_mod_open(&self, input: &str) -> Result<()> {
        let id = workshop::sanitize_id(input).context("Not a workshop id or URL")?;
        let url = workshop::item_url(&id);
        open::that(&url).with_context(|| format!("Failed to open {}", url))?;
        println!("Opened {}", url);
        Ok(())
    }

    // ========== Config Commands ==========

    pub async fn cmd_config_show(&self) -> Result<()> {
        let config = self.config.read().await;

        println!("Configuration");
        println!("{:-<60}", "");
        println!("Config file:     {}", config.paths.config_file().display());
        println!("Active game:     {}", config.active_game.as_deref().unwrap_or("(none)"));
        println!("Cache:           {}", config.cache_dir().display());
        println!(
            "steamcmd:        {}",
            config
                .steamcmd_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(auto)".to_string())
        );
        let method = config.deployment_method();
        println!("Deploy method:   {} ({})", method.display_name(), method.as_str());
        println!("Advanced mode:   {}", config.advanced_mode);
        println!("Worker pool:     {}", config.max_concurrent_tasks);
        println!(
            "HTTP timeout:    {}",
            config
                .http_timeout_secs
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "none".to_string())
        );
        for (id, path) in &config.game_paths {
            println!("Game path [{}]: {}", id, path);
        }
        Ok(())
    }

    pub async fn cmd_config_set_steamcmd(&self, path: &str) -> Result<()> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            self.set_steamcmd_path(None).await?;
            println!("steamcmd path cleared (auto-detect)");
            return Ok(());
        }
        let path = PathBuf::from(trimmed);
        if !path.is_file() {
            bail!("{} does not exist", path.display());
        }
        self.set_steamcmd_path(Some(&path)).await?;
        println!("steamcmd path set to {}", path.display());
        Ok(())
    }

    pub async fn cmd_config_set_cache(&self, path: &str) -> Result<()> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            self.set_cache_dir(None).await?;
            println!("Cache reset to default");
            return Ok(());
        }
        let path = PathBuf::from(trimmed);
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;
        self.set_cache_dir(Some(&path)).await?;
        println!("Cache set to {}", path.display());
        Ok(())
    }

    pub async fn cmd_config_set_method(&self, method: &str) -> Result<()> {
        let method = DeploymentMethod::from_cli(method)?;
        self.set_deployment_method(method).await?;
        println!("Deployment method set to {}", method.display_name());
        println!("Already deployed mods keep their current form until redeployed.");
        Ok(())
    }

    pub async fn cmd_config_set_advanced(&self, enabled: bool) -> Result<()> {
        self.set_advanced_mode(enabled).await?;
        println!("Advanced mode {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    // ========== Launch / Status ==========

    pub async fn cmd_launch(&self) -> Result<()> {
        let game = self.active_game().await?;
        if !game.has_executable() {
            bail!(
                "{} not found in {} (virtual/test mode)",
                game.profile.executable,
                game.install_path.display()
            );
        }

        let exe = game.executable_path();
        std::process::Command::new(&exe)
            .current_dir(&game.install_path)
            .spawn()
            .with_context(|| format!("Failed to launch {}", exe.display()))?;
        println!("Launched {}", game.profile.name);
        Ok(())
    }

    pub async fn cmd_status(&self) -> Result<()> {
        let config = self.config.read().await.clone();

        println!("workshopsync status");
        println!("{:-<60}", "");

        match self.active_game().await {
            Ok(game) => {
                println!("Game:        {} ({})", game.profile.name, game.profile.app_id);
                println!("Install:     {}", game.install_path.display());
                if !game.install_path.is_dir() {
                    println!("             [missing]");
                } else if game.has_executable() {
                    println!("Executable:  found");
                } else {
                    println!("Executable:  not found - virtual/test mode");
                }
                println!("Mods dir:    {}", game.mods_dir().display());
            }
            Err(e) => println!("Game:        {}", e),
        }

        let cache = config.cache_dir();
        println!(
            "Cache:       {} [{}]",
            cache.display(),
            if cache.is_dir() { "ok" } else { "missing" }
        );

        match bootstrap::locate(config.steamcmd_path().as_deref(), &config.paths.bin_dir()) {
            Some(path) => println!("steamcmd:    {}", path.display()),
            None => println!("steamcmd:    not found (downloaded on first install)"),
        }
        println!("Method:      {}", config.deployment_method().display_name());
        Ok(())
    }
}

/// Accept ids or workshop URLs, dropping duplicates
fn parse_ids(inputs: &[String]) -> Result<Vec<String>, ValidationError> {
    let mut ids: Vec<String> = Vec::with_capacity(inputs.len());
    for input in inputs {
        let id = workshop::sanitize_id(input).ok_or_else(|| ValidationError::InvalidId(input.clone()))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn print_entry_row(entry: &ModEntry, advanced: bool) {
    let status = match entry.deployed {
        DeployedState::Absent => "[ ]",
        DeployedState::Conflict => "[!]",
        DeployedState::Link | DeployedState::Directory => "[x]",
    };
    if advanced {
        let updated = entry
            .metadata
            .as_ref()
            .map(|m| m.last_updated.as_str())
            .unwrap_or("-");
        println!(
            "{} {:<12} {:<6} local {:<10} remote {:<22} {}",
            status,
            entry.id,
            entry.staleness.label(),
            entry.local_date_label(),
            updated,
            entry.title()
        );
    } else {
        let flag = if entry.staleness.needs_update() { " (update available)" } else { "" };
        println!("{} {:<12} {}{}", status, entry.id, entry.title(), flag);
    }
}

fn print_summary(summary: &BatchSummary) {
    let state = summary.state();
    println!("{:-<60}", "");
    for (id, status, detail) in &summary.items {
        if *status != ItemStatus::Completed {
            let detail = detail.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default();
            println!("  {} {}{}", id, status.to_string(), detail);
        }
    }
    println!(
        "{} completed, {} failed, {} cancelled",
        state.completed, state.failed, state.cancelled
    );
}

/// Ask a yes/no question on the terminal; anything but "y"/"yes" is no.
async fn confirm(prompt: &str) -> Result<bool> {
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || -> Result<bool> {
        print!("{} [y/N]: ", prompt);
        std::io::stdout().flush().ok();
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
    })
    .await
    .context("Prompt task failed")?
}
