//! Making cached mods visible to the game
//!
//! A mod is deployed by placing a directory link (a symlink, or a junction on
//! Windows) or a full copy at `<install>/mods/<id>`.

use super::probe::{probe, DeployedState};
use crate::config::DeploymentMethod;
use crate::error::DeployError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Source and destination of one deployment
#[derive(Debug, Clone)]
pub struct DeployTarget {
    pub id: String,
    /// `<cache>/steamapps/workshop/content/<appid>/<id>`
    pub source: PathBuf,
    /// `<install>/mods/<id>`
    pub dest: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    Deployed,
    AlreadyDeployed,
    Removed,
    NotDeployed,
}

#[async_trait]
pub trait DeploymentStrategy: Send + Sync {
    fn method(&self) -> DeploymentMethod;

    /// Deploy if nothing is there yet. Existing deployments are left alone.
    async fn enable(&self, target: &DeployTarget) -> Result<DeployOutcome, DeployError>;

    /// Remove the deployment. The cache is never touched.
    async fn disable(&self, target: &DeployTarget) -> Result<DeployOutcome, DeployError>;

    /// Deploy after a fresh download, refreshing any stale deployment.
    async fn redeploy(&self, target: &DeployTarget) -> Result<DeployOutcome, DeployError> {
        self.enable(target).await
    }
}

pub fn strategy_for(method: DeploymentMethod) -> Arc<dyn DeploymentStrategy> {
    match method {
        DeploymentMethod::Link => Arc::new(LinkStrategy),
        DeploymentMethod::Copy => Arc::new(CopyStrategy),
    }
}

/// Directory links into the cache
#[derive(Debug, Default)]
pub struct LinkStrategy;

#[async_trait]
impl DeploymentStrategy for LinkStrategy {
    fn method(&self) -> DeploymentMethod {
        DeploymentMethod::Link
    }

    async fn enable(&self, target: &DeployTarget) -> Result<DeployOutcome, DeployError> {
        require_cache(target)?;

        match probe(&target.dest) {
            DeployedState::Link | DeployedState::Directory => Ok(DeployOutcome::AlreadyDeployed),
            DeployedState::Conflict => Err(DeployError::Conflict(target.dest.clone())),
            DeployedState::Absent => {
                ensure_parent(&target.dest).await?;
                create_dir_link(&target.source, &target.dest)
                    .map_err(|e| DeployError::io("link", &target.dest, e))?;
                tracing::info!("Linked {} -> {}", target.dest.display(), target.source.display());
                Ok(DeployOutcome::Deployed)
            }
        }
    }

    async fn disable(&self, target: &DeployTarget) -> Result<DeployOutcome, DeployError> {
        match probe(&target.dest) {
            DeployedState::Absent => Ok(DeployOutcome::NotDeployed),
            DeployedState::Link => {
                remove_dir_link(&target.dest).map_err(|e| DeployError::io("unlink", &target.dest, e))?;
                tracing::info!("Unlinked {}", target.dest.display());
                Ok(DeployOutcome::Removed)
            }
            DeployedState::Directory => Err(DeployError::NotALink(target.dest.clone())),
            DeployedState::Conflict => Err(DeployError::Conflict(target.dest.clone())),
        }
    }
}

/// Full physical copies of the cache entry
#[derive(Debug, Default)]
pub struct CopyStrategy;

#[async_trait]
impl DeploymentStrategy for CopyStrategy {
    fn method(&self) -> DeploymentMethod {
        DeploymentMethod::Copy
    }

    async fn enable(&self, target: &DeployTarget) -> Result<DeployOutcome, DeployError> {
        require_cache(target)?;

        match probe(&target.dest) {
            DeployedState::Link | DeployedState::Directory => Ok(DeployOutcome::AlreadyDeployed),
            DeployedState::Conflict => Err(DeployError::Conflict(target.dest.clone())),
            DeployedState::Absent => {
                copy_into_place(target).await?;
                Ok(DeployOutcome::Deployed)
            }
        }
    }

    async fn disable(&self, target: &DeployTarget) -> Result<DeployOutcome, DeployError> {
        match probe(&target.dest) {
            DeployedState::Absent => Ok(DeployOutcome::NotDeployed),
            DeployedState::Link => {
                remove_dir_link(&target.dest).map_err(|e| DeployError::io("unlink", &target.dest, e))?;
                Ok(DeployOutcome::Removed)
            }
            DeployedState::Directory => {
                tokio::fs::remove_dir_all(&target.dest)
                    .await
                    .map_err(|e| DeployError::io("remove copy", &target.dest, e))?;
                tracing::info!("Removed copy at {}", target.dest.display());
                Ok(DeployOutcome::Removed)
            }
            DeployedState::Conflict => Err(DeployError::Conflict(target.dest.clone())),
        }
    }

    /// Replace whatever is deployed with a fresh copy.
    async fn redeploy(&self, target: &DeployTarget) -> Result<DeployOutcome, DeployError> {
        require_cache(target)?;

        match probe(&target.dest) {
            DeployedState::Conflict => return Err(DeployError::Conflict(target.dest.clone())),
            DeployedState::Absent => {}
            DeployedState::Link | DeployedState::Directory => {
                self.disable(target).await?;
            }
        }
        copy_into_place(target).await?;
        Ok(DeployOutcome::Deployed)
    }
}

fn require_cache(target: &DeployTarget) -> Result<(), DeployError> {
    if target.source.is_dir() {
        Ok(())
    } else {
        Err(DeployError::MissingCache {
            id: target.id.clone(),
            path: target.source.clone(),
        })
    }
}

async fn ensure_parent(dest: &Path) -> Result<(), DeployError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DeployError::io("create mods directory", parent, e))?;
    }
    Ok(())
}

async fn copy_into_place(target: &DeployTarget) -> Result<(), DeployError> {
    ensure_parent(&target.dest).await?;

    let source = target.source.clone();
    let dest = target.dest.clone();
    let copied = tokio::task::spawn_blocking(move || copy_tree(&source, &dest))
        .await
        .map_err(|e| DeployError::io("copy", &target.dest, std::io::Error::other(e)))?;

    match copied {
        Ok(files) => {
            tracing::info!("Copied {} files to {}", files, target.dest.display());
            Ok(())
        }
        Err(e) => {
            // Leave nothing half-copied behind to be mistaken for a deployment
            let _ = std::fs::remove_dir_all(&target.dest);
            Err(e)
        }
    }
}

/// Recursively copy `source` to `dest`, following links inside the cache.
fn copy_tree(source: &Path, dest: &Path) -> Result<usize, DeployError> {
    let mut files = 0usize;
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
            DeployError::io("walk cache", path, std::io::Error::other(e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| DeployError::io("walk cache", entry.path(), std::io::Error::other(e)))?;
        let out = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| DeployError::io("create directory", &out, e))?;
        } else {
            std::fs::copy(entry.path(), &out).map_err(|e| DeployError::io("copy file", &out, e))?;
            files += 1;
        }
    }
    Ok(files)
}

#[cfg(unix)]
fn create_dir_link(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

/// Junctions need no elevation, unlike directory symlinks.
#[cfg(windows)]
fn create_dir_link(source: &Path, dest: &Path) -> std::io::Result<()> {
    junction::create(source, dest)
}

#[cfg(unix)]
pub(crate) fn remove_dir_link(path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(path)
}

/// Directory links on Windows are removed as directories.
#[cfg(windows)]
pub(crate) fn remove_dir_link(path: &Path) -> std::io::Result<()> {
    std::fs::remove_dir(path).or_else(|_| std::fs::remove_file(path))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn setup(id: &str) -> (tempfile::TempDir, DeployTarget) {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("cache").join(id);
        std::fs::create_dir_all(source.join("sub")).unwrap();
        std::fs::write(source.join("mod.ini"), b"v1").unwrap();
        std::fs::write(source.join("sub/map.bzn"), b"map").unwrap();
        let target = DeployTarget {
            id: id.to_string(),
            source,
            dest: tmp.path().join("game/mods").join(id),
        };
        (tmp, target)
    }

    /// Every file under `root`, relative path to contents
    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(root)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
                (rel, std::fs::read(e.path()).unwrap())
            })
            .collect()
    }

    async fn enable_then_disable(
        strategy: &dyn DeploymentStrategy,
        target: &DeployTarget,
        deployed: DeployedState,
    ) {
        let before = snapshot(&target.source);
        assert_eq!(before.len(), 2);

        assert_eq!(strategy.enable(target).await.unwrap(), DeployOutcome::Deployed);
        assert_eq!(probe(&target.dest), deployed);
        assert_eq!(std::fs::read(target.dest.join("mod.ini")).unwrap(), b"v1");
        assert_eq!(strategy.enable(target).await.unwrap(), DeployOutcome::AlreadyDeployed);

        assert_eq!(strategy.disable(target).await.unwrap(), DeployOutcome::Removed);
        assert_eq!(probe(&target.dest), DeployedState::Absent);
        assert_eq!(snapshot(&target.source), before);
        assert_eq!(strategy.disable(target).await.unwrap(), DeployOutcome::NotDeployed);
    }

    #[tokio::test]
    async fn link_enable_then_disable_leaves_cache_untouched() {
        let (_tmp, target) = setup("100");
        enable_then_disable(&LinkStrategy, &target, DeployedState::Link).await;
    }

    #[tokio::test]
    async fn copy_enable_then_disable_leaves_cache_untouched() {
        let (_tmp, target) = setup("107");
        enable_then_disable(&CopyStrategy, &target, DeployedState::Directory).await;
    }

    #[tokio::test]
    async fn link_disable_refuses_real_directory() {
        let (_tmp, target) = setup("101");
        std::fs::create_dir_all(&target.dest).unwrap();
        std::fs::write(target.dest.join("keep.txt"), b"x").unwrap();

        let err = LinkStrategy.disable(&target).await.unwrap_err();
        assert!(matches!(err, DeployError::NotALink(_)));
        assert!(target.dest.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn enable_without_cache_fails() {
        let (_tmp, target) = setup("102");
        std::fs::remove_dir_all(&target.source).unwrap();

        let err = LinkStrategy.enable(&target).await.unwrap_err();
        assert!(matches!(err, DeployError::MissingCache { .. }));
        assert_eq!(probe(&target.dest), DeployedState::Absent);
    }

    #[tokio::test]
    async fn regular_file_is_a_conflict() {
        let (_tmp, target) = setup("103");
        std::fs::create_dir_all(target.dest.parent().unwrap()).unwrap();
        std::fs::write(&target.dest, b"not a mod").unwrap();

        assert!(matches!(LinkStrategy.enable(&target).await, Err(DeployError::Conflict(_))));
        assert!(matches!(CopyStrategy.disable(&target).await, Err(DeployError::Conflict(_))));
        assert!(target.dest.is_file());
    }

    #[tokio::test]
    async fn copy_is_independent_of_cache() {
        let (_tmp, target) = setup("104");

        assert_eq!(CopyStrategy.enable(&target).await.unwrap(), DeployOutcome::Deployed);
        assert_eq!(probe(&target.dest), DeployedState::Directory);
        assert_eq!(std::fs::read(target.dest.join("sub/map.bzn")).unwrap(), b"map");

        std::fs::remove_dir_all(&target.source).unwrap();
        assert!(target.dest.join("mod.ini").exists());
    }

    #[tokio::test]
    async fn copy_redeploy_replaces_old_files() {
        let (_tmp, target) = setup("105");
        CopyStrategy.enable(&target).await.unwrap();
        std::fs::write(target.dest.join("stale.txt"), b"old").unwrap();
        std::fs::write(target.source.join("mod.ini"), b"v2").unwrap();

        assert_eq!(CopyStrategy.redeploy(&target).await.unwrap(), DeployOutcome::Deployed);
        assert_eq!(std::fs::read(target.dest.join("mod.ini")).unwrap(), b"v2");
        assert!(!target.dest.join("stale.txt").exists());
    }

    #[tokio::test]
    async fn copy_disable_removes_stray_link() {
        let (_tmp, target) = setup("106");
        LinkStrategy.enable(&target).await.unwrap();

        assert_eq!(CopyStrategy.disable(&target).await.unwrap(), DeployOutcome::Removed);
        assert_eq!(probe(&target.dest), DeployedState::Absent);
        assert!(target.source.join("mod.ini").exists());
    }
}
