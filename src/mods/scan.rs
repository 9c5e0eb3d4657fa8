//! Local download cache scanning

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// steamcmd's nested layout below `force_install_dir`
const WORKSHOP_CONTENT: [&str; 3] = ["steamapps", "workshop", "content"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no workshop cache at {0}")]
    Missing(PathBuf),

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One directory found in the cache
#[derive(Debug, Clone)]
pub struct CachedMod {
    /// Directory name, taken as the workshop id
    pub id: String,
    pub path: PathBuf,
    /// mtime of the directory itself, not of the newest file inside it
    pub modified: Option<DateTime<Local>>,
}

/// Outcome of a cache scan. A failed scan has no entries and an error.
#[derive(Debug)]
pub struct CacheScan {
    pub content_dir: PathBuf,
    pub entries: Vec<CachedMod>,
    pub error: Option<ScanError>,
}

/// `<cache>/steamapps/workshop/content/<appid>`
pub fn content_dir(cache_root: &Path, app_id: u32) -> PathBuf {
    let mut dir = cache_root.to_path_buf();
    for part in WORKSHOP_CONTENT {
        dir.push(part);
    }
    dir.join(app_id.to_string())
}

/// Cache directory of a single mod
pub fn cache_path(cache_root: &Path, app_id: u32, id: &str) -> PathBuf {
    content_dir(cache_root, app_id).join(id)
}

/// List the mod directories directly under the game's content directory.
///
/// Names are not validated; every subdirectory counts as one mod.
pub fn scan_cache(cache_root: &Path, app_id: u32) -> CacheScan {
    let content_dir = content_dir(cache_root, app_id);

    if !content_dir.is_dir() {
        return CacheScan {
            error: Some(ScanError::Missing(content_dir.clone())),
            content_dir,
            entries: Vec::new(),
        };
    }

    let read_dir = match std::fs::read_dir(&content_dir) {
        Ok(rd) => rd,
        Err(source) => {
            return CacheScan {
                error: Some(ScanError::Unreadable {
                    path: content_dir.clone(),
                    source,
                }),
                content_dir,
                entries: Vec::new(),
            }
        }
    };

    let mut entries = Vec::new();
    for entry in read_dir.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(id) = entry.file_name().to_str().map(str::to_string) else {
            tracing::debug!("Skipping non UTF-8 cache entry {}", path.display());
            continue;
        };
        let modified = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Local>::from);
        entries.push(CachedMod { id, path, modified });
    }

    entries.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::debug!("Cache scan found {} entries in {}", entries.len(), content_dir.display());

    CacheScan {
        content_dir,
        entries,
        error: None,
    }
}
