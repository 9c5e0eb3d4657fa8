//! Deployed-state probing
//!
//! Presence at `<mods_dir>/<id>` is the only "enabled" signal. Link targets
//! are never checked, so a link to the wrong cache entry still reads as
//! deployed.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

/// What occupies a mod's deployed path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployedState {
    Absent,
    /// Symlink or Windows junction, possibly dangling
    Link,
    /// Real directory, i.e. a physical copy
    Directory,
    /// Something else, e.g. a regular file
    Conflict,
}

impl DeployedState {
    pub fn is_present(&self) -> bool {
        !matches!(self, DeployedState::Absent)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeployedState::Absent => "DISABLED",
            DeployedState::Link | DeployedState::Directory => "ENABLED",
            DeployedState::Conflict => "CONFLICT",
        }
    }
}

pub fn deployed_path(mods_dir: &Path, id: &str) -> PathBuf {
    mods_dir.join(id)
}

/// Inspect a path without following links.
pub fn probe(path: &Path) -> DeployedState {
    match std::fs::symlink_metadata(path) {
        Err(_) => DeployedState::Absent,
        Ok(meta) if is_link(&meta) => DeployedState::Link,
        Ok(meta) if meta.is_dir() => DeployedState::Directory,
        Ok(_) => DeployedState::Conflict,
    }
}

#[cfg(windows)]
fn is_link(meta: &Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
    meta.file_type().is_symlink() || meta.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0
}

#[cfg(not(windows))]
fn is_link(meta: &Metadata) -> bool {
    meta.file_type().is_symlink()
}
