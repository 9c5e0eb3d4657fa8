//! Typed error categories for the sync engine
//!
//! Component seams return these; the app layer wraps them in `anyhow`
//! and decides how loudly to report each category.

use std::path::PathBuf;
use thiserror::Error;

/// Broad classification used when reporting a failure to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing cache root, missing install directory, no active game
    Config,
    /// Fetch failure or malformed workshop page
    Network,
    /// Download tool failure
    Subprocess,
    /// Link/copy failure
    Deploy,
    /// Item belongs to a different game
    Validation,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Config => "config",
            ErrorCategory::Network => "network",
            ErrorCategory::Subprocess => "subprocess",
            ErrorCategory::Deploy => "deploy",
            ErrorCategory::Validation => "validation",
        }
    }

    /// Only validation failures abort the action they guard.
    pub fn is_fatal_to_action(&self) -> bool {
        matches!(self, ErrorCategory::Validation)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no game selected")]
    NoActiveGame,

    #[error("unknown game '{0}'")]
    UnknownGame(String),

    #[error("install path for {game} is not set")]
    InstallPathUnset { game: String },

    #[error("install directory not found: {0}")]
    InstallDirMissing(PathBuf),

    #[error("workshop cache not found: {0}")]
    CacheMissing(PathBuf),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for item {id} failed: {source}")]
    Request {
        id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("item {id} returned HTTP {status}")]
    Status { id: String, status: u16 },
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download tool not available: {0}")]
    ToolMissing(String),

    #[error("failed to bootstrap download tool: {0}")]
    Bootstrap(String),

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read download tool output: {0}")]
    Output(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("mod {id} is not in the cache ({path})")]
    MissingCache { id: String, path: PathBuf },

    #[error("{0} is a real directory, not a link; refusing to remove it")]
    NotALink(PathBuf),

    #[error("{0} exists but is neither a link nor a directory")]
    Conflict(PathBuf),

    #[error("{action} failed for {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeployError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("item {id} belongs to app {found}, not {expected} ({game})")]
    WrongGame {
        id: String,
        game: String,
        expected: u32,
        found: u32,
    },

    #[error("'{0}' is not a workshop id or item URL")]
    InvalidId(String),
}

/// Category of the first typed engine error in an `anyhow` chain
pub fn categorize(err: &anyhow::Error) -> Option<ErrorCategory> {
    err.chain().find_map(|cause| {
        if cause.is::<ConfigError>() {
            Some(ErrorCategory::Config)
        } else if cause.is::<FetchError>() {
            Some(ErrorCategory::Network)
        } else if cause.is::<DownloadError>() {
            Some(ErrorCategory::Subprocess)
        } else if cause.is::<DeployError>() {
            Some(ErrorCategory::Deploy)
        } else if cause.is::<ValidationError>() {
            Some(ErrorCategory::Validation)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_is_fatal() {
        let err = anyhow::Error::new(ValidationError::InvalidId("abc".into()));
        assert!(categorize(&err).is_some_and(|c| c.is_fatal_to_action()));

        let err = anyhow::Error::new(DeployError::NotALink(PathBuf::from("/x")));
        assert_eq!(categorize(&err), Some(ErrorCategory::Deploy));
        assert!(!ErrorCategory::Deploy.is_fatal_to_action());

        let err = anyhow::Error::new(DownloadError::ToolMissing("steamcmd".into()));
        assert_eq!(categorize(&err), Some(ErrorCategory::Subprocess));
    }

    #[test]
    fn categorize_looks_through_context() {
        use anyhow::Context;

        let err = Err::<(), _>(ValidationError::InvalidId("x".into()))
            .context("Install aborted")
            .unwrap_err();
        assert_eq!(categorize(&err), Some(ErrorCategory::Validation));

        let err = Err::<(), _>(ConfigError::NoActiveGame)
            .context("Listing mods")
            .unwrap_err();
        assert_eq!(categorize(&err), Some(ErrorCategory::Config));

        assert_eq!(categorize(&anyhow::anyhow!("plain")), None);
    }
}
