//! Steam Workshop item metadata
//!
//! Workshop pages are scraped, so the source sits behind [`MetadataSource`]
//! and every consumer treats the result as advisory.

pub mod parse;

use crate::error::{FetchError, ValidationError};
use crate::games::GameProfile;
use async_trait::async_trait;
use regex_lite::Regex;
use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;
use std::time::Duration;

const ITEM_URL_BASE: &str = "https://steamcommunity.com/sharedfiles/filedetails/";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Maximum depth followed when resolving required items
pub const MAX_DEPENDENCY_DEPTH: usize = 8;

static ID_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"id=(\d+)").unwrap());

/// Details scraped from an item page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkshopMetadata {
    pub id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    /// Free-text "last updated" date as shown on the page
    pub last_updated: String,
    /// App id the item belongs to, if the page names one
    pub app_id: Option<u32>,
    pub required_items: Vec<String>,
}

impl WorkshopMetadata {
    /// Stand-in used when the page could not be fetched or parsed
    pub fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: format!("ID: {}", id),
            thumbnail_url: None,
            last_updated: "Unknown".to_string(),
            app_id: None,
            required_items: Vec::new(),
        }
    }
}

/// Result of looking up one item
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Found(WorkshopMetadata),
    NotFound,
    ParseError(String),
}

impl FetchOutcome {
    /// Metadata, or a placeholder when the lookup came back empty
    pub fn into_metadata_or_placeholder(self, id: &str) -> WorkshopMetadata {
        match self {
            FetchOutcome::Found(meta) => meta,
            FetchOutcome::NotFound | FetchOutcome::ParseError(_) => WorkshopMetadata::placeholder(id),
        }
    }
}

/// Anything that can describe a workshop item
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<FetchOutcome, FetchError>;
}

/// Scrapes steamcommunity.com item pages
#[derive(Clone)]
pub struct SteamCommunityClient {
    client: reqwest::Client,
}

impl SteamCommunityClient {
    /// Build a client. No timeout is applied unless one is given.
    pub fn new(timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetadataSource for SteamCommunityClient {
    async fn fetch(&self, id: &str) -> Result<FetchOutcome, FetchError> {
        let url = item_url(id);
        tracing::debug!("Fetching workshop page {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                id: id.to_string(),
                source,
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(FetchOutcome::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                id: id.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response.text().await.map_err(|source| FetchError::Request {
            id: id.to_string(),
            source,
        })?;
        Ok(parse::parse_item_page(id, &html))
    }
}

/// Item details page for an id
pub fn item_url(id: &str) -> String {
    format!("{}?id={}", ITEM_URL_BASE, id)
}

/// Accept a bare numeric id or any URL carrying `id=<digits>`.
pub fn sanitize_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Some(trimmed.to_string());
    }

    if let Ok(url) = url::Url::parse(trimmed) {
        if let Some((_, id)) = url.query_pairs().find(|(k, _)| k == "id") {
            if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
                return Some(id.into_owned());
            }
        }
    }

    ID_PARAM_RE.captures(trimmed).map(|c| c[1].to_string())
}

/// Reject items whose page names a different game. Pages without an app
/// link are let through.
pub fn validate_for_game(
    metadata: &WorkshopMetadata,
    profile: &GameProfile,
) -> Result<(), ValidationError> {
    match metadata.app_id {
        Some(found) if found != profile.app_id => Err(ValidationError::WrongGame {
            id: metadata.id.clone(),
            game: profile.name.clone(),
            expected: profile.app_id,
            found,
        }),
        _ => Ok(()),
    }
}

/// Walk required items breadth-first and return every prerequisite of
/// `roots` that is not itself a root, in discovery order.
pub async fn resolve_dependencies(
    source: &dyn MetadataSource,
    roots: &[String],
) -> Vec<String> {
    let mut visited: HashSet<String> = roots.iter().cloned().collect();
    let mut queue: VecDeque<(String, usize)> = roots.iter().map(|id| (id.clone(), 0)).collect();
    let mut found = Vec::new();

    while let Some((id, depth)) = queue.pop_front() {
        if depth >= MAX_DEPENDENCY_DEPTH {
            tracing::warn!("Dependency chain too deep at {}, not following further", id);
            continue;
        }

        let metadata = match source.fetch(&id).await {
            Ok(FetchOutcome::Found(meta)) => meta,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("Could not check requirements of {}: {}", id, e);
                continue;
            }
        };

        for dep in metadata.required_items {
            if visited.insert(dep.clone()) {
                found.push(dep.clone());
                queue.push_back((dep, depth + 1));
            }
        }
    }

    found
}
