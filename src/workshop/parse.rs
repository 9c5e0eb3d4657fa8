//! Best-effort extraction of item details from a workshop page
//!
//! The page is an external, unstable format. Everything here degrades to a
//! placeholder instead of failing, and nothing outside this module knows
//! about the markup.

use super::{FetchOutcome, WorkshopMetadata};
use regex_lite::Regex;
use std::sync::LazyLock;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<div class="workshopItemTitle">(.*?)</div>"#).unwrap());
static ACTUAL_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"id="ActualImage"\s+src="([^"]+)""#).unwrap());
static IMAGE_SRC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<link rel="image_src" href="([^"]+)">"#).unwrap());
static STAT_RIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(?:div|span) class="detailsStatRight">([^<]+)</(?:div|span)>"#).unwrap()
});
static APP_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"steamcommunity\.com/app/(\d+)").unwrap());
static ITEM_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"filedetails/\?id=(\d+)").unwrap());

const ERROR_PAGE_MARKER: &str = "There was a problem accessing the item";
const REQUIRED_ITEMS_MARKER: &str = "requiredItemsContainer";

/// Parse a full item details page.
pub fn parse_item_page(id: &str, html: &str) -> FetchOutcome {
    if html.trim().is_empty() {
        return FetchOutcome::ParseError("empty page".to_string());
    }

    let title = extract_title(html);
    let app_id = extract_app_id(html);

    if html.contains(ERROR_PAGE_MARKER) || (title.is_none() && app_id.is_none()) {
        return FetchOutcome::NotFound;
    }

    let mut metadata = WorkshopMetadata::placeholder(id);
    if let Some(title) = title {
        metadata.title = title;
    }
    metadata.thumbnail_url = extract_thumbnail(html);
    if let Some(updated) = extract_last_updated(html) {
        metadata.last_updated = updated;
    }
    metadata.app_id = app_id;
    metadata.required_items = extract_required_items(id, html);

    FetchOutcome::Found(metadata)
}

pub fn extract_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .map(|c| decode_entities(c[1].trim()))
        .filter(|t| !t.is_empty())
}

pub fn extract_thumbnail(html: &str) -> Option<String> {
    ACTUAL_IMAGE_RE
        .captures(html)
        .or_else(|| IMAGE_SRC_RE.captures(html))
        .map(|c| c[1].to_string())
}

/// The stats column lists size, posted date and (when edited) updated date;
/// the last entry is the most recent date.
pub fn extract_last_updated(html: &str) -> Option<String> {
    STAT_RIGHT_RE
        .captures_iter(html)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .last()
}

/// App id of the game the item belongs to (first app link on the page)
pub fn extract_app_id(html: &str) -> Option<u32> {
    APP_LINK_RE
        .captures(html)
        .and_then(|c| c[1].parse::<u32>().ok())
}

/// Ids listed in the "required items" block, in page order.
pub fn extract_required_items(own_id: &str, html: &str) -> Vec<String> {
    let Some(block) = required_items_block(html) else {
        return Vec::new();
    };

    let mut ids: Vec<String> = Vec::new();
    for cap in ITEM_LINK_RE.captures_iter(block) {
        let id = &cap[1];
        if id != own_id && !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Slice out the required-items container, tolerating nested `<div>`s by
/// counting opens against closes.
fn required_items_block(html: &str) -> Option<&str> {
    let marker = html.find(REQUIRED_ITEMS_MARKER)?;
    let start = html[..marker].rfind("<div")?;

    let mut depth = 0usize;
    let mut pos = start;
    while pos < html.len() {
        let rest = &html[pos..];
        let next_open = rest.find("<div");
        let next_close = rest.find("</div");
        match (next_open, next_close) {
            (Some(o), Some(c)) if o < c => {
                depth += 1;
                pos += o + 4;
            }
            (_, Some(c)) => {
                depth = depth.saturating_sub(1);
                pos += c + 5;
                if depth == 0 {
                    return Some(&html[start..pos]);
                }
            }
            // Unbalanced tail: take what is left
            (_, None) => return Some(&html[start..]),
        }
    }
    Some(&html[start..])
}

fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><head>
<link rel="image_src" href="https://images.example/fallback.jpg">
</head><body>
<div class="breadcrumbs"><a href="https://steamcommunity.com/app/301650">Battlezone 98 Redux</a></div>
<div class="workshopItemTitle">Scrap &amp; Salvage</div>
<img id="ActualImage" src="https://images.example/preview.jpg"/>
<div class="requiredItemsContainer" id="RequiredItems">
    <a href="https://steamcommunity.com/workshop/filedetails/?id=1111" target="_blank">
        <div class="requiredItem"><div class="inner">Base Pack</div></div>
    </a>
    <a href="https://steamcommunity.com/workshop/filedetails/?id=2222">
        <div class="requiredItem">Maps</div>
    </a>
    <a href="https://steamcommunity.com/workshop/filedetails/?id=1111"><div>dup</div></a>
</div>
<div class="rightDetailsBlock"><a href="https://steamcommunity.com/sharedfiles/filedetails/?id=9999">Unrelated</a></div>
<div class="detailsStatsContainerRight">
    <div class="detailsStatRight">4.213 MB</div>
    <div class="detailsStatRight">2 Mar, 2017 @ 10:02am</div>
    <div class="detailsStatRight">23 Oct, 2018 @ 3:47pm</div>
</div>
</body></html>"#;

    #[test]
    fn full_page_is_extracted() {
        let FetchOutcome::Found(meta) = parse_item_page("5555", PAGE) else {
            panic!("expected metadata");
        };
        assert_eq!(meta.title, "Scrap & Salvage");
        assert_eq!(meta.thumbnail_url.as_deref(), Some("https://images.example/preview.jpg"));
        assert_eq!(meta.last_updated, "23 Oct, 2018 @ 3:47pm");
        assert_eq!(meta.app_id, Some(301650));
        assert_eq!(meta.required_items, vec!["1111", "2222"]);
    }

    #[test]
    fn missing_fields_degrade_to_placeholders() {
        let html = r#"<a href="https://steamcommunity.com/app/301650">x</a>"#;
        let FetchOutcome::Found(meta) = parse_item_page("42", html) else {
            panic!("expected metadata");
        };
        assert_eq!(meta.title, "ID: 42");
        assert!(meta.thumbnail_url.is_none());
        assert_eq!(meta.last_updated, "Unknown");
        assert!(meta.required_items.is_empty());
    }

    #[test]
    fn thumbnail_falls_back_to_link_tag() {
        let html = r#"<link rel="image_src" href="https://img/x.png">"#;
        assert_eq!(extract_thumbnail(html).as_deref(), Some("https://img/x.png"));
    }

    #[test]
    fn error_page_is_not_found() {
        let html = "<div>There was a problem accessing the item.  Please try again.</div>";
        assert!(matches!(parse_item_page("1", html), FetchOutcome::NotFound));
        assert!(matches!(parse_item_page("1", "   "), FetchOutcome::ParseError(_)));
    }

    #[test]
    fn required_block_stops_at_balanced_close() {
        let html = r#"<div class="requiredItemsContainer"><div><a href="filedetails/?id=7">a</a></div></div>
<a href="filedetails/?id=8">outside</a>"#;
        assert_eq!(extract_required_items("1", html), vec!["7"]);
    }
}
