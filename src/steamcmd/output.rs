//! Classification of steamcmd console lines

use regex_lite::Regex;
use std::sync::LazyLock;

static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((\d+(?:\.\d+)?)%\)").unwrap());
static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)progress:\s*(\d+(?:\.\d+)?)").unwrap());
static SUCCESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Success\. Downloaded item (\d+)").unwrap());
static FAILED_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)download item (\d+) failed(?:\s*\(([^)]*)\))?").unwrap());
static ITEM_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)item (\d+)").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// Percentage for whatever item is currently downloading
    Progress(f32),
    Success { id: String },
    /// `id` is absent for failures not tied to an item, e.g. a login error
    Failure { id: Option<String>, reason: String },
    Other,
}

pub fn classify(line: &str) -> LineKind {
    let line = line.trim();

    if let Some(c) = SUCCESS_RE.captures(line) {
        return LineKind::Success { id: c[1].to_string() };
    }

    if let Some(c) = FAILED_ITEM_RE.captures(line) {
        let reason = c
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| line.to_string());
        return LineKind::Failure {
            id: Some(c[1].to_string()),
            reason,
        };
    }

    if line.starts_with("ERROR!") || line.contains("FAILED") {
        return LineKind::Failure {
            id: ITEM_ID_RE.captures(line).map(|c| c[1].to_string()),
            reason: line.to_string(),
        };
    }

    if let Some(c) = PERCENT_RE.captures(line).or_else(|| PROGRESS_RE.captures(line)) {
        if let Ok(pct) = c[1].parse::<f32>() {
            return LineKind::Progress(pct.clamp(0.0, 100.0));
        }
    }

    LineKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_line() {
        let line = r#"Success. Downloaded item 1325933293 to "/cache/steamapps/workshop/content/301650/1325933293" (4213 bytes)"#;
        assert_eq!(classify(line), LineKind::Success { id: "1325933293".into() });
    }

    #[test]
    fn failure_lines() {
        assert_eq!(
            classify("ERROR! Download item 42 failed (File Not Found)."),
            LineKind::Failure {
                id: Some("42".into()),
                reason: "File Not Found".into()
            }
        );
        assert_eq!(
            classify("ERROR! Timeout downloading item 77"),
            LineKind::Failure {
                id: Some("77".into()),
                reason: "ERROR! Timeout downloading item 77".into()
            }
        );
        assert!(matches!(
            classify("Logging in user 'anonymous' to Steam Public...FAILED (No Connection)"),
            LineKind::Failure { id: None, .. }
        ));
    }

    #[test]
    fn progress_lines() {
        assert_eq!(classify("Downloading item 5 ... (42.50%)"), LineKind::Progress(42.5));
        assert_eq!(
            classify(" Update state (0x61) downloading, progress: 12.07 (1024 / 8482)"),
            LineKind::Progress(12.07)
        );
    }

    #[test]
    fn everything_else() {
        assert_eq!(classify("Loading Steam API...OK"), LineKind::Other);
        assert_eq!(classify(""), LineKind::Other);
    }
}
