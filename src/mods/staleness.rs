//! Cache staleness against the workshop "last updated" date
//!
//! Only dates are compared. The remote time of day and timezone are
//! dropped, so an update published later on the same day as the last
//! download is not seen.
//!
//! The local date is the mtime of the mod's cache directory. That only moves
//! when entries directly inside it are added or removed, so an update that
//! rewrites existing files in place leaves the entry reported as stale.

use chrono::{DateTime, Datelike, Local, NaiveDate};

const MONTHS: [(&str, &str); 12] = [
    ("jan", "january"),
    ("feb", "february"),
    ("mar", "march"),
    ("apr", "april"),
    ("may", "may"),
    ("jun", "june"),
    ("jul", "july"),
    ("aug", "august"),
    ("sep", "september"),
    ("oct", "october"),
    ("nov", "november"),
    ("dec", "december"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Remote date is after the local cache date
    Stale,
    UpToDate,
    /// Either side could not be dated; treated as not stale
    Unknown,
}

impl Staleness {
    pub fn needs_update(&self) -> bool {
        matches!(self, Staleness::Stale)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Staleness::Stale => "UPDATE",
            Staleness::UpToDate => "OK",
            Staleness::Unknown => "?",
        }
    }
}

/// Compare a remote date string with the cache directory's mtime.
pub fn check(remote: &str, local_modified: Option<DateTime<Local>>) -> Staleness {
    let today = Local::now().date_naive();
    match local_modified {
        Some(local) => compare(remote, local.date_naive(), today),
        None => Staleness::Unknown,
    }
}

/// Date-only comparison; `today` supplies the year when the remote omits it.
pub fn compare(remote: &str, local: NaiveDate, today: NaiveDate) -> Staleness {
    match parse_remote_date(remote, today) {
        Some(remote) if remote > local => Staleness::Stale,
        Some(_) => Staleness::UpToDate,
        None => {
            tracing::debug!("Unparseable workshop date '{}'", remote);
            Staleness::Unknown
        }
    }
}

/// Parse the workshop's display date.
///
/// Accepts "23 Oct, 2016 @ 3:47pm", "23 Oct @ 3:47pm", "23 Oct 3:47pm" and
/// the month-first "Oct 23, 2016 @ 3:47pm". Month names may be abbreviated
/// or spelled out, in any case.
pub fn parse_remote_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let date_part = text.split('@').next()?;

    let mut day = None;
    let mut month = None;
    let mut year = None;

    for raw in date_part.split(|c: char| c.is_whitespace() || c == ',') {
        let token = raw.trim().trim_end_matches('.').to_ascii_lowercase();
        if token.is_empty() || token.contains(':') || token == "am" || token == "pm" {
            continue;
        }

        if let Some(m) = month_number(&token) {
            if month.replace(m).is_some() {
                return None;
            }
            continue;
        }

        if !token.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let value: u32 = token.parse().ok()?;
        if token.len() == 4 && year.is_none() {
            year = Some(value as i32);
        } else if day.is_none() && (1..=31).contains(&value) {
            day = Some(value);
        } else {
            return None;
        }
    }

    NaiveDate::from_ymd_opt(year.unwrap_or_else(|| today.year()), month?, day?)
}

fn month_number(token: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|(short, long)| token == *short || token == *long || (token == "sept" && *short == "sep"))
        .map(|i| i as u32 + 1)
}
