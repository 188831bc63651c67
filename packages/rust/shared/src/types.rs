//! Core domain types for harvested posts.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Most recent `created_utc` already stored for a source. `None` means nothing
/// has been ingested yet, so every reachable post counts as new.
pub type Watermark = Option<f64>;

/// Format used for the human-readable `created_date` column.
const READABLE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static SOURCE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,50}$").expect("valid source name regex"));

// ---------------------------------------------------------------------------
// SourceName
// ---------------------------------------------------------------------------

/// Name of one remote feed (a subreddit). Validated so it can be spliced into
/// the listing URL path as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceName(String);

impl SourceName {
    /// Validate and wrap a source name. Surrounding whitespace is trimmed.
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if !SOURCE_NAME_RE.is_match(trimmed) {
            return Err(HarvestError::validation(format!(
                "invalid source name '{raw}': expected 1-50 letters, digits or underscores"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a comma-separated list, trimming entries and skipping empty ones.
    ///
    /// Entries are not validated here; each is checked when it is processed
    /// so one bad name fails only itself.
    pub fn split_list(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl std::fmt::Display for SourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SourceName {
    type Err = HarvestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SourceName {
    type Error = HarvestError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<SourceName> for String {
    fn from(value: SourceName) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// Post
// ---------------------------------------------------------------------------

/// A post as delivered by the listing, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub title: String,
    pub author: String,
    /// Epoch seconds. Totally orders posts within one source.
    pub created_utc: f64,
}

impl Post {
    /// Whether this post is strictly newer than `watermark`.
    ///
    /// Equal timestamps are not newer, so a post sharing the watermark's
    /// exact `created_utc` is never ingested.
    pub fn is_newer_than(&self, watermark: Watermark) -> bool {
        match watermark {
            Some(mark) => self.created_utc > mark,
            None => true,
        }
    }
}

/// A post row read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPost {
    /// Surrogate key.
    pub id: i64,
    pub source: String,
    pub title: String,
    pub author: String,
    pub created_utc: f64,
    /// UTC rendering of `created_utc`.
    pub created_date: String,
}

/// Per-source aggregate used by the `status` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: String,
    pub post_count: u64,
    pub latest_created_utc: Option<f64>,
}

/// Render epoch seconds as `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn readable_utc(created_utc: f64) -> Result<String> {
    let secs = created_utc.floor();
    if !secs.is_finite() || secs < i64::MIN as f64 || secs > i64::MAX as f64 {
        return Err(HarvestError::validation(format!(
            "timestamp {created_utc} is out of range"
        )));
    }

    DateTime::<Utc>::from_timestamp(secs as i64, 0)
        .map(|dt| dt.format(READABLE_FORMAT).to_string())
        .ok_or_else(|| {
            HarvestError::validation(format!("timestamp {created_utc} is out of range"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_name_validation() {
        assert_eq!(SourceName::new("rust").unwrap().as_str(), "rust");
        assert_eq!(SourceName::new("  pics ").unwrap().as_str(), "pics");
        assert!(SourceName::new("").is_err());
        assert!(SourceName::new("r/rust").is_err());
        assert!(SourceName::new("a b").is_err());
        assert!(SourceName::new("../etc").is_err());
        assert!(SourceName::new(&"x".repeat(51)).is_err());
    }

    #[test]
    fn split_list_keeps_order_and_invalid_entries() {
        let parsed = SourceName::split_list("computerscience, pics,,bad name,brazil ");
        assert_eq!(
            parsed,
            vec!["computerscience", "pics", "bad name", "brazil"]
        );
        assert!(SourceName::split_list(" , ").is_empty());
    }

    #[test]
    fn source_name_serde() {
        let name: SourceName = serde_json::from_str(r#""rust""#).unwrap();
        assert_eq!(name.to_string(), "rust");
        assert!(serde_json::from_str::<SourceName>(r#""no/slash""#).is_err());
    }

    #[test]
    fn newer_than_watermark() {
        let post = Post {
            title: "t".into(),
            author: "a".into(),
            created_utc: 300.0,
        };
        assert!(post.is_newer_than(None));
        assert!(post.is_newer_than(Some(299.5)));
        // Ties are not newer.
        assert!(!post.is_newer_than(Some(300.0)));
        assert!(!post.is_newer_than(Some(400.0)));
    }

    #[test]
    fn readable_timestamps() {
        assert_eq!(readable_utc(0.0).unwrap(), "1970-01-01 00:00:00");
        let truncated = readable_utc(1_700_000_000.9).unwrap();
        assert_eq!(truncated, "2023-11-14 22:13:20");
        assert!(readable_utc(f64::NAN).is_err());
        assert!(readable_utc(1e20).is_err());
    }
}
