//! Listing payload decoding and rate-limit header hints.

use std::time::Duration;

use serde::Deserialize;

use postharvest_shared::{HarvestError, Post, Result};

/// Header carrying the number of calls left in the current window.
pub const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// Header carrying the seconds until the window resets.
pub const RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// One page of a listing. Children stay undecoded until the walker reaches
/// them.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    /// Raw child entries in delivery order (newest first).
    pub children: Vec<serde_json::Value>,
    /// Cursor for the next page; `None` on the last page.
    pub after: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData {
    children: Vec<serde_json::Value>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Deserialize)]
struct Child {
    data: Post,
}

/// Decode the envelope of a listing body of the form
/// `{ "data": { "children": [ { "data": { title, author, created_utc } } ], "after": ... } }`.
pub fn parse_listing(body: &str) -> Result<ListingPage> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| HarvestError::parse(format!("malformed listing payload: {e}")))?;

    Ok(ListingPage {
        children: envelope.data.children,
        after: envelope.data.after.filter(|a| !a.is_empty()),
    })
}

/// Decode one child entry into a [`Post`].
pub fn decode_post(child: serde_json::Value) -> Result<Post> {
    serde_json::from_value::<Child>(child)
        .map(|child| child.data)
        .map_err(|e| HarvestError::parse(format!("malformed post: {e}")))
}

/// Rate-limit hints reported by the listing on every response.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimitHints {
    /// Calls left in the current window.
    pub remaining: Option<f64>,
    /// Seconds until the window resets.
    pub reset: Option<f64>,
}

impl RateLimitHints {
    /// Parse raw header values. Unparseable values count as absent.
    pub fn from_header_values(remaining: Option<&str>, reset: Option<&str>) -> Self {
        Self {
            remaining: remaining.and_then(parse_number),
            reset: reset.and_then(parse_number),
        }
    }

    /// Whether the window is used up and the caller should wait before the
    /// next request.
    pub fn exhausted(&self) -> bool {
        self.remaining.is_some_and(|r| r <= 0.0)
    }

    /// How long to wait for the window to reset, or `fallback` without a
    /// usable hint.
    pub fn reset_delay(&self, fallback: Duration) -> Duration {
        match self.reset {
            Some(secs) if secs >= 0.0 => Duration::try_from_secs_f64(secs).unwrap_or(fallback),
            _ => fallback,
        }
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listing_page() {
        let body = r#"{
            "kind": "Listing",
            "data": {
                "after": "t3_abc",
                "dist": 2,
                "children": [
                    {"kind": "t3", "data": {"title": "Newest", "author": "alice", "created_utc": 1700000300.0, "score": 5}},
                    {"kind": "t3", "data": {"title": "Older", "author": "bob", "created_utc": 1700000200}}
                ]
            }
        }"#;
        let page = parse_listing(body).expect("parse");
        assert_eq!(page.after.as_deref(), Some("t3_abc"));
        let posts: Vec<Post> = page
            .children
            .into_iter()
            .map(|c| decode_post(c).expect("post"))
            .collect();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].title, "Newest");
        assert_eq!(posts[1].author, "bob");
        assert_eq!(posts[1].created_utc, 1_700_000_200.0);
    }

    #[test]
    fn null_or_empty_after_means_last_page() {
        let page = parse_listing(r#"{"data": {"children": [], "after": null}}"#).unwrap();
        assert!(page.after.is_none());
        let page = parse_listing(r#"{"data": {"children": [], "after": ""}}"#).unwrap();
        assert!(page.after.is_none());
        let page = parse_listing(r#"{"data": {"children": []}}"#).unwrap();
        assert!(page.after.is_none());
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(parse_listing("<html>blocked</html>").is_err());
        assert!(parse_listing(r#"{"error": 403}"#).is_err());
    }

    #[test]
    fn bad_child_fails_alone() {
        let body = r#"{"data": {"children": [
            {"data": {"title": "ok", "author": "y", "created_utc": 5}},
            {"data": {"title": "x", "author": "y"}},
            {"data": {"title": "x", "author": null, "created_utc": 4}}
        ]}}"#;
        let mut children = parse_listing(body).expect("envelope").children.into_iter();

        assert!(decode_post(children.next().unwrap()).is_ok());
        let err = decode_post(children.next().unwrap()).unwrap_err();
        assert!(err.to_string().contains("created_utc"));
        assert!(decode_post(children.next().unwrap()).is_err());
    }

    #[test]
    fn rate_limit_hints() {
        let fallback = Duration::from_secs(60);

        let hints = RateLimitHints::from_header_values(Some("0.0"), Some("42"));
        assert!(hints.exhausted());
        assert_eq!(hints.reset_delay(fallback), Duration::from_secs(42));

        let hints = RateLimitHints::from_header_values(Some("598.0"), None);
        assert!(!hints.exhausted());
        assert_eq!(hints.reset_delay(fallback), Duration::from_secs(60));

        let hints = RateLimitHints::from_header_values(Some("-1"), Some("soon"));
        assert!(hints.exhausted());
        assert_eq!(hints.reset_delay(fallback), Duration::from_secs(60));

        let hints = RateLimitHints::from_header_values(None, None);
        assert!(!hints.exhausted());
    }
}
