//! In-memory stand-ins for the network and the clock.
//!
//! Enabled for this crate's tests and, through the `test-util` feature, for
//! downstream crates that drive a [`Fetcher`](crate::Fetcher) without real
//! HTTP or real waiting.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use postharvest_shared::{HarvestError, Result, SourceName};

use crate::client::{ListingClient, RawResponse};
use crate::listing::RateLimitHints;
use crate::retry::Sleeper;

/// Replays queued responses per source and records every request.
///
/// A source whose queue is empty answers with a non-retryable error so a
/// mis-scripted test ends instead of looping.
#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<RawResponse>>>>,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next exchange for `source`.
    pub fn push(&self, source: &str, exchange: Result<RawResponse>) -> &Self {
        self.scripts
            .lock()
            .expect("scripts lock")
            .entry(source.to_string())
            .or_default()
            .push_back(exchange);
        self
    }

    /// `(source, after)` for every request made, in order.
    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Cursors requested for one source, in order.
    pub fn cursors_for(&self, source: &str) -> Vec<Option<String>> {
        self.requests()
            .into_iter()
            .filter(|(s, _)| s == source)
            .map(|(_, after)| after)
            .collect()
    }
}

#[async_trait]
impl ListingClient for ScriptedClient {
    async fn get_page(&self, source: &SourceName, after: Option<&str>) -> Result<RawResponse> {
        self.requests
            .lock()
            .expect("requests lock")
            .push((source.to_string(), after.map(str::to_string)));

        let next = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get_mut(source.as_str())
            .and_then(VecDeque::pop_front);

        next.unwrap_or_else(|| {
            Err(HarvestError::protocol(format!(
                "no scripted response left for {source}"
            )))
        })
    }
}

/// Build a 200 listing response from `(title, created_utc)` pairs.
pub fn page(posts: &[(&str, f64)], after: Option<&str>) -> RawResponse {
    let children: Vec<serde_json::Value> = posts
        .iter()
        .map(|(title, created_utc)| {
            serde_json::json!({
                "kind": "t3",
                "data": { "title": title, "author": "tester", "created_utc": created_utc }
            })
        })
        .collect();

    RawResponse {
        status: 200,
        hints: RateLimitHints::default(),
        body: serde_json::json!({
            "kind": "Listing",
            "data": { "children": children, "after": after }
        })
        .to_string(),
    }
}

/// A bare response with `status` and an empty body.
pub fn status(status: u16) -> RawResponse {
    RawResponse {
        status,
        hints: RateLimitHints::default(),
        body: String::new(),
    }
}

/// A 429 response, optionally carrying a reset hint in seconds.
pub fn rate_limited(reset: Option<&str>) -> RawResponse {
    RawResponse {
        status: 429,
        hints: RateLimitHints::from_header_values(Some("0"), reset),
        body: String::new(),
    }
}

/// A connection-level failure.
pub fn network_error() -> Result<RawResponse> {
    Err(HarvestError::Network("connection reset by peer".into()))
}

/// Records requested sleeps and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every duration requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("sleeps lock").clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("sleeps lock").push(duration);
        tokio::task::yield_now().await;
    }
}
