//! Incremental listing walker.
//!
//! The fetcher pages through a source's listing newest-first, collects posts
//! strictly newer than the source's watermark, and stops at the first post
//! that is not. Rate limits, server errors and network failures are waited
//! out and the same page is requested again; anything else ends the walk and
//! keeps what was collected so far.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use postharvest_shared::{FetchConfig, HarvestError, Post, Result, SourceName, Watermark};

use crate::client::{HttpListingClient, ListingClient, RawResponse};
use crate::listing::{decode_post, parse_listing};
use crate::retry::{Backoff, FetchState, RetryPolicy, Sleeper, StopReason, TokioSleeper};

// ---------------------------------------------------------------------------
// FetchOutcome
// ---------------------------------------------------------------------------

/// Result of one source's walk.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// New posts, newest first, all strictly above the watermark.
    pub posts: Vec<Post>,
    /// Pages successfully decoded.
    pub pages: usize,
    /// Why the walk ended.
    pub stop: StopReason,
}

impl FetchOutcome {
    /// Whether the walk ended early on a non-retryable error.
    pub fn is_partial(&self) -> bool {
        matches!(self.stop, StopReason::Aborted(_))
    }
}

// ---------------------------------------------------------------------------
// Walk (per-source state)
// ---------------------------------------------------------------------------

/// Mutable state of one source's walk. Owns the cursor and the accumulated
/// posts; discarded when the walk ends.
struct Walk {
    watermark: Watermark,
    policy: RetryPolicy,
    cursor: Option<String>,
    posts: Vec<Post>,
    pages: usize,
    backoff: Backoff,
}

impl Walk {
    fn new(watermark: Watermark, policy: RetryPolicy) -> Self {
        Self {
            watermark,
            policy,
            cursor: None,
            posts: Vec::new(),
            pages: 0,
            backoff: Backoff::new(policy.backoff_cap),
        }
    }

    /// Classify one exchange and decide the next state.
    fn on_exchange(&mut self, exchange: Result<RawResponse>) -> FetchState {
        let checked = exchange
            .and_then(|response| response.error_for_status(self.policy.rate_limit_default));

        match checked {
            Ok(response) => {
                self.backoff.reset();
                self.on_page(response)
            }
            Err(HarvestError::RateLimited { retry_after }) => {
                warn!(
                    after = ?self.cursor,
                    wait_secs = retry_after.as_secs_f64(),
                    "rate limit exceeded, waiting"
                );
                FetchState::WaitingRateLimit(retry_after)
            }
            Err(e) if e.is_transient() => {
                let wait = self.backoff.next_delay();
                warn!(
                    after = ?self.cursor,
                    error = %e,
                    retry = self.backoff.failures(),
                    wait_secs = wait.as_secs_f64(),
                    "request failed, backing off"
                );
                FetchState::WaitingBackoff(wait)
            }
            Err(e) => FetchState::Failed(e.to_string()),
        }
    }

    /// Consume a successful page. Children are decoded one at a time so a
    /// bad entry keeps the posts before it.
    fn on_page(&mut self, response: RawResponse) -> FetchState {
        let page = match parse_listing(&response.body) {
            Ok(page) => page,
            Err(e) => return FetchState::Failed(e.to_string()),
        };
        self.pages += 1;
        let received = page.children.len();

        for child in page.children {
            let post = match decode_post(child) {
                Ok(post) => post,
                Err(e) => {
                    warn!(page = self.pages, error = %e, "undecodable post, stopping");
                    return FetchState::Failed(e.to_string());
                }
            };
            if !post.is_newer_than(self.watermark) {
                debug!(
                    page = self.pages,
                    created_utc = post.created_utc,
                    "reached already-ingested post"
                );
                return FetchState::Done(StopReason::WatermarkReached);
            }
            self.posts.push(post);
        }

        debug!(
            page = self.pages,
            received,
            remaining = ?response.hints.remaining,
            after = ?page.after,
            "finished handling page"
        );

        let Some(next) = page.after else {
            return FetchState::Done(StopReason::Exhausted);
        };
        if self.cursor.as_deref() == Some(next.as_str()) {
            warn!(after = %next, "listing cursor did not advance, stopping");
            return FetchState::Done(StopReason::Exhausted);
        }
        self.cursor = Some(next);

        if response.hints.exhausted() {
            let wait = response.hints.reset_delay(self.policy.rate_limit_default);
            info!(
                after = ?self.cursor,
                wait_secs = wait.as_secs_f64(),
                "rate-limit window used up, pausing before next page"
            );
            return FetchState::WaitingRateLimit(wait);
        }

        FetchState::Requesting
    }

    fn finish(self, stop: StopReason) -> FetchOutcome {
        FetchOutcome {
            posts: self.posts,
            pages: self.pages,
            stop,
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Walks listings with the configured retry policy.
pub struct Fetcher {
    client: Arc<dyn ListingClient>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl Fetcher {
    /// Create a fetcher that talks HTTP and sleeps on the tokio timer.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let policy = RetryPolicy::from(&config);
        let client = HttpListingClient::new(config)?;
        Ok(Self::with_parts(
            Arc::new(client),
            Arc::new(TokioSleeper),
            policy,
        ))
    }

    /// Assemble a fetcher from explicit parts.
    pub fn with_parts(
        client: Arc<dyn ListingClient>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            sleeper,
            policy,
        }
    }

    /// Collect every post of `source` newer than `watermark`.
    ///
    /// Never fails: a walk cut short by an unexpected status or a malformed
    /// payload returns the posts gathered so far with
    /// [`StopReason::Aborted`]. Rate-limit and network retries are unbounded;
    /// wrap the call in a timeout to bound its runtime.
    #[instrument(skip_all, fields(source = %source, watermark = ?watermark))]
    pub async fn fetch_new(&self, source: &SourceName, watermark: Watermark) -> FetchOutcome {
        let mut walk = Walk::new(watermark, self.policy);
        let mut state = FetchState::Requesting;

        loop {
            state = match state {
                FetchState::Requesting => {
                    let exchange = self.client.get_page(source, walk.cursor.as_deref()).await;
                    walk.on_exchange(exchange)
                }
                FetchState::WaitingRateLimit(wait) | FetchState::WaitingBackoff(wait) => {
                    self.sleeper.sleep(wait).await;
                    FetchState::Requesting
                }
                FetchState::Done(stop) => {
                    let outcome = walk.finish(stop);
                    info!(
                        new_posts = outcome.posts.len(),
                        pages = outcome.pages,
                        stop = %outcome.stop,
                        "fetch finished"
                    );
                    return outcome;
                }
                FetchState::Failed(reason) => {
                    error!(
                        after = ?walk.cursor,
                        error = %reason,
                        kept = walk.posts.len(),
                        "fetch aborted, keeping posts gathered so far"
                    );
                    return walk.finish(StopReason::Aborted(reason));
                }
            };
        }
    }
}
