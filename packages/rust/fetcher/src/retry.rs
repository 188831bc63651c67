//! Wait policy for the listing walk: backoff counter, sleep seam, and the
//! states a walk moves through.

use std::time::Duration;

use async_trait::async_trait;

use postharvest_shared::FetchConfig;

/// Something that can suspend the current task. Production code sleeps on
/// the tokio timer; tests record the requested durations and return at once.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Delays applied by the fetcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Wait after a 429 or exhausted window when no reset hint is given.
    pub rate_limit_default: Duration,
    /// Ceiling for exponential backoff.
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_default: Duration::from_secs(60),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            rate_limit_default: config.rate_limit_default,
            backoff_cap: config.backoff_cap,
        }
    }
}

/// Consecutive-failure counter shared by 5xx responses and network errors.
///
/// The n-th consecutive failure waits `min(2^n, cap)` seconds. Rate-limit
/// responses neither bump nor clear the counter.
#[derive(Debug, Clone)]
pub struct Backoff {
    failures: u32,
    cap: Duration,
}

impl Backoff {
    pub fn new(cap: Duration) -> Self {
        Self { failures: 0, cap }
    }

    /// Record one more failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let secs = 1u64.checked_shl(self.failures).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.cap)
    }

    /// Clear the counter after a response that was not a server error.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Current consecutive-failure count.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Why a walk stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// An item at or below the watermark was reached.
    WatermarkReached,
    /// The listing had no further pages.
    Exhausted,
    /// An unexpected status or malformed payload ended the walk early.
    Aborted(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WatermarkReached => f.write_str("watermark reached"),
            Self::Exhausted => f.write_str("listing exhausted"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// States of one source's listing walk.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchState {
    /// Issue a request for the current cursor.
    Requesting,
    /// Wait out a rate-limit window, then request again.
    WaitingRateLimit(Duration),
    /// Wait after a server or network failure, then request again.
    WaitingBackoff(Duration),
    /// Walk finished normally.
    Done(StopReason),
    /// Walk ended on a non-retryable error; accumulated posts are kept.
    Failed(String),
}
