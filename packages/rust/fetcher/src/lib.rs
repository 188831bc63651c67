//! Incremental, rate-limit-aware fetching of paginated listings.
//!
//! This crate provides:
//! - [`client`]: the [`ListingClient`] seam and its reqwest implementation
//! - [`listing`]: payload decoding and rate-limit header hints
//! - [`retry`]: backoff counter, [`Sleeper`] seam, walk states
//! - [`engine`]: [`Fetcher::fetch_new`], the watermark-bounded walk

pub mod client;
pub mod engine;
pub mod listing;
pub mod retry;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{HttpListingClient, ListingClient, RawResponse};
pub use engine::{FetchOutcome, Fetcher};
pub use listing::{ListingPage, RateLimitHints, decode_post, parse_listing};
pub use retry::{Backoff, FetchState, RetryPolicy, Sleeper, StopReason, TokioSleeper};
