//! Transport seam between the fetcher and the remote listing.
//!
//! [`ListingClient`] performs exactly one HTTP exchange per call and never
//! retries; retry and wait decisions belong to the fetcher engine.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use postharvest_shared::{FetchConfig, HarvestError, Result, SourceName};

use crate::listing::{RATELIMIT_REMAINING, RATELIMIT_RESET, RateLimitHints};

/// Raw outcome of one listing request that reached the server.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Rate-limit headers.
    pub hints: RateLimitHints,
    /// Response body (possibly not JSON on error statuses).
    pub body: String,
}

impl RawResponse {
    /// Turn a non-2xx status into the matching error.
    ///
    /// A 429 carries the window reset from the headers, or `rate_limit_default`
    /// without one.
    pub fn error_for_status(self, rate_limit_default: Duration) -> Result<Self> {
        match self.status {
            200..=299 => Ok(self),
            429 => Err(HarvestError::RateLimited {
                retry_after: self.hints.reset_delay(rate_limit_default),
            }),
            500..=599 => Err(HarvestError::ServerError {
                status: self.status,
            }),
            other => Err(HarvestError::protocol(format!(
                "unexpected HTTP status {other}"
            ))),
        }
    }
}

/// One request against a source's listing.
///
/// Implementations return `Ok` for every response the server produced,
/// whatever its status, and [`HarvestError::Network`] when no complete
/// response arrived (connect failure, timeout, truncated body).
#[async_trait]
pub trait ListingClient: Send + Sync {
    async fn get_page(&self, source: &SourceName, after: Option<&str>) -> Result<RawResponse>;
}

/// [`ListingClient`] backed by `reqwest`.
pub struct HttpListingClient {
    client: Client,
    config: FetchConfig,
}

impl HttpListingClient {
    /// Build a client with the configured User-Agent and request timeout.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// `{base_url}/{source}.json`
    pub fn listing_url(&self, source: &SourceName) -> String {
        format!(
            "{}/{}.json",
            self.config.base_url.as_str().trim_end_matches('/'),
            source
        )
    }
}

#[async_trait]
impl ListingClient for HttpListingClient {
    async fn get_page(&self, source: &SourceName, after: Option<&str>) -> Result<RawResponse> {
        let url = self.listing_url(source);
        let limit = self.config.page_limit.to_string();

        let mut query: Vec<(&str, &str)> = vec![("limit", limit.as_str())];
        if let Some(cursor) = after {
            query.push(("after", cursor));
        }

        debug!(%url, ?after, "requesting listing page");

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let hints = RateLimitHints::from_header_values(
            headers
                .get(RATELIMIT_REMAINING)
                .and_then(|v| v.to_str().ok()),
            headers.get(RATELIMIT_RESET).and_then(|v| v.to_str().ok()),
        );

        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: body read failed: {e}")))?;

        Ok(RawResponse {
            status,
            hints,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base: &str) -> HttpListingClient {
        let config = FetchConfig::with_base_url(base).expect("config");
        HttpListingClient::new(config).expect("client")
    }

    fn foo() -> SourceName {
        SourceName::new("foo").unwrap()
    }

    #[test]
    fn builds_listing_url() {
        let client = client_for("https://www.reddit.com/r/");
        assert_eq!(
            client.listing_url(&foo()),
            "https://www.reddit.com/r/foo.json"
        );
    }

    #[tokio::test]
    async fn first_page_has_no_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/foo.json"))
            .and(query_param("limit", "100"))
            .and(query_param_is_missing("after"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-remaining", "99.0")
                    .insert_header("x-ratelimit-reset", "300")
                    .set_body_string(r#"{"data": {"children": [], "after": null}}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&format!("{}/r", server.uri()));
        let response = client.get_page(&foo(), None).await.expect("response");
        assert_eq!(response.status, 200);
        assert_eq!(response.hints.remaining, Some(99.0));
        assert_eq!(response.hints.reset, Some(300.0));
        assert!(response.body.contains("children"));
    }

    #[tokio::test]
    async fn passes_cursor_and_surfaces_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/foo.json"))
            .and(query_param("after", "t3_xyz"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = client_for(&format!("{}/r", server.uri()));
        let response = client
            .get_page(&foo(), Some("t3_xyz"))
            .await
            .expect("a 503 is still a response");
        assert_eq!(response.status, 503);
        assert_eq!(response.hints, RateLimitHints::default());
    }

    #[tokio::test]
    async fn connection_failure_is_network_error() {
        // Nothing listens on port 1.
        let client = client_for("http://127.0.0.1:1/r");
        let err = client.get_page(&foo(), None).await.unwrap_err();
        assert!(matches!(err, HarvestError::Network(_)));
        assert!(err.is_transient());
    }

    fn response(status: u16, reset: Option<&str>) -> RawResponse {
        RawResponse {
            status,
            hints: RateLimitHints::from_header_values(None, reset),
            body: String::new(),
        }
    }

    #[test]
    fn statuses_map_to_error_kinds() {
        let fallback = Duration::from_secs(60);

        assert!(response(200, None).error_for_status(fallback).is_ok());

        let err = response(429, Some("7"))
            .error_for_status(fallback)
            .unwrap_err();
        assert!(matches!(
            err,
            HarvestError::RateLimited { retry_after } if retry_after == Duration::from_secs(7)
        ));
        let err = response(429, None).error_for_status(fallback).unwrap_err();
        assert!(matches!(
            err,
            HarvestError::RateLimited { retry_after } if retry_after == fallback
        ));

        let err = response(502, None).error_for_status(fallback).unwrap_err();
        assert!(matches!(err, HarvestError::ServerError { status: 502 }));
        assert!(err.is_transient());

        let err = response(403, None).error_for_status(fallback).unwrap_err();
        assert!(matches!(err, HarvestError::Protocol { .. }));
        assert!(!err.is_transient());
        assert!(err.to_string().contains("403"));
    }
}
