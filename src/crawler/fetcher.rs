//! HTTP fetching
//!
//! Defines the [`Fetcher`] seam the worker pool and the politeness cache
//! fetch through, plus the default [`HttpFetcher`] built on
//! `reqwest::blocking`. Keeping the seam as a trait lets tests drive the
//! whole engine with a stub fetcher and no network.

use crate::config::Config;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Maximum redirect hops before a fetch is abandoned
const MAX_REDIRECTS: usize = 10;

/// Errors from a single fetch attempt
///
/// Network-level failures are classified so the worker loop can decide
/// whether a retry makes sense. HTTP error statuses are NOT errors here:
/// they come back as a [`FetchedPage`] with the status preserved, because
/// callers like the robots.txt cache need to see the exact status.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,

    /// TCP/TLS connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other request failure (redirect loop, body read error, ...)
    #[error("request failed: {0}")]
    Request(String),

    /// The HTTP client itself could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// Whether a retry of the same URL might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout | FetchError::Connect(_))
    }
}

/// A fetched HTTP response, successful at the transport level
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after following redirects; link resolution uses this
    pub final_url: Url,

    /// HTTP status code of the final response
    pub status_code: u16,

    /// Content-Type header value, if present
    pub content_type: Option<String>,

    /// Raw response body
    pub body: Vec<u8>,

    /// Wall time the fetch took
    pub elapsed: Duration,
}

impl FetchedPage {
    /// Whether the status code is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Whether the response declares an HTML content type
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
            .unwrap_or(false)
    }
}

/// The fetching seam
///
/// Implementations must be shareable across worker threads.
pub trait Fetcher: Send + Sync {
    /// Fetches a URL, following redirects
    ///
    /// Returns `Ok` for any HTTP response (the status code is preserved in
    /// the page) and `Err` only for transport-level failures.
    fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

/// Default fetcher on a blocking reqwest client
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a fetcher from the crawl configuration
    ///
    /// The client sends the composed User-Agent string, applies the
    /// configured request timeout, follows up to ten redirects, and
    /// transparently decompresses gzip/brotli bodies.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.user_agent_string())
            .timeout(Duration::from_secs(config.crawler.timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::limited(MAX_REDIRECTS))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let started = Instant::now();

        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(classify_error)?;

        let final_url = response.url().clone();
        let status_code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.bytes().map_err(classify_error)?.to_vec();

        Ok(FetchedPage {
            final_url,
            status_code,
            content_type,
            body,
            elapsed: started.elapsed(),
        })
    }
}

/// Classifies a reqwest error into the retry-relevant categories
fn classify_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_connect() {
        FetchError::Connect(e.to_string())
    } else {
        FetchError::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_fetcher() {
        let config = Config::default();
        assert!(HttpFetcher::new(&config).is_ok());
    }

    fn page(status: u16, content_type: Option<&str>) -> FetchedPage {
        FetchedPage {
            final_url: Url::parse("https://example.com/").unwrap(),
            status_code: status,
            content_type: content_type.map(|s| s.to_string()),
            body: Vec::new(),
            elapsed: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_is_success() {
        assert!(page(200, None).is_success());
        assert!(page(204, None).is_success());
        assert!(!page(301, None).is_success());
        assert!(!page(404, None).is_success());
        assert!(!page(500, None).is_success());
    }

    #[test]
    fn test_is_html() {
        assert!(page(200, Some("text/html")).is_html());
        assert!(page(200, Some("text/html; charset=utf-8")).is_html());
        assert!(page(200, Some("application/xhtml+xml")).is_html());
        assert!(!page(200, Some("application/json")).is_html());
        assert!(!page(200, None).is_html());
    }

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::Connect("refused".to_string()).is_transient());
        assert!(!FetchError::Request("bad body".to_string()).is_transient());
        assert!(!FetchError::Client("builder".to_string()).is_transient());
    }
}
