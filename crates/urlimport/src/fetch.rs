//! Fetching module source over HTTP
//!
//! The resolver only depends on the [`Fetch`] trait. [`HttpFetcher`] is the
//! blocking HTTP/HTTPS implementation used outside of tests.

use reqwest::blocking::Client;
use std::io::Read;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during a fetch
///
/// These are transport-level failures. A non-200 response is not an error.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed (timeout, DNS, TLS, connection reset...)
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// IO error while reading the body
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Content too large
    #[error("Content too large: {size} bytes (max: {max})")]
    ContentTooLarge { size: u64, max: u64 },

    /// Body is not valid UTF-8
    #[error("Response body for {url} is not valid UTF-8")]
    InvalidEncoding { url: String },

    /// Any other transport failure
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Maximum size for a single module source (50 MB)
pub const MAX_CONTENT_SIZE: u64 = 50 * 1024 * 1024;

/// HTTP client configuration
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Status and body of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
}

impl FetchResponse {
    /// Create a response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Only 200 counts as success
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Capability to retrieve the body at a URL
///
/// Implementations block until the request completes. Any timeout must be
/// enforced here; the resolver has none of its own.
pub trait Fetch: Send + Sync {
    /// Fetch `url`, returning its status and body
    fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

impl<F> Fetch for F
where
    F: Fn(&str) -> Result<FetchResponse, FetchError> + Send + Sync,
{
    fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self(url)
    }
}

/// Blocking HTTP fetcher
pub struct HttpFetcher {
    client: Client,
    max_size: u64,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher with the default timeout
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    /// Create an HTTP fetcher with a custom request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("urlimport/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            max_size: MAX_CONTENT_SIZE,
        })
    }

    /// Set the maximum accepted body size
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        // Validate URL
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let response = self.client.get(url).send()?;
        let status = response.status().as_u16();

        // Non-success bodies are never persisted, skip reading them
        if status != 200 {
            return Ok(FetchResponse::new(status, String::new()));
        }

        // Check content length
        if let Some(len) = response.content_length() {
            if len > self.max_size {
                return Err(FetchError::ContentTooLarge {
                    size: len,
                    max: self.max_size,
                });
            }
        }

        // Read content with size limit
        let mut content = Vec::new();
        let mut reader = response.take(self.max_size + 1);
        reader.read_to_end(&mut content)?;

        if content.len() as u64 > self.max_size {
            return Err(FetchError::ContentTooLarge {
                size: content.len() as u64,
                max: self.max_size,
            });
        }

        let body = String::from_utf8(content).map_err(|_| FetchError::InvalidEncoding {
            url: url.to_string(),
        })?;

        Ok(FetchResponse { status, body })
    }
}
