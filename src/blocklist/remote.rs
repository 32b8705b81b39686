//! Remote URL blocklist loader.
//!
//! Downloads a blocklist once at startup and turns it into a [`DomainSet`].
//! There is no retry and no on-disk fallback: the caller decides what a
//! failed download means.

use std::io::BufReader;
use std::time::Duration;

use reqwest::Client;

use super::{BlocklistFormat, DomainSet, ParseError, parser_for_format};

/// Default timeout for HTTP requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent header value for HTTP requests.
const USER_AGENT: &str = concat!("dnsgate/", env!("CARGO_PKG_VERSION"));

/// Error type for fetching a remote resource.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP request failed with a non-success status code.
    #[error("HTTP request failed for {url}: status {status}")]
    HttpStatus {
        /// URL that was requested.
        url: String,
        /// HTTP status code returned.
        status: u16,
    },

    /// Network error during HTTP request.
    #[error("network error fetching {url}: {source}")]
    Network {
        /// URL that was requested.
        url: String,
        /// Underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// Timeout fetching the remote URL.
    #[error("timeout fetching {url}")]
    Timeout {
        /// URL that timed out.
        url: String,
    },

    /// Failed to create HTTP client.
    #[error("failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Error type for building a blocklist from a remote URL.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The list could not be downloaded.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The list was downloaded but contained no usable entry.
    #[error("blocklist at {url} contains no domains")]
    Empty {
        /// URL that was requested.
        url: String,
    },

    /// Error parsing the blocklist content.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Task join error from spawning a blocking task.
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Loads blocklists from remote URLs.
pub struct RemoteLoader {
    client: Client,
}

impl RemoteLoader {
    /// Create a new remote loader.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(FetchError::ClientBuild)?;

        Ok(Self { client })
    }

    /// Download a blocklist and build the domain set.
    ///
    /// The content is parsed in a blocking task so that multi-megabyte lists
    /// do not stall the async runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if:
    /// - The HTTP request fails ([`FetchError::Network`], [`FetchError::Timeout`])
    /// - The server returns a non-success status ([`FetchError::HttpStatus`])
    /// - No line of the content matches the grammar ([`LoadError::Empty`])
    pub async fn load(&self, url: &str, format: BlocklistFormat) -> Result<DomainSet, LoadError> {
        let content = self.fetch(url).await?;
        let bytes = content.len();

        let domains = tokio::task::spawn_blocking(move || {
            let parser = parser_for_format(format);
            let mut reader = BufReader::new(content.as_bytes());
            parser.parse(&mut reader)
        })
        .await??;

        let parsed = domains.len();
        let set = DomainSet::new(domains);
        if set.is_empty() {
            return Err(LoadError::Empty {
                url: url.to_string(),
            });
        }

        tracing::info!(
            url = %url,
            bytes,
            parsed,
            unique = set.len(),
            "loaded blocklist"
        );
        Ok(set)
    }

    /// Fetch the raw text of a URL.
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    source: err,
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.text().await.map_err(|err| FetchError::Network {
            url: url.to_string(),
            source: err,
        })
    }
}
