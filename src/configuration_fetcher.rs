//! Fetching raw configuration documents from the control plane.
use std::{fmt, time::Duration};

use reqwest::{StatusCode, Url};

use crate::{Error, Result};

/// Source of raw configuration documents.
///
/// Implementations must report a rejected API key as [`Error::Unauthorized`]; every other failure
/// is treated as transient.
pub trait ConfigFetcher {
    /// Fetch the document served at `endpoint` (relative to the fetcher's base URL).
    fn fetch(&self, endpoint: &str) -> Result<serde_json::Value>;
}

impl<T: Fn(&str) -> Result<serde_json::Value>> ConfigFetcher for T {
    fn fetch(&self, endpoint: &str) -> Result<serde_json::Value> {
        self(endpoint)
    }
}

/// Endpoint serving the flag configuration document.
pub const RAC_ENDPOINT: &str = "/randomized_assignment/v3/config";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

// This applies only to failed DNS lookups and connection timeouts, never to requests where data
// has made it to the server.
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// [`ConfigFetcher`] that requests configuration over HTTP.
pub struct HttpConfigFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl HttpConfigFetcher {
    /// Create a fetcher for `base_url`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidBaseUrl`] if `base_url` cannot be joined with [`RAC_ENDPOINT`].
    /// - [`Error::Network`] if the HTTP client cannot be initialized.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<HttpConfigFetcher> {
        let fetcher = HttpConfigFetcher {
            client: reqwest::blocking::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            base_url: base_url.into(),
            api_key: api_key.into(),
        };
        // Validate base URL early, so misconfiguration is reported on client construction.
        fetcher.url(RAC_ENDPOINT)?;
        Ok(fetcher)
    }

    fn url(&self, endpoint: &str) -> Result<Url> {
        Url::parse_with_params(
            &format!("{}{}", self.base_url.trim_end_matches('/'), endpoint),
            &[
                ("apiKey", &*self.api_key),
                ("sdkName", "rust"),
                ("sdkVersion", env!("CARGO_PKG_VERSION")),
            ],
        )
        .map_err(Error::InvalidBaseUrl)
    }

    fn send(&self, url: Url) -> Result<reqwest::blocking::Response> {
        let mut attempt = 0;
        loop {
            match self.client.get(url.clone()).send() {
                Ok(response) => return Ok(response),
                Err(err) if (err.is_connect() || err.is_timeout()) && attempt < MAX_RETRIES => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    attempt += 1;
                    log::debug!(target: "rac", attempt; "retrying configuration request in {:?}", delay);
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(Error::from(err)),
            }
        }
    }
}

impl ConfigFetcher for HttpConfigFetcher {
    fn fetch(&self, endpoint: &str) -> Result<serde_json::Value> {
        let url = self.url(endpoint)?;

        log::debug!(target: "rac", endpoint; "fetching configuration");
        let response = self.send(url)?;

        check_status(response.status())?;

        let body = response.text()?;
        let document = serde_json::from_str(&body)?;

        log::debug!(target: "rac", endpoint; "successfully fetched configuration");
        Ok(document)
    }
}

fn check_status(status: StatusCode) -> Result<()> {
    match status {
        StatusCode::OK => Ok(()),
        StatusCode::UNAUTHORIZED => {
            log::warn!(target: "rac", "client is not authorized. Check your API key");
            Err(Error::Unauthorized)
        }
        code => Err(Error::HttpStatus(code.as_u16())),
    }
}

// Hide the API key from logs.
impl fmt::Debug for HttpConfigFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConfigFetcher")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
