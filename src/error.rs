use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the client.
///
/// Only [`Error::InvalidValue`] and [`Error::Unauthorized`] are ever returned from assignment
/// calls. The remaining variants describe background failures: they are logged and the client
/// keeps serving the last known good configuration.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A required argument is blank.
    #[error("invalid value for {0}: cannot be blank")]
    InvalidValue(&'static str),
    /// The control plane rejected the API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,
    /// The base URL cannot be turned into an endpoint URL.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    /// Network error while fetching configuration.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
    /// The control plane answered with an unexpected status code.
    #[error("received non-200 response while fetching configuration: {0}")]
    HttpStatus(u16),
    /// The configuration document could not be decoded.
    #[error("error parsing configuration")]
    ConfigurationParse(#[source] Arc<serde_json::Error>),
    /// The configuration document decoded but is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// I/O error, such as a failure to spawn the poller thread.
    #[error(transparent)]
    Io(Arc<std::io::Error>),
    /// The poll callback panicked.
    #[error("poller thread panicked")]
    PollerThreadPanicked,
    /// No configuration arrived before the wait timed out.
    #[error("timed out waiting for configuration")]
    WaitTimeout,
}

impl Error {
    /// Returns `true` for errors that cannot be fixed by retrying later.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Unauthorized | Error::InvalidBaseUrl(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        // Strip the URL as it carries the API key in its query string.
        Self::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::ConfigurationParse(Arc::new(value))
    }
}
