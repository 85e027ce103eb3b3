use std::{fmt, time::Duration};

use crate::{
    config_cache::ConfigCache, configuration_fetcher::ConfigFetcher, poller::PollerConfig,
    AssignmentLogger, Client, Result,
};

/// Configuration for [`Client`].
pub struct ClientConfig<'a> {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) assignment_logger: Option<Box<dyn AssignmentLogger + Send + Sync + 'a>>,
    pub(crate) config_fetcher: Option<Box<dyn ConfigFetcher + Send + Sync>>,
    pub(crate) poll_interval: Duration,
    pub(crate) poll_jitter: Duration,
    pub(crate) cache_capacity: usize,
}

impl<'a> ClientConfig<'a> {
    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = "https://eppo.cloud/api";

    /// Create a default configuration using the specified API key.
    ///
    /// ```
    /// # use rac_client::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            assignment_logger: None,
            config_fetcher: None,
            poll_interval: PollerConfig::DEFAULT_POLL_INTERVAL,
            poll_jitter: PollerConfig::DEFAULT_POLL_JITTER,
            cache_capacity: ConfigCache::DEFAULT_CAPACITY,
        }
    }

    /// Set assignment logger to pass variation assignments to your data warehouse.
    ///
    /// ```
    /// # use rac_client::ClientConfig;
    /// let mut config = ClientConfig::from_api_key("api-key");
    /// config.assignment_logger(|event: rac_client::AssignmentEvent| {
    ///     println!("{:?}", event);
    /// });
    /// ```
    pub fn assignment_logger(
        &mut self,
        assignment_logger: impl AssignmentLogger + Send + Sync + 'a,
    ) -> &mut Self {
        self.assignment_logger = Some(Box::new(assignment_logger));
        self
    }

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(&mut self, base_url: impl Into<String>) -> &mut Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the HTTP fetcher with a custom source of configuration documents. `base_url` is
    /// ignored when a custom fetcher is set.
    pub fn config_fetcher(&mut self, fetcher: impl ConfigFetcher + Send + Sync + 'static) -> &mut Self {
        self.config_fetcher = Some(Box::new(fetcher));
        self
    }

    /// Interval between configuration fetches.
    pub fn poll_interval(&mut self, interval: Duration) -> &mut Self {
        self.poll_interval = interval;
        self
    }

    /// Upper bound of the random duration subtracted from every poll interval.
    pub fn poll_jitter(&mut self, jitter: Duration) -> &mut Self {
        self.poll_jitter = jitter;
        self
    }

    /// Maximum number of flag configurations kept in memory.
    pub fn cache_capacity(&mut self, capacity: usize) -> &mut Self {
        self.cache_capacity = capacity;
        self
    }

    /// Create a new [`Client`] using the specified configuration. This starts polling for
    /// configuration in the background.
    ///
    /// ```no_run
    /// # use rac_client::{Client, ClientConfig};
    /// let client: Client = ClientConfig::from_api_key("api-key").to_client().unwrap();
    /// ```
    pub fn to_client(self) -> Result<Client<'a>> {
        Client::new(self)
    }

    pub(crate) fn poller_config(&self) -> PollerConfig {
        PollerConfig::new()
            .with_interval(self.poll_interval)
            .with_jitter(self.poll_jitter)
    }
}

// Hide the API key from logs.
impl fmt::Debug for ClientConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("has_assignment_logger", &self.assignment_logger.is_some())
            .field("poll_interval", &self.poll_interval)
            .field("poll_jitter", &self.poll_jitter)
            .field("cache_capacity", &self.cache_capacity)
            .finish_non_exhaustive()
    }
}
