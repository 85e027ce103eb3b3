use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, PoisonError,
    },
    time::Duration,
};

use crate::{
    config_cache::ConfigCache,
    configuration::{parse_configurations, FlagConfiguration},
    configuration_fetcher::{ConfigFetcher, RAC_ENDPOINT},
    Error, Result,
};

/// Fetches configuration through a [`ConfigFetcher`] and keeps the [`ConfigCache`] up to date.
///
/// Reads never touch the network: they are served from the cache, which keeps the last known good
/// configuration when a fetch fails.
pub struct ConfigRequestor {
    fetcher: Box<dyn ConfigFetcher + Send + Sync>,
    cache: ConfigCache,
    /// Set once the control plane rejected our API key.
    unauthorized: AtomicBool,
    /// Holds `None` until the first configuration is stored. Holds `Some(Err(...))` if a fatal error
    /// happened before that.
    first_fetch: (Mutex<Option<Result<()>>>, Condvar),
}

impl ConfigRequestor {
    /// Create a requestor storing configuration from `fetcher` into `cache`.
    pub fn new(fetcher: impl ConfigFetcher + Send + Sync + 'static, cache: ConfigCache) -> Self {
        ConfigRequestor::with_boxed_fetcher(Box::new(fetcher), cache)
    }

    pub(crate) fn with_boxed_fetcher(
        fetcher: Box<dyn ConfigFetcher + Send + Sync>,
        cache: ConfigCache,
    ) -> Self {
        ConfigRequestor {
            fetcher,
            cache,
            unauthorized: AtomicBool::new(false),
            first_fetch: (Mutex::new(None), Condvar::new()),
        }
    }

    /// Get the cached configuration of `flag_key`.
    ///
    /// `Ok(None)` means the flag is not configured or configuration has not been fetched yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] once the control plane has rejected the API key.
    pub fn get_configuration(&self, flag_key: &str) -> Result<Option<Arc<FlagConfiguration>>> {
        if self.unauthorized.load(Ordering::Acquire) {
            return Err(Error::Unauthorized);
        }
        Ok(self.cache.get(flag_key))
    }

    /// Fetch the current configuration and store it in the cache.
    ///
    /// The cache is updated only if the whole document parses. Transient failures (network,
    /// non-200 responses, malformed documents) are logged and leave the cache untouched.
    ///
    /// # Errors
    ///
    /// Returns fatal errors only ([`Error::Unauthorized`], [`Error::InvalidBaseUrl`]). They are
    /// not fixed by retrying, so the caller should stop polling.
    pub fn fetch_and_store_configurations(&self) -> Result<()> {
        log::debug!(target: "rac", "fetching new configuration");

        let configurations = self
            .fetcher
            .fetch(RAC_ENDPOINT)
            .and_then(parse_configurations);

        match configurations {
            Ok(configurations) => {
                let count = configurations.len();
                self.cache.put_all(configurations);
                log::debug!(target: "rac", count; "stored new configuration");
                self.set_first_fetch(Ok(()));
                Ok(())
            }
            Err(err) if err.is_fatal() => {
                log::warn!(target: "rac", "unrecoverable error while fetching configuration: {}", err);
                if matches!(err, Error::Unauthorized) {
                    self.unauthorized.store(true, Ordering::Release);
                }
                self.set_first_fetch(Err(err.clone()));
                Err(err)
            }
            Err(err) => {
                // Other errors are recoverable, we'll try again on the next poll.
                log::warn!(target: "rac", "error retrieving assignment configurations: {}", err);
                Ok(())
            }
        }
    }

    /// Block until the first configuration is stored, a fatal error occurs, or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] or [`Error::InvalidBaseUrl`] if fetching failed fatally.
    /// - [`Error::WaitTimeout`] if no configuration arrived within `timeout`.
    pub fn wait_for_configuration(&self, timeout: Duration) -> Result<()> {
        let (slot, ready) = &self.first_fetch;
        let lock = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (lock, _) = ready
            .wait_timeout_while(lock, timeout, |result| result.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        match &*lock {
            Some(result) => result.clone(),
            None => Err(Error::WaitTimeout),
        }
    }

    fn set_first_fetch(&self, result: Result<()>) {
        let (slot, ready) = &self.first_fetch;
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        // Keep the first outcome, unless configuration arrives after an earlier failure.
        if slot.is_none() || (result.is_ok() && matches!(*slot, Some(Err(_)))) {
            *slot = Some(result);
            ready.notify_all();
        }
    }
}
