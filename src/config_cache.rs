//! A thread-safe, fixed-capacity LRU cache of flag configurations.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use crate::configuration::FlagConfiguration;

/// `ConfigCache` holds the most recent configuration of every flag, keyed by flag key.
///
/// Readers take a shared lock and may run concurrently. Recency is tracked with an atomic access
/// stamp per entry, so promoting a key on [`ConfigCache::get`] does not need exclusive access.
/// [`ConfigCache::put_all`] holds the write lock for the whole batch, so readers never observe a
/// partially applied batch.
pub struct ConfigCache {
    entries: RwLock<HashMap<String, Entry>>,
    /// Monotonic access clock. Higher stamp means more recently used.
    clock: AtomicU64,
    capacity: usize,
}

struct Entry {
    configuration: Arc<FlagConfiguration>,
    last_access: AtomicU64,
}

impl ConfigCache {
    /// Default number of flag configurations kept in memory.
    pub const DEFAULT_CAPACITY: usize = 1000;

    /// Create an empty cache that holds at most `capacity` entries.
    pub fn new(capacity: usize) -> ConfigCache {
        ConfigCache {
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached configurations.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get configuration of `key`, marking it as most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<FlagConfiguration>> {
        // Keep serving stored configuration even if a writer panicked.
        let entries = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key)?;
        entry.last_access.fetch_max(self.tick(), Ordering::Relaxed);
        Some(Arc::clone(&entry.configuration))
    }

    /// Insert or overwrite a batch of configurations, evicting least recently used entries until
    /// the cache is back within capacity.
    pub fn put_all(&self, configurations: HashMap<String, FlagConfiguration>) {
        // Wrapping values before requesting the lock to minimize lock span.
        let batch: Vec<(String, Arc<FlagConfiguration>)> = configurations
            .into_iter()
            .map(|(key, configuration)| (key, Arc::new(configuration)))
            .collect();

        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for (key, configuration) in batch {
            let entry = Entry {
                configuration,
                last_access: AtomicU64::new(self.tick()),
            };
            entries.insert(key, entry);

            while entries.len() > self.capacity {
                let Some(lru_key) = least_recently_used(&entries) else {
                    break;
                };
                log::trace!(target: "rac", flag_key:display = lru_key; "evicting configuration");
                entries.remove(&lru_key);
            }
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for ConfigCache {
    fn default() -> Self {
        ConfigCache::new(ConfigCache::DEFAULT_CAPACITY)
    }
}

fn least_recently_used(entries: &HashMap<String, Entry>) -> Option<String> {
    entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_access.load(Ordering::Relaxed))
        .map(|(key, _)| key.clone())
}
