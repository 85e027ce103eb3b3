//! A background poller thread that periodically invokes a callback (normally fetching and storing
//! new configuration).
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::JoinHandle,
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{Error, Result};

/// Configuration for [`Poller`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval to wait between callback invocations.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Upper bound of a random duration subtracted from every interval. This helps to avoid
    /// multiple client instances synchronizing and producing spiky network load.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
}

impl PollerConfig {
    /// Default value for [`PollerConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
    /// Default value for [`PollerConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(30);

    /// Create a default poller configuration.
    pub fn new() -> PollerConfig {
        PollerConfig::default()
    }

    /// Update the poll interval with `interval`.
    pub fn with_interval(mut self, interval: Duration) -> PollerConfig {
        self.interval = interval;
        self
    }

    /// Update the poll jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> PollerConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for PollerConfig {
    fn default() -> PollerConfig {
        PollerConfig {
            interval: PollerConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerConfig::DEFAULT_POLL_JITTER,
        }
    }
}

/// Lifecycle state of a [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Created, never started.
    Idle,
    /// The poller thread is invoking the callback.
    Running,
    /// Stopped explicitly or after a callback failure. Can be started again.
    Stopped,
}

type Callback = dyn Fn() -> Result<()> + Send + Sync;

/// Repeatedly invokes a callback on a background thread.
///
/// The callback is expected to handle its own recoverable errors. If it returns an error (or
/// panics), the error is logged and the poller stops itself.
///
/// [`Poller::start`] and [`Poller::stop`] can be called from any thread.
pub struct Poller {
    config: PollerConfig,
    callback: Arc<Callback>,
    shared: Arc<Shared>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    status: Mutex<Status>,
    /// Notified on every state change to wake the poller thread from its wait.
    wakeup: Condvar,
}

struct Status {
    state: PollerState,
    /// Incremented on every start, so a thread from a previous run never picks up a later one.
    generation: u64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        let status = self.lock();
        status.state == PollerState::Running && status.generation == generation
    }

    /// Stop the run identified by `generation`, unless it was already stopped or superseded.
    fn halt(&self, generation: u64) {
        let mut status = self.lock();
        if status.generation == generation {
            status.state = PollerState::Stopped;
        }
        self.wakeup.notify_all();
    }
}

impl Poller {
    /// Create a new idle poller. Call [`Poller::start`] to begin polling.
    pub fn new(config: PollerConfig, callback: impl Fn() -> Result<()> + Send + Sync + 'static) -> Poller {
        Poller {
            config,
            callback: Arc::new(callback),
            shared: Arc::new(Shared {
                status: Mutex::new(Status {
                    state: PollerState::Idle,
                    generation: 0,
                }),
                wakeup: Condvar::new(),
            }),
            join_handle: Mutex::new(None),
        }
    }

    /// Start the poller thread. The callback is invoked immediately and then after every interval.
    ///
    /// Starting an already running poller is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the thread could not be spawned.
    pub fn start(&self) -> Result<()> {
        let generation = {
            let mut status = self.shared.lock();
            if status.state == PollerState::Running {
                return Ok(());
            }
            status.state = PollerState::Running;
            status.generation += 1;
            status.generation
        };

        let shared = Arc::clone(&self.shared);
        let callback = Arc::clone(&self.callback);
        let config = self.config.clone();

        let spawned = std::thread::Builder::new()
            .name("rac-poller".to_owned())
            .spawn(move || poll(&shared, &*callback, &config, generation));

        match spawned {
            Ok(join_handle) => {
                log::debug!(target: "rac", "poller thread started");
                // A handle left from a run that stopped itself belongs to a thread that has
                // exited or is about to exit, so it is fine to detach it.
                *self.join_handle_slot() = Some(join_handle);
                Ok(())
            }
            Err(err) => {
                self.shared.halt(generation);
                Err(Error::from(err))
            }
        }
    }

    /// Stop the poller, interrupting any in-progress wait, and wait for the poller thread to exit.
    ///
    /// An in-flight callback invocation is allowed to complete; no invocation starts after this
    /// returns. Calling `stop` repeatedly or concurrently is safe. When called from within the
    /// callback itself, it only signals the thread to stop.
    pub fn stop(&self) {
        self.signal_stop();

        let join_handle = self.join_handle_slot().take();
        if let Some(join_handle) = join_handle {
            if join_handle.thread().id() == std::thread::current().id() {
                return;
            }
            // Err means the thread has panicked outside of the callback, and there's nothing
            // useful we can do in that case.
            if join_handle.join().is_err() {
                log::warn!(target: "rac", "poller thread panicked");
            }
            log::debug!(target: "rac", "poller thread stopped");
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PollerState {
        self.shared.lock().state
    }

    /// Returns `true` once the poller has stopped.
    pub fn is_stopped(&self) -> bool {
        self.state() == PollerState::Stopped
    }

    fn signal_stop(&self) {
        self.shared.lock().state = PollerState::Stopped;
        self.shared.wakeup.notify_all();
    }

    fn join_handle_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.join_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        // Only signal here: the thread exits on its own, and joining in drop could block the
        // owner for the length of an in-flight callback.
        self.signal_stop();
    }
}

fn poll(shared: &Shared, callback: &Callback, config: &PollerConfig, generation: u64) {
    while shared.is_current(generation) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback))
            .unwrap_or(Err(Error::PollerThreadPanicked));

        if let Err(err) = result {
            log::error!(target: "rac", "unexpected error running poll task: {}", err);
            shared.halt(generation);
            return;
        }

        let timeout = jitter(config.interval, config.jitter);
        let status = shared.lock();
        // Returns early as soon as the poller is stopped or restarted.
        let _ = shared
            .wakeup
            .wait_timeout_while(status, timeout, |status| {
                status.state == PollerState::Running && status.generation == generation
            })
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
