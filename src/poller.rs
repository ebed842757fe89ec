//! A background poller thread that periodically requests flag definitions from the remote store
//! and stores them in a configuration store.
use std::{
    sync::{mpsc::RecvTimeoutError, Arc, Condvar, Mutex},
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{
    fetcher::{ConfigurationFetcher, ConfigurationFetcherConfig},
    ConfigurationStore, Error, Result,
};

/// Configuration for [`PollerThread`].
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct PollerThreadConfig {
    /// Interval to wait between requests for flag definitions.
    pub interval: Duration,
    /// Randomized amount subtracted from `interval` so that many instances do not poll in sync.
    pub jitter: Duration,
}

impl PollerThreadConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);

    pub fn new() -> PollerThreadConfig {
        PollerThreadConfig::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> PollerThreadConfig {
        self.interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> PollerThreadConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for PollerThreadConfig {
    fn default() -> PollerThreadConfig {
        PollerThreadConfig {
            interval: PollerThreadConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerThreadConfig::DEFAULT_POLL_JITTER,
        }
    }
}

/// A flag table poller thread.
///
/// Refreshes the shared [`ConfigurationStore`] out of band. Snapshots captured earlier keep the
/// table they captured.
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,

    /// Holds `None` if nothing has been fetched yet, `Some(Ok(()))` after the first successful
    /// fetch, and `Some(Err(...))` if polling stopped with an unrecoverable error.
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl PollerThread {
    /// Start polling `base_url` on behalf of `store`.
    ///
    /// # Errors
    ///
    /// IO error if the thread failed to start.
    pub fn start(
        base_url: impl Into<String>,
        api_key: Option<String>,
        store: Arc<ConfigurationStore>,
        config: PollerThreadConfig,
    ) -> std::io::Result<PollerThread> {
        // `sync_channel` makes `stop_sender` `Sync`. A buffer of 1 is enough for a stop command.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let result = Arc::new((Mutex::new(None), Condvar::new()));
        let fetcher_config = ConfigurationFetcherConfig {
            base_url: base_url.into(),
            api_key,
        };

        let join_handle = {
            let result = Arc::clone(&result);
            let update_result = move |value| {
                if let Ok(mut slot) = result.0.lock() {
                    *slot = Some(value);
                }
                result.1.notify_all();
            };

            std::thread::Builder::new()
                .name("feature-lookup-poller".to_owned())
                .spawn(move || {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        // Created on the poller thread: the blocking client must not be dropped
                        // inside an async context.
                        let mut fetcher = ConfigurationFetcher::new(fetcher_config);

                        loop {
                            match fetcher.fetch_configuration() {
                                Ok(table) => {
                                    store.set_configuration(Arc::new(table));
                                    update_result(Ok(()));
                                }
                                Err(err @ (Error::Unauthorized | Error::InvalidBaseUrl(_))) => {
                                    // Unrecoverable errors
                                    update_result(Err(err));
                                    return;
                                }
                                Err(err) => {
                                    log::warn!(target: "feature_lookup", "error while fetching flag table: {err}");
                                }
                            }

                            let timeout = jitter(config.interval, config.jitter);
                            match stop_receiver.recv_timeout(timeout) {
                                Err(RecvTimeoutError::Timeout) => {}
                                Ok(()) => {
                                    log::debug!(target: "feature_lookup", "poller thread received stop command");
                                    return;
                                }
                                Err(RecvTimeoutError::Disconnected) => {
                                    log::debug!(target: "feature_lookup", "poller thread disconnected");
                                    return;
                                }
                            }
                        }
                    }));

                    if outcome.is_err() {
                        update_result(Err(Error::PollerThreadPanicked));
                    }
                })?
        };

        Ok(PollerThread {
            join_handle,
            stop_sender,
            result,
        })
    }

    /// Block until the first flag table has been fetched.
    ///
    /// # Errors
    ///
    /// - [`Error::PollerThreadPanicked`]
    /// - [`Error::Unauthorized`]
    /// - [`Error::InvalidBaseUrl`]
    pub fn wait_for_configuration(&self) -> Result<()> {
        let mut lock = self
            .result
            .0
            .lock()
            .map_err(|_| Error::PollerThreadPanicked)?;
        loop {
            match &*lock {
                Some(result) => return result.clone(),
                None => {
                    lock = self
                        .result
                        .1
                        .wait(lock)
                        .map_err(|_| Error::PollerThreadPanicked)?;
                }
            }
        }
    }

    /// Stop the poller thread without waiting for it to exit.
    pub fn stop(&self) {
        // A full buffer means a stop command is already pending; a disconnected one means the
        // thread is gone.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    pub fn shutdown(self) -> Result<()> {
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::{jitter, PollerThread, PollerThreadConfig};
    use crate::{ConfigurationStore, Error};

    #[test]
    fn jitter_stays_within_bounds() {
        let interval = Duration::from_secs(30);
        let spread = Duration::from_secs(3);

        for _ in 0..100 {
            let value = jitter(interval, spread);
            assert!(value <= interval);
            assert!(value >= interval - spread);
        }
    }

    #[test]
    fn jitter_never_underflows() {
        assert!(jitter(Duration::from_secs(1), Duration::from_secs(10)) <= Duration::from_secs(1));
    }

    #[test]
    fn invalid_base_url_stops_poller() {
        let store = Arc::new(ConfigurationStore::new());

        let poller = PollerThread::start(
            "not a url",
            None,
            store.clone(),
            PollerThreadConfig::new(),
        )
        .unwrap();

        assert!(matches!(
            poller.wait_for_configuration(),
            Err(Error::InvalidBaseUrl(_))
        ));
        assert!(store.get_configuration().is_none());
        poller.shutdown().unwrap();
    }
}
