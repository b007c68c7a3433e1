//! A background thread that periodically runs a datafile refresh task.
use std::{
    sync::{mpsc::RecvTimeoutError, Arc, Condvar, Mutex},
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{Error, Result};

/// Configuration for [`PollerThread`].
#[derive(Debug, Clone)]
pub struct PollerThreadConfig {
    /// Interval to wait between runs. `None` runs the task once and exits.
    pub interval: Option<Duration>,
    /// Random duration subtracted from every interval. This helps to avoid multiple instances
    /// synchronizing and producing spiky network load.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_JITTER`].
    pub jitter: Duration,
    /// Run the task right after the thread starts instead of waiting for the first interval.
    pub run_immediately: bool,
}

impl PollerThreadConfig {
    /// Default value for [`PollerThreadConfig::jitter`].
    pub const DEFAULT_JITTER: Duration = Duration::from_millis(500);

    /// Run the task once, right away.
    pub fn once() -> PollerThreadConfig {
        PollerThreadConfig {
            interval: None,
            jitter: Duration::ZERO,
            run_immediately: true,
        }
    }

    /// Run the task every `interval`.
    pub fn every(interval: Duration) -> PollerThreadConfig {
        PollerThreadConfig {
            interval: Some(interval),
            jitter: PollerThreadConfig::DEFAULT_JITTER.min(interval / 10),
            run_immediately: false,
        }
    }

    /// Update jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> PollerThreadConfig {
        self.jitter = jitter;
        self
    }

    /// Update whether the task runs right after the thread starts.
    pub fn with_run_immediately(mut self, run_immediately: bool) -> PollerThreadConfig {
        self.run_immediately = run_immediately;
        self
    }
}

/// A refresh poller thread.
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,

    /// Holds `None` until the task has run once, and the result of its latest run afterwards.
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,

    run_immediately: bool,
}

impl PollerThread {
    /// Start a thread running `task` as described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the thread failed to start.
    pub fn start(
        config: PollerThreadConfig,
        mut task: impl FnMut() -> Result<()> + Send + 'static,
    ) -> std::io::Result<PollerThread> {
        // `sync_channel` makes `stop_sender` `Sync`. A buffer of 1 is enough: `stop()` uses
        // `try_send()` and a full buffer means a stop command is already pending.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let result = Arc::new((Mutex::new(None), Condvar::new()));
        let run_immediately = config.run_immediately;

        let join_handle = {
            let result = Arc::clone(&result);
            let update_result = move |value| {
                if let Ok(mut slot) = result.0.lock() {
                    *slot = Some(value);
                }
                result.1.notify_all();
            };

            std::thread::Builder::new()
                .name("featurevisor-poller".to_owned())
                .spawn(move || {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        if config.run_immediately {
                            update_result(task());
                        }

                        let Some(interval) = config.interval else {
                            return;
                        };

                        loop {
                            let timeout = jitter(interval, config.jitter);
                            match stop_receiver.recv_timeout(timeout) {
                                Err(RecvTimeoutError::Timeout) => {}
                                Ok(()) => {
                                    log::debug!(target: "featurevisor", "poller thread received stop command");
                                    return;
                                }
                                Err(RecvTimeoutError::Disconnected) => {
                                    log::debug!(target: "featurevisor", "poller thread received disconnected");
                                    return;
                                }
                            }

                            log::debug!(target: "featurevisor", "refreshing datafile");
                            update_result(task());
                        }
                    }));

                    if outcome.is_err() {
                        log::error!(target: "featurevisor", "poller thread panicked");
                        update_result(Err(Error::PollerThreadPanicked));
                    }
                })?
        };

        Ok(PollerThread {
            join_handle,
            stop_sender,
            result,
            run_immediately,
        })
    }

    /// Whether the task runs right after the thread starts.
    pub fn runs_immediately(&self) -> bool {
        self.run_immediately
    }

    /// Block until the task has run at least once, and return the result of its latest run.
    ///
    /// # Errors
    ///
    /// Returns the task's error, or [`Error::PollerThreadPanicked`] if the thread panicked.
    pub fn wait_for_result(&self) -> Result<()> {
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

    /// Whether the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop. Calling it more than once is
    /// harmless.
    pub fn stop(&self) {
        // Err means the thread has exited already or a stop command is pending.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PollerThreadPanicked`] if the thread has panicked.
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
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::{PollerThread, PollerThreadConfig};
    use crate::Error;

    #[test]
    fn runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let poller = {
            let runs = runs.clone();
            PollerThread::start(PollerThreadConfig::once(), move || {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap()
        };

        assert!(poller.runs_immediately());
        assert!(poller.wait_for_result().is_ok());
        poller.shutdown().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runs_periodically_until_stopped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let poller = {
            let runs = runs.clone();
            PollerThread::start(
                PollerThreadConfig::every(Duration::from_millis(5)).with_jitter(Duration::ZERO),
                move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap()
        };
        assert!(!poller.runs_immediately());

        while runs.load(Ordering::SeqCst) < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }

        poller.stop();
        poller.stop();
        poller.shutdown().unwrap();

        let after_shutdown = runs.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
    }

    #[test]
    fn reports_task_errors() {
        let poller = PollerThread::start(PollerThreadConfig::once(), || {
            Err(Error::RefreshInProgress)
        })
        .unwrap();

        assert!(matches!(
            poller.wait_for_result(),
            Err(Error::RefreshInProgress)
        ));
    }

    #[test]
    fn reports_panics() {
        let poller = PollerThread::start(PollerThreadConfig::once(), || panic!("boom")).unwrap();

        assert!(matches!(
            poller.wait_for_result(),
            Err(Error::PollerThreadPanicked)
        ));
        // The panic is caught inside the thread, so it exits normally.
        assert!(poller.shutdown().is_ok());
    }
}

#[cfg(test)]
mod jitter_tests {
    use std::time::Duration;

    #[test]
    fn jitter_is_subtractive() {
        let interval = Duration::from_secs(30);
        let jitter = Duration::from_secs(30);

        let result = super::jitter(interval, jitter);

        assert!(result <= interval, "{result:?} must be <= {interval:?}");
    }

    #[test]
    fn jitter_truncates_to_zero() {
        let result = super::jitter(Duration::ZERO, Duration::from_secs(30));

        assert_eq!(result, Duration::ZERO);
    }

    #[test]
    fn jitter_works_with_zero_jitter() {
        let result = super::jitter(Duration::from_secs(30), Duration::ZERO);

        assert_eq!(result, Duration::from_secs(30));
    }
}
