//! Periodic refresh scheduling.
//!
//! [`RefreshDriver`] owns a background thread that drains the watcher through
//! [`WatchService::store_refresh_status_to_files`] on a fixed period. The
//! thread parks in a `select!` over the tick and a stop channel, so shutdown
//! is prompt rather than waiting out the current period.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel as channel;

use argus_vfs::{FileTree, FileWatcher};

use crate::service::WatchService;

/// Default polling period between watcher drains.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_millis(1000);

pub struct RefreshDriver {
    stop_tx: channel::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl RefreshDriver {
    /// Spawns the refresh thread polling `service` every `period`.
    pub fn start<T, W>(service: Arc<WatchService<T, W>>, period: Duration) -> anyhow::Result<Self>
    where
        T: FileTree + 'static,
        W: FileWatcher + 'static,
    {
        // Zero capacity: a stop request rendezvouses with (or is observed by
        // the disconnect of) the running thread.
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);

        let join = thread::Builder::new()
            .name("argus-refresh".to_string())
            .spawn(move || {
                let ticker = channel::tick(period);
                loop {
                    channel::select! {
                        recv(ticker) -> _ => {
                            service.store_refresh_status_to_files();
                        }
                        recv(stop_rx) -> _ => {
                            tracing::debug!(
                                target = "argus.watch",
                                "refresh thread stopping"
                            );
                            break;
                        }
                    }
                }
            })
            .context("failed to spawn refresh thread")?;

        Ok(Self {
            stop_tx,
            join: Some(join),
        })
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        // Ignore send errors: the thread may already be gone, and dropping the
        // sender disconnects the channel either way.
        let _ = self.stop_tx.send(());
        if join.join().is_err() {
            tracing::error!(target = "argus.watch", "refresh thread panicked");
        }
    }
}

impl Drop for RefreshDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Instant;

    use argus_vfs::{CachedTree, ManualWatcher, WatchPath};

    #[test]
    fn periodic_polling_propagates_reports_into_the_tree() {
        let watcher = ManualWatcher::new();
        let handle = watcher.handle();
        let service = Arc::new(WatchService::new(Arc::new(CachedTree::new()), watcher));
        let file = service.tree().intern_file(&WatchPath::new("/a/b.txt"));

        let driver =
            RefreshDriver::start(Arc::clone(&service), Duration::from_millis(5)).unwrap();
        handle.report_dirty_path(WatchPath::new("/a/b.txt"));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !file.is_dirty() {
            assert!(Instant::now() < deadline, "report was never applied");
            thread::sleep(Duration::from_millis(5));
        }

        driver.stop();
    }

    #[test]
    fn no_reports_are_applied_after_stop() {
        let watcher = ManualWatcher::new();
        let handle = watcher.handle();
        let service = Arc::new(WatchService::new(Arc::new(CachedTree::new()), watcher));
        let file = service.tree().intern_file(&WatchPath::new("/a/b.txt"));

        let period = Duration::from_millis(10);
        let driver = RefreshDriver::start(Arc::clone(&service), period).unwrap();
        driver.stop();

        handle.report_dirty_path(WatchPath::new("/a/b.txt"));
        thread::sleep(period * 5);

        assert!(!file.is_dirty());
    }

    #[test]
    fn stop_is_prompt_even_with_a_long_period() {
        let service = Arc::new(WatchService::new(
            Arc::new(CachedTree::new()),
            ManualWatcher::new(),
        ));
        let driver = RefreshDriver::start(service, Duration::from_secs(3600)).unwrap();

        let start = Instant::now();
        driver.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
