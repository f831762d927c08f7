//! File watching.
//!
//! This module defines [`FileWatcher`], the watch layer's view of an OS-level
//! file-notification facility.
//!
//! # Ownership / layering
//!
//! `argus-vfs` owns all operating-system integration for file watching. The
//! watch-management layer (`argus-watch`) depends only on the [`FileWatcher`]
//! trait and the stable [`DirtyPaths`] report model.
//!
//! - The OS backend (a Notify-based implementation) lives here behind the
//!   `watch-notify` feature, keeping `notify` out of the default build.
//! - Backends accumulate change notifications into an in-memory queue;
//!   consumers periodically drain it with
//!   [`take_dirty_paths`](FileWatcher::take_dirty_paths), which never blocks
//!   on I/O.
//!
//! # Report model
//!
//! Backend events are collapsed into three categories of dirty paths:
//!
//! - **dirty_paths** — a single file or directory whose own state changed.
//! - **dirty_directories** — a directory whose *direct* children changed
//!   (something was created, removed, or renamed inside it).
//! - **dirty_paths_recursive** — a subtree that must be considered entirely
//!   stale (typically after the backend dropped events).
//!
//! Backends are allowed to be lossy; when events are dropped the backend must
//! degrade to reporting its roots in `dirty_paths_recursive` so consumers can
//! recover with a full re-scan of the affected subtrees.
//!
//! # Manual watch roots
//!
//! Roots a backend cannot natively watch (e.g. not yet created, or on an
//! unsupported filesystem) are exposed via
//! [`manual_watch_roots`](FileWatcher::manual_watch_roots); consumers must
//! assume those subtrees can always be stale.
//!
//! # Testing
//!
//! Avoid tests that rely on real OS watcher timing. Prefer the deterministic
//! injected watcher ([`ManualWatcher`]) and drive the consumer directly.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::path::WatchPath;

/// Accumulated change reports drained from a watcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyPaths {
    /// Paths whose own state changed; only the path itself is stale.
    pub dirty_paths: Vec<WatchPath>,
    /// Directories whose direct children changed (non-recursive).
    pub dirty_directories: Vec<WatchPath>,
    /// Subtrees that must be considered entirely stale.
    pub dirty_paths_recursive: Vec<WatchPath>,
}

impl DirtyPaths {
    pub fn is_empty(&self) -> bool {
        self.dirty_paths.is_empty()
            && self.dirty_directories.is_empty()
            && self.dirty_paths_recursive.is_empty()
    }

    pub fn merge(&mut self, other: DirtyPaths) {
        self.dirty_paths.extend(other.dirty_paths);
        self.dirty_directories.extend(other.dirty_directories);
        self.dirty_paths_recursive.extend(other.dirty_paths_recursive);
    }
}

/// Watcher collaborator contract.
///
/// Consumers reconfigure the watched root set with
/// [`set_watch_roots`](FileWatcher::set_watch_roots) and periodically drain
/// accumulated reports with [`take_dirty_paths`](FileWatcher::take_dirty_paths).
pub trait FileWatcher: Send {
    /// Whether native watching is available at all.
    ///
    /// A non-operational watcher is not an error; consumers degrade to
    /// conservative recursive dirtying.
    fn is_operational(&self) -> bool;

    /// Drains all reports accumulated since the last call.
    ///
    /// Never blocks beyond draining an in-memory queue.
    fn take_dirty_paths(&mut self) -> DirtyPaths;

    /// Replaces the watched root set. Fire-and-forget: roots that cannot be
    /// watched natively become [`manual_watch_roots`](FileWatcher::manual_watch_roots),
    /// they are not surfaced as errors.
    fn set_watch_roots(&mut self, recursive: Vec<WatchPath>, flat: Vec<WatchPath>);

    /// Roots the backend could not watch natively.
    fn manual_watch_roots(&self) -> Vec<WatchPath>;
}

impl<W: ?Sized + FileWatcher> FileWatcher for Box<W> {
    fn is_operational(&self) -> bool {
        self.as_ref().is_operational()
    }

    fn take_dirty_paths(&mut self) -> DirtyPaths {
        self.as_mut().take_dirty_paths()
    }

    fn set_watch_roots(&mut self, recursive: Vec<WatchPath>, flat: Vec<WatchPath>) {
        self.as_mut().set_watch_roots(recursive, flat)
    }

    fn manual_watch_roots(&self) -> Vec<WatchPath> {
        self.as_ref().manual_watch_roots()
    }
}

struct ManualState {
    operational: AtomicBool,
    inner: Mutex<ManualInner>,
}

#[derive(Default)]
struct ManualInner {
    pending: DirtyPaths,
    manual_roots: Vec<WatchPath>,
    set_watch_roots_calls: Vec<(Vec<WatchPath>, Vec<WatchPath>)>,
}

impl ManualState {
    #[track_caller]
    fn lock(&self) -> MutexGuard<'_, ManualInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(err) => {
                let loc = std::panic::Location::caller();
                tracing::error!(
                    target = "argus.vfs",
                    file = loc.file(),
                    line = loc.line(),
                    column = loc.column(),
                    error = %err,
                    "mutex poisoned; continuing with recovered guard"
                );
                err.into_inner()
            }
        }
    }
}

/// Deterministic watcher implementation for tests.
///
/// This watcher does not interact with the OS. Callers inject reports manually
/// via [`ManualWatcherHandle`], which stays valid after the watcher has been
/// moved into a service.
pub struct ManualWatcher {
    state: Arc<ManualState>,
}

/// Cloneable handle for injecting reports into (and inspecting) a
/// [`ManualWatcher`] after it has been moved elsewhere.
#[derive(Clone)]
pub struct ManualWatcherHandle {
    state: Arc<ManualState>,
}

impl ManualWatcher {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ManualState {
                operational: AtomicBool::new(true),
                inner: Mutex::new(ManualInner::default()),
            }),
        }
    }

    pub fn handle(&self) -> ManualWatcherHandle {
        ManualWatcherHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for ManualWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualWatcherHandle {
    /// Injects a single-path report.
    pub fn report_dirty_path(&self, path: WatchPath) {
        self.state.lock().pending.dirty_paths.push(path);
    }

    /// Injects a flat-directory report.
    pub fn report_dirty_directory(&self, path: WatchPath) {
        self.state.lock().pending.dirty_directories.push(path);
    }

    /// Injects a recursive-subtree report.
    pub fn report_dirty_recursive(&self, path: WatchPath) {
        self.state.lock().pending.dirty_paths_recursive.push(path);
    }

    pub fn set_operational(&self, operational: bool) {
        self.state.operational.store(operational, Ordering::Release);
    }

    pub fn set_manual_roots(&self, roots: Vec<WatchPath>) {
        self.state.lock().manual_roots = roots;
    }

    /// Root sets passed to [`FileWatcher::set_watch_roots`] (in call order).
    pub fn set_watch_roots_calls(&self) -> Vec<(Vec<WatchPath>, Vec<WatchPath>)> {
        self.state.lock().set_watch_roots_calls.clone()
    }

    /// The most recent root set handed to the watcher, if any.
    pub fn current_roots(&self) -> Option<(Vec<WatchPath>, Vec<WatchPath>)> {
        self.state.lock().set_watch_roots_calls.last().cloned()
    }
}

impl FileWatcher for ManualWatcher {
    fn is_operational(&self) -> bool {
        self.state.operational.load(Ordering::Acquire)
    }

    fn take_dirty_paths(&mut self) -> DirtyPaths {
        std::mem::take(&mut self.state.lock().pending)
    }

    fn set_watch_roots(&mut self, recursive: Vec<WatchPath>, flat: Vec<WatchPath>) {
        self.state
            .lock()
            .set_watch_roots_calls
            .push((recursive, flat));
    }

    fn manual_watch_roots(&self) -> Vec<WatchPath> {
        self.state.lock().manual_roots.clone()
    }
}

impl fmt::Debug for ManualWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualWatcher")
            .field("operational", &self.is_operational())
            .finish_non_exhaustive()
    }
}

#[cfg(any(test, feature = "watch-notify"))]
mod notify_impl {
    use super::*;

    #[cfg(feature = "watch-notify")]
    use crossbeam_channel as channel;
    use notify::EventKind;

    #[cfg(feature = "watch-notify")]
    use notify::{RecursiveMode, Watcher};
    #[cfg(feature = "watch-notify")]
    use std::io;
    #[cfg(feature = "watch-notify")]
    use std::path::Path;

    #[cfg(feature = "watch-notify")]
    const RAW_QUEUE_CAPACITY: usize = 4096;

    /// Collapses one backend event into [`DirtyPaths`] categories.
    ///
    /// Returns `true` when the event demands a full re-scan (the backend
    /// dropped or coalesced events).
    pub(super) fn collapse_event(event: &notify::Event, out: &mut DirtyPaths) -> bool {
        use notify::event::ModifyKind;

        // `notify` signals dropped events / overflows by marking the event with
        // `Flag::Rescan`; some backends also emit a path-less `EventKind::Other`.
        if matches!(event.attrs.flag(), Some(notify::event::Flag::Rescan))
            || (matches!(event.kind, EventKind::Other) && event.paths.is_empty())
        {
            return true;
        }

        match event.kind {
            // Entries appearing, disappearing, or changing name alter the
            // parent directory's listing as well as the entry itself.
            EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
                for path in &event.paths {
                    out.dirty_paths.push(WatchPath::from_native(path));
                    if let Some(parent) = path.parent() {
                        out.dirty_directories.push(WatchPath::from_native(parent));
                    }
                }
            }
            _ => {
                for path in &event.paths {
                    out.dirty_paths.push(WatchPath::from_native(path));
                }
            }
        }

        false
    }

    #[cfg(feature = "watch-notify")]
    fn try_send_or_overflow<T>(
        tx: &channel::Sender<T>,
        overflowed: &std::sync::atomic::AtomicBool,
        msg: T,
    ) {
        match tx.try_send(msg) {
            Ok(()) => {}
            Err(channel::TrySendError::Full(_)) => {
                overflowed.store(true, Ordering::Release);
            }
            Err(channel::TrySendError::Disconnected(_)) => {
                // The watcher is shutting down; dropping the message is fine.
            }
        }
    }

    /// `notify`-backed [`FileWatcher`].
    ///
    /// The notify callback pushes raw events into a bounded in-memory queue;
    /// [`FileWatcher::take_dirty_paths`] drains and collapses them. Overflow
    /// degrades into a recursive-dirty report for every configured root, the
    /// only safe recovery once events have been dropped.
    #[cfg(feature = "watch-notify")]
    pub struct NotifyWatcher {
        watcher: notify::RecommendedWatcher,
        raw_rx: channel::Receiver<notify::Result<notify::Event>>,
        overflowed: Arc<AtomicBool>,
        recursive_roots: Vec<WatchPath>,
        flat_roots: Vec<WatchPath>,
        watched: Vec<WatchPath>,
        manual_roots: Vec<WatchPath>,
    }

    #[cfg(feature = "watch-notify")]
    impl NotifyWatcher {
        pub fn new() -> io::Result<Self> {
            let (raw_tx, raw_rx) =
                channel::bounded::<notify::Result<notify::Event>>(RAW_QUEUE_CAPACITY);
            let overflowed = Arc::new(AtomicBool::new(false));

            let overflowed_cb = Arc::clone(&overflowed);
            let watcher = notify::recommended_watcher(move |res| {
                try_send_or_overflow(&raw_tx, overflowed_cb.as_ref(), res);
            })
            .map_err(io::Error::other)?;

            Ok(Self {
                watcher,
                raw_rx,
                overflowed,
                recursive_roots: Vec::new(),
                flat_roots: Vec::new(),
                watched: Vec::new(),
                manual_roots: Vec::new(),
            })
        }

        fn all_roots(&self) -> impl Iterator<Item = &WatchPath> {
            self.recursive_roots.iter().chain(self.flat_roots.iter())
        }

        fn watch_one(&mut self, root: &WatchPath, mode: RecursiveMode) {
            match self.watcher.watch(&root.to_native(), mode) {
                Ok(()) => self.watched.push(root.clone()),
                Err(err) => {
                    tracing::warn!(
                        target = "argus.vfs",
                        root = %root,
                        error = %err,
                        "cannot watch root natively; falling back to manual watching"
                    );
                    self.manual_roots.push(root.clone());
                }
            }
        }

        fn unwatch_path_best_effort(watcher: &mut notify::RecommendedWatcher, path: &Path) {
            if let Err(err) = watcher.unwatch(path) {
                tracing::debug!(
                    target = "argus.vfs",
                    path = %path.display(),
                    error = %err,
                    "failed to unwatch root"
                );
            }
        }
    }

    #[cfg(feature = "watch-notify")]
    impl FileWatcher for NotifyWatcher {
        fn is_operational(&self) -> bool {
            true
        }

        fn take_dirty_paths(&mut self) -> DirtyPaths {
            let mut out = DirtyPaths::default();
            let mut rescan = self.overflowed.swap(false, Ordering::AcqRel);

            for msg in self.raw_rx.try_iter() {
                match msg {
                    Ok(event) => rescan |= collapse_event(&event, &mut out),
                    Err(err) => {
                        // Many backends use errors to signal lost events.
                        tracing::warn!(
                            target = "argus.vfs",
                            error = %err,
                            "watcher backend error; degrading to a full re-scan"
                        );
                        rescan = true;
                    }
                }
            }

            if rescan {
                out = DirtyPaths {
                    dirty_paths_recursive: self.all_roots().cloned().collect(),
                    ..DirtyPaths::default()
                };
            }

            out
        }

        fn set_watch_roots(&mut self, recursive: Vec<WatchPath>, flat: Vec<WatchPath>) {
            for root in std::mem::take(&mut self.watched) {
                Self::unwatch_path_best_effort(&mut self.watcher, &root.to_native());
            }
            self.manual_roots.clear();

            self.recursive_roots = recursive;
            self.flat_roots = flat;

            for root in self.recursive_roots.clone() {
                self.watch_one(&root, RecursiveMode::Recursive);
            }
            for root in self.flat_roots.clone() {
                self.watch_one(&root, RecursiveMode::NonRecursive);
            }

            tracing::debug!(
                target = "argus.vfs",
                recursive = self.recursive_roots.len(),
                flat = self.flat_roots.len(),
                manual = self.manual_roots.len(),
                "watch roots reconfigured"
            );
        }

        fn manual_watch_roots(&self) -> Vec<WatchPath> {
            self.manual_roots.clone()
        }
    }

    #[cfg(feature = "watch-notify")]
    impl fmt::Debug for NotifyWatcher {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("NotifyWatcher")
                .field("recursive_roots", &self.recursive_roots.len())
                .field("flat_roots", &self.flat_roots.len())
                .field("manual_roots", &self.manual_roots.len())
                .finish_non_exhaustive()
        }
    }

}

#[cfg(feature = "watch-notify")]
pub use notify_impl::NotifyWatcher;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_watcher_drains_injected_reports_once() {
        let mut watcher = ManualWatcher::new();
        let handle = watcher.handle();

        handle.report_dirty_path(WatchPath::new("/a/b.txt"));
        handle.report_dirty_directory(WatchPath::new("/a"));
        handle.report_dirty_recursive(WatchPath::new("/r"));

        let report = watcher.take_dirty_paths();
        assert_eq!(report.dirty_paths, vec![WatchPath::new("/a/b.txt")]);
        assert_eq!(report.dirty_directories, vec![WatchPath::new("/a")]);
        assert_eq!(report.dirty_paths_recursive, vec![WatchPath::new("/r")]);

        assert!(watcher.take_dirty_paths().is_empty());
    }

    #[test]
    fn manual_watcher_records_root_reconfigurations() {
        let mut watcher = ManualWatcher::new();
        let handle = watcher.handle();

        watcher.set_watch_roots(vec![WatchPath::new("/a")], vec![WatchPath::new("/b")]);

        assert_eq!(
            handle.current_roots(),
            Some((vec![WatchPath::new("/a")], vec![WatchPath::new("/b")]))
        );
        assert_eq!(handle.set_watch_roots_calls().len(), 1);
    }

    #[test]
    fn manual_watcher_operational_flag_is_settable() {
        let watcher = ManualWatcher::new();
        let handle = watcher.handle();
        assert!(watcher.is_operational());

        handle.set_operational(false);
        assert!(!watcher.is_operational());
    }
}
