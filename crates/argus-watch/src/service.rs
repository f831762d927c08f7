//! The local-file-system watch service.
//!
//! [`WatchService`] ties the pieces together: callers hand it desired watch
//! roots, it keeps the registry and the OS watcher in sync (normalizing to the
//! minimal covering set), and periodically-drained watcher reports are
//! propagated into the cached file tree as dirty marks.
//!
//! All registry/watcher mutation happens under one mutex; dirty marking runs
//! outside it against a snapshot of the drained report, so marks may land for
//! roots removed concurrently — those resolve to cache misses and are dropped
//! harmlessly.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use argus_vfs::{FileTree, FileWatcher, WatchPath};

use crate::dirty;
use crate::normalize::EffectiveRoot;
use crate::registry::{WatchRegistry, WatchRequest};

pub struct WatchService<T: FileTree, W: FileWatcher> {
    tree: Arc<T>,
    state: Mutex<ServiceState<W>>,
}

struct ServiceState<W> {
    registry: WatchRegistry,
    watcher: W,
}

impl<T: FileTree, W: FileWatcher> WatchService<T, W> {
    pub fn new(tree: Arc<T>, watcher: W) -> Self {
        Self {
            tree,
            state: Mutex::new(ServiceState {
                registry: WatchRegistry::new(),
                watcher,
            }),
        }
    }

    pub fn tree(&self) -> &Arc<T> {
        &self.tree
    }

    #[track_caller]
    fn lock_state(&self) -> MutexGuard<'_, ServiceState<W>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(err) => {
                let loc = std::panic::Location::caller();
                tracing::error!(
                    target = "argus.watch",
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

    /// Atomically replaces `to_remove` with the desired recursive/flat roots
    /// and reconfigures the watcher if effective coverage changed.
    ///
    /// Calling this twice with identical desired sets is a no-op: the same
    /// handles come back and the watcher is not restarted.
    pub fn replace_watched_roots(
        &self,
        to_remove: &[WatchRequest],
        recursive_roots: &[WatchPath],
        flat_roots: &[WatchPath],
    ) -> Vec<WatchRequest> {
        let mut state = self.lock_state();
        let (result, update) =
            state
                .registry
                .replace_watched_roots(to_remove, recursive_roots, flat_roots);
        if update {
            Self::set_up_watcher(&mut state);
        }
        result
    }

    /// Registers a single root; reports whether it actually changed effective
    /// coverage (`false` when dominated). Invalid roots return `None`.
    pub fn watch(&self, root: &WatchPath, recursive: bool) -> Option<(WatchRequest, bool)> {
        let mut state = self.lock_state();
        let (request, changed) = state.registry.watch(root, recursive)?;
        if changed {
            Self::set_up_watcher(&mut state);
        }
        Some((request, changed))
    }

    /// Removes a previously returned request handle.
    pub fn remove_watched_root(&self, request: &WatchRequest) {
        let mut state = self.lock_state();
        if state.registry.remove(request) {
            Self::set_up_watcher(&mut state);
        }
    }

    /// Whether `root` is already covered by the current effective watch set.
    pub fn is_already_watched(&self, root: &WatchPath, recursive: bool) -> bool {
        self.lock_state().registry.is_already_watched(root, recursive)
    }

    /// The current minimal covering set, sorted by root path.
    pub fn effective_watch_roots(&self) -> Vec<EffectiveRoot> {
        self.lock_state().registry.normalized().effective.clone()
    }

    /// Handles for every live request, dominated ones included.
    pub fn watched_requests(&self) -> Vec<WatchRequest> {
        self.lock_state().registry.live_tokens()
    }

    fn set_up_watcher(state: &mut ServiceState<W>) {
        if !state.watcher.is_operational() {
            return;
        }

        let view = state.registry.normalized();
        let mut recursive = Vec::new();
        let mut flat = Vec::new();
        for root in &view.effective {
            if root.recursive {
                recursive.push(root.root.clone());
            } else {
                flat.push(root.root.clone());
            }
        }

        tracing::debug!(
            target = "argus.watch",
            recursive = recursive.len(),
            flat = flat.len(),
            "setting up file watcher"
        );
        state.watcher.set_watch_roots(recursive, flat);
    }

    /// Drains the watcher and stores the accumulated refresh status into the
    /// cached tree (the periodic-poll entry point).
    ///
    /// Idempotent: marking is monotonic and draining consumes the reports.
    pub fn store_refresh_status_to_files(&self) {
        let report = {
            let mut state = self.lock_state();
            if !state.watcher.is_operational() {
                return;
            }
            state.watcher.take_dirty_paths()
        };
        dirty::apply_dirty_report(&*self.tree, &report);
    }

    /// Marks files that may have drifted without a targeted report.
    ///
    /// With an operational watcher the only untracked drift sources are its
    /// manual watch roots, so those are marked recursively and `candidates`
    /// is ignored. Without one, targeted reports cannot be trusted at all and
    /// every candidate subtree is marked instead.
    pub fn mark_suspicious_files_dirty(&self, candidates: &[WatchPath]) {
        self.store_refresh_status_to_files();

        let manual_roots = {
            let state = self.lock_state();
            if state.watcher.is_operational() {
                Some(state.watcher.manual_watch_roots())
            } else {
                None
            }
        };

        match manual_roots {
            Some(roots) => {
                for root in &roots {
                    dirty::mark_recursive_dir_dirty(&*self.tree, root);
                }
            }
            None => {
                for candidate in candidates {
                    dirty::mark_recursive_dir_dirty(&*self.tree, candidate);
                }
            }
        }
    }

    /// Degraded full refresh: marks every registered root's cached subtree
    /// dirty recursively, bypassing the watcher entirely.
    pub fn refresh_without_watcher(&self) {
        let roots: Vec<WatchPath> = self
            .lock_state()
            .registry
            .live_tokens()
            .into_iter()
            .map(|request| request.root_path().clone())
            .collect();
        for root in &roots {
            dirty::mark_recursive_dir_dirty(&*self.tree, root);
        }
    }

    /// Drops every registration without touching the watcher (test support).
    pub fn clear_watched_roots(&self) {
        self.lock_state().registry.clear();
    }
}

impl<T: FileTree, W: FileWatcher> fmt::Debug for WatchService<T, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use argus_vfs::{CachedTree, ManualWatcher, ManualWatcherHandle};

    fn path(s: &str) -> WatchPath {
        WatchPath::new(s)
    }

    fn service() -> (WatchService<CachedTree, ManualWatcher>, ManualWatcherHandle) {
        let watcher = ManualWatcher::new();
        let handle = watcher.handle();
        (WatchService::new(Arc::new(CachedTree::new()), watcher), handle)
    }

    #[test]
    fn reconfiguration_pushes_the_normalized_minimal_set() {
        let (service, handle) = service();

        service.replace_watched_roots(&[], &[path("/a")], &[path("/a/b"), path("/c")]);

        assert_eq!(
            handle.current_roots(),
            Some((vec![path("/a")], vec![path("/c")]))
        );
    }

    #[test]
    fn identical_replace_does_not_restart_the_watcher() {
        let (service, handle) = service();

        let tokens = service.replace_watched_roots(&[], &[path("/a")], &[path("/b")]);
        assert_eq!(handle.set_watch_roots_calls().len(), 1);

        let same = service.replace_watched_roots(&tokens, &[path("/a")], &[path("/b")]);
        assert_eq!(same, tokens);
        assert_eq!(handle.set_watch_roots_calls().len(), 1);
    }

    #[test]
    fn dominated_watch_does_not_restart_the_watcher() {
        let (service, handle) = service();

        service.watch(&path("/a"), true).unwrap();
        assert_eq!(handle.set_watch_roots_calls().len(), 1);

        let (_, changed) = service.watch(&path("/a/b"), false).unwrap();
        assert!(!changed);
        assert_eq!(handle.set_watch_roots_calls().len(), 1);
    }

    #[test]
    fn removing_a_dominating_root_reconfigures_with_the_resurrected_set() {
        let (service, handle) = service();

        let (dominating, _) = service.watch(&path("/a"), true).unwrap();
        service.watch(&path("/a/b"), false).unwrap();

        service.remove_watched_root(&dominating);

        assert_eq!(
            handle.current_roots(),
            Some((Vec::new(), vec![path("/a/b")]))
        );
    }

    #[test]
    fn refresh_status_applies_all_three_report_categories() {
        let (service, handle) = service();
        let tree = Arc::clone(service.tree());

        let single = tree.intern_file(&path("/s/file.txt"));
        let flat_dir = tree.intern_dir(&path("/f"));
        let flat_child = tree.intern_file(&path("/f/child.txt"));
        let flat_grandchild = tree.intern_file(&path("/f/sub/grand.txt"));
        let rec_dir = tree.intern_dir(&path("/r"));
        let rec_grandchild = tree.intern_file(&path("/r/sub/grand.txt"));

        handle.report_dirty_path(path("/s/file.txt"));
        handle.report_dirty_directory(path("/f"));
        handle.report_dirty_recursive(path("/r"));

        service.store_refresh_status_to_files();

        assert!(single.is_dirty());
        assert!(flat_dir.is_dirty());
        assert!(flat_child.is_dirty());
        assert!(!flat_grandchild.is_dirty());
        assert!(rec_dir.is_dirty());
        assert!(rec_grandchild.is_dirty());
    }

    #[test]
    fn refresh_status_is_skipped_when_the_watcher_is_down() {
        let (service, handle) = service();
        let tree = Arc::clone(service.tree());
        let file = tree.intern_file(&path("/a/b.txt"));

        handle.report_dirty_path(path("/a/b.txt"));
        handle.set_operational(false);

        service.store_refresh_status_to_files();
        assert!(!file.is_dirty());
    }

    #[test]
    fn reports_for_just_removed_roots_are_dropped_harmlessly() {
        let (service, handle) = service();
        let tree = Arc::clone(service.tree());
        let kept = tree.intern_file(&path("/kept.txt"));

        handle.report_dirty_path(path("/gone/file.txt"));
        handle.report_dirty_path(path("/kept.txt"));

        service.store_refresh_status_to_files();
        assert!(kept.is_dirty());
    }

    #[test]
    fn suspicious_files_use_manual_roots_when_operational() {
        let (service, handle) = service();
        let tree = Arc::clone(service.tree());

        let manual = tree.intern_dir(&path("/manual"));
        let manual_child = tree.intern_file(&path("/manual/x.txt"));
        let candidate = tree.intern_file(&path("/candidate.txt"));

        handle.set_manual_roots(vec![path("/manual")]);
        service.mark_suspicious_files_dirty(&[path("/candidate.txt")]);

        assert!(manual.is_dirty());
        assert!(manual_child.is_dirty());
        assert!(!candidate.is_dirty());
    }

    #[test]
    fn suspicious_files_use_candidates_when_the_watcher_is_down() {
        let (service, handle) = service();
        let tree = Arc::clone(service.tree());

        let manual = tree.intern_dir(&path("/manual"));
        let candidate = tree.intern_dir(&path("/candidate"));
        let candidate_child = tree.intern_file(&path("/candidate/x.txt"));

        handle.set_manual_roots(vec![path("/manual")]);
        handle.set_operational(false);
        service.mark_suspicious_files_dirty(&[path("/candidate")]);

        assert!(candidate.is_dirty());
        assert!(candidate_child.is_dirty());
        assert!(!manual.is_dirty());
    }

    #[test]
    fn refresh_without_watcher_marks_registered_roots_recursively() {
        let (service, _handle) = service();
        let tree = Arc::clone(service.tree());

        let root = tree.intern_dir(&path("/a"));
        let leaf = tree.intern_file(&path("/a/sub/leaf.txt"));
        let outside = tree.intern_file(&path("/other.txt"));

        service.watch(&path("/a"), true).unwrap();
        service.refresh_without_watcher();

        assert!(root.is_dirty());
        assert!(leaf.is_dirty());
        assert!(!outside.is_dirty());
    }

    #[test]
    fn clear_watched_roots_keeps_the_watcher_untouched() {
        let (service, handle) = service();

        service.watch(&path("/a"), true).unwrap();
        let calls = handle.set_watch_roots_calls().len();

        service.clear_watched_roots();
        assert!(service.watched_requests().is_empty());
        assert_eq!(handle.set_watch_roots_calls().len(), calls);
    }

    #[test]
    fn is_already_watched_reflects_the_live_registry() {
        let (service, _handle) = service();

        assert!(!service.is_already_watched(&path("/a/b/c"), false));
        service.watch(&path("/a"), true).unwrap();
        assert!(service.is_already_watched(&path("/a/b/c"), false));
    }
}
