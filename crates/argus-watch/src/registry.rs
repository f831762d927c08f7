//! The live set of watch requests.
//!
//! Callers register roots and get back opaque [`WatchRequest`] tokens to use
//! for later removal. The registry keeps every request registered — including
//! dominated ones — and lazily derives the minimal covering set through
//! [`crate::normalize`]; the cached view is invalidated whenever the registry
//! changes.

use std::collections::HashSet;
use std::sync::Arc;

use argus_vfs::WatchPath;

use crate::normalize::{self, NormalizedView};

/// Index into the registry's request arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct RequestId(u32);

impl RequestId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Opaque handle to a registered watch request.
///
/// Identity is the `(root path, recursive)` pair plus the registration it
/// refers to; callers retain handles only to pass them back for removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchRequest {
    id: RequestId,
    root: WatchPath,
    recursive: bool,
}

impl WatchRequest {
    pub fn root_path(&self) -> &WatchPath {
        &self.root
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }
}

/// Arena entry backing one registration.
///
/// The arena is append-only: slots for removed requests are retained so that
/// a `RequestId` never gets reused and stale [`WatchRequest`] handles stay
/// inert instead of aliasing a newer registration. Registries live as long as
/// their service and see bounded churn, so the retained slots are a few
/// strings, not a leak worth a free-list.
#[derive(Debug)]
struct RequestSlot {
    root: WatchPath,
    recursive: bool,
}

#[derive(Debug, Default)]
pub(crate) struct WatchRegistry {
    arena: Vec<RequestSlot>,
    /// Live request ids in registration order (normalization input order).
    live: Vec<RequestId>,
    normalized: Option<Arc<NormalizedView>>,
}

impl WatchRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn token(&self, id: RequestId) -> WatchRequest {
        let slot = &self.arena[id.index()];
        WatchRequest {
            id,
            root: slot.root.clone(),
            recursive: slot.recursive,
        }
    }

    fn invalidate(&mut self) {
        self.normalized = None;
    }

    /// The current normalized view, rebuilding it if the registry changed.
    pub(crate) fn normalized(&mut self) -> Arc<NormalizedView> {
        if let Some(view) = &self.normalized {
            return Arc::clone(view);
        }
        let view = Arc::new(normalize::normalize(self.live.iter().map(|id| {
            let slot = &self.arena[id.index()];
            (*id, &slot.root, slot.recursive)
        })));
        self.normalized = Some(Arc::clone(&view));
        view
    }

    pub(crate) fn is_already_watched(&mut self, root: &WatchPath, recursive: bool) -> bool {
        self.normalized().is_already_watched(root, recursive)
    }

    fn find_live(&self, root: &WatchPath, recursive: bool) -> Option<RequestId> {
        self.live.iter().copied().find(|id| {
            let slot = &self.arena[id.index()];
            slot.recursive == recursive && slot.root == *root
        })
    }

    /// Registers a root to watch.
    ///
    /// An embedded archive separator is truncated to the on-disk prefix.
    /// Relative roots are invalid: they are skipped with a warning and `None`
    /// is returned, without affecting the rest of the batch.
    ///
    /// Returns the request handle and whether effective coverage changed
    /// (`false` when the new request is dominated or already registered).
    pub(crate) fn watch(
        &mut self,
        root: &WatchPath,
        recursive: bool,
    ) -> Option<(WatchRequest, bool)> {
        let root = root.strip_archive_suffix();
        if !root.is_absolute() {
            tracing::warn!(
                target = "argus.watch",
                root = %root,
                "invalid watch root, must be absolute; skipping"
            );
            return None;
        }

        if let Some(existing) = self.find_live(&root, recursive) {
            return Some((self.token(existing), false));
        }

        let dominated = self.is_already_watched(&root, recursive);
        let id = RequestId::from_index(self.arena.len());
        self.arena.push(RequestSlot {
            root,
            recursive,
        });
        self.live.push(id);
        self.invalidate();
        Some((self.token(id), !dominated))
    }

    /// Removes a request; returns whether effective coverage changed (`false`
    /// for dominated or unknown requests).
    pub(crate) fn remove(&mut self, request: &WatchRequest) -> bool {
        let Some(position) = self.live.iter().position(|id| *id == request.id) else {
            return false;
        };
        let was_effective = !self.normalized().dominated.contains(&request.id);
        self.live.remove(position);
        self.invalidate();
        was_effective
    }

    /// Atomically replaces `to_remove` with the desired recursive/flat root
    /// sets.
    ///
    /// When the desired sets structurally equal the roots of `to_remove` the
    /// call is a no-op: the same handles come back and no reconfiguration is
    /// signalled. Otherwise returns the handles for the desired roots and
    /// whether the watcher must be reconfigured.
    pub(crate) fn replace_watched_roots(
        &mut self,
        to_remove: &[WatchRequest],
        recursive_roots: &[WatchPath],
        flat_roots: &[WatchPath],
    ) -> (Vec<WatchRequest>, bool) {
        let current_recursive: HashSet<&WatchPath> = to_remove
            .iter()
            .filter(|request| request.recursive)
            .map(|request| &request.root)
            .collect();
        let current_flat: HashSet<&WatchPath> = to_remove
            .iter()
            .filter(|request| !request.recursive)
            .map(|request| &request.root)
            .collect();
        let desired_recursive: HashSet<&WatchPath> = recursive_roots.iter().collect();
        let desired_flat: HashSet<&WatchPath> = flat_roots.iter().collect();

        if current_recursive == desired_recursive && current_flat == desired_flat {
            tracing::debug!(
                target = "argus.watch",
                recursive = desired_recursive.len(),
                flat = desired_flat.len(),
                "same watch requests; keeping the current configuration"
            );
            return (to_remove.to_vec(), false);
        }

        let mut update = false;
        let mut result = Vec::new();
        let mut kept: HashSet<RequestId> = HashSet::new();

        for (roots, recursive) in [(recursive_roots, true), (flat_roots, false)] {
            for root in roots {
                if let Some((request, changed)) = self.watch(root, recursive) {
                    update |= changed;
                    kept.insert(request.id);
                    result.push(request);
                }
            }
        }

        for request in to_remove {
            // A desired root may resolve to an already-registered request that
            // is also listed for removal; it stays registered.
            if kept.contains(&request.id) {
                continue;
            }
            update |= self.remove(request);
        }

        (result, update)
    }

    /// Handles for every live request, in registration order.
    pub(crate) fn live_tokens(&self) -> Vec<WatchRequest> {
        self.live.iter().map(|id| self.token(*id)).collect()
    }

    /// Drops every registration (test support).
    pub(crate) fn clear(&mut self) {
        self.live.clear();
        self.invalidate();
    }
}
