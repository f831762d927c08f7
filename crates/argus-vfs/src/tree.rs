use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::HashMap;

use crate::path::WatchPath;

/// Kind of a cached node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// Result of a cache lookup.
///
/// A [`CachedLookup::Miss`] is "nothing to do" for dirty propagation, never an
/// error: the authoritative filesystem state is observed on the next explicit
/// traversal.
#[derive(Debug, Clone)]
pub enum CachedLookup<N> {
    Directory(N),
    File(N),
    Miss,
}

/// A node that can be marked dirty.
///
/// Marking is monotonic (dirty stays dirty until explicitly cleared) and safe
/// to run concurrently with unrelated reads.
pub trait DirtyNode: Clone {
    /// Marks only this node dirty.
    fn mark_dirty(&self);
    /// Marks this node and every *cached* descendant dirty.
    fn mark_dirty_recursively(&self);
    /// Already-cached direct children. No filesystem access.
    fn cached_children(&self) -> Vec<Self>;
}

/// The in-memory file tree the watch layer propagates dirty state into.
///
/// The trait is intentionally small so the watch service can be driven against
/// any cache shape; [`CachedTree`] is the in-process implementation.
pub trait FileTree: Send + Sync {
    type Node: DirtyNode;

    /// Looks up a node by its exact cached path. Purely in-memory.
    fn find_cached(&self, path: &WatchPath) -> CachedLookup<Self::Node>;
}

/// Cheap-clone handle to a cached file or directory node.
#[derive(Clone)]
pub struct NodeHandle {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    kind: NodeKind,
    dirty: AtomicBool,
    children: Mutex<HashMap<String, NodeHandle>>,
}

impl NodeHandle {
    fn new(kind: NodeKind) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                kind,
                dirty: AtomicBool::new(false),
                children: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.inner.kind
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    /// Clears the dirty flag for this node only (the "cleaned elsewhere" side
    /// of the contract, typically after a refresh revalidated the node).
    pub fn clear_dirty(&self) {
        self.inner.dirty.store(false, Ordering::Release);
    }

    #[track_caller]
    fn lock_children(&self) -> MutexGuard<'_, HashMap<String, NodeHandle>> {
        match self.inner.children.lock() {
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

    fn child(&self, segment: &str) -> Option<NodeHandle> {
        self.lock_children().get(segment).cloned()
    }

    fn child_or_insert(&self, segment: &str, kind: NodeKind) -> NodeHandle {
        self.lock_children()
            .entry(segment.to_string())
            .or_insert_with(|| NodeHandle::new(kind))
            .clone()
    }
}

impl DirtyNode for NodeHandle {
    fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::Release);
    }

    fn mark_dirty_recursively(&self) {
        self.mark_dirty();
        for child in self.cached_children() {
            child.mark_dirty_recursively();
        }
    }

    fn cached_children(&self) -> Vec<Self> {
        self.lock_children().values().cloned().collect()
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for NodeHandle {}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("kind", &self.inner.kind)
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

/// In-memory cache of file nodes keyed by [`WatchPath`] segments.
///
/// Interning never touches the filesystem; the tree only knows about paths a
/// caller has cached explicitly. Marking operations run concurrently with
/// lookups (per-node atomics and per-node child maps).
pub struct CachedTree {
    // Synthetic super-root above `/`, drive prefixes, etc. Never exposed.
    root: NodeHandle,
}

impl CachedTree {
    pub fn new() -> Self {
        Self {
            root: NodeHandle::new(NodeKind::Directory),
        }
    }

    /// Caches a directory node (and any missing ancestors) and returns it.
    ///
    /// If the path is already cached, the existing node is returned; the kind
    /// of the first intern wins.
    pub fn intern_dir(&self, path: &WatchPath) -> NodeHandle {
        self.intern(path, NodeKind::Directory)
    }

    /// Caches a file node (and any missing ancestor directories) and returns it.
    pub fn intern_file(&self, path: &WatchPath) -> NodeHandle {
        self.intern(path, NodeKind::File)
    }

    fn intern(&self, path: &WatchPath, kind: NodeKind) -> NodeHandle {
        let segments = path.split_segments();
        let mut current = self.root.clone();
        for (index, segment) in segments.iter().enumerate() {
            let node_kind = if index + 1 == segments.len() {
                kind
            } else {
                NodeKind::Directory
            };
            current = current.child_or_insert(segment, node_kind);
        }
        current
    }

    /// Drops a cached subtree. Lookups under it miss afterwards.
    pub fn remove(&self, path: &WatchPath) {
        let segments = path.split_segments();
        let Some((last, ancestors)) = segments.split_last() else {
            return;
        };
        let mut current = self.root.clone();
        for segment in ancestors {
            match current.child(segment) {
                Some(next) => current = next,
                None => return,
            }
        }
        current.lock_children().remove(*last);
    }
}

impl Default for CachedTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTree for CachedTree {
    type Node = NodeHandle;

    fn find_cached(&self, path: &WatchPath) -> CachedLookup<NodeHandle> {
        let mut current = self.root.clone();
        for segment in path.split_segments() {
            match current.child(segment) {
                Some(next) => current = next,
                None => return CachedLookup::Miss,
            }
        }
        if current == self.root {
            // Empty path: nothing cached at "".
            return CachedLookup::Miss;
        }
        match current.kind() {
            NodeKind::Directory => CachedLookup::Directory(current),
            NodeKind::File => CachedLookup::File(current),
        }
    }
}

impl fmt::Debug for CachedTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedTree").finish_non_exhaustive()
    }
}
