//! Virtual-file-system primitives for Argus.
//!
//! This crate owns:
//! - System-independent watch paths ([`WatchPath`]): forward-slash form
//!   everywhere, native separators only at the OS boundary.
//! - The cached in-memory file tree with monotonic dirty flags
//!   ([`CachedTree`] / [`NodeHandle`]).
//! - The file-watcher collaborator abstraction ([`FileWatcher`]), including a
//!   deterministic injected watcher for tests ([`ManualWatcher`]) and a
//!   Notify-backed OS watcher behind the `watch-notify` feature.

mod path;
mod tree;
mod watch;

pub use path::{WatchPath, ARCHIVE_SEPARATOR};
pub use tree::{CachedLookup, CachedTree, DirtyNode, FileTree, NodeHandle, NodeKind};
pub use watch::{DirtyPaths, FileWatcher, ManualWatcher, ManualWatcherHandle};

#[cfg(feature = "watch-notify")]
pub use watch::NotifyWatcher;
