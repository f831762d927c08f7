//! Watch management for a locally cached file tree.
//!
//! This crate sits between callers that want subtrees of the local file system
//! kept fresh and the OS-level watcher abstraction from `argus-vfs`:
//!
//! - [`WatchService`] registers watch roots, normalizes overlapping requests
//!   into the minimal covering set before configuring the watcher, and
//!   propagates drained watcher reports into the cached tree as dirty marks.
//! - [`RefreshDriver`] drives that propagation on a fixed period from a
//!   dedicated thread.
//!
//! Requests are identified by opaque [`WatchRequest`] handles; redundant
//! ("dominated") requests stay registered, so removing a broader root later
//! restores their coverage automatically.

mod dirty;
mod normalize;
mod refresh;
mod registry;
mod service;

pub use normalize::EffectiveRoot;
pub use refresh::{RefreshDriver, DEFAULT_REFRESH_PERIOD};
pub use registry::WatchRequest;
pub use service::WatchService;
