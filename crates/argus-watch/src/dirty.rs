//! Dirty-state propagation.
//!
//! Translates the three watcher report categories into marks on the cached
//! file tree. Every lookup goes through the cache only; a miss means the path
//! was never cached (or was just dropped) and there is nothing to invalidate.
//! Marking is monotonic, so re-applying a report to an already-dirty tree
//! changes nothing.

use argus_vfs::{CachedLookup, DirtyNode, DirtyPaths, FileTree, WatchPath};

pub(crate) fn apply_dirty_report<T: FileTree>(tree: &T, report: &DirtyPaths) {
    for path in &report.dirty_paths {
        mark_path_dirty(tree, path);
    }
    for path in &report.dirty_directories {
        mark_flat_dir_dirty(tree, path);
    }
    for path in &report.dirty_paths_recursive {
        mark_recursive_dir_dirty(tree, path);
    }
}

/// Marks only the node at `path` dirty.
fn mark_path_dirty<T: FileTree>(tree: &T, path: &WatchPath) {
    match tree.find_cached(path) {
        CachedLookup::Directory(node) | CachedLookup::File(node) => node.mark_dirty(),
        CachedLookup::Miss => {}
    }
}

/// Marks a directory and its already-cached *direct* children dirty; falls
/// back to a single-node mark when only a file resolves at `path`.
fn mark_flat_dir_dirty<T: FileTree>(tree: &T, path: &WatchPath) {
    match tree.find_cached(path) {
        CachedLookup::Directory(node) => {
            node.mark_dirty();
            for child in node.cached_children() {
                child.mark_dirty();
            }
        }
        CachedLookup::File(node) => node.mark_dirty(),
        CachedLookup::Miss => {}
    }
}

/// Marks a whole cached subtree dirty; falls back to a single-node mark when
/// only a file resolves at `path`.
pub(crate) fn mark_recursive_dir_dirty<T: FileTree>(tree: &T, path: &WatchPath) {
    match tree.find_cached(path) {
        CachedLookup::Directory(node) => node.mark_dirty_recursively(),
        CachedLookup::File(node) => node.mark_dirty(),
        CachedLookup::Miss => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use argus_vfs::CachedTree;

    fn path(s: &str) -> WatchPath {
        WatchPath::new(s)
    }

    #[test]
    fn single_path_reports_mark_only_that_node() {
        let tree = CachedTree::new();
        let dir = tree.intern_dir(&path("/a"));
        let file = tree.intern_file(&path("/a/b.txt"));

        apply_dirty_report(
            &tree,
            &DirtyPaths {
                dirty_paths: vec![path("/a/b.txt")],
                ..DirtyPaths::default()
            },
        );

        assert!(file.is_dirty());
        assert!(!dir.is_dirty());
    }

    #[test]
    fn flat_reports_mark_direct_cached_children_only() {
        let tree = CachedTree::new();
        let dir = tree.intern_dir(&path("/a"));
        let child = tree.intern_file(&path("/a/b.txt"));
        let grandchild = tree.intern_file(&path("/a/sub/c.txt"));
        let sub = tree.intern_dir(&path("/a/sub"));

        apply_dirty_report(
            &tree,
            &DirtyPaths {
                dirty_directories: vec![path("/a")],
                ..DirtyPaths::default()
            },
        );

        assert!(dir.is_dirty());
        assert!(child.is_dirty());
        assert!(sub.is_dirty());
        assert!(!grandchild.is_dirty());
    }

    #[test]
    fn recursive_reports_mark_the_whole_cached_subtree() {
        let tree = CachedTree::new();
        let dir = tree.intern_dir(&path("/a"));
        let grandchild = tree.intern_file(&path("/a/sub/c.txt"));
        let outside = tree.intern_file(&path("/other.txt"));

        apply_dirty_report(
            &tree,
            &DirtyPaths {
                dirty_paths_recursive: vec![path("/a")],
                ..DirtyPaths::default()
            },
        );

        assert!(dir.is_dirty());
        assert!(grandchild.is_dirty());
        assert!(!outside.is_dirty());
    }

    #[test]
    fn directory_reports_fall_back_to_a_file_mark() {
        let tree = CachedTree::new();
        let file = tree.intern_file(&path("/a/f"));

        apply_dirty_report(
            &tree,
            &DirtyPaths {
                dirty_directories: vec![path("/a/f")],
                dirty_paths_recursive: vec![path("/a/f")],
                ..DirtyPaths::default()
            },
        );

        assert!(file.is_dirty());
    }

    #[test]
    fn cache_misses_are_ignored() {
        let tree = CachedTree::new();
        let cached = tree.intern_file(&path("/a/b.txt"));

        apply_dirty_report(
            &tree,
            &DirtyPaths {
                dirty_paths: vec![path("/nope")],
                dirty_directories: vec![path("/nope/dir")],
                dirty_paths_recursive: vec![path("/nope/rec")],
            },
        );

        assert!(!cached.is_dirty());
    }

    #[test]
    fn applying_the_same_report_twice_changes_nothing() {
        let tree = CachedTree::new();
        let dir = tree.intern_dir(&path("/a"));
        let child = tree.intern_file(&path("/a/b.txt"));

        let report = DirtyPaths {
            dirty_directories: vec![path("/a")],
            ..DirtyPaths::default()
        };
        apply_dirty_report(&tree, &report);
        let before = (dir.is_dirty(), child.is_dirty());

        apply_dirty_report(&tree, &report);
        assert_eq!(before, (dir.is_dirty(), child.is_dirty()));
    }
}
