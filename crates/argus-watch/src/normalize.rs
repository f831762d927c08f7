//! Watch-root normalization.
//!
//! Registered watch roots routinely overlap: a recursively watched ancestor
//! makes every descendant root redundant, and two requests can target the same
//! path with different recursion. Handing the raw set to an OS watcher wastes
//! native watch handles, so the registry normalizes it first: a prefix tree is
//! built over the slash-separated root paths, redundant ("dominated") requests
//! are recorded, and a minimal covering set falls out of a pre-order
//! traversal.
//!
//! Normalization is a pure function from the registered request set to an
//! immutable [`NormalizedView`]; the tree is built fresh per pass and nothing
//! on the shared request handles is mutated. Dominated requests stay
//! registered, so removing a dominating ancestor later resurrects them into
//! the effective set on the next pass.

use std::collections::{HashMap, HashSet};

use argus_vfs::WatchPath;

use crate::registry::RequestId;

/// One root of the minimal covering set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveRoot {
    pub(crate) id: RequestId,
    pub root: WatchPath,
    pub recursive: bool,
}

/// Immutable result of one normalization pass.
#[derive(Debug, Default)]
pub(crate) struct NormalizedView {
    /// Minimal covering set, sorted by root path for determinism.
    pub(crate) effective: Vec<EffectiveRoot>,
    /// Requests excluded from the effective set.
    pub(crate) dominated: HashSet<RequestId>,
    root: TrieNode,
}

#[derive(Debug, Default)]
struct TrieNode {
    /// The request whose root path terminates exactly at this node, with its
    /// recursion flag.
    owner: Option<(RequestId, bool)>,
    children: HashMap<String, TrieNode>,
}

impl NormalizedView {
    /// Whether a candidate root is already covered by the normalized set.
    ///
    /// True when a traversed ancestor owns a recursive request. When the full
    /// path is consumed, true only for a non-recursive candidate terminating
    /// at a claimed node: a recursive candidate reaching an existing node
    /// without a recursive ancestor still has to be asserted to gain recursive
    /// coverage.
    pub(crate) fn is_already_watched(&self, root: &WatchPath, recursive: bool) -> bool {
        let mut cursor = &self.root;
        for segment in root.split_segments() {
            match cursor.children.get(segment) {
                None => return false,
                Some(next) => {
                    cursor = next;
                    if matches!(cursor.owner, Some((_, true))) {
                        return true;
                    }
                }
            }
        }
        !recursive && cursor.owner.is_some()
    }
}

/// Builds the minimal covering set over `requests`.
///
/// Requests are processed in the given (registration) order. Tie-breaks at a
/// node claimed twice: non-recursive loses to recursive; at equal specificity
/// the first claim wins and the later request is dominated (deterministic,
/// see `same_path_flat_requests_keep_the_first_claim`).
pub(crate) fn normalize<'a>(
    requests: impl IntoIterator<Item = (RequestId, &'a WatchPath, bool)>,
) -> NormalizedView {
    let mut root = TrieNode::default();
    let mut dominated = HashSet::new();
    let mut info: HashMap<RequestId, (WatchPath, bool)> = HashMap::new();

    for (id, path, recursive) in requests {
        info.insert(id, (path.clone(), recursive));
        let mut cursor = &mut root;
        let mut covered = false;
        for segment in path.split_segments() {
            let existed = cursor.children.contains_key(segment);
            cursor = cursor.children.entry(segment.to_string()).or_default();
            if existed && matches!(cursor.owner, Some((_, true))) {
                // An ancestor (or the node itself) is already watched
                // recursively; no further nodes are needed.
                dominated.insert(id);
                covered = true;
                break;
            }
        }
        if covered {
            continue;
        }

        match cursor.owner {
            None => cursor.owner = Some((id, recursive)),
            Some((existing, false)) if recursive => {
                dominated.insert(existing);
                cursor.owner = Some((id, true));
            }
            Some(_) => {
                // Equal specificity (the recursive-owner case exits early
                // above): the first claim stays.
                dominated.insert(id);
                continue;
            }
        }

        if recursive && !cursor.children.is_empty() {
            // Recursive coverage subsumes every descendant root.
            dominate_subtree(cursor, &mut dominated);
            cursor.children.clear();
        }
    }

    let mut owners = Vec::new();
    collect_owners(&root, &mut owners);
    let mut effective: Vec<EffectiveRoot> = owners
        .into_iter()
        .filter_map(|id| {
            let (root, recursive) = info.get(&id)?.clone();
            Some(EffectiveRoot {
                id,
                root,
                recursive,
            })
        })
        .collect();
    effective.sort_by(|a, b| a.root.cmp(&b.root));

    NormalizedView {
        effective,
        dominated,
        root,
    }
}

fn dominate_subtree(node: &TrieNode, dominated: &mut HashSet<RequestId>) {
    for child in node.children.values() {
        if let Some((id, _)) = child.owner {
            dominated.insert(id);
        }
        dominate_subtree(child, dominated);
    }
}

fn collect_owners(node: &TrieNode, out: &mut Vec<RequestId>) {
    for child in node.children.values() {
        if let Some((id, _)) = child.owner {
            out.push(id);
        }
        collect_owners(child, out);
    }
}
