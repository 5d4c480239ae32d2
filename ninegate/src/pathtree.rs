// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Shared path tree tracking names traversed by fid references.
// Author: Lukas Bower

//! The shared path tree.
//!
//! One [`PathNode`] exists per distinct named path ever traversed through a
//! server, interned lazily. A node records, for the directory it names, which
//! fid references are currently known under which child names, and the
//! interned node of each child name. That bookkeeping is what keeps rename,
//! unlink and walk coherent when they race on overlapping paths: renaming a
//! name atomically re-keys every fid bound to it, and unlinking a name marks
//! every fid bound to it (and their subtrees) deleted.
//!
//! Fid references hold strong pointers into the tree; the tree holds only
//! weak pointers back, so dropping the last fid for a subtree reclaims it.
//!
//! `op_mu` is the per-file operation lock described in the server's locking
//! discipline. It guards operations *on the file this node names*; the maps
//! inside the node have their own interior mutexes and may be touched while
//! holding any combination of operation locks, as long as node locks are
//! always taken from shallower to deeper.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::fid::FidRef;

/// Identity key for a fid reference within the maps.
pub(crate) type RefKey = usize;

pub(crate) fn ref_key(fid_ref: &FidRef) -> RefKey {
    std::ptr::from_ref(fid_ref) as RefKey
}

#[derive(Default)]
struct ChildRefs {
    /// name -> the fid references currently known by that name.
    by_name: HashMap<String, HashMap<RefKey, Weak<FidRef>>>,
    /// fid reference -> the name it is known by.
    name_of: HashMap<RefKey, String>,
}

/// A node of the shared path tree.
pub(crate) struct PathNode {
    /// Operation lock for the file this node names. Shared for read-like
    /// operations, exclusive for operations that mutate the directory.
    pub(crate) op_mu: RwLock<()>,
    child_nodes: Mutex<HashMap<String, Arc<PathNode>>>,
    child_refs: Mutex<ChildRefs>,
}

impl PathNode {
    /// Create a detached node (the tree root, or an interned child).
    pub(crate) fn new() -> Arc<PathNode> {
        Arc::new(PathNode {
            op_mu: RwLock::new(()),
            child_nodes: Mutex::new(HashMap::new()),
            child_refs: Mutex::new(ChildRefs::default()),
        })
    }

    /// The interned node for `name` under this node, created on first use.
    pub(crate) fn path_node_for(self: &Arc<Self>, name: &str) -> Arc<PathNode> {
        let mut nodes = self.child_nodes.lock().unwrap();
        nodes
            .entry(name.to_string())
            .or_insert_with(PathNode::new)
            .clone()
    }

    /// The name `fid_ref` is known by under this node.
    ///
    /// Panics if the reference is not tracked here; that is an invariant
    /// violation, not a runtime condition.
    pub(crate) fn name_for(&self, fid_ref: &FidRef) -> String {
        self.child_refs
            .lock()
            .unwrap()
            .name_of
            .get(&ref_key(fid_ref))
            .cloned()
            .expect("fid reference is not known by this path node")
    }

    /// Track `fid_ref` as `name` under this node.
    pub(crate) fn add_child(&self, fid_ref: &Arc<FidRef>, name: &str) {
        let mut refs = self.child_refs.lock().unwrap();
        let key = ref_key(fid_ref);
        refs.by_name
            .entry(name.to_string())
            .or_default()
            .insert(key, Arc::downgrade(fid_ref));
        refs.name_of.insert(key, name.to_string());
    }

    /// Stop tracking `fid_ref`, returning the name it was known by.
    pub(crate) fn remove_child(&self, fid_ref: &FidRef) -> Option<String> {
        let mut refs = self.child_refs.lock().unwrap();
        let key = ref_key(fid_ref);
        let name = refs.name_of.remove(&key)?;
        if let Some(set) = refs.by_name.get_mut(&name) {
            set.remove(&key);
            if set.is_empty() {
                refs.by_name.remove(&name);
            }
        }
        Some(name)
    }

    /// Mark every fid currently known as `name`, and every fid anywhere in
    /// the subtree interned under `name`, as deleted.
    pub(crate) fn mark_child_deleted(&self, name: &str) {
        let live = {
            let refs = self.child_refs.lock().unwrap();
            refs.by_name
                .get(name)
                .map(|set| set.values().filter_map(Weak::upgrade).collect::<Vec<_>>())
                .unwrap_or_default()
        };
        for fid_ref in live {
            fid_ref.mark_deleted();
        }
        let subtree = self.child_nodes.lock().unwrap().get(name).cloned();
        if let Some(node) = subtree {
            node.mark_all_deleted();
        }
    }

    /// Mark everything tracked by this node and its descendants deleted.
    fn mark_all_deleted(&self) {
        let live: Vec<Arc<FidRef>> = {
            let refs = self.child_refs.lock().unwrap();
            refs.by_name
                .values()
                .flat_map(|set| set.values().filter_map(Weak::upgrade))
                .collect()
        };
        for fid_ref in live {
            fid_ref.mark_deleted();
        }
        let children: Vec<Arc<PathNode>> =
            self.child_nodes.lock().unwrap().values().cloned().collect();
        for child in children {
            child.mark_all_deleted();
        }
    }

    /// Detach the interned subtree for `name`, if any.
    pub(crate) fn detach_child_node(&self, name: &str) -> Option<Arc<PathNode>> {
        self.child_nodes.lock().unwrap().remove(name)
    }

    /// Install `node` as the interned subtree for `name`, replacing any
    /// existing one.
    pub(crate) fn attach_child_node(&self, name: &str, node: Arc<PathNode>) {
        self.child_nodes
            .lock()
            .unwrap()
            .insert(name.to_string(), node);
    }

    /// Remove and return every live fid reference known as `name`.
    pub(crate) fn take_child_refs(&self, name: &str) -> Vec<Arc<FidRef>> {
        let mut refs = self.child_refs.lock().unwrap();
        let Some(set) = refs.by_name.remove(name) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(set.len());
        for (key, weak) in set {
            refs.name_of.remove(&key);
            if let Some(fid_ref) = weak.upgrade() {
                out.push(fid_ref);
            }
        }
        out
    }
}
