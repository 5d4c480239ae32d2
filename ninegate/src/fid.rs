// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Reference-counted fid state and the per-fid locking discipline.
// Author: Lukas Bower

//! Fid references.
//!
//! A [`FidRef`] is the server-side state behind one client fid: the backend
//! handle, the parent chain, the position in the shared path tree, and the
//! open/deleted flags. References are counted explicitly: one count for the
//! fid table entry, one for every in-flight handler using it. The backend
//! handle closes exactly when the count reaches zero.
//!
//! The locking discipline lives here as three combinators:
//!
//! * [`FidRef::safely_read`]: shared rename lock, shared node lock; for
//!   operations that read the file or its attributes.
//! * [`FidRef::safely_write`]: shared rename lock, exclusive node lock; for
//!   operations that change the directory this fid names.
//! * [`FidRef::safely_global`]: exclusive rename lock; for operations that
//!   reshape the naming graph (rename, remove).
//!
//! The rename lock is always taken before any node lock, and node locks are
//! always taken from shallower to deeper, which keeps the lock graph
//! acyclic.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use ninegate_codec::OpenFlags;

use crate::errno::{Errno, Result};
use crate::file::{File, LegacyFile};
use crate::pathtree::PathNode;

/// The backend handle behind a fid, tagged by the dialect that produced it.
///
/// Which operations are legal follows from the dialect: a classic fid cannot
/// serve 9P2000.L requests and vice versa.
pub(crate) enum Handle {
    /// Handle obtained through a 9P2000.L attach.
    Lin(Box<dyn File>),
    /// Handle obtained through a classic 9P2000 attach.
    Legacy(Box<dyn LegacyFile>),
}

impl Handle {
    pub(crate) fn lin(&self) -> Result<&dyn File> {
        match self {
            Handle::Lin(f) => Ok(f.as_ref()),
            Handle::Legacy(_) => Err(Errno::EINVAL),
        }
    }

    pub(crate) fn legacy(&self) -> Result<&dyn LegacyFile> {
        match self {
            Handle::Legacy(f) => Ok(f.as_ref()),
            Handle::Lin(_) => Err(Errno::EINVAL),
        }
    }

    fn close(&self) {
        match self {
            Handle::Lin(f) => f.close(),
            Handle::Legacy(f) => f.close(),
        }
    }
}

/// Open bookkeeping guarded by a fid-local mutex.
#[derive(Default)]
pub(crate) struct OpenState {
    pub(crate) opened: bool,
    pub(crate) flags: OpenFlags,
}

/// Server-side state for one fid.
pub(crate) struct FidRef {
    pub(crate) handle: Handle,
    /// Parent fid reference; `None` only for an attach root.
    pub(crate) parent: Option<Arc<FidRef>>,
    path_node: Mutex<Arc<PathNode>>,
    refs: AtomicI64,
    pub(crate) open_state: Mutex<OpenState>,
    pub(crate) is_dir: bool,
    pub(crate) is_openable: bool,
    deleted: AtomicBool,
    /// The server-wide rename lock, shared by every fid of one server.
    rename_mu: Arc<RwLock<()>>,
}

impl FidRef {
    /// Create a reference with an initial count of one, owned by the caller.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        handle: Handle,
        parent: Option<Arc<FidRef>>,
        path_node: Arc<PathNode>,
        is_dir: bool,
        is_openable: bool,
        deleted: bool,
        rename_mu: Arc<RwLock<()>>,
    ) -> Arc<FidRef> {
        Arc::new(FidRef {
            handle,
            parent,
            path_node: Mutex::new(path_node),
            refs: AtomicI64::new(1),
            open_state: Mutex::new(OpenState::default()),
            is_dir,
            is_openable,
            deleted: AtomicBool::new(deleted),
            rename_mu,
        })
    }

    /// True for an attach root.
    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// True once the file this fid refers to has been unlinked.
    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// The node this fid currently points at. Renames can move it, so hold
    /// at least the shared rename lock for a stable answer.
    pub(crate) fn path_node(&self) -> Arc<PathNode> {
        self.path_node.lock().unwrap().clone()
    }

    pub(crate) fn set_path_node(&self, node: Arc<PathNode>) {
        *self.path_node.lock().unwrap() = node;
    }

    /// The parent reference, or this reference itself for a root.
    pub(crate) fn maybe_parent(self: &Arc<Self>) -> Arc<FidRef> {
        self.parent.clone().unwrap_or_else(|| self.clone())
    }

    /// The open flags if this fid has been opened.
    pub(crate) fn open_flags(&self) -> Option<OpenFlags> {
        let state = self.open_state.lock().unwrap();
        state.opened.then_some(state.flags)
    }

    pub(crate) fn inc_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference. On the last one: detach from the parent's node,
    /// close the backend handle, release the parent.
    pub(crate) fn dec_ref(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "fid reference over-released");
        if prev != 1 {
            return;
        }
        if let Some(parent) = &self.parent {
            parent.path_node().remove_child(self);
        }
        self.handle.close();
        if let Some(parent) = &self.parent {
            parent.dec_ref();
        }
    }

    /// Run `f` with the rename lock shared and this fid's node lock shared.
    pub(crate) fn safely_read<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _global = self.rename_mu.read().unwrap();
        let node = self.path_node();
        let _op = node.op_mu.read().unwrap();
        f()
    }

    /// Run `f` with the rename lock shared and this fid's node lock
    /// exclusive.
    pub(crate) fn safely_write<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _global = self.rename_mu.read().unwrap();
        let node = self.path_node();
        let _op = node.op_mu.write().unwrap();
        f()
    }

    /// Run `f` with the rename lock exclusive. All node locks are observably
    /// free while it runs.
    pub(crate) fn safely_global<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _global = self.rename_mu.write().unwrap();
        f()
    }

    /// Re-key every fid known as `old_name` under this directory fid into
    /// `new_parent` as `new_name`, moving the interned subtree along and
    /// notifying the moved handles.
    ///
    /// Caller holds the rename lock exclusive.
    pub(crate) fn rename_child_to(&self, old_name: &str, new_parent: &FidRef, new_name: &str) {
        let src_node = self.path_node();
        let dst_node = new_parent.path_node();

        // Anything the destination name currently refers to is replaced, and
        // replaced files are stale.
        dst_node.mark_child_deleted(new_name);

        let moved = src_node
            .detach_child_node(old_name)
            .unwrap_or_else(PathNode::new);
        dst_node.attach_child_node(new_name, moved.clone());

        for fid_ref in src_node.take_child_refs(old_name) {
            fid_ref.set_path_node(moved.clone());
            dst_node.add_child(&fid_ref, new_name);
            if let (Handle::Lin(file), Handle::Lin(new_parent_file)) =
                (&fid_ref.handle, &new_parent.handle)
            {
                file.renamed(new_parent_file.as_ref(), new_name);
            }
        }
    }

    /// Mark the child called `name` (and its subtree) deleted.
    ///
    /// Caller holds either this fid's node lock exclusive or the rename lock
    /// exclusive.
    pub(crate) fn mark_child_deleted(&self, name: &str) {
        self.path_node().mark_child_deleted(name);
    }
}

/// An owned use of a [`FidRef`], released on drop.
///
/// Handlers obtain one from the fid table and hold it for the duration of
/// the request, which keeps the backend handle alive even if the client
/// clunks the fid concurrently.
pub(crate) struct FidGuard(Arc<FidRef>);

impl FidGuard {
    /// Take ownership of one already-counted reference.
    pub(crate) fn from_counted(fid_ref: Arc<FidRef>) -> FidGuard {
        FidGuard(fid_ref)
    }

    /// Borrow the underlying shared reference.
    pub(crate) fn as_arc(&self) -> &Arc<FidRef> {
        &self.0
    }
}

impl Deref for FidGuard {
    type Target = FidRef;

    fn deref(&self) -> &FidRef {
        &self.0
    }
}

impl Drop for FidGuard {
    fn drop(&mut self) {
        self.0.dec_ref();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingFile(Arc<AtomicUsize>);
    impl File for CountingFile {
        fn close(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn new_ref(closes: &Arc<AtomicUsize>, parent: Option<Arc<FidRef>>) -> Arc<FidRef> {
        let node = match &parent {
            Some(p) => p.path_node().path_node_for("child"),
            None => PathNode::new(),
        };
        FidRef::new(
            Handle::Lin(Box::new(CountingFile(closes.clone()))),
            parent,
            node,
            true,
            true,
            false,
            Arc::new(RwLock::new(())),
        )
    }

    #[test]
    fn close_fires_once_at_zero() {
        let closes = Arc::new(AtomicUsize::new(0));
        let r = new_ref(&closes, None);
        r.inc_ref();
        r.dec_ref();
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        r.dec_ref();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn child_release_releases_parent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let parent = new_ref(&closes, None);
        let child = new_ref(&closes, Some(parent.clone()));
        // The fid table entry is the only count on the parent besides the
        // child's implicit one.
        parent.inc_ref();
        parent.dec_ref();
        child.dec_ref();
        // Child closed, then parent: both handles released.
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn guard_releases_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        let r = new_ref(&closes, None);
        r.inc_ref();
        {
            let _guard = FidGuard::from_counted(r.clone());
        }
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        r.dec_ref();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deleted_flag_is_sticky() {
        let closes = Arc::new(AtomicUsize::new(0));
        let r = new_ref(&closes, None);
        assert!(!r.is_deleted());
        r.mark_deleted();
        assert!(r.is_deleted());
        r.dec_ref();
    }
}
