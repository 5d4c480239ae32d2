// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Backend contract consumed by the NineGate dispatcher.
// Author: Lukas Bower

//! The filesystem backend contract.
//!
//! A backend supplies an [`Attacher`] that mints a fresh root [`File`] per
//! session. Every operation defaults to `ENOSYS`, so a backend implements
//! exactly the surface it supports and the dispatcher (or a fallback path,
//! as with [`File::walk_get_attr`]) handles the rest. `ENOSYS` is the
//! distinguished "not implemented" signal; operational failures use the
//! appropriate errno instead.
//!
//! Handles are shared between concurrently-running request handlers, so every
//! method takes `&self`; backends use interior mutability for per-handle
//! state such as readdir cursors.

use std::any::Any;

use ninegate_codec::{
    AllocateMode, Attr, AttrMask, Dirent, FileMode, FsStat, Gid, LegacyMode, LockFlags, LockStatus,
    LockType, OpenFlags, Qid, SetAttr, SetAttrMask, Uid,
};

use crate::errno::{Errno, Result};

/// Factory for session roots.
pub trait Attacher: Send + Sync {
    /// Return a root handle for a new attach.
    fn attach(&self) -> Result<Box<dyn File>>;
}

/// Factory for classic 9P2000 session roots.
pub trait LegacyAttacher: Send + Sync {
    /// Return the root QID and handle for a new classic attach.
    fn attach(&self) -> Result<(Qid, Box<dyn LegacyFile>)>;
}

/// A file handle served over 9P2000.L.
#[allow(unused_variables)]
pub trait File: Send + Sync {
    /// Walk zero or one names, returning the QIDs crossed and a new handle.
    ///
    /// The dispatcher always walks step by step; batch walks never reach a
    /// backend.
    fn walk(&self, names: &[&str]) -> Result<(Vec<Qid>, Box<dyn File>)> {
        Err(Errno::ENOSYS)
    }

    /// Combined walk and getattr. Backends without a cheaper combined path
    /// leave the default; the dispatcher falls back to walk-then-getattr.
    fn walk_get_attr(&self, names: &[&str]) -> Result<(Vec<Qid>, Box<dyn File>, AttrMask, Attr)> {
        Err(Errno::ENOSYS)
    }

    /// Open the file, returning its QID and preferred I/O unit (0 for none).
    fn open(&self, flags: OpenFlags) -> Result<(Qid, u32)> {
        Err(Errno::ENOSYS)
    }

    /// Create and open a file under this directory handle.
    fn create(
        &self,
        name: &str,
        flags: OpenFlags,
        permissions: FileMode,
        uid: Uid,
        gid: Gid,
    ) -> Result<(Box<dyn File>, Qid, u32)> {
        Err(Errno::ENOSYS)
    }

    /// Create a directory.
    fn mkdir(&self, name: &str, permissions: FileMode, uid: Uid, gid: Gid) -> Result<Qid> {
        Err(Errno::ENOSYS)
    }

    /// Create a symlink to `target`.
    fn symlink(&self, target: &str, name: &str, uid: Uid, gid: Gid) -> Result<Qid> {
        Err(Errno::ENOSYS)
    }

    /// Create a device node or fifo.
    fn mknod(
        &self,
        name: &str,
        mode: FileMode,
        major: u32,
        minor: u32,
        uid: Uid,
        gid: Gid,
    ) -> Result<Qid> {
        Err(Errno::ENOSYS)
    }

    /// Hard-link `target` under this directory as `name`.
    fn link(&self, target: &dyn File, name: &str) -> Result<()> {
        Err(Errno::ENOSYS)
    }

    /// Rename `old_name` under this directory into `new_dir` as `new_name`.
    fn rename_at(&self, old_name: &str, new_dir: &dyn File, new_name: &str) -> Result<()> {
        Err(Errno::ENOSYS)
    }

    /// Rename this file itself into `new_dir` as `new_name`.
    ///
    /// The dispatcher drives renames through [`File::rename_at`] on the
    /// parent; this entry point exists for backends that are also used
    /// directly as libraries.
    fn rename(&self, new_dir: &dyn File, new_name: &str) -> Result<()> {
        Err(Errno::ENOSYS)
    }

    /// Unlink `name` under this directory. `flags` carries `AT_*` bits the
    /// dispatcher does not interpret.
    fn unlink_at(&self, name: &str, flags: u32) -> Result<()> {
        Err(Errno::ENOSYS)
    }

    /// Read into `buf` at `offset`, returning the byte count. A short (or
    /// zero) count at end of file is not an error.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        Err(Errno::ENOSYS)
    }

    /// Write `data` at `offset`, returning the byte count.
    fn write_at(&self, data: &[u8], offset: u64) -> Result<usize> {
        Err(Errno::ENOSYS)
    }

    /// Fetch attributes; the returned mask says which came back valid.
    fn get_attr(&self, mask: AttrMask) -> Result<(Qid, AttrMask, Attr)> {
        Err(Errno::ENOSYS)
    }

    /// Change the attributes selected by `valid`.
    fn set_attr(&self, valid: SetAttrMask, attr: SetAttr) -> Result<()> {
        Err(Errno::ENOSYS)
    }

    /// Read directory entries starting at `offset`.
    ///
    /// `count` is a byte budget; a backend may return more entries than fit,
    /// since the reply encoder packs whole entries up to the budget. The
    /// offset of each returned entry must be usable as the `offset` of a
    /// later call to resume after it, offset 0 must rewind, and one handle
    /// must stick to one offset scheme.
    fn readdir(&self, offset: u64, count: u32) -> Result<Vec<Dirent>> {
        Err(Errno::ENOSYS)
    }

    /// Flush file state to stable storage.
    fn fsync(&self) -> Result<()> {
        Err(Errno::ENOSYS)
    }

    /// Read a symlink's target.
    fn readlink(&self) -> Result<String> {
        Err(Errno::ENOSYS)
    }

    /// Filesystem statistics for the tree containing this file.
    fn statfs(&self) -> Result<FsStat> {
        Err(Errno::ENOSYS)
    }

    /// Manipulate allocated file space (the Tallocate extension).
    fn allocate(&self, mode: AllocateMode, offset: u64, length: u64) -> Result<()> {
        Err(Errno::ENOSYS)
    }

    /// Take or release an advisory lock. The status is surfaced to the
    /// client verbatim; the default is a successful no-op.
    fn lock(
        &self,
        pid: u32,
        lock_type: LockType,
        flags: LockFlags,
        start: u64,
        length: u64,
        client: &str,
    ) -> Result<LockStatus> {
        Ok(LockStatus::Ok)
    }

    /// Notification that this file was renamed; fired after the backend
    /// rename succeeded, for every handle tracking the moved name.
    fn renamed(&self, new_parent: &dyn File, new_name: &str) {}

    /// Release the handle. Close errors have already been observed by the
    /// operations that caused them, so this cannot fail.
    fn close(&self) {}

    /// Downcast support for backends whose cross-handle operations (link,
    /// rename) need their own concrete type back.
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

/// A file handle served over classic 9P2000.
///
/// The legacy dialect carries no Linux attributes, so the surface is much
/// smaller; directory reads and stat are not served by this implementation.
#[allow(unused_variables)]
pub trait LegacyFile: Send + Sync {
    /// Walk zero or one names. Directory-ness of the result is taken from
    /// the returned QID type bits.
    fn walk(&self, names: &[&str]) -> Result<(Vec<Qid>, Box<dyn LegacyFile>)> {
        Err(Errno::ENOSYS)
    }

    /// Open with a classic mode byte.
    fn open(&self, mode: LegacyMode) -> Result<(Qid, u32)> {
        Err(Errno::ENOSYS)
    }

    /// Create and open a file. `permissions` is a classic permission word
    /// (the `DM_DIR` bit selects a directory).
    fn create(
        &self,
        name: &str,
        permissions: u32,
        mode: LegacyMode,
    ) -> Result<(Box<dyn LegacyFile>, Qid, u32)> {
        Err(Errno::ENOSYS)
    }

    /// Read into `buf` at `offset`.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        Err(Errno::ENOSYS)
    }

    /// Write `data` at `offset`.
    fn write_at(&self, data: &[u8], offset: u64) -> Result<usize> {
        Err(Errno::ENOSYS)
    }

    /// Remove this file (the Tremove side effect).
    fn remove(&self) -> Result<()> {
        Err(Errno::ENOSYS)
    }

    /// Release the handle.
    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;
    impl File for Bare {}

    #[test]
    fn defaults_signal_not_implemented() {
        let f = Bare;
        assert_eq!(f.walk(&[]).err(), Some(Errno::ENOSYS));
        assert_eq!(f.open(OpenFlags::READ_ONLY).err(), Some(Errno::ENOSYS));
        assert_eq!(f.readlink().err(), Some(Errno::ENOSYS));
        assert_eq!(f.walk_get_attr(&["x"]).err(), Some(Errno::ENOSYS));
        assert!(f.as_any().is_none());
    }

    #[test]
    fn lock_defaults_to_success() {
        let f = Bare;
        let status = f
            .lock(1, LockType::Write, LockFlags::BLOCK, 0, 0, "client")
            .expect("lock");
        assert_eq!(status, LockStatus::Ok);
    }
}
