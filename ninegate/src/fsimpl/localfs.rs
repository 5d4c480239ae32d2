// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Serve a host directory over 9P2000.L.
// Author: Lukas Bower

//! A local-filesystem backend.
//!
//! Every handle owns an `O_PATH` descriptor for the file it refers to, taken
//! with `openat` from its parent's descriptor at walk time, and all
//! operations go through the `*at` syscall family against that descriptor:
//! `openat`, `mkdirat`, `symlinkat`, `mknodat`, `linkat`, `renameat`,
//! `unlinkat`, `fstatat`, `readlinkat`. A handle therefore keeps working
//! when any ancestor is renamed; no path strings are stored and the
//! [`File::renamed`] notification has nothing to do here. Reopening for I/O
//! (and the few operations the kernel refuses on `O_PATH` descriptors) goes
//! through `/proc/self/fd`, which resolves to the same inode.
//!
//! QID paths are `(device, inode)` pairs translated through a per-attacher
//! [`PathMapper`]. Unlinking a last link (and renaming over an existing
//! name) drops the dead identity from the mapper, so a recycled inode never
//! resurrects a deleted file's QID.
//!
//! Readdir takes a sorted snapshot of the directory on rewind and serves
//! entry-index offsets out of it; the snapshot lives on the handle, which is
//! what lets a client resume mid-directory across calls.

use std::fs;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use log::warn;
use nix::fcntl::{open, openat, readlinkat, renameat, AtFlags, OFlag};
use nix::sys::stat::{fstatat, makedev, mkdirat, mknodat, FileStat, Mode, SFlag};
use nix::sys::statvfs::statvfs;
use nix::unistd::{fchownat, linkat, symlinkat, unlinkat, UnlinkatFlags};

use ninegate_codec::{
    AllocateMode, Attr, AttrMask, Dirent, FileMode, FsStat, Gid, OpenFlags, Qid, QidType, SetAttr,
    SetAttrMask, Uid,
};

use crate::errno::{Errno, Result};
use crate::file::{Attacher, File};
use crate::fsimpl::qidgen::{DevIno, PathMapper};

/// Attacher serving the tree rooted at a host directory.
pub struct LocalFs {
    root: PathBuf,
    mapper: Arc<PathMapper>,
}

impl LocalFs {
    /// Serve the tree rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> LocalFs {
        LocalFs {
            root: root.into(),
            mapper: Arc::new(PathMapper::new()),
        }
    }
}

impl Attacher for LocalFs {
    fn attach(&self) -> Result<Box<dyn File>> {
        let fd = open(
            &self.root,
            OFlag::O_PATH | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )?;
        Ok(Box::new(Local::new(fd, self.mapper.clone())))
    }
}

/// One handle into the served tree, rooted at its own descriptor.
pub struct Local {
    fd: OwnedFd,
    mapper: Arc<PathMapper>,
    open_file: Mutex<Option<fs::File>>,
    dir_snapshot: Mutex<Option<Vec<Dirent>>>,
}

impl Local {
    fn new(fd: OwnedFd, mapper: Arc<PathMapper>) -> Local {
        Local {
            fd,
            mapper,
            open_file: Mutex::new(None),
            dir_snapshot: Mutex::new(None),
        }
    }

    /// The magic-link path that reopens this descriptor's inode.
    fn proc_path(&self) -> PathBuf {
        PathBuf::from(format!("/proc/self/fd/{}", self.fd.as_raw_fd()))
    }

    /// Take a fresh `O_PATH` descriptor for `name` under this directory.
    fn open_control(&self, name: &str) -> Result<OwnedFd> {
        Ok(openat(
            &self.fd,
            name,
            OFlag::O_PATH | OFlag::O_NOFOLLOW | OFlag::O_CLOEXEC,
            Mode::empty(),
        )?)
    }

    fn dev_ino(st: &FileStat) -> DevIno {
        (st.st_dev as u64, st.st_ino as u64)
    }

    fn qid_for(&self, st: &FileStat) -> Qid {
        let typ = match SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT {
            SFlag::S_IFDIR => QidType::DIR,
            SFlag::S_IFLNK => QidType::SYMLINK,
            _ => QidType::FILE,
        };
        Qid {
            typ,
            version: 0,
            path: self.mapper.path_for(Self::dev_ino(st)),
        }
    }

    /// Stat the file this descriptor refers to.
    fn stat_self(&self) -> Result<FileStat> {
        Ok(fstatat(
            &self.fd,
            "",
            AtFlags::AT_EMPTY_PATH | AtFlags::AT_SYMLINK_NOFOLLOW,
        )?)
    }

    /// Stat `name` under this directory without following symlinks.
    fn stat_child(&self, name: &str) -> Result<FileStat> {
        Ok(fstatat(
            &self.fd,
            name,
            AtFlags::AT_SYMLINK_NOFOLLOW,
        )?)
    }

    fn child_qid(&self, name: &str) -> Result<Qid> {
        let st = self.stat_child(name)?;
        Ok(self.qid_for(&st))
    }

    /// Drop the mapper entry for an identity whose last name just went away.
    fn forget_identity(&self, st: &FileStat) {
        let is_dir = SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT == SFlag::S_IFDIR;
        // A file with remaining hard links keeps its identity.
        if is_dir || st.st_nlink as u64 <= 1 {
            self.mapper.forget(Self::dev_ino(st));
        }
    }

    fn attr_from_stat(st: &FileStat) -> Attr {
        Attr {
            mode: FileMode(st.st_mode),
            uid: Uid(st.st_uid),
            gid: Gid(st.st_gid),
            nlink: st.st_nlink as u64,
            rdev: st.st_rdev as u64,
            size: st.st_size as u64,
            block_size: st.st_blksize as u64,
            blocks: st.st_blocks as u64,
            atime_seconds: st.st_atime as u64,
            atime_nanoseconds: st.st_atime_nsec as u64,
            mtime_seconds: st.st_mtime as u64,
            mtime_nanoseconds: st.st_mtime_nsec as u64,
            ctime_seconds: st.st_ctime as u64,
            ctime_nanoseconds: st.st_ctime_nsec as u64,
            ..Attr::default()
        }
    }

    fn supported_attrs() -> AttrMask {
        AttrMask {
            mode: true,
            uid: true,
            gid: true,
            nlink: true,
            rdev: true,
            size: true,
            blocks: true,
            atime: true,
            mtime: true,
            ctime: true,
            ..AttrMask::default()
        }
    }

    /// Reopen options for the I/O descriptor.
    fn open_options(flags: OpenFlags) -> fs::OpenOptions {
        let mut options = fs::OpenOptions::new();
        match flags.mode() {
            OpenFlags::WRITE_ONLY => {
                options.write(true);
            }
            OpenFlags::READ_WRITE => {
                options.read(true).write(true);
            }
            _ => {
                options.read(true);
            }
        }
        if flags.truncate() {
            options.truncate(true);
        }
        options
    }

    /// The `openat` flag word for creating-and-opening a new file.
    fn create_oflags(flags: OpenFlags) -> OFlag {
        let mut oflags = OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_CLOEXEC;
        oflags |= match flags.mode() {
            OpenFlags::WRITE_ONLY => OFlag::O_WRONLY,
            OpenFlags::READ_WRITE => OFlag::O_RDWR,
            _ => OFlag::O_RDONLY,
        };
        if flags.truncate() {
            oflags |= OFlag::O_TRUNC;
        }
        oflags
    }

    fn take_snapshot(&self) -> Result<Vec<Dirent>> {
        let mut names: Vec<String> = Vec::new();
        for entry in fs::read_dir(self.proc_path())? {
            let entry = entry?;
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                // Non-UTF-8 names cannot cross the wire; skip them.
                Err(name) => {
                    warn!("skipping undecodable name {:?}", name.as_bytes());
                }
            }
        }
        names.sort_unstable();

        let mut entries = Vec::with_capacity(names.len());
        for (index, name) in names.into_iter().enumerate() {
            let qid = match self.child_qid(&name) {
                Ok(qid) => qid,
                // Raced with an unlink; the entry is gone, not an error.
                Err(Errno::ENOENT) => continue,
                Err(err) => return Err(err),
            };
            entries.push(Dirent {
                qid,
                offset: index as u64 + 1,
                typ: qid.typ.bits(),
                name,
            });
        }
        Ok(entries)
    }
}

impl File for Local {
    fn walk(&self, names: &[&str]) -> Result<(Vec<Qid>, Box<dyn File>)> {
        let child = match names {
            [] => Local::new(self.fd.try_clone()?, self.mapper.clone()),
            [name] => Local::new(self.open_control(name)?, self.mapper.clone()),
            _ => return Err(Errno::EINVAL),
        };
        let st = child.stat_self()?;
        let qid = child.qid_for(&st);
        Ok((vec![qid], Box::new(child)))
    }

    fn walk_get_attr(&self, names: &[&str]) -> Result<(Vec<Qid>, Box<dyn File>, AttrMask, Attr)> {
        let child = match names {
            [] => Local::new(self.fd.try_clone()?, self.mapper.clone()),
            [name] => Local::new(self.open_control(name)?, self.mapper.clone()),
            _ => return Err(Errno::EINVAL),
        };
        let st = child.stat_self()?;
        let qid = child.qid_for(&st);
        Ok((
            vec![qid],
            Box::new(child),
            Self::supported_attrs(),
            Self::attr_from_stat(&st),
        ))
    }

    fn open(&self, flags: OpenFlags) -> Result<(Qid, u32)> {
        let st = self.stat_self()?;
        let file = Self::open_options(flags).open(self.proc_path())?;
        *self.open_file.lock().unwrap() = Some(file);
        Ok((self.qid_for(&st), 0))
    }

    fn create(
        &self,
        name: &str,
        flags: OpenFlags,
        permissions: FileMode,
        _uid: Uid,
        _gid: Gid,
    ) -> Result<(Box<dyn File>, Qid, u32)> {
        let opened = openat(
            &self.fd,
            name,
            Self::create_oflags(flags),
            Mode::from_bits_truncate(permissions.permissions()),
        )?;
        let child = Local::new(self.open_control(name)?, self.mapper.clone());
        let st = child.stat_self()?;
        let qid = child.qid_for(&st);
        *child.open_file.lock().unwrap() = Some(fs::File::from(opened));
        Ok((Box::new(child), qid, 0))
    }

    fn mkdir(&self, name: &str, permissions: FileMode, _uid: Uid, _gid: Gid) -> Result<Qid> {
        mkdirat(
            &self.fd,
            name,
            Mode::from_bits_truncate(permissions.permissions()),
        )?;
        self.child_qid(name)
    }

    fn symlink(&self, target: &str, name: &str, _uid: Uid, _gid: Gid) -> Result<Qid> {
        symlinkat(target, &self.fd, name)?;
        self.child_qid(name)
    }

    fn mknod(
        &self,
        name: &str,
        mode: FileMode,
        major_num: u32,
        minor_num: u32,
        _uid: Uid,
        _gid: Gid,
    ) -> Result<Qid> {
        let kind = SFlag::from_bits_truncate(mode.file_type().0);
        let perm = Mode::from_bits_truncate(mode.permissions());
        mknodat(
            &self.fd,
            name,
            kind,
            perm,
            makedev(u64::from(major_num), u64::from(minor_num)),
        )?;
        self.child_qid(name)
    }

    fn link(&self, target: &dyn File, name: &str) -> Result<()> {
        let target = target
            .as_any()
            .and_then(|any| any.downcast_ref::<Local>())
            .ok_or(Errno::EXDEV)?;
        // Hard-linking an O_PATH descriptor directly needs privilege the
        // server may not have; following its magic link does not. The old
        // dirfd is ignored for an absolute path.
        linkat(
            &self.fd,
            target.proc_path().as_path(),
            &self.fd,
            name,
            AtFlags::AT_SYMLINK_FOLLOW,
        )?;
        Ok(())
    }

    fn rename_at(&self, old_name: &str, new_dir: &dyn File, new_name: &str) -> Result<()> {
        let new_dir = new_dir
            .as_any()
            .and_then(|any| any.downcast_ref::<Local>())
            .ok_or(Errno::EXDEV)?;
        // Renaming over an existing name destroys that name's file.
        let displaced = new_dir.stat_child(new_name).ok();
        renameat(
            &self.fd,
            old_name,
            &new_dir.fd,
            new_name,
        )?;
        if let Some(st) = displaced {
            self.forget_identity(&st);
        }
        Ok(())
    }

    fn unlink_at(&self, name: &str, flags: u32) -> Result<()> {
        let st = self.stat_child(name)?;
        let mode = if flags & libc::AT_REMOVEDIR as u32 != 0 {
            UnlinkatFlags::RemoveDir
        } else {
            UnlinkatFlags::NoRemoveDir
        };
        unlinkat(&self.fd, name, mode)?;
        self.forget_identity(&st);
        Ok(())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let guard = self.open_file.lock().unwrap();
        let file = guard.as_ref().ok_or(Errno::EBADF)?;
        Ok(file.read_at(buf, offset)?)
    }

    fn write_at(&self, data: &[u8], offset: u64) -> Result<usize> {
        let guard = self.open_file.lock().unwrap();
        let file = guard.as_ref().ok_or(Errno::EBADF)?;
        Ok(file.write_at(data, offset)?)
    }

    fn get_attr(&self, mask: AttrMask) -> Result<(Qid, AttrMask, Attr)> {
        let st = self.stat_self()?;
        let mut valid = Self::supported_attrs();
        // Only claim what was asked for.
        valid.ino &= mask.ino;
        valid.mode &= mask.mode;
        valid.uid &= mask.uid;
        valid.gid &= mask.gid;
        valid.nlink &= mask.nlink;
        valid.rdev &= mask.rdev;
        valid.size &= mask.size;
        valid.blocks &= mask.blocks;
        valid.atime &= mask.atime;
        valid.mtime &= mask.mtime;
        valid.ctime &= mask.ctime;
        Ok((self.qid_for(&st), valid, Self::attr_from_stat(&st)))
    }

    fn set_attr(&self, valid: SetAttrMask, attr: SetAttr) -> Result<()> {
        if valid.permissions {
            // fchmod is refused on O_PATH descriptors; the magic link works.
            fs::set_permissions(
                self.proc_path(),
                fs::Permissions::from_mode(attr.permissions.0),
            )?;
        }
        if valid.size {
            let file = fs::OpenOptions::new().write(true).open(self.proc_path())?;
            file.set_len(attr.size)?;
        }
        if valid.uid || valid.gid {
            let uid = valid.uid.then(|| nix::unistd::Uid::from_raw(attr.uid.0));
            let gid = valid.gid.then(|| nix::unistd::Gid::from_raw(attr.gid.0));
            fchownat(
                &self.fd,
                "",
                uid,
                gid,
                AtFlags::AT_EMPTY_PATH,
            )?;
        }
        if valid.atime || valid.mtime {
            let mut times = fs::FileTimes::new();
            if valid.atime {
                times = times.set_accessed(if valid.atime_not_system_time {
                    SystemTime::UNIX_EPOCH
                        + Duration::new(attr.atime_seconds, attr.atime_nanoseconds as u32)
                } else {
                    SystemTime::now()
                });
            }
            if valid.mtime {
                times = times.set_modified(if valid.mtime_not_system_time {
                    SystemTime::UNIX_EPOCH
                        + Duration::new(attr.mtime_seconds, attr.mtime_nanoseconds as u32)
                } else {
                    SystemTime::now()
                });
            }
            let file = fs::File::open(self.proc_path())?;
            file.set_times(times)?;
        }
        Ok(())
    }

    fn readdir(&self, offset: u64, _count: u32) -> Result<Vec<Dirent>> {
        let mut snapshot = self.dir_snapshot.lock().unwrap();
        if offset == 0 || snapshot.is_none() {
            // Offset 0 is a rewind directive.
            *snapshot = Some(self.take_snapshot()?);
        }
        let entries = snapshot.as_ref().expect("snapshot was just ensured");
        Ok(entries.iter().skip(offset as usize).cloned().collect())
    }

    fn fsync(&self) -> Result<()> {
        let guard = self.open_file.lock().unwrap();
        let file = guard.as_ref().ok_or(Errno::EBADF)?;
        Ok(file.sync_all()?)
    }

    fn readlink(&self) -> Result<String> {
        // Empty-path readlinkat works because the descriptor was opened
        // O_PATH | O_NOFOLLOW on the symlink itself.
        let target = readlinkat(&self.fd, "")?;
        target.into_string().map_err(|_| Errno::EINVAL)
    }

    fn statfs(&self) -> Result<FsStat> {
        let st = statvfs(self.proc_path().as_path())?;
        Ok(FsStat {
            typ: 0,
            block_size: st.block_size() as u32,
            blocks: st.blocks() as u64,
            blocks_free: st.blocks_free() as u64,
            blocks_available: st.blocks_available() as u64,
            files: st.files() as u64,
            files_free: st.files_free() as u64,
            fs_id: st.filesystem_id() as u64,
            name_length: st.name_max() as u32,
        })
    }

    fn allocate(&self, mode: AllocateMode, offset: u64, length: u64) -> Result<()> {
        let guard = self.open_file.lock().unwrap();
        let file = guard.as_ref().ok_or(Errno::EBADF)?;
        nix::fcntl::fallocate(
            file,
            nix::fcntl::FallocateFlags::from_bits_truncate(mode.0 as i32),
            offset as i64,
            length as i64,
        )?;
        Ok(())
    }

    fn close(&self) {
        self.open_file.lock().unwrap().take();
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }
}

// Not overridden: `renamed` has nothing to update, since handles are
// descriptor-rooted and survive renames of themselves and of any ancestor;
// `rename` (whole-file) stays at the default, as this backend keeps no
// parent descriptor to rename from and the dispatcher drives renames
// through the parent's `rename_at`.
