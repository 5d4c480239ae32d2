// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Read-only in-memory backend serving one flat directory.
// Author: Lukas Bower

//! A static, read-only, in-memory backend.
//!
//! One directory of regular files, fixed at build time. QIDs are assigned
//! once per filesystem, so a name walks to the same identity every time.
//! Directory offsets are entry indexes over the sorted name list. Every
//! mutating operation answers `EROFS`.
//!
//! ```
//! use ninegate::fsimpl::staticfs::Builder;
//!
//! let fs = Builder::new()
//!     .file("motd", b"hello\n")
//!     .unwrap()
//!     .build();
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use ninegate_codec::{
    Attr, AttrMask, Dirent, FileMode, FsStat, Gid, OpenFlags, Qid, QidType, Uid,
};

use crate::errno::{Errno, Result};
use crate::file::{Attacher, File};
use crate::fsimpl::qidgen::PathGenerator;

/// `V9FS_MAGIC`, reported as the filesystem type.
const V9FS_MAGIC: u32 = 0x0102_1997;

const BLOCK_SIZE: u32 = 4096;

struct Entry {
    qid: Qid,
    content: Arc<[u8]>,
}

struct Inner {
    root_qid: Qid,
    /// Sorted by name; readdir offsets index into this order.
    files: BTreeMap<String, Entry>,
}

/// Builder for a [`StaticFs`].
#[derive(Default)]
pub struct Builder {
    files: BTreeMap<String, Arc<[u8]>>,
}

impl Builder {
    /// Start an empty filesystem.
    #[must_use]
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Add a regular file. Names must be plain components and unique.
    pub fn file(mut self, name: &str, content: &[u8]) -> Result<Builder> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(Errno::EINVAL);
        }
        if self.files.contains_key(name) {
            return Err(Errno::EEXIST);
        }
        self.files.insert(name.to_string(), Arc::from(content));
        Ok(self)
    }

    /// Assign QIDs and produce the attacher.
    #[must_use]
    pub fn build(self) -> StaticFs {
        let qids = PathGenerator::new();
        let root_qid = qids.new_qid(QidType::DIR);
        let files = self
            .files
            .into_iter()
            .map(|(name, content)| {
                (
                    name,
                    Entry {
                        qid: qids.new_qid(QidType::FILE),
                        content,
                    },
                )
            })
            .collect();
        StaticFs {
            inner: Arc::new(Inner { root_qid, files }),
        }
    }
}

/// The attacher for a built static filesystem.
#[derive(Clone)]
pub struct StaticFs {
    inner: Arc<Inner>,
}

impl Attacher for StaticFs {
    fn attach(&self) -> Result<Box<dyn File>> {
        Ok(Box::new(Dir {
            fs: self.inner.clone(),
        }))
    }
}

fn statfs(files: u64) -> FsStat {
    FsStat {
        typ: V9FS_MAGIC,
        block_size: BLOCK_SIZE,
        blocks: 0,
        blocks_free: 0,
        blocks_available: 0,
        files,
        files_free: 0,
        fs_id: 0,
        name_length: 255,
    }
}

fn dir_attr(qid: Qid, nlink: u64) -> (Qid, AttrMask, Attr) {
    let attr = Attr {
        mode: FileMode(FileMode::DIRECTORY | 0o555),
        uid: Uid(0),
        gid: Gid(0),
        nlink,
        size: u64::from(BLOCK_SIZE),
        block_size: u64::from(BLOCK_SIZE),
        ..Attr::default()
    };
    (qid, attr_valid(), attr)
}

fn file_attr(qid: Qid, size: u64) -> (Qid, AttrMask, Attr) {
    let attr = Attr {
        mode: FileMode(FileMode::REGULAR | 0o444),
        uid: Uid(0),
        gid: Gid(0),
        nlink: 1,
        size,
        block_size: u64::from(BLOCK_SIZE),
        blocks: size.div_ceil(u64::from(BLOCK_SIZE)),
        ..Attr::default()
    };
    (qid, attr_valid(), attr)
}

fn attr_valid() -> AttrMask {
    AttrMask {
        mode: true,
        uid: true,
        gid: true,
        nlink: true,
        size: true,
        blocks: true,
        ..AttrMask::default()
    }
}

/// The single directory.
struct Dir {
    fs: Arc<Inner>,
}

impl File for Dir {
    fn walk(&self, names: &[&str]) -> Result<(Vec<Qid>, Box<dyn File>)> {
        match names {
            [] => Ok((
                vec![self.fs.root_qid],
                Box::new(Dir {
                    fs: self.fs.clone(),
                }),
            )),
            [name] => {
                let entry = self.fs.files.get(*name).ok_or(Errno::ENOENT)?;
                Ok((
                    vec![entry.qid],
                    Box::new(StaticFile {
                        fs: self.fs.clone(),
                        qid: entry.qid,
                        content: entry.content.clone(),
                    }),
                ))
            }
            _ => Err(Errno::EINVAL),
        }
    }

    fn open(&self, flags: OpenFlags) -> Result<(Qid, u32)> {
        if flags.mode() != OpenFlags::READ_ONLY {
            return Err(Errno::EROFS);
        }
        Ok((self.fs.root_qid, 0))
    }

    fn create(
        &self,
        _name: &str,
        _flags: OpenFlags,
        _permissions: FileMode,
        _uid: Uid,
        _gid: Gid,
    ) -> Result<(Box<dyn File>, Qid, u32)> {
        Err(Errno::EROFS)
    }

    fn mkdir(&self, _name: &str, _permissions: FileMode, _uid: Uid, _gid: Gid) -> Result<Qid> {
        Err(Errno::EROFS)
    }

    fn symlink(&self, _target: &str, _name: &str, _uid: Uid, _gid: Gid) -> Result<Qid> {
        Err(Errno::EROFS)
    }

    fn mknod(
        &self,
        _name: &str,
        _mode: FileMode,
        _major: u32,
        _minor: u32,
        _uid: Uid,
        _gid: Gid,
    ) -> Result<Qid> {
        Err(Errno::EROFS)
    }

    fn link(&self, _target: &dyn File, _name: &str) -> Result<()> {
        Err(Errno::EROFS)
    }

    fn rename_at(&self, _old_name: &str, _new_dir: &dyn File, _new_name: &str) -> Result<()> {
        Err(Errno::EROFS)
    }

    fn unlink_at(&self, _name: &str, _flags: u32) -> Result<()> {
        Err(Errno::EROFS)
    }

    fn get_attr(&self, _mask: AttrMask) -> Result<(Qid, AttrMask, Attr)> {
        Ok(dir_attr(self.fs.root_qid, 2))
    }

    fn readdir(&self, offset: u64, _count: u32) -> Result<Vec<Dirent>> {
        let entries = self
            .fs
            .files
            .iter()
            .enumerate()
            .skip(offset as usize)
            .map(|(index, (name, entry))| Dirent {
                qid: entry.qid,
                offset: index as u64 + 1,
                typ: entry.qid.typ.bits(),
                name: name.clone(),
            })
            .collect();
        Ok(entries)
    }

    fn fsync(&self) -> Result<()> {
        Ok(())
    }

    fn statfs(&self) -> Result<FsStat> {
        Ok(statfs(self.fs.files.len() as u64))
    }
}

/// One regular file.
struct StaticFile {
    fs: Arc<Inner>,
    qid: Qid,
    content: Arc<[u8]>,
}

impl File for StaticFile {
    fn walk(&self, names: &[&str]) -> Result<(Vec<Qid>, Box<dyn File>)> {
        match names {
            [] => Ok((
                vec![self.qid],
                Box::new(StaticFile {
                    fs: self.fs.clone(),
                    qid: self.qid,
                    content: self.content.clone(),
                }),
            )),
            _ => Err(Errno::ENOTDIR),
        }
    }

    fn open(&self, flags: OpenFlags) -> Result<(Qid, u32)> {
        if flags.mode() != OpenFlags::READ_ONLY {
            return Err(Errno::EROFS);
        }
        Ok((self.qid, 0))
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let content = &self.content;
        if offset >= content.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(content.len() - start);
        buf[..n].copy_from_slice(&content[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, _data: &[u8], _offset: u64) -> Result<usize> {
        Err(Errno::EROFS)
    }

    fn set_attr(
        &self,
        _valid: ninegate_codec::SetAttrMask,
        _attr: ninegate_codec::SetAttr,
    ) -> Result<()> {
        Err(Errno::EROFS)
    }

    fn get_attr(&self, _mask: AttrMask) -> Result<(Qid, AttrMask, Attr)> {
        Ok(file_attr(self.qid, self.content.len() as u64))
    }

    fn fsync(&self) -> Result<()> {
        Ok(())
    }

    fn statfs(&self) -> Result<FsStat> {
        Ok(statfs(self.fs.files.len() as u64))
    }
}
