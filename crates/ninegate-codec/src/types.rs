// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Field-exact 9P2000.L wire types shared by codec, server, and backends.
// Author: Lukas Bower

//! Protocol field types.
//!
//! Layouts are byte-exact against the 9P2000.L wire format: integers are
//! little-endian, a QID is 13 bytes, attribute masks are 8-byte bitfields
//! encoded from field-per-bit structs.

use bitflags::bitflags;

use crate::buffer::Buffer;

/// A value that knows its 9P wire layout.
pub trait Wire: Sized {
    /// Append the wire representation to `buf`.
    fn encode(&self, buf: &mut Buffer);
    /// Read the wire representation from `buf`.
    ///
    /// Short bodies mark `buf` overrun rather than failing here.
    fn decode(buf: &mut Buffer) -> Self;
}

/// Request/reply correlation tag.
pub type Tag = u16;

/// Client-chosen file handle identifier.
pub type Fid = u32;

/// The reserved tag used only by Tversion.
pub const NO_TAG: Tag = u16::MAX;

/// The reserved "no fid" value (e.g. the auth fid when unauthenticated).
pub const NO_FID: Fid = u32::MAX;

/// Numeric user identifier carried by the U-variant creation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uid(pub u32);

/// Numeric group identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gid(pub u32);

impl Uid {
    /// The "no uid specified" sentinel.
    pub const NONE: Uid = Uid(u32::MAX);
}

impl Gid {
    /// The "no gid specified" sentinel.
    pub const NONE: Gid = Gid(u32::MAX);
}

impl Default for Uid {
    fn default() -> Self {
        Uid::NONE
    }
}

impl Default for Gid {
    fn default() -> Self {
        Gid::NONE
    }
}

impl Wire for Uid {
    fn encode(&self, buf: &mut Buffer) {
        buf.write_u32(self.0);
    }

    fn decode(buf: &mut Buffer) -> Self {
        Uid(buf.read_u32())
    }
}

impl Wire for Gid {
    fn encode(&self, buf: &mut Buffer) {
        buf.write_u32(self.0);
    }

    fn decode(buf: &mut Buffer) -> Self {
        Gid(buf.read_u32())
    }
}

bitflags! {
    /// The type byte of a QID.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct QidType: u8 {
        /// Directory.
        const DIR = 0x80;
        /// Append-only file.
        const APPEND = 0x40;
        /// Exclusive-use file.
        const EXCLUSIVE = 0x20;
        /// Mounted channel.
        const MOUNT = 0x10;
        /// Authentication file.
        const AUTH = 0x08;
        /// Not-backed-up file.
        const TEMPORARY = 0x04;
        /// Symbolic link.
        const SYMLINK = 0x02;
        /// Hard link.
        const LINK = 0x01;
    }
}

impl QidType {
    /// Plain file (no type bits set).
    pub const FILE: QidType = QidType::empty();
}

/// Server-assigned unique file identity: 13 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Qid {
    /// File type bits.
    pub typ: QidType,
    /// Version counter, incremented on modification.
    pub version: u32,
    /// Unique path number within the served tree.
    pub path: u64,
}

impl Wire for Qid {
    fn encode(&self, buf: &mut Buffer) {
        buf.write_u8(self.typ.bits());
        buf.write_u32(self.version);
        buf.write_u64(self.path);
    }

    fn decode(buf: &mut Buffer) -> Self {
        Qid {
            typ: QidType::from_bits_retain(buf.read_u8()),
            version: buf.read_u32(),
            path: buf.read_u64(),
        }
    }
}

/// Linux-style file mode: type in the top bits, permissions below.
///
/// Unknown bits round-trip untouched, so this is a transparent newtype with
/// named constants rather than a closed flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FileMode(pub u32);

impl FileMode {
    /// Mask covering the file type bits.
    pub const MASK: u32 = 0o170_000;
    /// Regular file.
    pub const REGULAR: u32 = 0o100_000;
    /// Directory.
    pub const DIRECTORY: u32 = 0o040_000;
    /// Named pipe.
    pub const NAMED_PIPE: u32 = 0o010_000;
    /// Block device.
    pub const BLOCK_DEVICE: u32 = 0o060_000;
    /// Character device.
    pub const CHARACTER_DEVICE: u32 = 0o020_000;
    /// Socket.
    pub const SOCKET: u32 = 0o140_000;
    /// Symbolic link.
    pub const SYMLINK: u32 = 0o120_000;
    /// Permission bits, including setuid/setgid/sticky.
    pub const PERMISSIONS_MASK: u32 = 0o7_777;

    /// Only the file type bits.
    #[must_use]
    pub fn file_type(self) -> FileMode {
        FileMode(self.0 & Self::MASK)
    }

    /// Only the permission bits.
    #[must_use]
    pub fn permissions(self) -> u32 {
        self.0 & Self::PERMISSIONS_MASK
    }

    /// True for regular files.
    #[must_use]
    pub fn is_regular(self) -> bool {
        self.0 & Self::MASK == Self::REGULAR
    }

    /// True for directories.
    #[must_use]
    pub fn is_dir(self) -> bool {
        self.0 & Self::MASK == Self::DIRECTORY
    }

    /// True for named pipes.
    #[must_use]
    pub fn is_named_pipe(self) -> bool {
        self.0 & Self::MASK == Self::NAMED_PIPE
    }

    /// True for block devices.
    #[must_use]
    pub fn is_block_device(self) -> bool {
        self.0 & Self::MASK == Self::BLOCK_DEVICE
    }

    /// True for character devices.
    #[must_use]
    pub fn is_char_device(self) -> bool {
        self.0 & Self::MASK == Self::CHARACTER_DEVICE
    }

    /// True for sockets.
    #[must_use]
    pub fn is_socket(self) -> bool {
        self.0 & Self::MASK == Self::SOCKET
    }

    /// True for symbolic links.
    #[must_use]
    pub fn is_symlink(self) -> bool {
        self.0 & Self::MASK == Self::SYMLINK
    }

    /// The QID type byte corresponding to this mode.
    #[must_use]
    pub fn qid_type(self) -> QidType {
        if self.is_dir() {
            QidType::DIR
        } else if self.is_symlink() {
            QidType::SYMLINK
        } else {
            QidType::FILE
        }
    }
}

impl Wire for FileMode {
    fn encode(&self, buf: &mut Buffer) {
        buf.write_u32(self.0);
    }

    fn decode(buf: &mut Buffer) -> Self {
        FileMode(buf.read_u32())
    }
}

/// Open flags carried by Tlopen/Tlcreate: Linux `O_*` bits.
///
/// Only the access mode is interpreted by the server; other bits pass through
/// to the backend, so unknown bits must survive a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// Open read-only.
    pub const READ_ONLY: OpenFlags = OpenFlags(0);
    /// Open write-only.
    pub const WRITE_ONLY: OpenFlags = OpenFlags(1);
    /// Open read-write.
    pub const READ_WRITE: OpenFlags = OpenFlags(2);
    /// Open for execute (classic 9P `OEXEC` maps here).
    pub const READ_AND_EXECUTE: OpenFlags = OpenFlags(3);
    /// Mask covering the access mode.
    pub const MODE_MASK: u32 = 0x3;
    /// Truncate on open (`O_TRUNC`).
    pub const TRUNCATE: u32 = 0o1_000;

    /// The access mode bits only.
    #[must_use]
    pub fn mode(self) -> OpenFlags {
        OpenFlags(self.0 & Self::MODE_MASK)
    }

    /// True if `O_TRUNC` is set.
    #[must_use]
    pub fn truncate(self) -> bool {
        self.0 & Self::TRUNCATE != 0
    }
}

impl Wire for OpenFlags {
    fn encode(&self, buf: &mut Buffer) {
        buf.write_u32(self.0);
    }

    fn decode(buf: &mut Buffer) -> Self {
        OpenFlags(buf.read_u32())
    }
}

/// Classic 9P2000 open mode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct LegacyMode(pub u8);

impl LegacyMode {
    /// Read access.
    pub const READ: LegacyMode = LegacyMode(0);
    /// Write access.
    pub const WRITE: LegacyMode = LegacyMode(1);
    /// Read and write access.
    pub const READ_WRITE: LegacyMode = LegacyMode(2);
    /// Execute access.
    pub const EXEC: LegacyMode = LegacyMode(3);
    /// Truncate bit.
    pub const TRUNC: u8 = 0x10;
    /// Remove-on-clunk bit.
    pub const RCLOSE: u8 = 0x40;

    /// The access mode bits only.
    #[must_use]
    pub fn mode(self) -> LegacyMode {
        LegacyMode(self.0 & 0x3)
    }

    /// The equivalent 9P2000.L open flags for bookkeeping.
    #[must_use]
    pub fn open_flags(self) -> OpenFlags {
        let mut flags = u32::from(self.mode().0);
        if flags == 3 {
            // OEXEC reads.
            flags = OpenFlags::READ_AND_EXECUTE.0;
        }
        if self.0 & Self::TRUNC != 0 {
            flags |= OpenFlags::TRUNCATE;
        }
        OpenFlags(flags)
    }
}

impl Wire for LegacyMode {
    fn encode(&self, buf: &mut Buffer) {
        buf.write_u8(self.0);
    }

    fn decode(buf: &mut Buffer) -> Self {
        LegacyMode(buf.read_u8())
    }
}

/// Directory bit in classic 9P permission words.
pub const DM_DIR: u32 = 0x8000_0000;

/// Which attributes a Tgetattr asks for, and which an Rgetattr answers.
///
/// One bool per mask bit; the wire form is a u64 bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct AttrMask {
    pub mode: bool,
    pub nlink: bool,
    pub uid: bool,
    pub gid: bool,
    pub rdev: bool,
    pub atime: bool,
    pub mtime: bool,
    pub ctime: bool,
    pub ino: bool,
    pub size: bool,
    pub blocks: bool,
    pub btime: bool,
    pub gen: bool,
    pub data_version: bool,
}

impl AttrMask {
    /// Mask with every attribute requested.
    #[must_use]
    pub fn all() -> AttrMask {
        AttrMask {
            mode: true,
            nlink: true,
            uid: true,
            gid: true,
            rdev: true,
            atime: true,
            mtime: true,
            ctime: true,
            ino: true,
            size: true,
            blocks: true,
            btime: true,
            gen: true,
            data_version: true,
        }
    }
}

impl Wire for AttrMask {
    fn encode(&self, buf: &mut Buffer) {
        let mut mask: u64 = 0;
        let bits = [
            (self.mode, 0x0000_0001u64),
            (self.nlink, 0x0000_0002),
            (self.uid, 0x0000_0004),
            (self.gid, 0x0000_0008),
            (self.rdev, 0x0000_0010),
            (self.atime, 0x0000_0020),
            (self.mtime, 0x0000_0040),
            (self.ctime, 0x0000_0080),
            (self.ino, 0x0000_0100),
            (self.size, 0x0000_0200),
            (self.blocks, 0x0000_0400),
            (self.btime, 0x0000_0800),
            (self.gen, 0x0000_1000),
            (self.data_version, 0x0000_2000),
        ];
        for (set, bit) in bits {
            if set {
                mask |= bit;
            }
        }
        buf.write_u64(mask);
    }

    fn decode(buf: &mut Buffer) -> Self {
        let mask = buf.read_u64();
        AttrMask {
            mode: mask & 0x0000_0001 != 0,
            nlink: mask & 0x0000_0002 != 0,
            uid: mask & 0x0000_0004 != 0,
            gid: mask & 0x0000_0008 != 0,
            rdev: mask & 0x0000_0010 != 0,
            atime: mask & 0x0000_0020 != 0,
            mtime: mask & 0x0000_0040 != 0,
            ctime: mask & 0x0000_0080 != 0,
            ino: mask & 0x0000_0100 != 0,
            size: mask & 0x0000_0200 != 0,
            blocks: mask & 0x0000_0400 != 0,
            btime: mask & 0x0000_0800 != 0,
            gen: mask & 0x0000_1000 != 0,
            data_version: mask & 0x0000_2000 != 0,
        }
    }
}

/// File attributes as carried by Rgetattr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct Attr {
    pub mode: FileMode,
    pub uid: Uid,
    pub gid: Gid,
    pub nlink: u64,
    pub rdev: u64,
    pub size: u64,
    pub block_size: u64,
    pub blocks: u64,
    pub atime_seconds: u64,
    pub atime_nanoseconds: u64,
    pub mtime_seconds: u64,
    pub mtime_nanoseconds: u64,
    pub ctime_seconds: u64,
    pub ctime_nanoseconds: u64,
    pub btime_seconds: u64,
    pub btime_nanoseconds: u64,
    pub gen: u64,
    pub data_version: u64,
}

impl Wire for Attr {
    fn encode(&self, buf: &mut Buffer) {
        self.mode.encode(buf);
        self.uid.encode(buf);
        self.gid.encode(buf);
        buf.write_u64(self.nlink);
        buf.write_u64(self.rdev);
        buf.write_u64(self.size);
        buf.write_u64(self.block_size);
        buf.write_u64(self.blocks);
        buf.write_u64(self.atime_seconds);
        buf.write_u64(self.atime_nanoseconds);
        buf.write_u64(self.mtime_seconds);
        buf.write_u64(self.mtime_nanoseconds);
        buf.write_u64(self.ctime_seconds);
        buf.write_u64(self.ctime_nanoseconds);
        buf.write_u64(self.btime_seconds);
        buf.write_u64(self.btime_nanoseconds);
        buf.write_u64(self.gen);
        buf.write_u64(self.data_version);
    }

    fn decode(buf: &mut Buffer) -> Self {
        Attr {
            mode: FileMode::decode(buf),
            uid: Uid::decode(buf),
            gid: Gid::decode(buf),
            nlink: buf.read_u64(),
            rdev: buf.read_u64(),
            size: buf.read_u64(),
            block_size: buf.read_u64(),
            blocks: buf.read_u64(),
            atime_seconds: buf.read_u64(),
            atime_nanoseconds: buf.read_u64(),
            mtime_seconds: buf.read_u64(),
            mtime_nanoseconds: buf.read_u64(),
            ctime_seconds: buf.read_u64(),
            ctime_nanoseconds: buf.read_u64(),
            btime_seconds: buf.read_u64(),
            btime_nanoseconds: buf.read_u64(),
            gen: buf.read_u64(),
            data_version: buf.read_u64(),
        }
    }
}

/// Which fields a Tsetattr intends to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct SetAttrMask {
    pub permissions: bool,
    pub uid: bool,
    pub gid: bool,
    pub size: bool,
    pub atime: bool,
    pub mtime: bool,
    pub ctime: bool,
    pub atime_not_system_time: bool,
    pub mtime_not_system_time: bool,
}

impl SetAttrMask {
    /// True if no field is selected.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self == SetAttrMask::default()
    }
}

impl Wire for SetAttrMask {
    fn encode(&self, buf: &mut Buffer) {
        let mut mask: u32 = 0;
        let bits = [
            (self.permissions, 0x0000_0001u32),
            (self.uid, 0x0000_0002),
            (self.gid, 0x0000_0004),
            (self.size, 0x0000_0008),
            (self.atime, 0x0000_0010),
            (self.mtime, 0x0000_0020),
            (self.ctime, 0x0000_0040),
            (self.atime_not_system_time, 0x0000_0080),
            (self.mtime_not_system_time, 0x0000_0100),
        ];
        for (set, bit) in bits {
            if set {
                mask |= bit;
            }
        }
        buf.write_u32(mask);
    }

    fn decode(buf: &mut Buffer) -> Self {
        let mask = buf.read_u32();
        SetAttrMask {
            permissions: mask & 0x0000_0001 != 0,
            uid: mask & 0x0000_0002 != 0,
            gid: mask & 0x0000_0004 != 0,
            size: mask & 0x0000_0008 != 0,
            atime: mask & 0x0000_0010 != 0,
            mtime: mask & 0x0000_0020 != 0,
            ctime: mask & 0x0000_0040 != 0,
            atime_not_system_time: mask & 0x0000_0080 != 0,
            mtime_not_system_time: mask & 0x0000_0100 != 0,
        }
    }
}

/// The values accompanying a [`SetAttrMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct SetAttr {
    pub permissions: FileMode,
    pub uid: Uid,
    pub gid: Gid,
    pub size: u64,
    pub atime_seconds: u64,
    pub atime_nanoseconds: u64,
    pub mtime_seconds: u64,
    pub mtime_nanoseconds: u64,
}

impl Wire for SetAttr {
    fn encode(&self, buf: &mut Buffer) {
        self.permissions.encode(buf);
        self.uid.encode(buf);
        self.gid.encode(buf);
        buf.write_u64(self.size);
        buf.write_u64(self.atime_seconds);
        buf.write_u64(self.atime_nanoseconds);
        buf.write_u64(self.mtime_seconds);
        buf.write_u64(self.mtime_nanoseconds);
    }

    fn decode(buf: &mut Buffer) -> Self {
        SetAttr {
            permissions: FileMode::decode(buf),
            uid: Uid::decode(buf),
            gid: Gid::decode(buf),
            size: buf.read_u64(),
            atime_seconds: buf.read_u64(),
            atime_nanoseconds: buf.read_u64(),
            mtime_seconds: buf.read_u64(),
            mtime_nanoseconds: buf.read_u64(),
        }
    }
}

/// Filesystem statistics carried by Rstatfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct FsStat {
    pub typ: u32,
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub fs_id: u64,
    pub name_length: u32,
}

impl Wire for FsStat {
    fn encode(&self, buf: &mut Buffer) {
        buf.write_u32(self.typ);
        buf.write_u32(self.block_size);
        buf.write_u64(self.blocks);
        buf.write_u64(self.blocks_free);
        buf.write_u64(self.blocks_available);
        buf.write_u64(self.files);
        buf.write_u64(self.files_free);
        buf.write_u64(self.fs_id);
        buf.write_u32(self.name_length);
    }

    fn decode(buf: &mut Buffer) -> Self {
        FsStat {
            typ: buf.read_u32(),
            block_size: buf.read_u32(),
            blocks: buf.read_u64(),
            blocks_free: buf.read_u64(),
            blocks_available: buf.read_u64(),
            files: buf.read_u64(),
            files_free: buf.read_u64(),
            fs_id: buf.read_u64(),
            name_length: buf.read_u32(),
        }
    }
}

/// A single directory entry as packed into Rreaddir.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dirent {
    /// Identity of the entry.
    pub qid: Qid,
    /// Opaque resume cursor; a later Treaddir with this offset continues
    /// after this entry.
    pub offset: u64,
    /// Entry type byte (same encoding as the QID type).
    pub typ: u8,
    /// Entry name (a single component).
    pub name: String,
}

impl Dirent {
    /// Encoded size in bytes: QID + offset + type + string.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        13 + 8 + 1 + 2 + self.name.len()
    }
}

impl Wire for Dirent {
    fn encode(&self, buf: &mut Buffer) {
        self.qid.encode(buf);
        buf.write_u64(self.offset);
        buf.write_u8(self.typ);
        buf.write_string(&self.name);
    }

    fn decode(buf: &mut Buffer) -> Self {
        Dirent {
            qid: Qid::decode(buf),
            offset: buf.read_u64(),
            typ: buf.read_u8(),
            name: buf.read_string(),
        }
    }
}

/// Mode word of the Tallocate extension (Linux `fallocate` bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct AllocateMode(pub u32);

impl AllocateMode {
    /// `FALLOC_FL_KEEP_SIZE`.
    pub const KEEP_SIZE: u32 = 0x01;
    /// `FALLOC_FL_PUNCH_HOLE`.
    pub const PUNCH_HOLE: u32 = 0x02;
    /// `FALLOC_FL_NO_HIDE_STALE`.
    pub const NO_HIDE_STALE: u32 = 0x04;
    /// `FALLOC_FL_COLLAPSE_RANGE`.
    pub const COLLAPSE_RANGE: u32 = 0x08;
    /// `FALLOC_FL_ZERO_RANGE`.
    pub const ZERO_RANGE: u32 = 0x10;
    /// `FALLOC_FL_INSERT_RANGE`.
    pub const INSERT_RANGE: u32 = 0x20;
    /// `FALLOC_FL_UNSHARE_RANGE`.
    pub const UNSHARE_RANGE: u32 = 0x40;
}

impl Wire for AllocateMode {
    fn encode(&self, buf: &mut Buffer) {
        buf.write_u32(self.0);
    }

    fn decode(buf: &mut Buffer) -> Self {
        AllocateMode(buf.read_u32())
    }
}

/// Advisory lock kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LockType {
    /// Shared read lock.
    Read = 0,
    /// Exclusive write lock.
    Write = 1,
    /// Release a held lock.
    Unlock = 2,
}

impl LockType {
    /// Parse from the wire byte; unknown values read as `Unlock`.
    #[must_use]
    pub fn from_wire(v: u8) -> LockType {
        match v {
            0 => LockType::Read,
            1 => LockType::Write,
            _ => LockType::Unlock,
        }
    }
}

bitflags! {
    /// Advisory lock request flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LockFlags: u32 {
        /// Block until the lock can be granted.
        const BLOCK = 0x01;
        /// Reclaim after server restart (reserved).
        const RECLAIM = 0x02;
    }
}

/// Advisory lock outcome reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LockStatus {
    /// The lock was granted (or released).
    Ok = 0,
    /// The lock is held elsewhere and `BLOCK` was not set.
    Blocked = 1,
    /// The backend failed to process the request.
    Error = 2,
    /// The server is in its reclaim grace period.
    Grace = 3,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Wire + PartialEq + std::fmt::Debug>(v: &T) {
        let mut buf = Buffer::empty();
        v.encode(&mut buf);
        let mut buf = Buffer::new(buf.into_vec());
        let got = T::decode(&mut buf);
        assert!(!buf.is_overrun());
        assert_eq!(&got, v);
    }

    #[test]
    fn qid_is_13_bytes() {
        let q = Qid {
            typ: QidType::DIR,
            version: 7,
            path: 99,
        };
        let mut buf = Buffer::empty();
        q.encode(&mut buf);
        assert_eq!(buf.len(), 13);
        round_trip(&q);
    }

    #[test]
    fn attr_mask_all_bits() {
        round_trip(&AttrMask::all());
        let mut buf = Buffer::empty();
        AttrMask::all().encode(&mut buf);
        assert_eq!(buf.len(), 8);
        let mut b = Buffer::new(buf.into_vec());
        assert_eq!(b.read_u64(), 0x3fff);
    }

    #[test]
    fn attr_layout_round_trips() {
        round_trip(&Attr {
            mode: FileMode(FileMode::REGULAR | 0o644),
            uid: Uid(1000),
            gid: Gid(1000),
            nlink: 2,
            rdev: 0,
            size: 4096,
            block_size: 512,
            blocks: 8,
            atime_seconds: 1,
            atime_nanoseconds: 2,
            mtime_seconds: 3,
            mtime_nanoseconds: 4,
            ctime_seconds: 5,
            ctime_nanoseconds: 6,
            btime_seconds: 7,
            btime_nanoseconds: 8,
            gen: 9,
            data_version: 10,
        });
    }

    #[test]
    fn set_attr_mask_round_trips() {
        round_trip(&SetAttrMask {
            permissions: true,
            size: true,
            mtime: true,
            mtime_not_system_time: true,
            ..SetAttrMask::default()
        });
    }

    #[test]
    fn fs_stat_round_trips() {
        round_trip(&FsStat {
            typ: 0x0102_1997,
            block_size: 4096,
            blocks: 1,
            blocks_free: 2,
            blocks_available: 3,
            files: 4,
            files_free: 5,
            fs_id: 6,
            name_length: 255,
        });
    }

    #[test]
    fn dirent_wire_size_matches_encoding() {
        let d = Dirent {
            qid: Qid::default(),
            offset: 1,
            typ: 0x80,
            name: "subdir".to_string(),
        };
        let mut buf = Buffer::empty();
        d.encode(&mut buf);
        assert_eq!(buf.len(), d.wire_size());
        round_trip(&d);
    }

    #[test]
    fn file_mode_type_checks() {
        assert!(FileMode(FileMode::DIRECTORY | 0o755).is_dir());
        assert!(FileMode(FileMode::REGULAR).is_regular());
        assert!(FileMode(FileMode::SYMLINK).is_symlink());
        assert_eq!(FileMode(FileMode::DIRECTORY).qid_type(), QidType::DIR);
        assert_eq!(FileMode(FileMode::REGULAR | 0o4755).permissions(), 0o4755);
    }

    #[test]
    fn open_flags_mode_and_passthrough() {
        let f = OpenFlags(OpenFlags::READ_WRITE.0 | OpenFlags::TRUNCATE | 0o100);
        assert_eq!(f.mode(), OpenFlags::READ_WRITE);
        assert!(f.truncate());
        round_trip(&f);
    }

    #[test]
    fn legacy_mode_conversion() {
        let m = LegacyMode(LegacyMode::WRITE.0 | LegacyMode::TRUNC);
        assert_eq!(m.mode(), LegacyMode::WRITE);
        let flags = m.open_flags();
        assert_eq!(flags.mode(), OpenFlags::WRITE_ONLY);
        assert!(flags.truncate());
    }
}
