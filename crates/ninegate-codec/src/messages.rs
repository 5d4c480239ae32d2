// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Tagged message catalog for the 9P2000 and 9P2000.L dialects.
// Author: Lukas Bower

//! The tagged message catalog.
//!
//! Requests are [`Tmessage`], replies are [`Rmessage`]. Each variant knows its
//! one-byte type code and its body layout; the `size[4] type[1] tag[2]` frame
//! header is the transport's business. Three messages ([`Rread`], [`Twrite`]
//! and [`Rreaddir`]) split their body into a fixed part and a bulk *payload*
//! whose length is implied by the frame, so large reads and writes are never
//! copied through an intermediate buffer.
//!
//! Which type codes are legal depends on the negotiated [`Dialect`]: the
//! classic 9P2000 set is a small subset, and its Tattach/Rerror layouts differ
//! from the Linux dialect. Decoding a code that is not in the negotiated set
//! is a protocol error that kills the connection.
//!
//! [`Rread`]: Rmessage::Read
//! [`Twrite`]: Tmessage::Write
//! [`Rreaddir`]: Rmessage::Readdir

use thiserror::Error;

use crate::buffer::Buffer;
use crate::types::{
    AllocateMode, Attr, AttrMask, Dirent, Fid, FileMode, FsStat, Gid, LegacyMode, OpenFlags, Qid,
    SetAttr, SetAttrMask, Tag, Uid, Wire,
};

/// Number of bytes in the frame header (`size[4] type[1] tag[2]`).
pub const HEADER_LENGTH: u32 = 7;

/// Largest frame this implementation will ever send or accept.
pub const MAXIMUM_LENGTH: u32 = 4 * 1024 * 1024;

/// One-byte message type code.
pub type MsgType = u8;

/// Message type codes for both dialects.
#[allow(missing_docs)]
pub mod code {
    pub const RLERROR: u8 = 7;
    pub const TSTATFS: u8 = 8;
    pub const RSTATFS: u8 = 9;
    pub const TLOPEN: u8 = 12;
    pub const RLOPEN: u8 = 13;
    pub const TLCREATE: u8 = 14;
    pub const RLCREATE: u8 = 15;
    pub const TSYMLINK: u8 = 16;
    pub const RSYMLINK: u8 = 17;
    pub const TMKNOD: u8 = 18;
    pub const RMKNOD: u8 = 19;
    pub const TRENAME: u8 = 20;
    pub const RRENAME: u8 = 21;
    pub const TREADLINK: u8 = 22;
    pub const RREADLINK: u8 = 23;
    pub const TGETATTR: u8 = 24;
    pub const RGETATTR: u8 = 25;
    pub const TSETATTR: u8 = 26;
    pub const RSETATTR: u8 = 27;
    pub const TXATTRWALK: u8 = 30;
    pub const RXATTRWALK: u8 = 31;
    pub const TXATTRCREATE: u8 = 32;
    pub const RXATTRCREATE: u8 = 33;
    pub const TREADDIR: u8 = 40;
    pub const RREADDIR: u8 = 41;
    pub const TFSYNC: u8 = 50;
    pub const RFSYNC: u8 = 51;
    pub const TLINK: u8 = 70;
    pub const RLINK: u8 = 71;
    pub const TMKDIR: u8 = 72;
    pub const RMKDIR: u8 = 73;
    pub const TRENAMEAT: u8 = 74;
    pub const RRENAMEAT: u8 = 75;
    pub const TUNLINKAT: u8 = 76;
    pub const RUNLINKAT: u8 = 77;
    pub const TVERSION: u8 = 100;
    pub const RVERSION: u8 = 101;
    pub const TAUTH: u8 = 102;
    pub const RAUTH: u8 = 103;
    pub const TATTACH: u8 = 104;
    pub const RATTACH: u8 = 105;
    pub const RERROR: u8 = 107;
    pub const TFLUSH: u8 = 108;
    pub const RFLUSH: u8 = 109;
    pub const TWALK: u8 = 110;
    pub const RWALK: u8 = 111;
    pub const TOPEN: u8 = 112;
    pub const ROPEN: u8 = 113;
    pub const TCREATE: u8 = 114;
    pub const RCREATE: u8 = 115;
    pub const TREAD: u8 = 116;
    pub const RREAD: u8 = 117;
    pub const TWRITE: u8 = 118;
    pub const RWRITE: u8 = 119;
    pub const TCLUNK: u8 = 120;
    pub const RCLUNK: u8 = 121;
    pub const TREMOVE: u8 = 122;
    pub const RREMOVE: u8 = 123;
    pub const TFLUSHF: u8 = 124;
    pub const RFLUSHF: u8 = 125;
    pub const TWALKGETATTR: u8 = 126;
    pub const RWALKGETATTR: u8 = 127;
    pub const TUCREATE: u8 = 128;
    pub const RUCREATE: u8 = 129;
    pub const TUMKDIR: u8 = 130;
    pub const RUMKDIR: u8 = 131;
    pub const TUMKNOD: u8 = 132;
    pub const RUMKNOD: u8 = 133;
    pub const TUSYMLINK: u8 = 134;
    pub const RUSYMLINK: u8 = 135;
    pub const TALLOCATE: u8 = 138;
    pub const RALLOCATE: u8 = 139;
}

/// Errors produced while decoding a message body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The type code is unknown or not legal in the negotiated dialect.
    #[error("invalid message type: {0}")]
    InvalidMsgType(MsgType),
    /// The body did not contain enough bytes for its declared fields.
    #[error("message type {0} body overrun")]
    Truncated(MsgType),
}

/// Negotiated protocol dialect; selects the legal message set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Classic 9P2000.
    P2000,
    /// 9P2000.L, including this implementation's extensions.
    P2000L,
}

/// Payload slice accompanying an encoded message body.
///
/// Borrowed for bulk data already owned by the message (read/write), owned
/// for the readdir packing the encoder has to compute.
#[derive(Debug)]
pub enum Payload<'a> {
    /// The message carries no payload.
    None,
    /// Payload borrowed from the message.
    Borrowed(&'a [u8]),
    /// Payload computed during encoding.
    Owned(Vec<u8>),
}

impl Payload<'_> {
    /// View the payload bytes, empty when there are none.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::None => &[],
            Payload::Borrowed(b) => b,
            Payload::Owned(v) => v,
        }
    }
}

/// For payload-carrying type codes, the size of the fixed body portion.
///
/// The transport reads exactly this many bytes into a pooled buffer and the
/// rest of the frame straight into the payload slot.
#[must_use]
pub fn payload_fixed_size(ty: MsgType) -> Option<u32> {
    match ty {
        // count[4]
        code::RREAD | code::RREADDIR => Some(4),
        // fid[4] offset[8] count[4]
        code::TWRITE => Some(16),
        _ => None,
    }
}

/// A message that can cross the framed transport.
///
/// Implemented by [`Tmessage`] and [`Rmessage`]; servers decode T and encode
/// R, clients do the reverse.
pub trait Frame: Sized + Send + std::fmt::Debug {
    /// The type code of this message.
    fn msg_type(&self) -> MsgType;

    /// Encode the fixed body, returning it with any payload slice.
    fn encode(&self) -> (Vec<u8>, Payload<'_>);

    /// Decode a message of type `ty` from its body and payload.
    ///
    /// The body buffer is borrowed so the transport can return it to its
    /// pool afterwards; the payload is moved into the message.
    fn decode(
        dialect: Dialect,
        ty: MsgType,
        body: &mut Buffer,
        payload: Vec<u8>,
    ) -> Result<Self, CodecError>;
}

/// Request messages.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Tmessage {
    /// Version negotiation; the only message allowed to carry the no-tag.
    Version { msize: u32, version: String },
    /// Authentication request. Never honored by this server.
    Auth {
        auth_fid: Fid,
        user_name: String,
        attach_name: String,
        uid: Uid,
    },
    /// Classic 9P2000 attach (no numeric uid on the wire).
    Attach {
        fid: Fid,
        auth_fid: Fid,
        user_name: String,
        attach_name: String,
    },
    /// 9P2000.L attach.
    Lattach {
        fid: Fid,
        auth_fid: Fid,
        user_name: String,
        attach_name: String,
        uid: Uid,
    },
    /// Wait for an older request to finish.
    Flush { old_tag: Tag },
    /// Traverse path components, producing a new fid.
    Walk {
        fid: Fid,
        new_fid: Fid,
        names: Vec<String>,
    },
    /// Classic open.
    Open { fid: Fid, mode: LegacyMode },
    /// Classic create.
    Create {
        fid: Fid,
        name: String,
        permissions: u32,
        mode: LegacyMode,
    },
    Read {
        fid: Fid,
        offset: u64,
        count: u32,
    },
    /// Write; `data` is the frame payload.
    Write {
        fid: Fid,
        offset: u64,
        data: Vec<u8>,
    },
    Clunk { fid: Fid },
    Remove { fid: Fid },
    Statfs { fid: Fid },
    Lopen { fid: Fid, flags: OpenFlags },
    Lcreate {
        fid: Fid,
        name: String,
        open_flags: OpenFlags,
        permissions: FileMode,
        gid: Gid,
    },
    Symlink {
        directory: Fid,
        name: String,
        target: String,
        gid: Gid,
    },
    Mknod {
        directory: Fid,
        name: String,
        mode: FileMode,
        major: u32,
        minor: u32,
        gid: Gid,
    },
    Rename {
        fid: Fid,
        directory: Fid,
        name: String,
    },
    Readlink { fid: Fid },
    Getattr { fid: Fid, attr_mask: AttrMask },
    Setattr {
        fid: Fid,
        valid: SetAttrMask,
        set_attr: SetAttr,
    },
    Xattrwalk {
        fid: Fid,
        new_fid: Fid,
        name: String,
    },
    Xattrcreate {
        fid: Fid,
        name: String,
        attr_size: u64,
        flags: u32,
    },
    Readdir {
        directory: Fid,
        offset: u64,
        count: u32,
    },
    Fsync { fid: Fid },
    Link {
        directory: Fid,
        target: Fid,
        name: String,
    },
    Mkdir {
        directory: Fid,
        name: String,
        permissions: FileMode,
        gid: Gid,
    },
    Renameat {
        old_directory: Fid,
        old_name: String,
        new_directory: Fid,
        new_name: String,
    },
    Unlinkat {
        directory: Fid,
        name: String,
        flags: u32,
    },
    /// Deprecated per-file flush; acknowledged and otherwise ignored.
    Flushf { fid: Fid },
    /// Walk plus attributes of the final component in one round trip.
    Walkgetattr {
        fid: Fid,
        new_fid: Fid,
        names: Vec<String>,
    },
    /// Tlcreate carrying an effective uid.
    Ucreate {
        fid: Fid,
        name: String,
        open_flags: OpenFlags,
        permissions: FileMode,
        gid: Gid,
        uid: Uid,
    },
    /// Tmkdir carrying an effective uid.
    Umkdir {
        directory: Fid,
        name: String,
        permissions: FileMode,
        gid: Gid,
        uid: Uid,
    },
    /// Tmknod carrying an effective uid.
    Umknod {
        directory: Fid,
        name: String,
        mode: FileMode,
        major: u32,
        minor: u32,
        gid: Gid,
        uid: Uid,
    },
    /// Tsymlink carrying an effective uid.
    Usymlink {
        directory: Fid,
        name: String,
        target: String,
        gid: Gid,
        uid: Uid,
    },
    /// Preallocate or punch file space.
    Allocate {
        fid: Fid,
        mode: AllocateMode,
        offset: u64,
        length: u64,
    },
}

/// Reply messages.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Rmessage {
    /// 9P2000.L error reply carrying a Linux errno.
    Lerror { errno: u32 },
    /// Classic 9P2000 error reply carrying a message.
    Error { msg: String },
    Version { msize: u32, version: String },
    Auth { qid: Qid },
    Attach { qid: Qid },
    Flush,
    Walk { qids: Vec<Qid> },
    Open { qid: Qid, io_unit: u32 },
    Create { qid: Qid, io_unit: u32 },
    /// Read reply; `data` is the frame payload.
    Read { data: Vec<u8> },
    Write { count: u32 },
    Clunk,
    Remove,
    Statfs { stat: FsStat },
    Lopen { qid: Qid, io_unit: u32 },
    Lcreate { qid: Qid, io_unit: u32 },
    Symlink { qid: Qid },
    Mknod { qid: Qid },
    Rename,
    Readlink { target: String },
    Getattr {
        valid: AttrMask,
        qid: Qid,
        attr: Attr,
    },
    Setattr,
    Xattrwalk { size: u64 },
    Xattrcreate,
    /// Readdir reply. Encoding packs `entries` into the payload, whole
    /// entries only, never exceeding `count` bytes.
    Readdir { count: u32, entries: Vec<Dirent> },
    Fsync,
    Link,
    Mkdir { qid: Qid },
    Renameat,
    Unlinkat,
    Flushf,
    Walkgetattr {
        valid: AttrMask,
        attr: Attr,
        qids: Vec<Qid>,
    },
    Ucreate { qid: Qid, io_unit: u32 },
    Umkdir { qid: Qid },
    Umknod { qid: Qid },
    Usymlink { qid: Qid },
    Allocate,
}

fn write_names(buf: &mut Buffer, names: &[String]) {
    buf.write_u16(names.len() as u16);
    for name in names {
        buf.write_string(name);
    }
}

fn read_names(buf: &mut Buffer) -> Vec<String> {
    let n = buf.read_u16();
    let mut names = Vec::with_capacity(usize::from(n).min(64));
    for _ in 0..n {
        names.push(buf.read_string());
    }
    names
}

fn write_qids(buf: &mut Buffer, qids: &[Qid]) {
    buf.write_u16(qids.len() as u16);
    for qid in qids {
        qid.encode(buf);
    }
}

fn read_qids(buf: &mut Buffer) -> Vec<Qid> {
    let n = buf.read_u16();
    let mut qids = Vec::with_capacity(usize::from(n).min(64));
    for _ in 0..n {
        qids.push(Qid::decode(buf));
    }
    qids
}

impl Tmessage {
    fn encode_body(&self, buf: &mut Buffer) {
        match self {
            Tmessage::Version { msize, version } => {
                buf.write_u32(*msize);
                buf.write_string(version);
            }
            Tmessage::Auth {
                auth_fid,
                user_name,
                attach_name,
                uid,
            } => {
                buf.write_u32(*auth_fid);
                buf.write_string(user_name);
                buf.write_string(attach_name);
                uid.encode(buf);
            }
            Tmessage::Attach {
                fid,
                auth_fid,
                user_name,
                attach_name,
            } => {
                buf.write_u32(*fid);
                buf.write_u32(*auth_fid);
                buf.write_string(user_name);
                buf.write_string(attach_name);
            }
            Tmessage::Lattach {
                fid,
                auth_fid,
                user_name,
                attach_name,
                uid,
            } => {
                buf.write_u32(*fid);
                buf.write_u32(*auth_fid);
                buf.write_string(user_name);
                buf.write_string(attach_name);
                uid.encode(buf);
            }
            Tmessage::Flush { old_tag } => buf.write_u16(*old_tag),
            Tmessage::Walk {
                fid,
                new_fid,
                names,
            }
            | Tmessage::Walkgetattr {
                fid,
                new_fid,
                names,
            } => {
                buf.write_u32(*fid);
                buf.write_u32(*new_fid);
                write_names(buf, names);
            }
            Tmessage::Open { fid, mode } => {
                buf.write_u32(*fid);
                mode.encode(buf);
            }
            Tmessage::Create {
                fid,
                name,
                permissions,
                mode,
            } => {
                buf.write_u32(*fid);
                buf.write_string(name);
                buf.write_u32(*permissions);
                mode.encode(buf);
            }
            Tmessage::Read { fid, offset, count } => {
                buf.write_u32(*fid);
                buf.write_u64(*offset);
                buf.write_u32(*count);
            }
            Tmessage::Write { fid, offset, data } => {
                buf.write_u32(*fid);
                buf.write_u64(*offset);
                buf.write_u32(data.len() as u32);
            }
            Tmessage::Clunk { fid }
            | Tmessage::Remove { fid }
            | Tmessage::Statfs { fid }
            | Tmessage::Readlink { fid }
            | Tmessage::Fsync { fid }
            | Tmessage::Flushf { fid } => buf.write_u32(*fid),
            Tmessage::Lopen { fid, flags } => {
                buf.write_u32(*fid);
                flags.encode(buf);
            }
            Tmessage::Lcreate {
                fid,
                name,
                open_flags,
                permissions,
                gid,
            } => {
                buf.write_u32(*fid);
                buf.write_string(name);
                open_flags.encode(buf);
                permissions.encode(buf);
                gid.encode(buf);
            }
            Tmessage::Symlink {
                directory,
                name,
                target,
                gid,
            } => {
                buf.write_u32(*directory);
                buf.write_string(name);
                buf.write_string(target);
                gid.encode(buf);
            }
            Tmessage::Mknod {
                directory,
                name,
                mode,
                major,
                minor,
                gid,
            } => {
                buf.write_u32(*directory);
                buf.write_string(name);
                mode.encode(buf);
                buf.write_u32(*major);
                buf.write_u32(*minor);
                gid.encode(buf);
            }
            Tmessage::Rename {
                fid,
                directory,
                name,
            } => {
                buf.write_u32(*fid);
                buf.write_u32(*directory);
                buf.write_string(name);
            }
            Tmessage::Getattr { fid, attr_mask } => {
                buf.write_u32(*fid);
                attr_mask.encode(buf);
            }
            Tmessage::Setattr {
                fid,
                valid,
                set_attr,
            } => {
                buf.write_u32(*fid);
                valid.encode(buf);
                set_attr.encode(buf);
            }
            Tmessage::Xattrwalk { fid, new_fid, name } => {
                buf.write_u32(*fid);
                buf.write_u32(*new_fid);
                buf.write_string(name);
            }
            Tmessage::Xattrcreate {
                fid,
                name,
                attr_size,
                flags,
            } => {
                buf.write_u32(*fid);
                buf.write_string(name);
                buf.write_u64(*attr_size);
                buf.write_u32(*flags);
            }
            Tmessage::Readdir {
                directory,
                offset,
                count,
            } => {
                buf.write_u32(*directory);
                buf.write_u64(*offset);
                buf.write_u32(*count);
            }
            Tmessage::Link {
                directory,
                target,
                name,
            } => {
                buf.write_u32(*directory);
                buf.write_u32(*target);
                buf.write_string(name);
            }
            Tmessage::Mkdir {
                directory,
                name,
                permissions,
                gid,
            } => {
                buf.write_u32(*directory);
                buf.write_string(name);
                permissions.encode(buf);
                gid.encode(buf);
            }
            Tmessage::Renameat {
                old_directory,
                old_name,
                new_directory,
                new_name,
            } => {
                buf.write_u32(*old_directory);
                buf.write_string(old_name);
                buf.write_u32(*new_directory);
                buf.write_string(new_name);
            }
            Tmessage::Unlinkat {
                directory,
                name,
                flags,
            } => {
                buf.write_u32(*directory);
                buf.write_string(name);
                buf.write_u32(*flags);
            }
            Tmessage::Ucreate {
                fid,
                name,
                open_flags,
                permissions,
                gid,
                uid,
            } => {
                buf.write_u32(*fid);
                buf.write_string(name);
                open_flags.encode(buf);
                permissions.encode(buf);
                gid.encode(buf);
                uid.encode(buf);
            }
            Tmessage::Umkdir {
                directory,
                name,
                permissions,
                gid,
                uid,
            } => {
                buf.write_u32(*directory);
                buf.write_string(name);
                permissions.encode(buf);
                gid.encode(buf);
                uid.encode(buf);
            }
            Tmessage::Umknod {
                directory,
                name,
                mode,
                major,
                minor,
                gid,
                uid,
            } => {
                buf.write_u32(*directory);
                buf.write_string(name);
                mode.encode(buf);
                buf.write_u32(*major);
                buf.write_u32(*minor);
                gid.encode(buf);
                uid.encode(buf);
            }
            Tmessage::Usymlink {
                directory,
                name,
                target,
                gid,
                uid,
            } => {
                buf.write_u32(*directory);
                buf.write_string(name);
                buf.write_string(target);
                gid.encode(buf);
                uid.encode(buf);
            }
            Tmessage::Allocate {
                fid,
                mode,
                offset,
                length,
            } => {
                buf.write_u32(*fid);
                mode.encode(buf);
                buf.write_u64(*offset);
                buf.write_u64(*length);
            }
        }
    }
}

impl Frame for Tmessage {
    fn msg_type(&self) -> MsgType {
        match self {
            Tmessage::Version { .. } => code::TVERSION,
            Tmessage::Auth { .. } => code::TAUTH,
            Tmessage::Attach { .. } | Tmessage::Lattach { .. } => code::TATTACH,
            Tmessage::Flush { .. } => code::TFLUSH,
            Tmessage::Walk { .. } => code::TWALK,
            Tmessage::Open { .. } => code::TOPEN,
            Tmessage::Create { .. } => code::TCREATE,
            Tmessage::Read { .. } => code::TREAD,
            Tmessage::Write { .. } => code::TWRITE,
            Tmessage::Clunk { .. } => code::TCLUNK,
            Tmessage::Remove { .. } => code::TREMOVE,
            Tmessage::Statfs { .. } => code::TSTATFS,
            Tmessage::Lopen { .. } => code::TLOPEN,
            Tmessage::Lcreate { .. } => code::TLCREATE,
            Tmessage::Symlink { .. } => code::TSYMLINK,
            Tmessage::Mknod { .. } => code::TMKNOD,
            Tmessage::Rename { .. } => code::TRENAME,
            Tmessage::Readlink { .. } => code::TREADLINK,
            Tmessage::Getattr { .. } => code::TGETATTR,
            Tmessage::Setattr { .. } => code::TSETATTR,
            Tmessage::Xattrwalk { .. } => code::TXATTRWALK,
            Tmessage::Xattrcreate { .. } => code::TXATTRCREATE,
            Tmessage::Readdir { .. } => code::TREADDIR,
            Tmessage::Fsync { .. } => code::TFSYNC,
            Tmessage::Link { .. } => code::TLINK,
            Tmessage::Mkdir { .. } => code::TMKDIR,
            Tmessage::Renameat { .. } => code::TRENAMEAT,
            Tmessage::Unlinkat { .. } => code::TUNLINKAT,
            Tmessage::Flushf { .. } => code::TFLUSHF,
            Tmessage::Walkgetattr { .. } => code::TWALKGETATTR,
            Tmessage::Ucreate { .. } => code::TUCREATE,
            Tmessage::Umkdir { .. } => code::TUMKDIR,
            Tmessage::Umknod { .. } => code::TUMKNOD,
            Tmessage::Usymlink { .. } => code::TUSYMLINK,
            Tmessage::Allocate { .. } => code::TALLOCATE,
        }
    }

    fn encode(&self) -> (Vec<u8>, Payload<'_>) {
        let mut buf = Buffer::empty();
        self.encode_body(&mut buf);
        let payload = match self {
            Tmessage::Write { data, .. } => Payload::Borrowed(data),
            _ => Payload::None,
        };
        (buf.into_vec(), payload)
    }

    fn decode(
        dialect: Dialect,
        ty: MsgType,
        body: &mut Buffer,
        payload: Vec<u8>,
    ) -> Result<Self, CodecError> {
        let b = body;
        let msg = match (ty, dialect) {
            (code::TVERSION, _) => Tmessage::Version {
                msize: b.read_u32(),
                version: b.read_string(),
            },
            (code::TAUTH, Dialect::P2000L) => Tmessage::Auth {
                auth_fid: b.read_u32(),
                user_name: b.read_string(),
                attach_name: b.read_string(),
                uid: Uid::decode(b),
            },
            (code::TAUTH, Dialect::P2000) => Tmessage::Auth {
                auth_fid: b.read_u32(),
                user_name: b.read_string(),
                attach_name: b.read_string(),
                uid: Uid::NONE,
            },
            (code::TATTACH, Dialect::P2000L) => Tmessage::Lattach {
                fid: b.read_u32(),
                auth_fid: b.read_u32(),
                user_name: b.read_string(),
                attach_name: b.read_string(),
                uid: Uid::decode(b),
            },
            (code::TATTACH, Dialect::P2000) => Tmessage::Attach {
                fid: b.read_u32(),
                auth_fid: b.read_u32(),
                user_name: b.read_string(),
                attach_name: b.read_string(),
            },
            (code::TFLUSH, _) => Tmessage::Flush {
                old_tag: b.read_u16(),
            },
            (code::TWALK, _) => Tmessage::Walk {
                fid: b.read_u32(),
                new_fid: b.read_u32(),
                names: read_names(b),
            },
            (code::TOPEN, Dialect::P2000) => Tmessage::Open {
                fid: b.read_u32(),
                mode: LegacyMode::decode(b),
            },
            (code::TCREATE, Dialect::P2000) => Tmessage::Create {
                fid: b.read_u32(),
                name: b.read_string(),
                permissions: b.read_u32(),
                mode: LegacyMode::decode(b),
            },
            (code::TREAD, _) => Tmessage::Read {
                fid: b.read_u32(),
                offset: b.read_u64(),
                count: b.read_u32(),
            },
            (code::TWRITE, _) => {
                let fid = b.read_u32();
                let offset = b.read_u64();
                let count = b.read_u32();
                if count as usize != payload.len() {
                    b.mark_overrun();
                }
                Tmessage::Write {
                    fid,
                    offset,
                    data: payload,
                }
            }
            (code::TCLUNK, _) => Tmessage::Clunk { fid: b.read_u32() },
            (code::TREMOVE, _) => Tmessage::Remove { fid: b.read_u32() },
            (code::TSTATFS, Dialect::P2000L) => Tmessage::Statfs { fid: b.read_u32() },
            (code::TLOPEN, Dialect::P2000L) => Tmessage::Lopen {
                fid: b.read_u32(),
                flags: OpenFlags::decode(b),
            },
            (code::TLCREATE, Dialect::P2000L) => Tmessage::Lcreate {
                fid: b.read_u32(),
                name: b.read_string(),
                open_flags: OpenFlags::decode(b),
                permissions: FileMode::decode(b),
                gid: Gid::decode(b),
            },
            (code::TSYMLINK, Dialect::P2000L) => Tmessage::Symlink {
                directory: b.read_u32(),
                name: b.read_string(),
                target: b.read_string(),
                gid: Gid::decode(b),
            },
            (code::TMKNOD, Dialect::P2000L) => Tmessage::Mknod {
                directory: b.read_u32(),
                name: b.read_string(),
                mode: FileMode::decode(b),
                major: b.read_u32(),
                minor: b.read_u32(),
                gid: Gid::decode(b),
            },
            (code::TRENAME, Dialect::P2000L) => Tmessage::Rename {
                fid: b.read_u32(),
                directory: b.read_u32(),
                name: b.read_string(),
            },
            (code::TREADLINK, Dialect::P2000L) => Tmessage::Readlink { fid: b.read_u32() },
            (code::TGETATTR, Dialect::P2000L) => Tmessage::Getattr {
                fid: b.read_u32(),
                attr_mask: AttrMask::decode(b),
            },
            (code::TSETATTR, Dialect::P2000L) => Tmessage::Setattr {
                fid: b.read_u32(),
                valid: SetAttrMask::decode(b),
                set_attr: SetAttr::decode(b),
            },
            (code::TXATTRWALK, Dialect::P2000L) => Tmessage::Xattrwalk {
                fid: b.read_u32(),
                new_fid: b.read_u32(),
                name: b.read_string(),
            },
            (code::TXATTRCREATE, Dialect::P2000L) => Tmessage::Xattrcreate {
                fid: b.read_u32(),
                name: b.read_string(),
                attr_size: b.read_u64(),
                flags: b.read_u32(),
            },
            (code::TREADDIR, Dialect::P2000L) => Tmessage::Readdir {
                directory: b.read_u32(),
                offset: b.read_u64(),
                count: b.read_u32(),
            },
            (code::TFSYNC, Dialect::P2000L) => Tmessage::Fsync { fid: b.read_u32() },
            (code::TLINK, Dialect::P2000L) => Tmessage::Link {
                directory: b.read_u32(),
                target: b.read_u32(),
                name: b.read_string(),
            },
            (code::TMKDIR, Dialect::P2000L) => Tmessage::Mkdir {
                directory: b.read_u32(),
                name: b.read_string(),
                permissions: FileMode::decode(b),
                gid: Gid::decode(b),
            },
            (code::TRENAMEAT, Dialect::P2000L) => Tmessage::Renameat {
                old_directory: b.read_u32(),
                old_name: b.read_string(),
                new_directory: b.read_u32(),
                new_name: b.read_string(),
            },
            (code::TUNLINKAT, Dialect::P2000L) => Tmessage::Unlinkat {
                directory: b.read_u32(),
                name: b.read_string(),
                flags: b.read_u32(),
            },
            (code::TFLUSHF, Dialect::P2000L) => Tmessage::Flushf { fid: b.read_u32() },
            (code::TWALKGETATTR, Dialect::P2000L) => Tmessage::Walkgetattr {
                fid: b.read_u32(),
                new_fid: b.read_u32(),
                names: read_names(b),
            },
            (code::TUCREATE, Dialect::P2000L) => Tmessage::Ucreate {
                fid: b.read_u32(),
                name: b.read_string(),
                open_flags: OpenFlags::decode(b),
                permissions: FileMode::decode(b),
                gid: Gid::decode(b),
                uid: Uid::decode(b),
            },
            (code::TUMKDIR, Dialect::P2000L) => Tmessage::Umkdir {
                directory: b.read_u32(),
                name: b.read_string(),
                permissions: FileMode::decode(b),
                gid: Gid::decode(b),
                uid: Uid::decode(b),
            },
            (code::TUMKNOD, Dialect::P2000L) => Tmessage::Umknod {
                directory: b.read_u32(),
                name: b.read_string(),
                mode: FileMode::decode(b),
                major: b.read_u32(),
                minor: b.read_u32(),
                gid: Gid::decode(b),
                uid: Uid::decode(b),
            },
            (code::TUSYMLINK, Dialect::P2000L) => Tmessage::Usymlink {
                directory: b.read_u32(),
                name: b.read_string(),
                target: b.read_string(),
                gid: Gid::decode(b),
                uid: Uid::decode(b),
            },
            (code::TALLOCATE, Dialect::P2000L) => Tmessage::Allocate {
                fid: b.read_u32(),
                mode: AllocateMode::decode(b),
                offset: b.read_u64(),
                length: b.read_u64(),
            },
            _ => return Err(CodecError::InvalidMsgType(ty)),
        };
        if b.is_overrun() {
            return Err(CodecError::Truncated(ty));
        }
        Ok(msg)
    }
}

impl Rmessage {
    fn encode_body(&self, buf: &mut Buffer) {
        match self {
            Rmessage::Lerror { errno } => buf.write_u32(*errno),
            Rmessage::Error { msg } => buf.write_string(msg),
            Rmessage::Version { msize, version } => {
                buf.write_u32(*msize);
                buf.write_string(version);
            }
            Rmessage::Auth { qid } | Rmessage::Attach { qid } => qid.encode(buf),
            Rmessage::Flush
            | Rmessage::Clunk
            | Rmessage::Remove
            | Rmessage::Rename
            | Rmessage::Setattr
            | Rmessage::Xattrcreate
            | Rmessage::Fsync
            | Rmessage::Link
            | Rmessage::Renameat
            | Rmessage::Unlinkat
            | Rmessage::Flushf
            | Rmessage::Allocate => {}
            Rmessage::Walk { qids } => write_qids(buf, qids),
            Rmessage::Open { qid, io_unit }
            | Rmessage::Create { qid, io_unit }
            | Rmessage::Lopen { qid, io_unit }
            | Rmessage::Lcreate { qid, io_unit }
            | Rmessage::Ucreate { qid, io_unit } => {
                qid.encode(buf);
                buf.write_u32(*io_unit);
            }
            Rmessage::Read { data } => buf.write_u32(data.len() as u32),
            Rmessage::Write { count } => buf.write_u32(*count),
            Rmessage::Statfs { stat } => stat.encode(buf),
            Rmessage::Symlink { qid }
            | Rmessage::Mknod { qid }
            | Rmessage::Mkdir { qid }
            | Rmessage::Umkdir { qid }
            | Rmessage::Umknod { qid }
            | Rmessage::Usymlink { qid } => qid.encode(buf),
            Rmessage::Readlink { target } => buf.write_string(target),
            Rmessage::Getattr { valid, qid, attr } => {
                valid.encode(buf);
                qid.encode(buf);
                attr.encode(buf);
            }
            Rmessage::Xattrwalk { size } => buf.write_u64(*size),
            Rmessage::Readdir { .. } => {
                // Written by encode(): the count field mirrors the packed
                // payload length.
                unreachable!("Rreaddir body is encoded with its payload")
            }
            Rmessage::Walkgetattr { valid, attr, qids } => {
                valid.encode(buf);
                attr.encode(buf);
                write_qids(buf, qids);
            }
        }
    }

    /// Pack directory entries into a payload, whole entries only, never
    /// exceeding `limit` bytes.
    fn pack_dirents(entries: &[Dirent], limit: u32) -> Vec<u8> {
        let mut payload = Buffer::empty();
        for entry in entries {
            if payload.len() + entry.wire_size() > limit as usize {
                break;
            }
            entry.encode(&mut payload);
        }
        payload.into_vec()
    }
}

impl Frame for Rmessage {
    fn msg_type(&self) -> MsgType {
        match self {
            Rmessage::Lerror { .. } => code::RLERROR,
            Rmessage::Error { .. } => code::RERROR,
            Rmessage::Version { .. } => code::RVERSION,
            Rmessage::Auth { .. } => code::RAUTH,
            Rmessage::Attach { .. } => code::RATTACH,
            Rmessage::Flush => code::RFLUSH,
            Rmessage::Walk { .. } => code::RWALK,
            Rmessage::Open { .. } => code::ROPEN,
            Rmessage::Create { .. } => code::RCREATE,
            Rmessage::Read { .. } => code::RREAD,
            Rmessage::Write { .. } => code::RWRITE,
            Rmessage::Clunk => code::RCLUNK,
            Rmessage::Remove => code::RREMOVE,
            Rmessage::Statfs { .. } => code::RSTATFS,
            Rmessage::Lopen { .. } => code::RLOPEN,
            Rmessage::Lcreate { .. } => code::RLCREATE,
            Rmessage::Symlink { .. } => code::RSYMLINK,
            Rmessage::Mknod { .. } => code::RMKNOD,
            Rmessage::Rename => code::RRENAME,
            Rmessage::Readlink { .. } => code::RREADLINK,
            Rmessage::Getattr { .. } => code::RGETATTR,
            Rmessage::Setattr => code::RSETATTR,
            Rmessage::Xattrwalk { .. } => code::RXATTRWALK,
            Rmessage::Xattrcreate => code::RXATTRCREATE,
            Rmessage::Readdir { .. } => code::RREADDIR,
            Rmessage::Fsync => code::RFSYNC,
            Rmessage::Link => code::RLINK,
            Rmessage::Mkdir { .. } => code::RMKDIR,
            Rmessage::Renameat => code::RRENAMEAT,
            Rmessage::Unlinkat => code::RUNLINKAT,
            Rmessage::Flushf => code::RFLUSHF,
            Rmessage::Walkgetattr { .. } => code::RWALKGETATTR,
            Rmessage::Ucreate { .. } => code::RUCREATE,
            Rmessage::Umkdir { .. } => code::RUMKDIR,
            Rmessage::Umknod { .. } => code::RUMKNOD,
            Rmessage::Usymlink { .. } => code::RUSYMLINK,
            Rmessage::Allocate => code::RALLOCATE,
        }
    }

    fn encode(&self) -> (Vec<u8>, Payload<'_>) {
        match self {
            Rmessage::Read { data } => {
                let mut buf = Buffer::empty();
                buf.write_u32(data.len() as u32);
                (buf.into_vec(), Payload::Borrowed(data))
            }
            Rmessage::Readdir { count, entries } => {
                let payload = Rmessage::pack_dirents(entries, *count);
                let mut buf = Buffer::empty();
                buf.write_u32(payload.len() as u32);
                (buf.into_vec(), Payload::Owned(payload))
            }
            _ => {
                let mut buf = Buffer::empty();
                self.encode_body(&mut buf);
                (buf.into_vec(), Payload::None)
            }
        }
    }

    fn decode(
        dialect: Dialect,
        ty: MsgType,
        body: &mut Buffer,
        payload: Vec<u8>,
    ) -> Result<Self, CodecError> {
        let b = body;
        let msg = match (ty, dialect) {
            (code::RLERROR, Dialect::P2000L) => Rmessage::Lerror {
                errno: b.read_u32(),
            },
            (code::RERROR, Dialect::P2000) => Rmessage::Error {
                msg: b.read_string(),
            },
            (code::RVERSION, _) => Rmessage::Version {
                msize: b.read_u32(),
                version: b.read_string(),
            },
            (code::RAUTH, _) => Rmessage::Auth {
                qid: Qid::decode(b),
            },
            (code::RATTACH, _) => Rmessage::Attach {
                qid: Qid::decode(b),
            },
            (code::RFLUSH, _) => Rmessage::Flush,
            (code::RWALK, _) => Rmessage::Walk {
                qids: read_qids(b),
            },
            (code::ROPEN, Dialect::P2000) => Rmessage::Open {
                qid: Qid::decode(b),
                io_unit: b.read_u32(),
            },
            (code::RCREATE, Dialect::P2000) => Rmessage::Create {
                qid: Qid::decode(b),
                io_unit: b.read_u32(),
            },
            (code::RREAD, _) => {
                let count = b.read_u32();
                if count as usize != payload.len() {
                    b.mark_overrun();
                }
                Rmessage::Read { data: payload }
            }
            (code::RWRITE, _) => Rmessage::Write {
                count: b.read_u32(),
            },
            (code::RCLUNK, _) => Rmessage::Clunk,
            (code::RREMOVE, _) => Rmessage::Remove,
            (code::RSTATFS, Dialect::P2000L) => Rmessage::Statfs {
                stat: FsStat::decode(b),
            },
            (code::RLOPEN, Dialect::P2000L) => Rmessage::Lopen {
                qid: Qid::decode(b),
                io_unit: b.read_u32(),
            },
            (code::RLCREATE, Dialect::P2000L) => Rmessage::Lcreate {
                qid: Qid::decode(b),
                io_unit: b.read_u32(),
            },
            (code::RSYMLINK, Dialect::P2000L) => Rmessage::Symlink {
                qid: Qid::decode(b),
            },
            (code::RMKNOD, Dialect::P2000L) => Rmessage::Mknod {
                qid: Qid::decode(b),
            },
            (code::RRENAME, Dialect::P2000L) => Rmessage::Rename,
            (code::RREADLINK, Dialect::P2000L) => Rmessage::Readlink {
                target: b.read_string(),
            },
            (code::RGETATTR, Dialect::P2000L) => Rmessage::Getattr {
                valid: AttrMask::decode(b),
                qid: Qid::decode(b),
                attr: Attr::decode(b),
            },
            (code::RSETATTR, Dialect::P2000L) => Rmessage::Setattr,
            (code::RXATTRWALK, Dialect::P2000L) => Rmessage::Xattrwalk {
                size: b.read_u64(),
            },
            (code::RXATTRCREATE, Dialect::P2000L) => Rmessage::Xattrcreate,
            (code::RREADDIR, Dialect::P2000L) => {
                let count = b.read_u32();
                let mut entries = Vec::new();
                let mut pb = Buffer::new(payload);
                loop {
                    let entry = Dirent::decode(&mut pb);
                    if pb.is_overrun() {
                        break;
                    }
                    entries.push(entry);
                }
                Rmessage::Readdir { count, entries }
            }
            (code::RFSYNC, Dialect::P2000L) => Rmessage::Fsync,
            (code::RLINK, Dialect::P2000L) => Rmessage::Link,
            (code::RMKDIR, Dialect::P2000L) => Rmessage::Mkdir {
                qid: Qid::decode(b),
            },
            (code::RRENAMEAT, Dialect::P2000L) => Rmessage::Renameat,
            (code::RUNLINKAT, Dialect::P2000L) => Rmessage::Unlinkat,
            (code::RFLUSHF, Dialect::P2000L) => Rmessage::Flushf,
            (code::RWALKGETATTR, Dialect::P2000L) => Rmessage::Walkgetattr {
                valid: AttrMask::decode(b),
                attr: Attr::decode(b),
                qids: read_qids(b),
            },
            (code::RUCREATE, Dialect::P2000L) => Rmessage::Ucreate {
                qid: Qid::decode(b),
                io_unit: b.read_u32(),
            },
            (code::RUMKDIR, Dialect::P2000L) => Rmessage::Umkdir {
                qid: Qid::decode(b),
            },
            (code::RUMKNOD, Dialect::P2000L) => Rmessage::Umknod {
                qid: Qid::decode(b),
            },
            (code::RUSYMLINK, Dialect::P2000L) => Rmessage::Usymlink {
                qid: Qid::decode(b),
            },
            (code::RALLOCATE, Dialect::P2000L) => Rmessage::Allocate,
            _ => return Err(CodecError::InvalidMsgType(ty)),
        };
        if b.is_overrun() {
            return Err(CodecError::Truncated(ty));
        }
        Ok(msg)
    }
}
