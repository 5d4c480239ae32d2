// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Frame 9P messages over reliable byte streams with pooled buffers.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Framed message transport.
//!
//! Every 9P message travels as `size[4] type[1] tag[2] body[size-7]`, little
//! endian, where `size` counts itself. [`send`] and [`recv`] move one whole
//! frame at a time over any reliable ordered byte stream; the codec does not
//! rely on record boundaries, so TCP, Unix stream sockets and pipes all work.
//!
//! Messages that declare a payload (read/write/readdir bulk data) are split:
//! the fixed body goes through a pooled scratch buffer while the payload is
//! written directly from, or read directly into, its own allocation. Bulk
//! data is never copied through an intermediate buffer.
//!
//! Transport errors are connection-fatal by design. A frame that is too
//! small, too large, carries an unknown type code, or whose body is shorter
//! than its declared fields leaves the stream in an unknowable state, so the
//! caller is expected to drop the connection.

use std::io::{IoSlice, Read, Write};
use std::sync::Mutex;

use log::{debug, trace};
use thiserror::Error;

use ninegate_codec::{payload_fixed_size, Buffer, CodecError, Dialect, Frame, Payload, Tag};
use ninegate_codec::{HEADER_LENGTH, MAXIMUM_LENGTH};

/// Errors surfaced by [`send`] and [`recv`]. All of them are fatal to the
/// connection they occurred on.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying stream failed.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
    /// A frame declared a size below the header length.
    #[error("frame size {0} below minimum")]
    FrameTooSmall(u32),
    /// A frame declared a size above the negotiated or absolute maximum.
    #[error("frame size {size} exceeds limit {limit}")]
    FrameTooLarge {
        /// Declared frame size.
        size: u32,
        /// Applicable limit (min of msize and the absolute cap).
        limit: u32,
    },
    /// The body could not be decoded into a message.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Bound on pooled scratch buffers kept alive between messages.
const POOL_LIMIT: usize = 8;

/// Initial scratch buffer capacity; grows on demand.
const INITIAL_BUFFER_LENGTH: usize = 64;

/// A bounded pool of reusable body buffers.
///
/// Exhausting the pool is not an error; a fresh buffer is allocated and the
/// pool simply forgets the excess on return.
#[derive(Debug, Default)]
pub struct BufferPool {
    bufs: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, len: usize) -> Vec<u8> {
        let mut bufs = self.bufs.lock().unwrap();
        let mut buf = bufs.pop().unwrap_or_else(|| {
            Vec::with_capacity(INITIAL_BUFFER_LENGTH.max(len))
        });
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    fn put(&self, buf: Vec<u8>) {
        let mut bufs = self.bufs.lock().unwrap();
        if bufs.len() < POOL_LIMIT {
            bufs.push(buf);
        }
    }
}

/// Write out every byte of `slices`, tolerating partial vectored writes.
fn write_all_vectored<W: Write + ?Sized>(writer: &mut W, slices: &[&[u8]]) -> std::io::Result<()> {
    let mut idx = 0;
    let mut skip = 0;
    while idx < slices.len() {
        let iov: Vec<IoSlice<'_>> = std::iter::once(IoSlice::new(&slices[idx][skip..]))
            .chain(slices[idx + 1..].iter().map(|s| IoSlice::new(s)))
            .collect();
        let mut n = writer.write_vectored(&iov)?;
        if n == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        // Advance over whole and partial slices covered by this write.
        while idx < slices.len() {
            let remaining = slices[idx].len() - skip;
            if n < remaining {
                skip += n;
                break;
            }
            n -= remaining;
            idx += 1;
            skip = 0;
        }
    }
    Ok(())
}

/// Send one framed message.
///
/// The header, fixed body and payload go out as a scatter list; bulk payload
/// bytes are never concatenated into the body buffer. The caller provides
/// whatever mutual exclusion the stream needs.
pub fn send<W, F>(writer: &mut W, tag: Tag, msg: &F) -> Result<()>
where
    W: Write + ?Sized,
    F: Frame,
{
    let (body, payload) = msg.encode();
    let payload = match &payload {
        Payload::None => &[][..],
        Payload::Borrowed(b) => b,
        Payload::Owned(v) => v.as_slice(),
    };

    let total = HEADER_LENGTH as usize + body.len() + payload.len();
    let mut header = [0u8; HEADER_LENGTH as usize];
    header[..4].copy_from_slice(&(total as u32).to_le_bytes());
    header[4] = msg.msg_type();
    header[5..7].copy_from_slice(&tag.to_le_bytes());

    debug!("send [tag {tag:#06x}] {msg:?}");
    write_all_vectored(writer, &[&header, &body, payload])?;
    writer.flush()?;
    Ok(())
}

/// Receive one framed message.
///
/// `msize` is the negotiated maximum frame size (the absolute cap applies on
/// top of it); `dialect` selects the legal message set. The fixed body is
/// staged through `pool`; any payload is read straight into its own buffer.
pub fn recv<R, F>(
    reader: &mut R,
    msize: u32,
    dialect: Dialect,
    pool: &BufferPool,
) -> Result<(Tag, F)>
where
    R: Read + ?Sized,
    F: Frame,
{
    let mut header = [0u8; HEADER_LENGTH as usize];
    reader.read_exact(&mut header)?;

    let size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let ty = header[4];
    let tag = Tag::from_le_bytes([header[5], header[6]]);

    if size < HEADER_LENGTH {
        return Err(TransportError::FrameTooSmall(size));
    }
    let limit = msize.min(MAXIMUM_LENGTH);
    if size > limit {
        return Err(TransportError::FrameTooLarge { size, limit });
    }
    let remaining = size - HEADER_LENGTH;

    let (body, payload) = match payload_fixed_size(ty) {
        Some(fixed) => {
            if fixed > remaining {
                // The fixed portion cannot be satisfied by the frame.
                return Err(CodecError::Truncated(ty).into());
            }
            let mut body = pool.get(fixed as usize);
            reader.read_exact(&mut body)?;
            let mut payload = vec![0u8; (remaining - fixed) as usize];
            reader.read_exact(&mut payload)?;
            (body, payload)
        }
        None => {
            let mut body = pool.get(remaining as usize);
            reader.read_exact(&mut body)?;
            (body, Vec::new())
        }
    };

    trace!("recv frame [tag {tag:#06x}] type {ty} size {size}");
    let mut buf = Buffer::new(body);
    let result = F::decode(dialect, ty, &mut buf, payload)?;
    pool.put(buf.into_vec());
    debug!("recv [tag {tag:#06x}] {result:?}");
    Ok((tag, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ninegate_codec::{Rmessage, Tmessage};
    use std::io::Cursor;

    fn pipe_t(msgs: Vec<(Tag, Tmessage)>) {
        let mut wire = Vec::new();
        for (tag, msg) in &msgs {
            send(&mut wire, *tag, msg).expect("send");
        }
        let pool = BufferPool::new();
        let mut reader = Cursor::new(wire);
        for (tag, msg) in &msgs {
            let (got_tag, got): (Tag, Tmessage) =
                recv(&mut reader, MAXIMUM_LENGTH, Dialect::P2000L, &pool).expect("recv");
            assert_eq!(got_tag, *tag);
            assert_eq!(&got, msg);
        }
    }

    #[test]
    fn framing_identity_over_a_stream() {
        pipe_t(vec![
            (
                ninegate_codec::NO_TAG,
                Tmessage::Version {
                    msize: 1 << 20,
                    version: "9P2000.L".into(),
                },
            ),
            (
                1,
                Tmessage::Walk {
                    fid: 1,
                    new_fid: 2,
                    names: vec!["var".into(), "log".into()],
                },
            ),
            (
                2,
                Tmessage::Write {
                    fid: 2,
                    offset: 0,
                    data: vec![0xaa; 70_000],
                },
            ),
            (3, Tmessage::Clunk { fid: 2 }),
        ]);
    }

    #[test]
    fn version_handshake_bytes_are_exact() {
        // size=21 type=100 tag=0xffff msize=0x00100000 version="9P2000.L"
        let mut wire = Vec::new();
        send(
            &mut wire,
            ninegate_codec::NO_TAG,
            &Tmessage::Version {
                msize: 0x0010_0000,
                version: "9P2000.L".into(),
            },
        )
        .expect("send");
        assert_eq!(
            wire,
            [
                21, 0, 0, 0, // size
                100, // type
                0xff, 0xff, // tag
                0x00, 0x00, 0x10, 0x00, // msize
                8, 0, // strlen
                b'9', b'P', b'2', b'0', b'0', b'0', b'.', b'L',
            ]
        );
    }

    #[test]
    fn reply_payload_round_trips() {
        let mut wire = Vec::new();
        let msg = Rmessage::Read {
            data: vec![7; 12345],
        };
        send(&mut wire, 5, &msg).expect("send");
        let pool = BufferPool::new();
        let (tag, got): (Tag, Rmessage) = recv(
            &mut Cursor::new(wire),
            MAXIMUM_LENGTH,
            Dialect::P2000L,
            &pool,
        )
        .expect("recv");
        assert_eq!(tag, 5);
        assert_eq!(got, msg);
    }

    #[test]
    fn undersized_frame_is_fatal() {
        let mut wire = vec![];
        wire.extend_from_slice(&3u32.to_le_bytes());
        wire.extend_from_slice(&[100, 0, 0]);
        let pool = BufferPool::new();
        let err = recv::<_, Tmessage>(
            &mut Cursor::new(wire),
            MAXIMUM_LENGTH,
            Dialect::P2000L,
            &pool,
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::FrameTooSmall(3)));
    }

    #[test]
    fn oversized_frame_is_fatal() {
        let mut wire = vec![];
        wire.extend_from_slice(&(MAXIMUM_LENGTH + 1).to_le_bytes());
        wire.extend_from_slice(&[100, 0, 0]);
        let pool = BufferPool::new();
        let err = recv::<_, Tmessage>(
            &mut Cursor::new(wire),
            MAXIMUM_LENGTH,
            Dialect::P2000L,
            &pool,
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[test]
    fn msize_bounds_incoming_frames() {
        let mut wire = Vec::new();
        send(
            &mut wire,
            1,
            &Tmessage::Write {
                fid: 1,
                offset: 0,
                data: vec![0; 9000],
            },
        )
        .expect("send");
        let pool = BufferPool::new();
        let err = recv::<_, Tmessage>(&mut Cursor::new(wire), 8192, Dialect::P2000L, &pool)
            .unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[test]
    fn unknown_type_is_fatal() {
        let mut wire = vec![];
        wire.extend_from_slice(&7u32.to_le_bytes());
        wire.extend_from_slice(&[250, 0, 0]);
        let pool = BufferPool::new();
        let err = recv::<_, Tmessage>(
            &mut Cursor::new(wire),
            MAXIMUM_LENGTH,
            Dialect::P2000L,
            &pool,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Codec(CodecError::InvalidMsgType(250))
        ));
    }

    #[test]
    fn payload_shorter_than_fixed_size_is_fatal() {
        // Twrite whose frame ends inside the fixed body.
        let mut wire = vec![];
        wire.extend_from_slice(&(HEADER_LENGTH + 8).to_le_bytes());
        wire.push(ninegate_codec::code::TWRITE);
        wire.extend_from_slice(&[0, 0]);
        wire.extend_from_slice(&[0u8; 8]);
        let pool = BufferPool::new();
        let err = recv::<_, Tmessage>(
            &mut Cursor::new(wire),
            MAXIMUM_LENGTH,
            Dialect::P2000L,
            &pool,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Codec(CodecError::Truncated(_))
        ));
    }

    #[test]
    fn vectored_write_handles_partial_progress() {
        // A writer that accepts one byte at a time still transmits intact
        // frames.
        struct Trickle(Vec<u8>);
        impl Write for Trickle {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                if buf.is_empty() {
                    return Ok(0);
                }
                self.0.push(buf[0]);
                Ok(1)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let mut w = Trickle(Vec::new());
        let msg = Tmessage::Write {
            fid: 1,
            offset: 2,
            data: vec![3, 4, 5],
        };
        send(&mut w, 9, &msg).expect("send");
        let pool = BufferPool::new();
        let (tag, got): (Tag, Tmessage) = recv(
            &mut Cursor::new(w.0),
            MAXIMUM_LENGTH,
            Dialect::P2000L,
            &pool,
        )
        .expect("recv");
        assert_eq!(tag, 9);
        assert_eq!(got, msg);
    }
}
