// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Minimal 9P test client driving a server over a real socket.
// Author: Lukas Bower
#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;

use ninegate::Server;
use ninegate_codec::{
    AttrMask, Dialect, FileMode, Gid, OpenFlags, Qid, Rmessage, Tag, Tmessage, Uid,
    MAXIMUM_LENGTH, NO_FID, NO_TAG,
};
use ninegate_transport::BufferPool;

/// Run `server` on an ephemeral TCP port, returning its address.
///
/// `RUST_LOG=debug` shows the full message exchange.
pub fn start(server: Server) -> SocketAddr {
    let _ = env_logger::builder().is_test(true).try_init();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        let _ = server.serve(listener);
    });
    addr
}

/// A deliberately small 9P client: sequential RPCs, explicit tags where a
/// test needs to interleave.
pub struct Client {
    stream: TcpStream,
    pool: BufferPool,
    pub msize: u32,
    pub dialect: Dialect,
    next_tag: Tag,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).expect("connect");
        stream.set_nodelay(true).ok();
        Client {
            stream,
            pool: BufferPool::new(),
            msize: MAXIMUM_LENGTH,
            dialect: Dialect::P2000L,
            next_tag: 1,
        }
    }

    /// Duplicate the raw stream, e.g. to poke bytes past the codec.
    pub fn raw_stream(&self) -> TcpStream {
        self.stream.try_clone().expect("clone stream")
    }

    pub fn send(&mut self, tag: Tag, msg: &Tmessage) {
        ninegate_transport::send(&mut self.stream, tag, msg).expect("send");
    }

    pub fn recv(&mut self) -> (Tag, Rmessage) {
        ninegate_transport::recv(&mut self.stream, self.msize, self.dialect, &self.pool)
            .expect("recv")
    }

    pub fn fresh_tag(&mut self) -> Tag {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        tag
    }

    /// One request, one reply, tags checked.
    pub fn rpc(&mut self, msg: &Tmessage) -> Rmessage {
        let tag = self.fresh_tag();
        self.send(tag, msg);
        let (rtag, reply) = self.recv();
        assert_eq!(rtag, tag, "reply tag mismatch for {msg:?}");
        reply
    }

    /// Negotiate a version, adjusting the client's msize on success.
    pub fn negotiate(&mut self, msize: u32, version: &str) -> (u32, String) {
        self.send(
            NO_TAG,
            &Tmessage::Version {
                msize,
                version: version.to_string(),
            },
        );
        let (tag, reply) = self.recv();
        assert_eq!(tag, NO_TAG);
        match reply {
            Rmessage::Version { msize, version } => {
                if version != "unknown" && msize != 0 {
                    self.msize = msize;
                }
                (msize, version)
            }
            other => panic!("unexpected version reply {other:?}"),
        }
    }

    /// Negotiate 9P2000.L at 1 MiB and attach the root as `fid`.
    pub fn setup(&mut self, fid: u32) -> Qid {
        let (_, version) = self.negotiate(1 << 20, "9P2000.L");
        assert_eq!(version, "9P2000.L");
        self.attach(fid, "")
    }

    pub fn attach(&mut self, fid: u32, attach_name: &str) -> Qid {
        match self.rpc(&Tmessage::Lattach {
            fid,
            auth_fid: NO_FID,
            user_name: String::new(),
            attach_name: attach_name.to_string(),
            uid: Uid::NONE,
        }) {
            Rmessage::Attach { qid } => qid,
            other => panic!("attach failed: {other:?}"),
        }
    }

    pub fn walk(&mut self, fid: u32, new_fid: u32, names: &[&str]) -> Vec<Qid> {
        match self.rpc(&Tmessage::Walk {
            fid,
            new_fid,
            names: names.iter().map(|s| s.to_string()).collect(),
        }) {
            Rmessage::Walk { qids } => qids,
            other => panic!("walk failed: {other:?}"),
        }
    }

    pub fn walk_err(&mut self, fid: u32, new_fid: u32, names: &[&str]) -> u32 {
        let reply = self.rpc(&Tmessage::Walk {
            fid,
            new_fid,
            names: names.iter().map(|s| s.to_string()).collect(),
        });
        errno_of(&reply).unwrap_or_else(|| panic!("expected error, got {reply:?}"))
    }

    pub fn lopen(&mut self, fid: u32, flags: OpenFlags) -> Qid {
        match self.rpc(&Tmessage::Lopen { fid, flags }) {
            Rmessage::Lopen { qid, .. } => qid,
            other => panic!("open failed: {other:?}"),
        }
    }

    pub fn lcreate(&mut self, fid: u32, name: &str, flags: OpenFlags, permissions: u32) -> Qid {
        match self.rpc(&Tmessage::Lcreate {
            fid,
            name: name.to_string(),
            open_flags: flags,
            permissions: FileMode(permissions),
            gid: Gid(0),
        }) {
            Rmessage::Lcreate { qid, .. } => qid,
            other => panic!("create failed: {other:?}"),
        }
    }

    pub fn read(&mut self, fid: u32, offset: u64, count: u32) -> Vec<u8> {
        match self.rpc(&Tmessage::Read { fid, offset, count }) {
            Rmessage::Read { data } => data,
            other => panic!("read failed: {other:?}"),
        }
    }

    pub fn write(&mut self, fid: u32, offset: u64, data: &[u8]) -> u32 {
        match self.rpc(&Tmessage::Write {
            fid,
            offset,
            data: data.to_vec(),
        }) {
            Rmessage::Write { count } => count,
            other => panic!("write failed: {other:?}"),
        }
    }

    pub fn clunk(&mut self, fid: u32) {
        match self.rpc(&Tmessage::Clunk { fid }) {
            Rmessage::Clunk => {}
            other => panic!("clunk failed: {other:?}"),
        }
    }

    pub fn getattr(&mut self, fid: u32) -> (Qid, ninegate_codec::Attr) {
        match self.rpc(&Tmessage::Getattr {
            fid,
            attr_mask: AttrMask::all(),
        }) {
            Rmessage::Getattr { qid, attr, .. } => (qid, attr),
            other => panic!("getattr failed: {other:?}"),
        }
    }

    pub fn readdir(&mut self, fid: u32, offset: u64, count: u32) -> Vec<ninegate_codec::Dirent> {
        match self.rpc(&Tmessage::Readdir {
            directory: fid,
            offset,
            count,
        }) {
            Rmessage::Readdir { entries, .. } => entries,
            other => panic!("readdir failed: {other:?}"),
        }
    }
}

/// The errno of an Rlerror, if the reply is one.
pub fn errno_of(reply: &Rmessage) -> Option<u32> {
    match reply {
        Rmessage::Lerror { errno } => Some(*errno),
        _ => None,
    }
}

/// Assert that a reply is an Rlerror carrying `errno`.
pub fn assert_lerror(reply: &Rmessage, errno: u32) {
    match reply {
        Rmessage::Lerror { errno: got } => assert_eq!(*got, errno, "wrong errno"),
        other => panic!("expected Rlerror({errno}), got {other:?}"),
    }
}
