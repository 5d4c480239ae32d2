// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Wire-level server tests over the static in-memory backend.
// Author: Lukas Bower

mod common;

use std::io::{Read, Write};

use common::{assert_lerror, errno_of, Client};
use ninegate::fsimpl::staticfs::Builder;
use ninegate::Server;
use ninegate_codec::{OpenFlags, Rmessage, Tmessage};

fn static_server() -> Server {
    let fs = Builder::new()
        .file("motd", b"welcome to ninegate\n")
        .unwrap()
        .file("empty", b"")
        .unwrap()
        .file("alphabet", b"abcdefghijklmnopqrstuvwxyz")
        .unwrap()
        .build();
    Server::new(fs)
}

#[test]
fn version_handshake_is_byte_exact() {
    let addr = common::start(static_server());
    let client = Client::connect(addr);
    let mut raw = client.raw_stream();

    // size=21 type=100 tag=0xffff msize=0x00100000 version="9P2000.L"
    let request: [u8; 21] = [
        21, 0, 0, 0, 100, 0xff, 0xff, 0x00, 0x00, 0x10, 0x00, 8, 0, b'9', b'P', b'2', b'0', b'0',
        b'0', b'.', b'L',
    ];
    raw.write_all(&request).unwrap();

    let mut reply = [0u8; 21];
    raw.read_exact(&mut reply).unwrap();
    let expected: [u8; 21] = [
        21, 0, 0, 0, 101, 0xff, 0xff, 0x00, 0x00, 0x10, 0x00, 8, 0, b'9', b'P', b'2', b'0', b'0',
        b'0', b'.', b'L',
    ];
    assert_eq!(reply, expected);
}

#[test]
fn version_negotiation_matrix() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);

    // msize 0 means unknown.
    assert_eq!(c.negotiate(0, "9P2000.L"), (0, "unknown".to_string()));
    // 9P2000.u parses but is not served.
    assert_eq!(c.negotiate(1 << 20, "9P2000.u").1, "unknown");
    // Garbage is unknown.
    assert_eq!(c.negotiate(1 << 20, "9P2001.L").1, "unknown");
    // Google.0 canonicalizes to the bare base string.
    assert_eq!(c.negotiate(1 << 20, "9P2000.L.Google.0").1, "9P2000.L");
    // Supported extension echoes back.
    assert_eq!(c.negotiate(1 << 20, "9P2000.L.Google.2").1, "9P2000.L.Google.2");
    // Requests beyond the supported extension negotiate down.
    let (_, version) = c.negotiate(1 << 20, "9P2000.L.Google.4000000000");
    assert_eq!(version, "9P2000.L.Google.11");
    // Oversized msize clamps to the 4 MiB cap.
    let (msize, version) = c.negotiate(u32::MAX, "9P2000.L");
    assert_eq!(version, "9P2000.L");
    assert_eq!(msize, 4 * 1024 * 1024);
}

#[test]
fn attach_walk_open_read() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    let root_qid = c.setup(0);
    assert!(root_qid.typ.contains(ninegate_codec::QidType::DIR));

    let qids = c.walk(0, 1, &["motd"]);
    assert_eq!(qids.len(), 1);
    c.lopen(1, OpenFlags::READ_ONLY);
    let data = c.read(1, 0, 4096);
    assert_eq!(data, b"welcome to ninegate\n");

    // Offset reads and EOF short reads.
    assert_eq!(c.read(1, 8, 2), b"to".to_vec());
    assert_eq!(c.read(1, 1000, 16), Vec::<u8>::new());

    c.clunk(1);
    // A clunked fid is gone.
    let reply = c.rpc(&Tmessage::Read {
        fid: 1,
        offset: 0,
        count: 16,
    });
    assert_lerror(&reply, 9); // EBADF
}

#[test]
fn clone_walk_emits_no_qids() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    let qids = c.walk(0, 1, &[]);
    assert!(qids.is_empty());
    // The clone is a working handle.
    let qids = c.walk(1, 2, &["empty"]);
    assert_eq!(qids.len(), 1);
}

#[test]
fn walked_qid_matches_getattr_qid() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    // Readdir needs an opened fid, and an opened fid cannot walk, so the
    // listing goes through a clone.
    c.walk(0, 9, &[]);
    c.lopen(9, OpenFlags::READ_ONLY);
    for entry in c.readdir(9, 0, 1 << 16) {
        let name = entry.name.clone();
        let qids = c.walk(0, 7, &[&name]);
        let (qid, _) = c.getattr(7);
        assert_eq!(qids[0], qid, "walk and getattr disagree for {name}");
        assert_eq!(entry.qid, qid, "readdir and getattr disagree for {name}");
        c.clunk(7);
    }
}

#[test]
fn readdir_packs_whole_entries_and_resumes() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    c.lopen(0, OpenFlags::READ_ONLY);

    // Collect everything first to compute exact wire sizes.
    let all = c.readdir(0, 0, 1 << 16);
    assert_eq!(all.len(), 3);
    let sizes: Vec<usize> = all.iter().map(|d| d.wire_size()).collect();

    // A count that fits the first entry plus part of the second returns
    // exactly one whole entry.
    let count = (sizes[0] + sizes[1] - 1) as u32;
    let first = c.readdir(0, 0, count);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0], all[0]);

    // Resuming from the last returned offset yields the remainder with no
    // overlap and nothing missing.
    let rest = c.readdir(0, first[0].offset, 1 << 16);
    assert_eq!(rest, all[1..].to_vec());

    // Offset 0 rewinds.
    let again = c.readdir(0, 0, 1 << 16);
    assert_eq!(again, all);
}

#[test]
fn walk_failures_leave_the_source_fid_alone() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);

    assert_eq!(c.walk_err(0, 1, &["missing"]), 2); // ENOENT
    // The new fid was not installed.
    let reply = c.rpc(&Tmessage::Getattr {
        fid: 1,
        attr_mask: ninegate_codec::AttrMask::all(),
    });
    assert_lerror(&reply, 9); // EBADF
    // The source fid still works.
    assert_eq!(c.walk(0, 1, &["motd"]).len(), 1);

    // Unsafe names are rejected outright.
    assert_eq!(c.walk_err(0, 2, &[".."]), 22); // EINVAL
    assert_eq!(c.walk_err(0, 2, &["a/b"]), 22);
    assert_eq!(c.walk_err(0, 2, &[""]), 22);
}

#[test]
fn opened_fids_cannot_walk() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    c.walk(0, 1, &["motd"]);
    c.lopen(1, OpenFlags::READ_ONLY);
    assert_eq!(c.walk_err(1, 2, &[]), 16); // EBUSY
}

#[test]
fn double_open_is_rejected() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    c.walk(0, 1, &["motd"]);
    c.lopen(1, OpenFlags::READ_ONLY);
    let reply = c.rpc(&Tmessage::Lopen {
        fid: 1,
        flags: OpenFlags::READ_ONLY,
    });
    assert_lerror(&reply, 22); // EINVAL
}

#[test]
fn directories_refuse_writable_opens() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    let reply = c.rpc(&Tmessage::Lopen {
        fid: 0,
        flags: OpenFlags::READ_WRITE,
    });
    assert_lerror(&reply, 22); // EINVAL
}

#[test]
fn write_on_read_only_open_is_eperm() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    c.walk(0, 1, &["motd"]);
    c.lopen(1, OpenFlags::READ_ONLY);
    let reply = c.rpc(&Tmessage::Write {
        fid: 1,
        offset: 0,
        data: b"nope".to_vec(),
    });
    assert_lerror(&reply, 1); // EPERM
}

#[test]
fn read_count_beyond_msize_is_enobufs() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    let (msize, _) = c.negotiate(1 << 16, "9P2000.L");
    c.attach(0, "");
    c.walk(0, 1, &["alphabet"]);
    c.lopen(1, OpenFlags::READ_ONLY);
    let reply = c.rpc(&Tmessage::Read {
        fid: 1,
        offset: 0,
        count: msize,
    });
    assert_lerror(&reply, 105); // ENOBUFS
}

#[test]
fn auth_and_xattr_are_unsupported() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);

    let reply = c.rpc(&Tmessage::Auth {
        auth_fid: 1,
        user_name: "user".into(),
        attach_name: String::new(),
        uid: ninegate_codec::Uid(0),
    });
    assert_lerror(&reply, 38); // ENOSYS

    let reply = c.rpc(&Tmessage::Xattrwalk {
        fid: 0,
        new_fid: 1,
        name: "user.test".into(),
    });
    assert_lerror(&reply, 61); // ENODATA

    let reply = c.rpc(&Tmessage::Xattrcreate {
        fid: 0,
        name: "user.test".into(),
        attr_size: 0,
        flags: 0,
    });
    assert_lerror(&reply, 38); // ENOSYS
}

#[test]
fn attach_with_auth_fid_is_rejected() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.negotiate(1 << 20, "9P2000.L");
    let reply = c.rpc(&Tmessage::Lattach {
        fid: 0,
        auth_fid: 5,
        user_name: String::new(),
        attach_name: String::new(),
        uid: ninegate_codec::Uid::NONE,
    });
    assert_lerror(&reply, 22); // EINVAL
}

#[test]
fn attach_name_walks_from_the_root() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.negotiate(1 << 20, "9P2000.L");
    // The reply carries the root QID even when attaching deeper.
    let root_qid = c.attach(0, "");
    let deep_qid = c.attach(1, "/motd");
    assert_eq!(root_qid, deep_qid);
    // But the fid points at the file.
    c.lopen(1, OpenFlags::READ_ONLY);
    assert_eq!(c.read(1, 0, 7), b"welcome".to_vec());
}

#[test]
fn mutating_a_read_only_tree_fails_with_erofs() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    c.walk(0, 1, &[]);
    let reply = c.rpc(&Tmessage::Lcreate {
        fid: 1,
        name: "newfile".into(),
        open_flags: OpenFlags::READ_WRITE,
        permissions: ninegate_codec::FileMode(0o644),
        gid: ninegate_codec::Gid(0),
    });
    assert_lerror(&reply, 30); // EROFS
    let reply = c.rpc(&Tmessage::Mkdir {
        directory: 1,
        name: "newdir".into(),
        permissions: ninegate_codec::FileMode(0o755),
        gid: ninegate_codec::Gid(0),
    });
    assert_lerror(&reply, 30);
}

#[test]
fn statfs_reports_the_v9fs_magic() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    match c.rpc(&Tmessage::Statfs { fid: 0 }) {
        Rmessage::Statfs { stat } => {
            assert_eq!(stat.typ, 0x0102_1997);
            assert_eq!(stat.block_size, 4096);
        }
        other => panic!("statfs failed: {other:?}"),
    }
}

#[test]
fn walkgetattr_returns_final_attrs_via_fallback() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    // staticfs does not implement the combined call, so this exercises the
    // walk-then-getattr fallback.
    let reply = c.rpc(&Tmessage::Walkgetattr {
        fid: 0,
        new_fid: 3,
        names: vec!["alphabet".into()],
    });
    match reply {
        Rmessage::Walkgetattr { valid, attr, qids } => {
            assert_eq!(qids.len(), 1);
            assert!(valid.size);
            assert_eq!(attr.size, 26);
        }
        other => panic!("walkgetattr failed: {other:?}"),
    }
    // The fid is installed and usable.
    c.lopen(3, OpenFlags::READ_ONLY);
    assert_eq!(c.read(3, 0, 3), b"abc".to_vec());
}

#[test]
fn flushing_a_dead_tag_returns_immediately() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    match c.rpc(&Tmessage::Flush { old_tag: 4321 }) {
        Rmessage::Flush => {}
        other => panic!("flush failed: {other:?}"),
    }
}

#[test]
fn unknown_fids_are_ebadf_everywhere() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    for msg in [
        Tmessage::Clunk { fid: 99 },
        Tmessage::Remove { fid: 99 },
        Tmessage::Statfs { fid: 99 },
        Tmessage::Readlink { fid: 99 },
        Tmessage::Fsync { fid: 99 },
        Tmessage::Read {
            fid: 99,
            offset: 0,
            count: 1,
        },
    ] {
        let reply = c.rpc(&msg);
        assert_eq!(errno_of(&reply), Some(9), "expected EBADF for {msg:?}");
    }
}

#[test]
fn tversion_with_normal_traffic_interleaved_resets_fids() {
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.setup(0);
    assert_eq!(c.walk(0, 1, &["motd"]).len(), 1);

    // Renegotiate: every fid from the previous session is clunked.
    let (_, version) = c.negotiate(1 << 20, "9P2000.L");
    assert_eq!(version, "9P2000.L");
    let reply = c.rpc(&Tmessage::Clunk { fid: 0 });
    assert_lerror(&reply, 9); // EBADF
    let reply = c.rpc(&Tmessage::Clunk { fid: 1 });
    assert_lerror(&reply, 9);

    // And the connection keeps working.
    c.attach(0, "");
    assert_eq!(c.walk(0, 1, &["motd"]).len(), 1);
}

#[test]
fn tversion_messages_ignore_their_tag_value() {
    // Tversion is legal with any tag, not just NOTAG; the reply echoes it.
    let addr = common::start(static_server());
    let mut c = Client::connect(addr);
    c.send(
        77,
        &Tmessage::Version {
            msize: 1 << 20,
            version: "9P2000.L".into(),
        },
    );
    let (tag, reply) = c.recv();
    assert_eq!(tag, 77);
    assert!(matches!(reply, Rmessage::Version { .. }));
}
