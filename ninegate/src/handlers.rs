// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: One handler per request message: preconditions, backend call, state.
// Author: Lukas Bower

//! Request handlers.
//!
//! Every handler follows the same shape: look the fids up (taking temporary
//! references released on scope exit), validate preconditions, run the
//! backend operation inside the appropriate locking combinator, update the
//! fid table and path tree, and produce the success reply. Failures return
//! an [`Errno`]; the dispatcher wraps it in the dialect's error message, so
//! no handler ever builds an error reply itself.

use std::sync::Arc;

use ninegate_codec::{
    AllocateMode, Attr, AttrMask, Dirent, FileMode, Gid, LegacyMode, OpenFlags, Qid, Rmessage,
    SetAttr, SetAttrMask, Tmessage, Uid, DM_DIR, HEADER_LENGTH, MAXIMUM_LENGTH, NO_FID,
};

use crate::errno::{Errno, Result};
use crate::fid::{FidGuard, FidRef, Handle};
use crate::server::ConnState;
use crate::session::Session;
use crate::version::{parse_version, version_string, HIGHEST_SUPPORTED_VERSION};

/// Frame overhead of an Rread reply: header plus the count field. The data
/// of a read must fit under msize after this.
const READ_OVERHEAD: u32 = HEADER_LENGTH + 4;

/// Handle Tversion. Runs inline on the receive loop: installing the new
/// session and retiring the old one must finish before the next recv.
pub(crate) fn handle_version(conn: &Arc<ConnState>, msize: u32, version: &str) -> Rmessage {
    let unknown = Rmessage::Version {
        msize: 0,
        version: "unknown".to_string(),
    };
    if msize == 0 {
        return unknown;
    }
    let msize = msize.min(MAXIMUM_LENGTH);

    let Some((base, requested)) = parse_version(version) else {
        return unknown;
    };
    if base.dialect().is_none() {
        // 9P2000.u parses but is not served.
        return unknown;
    }
    let negotiated = requested.min(HIGHEST_SUPPORTED_VERSION);

    let fresh = Session::new(base, negotiated, msize);
    let old = conn.install_session(fresh);
    // Clunk all fids and abort outstanding work before replying. Handlers
    // already running against the old session will notice it is stale and
    // drop their replies.
    old.stop();

    Rmessage::Version {
        msize,
        version: version_string(base, negotiated),
    }
}

/// Handle one non-Tversion request, producing the reply to send.
pub(crate) fn handle_message(
    conn: &Arc<ConnState>,
    session: &Arc<Session>,
    msg: Tmessage,
) -> Rmessage {
    match dispatch(conn, session, msg) {
        Ok(reply) => reply,
        Err(errno) => session.new_err(errno),
    }
}

fn dispatch(conn: &Arc<ConnState>, session: &Arc<Session>, msg: Tmessage) -> Result<Rmessage> {
    match msg {
        // The pump handles Tversion inline; one arriving here is a bug, and
        // answering EINVAL keeps the connection alive regardless.
        Tmessage::Version { .. } => Err(Errno::EINVAL),
        // No authentication support.
        Tmessage::Auth { .. } => Err(Errno::ENOSYS),
        Tmessage::Flush { old_tag } => {
            session.wait_tag(old_tag);
            Ok(Rmessage::Flush)
        }
        Tmessage::Attach {
            fid,
            auth_fid,
            attach_name,
            ..
        } => attach_legacy(conn, session, fid, auth_fid, &attach_name),
        Tmessage::Lattach {
            fid,
            auth_fid,
            attach_name,
            ..
        } => attach(conn, session, fid, auth_fid, &attach_name),
        Tmessage::Walk {
            fid,
            new_fid,
            names,
        } => walk(conn, session, fid, new_fid, &names),
        Tmessage::Walkgetattr {
            fid,
            new_fid,
            names,
        } => walk_get_attr(conn, session, fid, new_fid, &names),
        Tmessage::Open { fid, mode } => open_legacy(session, fid, mode),
        Tmessage::Create {
            fid,
            name,
            permissions,
            mode,
        } => create_legacy(conn, session, fid, &name, permissions, mode),
        Tmessage::Lopen { fid, flags } => lopen(session, fid, flags),
        Tmessage::Lcreate {
            fid,
            name,
            open_flags,
            permissions,
            gid,
        } => {
            let (qid, io_unit) =
                lcreate(conn, session, fid, &name, open_flags, permissions, Uid::NONE, gid)?;
            Ok(Rmessage::Lcreate { qid, io_unit })
        }
        Tmessage::Ucreate {
            fid,
            name,
            open_flags,
            permissions,
            gid,
            uid,
        } => {
            let (qid, io_unit) =
                lcreate(conn, session, fid, &name, open_flags, permissions, uid, gid)?;
            Ok(Rmessage::Ucreate { qid, io_unit })
        }
        Tmessage::Symlink {
            directory,
            name,
            target,
            gid,
        } => Ok(Rmessage::Symlink {
            qid: symlink(session, directory, &name, &target, Uid::NONE, gid)?,
        }),
        Tmessage::Usymlink {
            directory,
            name,
            target,
            gid,
            uid,
        } => Ok(Rmessage::Usymlink {
            qid: symlink(session, directory, &name, &target, uid, gid)?,
        }),
        Tmessage::Mkdir {
            directory,
            name,
            permissions,
            gid,
        } => Ok(Rmessage::Mkdir {
            qid: mkdir(session, directory, &name, permissions, Uid::NONE, gid)?,
        }),
        Tmessage::Umkdir {
            directory,
            name,
            permissions,
            gid,
            uid,
        } => Ok(Rmessage::Umkdir {
            qid: mkdir(session, directory, &name, permissions, uid, gid)?,
        }),
        Tmessage::Mknod {
            directory,
            name,
            mode,
            major,
            minor,
            gid,
        } => Ok(Rmessage::Mknod {
            qid: mknod(session, directory, &name, mode, major, minor, Uid::NONE, gid)?,
        }),
        Tmessage::Umknod {
            directory,
            name,
            mode,
            major,
            minor,
            gid,
            uid,
        } => Ok(Rmessage::Umknod {
            qid: mknod(session, directory, &name, mode, major, minor, uid, gid)?,
        }),
        Tmessage::Link {
            directory,
            target,
            name,
        } => link(session, directory, target, &name),
        Tmessage::Rename {
            fid,
            directory,
            name,
        } => rename(session, fid, directory, &name),
        Tmessage::Renameat {
            old_directory,
            old_name,
            new_directory,
            new_name,
        } => renameat(session, old_directory, &old_name, new_directory, &new_name),
        Tmessage::Unlinkat {
            directory,
            name,
            flags,
        } => unlinkat(session, directory, &name, flags),
        Tmessage::Clunk { fid } => {
            if !session.delete_fid(fid) {
                return Err(Errno::EBADF);
            }
            Ok(Rmessage::Clunk)
        }
        Tmessage::Remove { fid } => remove(session, fid),
        Tmessage::Read { fid, offset, count } => read(session, fid, offset, count),
        Tmessage::Write { fid, offset, data } => write(session, fid, offset, &data),
        Tmessage::Readdir {
            directory,
            offset,
            count,
        } => readdir(session, directory, offset, count),
        Tmessage::Readlink { fid } => readlink(session, fid),
        Tmessage::Getattr { fid, attr_mask } => getattr(session, fid, attr_mask),
        Tmessage::Setattr {
            fid,
            valid,
            set_attr,
        } => setattr(session, fid, valid, set_attr),
        Tmessage::Xattrwalk { fid, .. } => {
            let _fid_ref = lookup(session, fid)?;
            // Extended attributes are not supported.
            Err(Errno::ENODATA)
        }
        Tmessage::Xattrcreate { fid, .. } => {
            let _fid_ref = lookup(session, fid)?;
            Err(Errno::ENOSYS)
        }
        Tmessage::Fsync { fid } => fsync(session, fid),
        Tmessage::Statfs { fid } => statfs(session, fid),
        Tmessage::Flushf { fid } => {
            // Deprecated; validate the fid and acknowledge.
            let _fid_ref = lookup(session, fid)?;
            Ok(Rmessage::Flushf)
        }
        Tmessage::Allocate {
            fid,
            mode,
            offset,
            length,
        } => allocate(session, fid, mode, offset, length),
    }
}

fn lookup(session: &Session, fid: u32) -> Result<FidGuard> {
    session.lookup_fid(fid).ok_or(Errno::EBADF)
}

/// Names must be single, plain path components.
fn check_safe_name(name: &str) -> Result<()> {
    if !name.is_empty() && !name.contains('/') && name != "." && name != ".." {
        Ok(())
    } else {
        Err(Errno::EINVAL)
    }
}

/// Whether a file of this type can be opened for I/O. Everything except
/// symlinks and sockets.
fn can_open(mode: FileMode) -> bool {
    mode.is_regular()
        || mode.is_dir()
        || mode.is_named_pipe()
        || mode.is_block_device()
        || mode.is_char_device()
}

fn attach(
    conn: &Arc<ConnState>,
    session: &Arc<Session>,
    fid: u32,
    auth_fid: u32,
    attach_name: &str,
) -> Result<Rmessage> {
    if auth_fid != NO_FID {
        return Err(Errno::EINVAL);
    }
    let attacher = conn.server.attacher().ok_or(Errno::ENOSYS)?;

    // Attach names are treated as absolute; walk from the root either way.
    let attach_name = attach_name.strip_prefix('/').unwrap_or(attach_name);

    let sf = attacher.attach()?;
    let (qid, valid, attr) = match sf.get_attr(AttrMask::all()) {
        Ok(v) => v,
        Err(err) => {
            sf.close();
            return Err(err);
        }
    };
    if !valid.mode {
        sf.close();
        return Err(Errno::EINVAL);
    }

    let root = FidGuard::from_counted(FidRef::new(
        Handle::Lin(sf),
        None,
        conn.server.path_tree(),
        attr.mode.is_dir(),
        can_open(attr.mode),
        false,
        conn.server.rename_mu(),
    ));

    if attach_name.is_empty() {
        session.insert_fid(fid, root.as_arc());
        return Ok(Rmessage::Attach { qid });
    }

    // Walk to the requested subtree with the regular traversal checks. The
    // reply carries the root QID either way; the stateful Linux client
    // expects that.
    let names: Vec<String> = attach_name.split('/').map(str::to_string).collect();
    let (_qids, new_ref, _, _) = do_walk(conn, root.as_arc(), &names, WalkStyle::Lin)?;
    session.insert_fid(fid, new_ref.as_arc());
    Ok(Rmessage::Attach { qid })
}

fn attach_legacy(
    conn: &Arc<ConnState>,
    session: &Arc<Session>,
    fid: u32,
    auth_fid: u32,
    attach_name: &str,
) -> Result<Rmessage> {
    if auth_fid != NO_FID {
        return Err(Errno::EINVAL);
    }
    let attacher = conn.server.legacy_attacher().ok_or(Errno::ENOSYS)?;

    let attach_name = attach_name.strip_prefix('/').unwrap_or(attach_name);

    let (qid, sf) = attacher.attach()?;
    let root = FidGuard::from_counted(FidRef::new(
        Handle::Legacy(sf),
        None,
        conn.server.path_tree(),
        qid.typ.contains(ninegate_codec::QidType::DIR),
        true,
        false,
        conn.server.rename_mu(),
    ));

    if attach_name.is_empty() {
        session.insert_fid(fid, root.as_arc());
        return Ok(Rmessage::Attach { qid });
    }

    let names: Vec<String> = attach_name.split('/').map(str::to_string).collect();
    let (_qids, new_ref, _, _) = do_walk(conn, root.as_arc(), &names, WalkStyle::Legacy)?;
    session.insert_fid(fid, new_ref.as_arc());
    Ok(Rmessage::Attach { qid })
}

/// How a walk step talks to the backend.
#[derive(Clone, Copy, PartialEq, Eq)]
enum WalkStyle {
    /// Classic 9P2000 handles.
    Legacy,
    /// 9P2000.L handles.
    Lin,
    /// 9P2000.L handles, fetching attributes of the final component.
    LinGetattr,
}

/// Walk zero or one components from `from`, building the fid reference for
/// the result. The returned reference's count is owned by the caller.
fn walk_one(
    conn: &Arc<ConnState>,
    from: &Arc<FidRef>,
    names: &[&str],
    style: WalkStyle,
) -> Result<(Vec<Qid>, Arc<FidRef>, AttrMask, Attr)> {
    if names.len() > 1 {
        // Exactly zero or one elements per step.
        return Err(Errno::EINVAL);
    }

    let mut valid = AttrMask::default();
    let mut attr = Attr::default();

    let (qids, handle, is_dir, is_openable) = match style {
        WalkStyle::Legacy => {
            let file = from.handle.legacy()?;
            let (qids, sf) = file.walk(names)?;
            if qids.len() != 1 {
                sf.close();
                return Err(Errno::EINVAL);
            }
            // Directory-ness of a stepped-to child comes from the QID type.
            let is_dir = qids[0].typ.contains(ninegate_codec::QidType::DIR);
            (qids, Handle::Legacy(sf), is_dir, true)
        }
        WalkStyle::Lin | WalkStyle::LinGetattr => {
            let file = from.handle.lin()?;
            let getattr = style == WalkStyle::LinGetattr;
            let combined = if getattr {
                match file.walk_get_attr(names) {
                    Ok((qids, sf, v, a)) => {
                        valid = v;
                        attr = a;
                        Some((qids, sf))
                    }
                    // Backend has no combined path; fall back below.
                    Err(Errno::ENOSYS) => None,
                    Err(err) => return Err(err),
                }
            } else {
                None
            };
            let (qids, sf) = match combined {
                Some(pair) => pair,
                None => {
                    let (qids, sf) = file.walk(names)?;
                    if getattr || names.len() == 1 {
                        match sf.get_attr(AttrMask::all()) {
                            Ok((_, v, a)) => {
                                valid = v;
                                attr = a;
                            }
                            Err(err) => {
                                sf.close();
                                return Err(err);
                            }
                        }
                    }
                    (qids, sf)
                }
            };
            if qids.len() != 1 {
                sf.close();
                return Err(Errno::EINVAL);
            }
            let is_dir = attr.mode.is_dir();
            let is_openable = can_open(attr.mode);
            (qids, Handle::Lin(sf), is_dir, is_openable)
        }
    };

    let new_ref = if names.is_empty() {
        // Clone: same node, same parent, and the deleted flag carries over.
        FidRef::new(
            handle,
            from.parent.clone(),
            from.path_node(),
            from.is_dir,
            from.is_openable,
            from.is_deleted(),
            conn.server.rename_mu(),
        )
    } else {
        FidRef::new(
            handle,
            Some(from.clone()),
            from.path_node().path_node_for(names[0]),
            is_dir,
            is_openable,
            false,
            conn.server.rename_mu(),
        )
    };
    Ok((qids, new_ref, valid, attr))
}

/// The shared walk algorithm.
///
/// Walks one component at a time, each step under the walked fid's shared
/// operation lock, registering every crossed child in the path tree. On
/// failure the partially-walked chain is released and `from` is untouched.
fn do_walk(
    conn: &Arc<ConnState>,
    from: &Arc<FidRef>,
    names: &[String],
    style: WalkStyle,
) -> Result<(Vec<Qid>, FidGuard, AttrMask, Attr)> {
    for name in names {
        check_safe_name(name)?;
    }

    // An opened fid cannot be the source of a walk.
    if from.open_flags().is_some() {
        return Err(Errno::EBUSY);
    }

    if names.is_empty() {
        // Clone. Always permitted; no QIDs are emitted.
        let parent = from.maybe_parent();
        let mut cloned: Option<Arc<FidRef>> = None;
        parent.safely_read(|| {
            let (_qids, new_ref, _, _) = walk_one(conn, from, &[], style)?;
            if !from.is_root() {
                let parent_ref = from.parent.as_ref().expect("non-root fid has a parent");
                if !new_ref.is_deleted() {
                    let parent_node = parent_ref.path_node();
                    let name = parent_node.name_for(from);
                    parent_node.add_child(&new_ref, &name);
                }
                // The clone holds its own reference on the parent chain.
                parent_ref.inc_ref();
            }
            cloned = Some(new_ref);
            Ok(())
        })?;
        let new_ref = cloned.expect("clone walk produced a reference");
        return Ok((
            Vec::new(),
            FidGuard::from_counted(new_ref),
            AttrMask::default(),
            Attr::default(),
        ));
    }

    let mut qids = Vec::with_capacity(names.len());
    let mut last_valid = AttrMask::default();
    let mut last_attr = Attr::default();

    // The cursor reference is owned by this function until it is returned;
    // when a step succeeds, the old cursor's count transfers to the new
    // child, which holds its parent chain alive.
    from.inc_ref();
    let mut cursor: Arc<FidRef> = from.clone();

    for name in names {
        // Walking proceeds only through directories.
        if !cursor.is_dir {
            cursor.dec_ref();
            return Err(Errno::EINVAL);
        }

        let mut next: Option<Arc<FidRef>> = None;
        let step = cursor.safely_read(|| {
            let (step_qids, new_ref, valid, attr) =
                walk_one(conn, &cursor, &[name.as_str()], style)?;
            qids.extend(step_qids);
            last_valid = valid;
            last_attr = attr;
            cursor.path_node().add_child(&new_ref, name);
            next = Some(new_ref);
            Ok(())
        });
        match step {
            Ok(()) => {
                cursor = next.expect("successful walk step produced a reference");
            }
            Err(err) => {
                // Drop the chain walked so far; `from` keeps its count.
                cursor.dec_ref();
                return Err(err);
            }
        }
    }

    Ok((qids, FidGuard::from_counted(cursor), last_valid, last_attr))
}

fn walk(
    conn: &Arc<ConnState>,
    session: &Arc<Session>,
    fid: u32,
    new_fid: u32,
    names: &[String],
) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;
    let style = match &fid_ref.handle {
        Handle::Lin(_) => WalkStyle::Lin,
        Handle::Legacy(_) => WalkStyle::Legacy,
    };
    let (qids, new_ref, _, _) = do_walk(conn, fid_ref.as_arc(), names, style)?;
    session.insert_fid(new_fid, new_ref.as_arc());
    Ok(Rmessage::Walk { qids })
}

fn walk_get_attr(
    conn: &Arc<ConnState>,
    session: &Arc<Session>,
    fid: u32,
    new_fid: u32,
    names: &[String],
) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;
    let (qids, new_ref, valid, attr) =
        do_walk(conn, fid_ref.as_arc(), names, WalkStyle::LinGetattr)?;
    session.insert_fid(new_fid, new_ref.as_arc());
    Ok(Rmessage::Walkgetattr { valid, attr, qids })
}

fn lopen(session: &Arc<Session>, fid: u32, flags: OpenFlags) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;

    // The open state lock is held across the backend call so two opens
    // cannot interleave.
    let mut open_state = fid_ref.open_state.lock().unwrap();
    if open_state.opened || !fid_ref.is_openable {
        return Err(Errno::EINVAL);
    }
    // Directories never open writable.
    if fid_ref.is_dir && flags.mode() != OpenFlags::READ_ONLY {
        return Err(Errno::EINVAL);
    }

    let (qid, io_unit) = fid_ref.safely_read(|| {
        if fid_ref.is_deleted() {
            return Err(Errno::EINVAL);
        }
        fid_ref.handle.lin()?.open(flags)
    })?;

    open_state.opened = true;
    open_state.flags = flags;
    Ok(Rmessage::Lopen { qid, io_unit })
}

fn open_legacy(session: &Arc<Session>, fid: u32, mode: LegacyMode) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;

    let mut open_state = fid_ref.open_state.lock().unwrap();
    if open_state.opened || !fid_ref.is_openable {
        return Err(Errno::EINVAL);
    }
    if fid_ref.is_dir && mode.mode() != LegacyMode::READ && mode.mode() != LegacyMode::EXEC {
        return Err(Errno::EINVAL);
    }

    let (qid, io_unit) = fid_ref.safely_read(|| {
        if fid_ref.is_deleted() {
            return Err(Errno::EINVAL);
        }
        fid_ref.handle.legacy()?.open(mode)
    })?;

    open_state.opened = true;
    open_state.flags = mode.open_flags();
    Ok(Rmessage::Open { qid, io_unit })
}

#[allow(clippy::too_many_arguments)]
fn lcreate(
    conn: &Arc<ConnState>,
    session: &Arc<Session>,
    fid: u32,
    name: &str,
    open_flags: OpenFlags,
    permissions: FileMode,
    uid: Uid,
    gid: Gid,
) -> Result<(Qid, u32)> {
    check_safe_name(name)?;
    let fid_ref = lookup(session, fid)?;

    let mut created: Option<Arc<FidRef>> = None;
    let (qid, io_unit) = fid_ref.safely_write(|| {
        if fid_ref.is_deleted() || !fid_ref.is_dir {
            return Err(Errno::EINVAL);
        }
        // Not allowed on open directories.
        if fid_ref.open_flags().is_some() {
            return Err(Errno::EINVAL);
        }

        let (nsf, qid, io_unit) = fid_ref
            .handle
            .lin()?
            .create(name, open_flags, permissions, uid, gid)?;

        let new_ref = FidRef::new(
            Handle::Lin(nsf),
            Some(fid_ref.as_arc().clone()),
            fid_ref.path_node().path_node_for(name),
            false,
            true,
            false,
            conn.server.rename_mu(),
        );
        {
            let mut state = new_ref.open_state.lock().unwrap();
            state.opened = true;
            state.flags = open_flags;
        }
        fid_ref.path_node().add_child(&new_ref, name);
        fid_ref.inc_ref(); // The child holds the parent chain.
        created = Some(new_ref);
        Ok((qid, io_unit))
    })?;

    // The parent fid is replaced by the created (and opened) child.
    let new_ref = FidGuard::from_counted(created.expect("create produced a reference"));
    session.insert_fid(fid, new_ref.as_arc());
    Ok((qid, io_unit))
}

fn create_legacy(
    conn: &Arc<ConnState>,
    session: &Arc<Session>,
    fid: u32,
    name: &str,
    permissions: u32,
    mode: LegacyMode,
) -> Result<Rmessage> {
    check_safe_name(name)?;
    let fid_ref = lookup(session, fid)?;

    let mut created: Option<Arc<FidRef>> = None;
    let (qid, io_unit) = fid_ref.safely_write(|| {
        if fid_ref.is_deleted() || !fid_ref.is_dir {
            return Err(Errno::EINVAL);
        }
        if fid_ref.open_flags().is_some() {
            return Err(Errno::EINVAL);
        }

        let (nsf, qid, io_unit) = fid_ref.handle.legacy()?.create(name, permissions, mode)?;

        let new_ref = FidRef::new(
            Handle::Legacy(nsf),
            Some(fid_ref.as_arc().clone()),
            fid_ref.path_node().path_node_for(name),
            permissions & DM_DIR != 0,
            true,
            false,
            conn.server.rename_mu(),
        );
        {
            let mut state = new_ref.open_state.lock().unwrap();
            state.opened = true;
            state.flags = mode.open_flags();
        }
        fid_ref.path_node().add_child(&new_ref, name);
        fid_ref.inc_ref();
        created = Some(new_ref);
        Ok((qid, io_unit))
    })?;

    let new_ref = FidGuard::from_counted(created.expect("create produced a reference"));
    session.insert_fid(fid, new_ref.as_arc());
    Ok(Rmessage::Create { qid, io_unit })
}

fn symlink(
    session: &Arc<Session>,
    directory: u32,
    name: &str,
    target: &str,
    uid: Uid,
    gid: Gid,
) -> Result<Qid> {
    check_safe_name(name)?;
    let fid_ref = lookup(session, directory)?;
    fid_ref.safely_write(|| {
        if fid_ref.is_deleted() || !fid_ref.is_dir {
            return Err(Errno::EINVAL);
        }
        if fid_ref.open_flags().is_some() {
            return Err(Errno::EINVAL);
        }
        fid_ref.handle.lin()?.symlink(target, name, uid, gid)
    })
}

fn mkdir(
    session: &Arc<Session>,
    directory: u32,
    name: &str,
    permissions: FileMode,
    uid: Uid,
    gid: Gid,
) -> Result<Qid> {
    check_safe_name(name)?;
    let fid_ref = lookup(session, directory)?;
    fid_ref.safely_write(|| {
        if fid_ref.is_deleted() || !fid_ref.is_dir {
            return Err(Errno::EINVAL);
        }
        if fid_ref.open_flags().is_some() {
            return Err(Errno::EINVAL);
        }
        fid_ref.handle.lin()?.mkdir(name, permissions, uid, gid)
    })
}

#[allow(clippy::too_many_arguments)]
fn mknod(
    session: &Arc<Session>,
    directory: u32,
    name: &str,
    mode: FileMode,
    major: u32,
    minor: u32,
    uid: Uid,
    gid: Gid,
) -> Result<Qid> {
    check_safe_name(name)?;
    let fid_ref = lookup(session, directory)?;
    fid_ref.safely_write(|| {
        if fid_ref.is_deleted() || !fid_ref.is_dir {
            return Err(Errno::EINVAL);
        }
        if fid_ref.open_flags().is_some() {
            return Err(Errno::EINVAL);
        }
        fid_ref
            .handle
            .lin()?
            .mknod(name, mode, major, minor, uid, gid)
    })
}

fn link(session: &Arc<Session>, directory: u32, target: u32, name: &str) -> Result<Rmessage> {
    check_safe_name(name)?;
    let dir_ref = lookup(session, directory)?;
    let target_ref = lookup(session, target)?;
    dir_ref.safely_write(|| {
        if dir_ref.is_deleted() || !dir_ref.is_dir {
            return Err(Errno::EINVAL);
        }
        if dir_ref.open_flags().is_some() {
            return Err(Errno::EINVAL);
        }
        dir_ref
            .handle
            .lin()?
            .link(target_ref.handle.lin()?, name)
    })?;
    Ok(Rmessage::Link)
}

fn renameat(
    session: &Arc<Session>,
    old_directory: u32,
    old_name: &str,
    new_directory: u32,
    new_name: &str,
) -> Result<Rmessage> {
    check_safe_name(old_name)?;
    check_safe_name(new_name)?;

    let old_ref = lookup(session, old_directory)?;
    let new_ref = lookup(session, new_directory)?;

    old_ref.safely_global(|| {
        if old_ref.is_deleted() || !old_ref.is_dir || new_ref.is_deleted() || !new_ref.is_dir {
            return Err(Errno::EINVAL);
        }
        if old_ref.open_flags().is_some() {
            return Err(Errno::EINVAL);
        }

        // Renaming a name onto itself is a no-op.
        if Arc::ptr_eq(&old_ref.path_node(), &new_ref.path_node()) && old_name == new_name {
            return Ok(());
        }

        old_ref
            .handle
            .lin()?
            .rename_at(old_name, new_ref.handle.lin()?, new_name)?;

        old_ref.rename_child_to(old_name, &new_ref, new_name);
        Ok(())
    })?;
    Ok(Rmessage::Renameat)
}

fn rename(session: &Arc<Session>, fid: u32, directory: u32, name: &str) -> Result<Rmessage> {
    check_safe_name(name)?;

    let fid_ref = lookup(session, fid)?;
    let target_ref = lookup(session, directory)?;

    fid_ref.safely_global(|| {
        // The root of an attach cannot be renamed.
        if fid_ref.is_root() {
            return Err(Errno::EINVAL);
        }
        if fid_ref.is_deleted() || target_ref.is_deleted() || !target_ref.is_dir {
            return Err(Errno::EINVAL);
        }
        let parent = fid_ref.parent.as_ref().expect("non-root fid has a parent");
        debug_assert!(
            !parent.is_deleted(),
            "parent deleted while child {name} is live"
        );

        // Renames of open files proceed; only the naming graph changes.

        let old_name = parent.path_node().name_for(&fid_ref);
        if Arc::ptr_eq(&parent.path_node(), &target_ref.path_node()) && old_name == name {
            return Ok(());
        }

        parent
            .handle
            .lin()?
            .rename_at(&old_name, target_ref.handle.lin()?, name)?;

        parent.rename_child_to(&old_name, &target_ref, name);
        Ok(())
    })?;
    Ok(Rmessage::Rename)
}

fn unlinkat(session: &Arc<Session>, directory: u32, name: &str, flags: u32) -> Result<Rmessage> {
    check_safe_name(name)?;
    let fid_ref = lookup(session, directory)?;

    fid_ref.safely_write(|| {
        if fid_ref.is_deleted() || !fid_ref.is_dir {
            return Err(Errno::EINVAL);
        }
        if fid_ref.open_flags().is_some() {
            return Err(Errno::EINVAL);
        }

        // Quiesce the victim before unlinking so marking it deleted is
        // atomic against reads and writes through fids bound to it. Taking
        // the child lock after the parent lock is the shallow-to-deep order
        // every other path uses.
        let child_node = fid_ref.path_node().path_node_for(name);
        let _child_op = child_node.op_mu.write().unwrap();

        fid_ref.handle.lin()?.unlink_at(name, flags)?;

        fid_ref.mark_child_deleted(name);
        Ok(())
    })?;
    Ok(Rmessage::Unlinkat)
}

fn remove(session: &Arc<Session>, fid: u32) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;

    // A rename may be racing this removal, and ref.parent changes under
    // renames, so only the global lock makes the parent stable. This is why
    // clients prefer Tunlinkat.
    let result = fid_ref.safely_global(|| {
        if fid_ref.is_root() {
            return Err(Errno::EINVAL);
        }
        // Removal is permitted on open files.
        if fid_ref.is_deleted() {
            return Err(Errno::EINVAL);
        }
        let parent = fid_ref.parent.as_ref().expect("non-root fid has a parent");
        let name = parent.path_node().name_for(&fid_ref);

        match &parent.handle {
            Handle::Lin(dir) => dir.unlink_at(&name, 0)?,
            Handle::Legacy(_) => fid_ref.handle.legacy()?.remove()?,
        }

        // Everything under the removed name is now stale. The global lock
        // stands in for the per-node locks here.
        parent.mark_child_deleted(&name);
        Ok(())
    });

    // Remove is also a clunk, even when the removal failed.
    if !session.delete_fid(fid) {
        return Err(Errno::EBADF);
    }
    result?;
    Ok(Rmessage::Remove)
}

fn read(session: &Arc<Session>, fid: u32, offset: u64, count: u32) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;

    // The reply must fit under the negotiated msize.
    if count > session.message_size.saturating_sub(READ_OVERHEAD) {
        return Err(Errno::ENOBUFS);
    }

    let mut data = vec![0u8; count as usize];
    let n = fid_ref.safely_read(|| {
        let Some(flags) = fid_ref.open_flags() else {
            return Err(Errno::EINVAL);
        };
        if flags.mode() == OpenFlags::WRITE_ONLY {
            return Err(Errno::EPERM);
        }
        match &fid_ref.handle {
            Handle::Lin(file) => file.read_at(&mut data, offset),
            Handle::Legacy(file) => file.read_at(&mut data, offset),
        }
    })?;
    data.truncate(n);
    Ok(Rmessage::Read { data })
}

fn write(session: &Arc<Session>, fid: u32, offset: u64, data: &[u8]) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;

    let n = fid_ref.safely_read(|| {
        let Some(flags) = fid_ref.open_flags() else {
            return Err(Errno::EINVAL);
        };
        let mode = flags.mode();
        if mode == OpenFlags::READ_ONLY || mode == OpenFlags::READ_AND_EXECUTE {
            return Err(Errno::EPERM);
        }
        match &fid_ref.handle {
            Handle::Lin(file) => file.write_at(data, offset),
            Handle::Legacy(file) => file.write_at(data, offset),
        }
    })?;
    Ok(Rmessage::Write { count: n as u32 })
}

fn readdir(session: &Arc<Session>, directory: u32, offset: u64, count: u32) -> Result<Rmessage> {
    let fid_ref = lookup(session, directory)?;

    // Bound the reply to the negotiated msize no matter what was asked.
    let count = count.min(session.message_size.saturating_sub(READ_OVERHEAD));

    let entries: Vec<Dirent> = fid_ref.safely_read(|| {
        if fid_ref.is_deleted() || !fid_ref.is_dir {
            return Err(Errno::EINVAL);
        }
        if fid_ref.open_flags().is_none() {
            return Err(Errno::EINVAL);
        }
        fid_ref.handle.lin()?.readdir(offset, count)
    })?;

    Ok(Rmessage::Readdir { count, entries })
}

fn readlink(session: &Arc<Session>, fid: u32) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;
    let target = fid_ref.safely_read(|| {
        if fid_ref.is_deleted() {
            return Err(Errno::EINVAL);
        }
        fid_ref.handle.lin()?.readlink()
    })?;
    Ok(Rmessage::Readlink { target })
}

fn getattr(session: &Arc<Session>, fid: u32, mask: AttrMask) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;
    let (qid, valid, attr) = fid_ref.safely_read(|| {
        // Clients refresh attributes of unlinked-but-open files routinely,
        // so the deleted mark only invalidates fids that never opened.
        if fid_ref.is_deleted() && fid_ref.open_flags().is_none() {
            return Err(Errno::EINVAL);
        }
        fid_ref.handle.lin()?.get_attr(mask)
    })?;
    Ok(Rmessage::Getattr { valid, qid, attr })
}

fn setattr(
    session: &Arc<Session>,
    fid: u32,
    valid: SetAttrMask,
    set_attr: SetAttr,
) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;
    fid_ref.safely_write(|| {
        if fid_ref.is_deleted() {
            return Err(Errno::EINVAL);
        }
        fid_ref.handle.lin()?.set_attr(valid, set_attr)
    })?;
    Ok(Rmessage::Setattr)
}

fn fsync(session: &Arc<Session>, fid: u32) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;
    fid_ref.safely_read(|| {
        if fid_ref.open_flags().is_none() {
            return Err(Errno::EINVAL);
        }
        fid_ref.handle.lin()?.fsync()
    })?;
    Ok(Rmessage::Fsync)
}

fn statfs(session: &Arc<Session>, fid: u32) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;
    let stat = fid_ref.safely_read(|| fid_ref.handle.lin()?.statfs())?;
    Ok(Rmessage::Statfs { stat })
}

fn allocate(
    session: &Arc<Session>,
    fid: u32,
    mode: AllocateMode,
    offset: u64,
    length: u64,
) -> Result<Rmessage> {
    let fid_ref = lookup(session, fid)?;
    fid_ref.safely_write(|| {
        let Some(flags) = fid_ref.open_flags() else {
            return Err(Errno::EINVAL);
        };
        if flags.mode() == OpenFlags::READ_ONLY {
            return Err(Errno::EBADF);
        }
        fid_ref.handle.lin()?.allocate(mode, offset, length)
    })?;
    Ok(Rmessage::Allocate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_names() {
        assert!(check_safe_name("file").is_ok());
        assert!(check_safe_name("with space").is_ok());
        assert!(check_safe_name("").is_err());
        assert!(check_safe_name(".").is_err());
        assert!(check_safe_name("..").is_err());
        assert!(check_safe_name("a/b").is_err());
        assert!(check_safe_name("/").is_err());
    }

    #[test]
    fn openable_types() {
        assert!(can_open(FileMode(FileMode::REGULAR)));
        assert!(can_open(FileMode(FileMode::DIRECTORY)));
        assert!(can_open(FileMode(FileMode::NAMED_PIPE)));
        assert!(can_open(FileMode(FileMode::BLOCK_DEVICE)));
        assert!(can_open(FileMode(FileMode::CHARACTER_DEVICE)));
        assert!(!can_open(FileMode(FileMode::SYMLINK)));
        assert!(!can_open(FileMode(FileMode::SOCKET)));
    }
}
