// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Per-connection session state: fid table, tag table, negotiation.
// Author: Lukas Bower

//! Per-connection session state.
//!
//! A [`Session`] is immutable in its negotiated parameters and interior
//! mutable in its tables. Tversion does not mutate a session: it builds a
//! fresh one and retires the old, so in-flight handlers keep a consistent
//! view of the world they started in. A retired session is *stale*; replies
//! produced against it are dropped, since the client has already discarded
//! their tags.
//!
//! The tag table doubles as the flush mechanism: every live tag owns a
//! completion signal, and a Tflush handler simply waits on the signal of the
//! tag it names.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use ninegate_codec::{Dialect, Fid, Rmessage, Tag, MAXIMUM_LENGTH};

use crate::errno::Errno;
use crate::fid::{FidGuard, FidRef};
use crate::version::BaseVersion;

/// Completion signal for one live tag.
struct TagSignal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl TagSignal {
    fn new() -> Arc<TagSignal> {
        Arc::new(TagSignal {
            done: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    fn complete(&self) {
        let mut done = self.done.lock().unwrap();
        *done = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.cond.wait(done).unwrap();
        }
    }
}

/// State for one negotiated protocol epoch on one connection.
pub(crate) struct Session {
    /// Negotiated protocol family.
    pub(crate) base_version: BaseVersion,
    /// Negotiated extension number within the family.
    pub(crate) version: u32,
    /// Negotiated maximum message size, header included.
    pub(crate) message_size: u32,
    fids: Mutex<HashMap<Fid, Arc<FidRef>>>,
    tags: Mutex<HashMap<Tag, Arc<TagSignal>>>,
    stale: AtomicBool,
}

impl Session {
    pub(crate) fn new(base_version: BaseVersion, version: u32, message_size: u32) -> Arc<Session> {
        Arc::new(Session {
            base_version,
            version,
            message_size,
            fids: Mutex::new(HashMap::new()),
            tags: Mutex::new(HashMap::new()),
            stale: AtomicBool::new(false),
        })
    }

    /// The session a connection starts in, before any Tversion: full-size
    /// frames, Linux dialect, no usable fids.
    pub(crate) fn bootstrap() -> Arc<Session> {
        Session::new(BaseVersion::P2000L, 0, MAXIMUM_LENGTH)
    }

    /// The message-set dialect of this session.
    pub(crate) fn dialect(&self) -> Dialect {
        self.base_version.dialect().unwrap_or(Dialect::P2000L)
    }

    /// Build the error reply appropriate for this session's dialect.
    pub(crate) fn new_err(&self, errno: Errno) -> Rmessage {
        match self.base_version {
            BaseVersion::P2000 => Rmessage::Error {
                msg: errno.to_string(),
            },
            _ => Rmessage::Lerror { errno: errno.0 },
        }
    }

    /// True once this session has been retired by a later Tversion or by
    /// connection teardown.
    pub(crate) fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Bind `fid` to `fid_ref`, taking a table reference. A previous binding
    /// of the same fid is released; create-style handlers rely on that
    /// replacement semantic.
    pub(crate) fn insert_fid(&self, fid: Fid, fid_ref: &Arc<FidRef>) {
        fid_ref.inc_ref();
        let old = self.fids.lock().unwrap().insert(fid, fid_ref.clone());
        if let Some(old) = old {
            old.dec_ref();
        }
    }

    /// Look up `fid`, taking a temporary reference released by the guard.
    pub(crate) fn lookup_fid(&self, fid: Fid) -> Option<FidGuard> {
        let fids = self.fids.lock().unwrap();
        let fid_ref = fids.get(&fid)?;
        fid_ref.inc_ref();
        Some(FidGuard::from_counted(fid_ref.clone()))
    }

    /// Unbind `fid`, releasing the table reference.
    pub(crate) fn delete_fid(&self, fid: Fid) -> bool {
        let removed = self.fids.lock().unwrap().remove(&fid);
        match removed {
            Some(fid_ref) => {
                fid_ref.dec_ref();
                true
            }
            None => false,
        }
    }

    /// Register a tag as live. `false` means the tag is already live and the
    /// request carrying it is a protocol error.
    pub(crate) fn register_tag(&self, tag: Tag) -> bool {
        let mut tags = self.tags.lock().unwrap();
        if tags.contains_key(&tag) {
            return false;
        }
        tags.insert(tag, TagSignal::new());
        true
    }

    /// Block until `tag` is no longer live. Returns immediately for a tag
    /// that is unknown or already completed.
    pub(crate) fn wait_tag(&self, tag: Tag) {
        let signal = self.tags.lock().unwrap().get(&tag).cloned();
        if let Some(signal) = signal {
            signal.wait();
        }
    }

    /// Retire a tag, waking any flush waiting on it.
    pub(crate) fn clear_tag(&self, tag: Tag) {
        let signal = self.tags.lock().unwrap().remove(&tag);
        if let Some(signal) = signal {
            signal.complete();
        }
    }

    /// Retire the whole session: clunk every fid, complete every tag, and
    /// mark it stale so pending replies get dropped.
    pub(crate) fn stop(&self) {
        self.stale.store(true, Ordering::Release);
        let fids: Vec<Arc<FidRef>> = {
            let mut map = self.fids.lock().unwrap();
            map.drain().map(|(_, fid_ref)| fid_ref).collect()
        };
        for fid_ref in fids {
            fid_ref.dec_ref();
        }
        let tags: Vec<Arc<TagSignal>> = {
            let mut map = self.tags.lock().unwrap();
            map.drain().map(|(_, signal)| signal).collect()
        };
        for signal in tags {
            signal.complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn duplicate_tags_are_rejected() {
        let s = Session::bootstrap();
        assert!(s.register_tag(7));
        assert!(!s.register_tag(7));
        s.clear_tag(7);
        assert!(s.register_tag(7));
    }

    #[test]
    fn wait_tag_returns_for_unknown_tags() {
        let s = Session::bootstrap();
        s.wait_tag(1234);
    }

    #[test]
    fn wait_tag_blocks_until_cleared() {
        let s = Session::bootstrap();
        assert!(s.register_tag(3));
        let s2 = s.clone();
        let waiter = thread::spawn(move || {
            s2.wait_tag(3);
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        s.clear_tag(3);
        waiter.join().expect("join");
    }

    #[test]
    fn stop_wakes_waiters_and_marks_stale() {
        let s = Session::bootstrap();
        assert!(s.register_tag(9));
        let s2 = s.clone();
        let waiter = thread::spawn(move || s2.wait_tag(9));
        thread::sleep(Duration::from_millis(10));
        s.stop();
        waiter.join().expect("join");
        assert!(s.is_stale());
    }

    #[test]
    fn classic_errors_are_strings() {
        let s = Session::new(BaseVersion::P2000, 0, MAXIMUM_LENGTH);
        match s.new_err(Errno::ENOENT) {
            Rmessage::Error { msg } => assert_eq!(msg, "no such file or directory"),
            other => panic!("unexpected reply {other:?}"),
        }
        let s = Session::bootstrap();
        match s.new_err(Errno::ENOENT) {
            Rmessage::Lerror { errno } => assert_eq!(errno, 2),
            other => panic!("unexpected reply {other:?}"),
        }
    }
}
