// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Connection acceptance, the request pump, and reply serialization.
// Author: Lukas Bower

//! The server and its per-connection machinery.
//!
//! One thread runs the receive loop per connection; every request except
//! Tversion is dispatched to its own handler thread. Tversion is handled
//! inline so the receive loop cannot race the session swap it performs.
//! Outgoing frames serialize through a per-connection send mutex, and a
//! reply whose session was retired in the meantime is silently dropped;
//! the client already discarded its tag.
//!
//! Transport-level problems (short frames, oversized frames, unknown type
//! codes, bodies shorter than their declared fields) are not reported
//! in-band: the connection is torn down and every remaining fid is clunked.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use log::{debug, info, warn};

use ninegate_codec::{Rmessage, Tag, Tmessage};
use ninegate_transport::BufferPool;

use crate::errno::Errno;
use crate::file::{Attacher, LegacyAttacher};
use crate::handlers;
use crate::pathtree::PathNode;
use crate::session::Session;

/// A reliable ordered byte stream a connection can run over.
///
/// `try_clone` hands the receive loop its own handle while the send side
/// lives behind the connection's send mutex.
pub trait Stream: Read + Write + Send {
    /// Duplicate the stream handle.
    fn try_clone(&self) -> io::Result<Box<dyn Stream>>;
}

impl Stream for TcpStream {
    fn try_clone(&self) -> io::Result<Box<dyn Stream>> {
        Ok(Box::new(TcpStream::try_clone(self)?))
    }
}

#[cfg(unix)]
impl Stream for UnixStream {
    fn try_clone(&self) -> io::Result<Box<dyn Stream>> {
        Ok(Box::new(UnixStream::try_clone(self)?))
    }
}

struct Inner {
    attacher: Option<Box<dyn Attacher>>,
    legacy_attacher: Option<Box<dyn LegacyAttacher>>,
    /// The global rename lock. Exclusive for rename/remove, shared for
    /// everything else that touches a node lock.
    rename_mu: Arc<RwLock<()>>,
    /// Root of the shared path tree.
    path_tree: Arc<PathNode>,
}

/// A 9P server bound to one backend.
///
/// Cheap to clone; all clones share the backend, the rename lock and the
/// path tree.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Create a server for a 9P2000.L backend.
    pub fn new(attacher: impl Attacher + 'static) -> Server {
        Server {
            inner: Arc::new(Inner {
                attacher: Some(Box::new(attacher)),
                legacy_attacher: None,
                rename_mu: Arc::new(RwLock::new(())),
                path_tree: PathNode::new(),
            }),
        }
    }

    /// Create a server that also accepts classic 9P2000 sessions.
    pub fn with_legacy_attacher(
        attacher: impl Attacher + 'static,
        legacy: impl LegacyAttacher + 'static,
    ) -> Server {
        Server {
            inner: Arc::new(Inner {
                attacher: Some(Box::new(attacher)),
                legacy_attacher: Some(Box::new(legacy)),
                rename_mu: Arc::new(RwLock::new(())),
                path_tree: PathNode::new(),
            }),
        }
    }

    pub(crate) fn attacher(&self) -> Option<&dyn Attacher> {
        self.inner.attacher.as_deref()
    }

    pub(crate) fn legacy_attacher(&self) -> Option<&dyn LegacyAttacher> {
        self.inner.legacy_attacher.as_deref()
    }

    pub(crate) fn rename_mu(&self) -> Arc<RwLock<()>> {
        self.inner.rename_mu.clone()
    }

    pub(crate) fn path_tree(&self) -> Arc<PathNode> {
        self.inner.path_tree.clone()
    }

    /// Accept TCP connections forever, one connection handler thread each.
    pub fn serve(&self, listener: TcpListener) -> io::Result<()> {
        info!("serving 9P on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => {
                    tcp.set_nodelay(true).ok();
                    let server = self.clone();
                    thread::spawn(move || {
                        if let Err(err) = server.handle(Box::new(tcp)) {
                            debug!("connection ended: {err}");
                        }
                    });
                }
                Err(err) => warn!("accept failed: {err}"),
            }
        }
        Ok(())
    }

    /// Accept Unix-socket connections forever.
    #[cfg(unix)]
    pub fn serve_unix(&self, listener: UnixListener) -> io::Result<()> {
        info!("serving 9P on unix socket");
        for stream in listener.incoming() {
            match stream {
                Ok(sock) => {
                    let server = self.clone();
                    thread::spawn(move || {
                        if let Err(err) = server.handle(Box::new(sock)) {
                            debug!("connection ended: {err}");
                        }
                    });
                }
                Err(err) => warn!("accept failed: {err}"),
            }
        }
        Ok(())
    }

    /// Run the request pump for one connection until the stream fails or
    /// closes. Remaining fids are clunked on the way out.
    pub fn handle(&self, stream: Box<dyn Stream>) -> io::Result<()> {
        let mut reader = stream.try_clone()?;
        let conn = Arc::new(ConnState {
            server: self.clone(),
            session: RwLock::new(Session::bootstrap()),
            writer: Mutex::new(stream),
            pool: BufferPool::new(),
        });

        let result = loop {
            let session = conn.current_session();
            let (tag, msg): (Tag, Tmessage) = match ninegate_transport::recv(
                reader.as_mut(),
                session.message_size,
                session.dialect(),
                &conn.pool,
            ) {
                Ok(v) => v,
                Err(err) => break err,
            };

            if let Tmessage::Version { msize, version } = msg {
                // Handled inline: the reset this performs must complete
                // before the next request is received.
                let reply = handlers::handle_version(&conn, msize, &version);
                conn.send_now(tag, &reply);
                continue;
            }

            if !session.register_tag(tag) {
                // A live tag cannot be reused; answer without spawning.
                let reply = session.new_err(Errno::EINVAL);
                conn.send_reply(&session, tag, &reply);
                continue;
            }

            let conn = conn.clone();
            let session = session.clone();
            thread::spawn(move || {
                let reply = handlers::handle_message(&conn, &session, msg);
                conn.send_reply(&session, tag, &reply);
                session.clear_tag(tag);
            });
        };

        debug!("request pump stopped: {result}");
        conn.current_session().stop();
        Ok(())
    }
}

/// Per-connection state shared between the receive loop and handlers.
pub(crate) struct ConnState {
    pub(crate) server: Server,
    session: RwLock<Arc<Session>>,
    writer: Mutex<Box<dyn Stream>>,
    pub(crate) pool: BufferPool,
}

impl ConnState {
    /// The session requests are currently dispatched against.
    pub(crate) fn current_session(&self) -> Arc<Session> {
        self.session.read().unwrap().clone()
    }

    /// Install a fresh session, returning the retired one.
    pub(crate) fn install_session(&self, new: Arc<Session>) -> Arc<Session> {
        let mut slot = self.session.write().unwrap();
        std::mem::replace(&mut *slot, new)
    }

    /// Send a reply for a request dispatched against `session`, unless that
    /// session has been retired in the meantime.
    pub(crate) fn send_reply(&self, session: &Session, tag: Tag, reply: &Rmessage) {
        if session.is_stale() {
            debug!("dropping reply for stale session [tag {tag:#06x}]");
            return;
        }
        self.send_now(tag, reply);
    }

    /// Send a frame unconditionally (version replies, pre-session errors).
    pub(crate) fn send_now(&self, tag: Tag, reply: &Rmessage) {
        let mut writer = self.writer.lock().unwrap();
        if let Err(err) = ninegate_transport::send(writer.as_mut(), tag, reply) {
            // The receive loop will observe the dead stream shortly; there
            // is nobody else to tell.
            debug!("send failed [tag {tag:#06x}]: {err}");
        }
    }
}
