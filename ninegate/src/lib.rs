// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: 9P2000.L server core: sessions, fid tracking, dispatch, backends.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! NineGate 9P2000.L file server.
//!
//! A [`Server`] owns a filesystem backend (an [`Attacher`] producing [`File`]
//! handles) and serves any number of client connections over reliable byte
//! streams. Each connection runs one receive loop; every request other than
//! Tversion is handled on its own thread, so replies may be reordered freely
//! within the protocol's tag rules.
//!
//! Consistency across concurrently-dispatched requests rests on three pieces
//! of shared state, all internal: the per-connection fid table, a shared
//! path tree mirroring every name the connection has traversed (one
//! read/write operation lock per node), and a server-wide rename lock that
//! any naming-graph change (rename, remove) takes exclusively while ordinary
//! operations take it shared.
//!
//! Backends implement [`File`] (and optionally [`LegacyFile`] for classic
//! 9P2000 clients). Two are bundled: [`fsimpl::staticfs`] for read-only
//! in-memory trees and, on Unix, [`fsimpl::localfs`] for serving a host
//! directory.

pub mod errno;
pub(crate) mod fid;
pub mod file;
pub mod fsimpl;
pub(crate) mod handlers;
pub(crate) mod pathtree;
pub mod server;
pub(crate) mod session;
pub mod version;

pub use errno::{Errno, Result};
pub use file::{Attacher, File, LegacyAttacher, LegacyFile};
pub use server::{Server, Stream};
