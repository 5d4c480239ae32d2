// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Allocate unique QID paths for synthetic backends.
// Author: Lukas Bower

//! QID path allocation.
//!
//! QID paths must be unique per attacher, and a file deleted and recreated
//! under the same name must get a fresh path. [`PathGenerator`] hands out
//! monotonically increasing paths; [`PathMapper`] translates a foreign
//! `(device, inode)` namespace into generated paths, stably per mapper.
//! Callers must [`PathMapper::forget`] a key when its backing file is gone,
//! or a recycled inode would resurrect the dead file's identity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ninegate_codec::{Qid, QidType};

/// Monotonic QID path allocator.
#[derive(Debug, Default)]
pub struct PathGenerator {
    next: AtomicU64,
}

impl PathGenerator {
    /// Create a generator starting at path 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh path.
    pub fn new_path(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Allocate a whole QID of the given type.
    pub fn new_qid(&self, typ: QidType) -> Qid {
        Qid {
            typ,
            version: 0,
            path: self.new_path(),
        }
    }
}

/// A foreign file identity: `(device, inode)`.
///
/// Inode numbers alone collide across devices, so both halves key the map.
pub type DevIno = (u64, u64);

/// Stable translation from a foreign `(device, inode)` namespace into
/// generated paths.
#[derive(Debug, Default)]
pub struct PathMapper {
    generator: PathGenerator,
    paths: Mutex<HashMap<DevIno, u64>>,
}

impl PathMapper {
    /// Create an empty mapper with its own generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The generated path for `key`, allocated on first use.
    pub fn path_for(&self, key: DevIno) -> u64 {
        let mut paths = self.paths.lock().unwrap();
        if let Some(path) = paths.get(&key) {
            return *path;
        }
        let path = self.generator.new_path();
        paths.insert(key, path);
        path
    }

    /// Drop the mapping for `key`, so a recreated file (or a recycled
    /// inode) gets a fresh path.
    pub fn forget(&self, key: DevIno) {
        self.paths.lock().unwrap().remove(&key);
    }
}
