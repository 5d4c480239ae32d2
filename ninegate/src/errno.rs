// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Linux errno values carried through handler and backend results.
// Author: Lukas Bower

//! Linux error numbers.
//!
//! Backends and handlers report failures as an [`Errno`]; the dispatcher puts
//! the raw number into an Rlerror for 9P2000.L clients, or its name into an
//! Rerror for classic ones. [`Errno::from_io_error`] is the best-effort
//! extractor for errors coming out of the standard library and `nix`: a real
//! OS errno passes through untouched, a recognizable `ErrorKind` is mapped,
//! and anything else becomes `EIO`.

use std::fmt;
use std::io;

/// A Linux errno value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub u32);

/// Result alias used across the server and the backend contract.
pub type Result<T> = std::result::Result<T, Errno>;

macro_rules! errno_consts {
    ($(($name:ident, $value:expr, $text:expr),)*) => {
        impl Errno {
            $(
                #[doc = $text]
                pub const $name: Errno = Errno($value);
            )*

            /// The symbolic name, or `None` for values without one here.
            #[must_use]
            pub fn name(self) -> Option<&'static str> {
                match self {
                    $(Errno::$name => Some(stringify!($name)),)*
                    _ => None,
                }
            }

            /// Human-readable description.
            #[must_use]
            pub fn description(self) -> Option<&'static str> {
                match self {
                    $(Errno::$name => Some($text),)*
                    _ => None,
                }
            }
        }
    };
}

errno_consts! {
    (EPERM, 1, "operation not permitted"),
    (ENOENT, 2, "no such file or directory"),
    (EINTR, 4, "interrupted system call"),
    (EIO, 5, "input/output error"),
    (EBADF, 9, "bad file descriptor"),
    (EAGAIN, 11, "resource temporarily unavailable"),
    (ENOMEM, 12, "cannot allocate memory"),
    (EACCES, 13, "permission denied"),
    (EBUSY, 16, "device or resource busy"),
    (EEXIST, 17, "file exists"),
    (EXDEV, 18, "invalid cross-device link"),
    (ENODEV, 19, "no such device"),
    (ENOTDIR, 20, "not a directory"),
    (EISDIR, 21, "is a directory"),
    (EINVAL, 22, "invalid argument"),
    (ENFILE, 23, "too many open files in system"),
    (EMFILE, 24, "too many open files"),
    (EFBIG, 27, "file too large"),
    (ENOSPC, 28, "no space left on device"),
    (ESPIPE, 29, "illegal seek"),
    (EROFS, 30, "read-only file system"),
    (EMLINK, 31, "too many links"),
    (EPIPE, 32, "broken pipe"),
    (ERANGE, 34, "result out of range"),
    (ENAMETOOLONG, 36, "file name too long"),
    (ENOSYS, 38, "function not implemented"),
    (ENOTEMPTY, 39, "directory not empty"),
    (ELOOP, 40, "too many levels of symbolic links"),
    (ENODATA, 61, "no data available"),
    (EOVERFLOW, 75, "value too large for defined data type"),
    (EBADMSG, 74, "bad message"),
    (EOPNOTSUPP, 95, "operation not supported"),
    (ENOBUFS, 105, "no buffer space available"),
    (ENOTCONN, 107, "transport endpoint is not connected"),
    (ETIMEDOUT, 110, "connection timed out"),
    (ESTALE, 116, "stale file handle"),
}

impl Errno {
    /// Best-effort extraction of an errno from an I/O error.
    ///
    /// Unknown errors map to `EIO`, mirroring what a kernel client would see
    /// for an unclassifiable server-side failure.
    #[must_use]
    pub fn from_io_error(err: &io::Error) -> Errno {
        if let Some(raw) = err.raw_os_error() {
            if raw > 0 {
                return Errno(raw as u32);
            }
        }
        match err.kind() {
            io::ErrorKind::NotFound => Errno::ENOENT,
            io::ErrorKind::PermissionDenied => Errno::EACCES,
            io::ErrorKind::AlreadyExists => Errno::EEXIST,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => Errno::EINVAL,
            io::ErrorKind::TimedOut => Errno::ETIMEDOUT,
            io::ErrorKind::WriteZero => Errno::EIO,
            io::ErrorKind::Interrupted => Errno::EINTR,
            io::ErrorKind::Unsupported => Errno::EOPNOTSUPP,
            io::ErrorKind::OutOfMemory => Errno::ENOMEM,
            io::ErrorKind::BrokenPipe => Errno::EPIPE,
            _ => Errno::EIO,
        }
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "Errno({})", self.0),
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(text) => write!(f, "{text}"),
            None => write!(f, "errno {}", self.0),
        }
    }
}

impl std::error::Error for Errno {}

impl From<io::Error> for Errno {
    fn from(err: io::Error) -> Self {
        Errno::from_io_error(&err)
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for Errno {
    fn from(err: nix::errno::Errno) -> Self {
        Errno(err as i32 as u32)
    }
}
