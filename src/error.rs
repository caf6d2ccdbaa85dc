/*
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Error kinds surfaced by the overlay engine (see spec §7).
//!
//! The engine never distinguishes transient from permanent failures and
//! never retries; a failed host call becomes the operation's failure
//! verbatim. [`Error::classify_io`] turns a raw [`std::io::Error`] into one
//! of the named kinds so that a protocol-bridge adapter does not need to
//! re-derive errno mappings on its own.

use std::io;

use tracing::trace;
use tracing::warn;

use crate::vpath::VirtualPath;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(VirtualPath),

    #[error("permission denied: {0}")]
    PermissionDenied(VirtualPath),

    #[error("already exists: {0}")]
    AlreadyExists(VirtualPath),

    #[error("not a directory: {0}")]
    NotADirectory(VirtualPath),

    #[error("is a directory: {0}")]
    IsADirectory(VirtualPath),

    #[error("name too long: {0}")]
    NameTooLong(VirtualPath),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("io error on {path}: {source}")]
    Io {
        path: VirtualPath,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Turn a raw I/O failure for `path` into the most specific kind from
    /// §7 that `io::ErrorKind` lets us distinguish; anything else falls
    /// back to the generic *io-error* kind.
    ///
    /// *Not-found* is common (a plain lookup miss) and logged at `trace`;
    /// every other kind is logged at `warn`, matching the density
    /// `antlir2_overlayfs::scratch` uses for cleanup failures.
    pub fn classify_io(path: &VirtualPath, source: io::Error) -> Self {
        let err = Self::classify_io_kind(path, source);
        match &err {
            Error::NotFound(_) => trace!(%path, "not found"),
            other => warn!(%path, error = %other, "operation failed"),
        }
        err
    }

    fn classify_io_kind(path: &VirtualPath, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.clone()),
            io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.clone()),
            io::ErrorKind::AlreadyExists => Error::AlreadyExists(path.clone()),
            _ => {
                #[cfg(target_os = "linux")]
                if source.raw_os_error() == Some(libc::ENOTDIR) {
                    return Error::NotADirectory(path.clone());
                }
                #[cfg(target_os = "linux")]
                if source.raw_os_error() == Some(libc::EISDIR) {
                    return Error::IsADirectory(path.clone());
                }
                #[cfg(target_os = "linux")]
                if source.raw_os_error() == Some(libc::ENAMETOOLONG) {
                    return Error::NameTooLong(path.clone());
                }
                Error::Io {
                    path: path.clone(),
                    source,
                }
            }
        }
    }

    /// The errno a FUSE-style protocol bridge should report for this
    /// failure. Whiteout-shadowed paths and absent entries both classify
    /// as [`Error::NotFound`] and therefore both map to `ENOENT`, matching
    /// the "not-found, not permission-denied" rule in spec §7.
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::NotFound(_) => libc::ENOENT,
            Error::PermissionDenied(_) => libc::EACCES,
            Error::AlreadyExists(_) => libc::EEXIST,
            Error::NotADirectory(_) => libc::ENOTDIR,
            Error::IsADirectory(_) => libc::EISDIR,
            Error::NameTooLong(_) => libc::ENAMETOOLONG,
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::Unsupported(_) => libc::ENOSYS,
            Error::Io { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
