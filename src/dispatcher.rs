/*
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The Operation Dispatcher (spec §4.6): one entry point per filesystem
//! verb, orchestrating the Layer Probe, Whiteout Registry, Copy-Up
//! Engine, Directory Merger, and Virtual Node Provider into a single
//! response.
//!
//! The dispatcher itself is stateless per call: it owns no caches, no
//! write buffers, no in-flight tables (spec §5). Concurrency correctness
//! reduces entirely to the atomicity the host filesystem gives the
//! underlying calls.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt as _;
use std::os::unix::fs::PermissionsExt as _;
use std::time::SystemTime;

use crate::config::Config;
use crate::copyup;
use crate::error::Error;
use crate::error::Result;
use crate::layer;
use crate::layer::Layer;
use crate::merge::ListEntry;
use crate::merge::{self};
use crate::vpath::compose;
use crate::vpath::VirtualPath;
use crate::virt;
use crate::virt::SyntheticNode;
use crate::whiteout;

/// The result of `stat`: either a real host `Metadata` or a fabricated
/// description of a synthetic node.
#[derive(Debug)]
pub enum Attr {
    Real(Metadata),
    Synthetic { is_dir: bool, mode: u32, size: u64 },
}

/// A synthetic statvfs-equivalent volume description (spec §4.6
/// `statfs`): it does not reflect real capacity.
#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub block_size: u64,
    pub blocks_total: u64,
    pub blocks_free: u64,
    pub name_max: u32,
}

pub const STATFS: StatFs = StatFs {
    block_size: 4096,
    blocks_total: 1024 * 1024,
    blocks_free: 1024 * 512,
    name_max: 255,
};

pub struct Dispatcher<'a> {
    config: &'a Config,
}

impl<'a> Dispatcher<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    #[tracing::instrument(skip(self), ret, err)]
    pub fn stat(&self, vpath: &VirtualPath) -> Result<Attr> {
        match virt::classify(vpath) {
            Some(SyntheticNode::Root) => Ok(Attr::Synthetic {
                is_dir: true,
                mode: virt::ROOT_MODE,
                size: 0,
            }),
            Some(SyntheticNode::Dev) => Ok(Attr::Synthetic {
                is_dir: true,
                mode: virt::DEV_MODE,
                size: 0,
            }),
            Some(SyntheticNode::Cpu) => Ok(Attr::Synthetic {
                is_dir: false,
                mode: virt::CPU_MODE,
                size: virt::render_cpu_node().len() as u64,
            }),
            None => {
                let entry = layer::resolve(self.config, vpath)?.into_entry(vpath)?;
                let meta = std::fs::symlink_metadata(&entry.host_path)
                    .map_err(|e| Error::classify_io(vpath, e))?;
                Ok(Attr::Real(meta))
            }
        }
    }

    #[tracing::instrument(skip(self), ret, err)]
    pub fn list(&self, vpath: &VirtualPath) -> Result<Vec<ListEntry>> {
        merge::list(self.config, vpath)?.ok_or_else(|| Error::NotFound(vpath.clone()))
    }

    /// Resolve the effective entry for `open` and probe it with the
    /// requested access mode. Synthetic `/dev/cpu` opens without state
    /// (`Ok(None)`). The source closes its handle immediately after
    /// opening (spec §4.6): we only need to verify the entry is openable
    /// under `flags` and return which layer it lives in, since the
    /// Dispatcher is stateless between calls.
    #[tracing::instrument(skip(self), ret, err)]
    pub fn open(&self, vpath: &VirtualPath, flags: i32) -> Result<Option<Layer>> {
        if virt::classify(vpath) == Some(SyntheticNode::Cpu) {
            return Ok(None);
        }
        let resolution = layer::resolve(self.config, vpath)?;
        let entry = resolution.into_entry(vpath)?;

        use std::os::unix::fs::OpenOptionsExt as _;
        let mut options = std::fs::OpenOptions::new();
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => {
                options.write(true);
            }
            libc::O_RDWR => {
                options.read(true).write(true);
            }
            _ => {
                options.read(true);
            }
        }
        options.custom_flags(flags & !libc::O_ACCMODE);

        let file = options
            .open(&entry.host_path)
            .map_err(|e| Error::classify_io(vpath, e))?;
        drop(file);
        Ok(Some(entry.layer))
    }

    #[tracing::instrument(skip(self), err)]
    pub fn read(&self, vpath: &VirtualPath, offset: u64, size: u32) -> Result<Vec<u8>> {
        if virt::classify(vpath) == Some(SyntheticNode::Cpu) {
            let content = virt::render_cpu_node();
            return Ok(virt::read_clipped(&content, offset, size).to_vec());
        }

        let entry = layer::resolve(self.config, vpath)?.into_entry(vpath)?;
        use std::os::unix::fs::FileExt;
        let file = std::fs::File::open(&entry.host_path).map_err(|e| Error::classify_io(vpath, e))?;
        let mut buf = vec![0u8; size as usize];
        let n = file
            .read_at(&mut buf, offset)
            .map_err(|e| Error::classify_io(vpath, e))?;
        buf.truncate(n);
        Ok(buf)
    }

    #[tracing::instrument(skip(self, buf), ret, err)]
    pub fn write(&self, vpath: &VirtualPath, offset: u64, buf: &[u8]) -> Result<usize> {
        let target = copyup::ensure_session_entry(self.config, vpath)?;
        use std::os::unix::fs::FileExt;
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&target)
            .map_err(|e| Error::classify_io(vpath, e))?;
        file.write_at(buf, offset)
            .map_err(|e| Error::classify_io(vpath, e))
    }

    #[tracing::instrument(skip(self), err)]
    pub fn truncate(&self, vpath: &VirtualPath, size: u64) -> Result<()> {
        let target = copyup::ensure_session_entry(self.config, vpath)?;
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&target)
            .map_err(|e| Error::classify_io(vpath, e))?;
        file.set_len(size).map_err(|e| Error::classify_io(vpath, e))
    }

    #[tracing::instrument(skip(self), err)]
    pub fn create(&self, vpath: &VirtualPath, mode: u32) -> Result<()> {
        copyup::ensure_immediate_parent(self.config, vpath)?;
        let target = compose(self.config.session_root(), vpath)?;
        use std::os::unix::fs::OpenOptionsExt;
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(target)
            .map(|_| ())
            .map_err(|e| Error::classify_io(vpath, e))
    }

    #[tracing::instrument(skip(self), err)]
    pub fn mkdir(&self, vpath: &VirtualPath, mode: u32) -> Result<()> {
        let target = compose(self.config.session_root(), vpath)?;
        std::fs::create_dir(&target).map_err(|e| Error::classify_io(vpath, e))?;
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))
            .map_err(|e| Error::classify_io(vpath, e))
    }

    /// Removes the directory from the session layer only. No whiteout is
    /// ever created for directories (spec §9 open question).
    #[tracing::instrument(skip(self), err)]
    pub fn rmdir(&self, vpath: &VirtualPath) -> Result<()> {
        let target = compose(self.config.session_root(), vpath)?;
        std::fs::remove_dir(target).map_err(|e| Error::classify_io(vpath, e))
    }

    #[tracing::instrument(skip(self), err)]
    pub fn unlink(&self, vpath: &VirtualPath) -> Result<()> {
        let session_path = compose(self.config.session_root(), vpath)?;
        if std::fs::symlink_metadata(&session_path).is_ok() {
            return std::fs::remove_file(session_path).map_err(|e| Error::classify_io(vpath, e));
        }
        if layer::resolve_base_only(self.config, vpath)?.is_some() {
            return whiteout::add_whiteout(self.config, vpath);
        }
        Err(Error::NotFound(vpath.clone()))
    }

    /// Preserves the original's escape hatch verbatim: if no session
    /// entry exists, chmod is applied directly to the base-layer file
    /// (spec §9 open question "chmod on base entries", decision recorded
    /// in DESIGN.md).
    #[tracing::instrument(skip(self), err)]
    pub fn chmod(&self, vpath: &VirtualPath, mode: u32) -> Result<()> {
        let session_path = compose(self.config.session_root(), vpath)?;
        if std::fs::symlink_metadata(&session_path).is_ok() {
            return std::fs::set_permissions(session_path, std::fs::Permissions::from_mode(mode))
                .map_err(|e| Error::classify_io(vpath, e));
        }
        if let Some(entry) = layer::resolve_base_only(self.config, vpath)? {
            return std::fs::set_permissions(
                &entry.host_path,
                std::fs::Permissions::from_mode(mode),
            )
            .map_err(|e| Error::classify_io(vpath, e));
        }
        Err(Error::NotFound(vpath.clone()))
    }

    /// Always applied to the session-side path without copy-up or
    /// fallback (spec §9 open question "utimens semantics"): fails
    /// *not-found* if no session entry exists.
    #[tracing::instrument(skip(self), err)]
    pub fn utimens(
        &self,
        vpath: &VirtualPath,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<()> {
        let session_path = compose(self.config.session_root(), vpath)?;
        if std::fs::symlink_metadata(&session_path).is_err() {
            return Err(Error::NotFound(vpath.clone()));
        }
        if let Some(atime) = atime {
            filetime_set(&session_path, atime, true).map_err(|e| Error::classify_io(vpath, e))?;
        }
        if let Some(mtime) = mtime {
            filetime_set(&session_path, mtime, false).map_err(|e| Error::classify_io(vpath, e))?;
        }
        Ok(())
    }

    /// Always succeeds: authorisation is delegated to the underlying
    /// layer operations (spec §4.6 `access`).
    #[tracing::instrument(skip(self), ret, err)]
    pub fn access(&self, _vpath: &VirtualPath, _mask: i32) -> Result<()> {
        Ok(())
    }

    #[tracing::instrument(skip(self), ret, err)]
    pub fn statfs(&self, _vpath: &VirtualPath) -> Result<StatFs> {
        Ok(STATFS)
    }
}

/// Set one of atime/mtime on `path` via `utimensat`, leaving the other
/// untouched (`UTIME_OMIT`).
fn filetime_set(path: &std::path::Path, time: SystemTime, is_atime: bool) -> std::io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let dur = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let ts = libc::timespec {
        tv_sec: dur.as_secs() as libc::time_t,
        tv_nsec: dur.subsec_nanos() as i64,
    };
    let omit = libc::timespec {
        tv_sec: 0,
        tv_nsec: libc::UTIME_OMIT,
    };
    let times = if is_atime { [ts, omit] } else { [omit, ts] };

    // SAFETY: c_path is a valid NUL-terminated C string for the duration
    // of the call, and `times` is a valid array of two timespecs.
    let rc = unsafe {
        libc::utimensat(
            libc::AT_FDCWD,
            c_path.as_ptr(),
            times.as_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Convenience for the protocol-bridge adapter: does `meta` describe a
/// directory?
pub fn metadata_is_dir(meta: &Metadata) -> bool {
    meta.is_dir()
}

/// Convenience for the protocol-bridge adapter: the host file mode bits.
pub fn metadata_mode(meta: &Metadata) -> u32 {
    meta.permissions().mode()
}

/// Convenience for the protocol-bridge adapter: host file size.
pub fn metadata_size(meta: &Metadata) -> u64 {
    meta.size()
}
