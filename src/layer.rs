/*
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Layer, BackingEntry, and the Layer Probe (spec §3, §4.2).

use std::fs::FileType;
use std::fs::Metadata;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::Result;
use crate::vpath::compose;
use crate::vpath::VirtualPath;
use crate::whiteout;

/// Which layer a [`BackingEntry`] came from. Base order is fixed at mount
/// time (spec §3) and is never reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Session,
    Base(usize),
}

/// The host-side kind of a resolved entry, enough to distinguish files
/// from directories without re-statting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    File,
    Dir,
    Symlink,
    Other,
}

impl From<FileType> for HostKind {
    fn from(ft: FileType) -> Self {
        if ft.is_dir() {
            HostKind::Dir
        } else if ft.is_symlink() {
            HostKind::Symlink
        } else if ft.is_file() {
            HostKind::File
        } else {
            HostKind::Other
        }
    }
}

/// The tuple (LayerRoot, host-relative path, host file kind) produced by
/// the Layer Probe for a VirtualPath when an effective entry exists.
#[derive(Debug, Clone)]
pub struct BackingEntry {
    pub layer: Layer,
    pub host_path: PathBuf,
    pub kind: HostKind,
}

/// Outcome of resolving a VirtualPath through the layer stack.
#[derive(Debug)]
pub enum Resolution {
    Found(BackingEntry),
    WhitedOut,
    NotFound,
}

impl Resolution {
    pub fn into_entry(self, vpath: &VirtualPath) -> Result<BackingEntry> {
        match self {
            Resolution::Found(entry) => Ok(entry),
            Resolution::WhitedOut | Resolution::NotFound => {
                Err(crate::error::Error::NotFound(vpath.clone()))
            }
        }
    }
}

fn stat(host_path: &std::path::Path) -> Option<Metadata> {
    // lstat-equivalent: never follow the final symlink (spec §4.2).
    std::fs::symlink_metadata(host_path).ok()
}

/// Resolve a VirtualPath to the effective BackingEntry: session layer
/// first, then each base layer in configured order (spec invariant 1).
/// A whiteout marker shadows base entries unless the session itself also
/// has an entry at the same path, in which case the marker is stale and
/// ignored (spec invariant 2).
pub fn resolve(config: &Config, vpath: &VirtualPath) -> Result<Resolution> {
    let session_path = compose(config.session_root(), vpath)?;
    if let Some(meta) = stat(&session_path) {
        return Ok(Resolution::Found(BackingEntry {
            layer: Layer::Session,
            host_path: session_path,
            kind: meta.file_type().into(),
        }));
    }
    if whiteout::is_whited_out(config, vpath)? {
        return Ok(Resolution::WhitedOut);
    }

    for (index, root) in config.base_roots().iter().enumerate() {
        let base_path = compose(root, vpath)?;
        if let Some(meta) = stat(&base_path) {
            return Ok(Resolution::Found(BackingEntry {
                layer: Layer::Base(index),
                host_path: base_path,
                kind: meta.file_type().into(),
            }));
        }
    }

    Ok(Resolution::NotFound)
}

/// Resolve a VirtualPath against the base layers only, in order, ignoring
/// the session layer and whiteouts entirely. Used by the Copy-Up Engine to
/// locate the source of a materialisation, and by `unlink`/`chmod` to find
/// a base-only fallback target.
pub fn resolve_base_only(config: &Config, vpath: &VirtualPath) -> Result<Option<BackingEntry>> {
    for (index, root) in config.base_roots().iter().enumerate() {
        let base_path = compose(root, vpath)?;
        if let Some(meta) = stat(&base_path) {
            return Ok(Some(BackingEntry {
                layer: Layer::Base(index),
                host_path: base_path,
                kind: meta.file_type().into(),
            }));
        }
    }
    Ok(None)
}
