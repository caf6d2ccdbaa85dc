/*
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The Directory Merger (spec §4.5).
//!
//! Produces a deduplicated, whiteout-aware union of directory contents
//! across layers, plus the synthetic root entries. The dedup set is
//! per-call (spec §9 "Linked list for listing dedup" redesign note: a
//! `HashSet` replaces the original's allocated linked list).

use std::collections::HashSet;

use crate::config::Config;
use crate::error::Result;
use crate::layer::HostKind;
use crate::vpath::compose;
use crate::vpath::VirtualPath;
use crate::whiteout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Other,
}

impl From<HostKind> for EntryKind {
    fn from(kind: HostKind) -> Self {
        match kind {
            HostKind::Dir => EntryKind::Dir,
            HostKind::File | HostKind::Symlink => EntryKind::File,
            HostKind::Other => EntryKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub kind: EntryKind,
}

fn dot_entries() -> Vec<ListEntry> {
    vec![
        ListEntry {
            name: ".".to_string(),
            kind: EntryKind::Dir,
        },
        ListEntry {
            name: "..".to_string(),
            kind: EntryKind::Dir,
        },
    ]
}

/// Union-list the children of directory `vpath`. Returns `None` if `vpath`
/// is not a directory in any layer and is not synthetic, so the caller can
/// report *not-found* (spec §4.6 `list` contract).
pub fn list(config: &Config, vpath: &VirtualPath) -> Result<Option<Vec<ListEntry>>> {
    if vpath.is_root() {
        let mut entries = dot_entries();
        entries.extend(merge_layers(config, vpath)?);
        if !entries.iter().any(|e| e.name == "dev") {
            entries.push(ListEntry {
                name: "dev".to_string(),
                kind: EntryKind::Dir,
            });
        }
        return Ok(Some(entries));
    }

    if vpath.as_str() == "/dev" {
        let mut entries = dot_entries();
        entries.push(ListEntry {
            name: "cpu".to_string(),
            kind: EntryKind::File,
        });
        return Ok(Some(entries));
    }

    let merged = merge_layers(config, vpath)?;
    if merged.is_empty() && !is_directory_anywhere(config, vpath)? {
        return Ok(None);
    }
    Ok(Some(merged))
}

fn is_directory_anywhere(config: &Config, vpath: &VirtualPath) -> Result<bool> {
    let session_path = compose(config.session_root(), vpath)?;
    if let Ok(meta) = std::fs::symlink_metadata(&session_path) {
        if meta.is_dir() {
            return Ok(true);
        }
    }
    for root in config.base_roots() {
        let base_path = compose(root, vpath)?;
        if let Ok(meta) = std::fs::symlink_metadata(&base_path) {
            if meta.is_dir() {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn merge_layers(config: &Config, vpath: &VirtualPath) -> Result<Vec<ListEntry>> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    let session_path = compose(config.session_root(), vpath)?;
    if let Ok(read_dir) = std::fs::read_dir(&session_path) {
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || whiteout::is_reserved_name(&name) {
                continue;
            }
            if seen.insert(name.clone()) {
                let kind = entry
                    .file_type()
                    .map(HostKind::from)
                    .unwrap_or(HostKind::Other);
                entries.push(ListEntry {
                    name,
                    kind: kind.into(),
                });
            }
        }
    }

    for root in config.base_roots() {
        let base_path = compose(root, vpath)?;
        let Ok(read_dir) = std::fs::read_dir(&base_path) else {
            continue;
        };
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if seen.contains(&name) {
                continue;
            }
            let child = vpath.join(&name);
            if whiteout::is_whited_out(config, &child)? {
                continue;
            }
            seen.insert(name.clone());
            let kind = entry
                .file_type()
                .map(HostKind::from)
                .unwrap_or(HostKind::Other);
            entries.push(ListEntry {
                name,
                kind: kind.into(),
            });
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn names(entries: &[ListEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn dedups_across_layers() {
        let session = tempdir().unwrap();
        let base = tempdir().unwrap();
        fs::write(base.path().join("a"), b"").unwrap();
        fs::write(base.path().join("b"), b"").unwrap();
        fs::write(session.path().join("a"), b"").unwrap();

        let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
        let root = VirtualPath::new("/").unwrap();
        let entries = list(&config, &root).unwrap().unwrap();
        let listed = names(&entries);
        assert_eq!(listed.iter().filter(|n| **n == "a").count(), 1);
        assert!(listed.contains(&"b"));
        assert!(listed.contains(&"dev"));
    }

    #[test]
    fn whiteout_hides_base_entry() {
        let session = tempdir().unwrap();
        let base = tempdir().unwrap();
        fs::write(base.path().join("secret"), b"").unwrap();

        let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
        let secret = VirtualPath::new("/secret").unwrap();
        whiteout::add_whiteout(&config, &secret).unwrap();

        let root = VirtualPath::new("/").unwrap();
        let entries = list(&config, &root).unwrap().unwrap();
        assert!(!names(&entries).contains(&"secret"));
    }

    #[test]
    fn marker_files_never_appear() {
        let session = tempdir().unwrap();
        let base = tempdir().unwrap();
        let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
        let secret = VirtualPath::new("/secret").unwrap();
        whiteout::add_whiteout(&config, &secret).unwrap();

        let root = VirtualPath::new("/").unwrap();
        let entries = list(&config, &root).unwrap().unwrap();
        assert!(!names(&entries).iter().any(|n| n.contains(".deleted")));
    }

    #[test]
    fn dev_lists_only_cpu() {
        let session = tempdir().unwrap();
        let base = tempdir().unwrap();
        let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
        let dev = VirtualPath::new("/dev").unwrap();
        let entries = list(&config, &dev).unwrap().unwrap();
        assert_eq!(names(&entries), vec![".", "..", "cpu"]);
    }

    #[test]
    fn non_directory_non_synthetic_path_is_none() {
        let session = tempdir().unwrap();
        let base = tempdir().unwrap();
        let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
        let vpath = VirtualPath::new("/nope").unwrap();
        assert!(list(&config, &vpath).unwrap().is_none());
    }
}
