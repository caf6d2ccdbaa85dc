/*
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The Whiteout Registry (spec §4.3).
//!
//! A whiteout marker for a VirtualPath `V` is the session-side file at
//! `session_compose(V) + ".deleted"` -- i.e. the marker path is derived by
//! suffixing the full session-side composition of `V`, exactly as
//! `prismafs.c`'s `session_fullpath(path) + ".deleted"` does, not by a
//! separately composed `parent/name.deleted` pair. The two are equal for
//! any `V` (since `compose(parent) / name == compose(V)`), but deriving it
//! this way keeps one code path instead of two.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::Error;
use crate::error::Result;
use crate::vpath::compose;
use crate::vpath::VirtualPath;

/// The reserved marker suffix (spec §6): filenames containing it as a
/// substring are reserved in the virtual namespace.
pub const WHITEOUT_SUFFIX: &str = ".deleted";

/// Whether `name` is reserved for whiteout bookkeeping. This is a
/// substring match, not a suffix match: the original implementation's
/// `strstr(name, ".deleted")` filters any name *containing* `.deleted`,
/// and this implementation preserves that exact behaviour for
/// compatibility with existing session layers (spec §9 "Duplicate
/// filtering").
pub fn is_reserved_name(name: &str) -> bool {
    name.contains(WHITEOUT_SUFFIX)
}

/// Compose the marker path for `vpath` without checking whether it
/// exists.
pub fn marker_path(config: &Config, vpath: &VirtualPath) -> Result<PathBuf> {
    let session_path = compose(config.session_root(), vpath)?;
    let mut bytes = session_path.as_os_str().as_bytes().to_vec();
    bytes.extend_from_slice(WHITEOUT_SUFFIX.as_bytes());
    Ok(PathBuf::from(OsString::from_vec(bytes)))
}

/// Is `vpath` whited out? Decomposes into parent/name only conceptually;
/// in practice this is one lstat against the marker path.
pub fn is_whited_out(config: &Config, vpath: &VirtualPath) -> Result<bool> {
    let marker = marker_path(config, vpath)?;
    Ok(std::fs::symlink_metadata(marker).is_ok())
}

/// Record a deletion of `vpath`: ensure the session-side parent exists
/// (mode 0755 if created), then create an empty 0644 marker file.
///
/// A whiteout under a name that already has a session-side file is
/// meaningless and is never produced by this engine (spec invariant 2
/// calls that state degenerate); callers are expected to have already
/// confirmed there is no session entry before calling this.
pub fn add_whiteout(config: &Config, vpath: &VirtualPath) -> Result<()> {
    let marker = marker_path(config, vpath)?;
    if let Some((parent, _)) = vpath.split() {
        let parent_host = compose(config.session_root(), &parent)?;
        if std::fs::symlink_metadata(&parent_host).is_err() {
            std::fs::create_dir_all(&parent_host)
                .map_err(|e| Error::classify_io(&parent, e))?;
            std::fs::set_permissions(&parent_host, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| Error::classify_io(&parent, e))?;
        }
    }

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(&marker)
        .map(|_| ())
        .map_err(|e| Error::classify_io(vpath, e))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::config::Config;

    #[test]
    fn add_then_query_whiteout() {
        let session = tempdir().unwrap();
        let base = tempdir().unwrap();
        let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
        let vpath = VirtualPath::new("/secret").unwrap();

        assert!(!is_whited_out(&config, &vpath).unwrap());
        add_whiteout(&config, &vpath).unwrap();
        assert!(is_whited_out(&config, &vpath).unwrap());

        let marker = marker_path(&config, &vpath).unwrap();
        assert!(fs::metadata(marker).unwrap().is_file());
    }

    #[test]
    fn reserved_name_is_substring_match() {
        assert!(is_reserved_name("report.deleted.csv"));
        assert!(is_reserved_name("foo.deleted"));
        assert!(is_reserved_name("foo.deletedbar"));
        assert!(!is_reserved_name("plain.txt"));
    }

    #[test]
    fn creates_nested_parent_for_marker() {
        let session = tempdir().unwrap();
        let base = tempdir().unwrap();
        let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
        let vpath = VirtualPath::new("/dir/child").unwrap();
        add_whiteout(&config, &vpath).unwrap();
        assert!(session.path().join("dir").is_dir());
        assert!(is_whited_out(&config, &vpath).unwrap());
    }
}
