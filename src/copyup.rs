/*
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The Copy-Up Engine (spec §4.4).
//!
//! Materialises a base-layer file into the session layer on first
//! write/truncate. The copy is synchronous and whole-file: subsequent
//! reads must see the untouched prefix/suffix around a partial write, so
//! a lazy or range-limited copy would be observably wrong (spec §9
//! "Synchronous copy-up" design note). The 8 KiB chunk floor mirrors the
//! `char buffer[8192]` the original C implementation copied through.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use tracing::trace;

use crate::config::Config;
use crate::error::Error;
use crate::error::Result;
use crate::layer;
use crate::vpath::compose;
use crate::vpath::VirtualPath;

/// Minimum chunk size for the copy-up loop (spec §4.4).
const COPY_CHUNK_SIZE: usize = 8192;

/// Ensure `vpath` has a session-layer entry, copying it up from the
/// effective base entry if necessary, and return the session-side host
/// path mutating operations should target.
///
/// Idempotent: if the session entry already exists, copy-up is skipped
/// and subsequent mutations are expected to target the returned path
/// directly (spec §4.4 "Idempotence").
#[tracing::instrument(skip(config), ret, err)]
pub fn ensure_session_entry(config: &Config, vpath: &VirtualPath) -> Result<PathBuf> {
    let target = compose(config.session_root(), vpath)?;
    if std::fs::symlink_metadata(&target).is_ok() {
        return Ok(target);
    }

    let source = layer::resolve_base_only(config, vpath)?
        .ok_or_else(|| Error::NotFound(vpath.clone()))?;

    ensure_immediate_parent(config, vpath)?;

    copy_file(&source.host_path, &target, vpath)?;
    Ok(target)
}

/// Ensure the immediate parent directory of `vpath`'s session composition
/// exists, creating it with mode 0755 if absent. This is single-level
/// only: deeper missing ancestors are not created (spec §9 open
/// question "Parent directory creation depth").
pub fn ensure_immediate_parent(config: &Config, vpath: &VirtualPath) -> Result<()> {
    let Some((parent, _)) = vpath.split() else {
        return Ok(());
    };
    let parent_host = compose(config.session_root(), &parent)?;
    if std::fs::symlink_metadata(&parent_host).is_ok() {
        return Ok(());
    }
    std::fs::create_dir(&parent_host).map_err(|e| Error::classify_io(&parent, e))?;
    std::fs::set_permissions(&parent_host, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| Error::classify_io(&parent, e))
}

fn copy_file(source: &std::path::Path, dest: &std::path::Path, vpath: &VirtualPath) -> Result<()> {
    trace!(
        %vpath,
        source = %source.display(),
        dest = %dest.display(),
        "copying up"
    );
    let mut src = File::open(source).map_err(|e| Error::classify_io(vpath, e))?;
    let mut dst = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(dest)
        .map_err(|e| Error::classify_io(vpath, e))?;

    let mut buf = [0u8; COPY_CHUNK_SIZE];
    loop {
        let n = src.read(&mut buf).map_err(|e| Error::classify_io(vpath, e))?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])
            .map_err(|e| Error::classify_io(vpath, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn copies_up_full_contents() {
        let session = tempdir().unwrap();
        let base = tempdir().unwrap();
        fs::write(base.path().join("readme.txt"), b"hello").unwrap();

        let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
        let vpath = VirtualPath::new("/readme.txt").unwrap();

        let target = ensure_session_entry(&config, &vpath).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"hello");
        // base untouched
        assert_eq!(fs::read(base.path().join("readme.txt")).unwrap(), b"hello");
    }

    #[test]
    fn skips_copy_when_session_entry_present() {
        let session = tempdir().unwrap();
        let base = tempdir().unwrap();
        fs::write(base.path().join("f"), b"base").unwrap();
        fs::write(session.path().join("f"), b"session-already").unwrap();

        let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
        let vpath = VirtualPath::new("/f").unwrap();

        let target = ensure_session_entry(&config, &vpath).unwrap();
        assert_eq!(fs::read(target).unwrap(), b"session-already");
    }

    #[test]
    fn creates_missing_immediate_parent() {
        let session = tempdir().unwrap();
        let base = tempdir().unwrap();
        fs::create_dir(base.path().join("sub")).unwrap();
        fs::write(base.path().join("sub/f"), b"data").unwrap();

        let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
        let vpath = VirtualPath::new("/sub/f").unwrap();

        let target = ensure_session_entry(&config, &vpath).unwrap();
        assert!(session.path().join("sub").is_dir());
        assert_eq!(fs::read(target).unwrap(), b"data");
    }

    #[test]
    fn phantom_path_is_not_found() {
        let session = tempdir().unwrap();
        let base = tempdir().unwrap();
        let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
        let vpath = VirtualPath::new("/nope").unwrap();
        assert!(matches!(
            ensure_session_entry(&config, &vpath),
            Err(Error::NotFound(_))
        ));
    }
}
