/*
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! `VirtualPath` and the Path Composer (spec §3, §4.1).
//!
//! A `VirtualPath` is opaque apart from separator handling: it is always
//! absolute and we never normalise `.`/`..` components, mirroring the
//! original implementation's treatment of paths as they arrive from the
//! kernel.

use std::ffi::OsString;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::ffi::OsStringExt;
use std::path::Path;
use std::path::PathBuf;

use crate::error::Error;
use crate::error::Result;

/// An absolute, slash-separated path in the exported namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath(String);

impl VirtualPath {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(Error::InvalidArgument(format!(
                "virtual path must start with '/': {path:?}"
            )));
        }
        Ok(Self(path))
    }

    pub const fn root() -> &'static str {
        "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Parent directory and final component, POSIX-style. `/` has no
    /// parent.
    pub fn split(&self) -> Option<(VirtualPath, &str)> {
        if self.is_root() {
            return None;
        }
        let trimmed = self.0.trim_end_matches('/');
        let idx = trimmed.rfind('/')?;
        let name = &trimmed[idx + 1..];
        let parent = if idx == 0 { "/" } else { &trimmed[..idx] };
        Some((VirtualPath(parent.to_string()), name))
    }

    pub fn file_name(&self) -> Option<&str> {
        self.split().map(|(_, name)| name)
    }

    /// Build the child path `self/name`, handling the separator the same
    /// way the Path Composer does for layer roots.
    pub fn join(&self, name: &str) -> VirtualPath {
        if self.0.ends_with('/') {
            VirtualPath(format!("{}{}", self.0, name))
        } else {
            VirtualPath(format!("{}/{}", self.0, name))
        }
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Join a layer root with a virtual path, normalising the duplicate
/// separator at the join point, exactly as spec §4.1 describes. This is
/// deliberately *not* `Path::join`: `Path::join` treats an absolute second
/// argument as a full replacement of the first, which would silently drop
/// the layer root.
pub fn compose(root: &Path, vpath: &VirtualPath) -> Result<PathBuf> {
    let root_bytes = root.as_os_str().as_bytes();
    let vpath_bytes = vpath.as_str().as_bytes();

    let mut buf = Vec::with_capacity(root_bytes.len() + vpath_bytes.len());
    buf.extend_from_slice(root_bytes);
    if root_bytes.last() == Some(&b'/') {
        // vpath always starts with '/' (VirtualPath::new enforces it), so
        // drop it to avoid a doubled separator at the join.
        buf.extend_from_slice(&vpath_bytes[1..]);
    } else {
        buf.extend_from_slice(vpath_bytes);
    }

    if buf.len() > libc::PATH_MAX as usize {
        return Err(Error::NameTooLong(vpath.clone()));
    }

    Ok(PathBuf::from(OsString::from_vec(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_paths() {
        assert!(VirtualPath::new("relative").is_err());
    }

    #[test]
    fn compose_drops_duplicate_separator() {
        let vp = VirtualPath::new("/readme.txt").unwrap();
        assert_eq!(
            compose(Path::new("/session/"), &vp).unwrap(),
            PathBuf::from("/session/readme.txt")
        );
        assert_eq!(
            compose(Path::new("/session"), &vp).unwrap(),
            PathBuf::from("/session/readme.txt")
        );
    }

    #[test]
    fn split_root_has_no_parent() {
        let root = VirtualPath::new("/").unwrap();
        assert!(root.split().is_none());
    }

    #[test]
    fn split_returns_parent_and_name() {
        let vp = VirtualPath::new("/a/b/c").unwrap();
        let (parent, name) = vp.split().unwrap();
        assert_eq!(parent.as_str(), "/a/b");
        assert_eq!(name, "c");
    }

    #[test]
    fn split_top_level_parent_is_root() {
        let vp = VirtualPath::new("/secret").unwrap();
        let (parent, name) = vp.split().unwrap();
        assert_eq!(parent.as_str(), "/");
        assert_eq!(name, "secret");
    }

    #[test]
    fn name_too_long_is_an_error_not_a_panic() {
        let huge = "/".to_string() + &"a".repeat(libc::PATH_MAX as usize * 2);
        let vp = VirtualPath::new(huge).unwrap();
        assert!(compose(Path::new("/session"), &vp).is_err());
    }
}
